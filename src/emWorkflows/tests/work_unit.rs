
mod util;


use std::fs;

use galvanic_assert::{assert_that, matchers::*};

use em_workflows::assets::AssetType;
use em_workflows::error::PipelineError;
use em_workflows::logging;
use em_workflows::share::{resolve_mount, MountedShare};
use em_workflows::work_unit::WorkUnit;

use crate::util::sandbox::{Sandbox, SHARE};


fn work_unit(sandbox: &Sandbox, name: &str) -> WorkUnit {
	let config = sandbox.config();
	let share = mount(sandbox);
	let source = sandbox.write_input(name, "data");
	WorkUnit::new(&config, &share, sandbox.input_dir(), source).unwrap()
}


fn mount(sandbox: &Sandbox) -> MountedShare {
	resolve_mount(&sandbox.config(), SHARE).unwrap()
}


fn kind(err: &anyhow::Error) -> Option<&'static str> {
	PipelineError::find(err)
		.map(|e| e.kind())
}


#[test]
fn folders() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();

	let wu = work_unit(&sandbox, "grid_04.mrc");

	assert_that!(&wu.base(), eq("grid_04"));
	assert_that!(&wu.record.primary_file_path.as_str(), eq("lab/inputs/grid_04.mrc"));
	assert_that!(&wu.record.title.as_str(), eq("grid_04"));

	// scratch/<base>_<8 random characters>
	assert_that!(&wu.working_dir().is_dir(), eq(true));
	let scratch = sandbox.scratch();
	assert_that!(&wu.working_dir().parent(), eq(Some(scratch.as_path())));
	let name = wu.working_dir().file_name().unwrap().to_string_lossy().to_string();
	assert_that!(&name.len(), eq("grid_04_".len() + 8));
	assert_that!(&name.starts_with("grid_04_"), eq(true));

	// Projects -> Assets
	assert_that!(&wu.assets_dir().to_path_buf(), eq(sandbox.assets_dir("grid_04")));
	assert_that!(&wu.assets_dir().is_dir(), eq(true));

	assert_that!(&wu.with_ext("adoc"), eq(wu.working_dir().join("grid_04.adoc")));
	assert_that!(&wu.log_path("newstack"), eq(wu.working_dir().join("newstack.log")));
}


#[test]
fn working_folders_are_unique() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();

	let dirs = (0 .. 20)
		.map(|_| work_unit(&sandbox, "same.mrc").working_dir().to_path_buf())
		.collect::<std::collections::BTreeSet<_>>();
	assert_that!(&dirs.len(), eq(20));
}


#[test]
fn outside_projects() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();

	let stray = sandbox.root().join("stray.mrc");
	fs::write(&stray, "data").unwrap();
	let err = WorkUnit::new(&sandbox.config(), &mount(&sandbox), sandbox.input_dir(), &stray)
		.unwrap_err();
	assert_that!(&kind(&err), eq(Some("ConfigurationError")));
}


#[test]
fn derived_paths() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();
	let wu = work_unit(&sandbox, "a.dm4");

	assert_that!(&wu.derived_path(Some("jpeg"), None).unwrap(), eq(wu.working_dir().join("a.jpeg")));
	assert_that!(&wu.derived_path(None, Some("mid.mrc")).unwrap(), eq(wu.working_dir().join("mid.mrc")));
	for (ext, name) in [(None, None), (Some("jpeg"), Some("mid.mrc"))] {
		let err = wu.derived_path(ext, name).unwrap_err();
		assert_that!(&kind(&err), eq(Some("ValidationError")));
	}
}


#[test]
fn promote_files_and_folders() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();
	let wu = work_unit(&sandbox, "a.czi");

	// a file
	let jpeg = wu.file("a_sm.jpeg");
	fs::write(&jpeg, "v1").unwrap();
	let asset = wu.promote_asset(AssetType::Thumbnail, &jpeg).unwrap();
	assert_that!(&asset.path.as_str(), eq("lab/inputs/a/a_sm.jpeg"));
	assert_that!(&asset.kind, eq(AssetType::Thumbnail));

	// promoting again replaces it
	fs::write(&jpeg, "v2").unwrap();
	let promoted = wu.promote(&jpeg).unwrap();
	assert_that!(&fs::read_to_string(&promoted).unwrap(), eq("v2".to_string()));

	// a folder, replacing whatever was there
	let zarr = wu.file("a.zarr");
	fs::create_dir_all(zarr.join("0/0")).unwrap();
	fs::write(zarr.join("0/0/chunk"), "pixels").unwrap();
	let stale = wu.assets_dir().join("a.zarr/old");
	fs::create_dir_all(&stale).unwrap();
	let promoted = wu.promote(&zarr).unwrap();
	assert_that!(&fs::read_to_string(promoted.join("0/0/chunk")).unwrap(), eq("pixels".to_string()));
	assert_that!(&stale.exists(), eq(false));
}


#[test]
fn promote_checks() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();
	let wu = work_unit(&sandbox, "a.czi");

	let err = wu.promote(wu.file("never_made.jpeg")).unwrap_err();
	assert_that!(&kind(&err), eq(Some("OutputMissing")));

	let err = wu.promote(sandbox.input_dir().join("a.czi")).unwrap_err();
	assert_that!(&kind(&err), eq(Some("ValidationError")));
}


#[test]
fn logs_and_cleanup() {
	let _logging = logging::init_test();
	let sandbox = Sandbox::new();
	let wu = work_unit(&sandbox, "a.mrc");

	fs::write(wu.log_path("newstack"), "ran").unwrap();
	fs::write(wu.file("a_ali.mrc"), "big").unwrap();

	let logs = wu.copy_logs_to_assets().unwrap();
	assert_that!(&logs.parent(), eq(Some(wu.assets_dir())));
	assert_that!(&logs.file_name().unwrap().to_string_lossy().starts_with("logs_"), eq(true));
	assert_that!(&logs.join("newstack.log").exists(), eq(true));
	assert_that!(&logs.join("a_ali.mrc").exists(), eq(false));

	wu.cleanup(true).unwrap();
	assert_that!(&wu.working_dir().exists(), eq(true));
	wu.cleanup(false).unwrap();
	assert_that!(&wu.working_dir().exists(), eq(false));
}
