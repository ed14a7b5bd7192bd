
mod util;


use galvanic_assert::{assert_that, matchers::*};

use em_workflows::discovery::{list_dirs, list_files, list_frames, pair_inputs, Source};
use em_workflows::error::PipelineError;
use em_workflows::workflows::brt;

use crate::util::sandbox::Sandbox;


fn names(paths: &[std::path::PathBuf]) -> Vec<String> {
	paths.iter()
		.map(|p| p.file_name().unwrap().to_string_lossy().to_string())
		.collect()
}


#[test]
fn files_by_extension() {
	let sandbox = Sandbox::new();
	for name in ["b.mrc", "a.MRC", "c.st", "d.mrc.bak", "e.txt"] {
		sandbox.write_input(name, "x");
	}
	sandbox.write_input("folder.mrc/inner.mrc", "x");

	let files = list_files(sandbox.input_dir(), &brt::EXTENSIONS, None).unwrap();
	assert_that!(&names(&files), eq(vec!["a.MRC".to_string(), "b.mrc".to_string(), "c.st".to_string()]));

	let files = list_files(sandbox.input_dir(), &["mrc"], None).unwrap();
	assert_that!(&names(&files), eq(vec!["b.mrc".to_string()]));
}


#[test]
fn dual_axis_pairs() {
	let sandbox = Sandbox::new();
	for name in ["Xa.mrc", "Xb.mrc", "Y.mrc"] {
		sandbox.write_input(name, "x");
	}

	let files = list_files(sandbox.input_dir(), &brt::EXTENSIONS, None).unwrap();
	let sources = pair_inputs(files);

	let dir = sandbox.input_dir();
	assert_that!(&sources, eq(vec![
		Source {
			path: dir.join("X.mrc"),
			members: vec![dir.join("Xa.mrc"), dir.join("Xb.mrc")]
		},
		Source::single(dir.join("Y.mrc"))
	]));
	assert_that!(&sources[0].is_pair(), eq(true));
	assert_that!(&sources[1].is_pair(), eq(false));
}


#[test]
fn empty() {
	let sandbox = Sandbox::new();

	let err = list_files(sandbox.input_dir(), &["mrc"], None).unwrap_err();
	assert_that!(&matches!(PipelineError::find(&err), Some(PipelineError::NoInputs(..))), eq(true));

	let err = list_dirs(sandbox.input_dir(), None).unwrap_err();
	assert_that!(&matches!(PipelineError::find(&err), Some(PipelineError::NoInputs(..))), eq(true));
}


#[test]
fn tilt_series_folders() {
	let sandbox = Sandbox::new();
	for name in ["s2/f10.tif", "s2/f9.tif", "s1/f1.tif", "nothing/readme.txt"] {
		sandbox.write_input(name, "x");
	}

	let dirs = list_dirs(sandbox.input_dir(), None).unwrap();
	assert_that!(&names(&dirs), eq(vec!["s1".to_string(), "s2".to_string()]));

	let frames = list_frames(&dirs[1]).unwrap();
	assert_that!(&names(&frames), eq(vec!["f9.tif".to_string(), "f10.tif".to_string()]));

	let dirs = list_dirs(sandbox.input_dir(), Some("s2")).unwrap();
	assert_that!(&names(&dirs), eq(vec!["s2".to_string()]));
	let err = list_dirs(sandbox.input_dir(), Some("nothing")).unwrap_err();
	assert_that!(&matches!(PipelineError::find(&err), Some(PipelineError::NoInputs(..))), eq(true));
}
