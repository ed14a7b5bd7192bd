
mod util;


use std::fs::{self, File};
use std::sync::Arc;

use galvanic_assert::{assert_that, matchers::*};
use indoc::indoc;
use serde_json::json;
use zip::{CompressionMethod, ZipArchive};

use em_workflows::assets::AssetType;
use em_workflows::config::ToolKind;
use em_workflows::error::PipelineError;
use em_workflows::executor::{run_job, JobParams};
use em_workflows::logging;
use em_workflows::workflows::brt::{BrtParams, BrtWorkflow};

use crate::util::records::{assert_promoted, kinds, record};
use crate::util::sandbox::Sandbox;


const ALL_KINDS: [&str; 7] = [
	"averagedVolume",
	"keyImage",
	"neuroglancerPrecomputed",
	"recMovie",
	"thumbnail",
	"tiltMovie",
	"volume"
];


#[test]
fn dual_axis_pair() {
	let _logging = logging::init_test();

	let sandbox = Sandbox::with_tools();
	sandbox.write_input("sampleA.mrc", "a axis");
	sandbox.write_input("sampleB.mrc", "b axis");

	let config = Arc::new(sandbox.config());
	let params = JobParams {
		keep_workdir: true,
		.. sandbox.params()
	};
	let workflow = BrtWorkflow::new(config.clone(), BrtParams::default());
	let summary = run_job(&config, &params, &workflow).unwrap();

	// one unit for the pair
	assert_that!(&summary.records.len(), eq(1));
	let record = record(&summary, "sample");
	assert_that!(&record.is_error(), eq(false));
	assert_that!(&record.primary_file_path.as_str(), eq("lab/inputs/sample.mrc"));
	assert_that!(&kinds(record), eq(ALL_KINDS.to_vec()));
	assert_promoted(record, &sandbox.assets_root());

	// both axes were staged with the lowercase names dual mode wants, and the adoc knows it's dual
	let work_dir = sandbox.working_dir("sample");
	assert_that!(&fs::read_to_string(work_dir.join("samplea.mrc")).unwrap(), eq("a axis".to_string()));
	assert_that!(&fs::read_to_string(work_dir.join("sampleb.mrc")).unwrap(), eq("b axis".to_string()));
	assert_that!(&work_dir.join("sampleA.mrc").exists(), eq(false));
	assert_that!(&work_dir.join("sampleB.mrc").exists(), eq(false));
	let adoc = fs::read_to_string(work_dir.join("sample.adoc")).unwrap();
	assert_that!(&adoc.contains("setupset.copyarg.dual = 1\n"), eq(true));
	assert_that!(&adoc.contains("setupset.copyarg.name = sample\n"), eq(true));
	assert_that!(&adoc.contains(&format!("setupset.datasetDirectory = {}\n", work_dir.to_string_lossy())), eq(true));

	// intermediates are gone
	let leftovers = fs::read_dir(&work_dir).unwrap()
		.map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
		.filter(|name| name.contains("_align_") || name.contains("_ave0") || name.contains("_mp4.") || name.contains("_ali."))
		.collect::<Vec<_>>();
	assert_that!(&leftovers, eq(Vec::<String>::new()));

	// the middle section is the key image
	let mrc2tif_log = fs::read_to_string(work_dir.join("mrc2tif_ali.log")).unwrap();
	assert_that!(&mrc2tif_log.contains(&format!("-j -C 0,255 {}", work_dir.join("ali_sample.mrc").to_string_lossy())), eq(true));

	// the pyramid is stored uncompressed, with the display range exactly as measured
	let pyramid = record.assets()
		.find(|asset| asset.kind == AssetType::NeuroglancerPrecomputed)
		.unwrap();
	assert_that!(&pyramid.path.as_str(), eq("lab/inputs/sample/sample.zip"));
	assert_that!(&json!(pyramid.metadata), eq(json!({
		"neuroglancerPrecomputedMin": 1.5,
		"neuroglancerPrecomputedMax": 200.2,
		"neuroglancerPrecomputedFloor": -3.7,
		"neuroglancerPrecomputedLimit": 254.1
	})));
	let mut archive = ZipArchive::new(File::open(sandbox.assets_root().join(&pyramid.path)).unwrap()).unwrap();
	let mut names = archive.file_names()
		.map(|name| name.to_string())
		.collect::<Vec<_>>();
	names.sort();
	assert_that!(&names, eq(vec![
		"1_1_1/".to_string(),
		"1_1_1/0-64_0-64_0-9".to_string(),
		"info".to_string()
	]));
	assert_that!(&archive.by_name("info").unwrap().compression(), eq(CompressionMethod::Stored));

	// logs were kept with the assets
	let kept_logs = fs::read_dir(sandbox.assets_dir("sample")).unwrap()
		.filter_map(|entry| entry.ok())
		.any(|entry| entry.file_name().to_string_lossy().starts_with("logs_") && entry.path().join("brt_run.log").exists());
	assert_that!(&kept_logs, eq(true));
}


#[test]
fn single_stack_and_movies() {
	let _logging = logging::init_test();

	let sandbox = Sandbox::with_tools();
	sandbox.write_input("tomo.st", "stack");

	let config = Arc::new(sandbox.config());
	let workflow = BrtWorkflow::new(config.clone(), BrtParams::default());
	let params = JobParams {
		keep_workdir: true,
		.. sandbox.params()
	};
	let summary = run_job(&config, &params, &workflow).unwrap();

	let record = record(&summary, "tomo");
	assert_that!(&kinds(record), eq(ALL_KINDS.to_vec()));

	let work_dir = sandbox.working_dir("tomo");
	let adoc = fs::read_to_string(work_dir.join("tomo.adoc")).unwrap();
	assert_that!(&adoc.contains("setupset.copyarg.dual = 0\n"), eq(true));
	assert_that!(&adoc.contains("setupset.copyarg.stackext = st\n"), eq(true));

	let tilt_log = fs::read_to_string(work_dir.join("ffmpeg_tilt.log")).unwrap();
	assert_that!(&tilt_log.contains("-framerate 4 -i"), eq(true));
	assert_that!(&tilt_log.contains("tomo_ali.%03d.jpg"), eq(true));
	let rec_log = fs::read_to_string(work_dir.join("ffmpeg_rec.log")).unwrap();
	assert_that!(&rec_log.contains("-framerate 8 -i"), eq(true));
	assert_that!(&rec_log.ends_with(&format!("{}\n", work_dir.join("tomo_keyMov.mp4").to_string_lossy())), eq(true));
}


#[test]
fn missing_aligned_stack() {
	let _logging = logging::init_test();

	let sandbox = Sandbox::with_tools();
	sandbox.tool(ToolKind::Batchruntomo, indoc! { r#"
		base="${2%.adoc}"
		touch "${base}_rec.mrc"
		case "$base" in
			*/sample) ;;
			*) touch "${base}_ali.mrc" ;;
		esac
	"# });
	sandbox.write_input("sample.mrc", "broken");
	sandbox.write_input("other.mrc", "fine");

	let config = Arc::new(sandbox.config());
	let workflow = BrtWorkflow::new(config.clone(), BrtParams::default());
	let summary = run_job(&config, &sandbox.params(), &workflow).unwrap();

	assert_that!(&summary.failed(), eq(1));

	let broken = record(&summary, "sample");
	assert_that!(&broken.is_error(), eq(true));
	assert_that!(&broken.image_set.is_none(), eq(true));
	let message = broken.message.as_deref().unwrap();
	assert_that!(&message.contains("OutputMissing"), eq(true));
	assert_that!(&message.contains("sample_ali.mrc"), eq(true));

	// the sibling doesn't care
	let fine = record(&summary, "other");
	assert_that!(&fine.is_error(), eq(false));
	assert_that!(&kinds(fine), eq(ALL_KINDS.to_vec()));

	// and everything was cleaned up
	assert_that!(&sandbox.scratch_entries(), eq(Vec::<String>::new()));
}


#[test]
fn bad_two_surfaces() {
	let _logging = logging::init_test();

	let sandbox = Sandbox::with_tools();
	sandbox.write_input("sample.mrc", "stack");

	let config = Arc::new(sandbox.config());
	let brt_params = BrtParams {
		two_surfaces: 2,
		.. BrtParams::default()
	};
	let workflow = BrtWorkflow::new(config.clone(), brt_params);
	let err = run_job(&config, &sandbox.params(), &workflow).unwrap_err();

	assert_that!(&matches!(PipelineError::find(&err), Some(PipelineError::Validation(..))), eq(true));
	assert_that!(&sandbox.scratch_entries(), eq(Vec::<String>::new()));
	assert_that!(&fs::read_dir(sandbox.assets_root()).unwrap().count(), eq(0));
}


#[test]
fn unknown_template() {
	let _logging = logging::init_test();

	let sandbox = Sandbox::with_tools();
	sandbox.write_input("sample.mrc", "stack");

	let config = Arc::new(sandbox.config());
	let brt_params = BrtParams {
		adoc_template: "no_such_template".to_string(),
		.. BrtParams::default()
	};
	let err = run_job(&config, &sandbox.params(), &BrtWorkflow::new(config.clone(), brt_params)).unwrap_err();
	assert_that!(&matches!(PipelineError::find(&err), Some(PipelineError::Validation(..))), eq(true));
}
