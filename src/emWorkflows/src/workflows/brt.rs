use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};

use crate::assets::AssetType;
use crate::config::{Config, ToolKind};
use crate::dag::{Dag, StageOutput};
use crate::discovery::{self, Source};
use crate::error::PipelineError;
use crate::executor::{UnitContext, Workflow};
use crate::runner::Cmd;
use crate::template;
use crate::work_unit::WorkUnit;
use crate::workflows::common::{self, SMALL};


pub const EXTENSIONS: [&str; 4] = ["mrc", "MRC", "st", "ST"];


/// Tomography settings that go into the adoc.
#[derive(Debug, Clone)]
pub struct BrtParams {
	pub adoc_template: String,
	pub montage: i64,
	pub gold: i64,
	pub focus: i64,
	pub bfocus: i64,
	pub fiducialless: i64,
	pub tracking_method: i64,
	pub two_surfaces: i64,
	pub target_number_of_beads: i64,
	pub local_alignments: i64,
	pub thickness: i64
}

impl Default for BrtParams {
	fn default() -> Self {
		Self {
			adoc_template: "plastic_brt".to_string(),
			montage: 0,
			gold: 15,
			focus: 0,
			bfocus: 0,
			fiducialless: 1,
			tracking_method: 0,
			two_surfaces: 0,
			target_number_of_beads: 20,
			local_alignments: 0,
			thickness: 30
		}
	}
}

impl BrtParams {

	/// Only one or two surfaces can be analyzed.
	pub fn surfaces_to_analyze(&self) -> Result<i64> {
		match self.two_surfaces {
			0 | 1 => Ok(self.two_surfaces + 1),
			n => Err(PipelineError::validation(format!("TwoSurfaces must be 0 or 1, not {}", n)))
		}
	}

	pub fn rpa_thickness(&self) -> i64 {
		(self.thickness as f64 * 1.5).floor() as i64
	}

	/// The adoc values for one input.
	pub fn adoc_values(&self, name: &str, stackext: &str, dual: bool, dataset_dir: &Path) -> Result<BTreeMap<&'static str,String>> {
		Ok(BTreeMap::from([
			("name", name.to_string()),
			("stackext", stackext.to_string()),
			("currentBStackExt", if dual { stackext.to_string() } else { String::new() }),
			("dual", (dual as u8).to_string()),
			("montage", self.montage.to_string()),
			("gold", self.gold.to_string()),
			("focus", self.focus.to_string()),
			("bfocus", self.bfocus.to_string()),
			("fiducialless", self.fiducialless.to_string()),
			("trackingMethod", self.tracking_method.to_string()),
			("TwoSurfaces", self.two_surfaces.to_string()),
			("TargetNumberOfBeads", self.target_number_of_beads.to_string()),
			("SurfacesToAnalyze", self.surfaces_to_analyze()?.to_string()),
			("LocalAlignments", self.local_alignments.to_string()),
			("THICKNESS", self.thickness.to_string()),
			("rpa_thickness", self.rpa_thickness().to_string()),
			("datasetDirectory", dataset_dir.to_string_lossy().to_string())
		]))
	}
}


pub struct BrtWorkflow {
	config: Arc<Config>,
	params: BrtParams
}

impl BrtWorkflow {

	pub fn new(config: Arc<Config>, params: BrtParams) -> Self {
		Self {
			config,
			params
		}
	}
}

impl Workflow for BrtWorkflow {

	type Unit = BrtUnit;

	fn name(&self) -> &'static str {
		"brt"
	}

	fn validate(&self) -> Result<()> {
		self.params.surfaces_to_analyze()?;
		template::load(&self.config, &self.params.adoc_template)?;
		Ok(())
	}

	fn discover(&self, input_dir: &Path, single: Option<&str>) -> Result<Vec<Source>> {
		let files = discovery::list_files(input_dir, &EXTENSIONS, single)?;
		Ok(discovery::pair_inputs(files))
	}

	fn prepare(&self, work_unit: WorkUnit, source: Source) -> BrtUnit {
		BrtUnit {
			wu: work_unit,
			source,
			config: self.config.clone(),
			params: self.params.clone(),
			ali_z: OnceLock::new(),
			rec_z: OnceLock::new()
		}
	}

	fn dag(&self) -> Dag<BrtUnit> {

		let mut dag = Dag::new();

		let stage_inputs = dag.stage("stage_inputs", &[], BrtUnit::stage_inputs);
		let render_adoc = dag.stage("render_adoc", &[], BrtUnit::render_adoc);
		let brt = dag.stage("batchruntomo", &[stage_inputs, render_adoc], BrtUnit::batchruntomo);
		let brt_ok = dag.stage("check_brt_outputs", &[brt], BrtUnit::check_outputs);

		// tilt movie branch, from the aligned stack
		let ali_dims = dag.stage("ali_dims", &[brt_ok], BrtUnit::ali_dims);
		let sections = dag.stage("ali_sections", &[ali_dims], BrtUnit::ali_sections);
		let stack = dag.stage("ali_stack", &[sections], BrtUnit::ali_stack);
		let jpegs = dag.stage("ali_jpegs", &[stack], BrtUnit::ali_jpegs);
		let key_image = dag.stage("key_image", &[jpegs], BrtUnit::key_image);
		let thumbnail = dag.stage("thumbnail", &[jpegs], BrtUnit::thumbnail);
		let tilt_movie = dag.stage("tilt_movie", &[jpegs], BrtUnit::tilt_movie);
		dag.stage("tilt_cleanup", &[key_image, thumbnail, tilt_movie], BrtUnit::tilt_cleanup);

		// reconstruction movie branch, from the reconstruction
		let rec_dims = dag.stage("rec_dims", &[brt_ok], BrtUnit::rec_dims);
		let averages = dag.stage("clip_averages", &[rec_dims], BrtUnit::clip_averages);
		let averaged = dag.stage("averaged_volume", &[averages], BrtUnit::averaged_volume);
		let binned = dag.stage("binned_volume", &[averaged], BrtUnit::binned_volume);
		let rec_jpegs = dag.stage("rec_jpegs", &[averaged], BrtUnit::rec_jpegs);
		let rec_movie = dag.stage("rec_movie", &[rec_jpegs], BrtUnit::rec_movie);
		dag.stage("rec_cleanup", &[binned, rec_movie], BrtUnit::rec_cleanup);

		dag.stage("pyramid", &[brt_ok], BrtUnit::pyramid);

		dag
	}
}


pub struct BrtUnit {
	wu: WorkUnit,
	source: Source,
	config: Arc<Config>,
	params: BrtParams,
	ali_z: OnceLock<u64>,
	rec_z: OnceLock<u64>
}

impl UnitContext for BrtUnit {

	fn work_unit(&self) -> &WorkUnit {
		&self.wu
	}

	fn into_work_unit(self) -> WorkUnit {
		self.wu
	}
}

impl BrtUnit {

	fn base(&self) -> &str {
		self.wu.base()
	}

	fn file(&self, name: String) -> PathBuf {
		self.wu.file(name)
	}

	fn ali_mrc(&self) -> PathBuf {
		self.file(format!("{}_ali.mrc", self.base()))
	}

	fn rec_mrc(&self) -> PathBuf {
		self.file(format!("{}_rec.mrc", self.base()))
	}

	fn ali_prefix(&self) -> String {
		format!("{}_ali", self.base())
	}

	fn rec_prefix(&self) -> String {
		format!("{}_mp4", self.base())
	}

	/// `<base>a.<ext>` or `<base>b.<ext>`, whatever case the inputs used
	fn axis_stack(&self, axis: char) -> String {
		match self.source.path.extension() {
			Some(ext) => format!("{}{}.{}", self.base(), axis, ext.to_string_lossy()),
			None => format!("{}{}", self.base(), axis)
		}
	}

	fn stage_inputs(&self) -> Result<StageOutput> {
		if self.source.is_pair() {
			// dual mode only looks for lowercase axis letters
			for (member, axis) in self.source.members.iter().zip(['a', 'b']) {
				self.wu.stage_input_as(member, self.axis_stack(axis))?;
			}
		} else {
			for member in &self.source.members {
				self.wu.stage_input(member)?;
			}
		}
		Ok(StageOutput::none())
	}

	fn render_adoc(&self) -> Result<StageOutput> {
		let stackext = self.source.path.extension()
			.map(|ext| ext.to_string_lossy().to_string())
			.unwrap_or_default();
		let values = self.params.adoc_values(self.base(), &stackext, self.source.is_pair(), self.wu.working_dir())?;
		let template = template::load(&self.config, &self.params.adoc_template)?;
		let adoc = template::render(&template, &values)
			.context(format!("Failed to render adoc template {}", self.params.adoc_template))?;
		let path = self.wu.with_ext("adoc");
		fs::write(&path, adoc)
			.context(format!("Failed to write adoc: {}", path.to_string_lossy()))?;
		Ok(StageOutput::none())
	}

	fn batchruntomo(&self) -> Result<StageOutput> {
		Cmd::new(self.config.tool(ToolKind::Batchruntomo))
			.arg("-di")
			.path(self.wu.with_ext("adoc"))
			.args(["-cp", "8", "-gpu", "1"])
			.current_dir(self.wu.working_dir())
			.run(self.wu.log_path("brt_run"))?;
		Ok(StageOutput::none())
	}

	fn check_outputs(&self) -> Result<StageOutput> {
		for path in [self.rec_mrc(), self.ali_mrc()] {
			if !path.exists() {
				return Err(PipelineError::output_missing(path));
			}
		}
		Ok(StageOutput::none())
	}

	fn ali_dims(&self) -> Result<StageOutput> {
		let [_, _, z] = common::header_dims(&self.config, &self.wu, &self.ali_mrc(), "header_ali")?;
		self.ali_z.set(z).ok();
		Ok(StageOutput::none())
	}

	fn rec_dims(&self) -> Result<StageOutput> {
		let [_, _, z] = common::header_dims(&self.config, &self.wu, &self.rec_mrc(), "header_rec")?;
		self.rec_z.set(z).ok();
		Ok(StageOutput::none())
	}

	fn section_path(&self, i: u64) -> PathBuf {
		self.file(format!("{}_align_{:03}.mrc", self.base(), i))
	}

	/// one mrc per section of the aligned stack, skipping section 0
	fn ali_sections(&self) -> Result<StageOutput> {
		let z = common::upstream(&self.ali_z, "aligned stack size")?;
		let ali = self.ali_mrc();
		for i in 1 .. z {
			Cmd::new(self.config.tool(ToolKind::Newstack))
				.arg("-secs")
				.arg(format!("{}-{}", i, i))
				.path(&ali)
				.path(self.section_path(i))
				.run(self.wu.log_path("newstack_sections"))?;
		}
		Ok(StageOutput::none())
	}

	fn ali_stack(&self) -> Result<StageOutput> {
		let z = common::upstream(&self.ali_z, "aligned stack size")?;
		Cmd::new(self.config.tool(ToolKind::Newstack))
			.args(["-float", "3"])
			.paths((1 .. z).map(|i| self.section_path(i)))
			.path(self.file(format!("ali_{}.mrc", self.base())))
			.run(self.wu.log_path("newstack_float_ali"))?;
		Ok(StageOutput::none())
	}

	fn ali_jpegs(&self) -> Result<StageOutput> {
		let stack = self.file(format!("ali_{}.mrc", self.base()));
		common::mrc_to_jpegs(&self.config, &self.wu, &stack, &self.ali_prefix(), "0,255", "mrc2tif_ali")?;
		Ok(StageOutput::none())
	}

	fn middle_jpeg(&self) -> Result<PathBuf> {
		let z = common::upstream(&self.ali_z, "aligned stack size")?;
		let path = common::frame_path(&self.wu, &self.ali_prefix(), z / 2);
		if !path.exists() {
			return Err(PipelineError::output_missing(path));
		}
		Ok(path)
	}

	fn key_image(&self) -> Result<StageOutput> {
		let key_image = self.file(format!("{}_keyImg.jpeg", self.base()));
		fs::copy(self.middle_jpeg()?, &key_image)
			.context(format!("Failed to write key image: {}", key_image.to_string_lossy()))?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::KeyImage, key_image)?))
	}

	fn thumbnail(&self) -> Result<StageOutput> {
		let thumb = self.file(format!("keyimg_{}_s.jpg", self.base()));
		common::scale_image(&self.config, &self.wu, &self.middle_jpeg()?, &thumb, SMALL, "thumbnail")?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::Thumbnail, thumb)?))
	}

	fn tilt_movie(&self) -> Result<StageOutput> {
		let movie = self.file(format!("tiltMov_{}.mp4", self.base()));
		common::jpegs_to_movie(&self.config, &self.wu, &self.ali_prefix(), 4, &movie, "ffmpeg_tilt")?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::TiltMovie, movie)?))
	}

	fn tilt_cleanup(&self) -> Result<StageOutput> {
		let sections = format!("{}_align_", self.base());
		let frames = format!("{}.", self.ali_prefix());
		common::remove_matching(&self.wu, |name| {
			(name.starts_with(&sections) && name.ends_with(".mrc"))
				|| (name.starts_with(&frames) && name.ends_with(".jpg"))
		})?;
		Ok(StageOutput::none())
	}

	fn average_path(&self, i: u64) -> PathBuf {
		self.file(format!("{}_ave{:04}.mrc", self.base(), i))
	}

	fn averaged_mrc(&self) -> PathBuf {
		self.file(format!("{}_ave.mrc", self.base()))
	}

	/// a running 5-section average through the reconstruction
	fn clip_averages(&self) -> Result<StageOutput> {
		let z = common::upstream(&self.rec_z, "reconstruction size")?;
		let rec = self.rec_mrc();
		for i in 2 .. z.saturating_sub(2) {
			Cmd::new(self.config.tool(ToolKind::Clip))
				.args(["avg", "-2d", "-iz"])
				.arg(format!("{}-{}", i - 2, i + 2))
				.args(["-m", "1"])
				.path(&rec)
				.path(self.average_path(i))
				.run(self.wu.log_path("clip_avg"))?;
		}
		Ok(StageOutput::none())
	}

	fn averaged_volume(&self) -> Result<StageOutput> {
		let z = common::upstream(&self.rec_z, "reconstruction size")?;
		let averaged = self.averaged_mrc();
		Cmd::new(self.config.tool(ToolKind::Newstack))
			.args(["-float", "3"])
			.paths((2 .. z.saturating_sub(2)).map(|i| self.average_path(i)))
			.path(&averaged)
			.run(self.wu.log_path("newstack_float_ave"))?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::AveragedVolume, averaged)?))
	}

	fn binned_volume(&self) -> Result<StageOutput> {
		let binned = self.file(format!("{}_avebin8.mrc", self.base()));
		Cmd::new(self.config.tool(ToolKind::Binvol))
			.args(["-binning", "2"])
			.path(self.averaged_mrc())
			.path(&binned)
			.run(self.wu.log_path("binvol"))?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::Volume, binned)?))
	}

	fn rec_jpegs(&self) -> Result<StageOutput> {
		common::mrc_to_jpegs(&self.config, &self.wu, &self.averaged_mrc(), &self.rec_prefix(), "100,255", "mrc2tif_rec")?;
		Ok(StageOutput::none())
	}

	fn rec_movie(&self) -> Result<StageOutput> {
		let movie = self.file(format!("{}_keyMov.mp4", self.base()));
		common::jpegs_to_movie(&self.config, &self.wu, &self.rec_prefix(), 8, &movie, "ffmpeg_rec")?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::RecMovie, movie)?))
	}

	fn rec_cleanup(&self) -> Result<StageOutput> {
		let averages = format!("{}_ave", self.base());
		let frames = format!("{}.", self.rec_prefix());
		common::remove_matching(&self.wu, |name| {
			is_numbered(name, &averages, ".mrc")
				|| (name.starts_with(&frames) && name.ends_with(".jpg"))
		})?;
		Ok(StageOutput::none())
	}

	fn pyramid(&self) -> Result<StageOutput> {
		let candidates = [
			self.rec_mrc(),
			self.wu.with_ext("mrc"),
			self.wu.source_path().to_path_buf()
		];
		Ok(StageOutput::asset(common::gen_pyramid(&self.config, &self.wu, &candidates)?))
	}
}


/// `<prefix><digits><suffix>`
fn is_numbered(name: &str, prefix: &str, suffix: &str) -> bool {
	name.strip_prefix(prefix)
		.and_then(|rest| rest.strip_suffix(suffix))
		.is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}
