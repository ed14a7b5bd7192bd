use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};

use crate::assets::AssetType;
use crate::config::{Config, ToolKind};
use crate::dag::{Dag, StageOutput};
use crate::discovery::{self, Source};
use crate::executor::{UnitContext, Workflow};
use crate::runner::Cmd;
use crate::work_unit::WorkUnit;
use crate::workflows::common::{self, SMALL};


#[derive(Debug, Clone, Default)]
pub struct SemParams {
	/// stage tilt, when the frames were imaged at an angle
	pub tilt_angle: Option<f64>
}


/// FIB-SEM stacks: each subfolder of tif frames is aligned into one volume.
pub struct SemWorkflow {
	config: Arc<Config>,
	params: SemParams
}

impl SemWorkflow {

	pub fn new(config: Arc<Config>, params: SemParams) -> Self {
		Self {
			config,
			params
		}
	}
}

impl Workflow for SemWorkflow {

	type Unit = SemUnit;

	fn name(&self) -> &'static str {
		"sem"
	}

	fn validate(&self) -> Result<()> {
		Ok(())
	}

	fn discover(&self, input_dir: &Path, single: Option<&str>) -> Result<Vec<Source>> {
		let mut sources = Vec::new();
		for dir in discovery::list_dirs(input_dir, single)? {
			sources.push(Source {
				members: discovery::list_frames(&dir)?,
				path: dir
			});
		}
		Ok(sources)
	}

	fn prepare(&self, work_unit: WorkUnit, source: Source) -> SemUnit {
		SemUnit {
			wu: work_unit,
			frames: source.members,
			config: self.config.clone(),
			params: self.params.clone(),
			sections: OnceLock::new()
		}
	}

	fn dag(&self) -> Dag<SemUnit> {

		let mut dag = Dag::new();

		let source = dag.stage("tif2mrc", &[], SemUnit::tif2mrc);
		let xfalign = dag.stage("xfalign", &[source], SemUnit::xfalign);
		let xftoxg = dag.stage("xftoxg", &[xfalign], SemUnit::xftoxg);
		let align = dag.stage("align", &[xftoxg], SemUnit::align);
		let stretch = dag.stage("stretch", &[align], SemUnit::stretch);
		let normalize = dag.stage("normalize", &[stretch], SemUnit::normalize);

		let dims = dag.stage("dims", &[normalize], SemUnit::dims);
		let mid = dag.stage("mid_section", &[dims], SemUnit::mid_section);
		let key_image = dag.stage("key_image", &[mid], SemUnit::key_image);
		dag.stage("thumbnail", &[key_image], SemUnit::thumbnail);

		let jpegs = dag.stage("movie_jpegs", &[normalize], SemUnit::movie_jpegs);
		dag.stage("movie", &[jpegs], SemUnit::movie);

		dag.stage("pyramid", &[normalize], SemUnit::pyramid);

		dag
	}
}


pub struct SemUnit {
	wu: WorkUnit,
	/// in natural order
	frames: Vec<PathBuf>,
	config: Arc<Config>,
	params: SemParams,
	sections: OnceLock<u64>
}

impl UnitContext for SemUnit {

	fn work_unit(&self) -> &WorkUnit {
		&self.wu
	}

	fn into_work_unit(self) -> WorkUnit {
		self.wu
	}
}

impl SemUnit {

	/// named after the first frame, not the folder
	fn basename(&self) -> String {
		self.frames.first()
			.and_then(|frame| frame.file_stem())
			.map(|stem| stem.to_string_lossy().to_string())
			.unwrap_or_else(|| self.wu.base().to_string())
	}

	fn newstack(&self) -> Cmd {
		Cmd::new(self.config.tool(ToolKind::Newstack))
	}

	fn normalized(&self) -> PathBuf {
		self.wu.file(format!("{}.mrc", self.basename()))
	}

	fn key_image_path(&self) -> PathBuf {
		self.wu.file(format!("{}_keyimg.jpg", self.basename()))
	}

	fn movie_prefix(&self) -> String {
		format!("{}_mp4", self.wu.base())
	}

	fn tif2mrc(&self) -> Result<StageOutput> {
		Cmd::new(self.config.tool(ToolKind::Tif2mrc))
			.paths(&self.frames)
			.path(self.wu.file("source.mrc"))
			.run(self.wu.log_path("tif2mrc"))?;
		Ok(StageOutput::none())
	}

	fn xfalign(&self) -> Result<StageOutput> {
		Cmd::new(self.config.tool(ToolKind::Xfalign))
			.args(["-pa", "-1", "-pr"])
			.path(self.wu.file("source.mrc"))
			.path(self.wu.file("align.xf"))
			.run(self.wu.log_path("xfalign"))?;
		Ok(StageOutput::none())
	}

	fn xftoxg(&self) -> Result<StageOutput> {
		Cmd::new(self.config.tool(ToolKind::Xftoxg))
			.args(["-ro", "-mi", "2"])
			.path(self.wu.file("align.xf"))
			.path(self.wu.file("align.xg"))
			.run(self.wu.log_path("xftoxg"))?;
		Ok(StageOutput::none())
	}

	fn align(&self) -> Result<StageOutput> {
		self.newstack()
			.arg("-x")
			.path(self.wu.file("align.xg"))
			.path(self.wu.file("source.mrc"))
			.path(self.wu.file("align.mrc"))
			.run(self.wu.log_path("newstack_align"))?;
		Ok(StageOutput::none())
	}

	/// Undoes the foreshortening of a tilted stage. Without a tilt angle there's nothing to do.
	fn stretch(&self) -> Result<StageOutput> {

		let Some(tilt_angle) = self.params.tilt_angle
			else { return Ok(StageOutput::none()); };

		let xf = self.wu.file("stretch.xf");
		fs::write(&xf, stretch_line(tilt_angle))
			.context(format!("Failed to write: {}", xf.to_string_lossy()))?;

		self.newstack()
			.arg("-x")
			.path(&xf)
			.path(self.wu.file("align.mrc"))
			.path(self.wu.file("corrected.mrc"))
			.run(self.wu.log_path("newstack_stretch"))?;
		Ok(StageOutput::none())
	}

	fn normalize(&self) -> Result<StageOutput> {

		let input = match self.params.tilt_angle {
			Some(_) => self.wu.file("corrected.mrc"),
			None => self.wu.file("align.mrc")
		};
		let normalized = self.normalized();
		self.newstack()
			.args(["-meansd", "150,40", "-mo", "0"])
			.path(input)
			.path(&normalized)
			.run(self.wu.log_path("newstack_normalize"))?;

		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::AveragedVolume, normalized)?))
	}

	fn dims(&self) -> Result<StageOutput> {
		let [_, _, z] = common::header_dims(&self.config, &self.wu, &self.normalized(), "header")?;
		self.sections.set(z).ok();
		Ok(StageOutput::none())
	}

	fn mid_section(&self) -> Result<StageOutput> {
		let z = common::upstream(&self.sections, "section count")?;
		self.newstack()
			.arg("-secs")
			.arg((z / 2).to_string())
			.path(self.normalized())
			.path(self.wu.file("mid.mrc"))
			.run(self.wu.log_path("newstack_mid"))?;
		Ok(StageOutput::none())
	}

	fn key_image(&self) -> Result<StageOutput> {
		let key_image = self.key_image_path();
		Cmd::new(self.config.tool(ToolKind::Mrc2tif))
			.args(["-j", "-C", "0,255"])
			.path(self.wu.file("mid.mrc"))
			.path(&key_image)
			.run(self.wu.log_path("mrc2tif_keyimg"))?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::KeyImage, key_image)?))
	}

	fn thumbnail(&self) -> Result<StageOutput> {
		let thumb = self.wu.file(format!("{}_keyimg_sm.jpg", self.basename()));
		common::scale_image(&self.config, &self.wu, &self.key_image_path(), &thumb, SMALL, "gm_thumbnail")?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::Thumbnail, thumb)?))
	}

	fn movie_jpegs(&self) -> Result<StageOutput> {
		common::mrc_to_jpegs(&self.config, &self.wu, &self.normalized(), &self.movie_prefix(), "0,255", "mrc2tif_movie")?;
		Ok(StageOutput::none())
	}

	fn movie(&self) -> Result<StageOutput> {
		let movie = self.wu.file(format!("{}_recMovie.mp4", self.wu.base()));
		common::jpegs_to_movie(&self.config, &self.wu, &self.movie_prefix(), 8, &movie, "ffmpeg_movie")?;
		Ok(StageOutput::asset(self.wu.promote_asset(AssetType::RecMovie, movie)?))
	}

	fn pyramid(&self) -> Result<StageOutput> {
		Ok(StageOutput::asset(common::gen_pyramid(&self.config, &self.wu, &[self.normalized()])?))
	}
}


/// The single-line transform that stretches y by the tilt.
// NOTE: this takes the cosine of the angle converted *to* degrees, as the stacks have always been processed.
// It needs a look from someone who knows the microscope before it changes.
fn stretch_line(tilt_angle: f64) -> String {
	let tilt_param = 1.0 / tilt_angle.to_degrees().cos();
	format!("1 0 0 {} 0 0\n", tilt_param)
}
