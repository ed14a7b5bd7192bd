use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::assets::AssetType;
use crate::config::{Config, ToolKind};
use crate::dag::{Dag, StageOutput};
use crate::discovery::{self, Source};
use crate::error::PipelineError;
use crate::executor::{UnitContext, Workflow};
use crate::runner::Cmd;
use crate::tiff;
use crate::work_unit::WorkUnit;
use crate::workflows::common::{self, LARGE, SMALL};


pub const EXTENSIONS: [&str; 16] = [
	"dm3", "DM3", "dm4", "DM4",
	"tif", "TIF", "tiff", "TIFF",
	"jpeg", "JPEG", "jpg", "JPG",
	"png", "PNG",
	"mrc", "MRC"
];

/// formats the image tools can scale directly
const RASTER: [&str; 5] = ["tif", "tiff", "jpeg", "jpg", "png"];


/// 2D images: each one becomes a small thumbnail and a large key image.
pub struct DmWorkflow {
	config: Arc<Config>
}

impl DmWorkflow {

	pub fn new(config: Arc<Config>) -> Self {
		Self {
			config
		}
	}
}

impl Workflow for DmWorkflow {

	type Unit = DmUnit;

	fn name(&self) -> &'static str {
		"dm"
	}

	fn validate(&self) -> Result<()> {
		Ok(())
	}

	fn discover(&self, input_dir: &Path, single: Option<&str>) -> Result<Vec<Source>> {
		let files = discovery::list_files(input_dir, &EXTENSIONS, single)?;
		Ok(files.into_iter()
			.map(Source::single)
			.collect())
	}

	fn prepare(&self, work_unit: WorkUnit, _source: Source) -> DmUnit {
		DmUnit {
			wu: work_unit,
			config: self.config.clone()
		}
	}

	fn dag(&self) -> Dag<DmUnit> {
		let mut dag = Dag::new();
		let dm = dag.stage("convert_dm", &[], DmUnit::convert_dm);
		let tiff = dag.stage("convert_int16_tiff", &[], DmUnit::convert_int16_tiff);
		let mrc = dag.stage("convert_mrc", &[], DmUnit::convert_mrc);
		dag.stage("scale", &[dm, tiff, mrc], DmUnit::scale);
		dag
	}
}


pub struct DmUnit {
	wu: WorkUnit,
	config: Arc<Config>
}

impl UnitContext for DmUnit {

	fn work_unit(&self) -> &WorkUnit {
		&self.wu
	}

	fn into_work_unit(self) -> WorkUnit {
		self.wu
	}
}

impl DmUnit {

	fn source(&self) -> &Path {
		self.wu.source_path()
	}

	fn ext(&self) -> String {
		self.source().extension()
			.map(|ext| ext.to_string_lossy().to_lowercase())
			.unwrap_or_default()
	}

	fn dm_as_jpeg(&self) -> PathBuf {
		self.wu.file("mrc_as_jpg.jpeg")
	}

	fn tiff_as_8_bit(&self) -> PathBuf {
		self.wu.file("as_8_bit.tif")
	}

	fn mrc_as_tiff(&self) -> PathBuf {
		self.wu.file(format!("{}_mrc_as_tiff.tiff", self.wu.base()))
	}

	/// Digital Micrograph goes through mrc on its way to jpeg.
	fn convert_dm(&self) -> Result<StageOutput> {

		if !matches!(self.ext().as_str(), "dm3" | "dm4") {
			return Ok(StageOutput::none());
		}

		let mrc = self.wu.file("dm_as_mrc.mrc");
		Cmd::new(self.config.tool(ToolKind::Dm2mrc))
			.path(self.source())
			.path(&mrc)
			.run(self.wu.log_path("dm2mrc"))?;
		Cmd::new(self.config.tool(ToolKind::Mrc2tif))
			.arg("-j")
			.path(&mrc)
			.path(self.dm_as_jpeg())
			.run(self.wu.log_path("mrc2tif"))?;

		Ok(StageOutput::none())
	}

	/// Signed 16-bit tiffs don't scale well, so they're squeezed to 8 bits first.
	fn convert_int16_tiff(&self) -> Result<StageOutput> {

		if !matches!(self.ext().as_str(), "tif" | "tiff") {
			return Ok(StageOutput::none());
		}
		let pixel = tiff::pixel_type(self.source())?;
		if !pixel.is_int16() {
			debug!("{:?}, no conversion needed", pixel);
			return Ok(StageOutput::none());
		}

		Cmd::new(self.config.tool(ToolKind::FileToUint8))
			.arg("in")
			.path(self.source())
			.arg("out")
			.path(self.tiff_as_8_bit())
			.run(self.wu.log_path("file_to_uint8"))?;

		Ok(StageOutput::none())
	}

	fn convert_mrc(&self) -> Result<StageOutput> {

		if self.ext() != "mrc" {
			return Ok(StageOutput::none());
		}

		let [x, y, z] = common::header_dims(&self.config, &self.wu, self.source(), "header")?;
		if z > 1 {
			return Err(PipelineError::validation(format!("{} is not 2 dimensional", self.source().to_string_lossy())));
		}

		Cmd::new(self.config.tool(ToolKind::Newstack))
			.arg("-shrink")
			.arg(shrink_factor(x, y))
			.args(["-antialias", "4", "-mode", "0", "-meansd", "140,50"])
			.path(self.source())
			.path(self.mrc_as_tiff())
			.run(self.wu.log_path("newstack_shrink"))?;

		Ok(StageOutput::none())
	}

	/// The first converted image that exists, or the input itself if it's already a raster.
	fn scalable_image(&self) -> Result<PathBuf> {
		for converted in [self.dm_as_jpeg(), self.tiff_as_8_bit(), self.mrc_as_tiff()] {
			if converted.exists() {
				return Ok(converted);
			}
		}
		if RASTER.contains(&self.ext().as_str()) {
			return Ok(self.source().to_path_buf());
		}
		Err(PipelineError::validation(format!("don't know how to make images from {}", self.source().to_string_lossy())))
	}

	fn scale(&self) -> Result<StageOutput> {

		let image = self.scalable_image()?;

		let small = self.wu.file(format!("{}_SM.jpeg", self.wu.base()));
		common::scale_image(&self.config, &self.wu, &image, &small, SMALL, "gm_SM")?;
		let large = self.wu.file(format!("{}_LG.jpeg", self.wu.base()));
		common::scale_image(&self.config, &self.wu, &image, &large, LARGE, "gm_LG")?;

		Ok(StageOutput::assets(vec![
			self.wu.promote_asset(AssetType::Thumbnail, small)?,
			self.wu.promote_asset(AssetType::KeyImage, large)?
		]))
	}
}


/// Shrinks the short side to about 1024 pixels. Small images are left alone.
fn shrink_factor(x: u64, y: u64) -> String {
	let factor = (x.min(y) as f64 / 1024.0).max(1.0);
	format!("{:.3}", factor)
}
