use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::assets::AssetType;
use crate::config::{Config, ToolKind};
use crate::dag::{Dag, StageOutput};
use crate::discovery::{self, Source};
use crate::executor::{UnitContext, Workflow};
use crate::runner::Cmd;
use crate::work_unit::WorkUnit;
use crate::workflows::zarr;


pub const EXTENSIONS: [&str; 2] = ["png", "PNG"];


/// Large RGB pngs, viewed as a zarr.
pub struct Lrg2dWorkflow {
	config: Arc<Config>
}

impl Lrg2dWorkflow {

	pub fn new(config: Arc<Config>) -> Self {
		Self {
			config
		}
	}
}

impl Workflow for Lrg2dWorkflow {

	type Unit = Lrg2dUnit;

	fn name(&self) -> &'static str {
		"lrg2d"
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

	fn prepare(&self, work_unit: WorkUnit, _source: Source) -> Lrg2dUnit {
		Lrg2dUnit {
			wu: work_unit,
			config: self.config.clone()
		}
	}

	fn dag(&self) -> Dag<Lrg2dUnit> {
		let mut dag = Dag::new();
		let tiff = dag.stage("to_tiff", &[], Lrg2dUnit::to_tiff);
		let gen_zarr = dag.stage("gen_zarr", &[tiff], Lrg2dUnit::gen_zarr);
		let rechunk = dag.stage("rechunk", &[gen_zarr], Lrg2dUnit::rechunk);
		dag.stage("thumbnails", &[rechunk], Lrg2dUnit::thumbnails);
		dag.stage("promote_zarr", &[rechunk], Lrg2dUnit::promote_zarr);
		dag
	}
}


pub struct Lrg2dUnit {
	wu: WorkUnit,
	config: Arc<Config>
}

impl UnitContext for Lrg2dUnit {

	fn work_unit(&self) -> &WorkUnit {
		&self.wu
	}

	fn into_work_unit(self) -> WorkUnit {
		self.wu
	}
}

impl Lrg2dUnit {

	fn zarr(&self) -> PathBuf {
		self.wu.with_ext("zarr")
	}

	/// flattened onto white, tiled so bioformats2raw can stream it
	fn to_tiff(&self) -> Result<StageOutput> {
		Cmd::new(self.config.tool(ToolKind::Convert))
			.path(self.wu.source_path())
			.args([
				"-define", "tiff:tile-geometry=128x128",
				"-background", "white",
				"-alpha", "remove",
				"-alpha", "off"
			])
			.path(self.wu.with_ext("tiff"))
			.run(self.wu.log_path("as_tiff"))?;
		Ok(StageOutput::none())
	}

	fn gen_zarr(&self) -> Result<StageOutput> {
		zarr::bioformats2raw(&self.config, &self.wu, &self.wu.with_ext("tiff"), &self.zarr(), &["--scale-format-string", "%2$d"])?;
		Ok(StageOutput::none())
	}

	fn rechunk(&self) -> Result<StageOutput> {
		zarr::rechunk(&self.config, &self.wu, &self.zarr())?;
		Ok(StageOutput::none())
	}

	fn thumbnails(&self) -> Result<StageOutput> {

		let small = self.wu.file(format!("{}_sm.jpeg", self.wu.base()));
		zarr::extract_2d(&self.config, &self.wu, &self.zarr(), 300, &small, "zarr_extract_2d_sm")?;
		let large = self.wu.file(format!("{}_lg.jpeg", self.wu.base()));
		zarr::extract_2d(&self.config, &self.wu, &self.zarr(), 1024, &large, "zarr_extract_2d_lg")?;

		Ok(StageOutput::assets(vec![
			self.wu.promote_asset(AssetType::Thumbnail, small)?,
			self.wu.promote_asset(AssetType::KeyImage, large)?
		]))
	}

	fn promote_zarr(&self) -> Result<StageOutput> {

		let ng = zarr::ng_metadata(&self.config, &self.wu, &self.zarr(), "zarr_ng_metadata")?;
		let mut metadata = Map::new();
		if let Some(shader) = ng.get("shader") {
			metadata.insert("shader".to_string(), shader.clone());
		}
		metadata.insert("dimensions".to_string(), Value::from("XY"));

		let promoted = self.wu.promote(self.zarr())?;
		Ok(StageOutput::asset(self.wu.make_asset(AssetType::NeuroglancerZarr, promoted, Some(metadata))?))
	}
}
