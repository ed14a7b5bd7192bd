use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::assets::{AssetType, ImageElement};
use crate::config::Config;
use crate::dag::{Dag, StageOutput};
use crate::discovery::{self, Source};
use crate::executor::{UnitContext, Workflow};
use crate::work_unit::WorkUnit;
use crate::workflows::common;
use crate::workflows::zarr::{self, Series};


pub const EXTENSIONS: [&str; 2] = ["czi", "CZI"];

const THUMB_SIZE: u32 = 300;
const MACRO_IMAGE: &str = "macro image";
const LABEL_IMAGE: &str = "label image";


/// Zeiss confocal files: converted to an OME-NGFF zarr, with one image element per scene.
pub struct CziWorkflow {
	config: Arc<Config>
}

impl CziWorkflow {

	pub fn new(config: Arc<Config>) -> Self {
		Self {
			config
		}
	}
}

impl Workflow for CziWorkflow {

	type Unit = CziUnit;

	fn name(&self) -> &'static str {
		"czi"
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

	fn prepare(&self, work_unit: WorkUnit, _source: Source) -> CziUnit {
		CziUnit {
			wu: work_unit,
			config: self.config.clone()
		}
	}

	fn dag(&self) -> Dag<CziUnit> {
		let mut dag = Dag::new();
		let gen_zarr = dag.stage("gen_zarr", &[], CziUnit::gen_zarr);
		let rechunk = dag.stage("rechunk", &[gen_zarr], CziUnit::rechunk);
		let promote = dag.stage("promote_zarr", &[rechunk], CziUnit::promote_zarr);
		dag.stage("imageset", &[promote], CziUnit::imageset);
		dag.stage("file_metadata", &[promote], CziUnit::file_metadata);
		dag
	}
}


pub struct CziUnit {
	wu: WorkUnit,
	config: Arc<Config>
}

impl UnitContext for CziUnit {

	fn work_unit(&self) -> &WorkUnit {
		&self.wu
	}

	fn into_work_unit(self) -> WorkUnit {
		self.wu
	}
}

impl CziUnit {

	fn zarr(&self) -> PathBuf {
		self.wu.with_ext("zarr")
	}

	/// where [CziUnit::promote_zarr] puts the zarr
	fn promoted_zarr(&self) -> PathBuf {
		self.wu.assets_dir().join(format!("{}.zarr", self.wu.base()))
	}

	fn gen_zarr(&self) -> Result<StageOutput> {
		zarr::bioformats2raw(&self.config, &self.wu, self.wu.source_path(), &self.zarr(), &[])?;
		Ok(StageOutput::none())
	}

	fn rechunk(&self) -> Result<StageOutput> {
		zarr::rechunk(&self.config, &self.wu, &self.zarr())?;
		Ok(StageOutput::none())
	}

	/// The series get registered one by one, so the zarr itself is not an asset.
	fn promote_zarr(&self) -> Result<StageOutput> {
		self.wu.promote(self.zarr())?;
		Ok(StageOutput::none())
	}

	fn imageset(&self) -> Result<StageOutput> {

		let zarr = self.promoted_zarr();
		let mut elems = Vec::new();

		for series in zarr::list_series(&zarr)? {
			if series.name == MACRO_IMAGE {
				debug!("skipping the macro image");
				continue;
			}
			elems.push(self.image_element(&zarr, &series)?);
		}

		Ok(StageOutput {
			thumbnail_index: label_index(&elems),
			image_sets: elems,
			.. StageOutput::none()
		})
	}

	fn image_element(&self, zarr: &Path, series: &Series) -> Result<ImageElement> {

		let name = scene_name(series);
		let image = series.path(zarr);
		let mut elem = ImageElement::new(&name);

		let thumb = self.wu.file(format!("{}_{}_sm.jpeg", self.wu.base(), name));
		zarr::extract_2d(&self.config, &self.wu, &image, THUMB_SIZE, &thumb, &format!("zarr_extract_2d_{}", series.index))?;
		if name == LABEL_IMAGE {
			// slide scanners store the label on its side
			common::rotate_clockwise(&self.config, &self.wu, &thumb, "rotate_label")?;
		}
		elem.assets.push(self.wu.promote_asset(AssetType::Thumbnail, thumb)?);

		if name != LABEL_IMAGE {
			let mut metadata = zarr::ng_metadata(&self.config, &self.wu, &image, &format!("zarr_ng_metadata_{}", series.index))?;
			// the viewer only takes XY, whatever the channels are
			metadata.insert("dimensions".to_string(), Value::from("XY"));
			elem.assets.push(self.wu.make_asset(AssetType::NeuroglancerZarr, &image, Some(metadata))?);
		}

		Ok(elem)
	}

	/// Points at the OME XML, for when the viewer needs debugging.
	fn file_metadata(&self) -> Result<StageOutput> {

		let xml = zarr::ome_xml_path(&self.promoted_zarr());
		let Ok(rel) = xml.strip_prefix(self.wu.share().assets_root())
			else { return Ok(StageOutput::none()); };
		if !xml.is_file() {
			return Ok(StageOutput::none());
		}

		Ok(StageOutput {
			file_metadata: vec![("omeXml".to_string(), Value::from(rel.to_string_lossy().to_string()))],
			.. StageOutput::none()
		})
	}
}


fn scene_name(series: &Series) -> String {
	if series.name.is_empty() {
		format!("Scene {}", series.index)
	} else {
		series.name.clone()
	}
}


fn label_index(elems: &[ImageElement]) -> Option<usize> {
	elems.iter()
		.position(|elem| elem.image_name == LABEL_IMAGE)
}


#[cfg(test)]
mod test {

	use galvanic_assert::{assert_that, matchers::*};

	use super::*;


	#[test]
	fn unnamed_scenes() {
		let series = Series {
			index: 2,
			name: String::new()
		};
		assert_that!(&scene_name(&series), eq("Scene 2".to_string()));
	}

	#[test]
	fn label_position() {
		let elems = ["Scene 0", "label image", "Scene 2"]
			.into_iter()
			.map(ImageElement::new)
			.collect::<Vec<_>>();
		assert_that!(&label_index(&elems), eq(Some(1)));
		assert_that!(&label_index(&elems[..1]), eq(None));
	}
}
