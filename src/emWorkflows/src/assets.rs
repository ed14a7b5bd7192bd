use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;


/// Kinds of output the API knows how to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetType {
	Thumbnail,
	KeyImage,
	KeyThumbnail,
	RecMovie,
	TiltMovie,
	AveragedVolume,
	Volume,
	NeuroglancerPrecomputed,
	NeuroglancerZarr
}

impl AssetType {

	pub const ALL: [AssetType; 9] = [
		Self::Thumbnail,
		Self::KeyImage,
		Self::KeyThumbnail,
		Self::RecMovie,
		Self::TiltMovie,
		Self::AveragedVolume,
		Self::Volume,
		Self::NeuroglancerPrecomputed,
		Self::NeuroglancerZarr
	];

	pub fn name(&self) -> &'static str {
		match self {
			Self::Thumbnail => "thumbnail",
			Self::KeyImage => "keyImage",
			Self::KeyThumbnail => "keyThumbnail",
			Self::RecMovie => "recMovie",
			Self::TiltMovie => "tiltMovie",
			Self::AveragedVolume => "averagedVolume",
			Self::Volume => "volume",
			Self::NeuroglancerPrecomputed => "neuroglancerPrecomputed",
			Self::NeuroglancerZarr => "neuroglancerZarr"
		}
	}
}

impl fmt::Display for AssetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for AssetType {

	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::ALL.into_iter()
			.find(|t| t.name() == s)
			.ok_or_else(|| PipelineError::validation(format!("unknown asset type: {}", s)))
	}
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
	#[serde(rename = "type")]
	pub kind: AssetType,
	/// relative to the share's Assets root
	pub path: String,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub metadata: Option<Map<String,Value>>
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
	pub image_name: String,
	pub image_metadata: Option<Map<String,Value>>,
	pub assets: Vec<Asset>
}

impl ImageElement {

	pub fn new(image_name: impl Into<String>) -> Self {
		Self {
			image_name: image_name.into(),
			image_metadata: None,
			assets: Vec::new()
		}
	}
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Success,
	Error
}


/// Everything the API learns about one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRecord {
	pub primary_file_path: String,
	pub title: String,
	pub status: Status,
	pub message: Option<String>,
	pub thumbnail_index: usize,
	pub file_metadata: Option<Map<String,Value>>,
	/// null once the record is marked as an error
	pub image_set: Option<Vec<ImageElement>>
}

impl CallbackRecord {

	/// A fresh record starts out successful, with one empty image element named after the input.
	pub fn new(primary_file_path: impl Into<String>, title: impl Into<String>) -> Self {
		let title = title.into();
		Self {
			primary_file_path: primary_file_path.into(),
			image_set: Some(vec![ImageElement::new(title.clone())]),
			title,
			status: Status::Success,
			message: None,
			thumbnail_index: 0,
			file_metadata: None
		}
	}

	pub fn is_error(&self) -> bool {
		self.status == Status::Error
	}

	/// Appends to the first image element. Ignored on error records.
	pub fn append_asset(&mut self, asset: Asset) {
		let Some(image_set) = &mut self.image_set
			else { return; };
		match image_set.first_mut() {
			Some(elem) => elem.assets.push(asset),
			None => {
				let mut elem = ImageElement::new(self.title.clone());
				elem.assets.push(asset);
				image_set.push(elem);
			}
		}
	}

	/// Multi-series inputs describe each series with its own element.
	/// The empty element a record starts with is replaced by the first one appended.
	pub fn append_image_set(&mut self, elem: ImageElement) {
		let Some(image_set) = &mut self.image_set
			else { return; };
		let only_seed = matches!(image_set.as_slice(), [only] if only.assets.is_empty() && only.image_name == self.title);
		if only_seed {
			image_set.clear();
		}
		image_set.push(elem);
	}

	pub fn mark_error(&mut self, message: impl Into<String>) {
		self.status = Status::Error;
		self.message = Some(message.into());
		self.image_set = None;
	}

	pub fn assets(&self) -> impl Iterator<Item=&Asset> {
		self.image_set.iter()
			.flatten()
			.flat_map(|elem| elem.assets.iter())
	}

	pub fn set_file_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
		self.file_metadata
			.get_or_insert_with(Map::new)
			.insert(key.into(), value.into());
	}
}


#[cfg(test)]
mod test {

	use galvanic_assert::{assert_that, matchers::*};
	use serde_json::json;

	use super::*;


	fn asset(kind: AssetType, path: &str) -> Asset {
		Asset {
			kind,
			path: path.to_string(),
			metadata: None
		}
	}

	#[test]
	fn asset_type_names() {
		for t in AssetType::ALL {
			assert_that!(&t.name().parse::<AssetType>().unwrap(), eq(t));
			assert_that!(&serde_json::to_value(t).unwrap(), eq(json!(t.name())));
		}
		assert_that!(&"movie".parse::<AssetType>().is_err(), eq(true));
	}

	#[test]
	fn wire_format() {
		let mut record = CallbackRecord::new("Lab/PI/a.dm4", "a");
		record.append_asset(asset(AssetType::KeyImage, "Lab/PI/a/a_LG.jpeg"));
		assert_that!(&serde_json::to_value(&record).unwrap(), eq(json!({
			"primaryFilePath": "Lab/PI/a.dm4",
			"title": "a",
			"status": "success",
			"message": null,
			"thumbnailIndex": 0,
			"fileMetadata": null,
			"imageSet": [{
				"imageName": "a",
				"imageMetadata": null,
				"assets": [{
					"type": "keyImage",
					"path": "Lab/PI/a/a_LG.jpeg"
				}]
			}]
		})));
	}

	#[test]
	fn error_is_terminal() {
		let mut record = CallbackRecord::new("Lab/a.mrc", "a");
		record.append_asset(asset(AssetType::Thumbnail, "Lab/a/a_SM.jpeg"));
		record.mark_error("boom");
		record.append_asset(asset(AssetType::KeyImage, "Lab/a/a_LG.jpeg"));
		assert_that!(&record.is_error(), eq(true));
		assert_that!(&record.image_set, eq(None));
		assert_that!(&record.message, eq(Some("boom".to_string())));
		assert_that!(&serde_json::to_value(&record).unwrap()["imageSet"], eq(Value::Null));
	}

	#[test]
	fn image_sets_replace_the_seed() {
		let mut record = CallbackRecord::new("Lab/a.czi", "a");
		record.append_image_set(ImageElement::new("Scene 0"));
		record.append_image_set(ImageElement::new("label image"));
		let names = record.image_set.unwrap()
			.into_iter()
			.map(|elem| elem.image_name)
			.collect::<Vec<_>>();
		assert_that!(&names, eq(vec!["Scene 0".to_string(), "label image".to_string()]));
	}
}
