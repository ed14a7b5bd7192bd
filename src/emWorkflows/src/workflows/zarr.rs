use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::config::{Config, ToolKind};
use crate::error::PipelineError;
use crate::runner::Cmd;
use crate::work_unit::WorkUnit;


pub const RECHUNK_SIZE: u32 = 512;


/// `bioformats2raw` into an OME-NGFF zarr, blosc/zstd compressed.
pub fn bioformats2raw(config: &Config, wu: &WorkUnit, input: &Path, zarr: &Path, extra: &[&str]) -> Result<()> {
	Cmd::new(config.tool(ToolKind::Bioformats2raw))
		.arg(format!("--max_workers={}", config.bioformats_workers))
		.arg("--overwrite")
		.args(extra.iter().copied())
		.args([
			"--downsample-type", "AREA",
			"--compression=blosc",
			"--compression-properties", "cname=zstd",
			"--compression-properties", "clevel=5",
			"--compression-properties", "shuffle=1"
		])
		.path(input)
		.path(zarr)
		.run(wu.log_path("bioformats2raw"))
}


/// Rechunks every array so channels aren't split between chunks. The tool clamps chunks to the array shape.
pub fn rechunk(config: &Config, wu: &WorkUnit, zarr: &Path) -> Result<()> {
	Cmd::new(config.tool(ToolKind::ZarrRechunk))
		.arg("--chunk-size")
		.arg(RECHUNK_SIZE.to_string())
		.path(zarr)
		.run(wu.log_path("zarr_rechunk"))
}


/// Writes a uint8 2D projection of the image at `image` as a jpeg, fit into `size`.
pub fn extract_2d(config: &Config, wu: &WorkUnit, image: &Path, size: u32, output: &Path, step: &str) -> Result<()> {
	Cmd::new(config.tool(ToolKind::ZarrExtract2d))
		.arg("--size-x")
		.arg(size.to_string())
		.arg("--size-y")
		.arg(size.to_string())
		.arg("--auto-uint8")
		.path(image)
		.path(output)
		.run(wu.log_path(step))?;
	if !output.exists() {
		return Err(PipelineError::output_missing(output));
	}
	Ok(())
}


/// Asks for the neuroglancer shader settings of one image.
pub fn ng_metadata(config: &Config, wu: &WorkUnit, image: &Path, step: &str) -> Result<Map<String,Value>> {

	let json = wu.file(format!("{}.ng.json", step));
	Cmd::new(config.tool(ToolKind::ZarrNgMetadata))
		.args(["--middle-quantile", "0.01,0.99", "--output-json"])
		.path(&json)
		.path(image)
		.run(wu.log_path(step))?;

	let text = fs::read_to_string(&json)
		.map_err(|_| PipelineError::output_missing(&json))?;
	match serde_json::from_str::<Value>(&text)
		.context(format!("Failed to parse: {}", json.to_string_lossy()))?
	{
		Value::Object(map) => Ok(map),
		_ => Err(PipelineError::validation(format!("neuroglancer metadata is not an object: {}", json.to_string_lossy())))
	}
}


pub fn ome_xml_path(zarr: &Path) -> PathBuf {
	zarr.join("OME").join("METADATA.ome.xml")
}


/// One image (series) in a bioformats2raw zarr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
	pub index: usize,
	/// empty when the file didn't name it
	pub name: String
}

impl Series {

	pub fn path(&self, zarr: &Path) -> PathBuf {
		zarr.join(self.index.to_string())
	}
}


/// Lists the series, named from the OME XML when there is one,
/// otherwise from the numbered groups bioformats2raw wrote.
pub fn list_series(zarr: &Path) -> Result<Vec<Series>> {

	let xml_path = ome_xml_path(zarr);
	if xml_path.is_file() {
		let xml = fs::read_to_string(&xml_path)
			.context(format!("Failed to read: {}", xml_path.to_string_lossy()))?;
		return image_names(&xml)
			.context(format!("Failed to parse: {}", xml_path.to_string_lossy()))
			.map(|names| names.into_iter()
				.enumerate()
				.map(|(index, name)| Series { index, name })
				.collect()
			);
	}

	let mut indices = Vec::new();
	let entries = fs::read_dir(zarr)
		.context(format!("Failed to read zarr: {}", zarr.to_string_lossy()))?;
	for entry in entries {
		let entry = entry
			.context(format!("Failed to read zarr: {}", zarr.to_string_lossy()))?;
		if entry.path().is_dir() {
			if let Ok(i) = entry.file_name().to_string_lossy().parse::<usize>() {
				indices.push(i);
			}
		}
	}
	indices.sort();
	Ok(indices.into_iter()
		.map(|index| Series { index, name: String::new() })
		.collect())
}


/// The `Name` of every `<Image>` element, in document order.
pub fn image_names(xml: &str) -> Result<Vec<String>> {

	let mut reader = Reader::from_str(xml);
	reader.trim_text(true);

	let mut names = Vec::new();
	let mut buf = Vec::new();
	loop {
		match reader.read_event_into(&mut buf) {
			Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Image" => {
				let mut name = String::new();
				for attr in e.attributes().flatten() {
					if attr.key.local_name().as_ref() == b"Name" {
						name = attr.unescape_value()
							.context("Bad Name attribute")?
							.to_string();
					}
				}
				names.push(name);
			}
			Ok(Event::Eof) => break,
			Err(e) => return Err(e)
				.context(format!("XML error at position {}", reader.buffer_position())),
			_ => ()
		}
		buf.clear();
	}

	Ok(names)
}
