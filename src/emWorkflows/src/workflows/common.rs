use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::assets::{Asset, AssetType};
use crate::config::{Config, ToolKind};
use crate::error::PipelineError;
use crate::runner::Cmd;
use crate::work_unit::WorkUnit;


pub const SMALL: &str = "300x300";
pub const LARGE: &str = "1024x1024";


/// Reads the x, y, z size of an MRC volume with `header -s`.
pub fn header_dims(config: &Config, wu: &WorkUnit, mrc: &Path, step: &str) -> Result<[u64; 3]> {

	if !mrc.exists() {
		return Err(PipelineError::output_missing(mrc));
	}

	let out = Cmd::new(config.tool(ToolKind::Header))
		.arg("-s")
		.path(mrc)
		.output(wu.log_path(step))?;

	let dims = out.split_whitespace()
		.filter_map(|word| word.parse::<u64>().ok())
		.collect::<Vec<_>>();
	match dims.as_slice() {
		[x, y, z, ..] => {
			debug!("{} is {}x{}x{}", mrc.to_string_lossy(), x, y, z);
			Ok([*x, *y, *z])
		}
		_ => Err(PipelineError::validation(format!("couldn't read the size of {} from: {}", mrc.to_string_lossy(), out.trim())))
	}
}


/// `convert -size S in -resize S -sharpen 2 -quality 70 out`
pub fn scale_image(config: &Config, wu: &WorkUnit, input: &Path, output: &Path, size: &str, step: &str) -> Result<()> {
	Cmd::new(config.tool(ToolKind::Convert))
		.args(["-size", size])
		.path(input)
		.args(["-resize", size, "-sharpen", "2", "-quality", "70"])
		.path(output)
		.run(wu.log_path(step))
}


/// Turns an image a quarter turn clockwise, in place.
pub fn rotate_clockwise(config: &Config, wu: &WorkUnit, image: &Path, step: &str) -> Result<()> {
	Cmd::new(config.tool(ToolKind::Convert))
		.path(image)
		.args(["-rotate", "90"])
		.path(image)
		.run(wu.log_path(step))
}


/// mrc2tif numbers its frames with three digits, or four once there are a thousand of them.
pub fn frame_width(wu: &WorkUnit, prefix: &str) -> usize {
	if wu.file(format!("{}.1000.jpg", prefix)).exists() {
		4
	} else {
		3
	}
}

pub fn frame_path(wu: &WorkUnit, prefix: &str, i: u64) -> PathBuf {
	let width = frame_width(wu, prefix);
	wu.file(format!("{}.{:0width$}.jpg", prefix, i, width = width))
}


/// `mrc2tif -j -C <contrast> <mrc> <prefix>`, one jpeg per section
pub fn mrc_to_jpegs(config: &Config, wu: &WorkUnit, mrc: &Path, prefix: &str, contrast: &str, step: &str) -> Result<()> {
	Cmd::new(config.tool(ToolKind::Mrc2tif))
		.args(["-j", "-C", contrast])
		.path(mrc)
		.path(wu.file(prefix))
		.run(wu.log_path(step))
}


/// Encodes the `<prefix>.NNN.jpg` frames into an h264 movie.
pub fn jpegs_to_movie(config: &Config, wu: &WorkUnit, prefix: &str, framerate: u32, movie: &Path, step: &str) -> Result<()> {
	let pattern = wu.file(format!("{}.%0{}d.jpg", prefix, frame_width(wu, prefix)));
	Cmd::new(config.tool(ToolKind::Ffmpeg))
		.args(["-y", "-f", "image2", "-framerate"])
		.arg(framerate.to_string())
		.arg("-i")
		.path(pattern)
		.args(["-vcodec", "libx264", "-pix_fmt", "yuv420p", "-s", "1024,1024"])
		.path(movie)
		.run(wu.log_path(step))
}


/// Removes intermediate files in the working folder whose names match.
pub fn remove_matching(wu: &WorkUnit, matches: impl Fn(&str) -> bool) -> Result<usize> {
	let dir = wu.working_dir();
	let mut count = 0;
	let entries = fs::read_dir(dir)
		.context(format!("Failed to read working folder: {}", dir.to_string_lossy()))?;
	for entry in entries {
		let path = entry
			.context(format!("Failed to read working folder: {}", dir.to_string_lossy()))?
			.path();
		let name = path.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		if path.is_file() && matches(&name) {
			fs::remove_file(&path)
				.context(format!("Failed to remove: {}", path.to_string_lossy()))?;
			count += 1;
		}
	}
	debug!("removed {} intermediate file(s)", count);
	Ok(count)
}


/// Builds the neuroglancer precomputed pyramid for the first candidate volume that exists,
/// zips it, and describes it with the volume's display range.
pub fn gen_pyramid(config: &Config, wu: &WorkUnit, candidates: &[PathBuf]) -> Result<Asset> {

	let input = candidates.iter()
		.find(|path| path.is_file())
		.ok_or_else(|| PipelineError::validation(format!("no volume to build a pyramid from in {}", wu.working_dir().to_string_lossy())))?;

	let nifti = wu.with_ext("nii");
	Cmd::new(config.tool(ToolKind::Mrc2nifti))
		.path(input)
		.path(&nifti)
		.run(wu.log_path("mrc2nifti"))?;

	let pyramid_dir = wu.file(format!("neuro-{}", wu.base()));
	if pyramid_dir.exists() {
		fs::remove_dir_all(&pyramid_dir)
			.context(format!("Failed to clear old pyramid: {}", pyramid_dir.to_string_lossy()))?;
	}
	Cmd::new(config.tool(ToolKind::Pyramid))
		.args(["--downscaling-method=average", "--flat", "--no-gzip"])
		.path(&nifti)
		.path(&pyramid_dir)
		.run(wu.log_path("volume_to_precomputed_pyramid"))?;

	let archive = wu.with_ext("zip");
	zip_dir(&pyramid_dir, &archive)?;

	let min_max = wu.file(format!("{}_min_max.json", wu.base()));
	Cmd::new(config.tool(ToolKind::MrcVisualMinMax))
		.path(&nifti)
		.args(["--mad", "5", "--output-json"])
		.path(&min_max)
		.run(wu.log_path("mrc_visual_min_max"))?;
	let metadata = read_min_max(&min_max)?;

	let promoted = wu.promote(&archive)?;
	wu.make_asset(AssetType::NeuroglancerPrecomputed, promoted, Some(metadata))
}


/// Stores (no compression) every file under `dir`, with paths relative to `dir`.
pub fn zip_dir(dir: &Path, archive: &Path) -> Result<()> {

	let file = File::create(archive)
		.context(format!("Failed to create archive: {}", archive.to_string_lossy()))?;
	let mut zip = ZipWriter::new(BufWriter::new(file));
	let options = SimpleFileOptions::default()
		.compression_method(CompressionMethod::Stored)
		.large_file(true);

	for entry in WalkDir::new(dir).sort_by_file_name() {
		let entry = entry
			.context(format!("Failed to walk folder: {}", dir.to_string_lossy()))?;
		let rel = entry.path().strip_prefix(dir)
			.context("walked outside of the pyramid folder")?;
		if rel.as_os_str().is_empty() {
			continue;
		}
		let name = rel.to_string_lossy().replace('\\', "/");
		if entry.file_type().is_dir() {
			zip.add_directory(name, options)
				.context("Failed to add folder to archive")?;
		} else {
			zip.start_file(name, options)
				.context("Failed to add file to archive")?;
			let mut src = File::open(entry.path())
				.context(format!("Failed to open: {}", entry.path().to_string_lossy()))?;
			io::copy(&mut src, &mut zip)
				.context(format!("Failed to archive: {}", entry.path().to_string_lossy()))?;
		}
	}

	zip.finish()
		.context(format!("Failed to finish archive: {}", archive.to_string_lossy()))?;
	Ok(())
}


/// The min/max tool's JSON, as the viewer metadata for a pyramid.
pub fn read_min_max(path: &Path) -> Result<Map<String,Value>> {

	let text = fs::read_to_string(path)
		.map_err(|_| PipelineError::output_missing(path))?;
	match serde_json::from_str::<Value>(&text) {
		Ok(Value::Object(map)) => Ok(map),
		Ok(_) => Err(PipelineError::validation(format!("min/max output is not an object: {}", path.to_string_lossy()))),
		Err(e) => Err(e).context(format!("Failed to parse min/max output: {}", path.to_string_lossy()))
	}
}


/// The second of two stages that hand a value along: reads what the first one stored.
pub fn upstream<T: Copy>(cell: &std::sync::OnceLock<T>, what: &str) -> Result<T> {
	cell.get()
		.copied()
		.ok_or_else(|| anyhow::anyhow!("{} was not computed by an earlier stage", what))
}
