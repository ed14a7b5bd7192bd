use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::assets::{Asset, AssetType, CallbackRecord};
use crate::config::Config;
use crate::error::PipelineError;
use crate::share::{projects_to_assets, MountedShare};


/// Everything that belongs to one input while its pipeline runs:
/// where the input is, a private scratch folder, and the durable folder outputs get promoted into.
#[derive(Debug)]
pub struct WorkUnit {
	share: MountedShare,
	input_root: PathBuf,
	source_path: PathBuf,
	base: String,
	working_dir: PathBuf,
	assets_dir: PathBuf,
	pub record: CallbackRecord
}

impl WorkUnit {

	pub fn new(config: &Config, share: &MountedShare, input_root: impl AsRef<Path>, source_path: impl AsRef<Path>) -> Result<Self> {

		let input_root = input_root.as_ref().to_path_buf();
		let source_path = source_path.as_ref().to_path_buf();

		let base = source_path.file_stem()
			.context(format!("Input has no file name: {}", source_path.to_string_lossy()))?
			.to_string_lossy()
			.to_string();

		// the record names the input relative to the projects root
		let primary_file_path = source_path.strip_prefix(share.projects_root())
			.map_err(|_| PipelineError::configuration(format!(
				"Input {} is not under the projects root {}",
				source_path.to_string_lossy(),
				share.projects_root().to_string_lossy()
			)))?
			.to_string_lossy()
			.to_string();

		let assets_dir = projects_to_assets(&input_root)?
			.join(&base);
		fs::create_dir_all(&assets_dir)
			.context(format!("Failed to create assets folder: {}", assets_dir.to_string_lossy()))?;

		let working_dir = make_working_dir(&config.scratch_dir, &base)?;
		debug!("{}: working in {}", base, working_dir.to_string_lossy());

		Ok(Self {
			share: share.clone(),
			input_root,
			source_path,
			record: CallbackRecord::new(primary_file_path, base.clone()),
			base,
			working_dir,
			assets_dir
		})
	}

	pub fn share(&self) -> &MountedShare {
		&self.share
	}

	pub fn input_root(&self) -> &Path {
		&self.input_root
	}

	pub fn source_path(&self) -> &Path {
		&self.source_path
	}

	pub fn base(&self) -> &str {
		&self.base
	}

	pub fn working_dir(&self) -> &Path {
		&self.working_dir
	}

	pub fn assets_dir(&self) -> &Path {
		&self.assets_dir
	}

	/// A path in the working folder.
	/// Give exactly one of `extension` (appended to the base name) or `filename` (used verbatim).
	pub fn derived_path(&self, extension: Option<&str>, filename: Option<&str>) -> Result<PathBuf> {
		match (extension, filename) {
			(Some(ext), None) => Ok(self.working_dir.join(format!("{}.{}", self.base, ext))),
			(None, Some(name)) => Ok(self.working_dir.join(name)),
			_ => Err(PipelineError::validation("derived_path needs exactly one of extension or filename"))
		}
	}

	/// `<working_dir>/<base>.<ext>`
	pub fn with_ext(&self, ext: &str) -> PathBuf {
		self.working_dir.join(format!("{}.{}", self.base, ext))
	}

	/// `<working_dir>/<name>`
	pub fn file(&self, name: impl AsRef<Path>) -> PathBuf {
		self.working_dir.join(name)
	}

	pub fn log_path(&self, step: &str) -> PathBuf {
		self.working_dir.join(format!("{}.log", step))
	}

	/// Copies an input into the working folder, keeping its name.
	pub fn stage_input(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
		let path = path.as_ref();
		let name = path.file_name()
			.context(format!("Input has no file name: {}", path.to_string_lossy()))?;
		self.stage_input_as(path, name)
	}

	/// Copies an input into the working folder as `name`.
	pub fn stage_input_as(&self, path: impl AsRef<Path>, name: impl AsRef<Path>) -> Result<PathBuf> {
		let path = path.as_ref();
		let dest = self.working_dir.join(name);
		fs::copy(path, &dest)
			.context(format!("Failed to copy {} into {}", path.to_string_lossy(), dest.to_string_lossy()))?;
		Ok(dest)
	}

	/// Copies a file or folder from the working folder into the assets folder,
	/// replacing anything already there with the same name.
	pub fn promote(&self, src: impl AsRef<Path>) -> Result<PathBuf> {

		let src = src.as_ref();
		if !src.starts_with(&self.working_dir) {
			return Err(PipelineError::validation(format!("only outputs in the working folder can be promoted: {}", src.to_string_lossy())));
		}
		if !src.exists() {
			return Err(PipelineError::output_missing(src));
		}

		let name = src.file_name()
			.context(format!("Nothing to promote at: {}", src.to_string_lossy()))?;
		let dest = self.assets_dir.join(name);
		remove_any(&dest)?;

		if src.is_dir() {
			copy_tree(src, &dest)?;
		} else {
			fs::copy(src, &dest)
				.context(format!("Failed to promote {} to {}", src.to_string_lossy(), dest.to_string_lossy()))?;
		}

		debug!("{}: promoted {}", self.base, dest.to_string_lossy());
		Ok(dest)
	}

	/// Describes a promoted output, with its path relative to the share's Assets root.
	pub fn make_asset(&self, kind: AssetType, promoted: impl AsRef<Path>, metadata: Option<Map<String,Value>>) -> Result<Asset> {
		let promoted = promoted.as_ref();
		let path = promoted.strip_prefix(self.share.assets_root())
			.map_err(|_| PipelineError::configuration(format!(
				"Asset {} is not under the assets root {}",
				promoted.to_string_lossy(),
				self.share.assets_root().to_string_lossy()
			)))?
			.to_string_lossy()
			.to_string();
		Ok(Asset {
			kind,
			path,
			metadata
		})
	}

	/// promote, then describe
	pub fn promote_asset(&self, kind: AssetType, src: impl AsRef<Path>) -> Result<Asset> {
		let dest = self.promote(src)?;
		self.make_asset(kind, dest, None)
	}

	/// Snapshots the whole working folder under the assets folder, for debugging.
	pub fn copy_workdir_to_assets(&self) -> Result<PathBuf> {
		let dest = self.assets_dir.join(format!("work_dir_{}", timestamp()?));
		copy_tree(&self.working_dir, &dest)?;
		info!("{}: saved working folder to {}", self.base, dest.to_string_lossy());
		Ok(dest)
	}

	/// Keeps every tool log next to the outputs.
	pub fn copy_logs_to_assets(&self) -> Result<PathBuf> {

		let dest = self.assets_dir.join(format!("logs_{}", timestamp()?));
		fs::create_dir_all(&dest)
			.context(format!("Failed to create log folder: {}", dest.to_string_lossy()))?;

		let entries = fs::read_dir(&self.working_dir)
			.context(format!("Failed to read working folder: {}", self.working_dir.to_string_lossy()))?;
		for entry in entries {
			let path = entry
				.context(format!("Failed to read working folder: {}", self.working_dir.to_string_lossy()))?
				.path();
			if path.is_file() && path.extension().is_some_and(|ext| ext == "log") {
				let Some(name) = path.file_name()
					else { continue; };
				fs::copy(&path, dest.join(name))
					.context(format!("Failed to copy log: {}", path.to_string_lossy()))?;
			}
		}

		Ok(dest)
	}

	pub fn cleanup(&self, keep: bool) -> Result<()> {
		if keep {
			info!("{}: keeping working folder {}", self.base, self.working_dir.to_string_lossy());
			return Ok(());
		}
		fs::remove_dir_all(&self.working_dir)
			.context(format!("Failed to remove working folder: {}", self.working_dir.to_string_lossy()))
	}
}


fn make_working_dir(scratch_dir: &Path, base: &str) -> Result<PathBuf> {

	fs::create_dir_all(scratch_dir)
		.context(format!("Failed to create scratch folder: {}", scratch_dir.to_string_lossy()))?;

	// create_dir fails if someone else got there first, so the folder we get is ours alone
	loop {
		let suffix = (0 .. 8)
			.map(|_| fastrand::alphanumeric())
			.collect::<String>();
		let dir = scratch_dir.join(format!("{}_{}", base, suffix));
		match fs::create_dir(&dir) {
			Ok(()) => return Ok(dir),
			Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
			Err(e) => return Err(e)
				.context(format!("Failed to create working folder: {}", dir.to_string_lossy()))
		}
	}
}


fn timestamp() -> Result<String> {
	OffsetDateTime::now_utc()
		.format(format_description!("[year][month][day]_[hour][minute][second]"))
		.context("Failed to format timestamp")
}


fn remove_any(path: &Path) -> Result<()> {
	match fs::symlink_metadata(path) {
		Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
			.context(format!("Failed to replace folder: {}", path.to_string_lossy())),
		Ok(_) => fs::remove_file(path)
			.context(format!("Failed to replace file: {}", path.to_string_lossy())),
		Err(_) => Ok(())
	}
}


/// Recursive copy of `src` to `dest`, which must not exist yet.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
	for entry in WalkDir::new(src) {
		let entry = entry
			.context(format!("Failed to walk folder: {}", src.to_string_lossy()))?;
		let rel = entry.path().strip_prefix(src)
			.context("walked outside of the source folder")?;
		let target = dest.join(rel);
		if entry.file_type().is_dir() {
			fs::create_dir_all(&target)
				.context(format!("Failed to create folder: {}", target.to_string_lossy()))?;
		} else {
			fs::copy(entry.path(), &target)
				.context(format!("Failed to copy {} to {}", entry.path().to_string_lossy(), target.to_string_lossy()))?;
		}
	}
	Ok(())
}
