use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;

use anyhow::{Context, Result};
use toml::{Table, Value};

use crate::error::PipelineError;
use crate::share::FileShare;


/// Deployment tier, read from HEDWIG_ENV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedwigEnv {
	Dev,
	Qa,
	Prod
}

impl FromStr for HedwigEnv {

	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"dev" => Ok(Self::Dev),
			"qa" => Ok(Self::Qa),
			"prod" => Ok(Self::Prod),
			_ => Err(PipelineError::configuration(format!("HEDWIG_ENV must be one of dev, qa, prod, not: {}", s)))
		}
	}
}

impl fmt::Display for HedwigEnv {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Dev => "dev",
			Self::Qa => "qa",
			Self::Prod => "prod"
		})
	}
}


/// The external programs the workflows call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolKind {
	Batchruntomo,
	Header,
	Newstack,
	Mrc2tif,
	Clip,
	Binvol,
	Dm2mrc,
	Tif2mrc,
	Xfalign,
	Xftoxg,
	Convert,
	Ffmpeg,
	Bioformats2raw,
	Mrc2nifti,
	Pyramid,
	MrcVisualMinMax,
	ZarrRechunk,
	ZarrExtract2d,
	ZarrNgMetadata,
	FileToUint8
}

impl ToolKind {

	pub const ALL: [ToolKind; 20] = [
		Self::Batchruntomo,
		Self::Header,
		Self::Newstack,
		Self::Mrc2tif,
		Self::Clip,
		Self::Binvol,
		Self::Dm2mrc,
		Self::Tif2mrc,
		Self::Xfalign,
		Self::Xftoxg,
		Self::Convert,
		Self::Ffmpeg,
		Self::Bioformats2raw,
		Self::Mrc2nifti,
		Self::Pyramid,
		Self::MrcVisualMinMax,
		Self::ZarrRechunk,
		Self::ZarrExtract2d,
		Self::ZarrNgMetadata,
		Self::FileToUint8
	];

	/// name used in the [tools] table of the config file
	pub fn key(&self) -> &'static str {
		match self {
			Self::Batchruntomo => "brt",
			Self::Header => "header",
			Self::Newstack => "newstack",
			Self::Mrc2tif => "mrc2tif",
			Self::Clip => "clip",
			Self::Binvol => "binvol",
			Self::Dm2mrc => "dm2mrc",
			Self::Tif2mrc => "tif2mrc",
			Self::Xfalign => "xfalign",
			Self::Xftoxg => "xftoxg",
			Self::Convert => "convert",
			Self::Ffmpeg => "ffmpeg",
			Self::Bioformats2raw => "bioformats2raw",
			Self::Mrc2nifti => "mrc2nifti",
			Self::Pyramid => "pyramid",
			Self::MrcVisualMinMax => "mrc_visual_min_max",
			Self::ZarrRechunk => "zarr_rechunk",
			Self::ZarrExtract2d => "zarr_extract_2d",
			Self::ZarrNgMetadata => "zarr_ng_metadata",
			Self::FileToUint8 => "file_to_uint8"
		}
	}

	pub fn env_var(&self) -> String {
		format!("{}_LOC", self.key().to_uppercase())
	}

	fn default_command(&self) -> &'static str {
		match self {
			Self::Batchruntomo => "batchruntomo",
			Self::Convert => "gm convert",
			Self::Pyramid => "volume-to-precomputed-pyramid",
			_ => self.key()
		}
	}
}


/// An external program, possibly with leading fixed arguments (eg `gm convert`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
	argv: Vec<String>
}

impl Tool {

	pub fn new(command: impl AsRef<str>) -> Result<Self> {
		let command = command.as_ref();
		let argv = command.split_whitespace()
			.map(|s| s.to_string())
			.collect::<Vec<_>>();
		if argv.is_empty() {
			return Err(PipelineError::configuration("tool command is empty"));
		}
		Ok(Self {
			argv
		})
	}

	pub fn argv(&self) -> &[String] {
		&self.argv
	}
}

impl fmt::Display for Tool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.argv.join(" "))
	}
}


#[derive(Debug, Clone)]
pub struct Config {
	pub env: HedwigEnv,
	pub scratch_dir: PathBuf,
	pub workers: usize,
	pub bioformats_workers: usize,
	pub template_dir: Option<PathBuf>,
	mounts: BTreeMap<FileShare,PathBuf>,
	tools: BTreeMap<ToolKind,Tool>
}

impl Config {

	/// Reads the process environment, optionally layered over a TOML config file.
	pub fn from_env(file: Option<&Path>) -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok(), file)
	}

	/// Builds the config from defaults, then the optional file, then `lookup`.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, file: Option<&Path>) -> Result<Self> {

		let env = lookup("HEDWIG_ENV")
			.ok_or_else(|| PipelineError::configuration("HEDWIG_ENV is not set"))?
			.parse::<HedwigEnv>()?;

		let cpus = thread::available_parallelism()
			.map(|n| n.get())
			.ok();

		let mut scratch_dir = None;
		let mut workers = cpus.unwrap_or(1);
		let mut template_dir = None;
		let mut mounts = FileShare::all()
			.into_iter()
			.map(|share| (share, share.default_mount()))
			.collect::<BTreeMap<_,_>>();
		let mut tools = ToolKind::ALL
			.into_iter()
			.map(|kind| Ok((kind, Tool::new(kind.default_command())?)))
			.collect::<Result<BTreeMap<_,_>>>()?;

		// apply the config file, if any
		if let Some(path) = file {
			let file = ConfigFile::read(path)?;
			if let Some(dir) = file.scratch_dir {
				scratch_dir = Some(dir);
			}
			if let Some(n) = file.workers {
				workers = n;
			}
			if let Some(dir) = file.template_dir {
				template_dir = Some(dir);
			}
			mounts.extend(file.mounts);
			tools.extend(file.tools);
		}

		// then the environment wins over everything
		if let Some(dir) = lookup("EM_SCRATCH_DIR") {
			scratch_dir = Some(PathBuf::from(dir));
		}
		if let Some(n) = lookup("EM_WORKERS") {
			workers = parse_workers(&n)
				.context("Failed to read EM_WORKERS")?;
		}
		if let Some(dir) = lookup("EM_TEMPLATE_DIR") {
			template_dir = Some(PathBuf::from(dir));
		}
		for share in FileShare::all() {
			if let Some(mount) = lookup(&share.env_var()) {
				mounts.insert(share, PathBuf::from(mount));
			}
		}
		for kind in ToolKind::ALL {
			if let Some(command) = lookup(&kind.env_var()) {
				let tool = Tool::new(&command)
					.context(format!("Failed to read {}", kind.env_var()))?;
				tools.insert(kind, tool);
			}
		}

		// the scratch default depends on who we're running as
		let scratch_dir = match scratch_dir {
			Some(dir) => dir,
			None => {
				let user = lookup("USER")
					.ok_or_else(|| PipelineError::configuration("Neither EM_SCRATCH_DIR nor USER is set, can't pick a scratch folder"))?;
				PathBuf::from(format!("/gs1/Scratch/{}_scratch", user))
			}
		};

		Ok(Self {
			env,
			scratch_dir,
			workers,
			bioformats_workers: bioformats_workers(cpus),
			template_dir,
			mounts,
			tools
		})
	}

	pub fn mount(&self, share: FileShare) -> PathBuf {
		self.mounts.get(&share)
			.cloned()
			.unwrap_or_else(|| share.default_mount())
	}

	pub fn tool(&self, kind: ToolKind) -> &Tool {
		// every kind gets a default at construction time
		&self.tools[&kind]
	}
}


/// bioformats2raw stops getting faster at around 20 workers
fn bioformats_workers(cpus: Option<usize>) -> usize {
	match cpus {
		Some(n) => n.saturating_sub(2).clamp(1, 20),
		None => 1
	}
}


fn parse_workers(s: &str) -> Result<usize> {
	let n = s.trim().parse::<usize>()
		.map_err(|_| PipelineError::configuration(format!("worker count is not a number: {}", s)))?;
	if n == 0 {
		return Err(PipelineError::configuration("worker count must be at least 1"));
	}
	Ok(n)
}


/// The optional TOML config file. Every key is optional.
///
/// ```toml
/// scratch_dir = "/scratch/em"
/// workers = 8
/// template_dir = "/opt/em/templates"
///
/// [mounts]
/// RMLEMHedwigDev = "/mnt/hedwig-dev"
///
/// [tools]
/// convert = "gm convert"
/// brt = "/opt/imod/bin/batchruntomo"
/// ```
#[derive(Debug, Default)]
struct ConfigFile {
	scratch_dir: Option<PathBuf>,
	workers: Option<usize>,
	template_dir: Option<PathBuf>,
	mounts: BTreeMap<FileShare,PathBuf>,
	tools: BTreeMap<ToolKind,Tool>
}

impl ConfigFile {

	fn read(path: &Path) -> Result<Self> {

		let toml = fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file at: {}", path.to_string_lossy()))?
			.parse::<Table>()
			.with_context(|| format!("Failed to parse config file at: {}", path.to_string_lossy()))?;

		let mut file = ConfigFile::default();

		if let Some(value) = toml.get("scratch_dir") {
			file.scratch_dir = Some(PathBuf::from(value_str(value, "scratch_dir")?));
		}

		if let Some(value) = toml.get("workers") {
			let n = value.as_integer()
				.context("workers was not an integer")?;
			file.workers = Some(parse_workers(&n.to_string())?);
		}

		if let Some(value) = toml.get("template_dir") {
			file.template_dir = Some(PathBuf::from(value_str(value, "template_dir")?));
		}

		if let Some(value) = toml.get("mounts") {
			let table = value.as_table()
				.context("mounts key is not a table")?;
			for (name, mount) in table {
				let share = name.parse::<FileShare>()
					.context(format!("Unknown share in [mounts]: {}", name))?;
				let mount = value_str(mount, &format!("mounts.{}", name))?;
				file.mounts.insert(share, PathBuf::from(mount));
			}
		}

		if let Some(value) = toml.get("tools") {
			let table = value.as_table()
				.context("tools key is not a table")?;
			for (name, command) in table {
				let kind = ToolKind::ALL
					.into_iter()
					.find(|kind| kind.key() == name)
					.ok_or_else(|| PipelineError::configuration(format!("Unknown tool in [tools]: {}", name)))?;
				let command = value_str(command, &format!("tools.{}", name))?;
				let tool = Tool::new(command)
					.context(format!("Failed to read tools.{}", name))?;
				file.tools.insert(kind, tool);
			}
		}

		Ok(file)
	}
}


fn value_str<'v>(value: &'v Value, key: &str) -> Result<&'v str> {
	value.as_str()
		.context(format!("{} was not a string", key))
}


#[cfg(test)]
mod test {

	use galvanic_assert::{assert_that, matchers::*};

	use super::*;


	#[test]
	fn tool_env_vars() {
		assert_that!(&ToolKind::Batchruntomo.env_var(), eq("BRT_LOC".to_string()));
		assert_that!(&ToolKind::MrcVisualMinMax.env_var(), eq("MRC_VISUAL_MIN_MAX_LOC".to_string()));
		assert_that!(&ToolKind::Pyramid.env_var(), eq("PYRAMID_LOC".to_string()));
	}

	#[test]
	fn bioformats_worker_heuristic() {
		assert_that!(&bioformats_workers(None), eq(1));
		assert_that!(&bioformats_workers(Some(1)), eq(1));
		assert_that!(&bioformats_workers(Some(8)), eq(6));
		assert_that!(&bioformats_workers(Some(64)), eq(20));
	}

	#[test]
	fn multi_word_tool() {
		let tool = Tool::new("gm  convert").unwrap();
		assert_that!(&tool.argv().to_vec(), eq(vec!["gm".to_string(), "convert".to_string()]));
		assert_that!(&Tool::new("  ").is_err(), eq(true));
	}
}
