use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;

use crate::config::Config;
use crate::error::PipelineError;


/// The named network mounts a job can read from and write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileShare {
	RmlEmHedwigDev,
	RmlEmHedwigQa,
	RmlEmHedwigProd,
	RmlSoHedwigDev,
	RmlSoHedwigQa,
	RmlSoHedwigProd
}

impl FileShare {

	pub fn all() -> [FileShare; 6] {
		[
			Self::RmlEmHedwigDev,
			Self::RmlEmHedwigQa,
			Self::RmlEmHedwigProd,
			Self::RmlSoHedwigDev,
			Self::RmlSoHedwigQa,
			Self::RmlSoHedwigProd
		]
	}

	pub fn name(&self) -> &'static str {
		match self {
			Self::RmlEmHedwigDev => "RMLEMHedwigDev",
			Self::RmlEmHedwigQa => "RMLEMHedwigQA",
			Self::RmlEmHedwigProd => "RMLEMHedwigProd",
			Self::RmlSoHedwigDev => "RMLSOHedwigDev",
			Self::RmlSoHedwigQa => "RMLSOHedwigQA",
			Self::RmlSoHedwigProd => "RMLSOHedwigProd"
		}
	}

	pub fn default_mount(&self) -> PathBuf {
		PathBuf::from("/mnt/ai-fas12").join(self.name())
	}

	/// environment variable that overrides the mount point
	pub fn env_var(&self) -> String {
		format!("NFS_MOUNT_{}", self.name())
	}
}

impl fmt::Display for FileShare {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for FileShare {

	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::all()
			.into_iter()
			.find(|share| share.name() == s)
			.ok_or_else(|| PipelineError::configuration(format!("UnknownShare: {} is not a valid file share name", s)))
	}
}


/// A share whose mount point exists on this host.
#[derive(Debug, Clone)]
pub struct MountedShare {
	pub share: FileShare,
	pub root: PathBuf
}

impl MountedShare {

	pub fn projects_root(&self) -> PathBuf {
		self.root.join("Projects")
	}

	pub fn assets_root(&self) -> PathBuf {
		self.root.join("Assets")
	}
}


pub fn resolve_mount(config: &Config, share_name: &str) -> Result<MountedShare> {

	let share = share_name.parse::<FileShare>()?;
	let root = config.mount(share);
	if !root.is_dir() {
		return Err(PipelineError::configuration(format!("MountUnavailable: mount point for {} doesn't exist: {}", share, root.to_string_lossy())));
	}

	Ok(MountedShare {
		share,
		root
	})
}


/// Rewrites the first `/Projects/` segment of the path to `/Assets/`.
pub fn projects_to_assets(path: impl AsRef<Path>) -> Result<PathBuf> {

	let path = path.as_ref();
	let mut s = path.to_string_lossy().to_string();

	// a bare projects root has no trailing slash, but still counts
	let had_slash = s.ends_with('/');
	if !had_slash {
		s.push('/');
	}

	if !s.contains("/Projects/") {
		return Err(PipelineError::configuration(format!("path is not under a Projects folder: {}", path.to_string_lossy())));
	}
	let mut rewritten = s.replacen("/Projects/", "/Assets/", 1);

	if !had_slash {
		rewritten.pop();
	}
	Ok(PathBuf::from(rewritten))
}
