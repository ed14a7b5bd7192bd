use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::PipelineError;


/// The regular files in `dir` with one of the given extensions (case sensitive).
///
/// With `single`, only that file is considered, and it must exist.
pub fn list_files(dir: impl AsRef<Path>, extensions: &[&str], single: Option<&str>) -> Result<Vec<PathBuf>> {

	let dir = dir.as_ref();

	if let Some(name) = single {
		let path = dir.join(name);
		if !path.is_file() {
			return Err(PipelineError::no_inputs(format!("{} was not found in {}", name, dir.to_string_lossy())));
		}
		return Ok(vec![path]);
	}

	let mut files = read_dir(dir)?
		.into_iter()
		.filter(|path| path.is_file() && has_extension(path, extensions))
		.collect::<Vec<_>>();
	files.sort();

	if files.is_empty() {
		return Err(PipelineError::no_inputs(format!(
			"no files with extensions [{}] in {}",
			extensions.join(", "),
			dir.to_string_lossy()
		)));
	}

	Ok(files)
}


/// The subfolders of `dir` holding at least one `.tif` frame, each one a tilt series.
pub fn list_dirs(dir: impl AsRef<Path>, single: Option<&str>) -> Result<Vec<PathBuf>> {

	let dir = dir.as_ref();

	let mut dirs = match single {
		Some(name) => vec![dir.join(name)],
		None => read_dir(dir)?
	};
	dirs.retain(|path| path.is_dir());
	dirs.sort();

	let mut stacks = Vec::new();
	for path in dirs {
		if !list_frames(&path)?.is_empty() {
			stacks.push(path);
		}
	}

	if stacks.is_empty() {
		return Err(PipelineError::no_inputs(format!("no folders of .tif frames in {}", dir.to_string_lossy())));
	}

	Ok(stacks)
}


/// The `.tif` frames of a tilt series, in natural order (`frame2` before `frame10`).
pub fn list_frames(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
	let mut frames = read_dir(dir.as_ref())?
		.into_iter()
		.filter(|path| path.is_file() && has_extension(path, &["tif"]))
		.collect::<Vec<_>>();
	frames.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
	Ok(frames)
}


fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
	let entries = fs::read_dir(dir)
		.map_err(|e| PipelineError::no_inputs(format!("can't read input folder {}: {}", dir.to_string_lossy(), e)))?;
	let mut paths = Vec::new();
	for entry in entries {
		let entry = entry
			.context(format!("Failed to read folder: {}", dir.to_string_lossy()))?;
		paths.push(entry.path());
	}
	Ok(paths)
}


fn has_extension(path: &Path, extensions: &[&str]) -> bool {
	path.extension()
		.map(|ext| extensions.iter().any(|e| ext == *e))
		.unwrap_or(false)
}


/// Compares runs of digits by value and everything else by character.
fn natural_cmp(a: &str, b: &str) -> Ordering {

	let mut a = a.chars().peekable();
	let mut b = b.chars().peekable();

	loop {
		match (a.peek().copied(), b.peek().copied()) {
			(None, None) => return Ordering::Equal,
			(None, Some(_)) => return Ordering::Less,
			(Some(_), None) => return Ordering::Greater,
			(Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
				let na = take_number(&mut a);
				let nb = take_number(&mut b);
				// compare without parsing, so long runs can't overflow
				let na_trim = na.trim_start_matches('0');
				let nb_trim = nb.trim_start_matches('0');
				let ord = na_trim.len().cmp(&nb_trim.len())
					.then_with(|| na_trim.cmp(nb_trim));
				if ord != Ordering::Equal {
					return ord;
				}
			}
			(Some(ca), Some(cb)) => {
				if ca != cb {
					return ca.cmp(&cb);
				}
				a.next();
				b.next();
			}
		}
	}
}


fn take_number(chars: &mut std::iter::Peekable<std::str::Chars>) -> String {
	let mut s = String::new();
	while let Some(c) = chars.peek().copied() {
		if !c.is_ascii_digit() {
			break;
		}
		s.push(c);
		chars.next();
	}
	s
}


/// One unit of work for the tomography workflow: either a single stack,
/// or a dual-axis pair whose members share a name apart from a trailing `a`/`b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
	/// the canonical input path, for a pair this is the shared name and need not exist
	pub path: PathBuf,
	/// the files that actually get staged
	pub members: Vec<PathBuf>
}

impl Source {

	pub fn single(path: PathBuf) -> Self {
		Self {
			members: vec![path.clone()],
			path
		}
	}

	pub fn is_pair(&self) -> bool {
		self.members.len() == 2
	}
}


/// Groups `Xa.ext`/`Xb.ext` (or `XA`/`XB`) into one source named `X.ext`. Everything else stays single.
pub fn pair_inputs(files: Vec<PathBuf>) -> Vec<Source> {

	let mut sources = Vec::<Source>::new();
	let mut used = vec![false; files.len()];

	for (i, path) in files.iter().enumerate() {
		if used[i] {
			continue;
		}
		let Some((prefix, suffix, ext)) = split_axis(path)
			else { continue; };
		let partner_suffix = match suffix {
			'a' => 'b',
			'A' => 'B',
			_ => continue
		};
		let partner = files.iter()
			.enumerate()
			.find(|(j, other)| {
				!used[*j] && split_axis(other)
					.is_some_and(|(p, s, e)| p == prefix && s == partner_suffix && e == ext && other.parent() == path.parent())
			})
			.map(|(j, _)| j);
		if let Some(j) = partner {
			used[i] = true;
			used[j] = true;
			let name = match &ext {
				Some(ext) => format!("{}.{}", prefix, ext),
				None => prefix.clone()
			};
			sources.push(Source {
				path: path.with_file_name(name),
				members: vec![path.clone(), files[j].clone()]
			});
		}
	}

	for (i, path) in files.into_iter().enumerate() {
		if !used[i] {
			sources.push(Source::single(path));
		}
	}

	sources.sort_by(|a, b| a.path.cmp(&b.path));
	sources
}


/// `sampleA.mrc` -> (`sample`, `A`, `mrc`)
fn split_axis(path: &Path) -> Option<(String, char, Option<String>)> {
	let stem = path.file_stem()?.to_string_lossy().to_string();
	let suffix = stem.chars().last()?;
	let prefix = stem[.. stem.len() - suffix.len_utf8()].to_string();
	if prefix.is_empty() {
		return None;
	}
	let ext = path.extension()
		.map(|e| e.to_string_lossy().to_string());
	Some((prefix, suffix, ext))
}
