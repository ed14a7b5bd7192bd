use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_fs::TempDir;
use indoc::indoc;

use em_workflows::config::{Config, ToolKind};
use em_workflows::executor::JobParams;


pub const SHARE: &str = "RMLEMHedwigDev";
pub const INPUT_DIR: &str = "lab/inputs";


/// writes every trailing output path a tool was given
const TOUCH_LAST: &str = indoc! { r#"
	for last; do :; done
	touch "$last"
"# };

const MRC2TIF: &str = indoc! { r#"
	for last; do :; done
	case "$last" in
		*.jpg|*.jpeg) touch "$last" ;;
		*) for i in 000 001 002 003 004 005 006 007 008 009; do touch "$last.$i.jpg"; done ;;
	esac
"# };

const BATCHRUNTOMO: &str = indoc! { r#"
	base="${2%.adoc}"
	touch "${base}_rec.mrc" "${base}_ali.mrc"
"# };

const PYRAMID: &str = indoc! { r#"
	for last; do :; done
	mkdir -p "$last/1_1_1"
	echo '{"type":"image"}' > "$last/info"
	echo chunk > "$last/1_1_1/0-64_0-64_0-9"
"# };

const MIN_MAX: &str = indoc! { r#"
	for last; do :; done
	echo '{"neuroglancerPrecomputedMin": 1.5, "neuroglancerPrecomputedMax": 200.2, "neuroglancerPrecomputedFloor": -3.7, "neuroglancerPrecomputedLimit": 254.1}' > "$last"
"# };

const BIOFORMATS2RAW: &str = indoc! { r#"
	for last; do :; done
	mkdir -p "$last/0/0" "$last/1/0" "$last/2/0" "$last/OME"
	cat > "$last/OME/METADATA.ome.xml" <<'XML'
	<?xml version="1.0" encoding="UTF-8"?>
	<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
		<Image ID="Image:0"><Pixels ID="Pixels:0"/></Image>
		<Image ID="Image:1" Name="label image"><Pixels ID="Pixels:1"/></Image>
		<Image ID="Image:2" Name="macro image"><Pixels ID="Pixels:2"/></Image>
	</OME>
	XML
"# };

const NG_METADATA: &str = indoc! { r#"
	echo '{"shader": "RGB", "shaderParameters": {"range": [0, 255]}}' > "$4"
"# };


/// A mount with Projects and Assets folders, a scratch folder, and fake tools.
pub struct Sandbox {
	dir: TempDir
}

impl Sandbox {

	pub fn new() -> Self {
		let sandbox = Self {
			dir: TempDir::new()
				.expect("Failed to make temp folder")
		};
		for dir in [sandbox.input_dir(), sandbox.mount().join("Assets"), sandbox.scratch(), sandbox.bin()] {
			fs::create_dir_all(&dir)
				.expect(&format!("Failed to create dir: {}", dir.to_string_lossy()));
		}
		sandbox
	}

	/// a sandbox where every tool is faked
	pub fn with_tools() -> Self {
		let sandbox = Self::new();
		for kind in ToolKind::ALL {
			sandbox.tool(kind, TOUCH_LAST);
		}
		sandbox.tool(ToolKind::Mrc2tif, MRC2TIF);
		sandbox.tool(ToolKind::Batchruntomo, BATCHRUNTOMO);
		sandbox.tool(ToolKind::Pyramid, PYRAMID);
		sandbox.tool(ToolKind::MrcVisualMinMax, MIN_MAX);
		sandbox.tool(ToolKind::Bioformats2raw, BIOFORMATS2RAW);
		sandbox.tool(ToolKind::ZarrRechunk, "true\n");
		sandbox.tool(ToolKind::ZarrNgMetadata, NG_METADATA);
		sandbox.header_dims(512, 512, 9);
		sandbox
	}

	pub fn root(&self) -> &Path {
		self.dir.path()
	}

	pub fn mount(&self) -> PathBuf {
		self.root().join("mount")
	}

	pub fn input_dir(&self) -> PathBuf {
		self.mount().join("Projects").join(INPUT_DIR)
	}

	pub fn assets_root(&self) -> PathBuf {
		self.mount().join("Assets")
	}

	/// where outputs for `base` get promoted
	pub fn assets_dir(&self, base: &str) -> PathBuf {
		self.mount().join("Assets").join(INPUT_DIR).join(base)
	}

	pub fn scratch(&self) -> PathBuf {
		self.root().join("scratch")
	}

	fn bin(&self) -> PathBuf {
		self.root().join("bin")
	}

	/// Replaces a tool with a shell script.
	pub fn tool(&self, kind: ToolKind, script: &str) {
		let path = self.bin().join(kind.key());
		fs::write(&path, format!("#!/bin/sh\n{}", script))
			.expect(&format!("Failed to write tool: {}", path.to_string_lossy()));
		fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
			.expect(&format!("Failed to chmod tool: {}", path.to_string_lossy()));
	}

	/// the size `header -s` reports for every volume
	pub fn header_dims(&self, x: u64, y: u64, z: u64) {
		self.tool(ToolKind::Header, &format!("echo \" {} {} {}\"\n", x, y, z));
	}

	pub fn write_input(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> PathBuf {
		let path = self.input_dir().join(name);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.expect(&format!("Failed to create dir: {}", parent.to_string_lossy()));
		}
		fs::write(&path, content)
			.expect(&format!("Failed to write input: {}", path.to_string_lossy()));
		path
	}

	pub fn env(&self) -> HashMap<String,String> {
		let mut env = HashMap::from([
			("HEDWIG_ENV".to_string(), "dev".to_string()),
			("EM_SCRATCH_DIR".to_string(), self.scratch().to_string_lossy().to_string()),
			("EM_WORKERS".to_string(), "2".to_string()),
			(format!("NFS_MOUNT_{}", SHARE), self.mount().to_string_lossy().to_string())
		]);
		for kind in ToolKind::ALL {
			let path = self.bin().join(kind.key());
			if path.exists() {
				env.insert(kind.env_var(), path.to_string_lossy().to_string());
			}
		}
		env
	}

	pub fn config(&self) -> Config {
		let env = self.env();
		Config::from_lookup(|key| env.get(key).cloned(), None)
			.expect("Failed to make config")
	}

	pub fn params(&self) -> JobParams {
		JobParams {
			file_share: SHARE.to_string(),
			input_dir: INPUT_DIR.to_string(),
			no_api: true,
			.. JobParams::default()
		}
	}

	/// the working folder kept for `base`, there should be just one
	pub fn working_dir(&self, base: &str) -> PathBuf {
		let prefix = format!("{}_", base);
		let matches = self.scratch_entries()
			.into_iter()
			.filter(|name| name.starts_with(&prefix))
			.collect::<Vec<_>>();
		assert_eq!(matches.len(), 1, "working folders for {}: {:?}", base, matches);
		self.scratch().join(&matches[0])
	}

	/// names in the scratch folder, working folders included
	pub fn scratch_entries(&self) -> Vec<String> {
		let mut names = fs::read_dir(self.scratch())
			.expect("Failed to read scratch")
			.map(|entry| entry.expect("Failed to read scratch entry").file_name().to_string_lossy().to_string())
			.collect::<Vec<_>>();
		names.sort();
		names
	}
}
