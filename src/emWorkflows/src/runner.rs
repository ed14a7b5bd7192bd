use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Tool;
use crate::error::PipelineError;


/// Runs one external program to completion without a shell.
///
/// Stdout and stderr both land in `log_path` (opened for append), after a first line naming the command.
/// Environment composition:
///  * `env = None`, `copy_env = true`: the child inherits our environment
///  * `env = Some`, `copy_env = true`: our environment, overlaid with `env`
///  * `env = Some`, `copy_env = false`: exactly `env`
///  * `env = None`, `copy_env = false`: an empty environment
///
/// Returns the exit code, which is always 0: any other exit is an `ExternalToolFailure`.
pub fn run(argv: &[String], log_path: &Path, env: Option<&[(String,String)]>, copy_env: bool) -> Result<i32> {
	let mut log = open_log(argv, log_path)?;
	let stdout = log.try_clone()
		.context(format!("Failed to share log file: {}", log_path.to_string_lossy()))?;
	spawn(argv, log_path, &mut log, env, copy_env, None, Stdio::from(stdout))
		.map(|_| 0)
}


fn open_log(argv: &[String], log_path: &Path) -> Result<File> {

	if argv.is_empty() {
		return Err(PipelineError::configuration("can't run an empty command"));
	}

	let mut log = OpenOptions::new()
		.create(true)
		.append(true)
		.open(log_path)
		.context(format!("Failed to open log file: {}", log_path.to_string_lossy()))?;

	let line = argv.join(" ");
	debug!("Running subprocess: {}", line);
	writeln!(log, "Running subprocess: {}", line)
		.context(format!("Failed to write log file: {}", log_path.to_string_lossy()))?;

	Ok(log)
}


fn spawn(
	argv: &[String],
	log_path: &Path,
	log: &mut File,
	env: Option<&[(String,String)]>,
	copy_env: bool,
	cwd: Option<&Path>,
	stdout: Stdio
) -> Result<std::process::Child> {

	let stderr = log.try_clone()
		.context(format!("Failed to share log file: {}", log_path.to_string_lossy()))?;

	let mut cmd = Command::new(&argv[0]);
	cmd.args(&argv[1..])
		.stdin(Stdio::null())
		.stdout(stdout)
		.stderr(Stdio::from(stderr));
	if !copy_env {
		cmd.env_clear();
	}
	if let Some(env) = env {
		cmd.envs(env.iter().map(|(k, v)| (k, v)));
	}
	if let Some(cwd) = cwd {
		cmd.current_dir(cwd);
	}

	let mut child = match cmd.spawn() {
		Ok(child) => child,
		Err(e) => {
			// leave a trace in the log too, it's the first place anyone looks
			writeln!(log, "Failed to start {}: {}", argv[0], e).ok();
			return Err(PipelineError::ExternalToolFailure {
				argv: argv.to_vec(),
				exit_code: None,
				log_path: log_path.to_path_buf()
			}).context(format!("Failed to start {}: {}", argv[0], e));
		}
	};

	// only the plain run() path waits here, output() needs to read stdout first
	if child.stdout.is_none() {
		let status = child.wait()
			.context(format!("Failed to wait for {}", argv[0]))?;
		if !status.success() {
			return Err(PipelineError::ExternalToolFailure {
				argv: argv.to_vec(),
				exit_code: status.code(),
				log_path: log_path.to_path_buf()
			}.into());
		}
	}

	Ok(child)
}


/// Builds an argv for one of the configured tools, then runs it through [run].
#[derive(Debug, Clone)]
pub struct Cmd {
	argv: Vec<String>,
	env: Vec<(String,String)>,
	copy_env: bool,
	cwd: Option<PathBuf>
}

impl Cmd {

	pub fn new(tool: &Tool) -> Self {
		Self {
			argv: tool.argv().to_vec(),
			env: Vec::new(),
			copy_env: true,
			cwd: None
		}
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.argv.push(arg.into());
		self
	}

	pub fn args<I,S>(mut self, args: I) -> Self
		where
			I: IntoIterator<Item=S>,
			S: Into<String>
	{
		self.argv.extend(args.into_iter().map(|a| a.into()));
		self
	}

	pub fn path(mut self, path: impl AsRef<Path>) -> Self {
		self.argv.push(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn paths<I,P>(mut self, paths: I) -> Self
		where
			I: IntoIterator<Item=P>,
			P: AsRef<Path>
	{
		for path in paths {
			self = self.path(path);
		}
		self
	}

	pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
		self.env.push((key.as_ref().to_string_lossy().to_string(), value.as_ref().to_string_lossy().to_string()));
		self
	}

	/// start the child with no inherited environment
	pub fn clear_env(mut self) -> Self {
		self.copy_env = false;
		self
	}

	pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
		self.cwd = Some(dir.as_ref().to_path_buf());
		self
	}

	pub fn argv(&self) -> &[String] {
		&self.argv
	}

	fn env_overlay(&self) -> Option<&[(String,String)]> {
		if self.env.is_empty() && self.copy_env {
			None
		} else {
			Some(&self.env)
		}
	}

	pub fn run(&self, log_path: impl AsRef<Path>) -> Result<()> {
		let log_path = log_path.as_ref();
		if self.cwd.is_none() {
			run(&self.argv, log_path, self.env_overlay(), self.copy_env)?;
			return Ok(());
		}
		let mut log = open_log(&self.argv, log_path)?;
		let stdout = log.try_clone()
			.context(format!("Failed to share log file: {}", log_path.to_string_lossy()))?;
		spawn(&self.argv, log_path, &mut log, self.env_overlay(), self.copy_env, self.cwd.as_deref(), Stdio::from(stdout))?;
		Ok(())
	}

	/// Like [Cmd::run], but also returns what the program printed to stdout.
	/// The captured text is copied into the log after the program exits.
	pub fn output(&self, log_path: impl AsRef<Path>) -> Result<String> {

		let log_path = log_path.as_ref();
		let mut log = open_log(&self.argv, log_path)?;
		let child = spawn(&self.argv, log_path, &mut log, self.env_overlay(), self.copy_env, self.cwd.as_deref(), Stdio::piped())?;

		let output = child.wait_with_output()
			.context(format!("Failed to wait for {}", self.argv[0]))?;
		let stdout = String::from_utf8_lossy(&output.stdout).to_string();
		log.write_all(stdout.as_bytes())
			.context(format!("Failed to write log file: {}", log_path.to_string_lossy()))?;

		if !output.status.success() {
			return Err(PipelineError::ExternalToolFailure {
				argv: self.argv.clone(),
				exit_code: output.status.code(),
				log_path: log_path.to_path_buf()
			}.into());
		}

		Ok(stdout)
	}
}
