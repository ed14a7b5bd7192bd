use std::path::PathBuf;

use thiserror::Error;


/// Failure kinds the pipeline distinguishes.
///
/// These travel inside [anyhow::Error] so context can be layered on top of them.
/// Use [PipelineError::find] to recover the kind from an error chain.
#[derive(Debug, Error)]
pub enum PipelineError {

	#[error("ConfigurationError: {0}")]
	Configuration(String),

	#[error("NoInputs: {0}")]
	NoInputs(String),

	#[error("ExternalToolFailure: `{}` exited with {}, see log: {}",
		.argv.join(" "),
		.exit_code.map(|c| c.to_string()).unwrap_or("a signal".to_string()),
		.log_path.display()
	)]
	ExternalToolFailure {
		argv: Vec<String>,
		exit_code: Option<i32>,
		log_path: PathBuf
	},

	#[error("OutputMissing: expected output was not produced: {}", .path.display())]
	OutputMissing {
		path: PathBuf
	},

	#[error("ValidationError: {0}")]
	Validation(String),

	#[error("CallbackFailure: {url} responded with HTTP status {status}")]
	CallbackFailure {
		url: String,
		status: u16
	}
}

impl PipelineError {

	pub fn configuration(msg: impl Into<String>) -> anyhow::Error {
		Self::Configuration(msg.into()).into()
	}

	pub fn no_inputs(msg: impl Into<String>) -> anyhow::Error {
		Self::NoInputs(msg.into()).into()
	}

	pub fn validation(msg: impl Into<String>) -> anyhow::Error {
		Self::Validation(msg.into()).into()
	}

	pub fn output_missing(path: impl Into<PathBuf>) -> anyhow::Error {
		Self::OutputMissing { path: path.into() }.into()
	}

	/// Searches the whole chain, so added context doesn't hide the kind.
	pub fn find(e: &anyhow::Error) -> Option<&PipelineError> {
		e.chain()
			.find_map(|cause| cause.downcast_ref::<PipelineError>())
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Self::Configuration(..) => "ConfigurationError",
			Self::NoInputs(..) => "NoInputs",
			Self::ExternalToolFailure { .. } => "ExternalToolFailure",
			Self::OutputMissing { .. } => "OutputMissing",
			Self::Validation(..) => "ValidationError",
			Self::CallbackFailure { .. } => "CallbackFailure"
		}
	}
}
