use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::assets::{CallbackRecord, Status};
use crate::error::PipelineError;


/// Talks to the web API that started the job.
pub struct Api {
	client: Client,
	url: String,
	token: String
}


#[derive(Serialize)]
struct FilesBody<'r> {
	files: &'r [CallbackRecord]
}


impl Api {

	pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
		let client = Client::builder()
			.build()
			.context("Failed to build HTTP client")?;
		Ok(Self {
			client,
			url: url.into(),
			token: token.into()
		})
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Tells the API the job has started.
	pub fn notify_running(&self) -> Result<()> {
		self.post(&json!({
			"status": "running"
		}))
	}

	/// Tells the API the job is over: `success` once the records were accepted, `error` otherwise.
	pub fn notify_completion(&self, status: Status) -> Result<()> {
		info!("Reporting job completion to {}: {:?}", self.url, status);
		self.post(&json!({
			"status": status
		}))
	}

	/// Reports every input's record at once.
	pub fn send_files(&self, records: &[CallbackRecord]) -> Result<()> {
		info!("Sending {} record(s) to {}", records.len(), self.url);
		self.post(&FilesBody {
			files: records
		})
	}

	fn post(&self, body: &impl Serialize) -> Result<()> {

		let response = self.client.post(&self.url)
			.bearer_auth(&self.token)
			.header(CONTENT_TYPE, "application/json")
			.json(body)
			.send()
			.context(format!("Failed to send callback to {}", self.url))?;

		let status = response.status();
		debug!("callback response: HTTP status={}", status);
		if !status.is_success() {
			return Err(PipelineError::CallbackFailure {
				url: self.url.clone(),
				status: status.as_u16()
			}.into());
		}

		Ok(())
	}
}
