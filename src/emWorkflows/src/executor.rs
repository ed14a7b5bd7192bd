use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{info, info_span, warn};

use crate::assets::{CallbackRecord, Status};
use crate::callback::Api;
use crate::config::Config;
use crate::dag::Dag;
use crate::discovery::Source;
use crate::error::PipelineError;
use crate::logging::{self, ResultExt};
use crate::share::{resolve_mount, MountedShare};
use crate::work_unit::WorkUnit;


/// A kind of job: how inputs are found, and the stages each input goes through.
pub trait Workflow: Sync {

	/// per-input state the stages share, wrapping the input's [WorkUnit]
	type Unit: UnitContext + Send + Sync;

	fn name(&self) -> &'static str;

	/// Checks the job parameters. Runs before anything touches the filesystem.
	fn validate(&self) -> Result<()>;

	fn discover(&self, input_dir: &Path, single: Option<&str>) -> Result<Vec<Source>>;

	fn prepare(&self, work_unit: WorkUnit, source: Source) -> Self::Unit;

	/// A fresh graph for one input.
	fn dag(&self) -> Dag<Self::Unit>;
}


pub trait UnitContext {
	fn work_unit(&self) -> &WorkUnit;
	fn into_work_unit(self) -> WorkUnit;
}


/// Job-wide options, shared by every workflow.
#[derive(Debug, Clone, Default)]
pub struct JobParams {
	pub file_share: String,
	/// relative to the share's Projects folder
	pub input_dir: String,
	pub file_name: Option<String>,
	pub callback_url: Option<String>,
	pub token: Option<String>,
	pub no_api: bool,
	pub keep_workdir: bool,
	pub snapshot_workdir: bool
}


/// What became of the records sent to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	/// no_api is set
	Skipped,
	Accepted,
	/// the API got the records, but answered with this HTTP status
	Rejected(u16),
	/// the records never reached the API
	Unsent
}

impl Delivery {

	/// The records reached the API, whatever it answered.
	pub fn dispatched(&self) -> bool {
		matches!(self, Self::Accepted | Self::Rejected(..))
	}
}


#[derive(Debug)]
pub struct JobSummary {
	pub records: Vec<CallbackRecord>,
	pub callback: Delivery
}

impl JobSummary {

	pub fn failed(&self) -> usize {
		self.records.iter()
			.filter(|record| record.is_error())
			.count()
	}
}


/// Runs one job from start to finish.
///
/// Configuration problems stop the job before any input starts.
/// After that, each input succeeds or fails on its own, the API hears about all of them in one callback,
/// and then the working folders are cleaned up.
/// Once the API knows the job is running, it also hears how the job ended, however it ended.
#[tracing::instrument(skip_all, level = 5, name = "Job", fields(workflow = workflow.name()))]
pub fn run_job<W: Workflow>(config: &Config, params: &JobParams, workflow: &W) -> Result<JobSummary> {

	let api = if params.no_api {
		None
	} else {
		let url = params.callback_url.as_ref()
			.ok_or_else(|| PipelineError::configuration("callback_url is required unless no_api is set"))?;
		let token = params.token.as_ref()
			.ok_or_else(|| PipelineError::configuration("token is required unless no_api is set"))?;
		Some(Api::new(url, token)?)
	};

	if let Some(api) = &api {
		api.notify_running()
			.context("Failed to report the job as running")
			.warn_err()
			.ok();
	}

	let result = run_inputs(config, params, workflow, api.as_ref());

	let status = match &result {
		Ok(summary) if matches!(summary.callback, Delivery::Accepted | Delivery::Skipped) => Status::Success,
		_ => Status::Error
	};
	match &api {
		Some(api) => {
			api.notify_completion(status)
				.context("Failed to report the job completion")
				.warn_err()
				.ok();
		}
		None => info!("no_api is set, job completion: {:?}", status)
	}

	result
}


fn run_inputs<W: Workflow>(config: &Config, params: &JobParams, workflow: &W, api: Option<&Api>) -> Result<JobSummary> {

	workflow.validate()?;

	let share = resolve_mount(config, &params.file_share)?;
	let input_dir = share.projects_root().join(&params.input_dir);
	info!("{} job over {}", workflow.name(), input_dir.to_string_lossy());

	let sources = workflow.discover(&input_dir, params.file_name.as_deref())?;
	info!("found {} input(s)", sources.len());

	let pool = rayon::ThreadPoolBuilder::new()
		.num_threads(config.workers)
		.thread_name(|i| format!("em-worker-{}", i))
		.build()
		.context("Failed to start the worker pool")?;

	// an input whose folders can't be made fails alone
	let mut units = Vec::with_capacity(sources.len());
	let mut setup_failures = Vec::new();
	for (i, source) in sources.into_iter().enumerate() {
		match WorkUnit::new(config, &share, &input_dir, &source.path) {
			Ok(work_unit) => units.push(workflow.prepare(work_unit, source)),
			Err(e) => {
				warn!("{}: setup failed: {:#}", source.path.to_string_lossy(), e);
				setup_failures.push((i, setup_failure(&share, &source, e)));
			}
		}
	}

	let work_units = fan_out(&pool, workflow, units);
	let mut records = work_units.iter()
		.map(|unit| unit.record.clone())
		.collect::<Vec<_>>();
	// back in discovery order
	for (i, record) in setup_failures {
		records.insert(i, record);
	}

	let callback = match api {
		Some(api) => deliver(api, &records),
		None => {
			info!("no_api is set, not sending the callback");
			Delivery::Skipped
		}
	};

	// cleanup happens no matter how the callback went
	for unit in &work_units {
		if params.snapshot_workdir {
			unit.copy_workdir_to_assets()
				.warn_err()
				.ok();
		}
		unit.copy_logs_to_assets()
			.warn_err()
			.ok();
		unit.cleanup(params.keep_workdir)
			.warn_err()
			.ok();
	}

	let summary = JobSummary {
		records,
		callback
	};
	info!("{} job finished: {} input(s), {} failed", workflow.name(), summary.records.len(), summary.failed());
	Ok(summary)
}


fn deliver(api: &Api, records: &[CallbackRecord]) -> Delivery {
	let result = api.send_files(records);
	let delivery = match &result {
		Ok(()) => Delivery::Accepted,
		Err(e) => match PipelineError::find(e) {
			Some(PipelineError::CallbackFailure { status, .. }) => Delivery::Rejected(*status),
			_ => Delivery::Unsent
		}
	};
	result.warn_err()
		.ok();
	delivery
}


/// The record for an input that never got a work unit.
fn setup_failure(share: &MountedShare, source: &Source, e: anyhow::Error) -> CallbackRecord {
	let path = source.path.as_path();
	let title = path.file_stem()
		.map(|stem| stem.to_string_lossy().to_string())
		.unwrap_or_default();
	let primary_file_path = path.strip_prefix(share.projects_root())
		.unwrap_or(path)
		.to_string_lossy()
		.to_string();
	let mut record = CallbackRecord::new(primary_file_path, title);
	record.mark_error(format!("setup: {:#}", e));
	record
}


/// Runs every unit's graph on the pool. A failing unit only marks its own record.
pub fn fan_out<W: Workflow>(pool: &ThreadPool, workflow: &W, units: Vec<W::Unit>) -> Vec<WorkUnit> {
	let parent = tracing::Span::current();
	pool.install(|| {
		units.into_par_iter()
			.map(|unit| {

				let work_unit = unit.work_unit();
				let span = info_span!(
					parent: &parent,
					"unit",
					base = work_unit.base(),
					log = %work_unit.log_path(logging::UNIT_LOG).display()
				);
				let _span = span.enter();

				let report = workflow.dag().run(&unit);
				let mut work_unit = unit.into_work_unit();
				report.apply(&mut work_unit.record);

				match &work_unit.record.message {
					Some(msg) if work_unit.record.is_error() => warn!("failed: {}", msg),
					_ => info!("finished")
				}

				work_unit
			})
			.collect()
	})
}
