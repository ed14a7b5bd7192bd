use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, warn, Span};

use crate::assets::{Asset, CallbackRecord, ImageElement};


pub type StageId = usize;

type StageFn<C> = Box<dyn Fn(&C) -> Result<StageOutput> + Send + Sync>;


/// What a finished stage contributes to its input's callback record.
#[derive(Debug, Default)]
pub struct StageOutput {
	pub assets: Vec<Asset>,
	pub image_sets: Vec<ImageElement>,
	pub thumbnail_index: Option<usize>,
	pub file_metadata: Vec<(String,Value)>
}

impl StageOutput {

	/// the stage only made files for later stages
	pub fn none() -> Self {
		Self::default()
	}

	pub fn asset(asset: Asset) -> Self {
		Self {
			assets: vec![asset],
			.. Self::default()
		}
	}

	pub fn assets(assets: Vec<Asset>) -> Self {
		Self {
			assets,
			.. Self::default()
		}
	}

	fn apply(self, record: &mut CallbackRecord) {
		for elem in self.image_sets {
			record.append_image_set(elem);
		}
		for asset in self.assets {
			record.append_asset(asset);
		}
		if let Some(i) = self.thumbnail_index {
			record.thumbnail_index = i;
		}
		for (key, value) in self.file_metadata {
			record.set_file_metadata(key, value);
		}
	}
}


struct Stage<C> {
	name: &'static str,
	upstream: Vec<StageId>,
	run: StageFn<C>
}


/// A workflow for one input: stages, and the stages each one waits for.
///
/// Stages can only name stages declared before them, so the graph can't have cycles.
pub struct Dag<C> {
	stages: Vec<Stage<C>>
}

impl<C> Default for Dag<C> {
	fn default() -> Self {
		Self {
			stages: Vec::new()
		}
	}
}

impl<C: Sync> Dag<C> {

	pub fn new() -> Self {
		Self::default()
	}

	pub fn stage<F>(&mut self, name: &'static str, upstream: &[StageId], run: F) -> StageId
		where
			F: Fn(&C) -> Result<StageOutput> + Send + Sync + 'static
	{
		let id = self.stages.len();
		for &up in upstream {
			// ids only come from earlier calls to stage()
			assert!(up < id, "stage {} depends on undeclared stage {}", name, up);
		}
		self.stages.push(Stage {
			name,
			upstream: upstream.to_vec(),
			run: Box::new(run)
		});
		id
	}

	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}

	pub fn names(&self) -> Vec<&'static str> {
		self.stages.iter()
			.map(|stage| stage.name)
			.collect()
	}

	/// Runs every stage whose upstreams all succeeded, independent stages in parallel on the current rayon pool.
	/// After the first failure nothing new starts; stages already running finish.
	pub fn run(&self, ctx: &C) -> DagReport {

		let mut downstream = vec![Vec::new(); self.stages.len()];
		for (id, stage) in self.stages.iter().enumerate() {
			for &up in &stage.upstream {
				downstream[up].push(id);
			}
		}

		let state = Mutex::new(RunState {
			waiting_on: self.stages.iter()
				.map(|stage| stage.upstream.len())
				.collect(),
			outcomes: self.stages.iter()
				.map(|_| None)
				.collect(),
			failed: false
		});

		let run = DagRun {
			dag: self,
			ctx,
			downstream,
			state,
			span: Span::current()
		};

		rayon::scope(|scope| {
			let ready = self.stages.iter()
				.enumerate()
				.filter(|(_, stage)| stage.upstream.is_empty())
				.map(|(id, _)| id)
				.collect::<Vec<_>>();
			for id in ready {
				run.launch(scope, id);
			}
		});

		let outcomes = match run.state.into_inner() {
			Ok(state) => state.outcomes,
			Err(poisoned) => poisoned.into_inner().outcomes
		};

		DagReport {
			stages: self.stages.iter()
				.zip(outcomes)
				.map(|(stage, outcome)| (stage.name, outcome.unwrap_or(Outcome::Skipped)))
				.collect()
		}
	}
}


struct RunState {
	waiting_on: Vec<usize>,
	outcomes: Vec<Option<Outcome>>,
	failed: bool
}


struct DagRun<'d,C> {
	dag: &'d Dag<C>,
	ctx: &'d C,
	downstream: Vec<Vec<StageId>>,
	state: Mutex<RunState>,
	span: Span
}

impl<'d,C: Sync> DagRun<'d,C> {

	fn launch<'s>(&'s self, scope: &rayon::Scope<'s>, id: StageId) {
		scope.spawn(move |scope| {

			let _span = self.span.enter();
			let stage = &self.dag.stages[id];
			debug!("stage {}: started", stage.name);

			let result = panic::catch_unwind(AssertUnwindSafe(|| (stage.run)(self.ctx)))
				.unwrap_or_else(|_| Err(anyhow!("stage panicked")));

			let ready = {
				let mut state = match self.state.lock() {
					Ok(state) => state,
					Err(poisoned) => poisoned.into_inner()
				};
				let mut ready = Vec::new();
				match result {
					Ok(output) => {
						debug!("stage {}: finished", stage.name);
						state.outcomes[id] = Some(Outcome::Succeeded(output));
						for &down in &self.downstream[id] {
							state.waiting_on[down] -= 1;
							if state.waiting_on[down] == 0 && !state.failed {
								ready.push(down);
							}
						}
					}
					Err(e) => {
						warn!("stage {}: failed: {:#}", stage.name, e);
						state.outcomes[id] = Some(Outcome::Failed(e));
						state.failed = true;
					}
				}
				ready
			};

			for down in ready {
				self.launch(scope, down);
			}
		});
	}
}


#[derive(Debug)]
pub enum Outcome {
	Succeeded(StageOutput),
	Failed(anyhow::Error),
	/// an upstream failed, or another stage failed before this one could start
	Skipped
}


#[derive(Debug)]
pub struct DagReport {
	pub stages: Vec<(&'static str,Outcome)>
}

impl DagReport {

	/// The failed stage declared first, if any.
	pub fn first_failure(&self) -> Option<(&'static str,&anyhow::Error)> {
		self.stages.iter()
			.find_map(|(name, outcome)| match outcome {
				Outcome::Failed(e) => Some((*name, e)),
				_ => None
			})
	}

	pub fn succeeded(&self) -> bool {
		self.stages.iter()
			.all(|(_, outcome)| matches!(outcome, Outcome::Succeeded(..)))
	}

	pub fn outcome(&self, name: &str) -> Option<&Outcome> {
		self.stages.iter()
			.find(|(n, _)| *n == name)
			.map(|(_, outcome)| outcome)
	}

	/// Writes the results into the record: the first failure marks it as an error,
	/// otherwise stage outputs are added in declaration order, so the record doesn't depend on timing.
	pub fn apply(self, record: &mut CallbackRecord) {
		if let Some((name, e)) = self.first_failure() {
			record.mark_error(format!("{}: {:#}", name, e));
			return;
		}
		for (_, outcome) in self.stages {
			if let Outcome::Succeeded(output) = outcome {
				output.apply(record);
			}
		}
	}
}
