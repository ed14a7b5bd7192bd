use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Result};
use gumdrop::{Options, ParsingStyle};
use tracing::{info, warn};

use em_workflows::config::Config;
use em_workflows::executor::{run_job, Delivery, JobParams, JobSummary};
use em_workflows::logging::{self, ResultExt};
use em_workflows::workflows::brt::{BrtParams, BrtWorkflow};
use em_workflows::workflows::czi::CziWorkflow;
use em_workflows::workflows::dm::DmWorkflow;
use em_workflows::workflows::lrg2d::Lrg2dWorkflow;
use em_workflows::workflows::sem::{SemParams, SemWorkflow};


#[derive(Options)]
struct Args {

	#[options(help_flag)]
	help: bool,

	/// settings for log output
	#[options(no_short, default = "em_workflows=info")]
	log: String,

	/// TOML file with scratch, mount and tool settings
	#[options(no_short)]
	config: Option<String>,

	/// the share holding the inputs, eg RMLEMHedwigDev
	#[options(no_short, required)]
	file_share: String,

	/// folder of inputs, relative to the share's Projects folder
	#[options(no_short, required)]
	input_dir: String,

	/// process only this one input
	#[options(no_short)]
	file_name: Option<String>,

	/// where to POST the results
	#[options(no_short)]
	callback_url: Option<String>,

	/// bearer token for the callback
	#[options(no_short)]
	token: Option<String>,

	/// don't talk to the API at all
	#[options(no_short)]
	no_api: bool,

	/// leave the working folders in scratch
	#[options(no_short)]
	keep_workdir: bool,

	/// copy each working folder into its assets folder before cleanup
	#[options(no_short)]
	snapshot_workdir: bool,

	#[options(command)]
	cmd: Option<Command>
}

#[derive(Options)]
enum Command {

	/// Batch tomography of .mrc/.st tilt series
	Brt(BrtArgs),

	/// Thumbnails and key images of 2D micrographs
	Dm(NoArgs),

	/// Aligned volumes of FIB-SEM tif stacks
	Sem(SemArgs),

	/// Zarr conversion of Zeiss .czi files
	Czi(NoArgs),

	/// Zarr conversion of large RGB pngs
	Lrg2d(NoArgs)
}


#[derive(Options)]
struct NoArgs {

	#[options(help_flag)]
	help: bool
}


#[derive(Options)]
struct BrtArgs {

	#[options(help_flag)]
	help: bool,

	/// built-in or EM_TEMPLATE_DIR adoc template
	#[options(no_short, default = "plastic_brt")]
	adoc_template: String,

	#[options(no_short, default = "0")]
	montage: i64,

	/// fiducial size, in pixels
	#[options(no_short, default = "15")]
	gold: i64,

	#[options(no_short, default = "0")]
	focus: i64,

	#[options(no_short, default = "0")]
	bfocus: i64,

	#[options(no_short, default = "1")]
	fiducialless: i64,

	#[options(no_short, default = "0")]
	tracking_method: i64,

	/// 0 or 1
	#[options(no_short, default = "0")]
	two_surfaces: i64,

	#[options(no_short, default = "20")]
	target_number_of_beads: i64,

	#[options(no_short, default = "0")]
	local_alignments: i64,

	/// sample thickness, in pixels
	#[options(no_short, default = "30")]
	thickness: i64
}

impl From<BrtArgs> for BrtParams {
	fn from(args: BrtArgs) -> Self {
		Self {
			adoc_template: args.adoc_template,
			montage: args.montage,
			gold: args.gold,
			focus: args.focus,
			bfocus: args.bfocus,
			fiducialless: args.fiducialless,
			tracking_method: args.tracking_method,
			two_surfaces: args.two_surfaces,
			target_number_of_beads: args.target_number_of_beads,
			local_alignments: args.local_alignments,
			thickness: args.thickness
		}
	}
}


#[derive(Options)]
struct SemArgs {

	#[options(help_flag)]
	help: bool,

	/// stage tilt of the frames
	#[options(no_short)]
	tilt_angle: Option<f64>
}


fn main() -> ExitCode {

	// parse arguments
	let args = Args::parse_args_or_exit(ParsingStyle::AllOptions);

	// init logging
	let Ok(_) = logging::init(&args.log)
		.log_err()
		else { return ExitCode::FAILURE; };

	let Ok(_) = run(args)
		.log_err()
		else { return ExitCode::FAILURE; };

	ExitCode::SUCCESS
}


#[tracing::instrument(skip_all, level = 5, name = "EmWorkflows")]
fn run(args: Args) -> Result<()> {

	let config = Arc::new(Config::from_env(args.config.as_deref().map(Path::new))?);
	info!("{} environment, {} worker(s)", config.env, config.workers);

	let params = JobParams {
		file_share: args.file_share,
		input_dir: args.input_dir,
		file_name: args.file_name,
		callback_url: args.callback_url,
		token: args.token,
		no_api: args.no_api,
		keep_workdir: args.keep_workdir,
		snapshot_workdir: args.snapshot_workdir
	};

	let summary = match args.cmd {
		Some(Command::Brt(brt_args)) => run_job(&config, &params, &BrtWorkflow::new(config.clone(), brt_args.into()))?,
		Some(Command::Dm(..)) => run_job(&config, &params, &DmWorkflow::new(config.clone()))?,
		Some(Command::Sem(sem_args)) => {
			let sem_params = SemParams {
				tilt_angle: sem_args.tilt_angle
			};
			run_job(&config, &params, &SemWorkflow::new(config.clone(), sem_params))?
		}
		Some(Command::Czi(..)) => run_job(&config, &params, &CziWorkflow::new(config.clone()))?,
		Some(Command::Lrg2d(..)) => run_job(&config, &params, &Lrg2dWorkflow::new(config.clone()))?,
		None => bail!("No workflow, try one of:\n{}", Args::command_list().unwrap_or_default())
	};

	report(&summary);

	// failed inputs and API errors are in the log, but records that never left have failed the job
	if let Delivery::Rejected(status) = summary.callback {
		warn!("The API answered the callback with HTTP status {}", status);
	}
	if summary.callback == Delivery::Unsent {
		bail!("The callback to {} could not be sent", params.callback_url.unwrap_or_default());
	}

	Ok(())
}


fn report(summary: &JobSummary) {
	for record in &summary.records {
		match &record.message {
			Some(msg) if record.is_error() => warn!("{}: {}", record.primary_file_path, msg),
			_ => info!("{}: {} asset(s)", record.primary_file_path, record.assets().count())
		}
	}
}
