use std::fmt::{self, Write as _};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::ops::Deref;
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use display_error_chain::ErrorChainExt;
use time::{OffsetDateTime, UtcOffset};
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::{error, warn, Event, Subscriber};
use tracing::dispatcher::DefaultGuard;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracing_subscriber::fmt::format::{Format, Full};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;


pub const DEFAULT_FILTER: &str = "em_workflows=info";

/// The step name of each input's own log, see [UnitLogs].
pub const UNIT_LOG: &str = "workflow";

/// The span field naming the file a unit's events go to.
pub const UNIT_LOG_FIELD: &str = "log";

const TIMESTAMP: &[FormatItem<'static>] = format_description!(
	version = 2,
	"[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3] [offset_hour sign:mandatory]:[offset_minute]"
);


/// Installs the process-wide subscriber: everything to stdout, and each input's events to its own log too.
/// Call once, before any work units start.
pub fn init(filter: impl AsRef<str>) -> Result<()> {

	// the local offset can't be read once threads exist, so this must run early
	let offset = local_offset();

	let subscriber = tracing_subscriber::registry()
		.with(env_filter(filter)?)
		.with(tracing_subscriber::fmt::layer()
			.event_format(event_format(offset).with_thread_names(true)))
		.with(UnitLogs::new(offset));

	tracing::subscriber::set_global_default(subscriber)
		.context("Failed to install the logging subscriber")?;

	Ok(())
}


/// Thread-scoped subscriber for tests, writes through the test harness capture.
/// Events from rayon worker threads go to the global default, which tests leave unset.
pub fn init_test() -> DefaultGuard {

	let subscriber = FmtSubscriber::builder()
		.with_env_filter(EnvFilter::new("em_workflows=trace"))
		.event_format(event_format(local_offset()))
		.with_test_writer()
		.finish();

	tracing::subscriber::set_default(subscriber)
}


fn env_filter(filter: impl AsRef<str>) -> Result<EnvFilter> {
	let filter = filter.as_ref();
	EnvFilter::builder()
		.parse(filter)
		.context(format!("Failed to parse log filter: {}", filter))
}


fn local_offset() -> UtcOffset {
	UtcOffset::current_local_offset()
		.unwrap_or(UtcOffset::UTC)
}


fn event_format(offset: UtcOffset) -> Format<Full,OffsetTime<&'static [FormatItem<'static>]>> {
	Format::default()
		.with_timer(OffsetTime::new(offset, TIMESTAMP))
		.with_target(false)
}


/// Appends every event inside a span carrying a `log` field to that file.
///
/// The executor opens one of these spans per input, pointing at `<working_dir>/workflow.log`,
/// so the input's logs folder holds what the pipeline said about it next to the tool output.
pub struct UnitLogs {
	offset: UtcOffset
}

struct UnitLog(Mutex<File>);

impl UnitLogs {

	pub fn new(offset: UtcOffset) -> Self {
		Self {
			offset
		}
	}
}

impl<S> Layer<S> for UnitLogs
	where
		S: Subscriber + for<'a> LookupSpan<'a>
{
	fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_,S>) {

		let mut fields = Fields::default();
		attrs.record(&mut fields);
		let Some(path) = fields.log
			else { return; };

		// a unit that can't log still runs, the events still reach stdout
		let Ok(file) = OpenOptions::new().create(true).append(true).open(&path)
			else { return; };
		if let Some(span) = ctx.span(id) {
			span.extensions_mut().insert(UnitLog(Mutex::new(file)));
		}
	}

	fn on_event(&self, event: &Event<'_>, ctx: Context<'_,S>) {

		let Some(scope) = ctx.event_scope(event)
			else { return; };

		for span in scope {
			let extensions = span.extensions();
			let Some(log) = extensions.get::<UnitLog>()
				else { continue; };

			let mut fields = Fields::default();
			event.record(&mut fields);
			let timestamp = OffsetDateTime::now_utc()
				.to_offset(self.offset)
				.format(TIMESTAMP)
				.unwrap_or_default();
			let level = event.metadata().level().to_string();

			if let Ok(mut file) = log.0.lock() {
				writeln!(file, "{} {:>5} {}{}", timestamp, level, fields.message, fields.rest).ok();
			}
			return;
		}
	}
}


/// An event's message and its other fields, or a span's log file.
#[derive(Default)]
struct Fields {
	message: String,
	rest: String,
	log: Option<String>
}

impl Visit for Fields {

	fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
		match field.name() {
			"message" => self.message = format!("{:?}", value),
			UNIT_LOG_FIELD => self.log = Some(format!("{:?}", value)),
			name => {
				write!(self.rest, " {}={:?}", name, value).ok();
			}
		}
	}
}


pub trait ResultExt<T> {
	fn log_err(self) -> Result<T,()>;
	fn warn_err(self) -> Result<T,()>;
}

impl<T> ResultExt<T> for Result<T,anyhow::Error> {

	fn log_err(self) -> Result<T,()> {
		self.map_err(|e| {
			error!("{}", e.deref().chain());
		})
	}

	fn warn_err(self) -> Result<T,()> {
		self.map_err(|e| {
			warn!("{}", e.deref().chain());
		})
	}
}
