//! A Job is a piece of work with a schedule, captured run logs, and
//! lifecycle callbacks.
//!
//! All mutable run state lives behind one mutex, so the dispatcher observes
//! the `is_running` flag and the new `next_run_at` as a single transition.
//! Jobs are always handled as `Arc<Job>`; the [`Runner`] wrapper gives the
//! dispatch loop one interface over serial and worker-thread execution.

use crate::{
	calendar::HolidayCalendar,
	callable::{Callable, Kwargs, RunContext},
	error::{JobFailure, Result},
	schedule::Schedule,
	state::JobRecord,
	time::{epoch, Clock, Timekeeper},
};
use jiff::{civil::Time, tz::TimeZone, Zoned};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
	any::Any,
	fmt,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	thread::{self, JoinHandle},
};
use tracing::{debug, warn};

/// Captured output and timing of a job's most recent run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogs {
	/// Epoch seconds at which the run began.
	pub start: Option<i64>,
	/// Epoch seconds at which the run finished; `None` while in flight.
	pub end: Option<i64>,
	/// Captured output stream.
	pub log: String,
	/// Captured error stream, including any failure message.
	pub err: String,
}

/// The lifecycle points callbacks can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackKind {
	OnEnable,
	OnDisable,
	OnComplete,
}

pub(crate) type Callback = Arc<dyn Fn(&Job) + Send + Sync>;
pub(crate) type ErrorHandler = Arc<dyn Fn(&JobFailure) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
	on_enable: Vec<Callback>,
	on_disable: Vec<Callback>,
	on_complete: Vec<Callback>,
}

#[derive(Debug)]
struct JobState {
	next_run_at: i64,
	is_running: bool,
	is_enabled: bool,
	logs: RunLogs,
}

/// Proof that `begin` marked the job running; consumed by `execute`.
pub(crate) struct RunToken {
	started: i64,
	is_rerun: bool,
}

/// Everything the builder resolves before a job comes to life.
pub(crate) struct JobSpec {
	pub id: usize,
	pub name: String,
	pub doc: Option<String>,
	pub every_desc: String,
	pub schedule: Schedule,
	pub at: Option<Time>,
	pub tz: TimeZone,
	pub tz_name: String,
	pub calendar: Arc<dyn HolidayCalendar>,
	pub kwargs: Kwargs,
	pub func: Box<dyn Callable>,
	pub grace_secs: i64,
	pub clock: Clock,
	pub default_error_handler: Option<ErrorHandler>,
}

/// A registered job.
pub struct Job {
	id: usize,
	name: String,
	doc: Option<String>,
	every_desc: String,
	schedule: Schedule,
	at: Option<Time>,
	tz: TimeZone,
	tz_name: String,
	calendar: Arc<dyn HolidayCalendar>,
	kwargs: Kwargs,
	func: Box<dyn Callable>,
	digest: String,
	grace_secs: i64,
	clock: Clock,
	state: Mutex<JobState>,
	callbacks: Mutex<Callbacks>,
	error_handler: Mutex<Option<ErrorHandler>>,
	default_error_handler: Option<ErrorHandler>,
}

impl Job {
	pub(crate) fn new(spec: JobSpec) -> Result<Arc<Self>> {
		let digest = identity_digest(
			&spec.name,
			&spec.every_desc,
			spec.at,
			&spec.tz_name,
			&spec.kwargs,
		)?;
		let job = Self {
			id: spec.id,
			name: spec.name,
			doc: spec.doc,
			every_desc: spec.every_desc,
			schedule: spec.schedule,
			at: spec.at,
			tz: spec.tz,
			tz_name: spec.tz_name,
			calendar: spec.calendar,
			kwargs: spec.kwargs,
			func: spec.func,
			digest,
			grace_secs: spec.grace_secs,
			clock: spec.clock,
			state: Mutex::new(JobState {
				next_run_at: 0,
				is_running: false,
				is_enabled: true,
				logs: RunLogs::default(),
			}),
			callbacks: Mutex::new(Callbacks::default()),
			error_handler: Mutex::new(None),
			default_error_handler: spec.default_error_handler,
		};
		let initial = job.schedule.next_run(
			&job.now_local(),
			None,
			job.at,
			job.calendar.as_ref(),
			job.grace_secs,
		)?;
		job.state.lock().next_run_at = initial;
		Ok(Arc::new(job))
	}

	/// Dense registration index.
	pub fn id(&self) -> usize {
		self.id
	}

	/// The name the job was registered under.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Free-form description, if one was given.
	pub fn doc(&self) -> Option<&str> {
		self.doc.as_deref()
	}

	/// The interval descriptor as registered, e.g. `"30"` or `"businessday"`.
	pub fn every_desc(&self) -> &str {
		&self.every_desc
	}

	pub fn schedule(&self) -> &Schedule {
		&self.schedule
	}

	/// The `HH:MM` anchor, if this variant uses one.
	pub fn at(&self) -> Option<Time> {
		self.at
	}

	pub fn tz_name(&self) -> &str {
		&self.tz_name
	}

	/// Stable content hash over the declarative fields; the persistence key.
	pub fn digest(&self) -> &str {
		&self.digest
	}

	/// Epoch seconds of the next scheduled fire; `0` means never again.
	pub fn next_run_at(&self) -> i64 {
		self.state.lock().next_run_at
	}

	pub fn is_running(&self) -> bool {
		self.state.lock().is_running
	}

	pub fn is_enabled(&self) -> bool {
		self.state.lock().is_enabled
	}

	/// The most recent run's captured logs.
	pub fn logs(&self) -> RunLogs {
		self.state.lock().logs.clone()
	}

	/// Whether the dispatch loop should fire this job now.
	pub fn is_due(&self) -> bool {
		let next_run_at = {
			let state = self.state.lock();
			if !state.is_enabled || state.is_running {
				return false;
			}
			state.next_run_at
		};
		if next_run_at == 0 {
			return false;
		}
		let now = self.now_local();
		if epoch(&now) < next_run_at {
			return false;
		}
		self.schedule.must_run_today(now.date(), self.calendar.as_ref())
	}

	/// Day-rule gate for `date`, exposed for calendar-sensitive callers.
	pub fn must_run_today(&self, date: jiff::civil::Date) -> bool {
		self.schedule.must_run_today(date, self.calendar.as_ref())
	}

	/// Skip this job in future eligibility scans; a run already in flight
	/// is unaffected.
	pub fn disable(&self) {
		self.state.lock().is_enabled = false;
		self.fire(CallbackKind::OnDisable);
	}

	/// Put the job back into eligibility scans.
	pub fn enable(&self) {
		self.state.lock().is_enabled = true;
		self.fire(CallbackKind::OnEnable);
	}

	/// Install a per-job error handler, overriding the scheduler-wide one.
	pub fn catch(&self, handler: impl Fn(&JobFailure) + Send + Sync + 'static) -> &Self {
		*self.error_handler.lock() = Some(Arc::new(handler));
		self
	}

	/// Subscribe `callback` to a lifecycle point. Invocation order is
	/// registration order; panics are logged and swallowed.
	pub fn register_callback(
		&self,
		kind: CallbackKind,
		callback: impl Fn(&Job) + Send + Sync + 'static,
	) {
		let callback: Callback = Arc::new(callback);
		let mut callbacks = self.callbacks.lock();
		match kind {
			CallbackKind::OnEnable => callbacks.on_enable.push(callback),
			CallbackKind::OnDisable => callbacks.on_disable.push(callback),
			CallbackKind::OnComplete => callbacks.on_complete.push(callback),
		}
	}

	pub(crate) fn tz(&self) -> &TimeZone {
		&self.tz
	}

	/// One consistent read of the mutable state, for projections.
	pub(crate) fn state_snapshot(&self) -> (i64, bool, bool, RunLogs) {
		let state = self.state.lock();
		(
			state.next_run_at,
			state.is_running,
			state.is_enabled,
			state.logs.clone(),
		)
	}

	/// The current instant on the job's own wall clock.
	fn now_local(&self) -> Zoned {
		self.clock.now().timestamp().to_zoned(self.tz.clone())
	}

	/// Mark the job running and reset its logs. Returns `None` when a run
	/// is already in flight. The flag is set before this returns, so a
	/// dispatch tick never double-fires a job whose worker has yet to start.
	pub(crate) fn begin(&self, is_rerun: bool) -> Option<RunToken> {
		let started = epoch(&self.clock.now());
		{
			let mut state = self.state.lock();
			if state.is_running {
				return None;
			}
			state.is_running = true;
			state.logs = RunLogs {
				start: Some(started),
				end: None,
				log: String::new(),
				err: String::new(),
			};
		}
		debug!("starting run of {self}");
		self.fire(CallbackKind::OnEnable);
		Some(RunToken { started, is_rerun })
	}

	/// Execute the job function and settle the run.
	pub(crate) fn execute(&self, token: RunToken) {
		let mut ctx = RunContext::new(&self.kwargs);
		let outcome = catch_unwind(AssertUnwindSafe(|| self.func.call(&mut ctx)));
		let failure = match outcome {
			Ok(Ok(())) => None,
			Ok(Err(error)) => Some(render_error(error.as_ref())),
			Err(panic) => Some(panic_message(panic.as_ref())),
		};
		if let Some(message) = &failure {
			ctx.append_err(message);
		}
		let (out, err) = ctx.into_captured();
		let ended = epoch(&self.clock.now());
		{
			let mut state = self.state.lock();
			state.logs.log = out;
			state.logs.err = err;
			state.logs.end = Some(ended);
			if !token.is_rerun {
				state.next_run_at = match self.schedule.next_run(
					&self.now_local(),
					Some(token.started),
					self.at,
					self.calendar.as_ref(),
					0,
				) {
					Ok(next) => next,
					Err(error) => {
						warn!("could not reschedule {self}: {error}");
						0
					}
				};
			}
			state.is_running = false;
		}
		if let Some(message) = failure {
			let failure = JobFailure {
				job: self.name.clone(),
				message,
			};
			warn!("job {self} failed: {failure}");
			self.dispatch_error(&failure);
		}
		debug!("finished run of {self}");
		self.fire(CallbackKind::OnComplete);
	}

	/// Begin and execute on the calling thread.
	pub(crate) fn run(&self, is_rerun: bool) {
		if let Some(token) = self.begin(is_rerun) {
			self.execute(token);
		}
	}

	/// Roll back a `begin` whose worker never started.
	pub(crate) fn cancel_begin(&self, reason: &str) {
		let ended = epoch(&self.clock.now());
		{
			let mut state = self.state.lock();
			state.logs.err = reason.to_string();
			state.logs.end = Some(ended);
			state.is_running = false;
		}
		self.fire(CallbackKind::OnComplete);
	}

	fn dispatch_error(&self, failure: &JobFailure) {
		let handler = self
			.error_handler
			.lock()
			.clone()
			.or_else(|| self.default_error_handler.clone());
		if let Some(handler) = handler {
			if catch_unwind(AssertUnwindSafe(|| handler(failure))).is_err() {
				warn!("error handler for {self} panicked");
			}
		}
	}

	pub(crate) fn fire(&self, kind: CallbackKind) {
		let callbacks = {
			let callbacks = self.callbacks.lock();
			match kind {
				CallbackKind::OnEnable => callbacks.on_enable.clone(),
				CallbackKind::OnDisable => callbacks.on_disable.clone(),
				CallbackKind::OnComplete => callbacks.on_complete.clone(),
			}
		};
		for callback in callbacks {
			if catch_unwind(AssertUnwindSafe(|| callback(self))).is_err() {
				warn!("{kind:?} callback for {self} panicked");
			}
		}
	}

	/// A consistent snapshot for the state store.
	pub(crate) fn record(&self) -> JobRecord {
		let state = self.state.lock();
		JobRecord {
			logs: state.logs.clone(),
			next_run_at: state.next_run_at,
			is_enabled: state.is_enabled,
		}
	}

	/// Apply a restored record. The persisted `next_run_at` only stands if
	/// it is terminal or still inside the startup grace window; a stale
	/// value gives way to the freshly computed one.
	pub(crate) fn apply_restored(&self, record: JobRecord) {
		let now_secs = epoch(&self.clock.now());
		let mut state = self.state.lock();
		state.logs = record.logs;
		state.is_enabled = record.is_enabled;
		if record.next_run_at == 0 || record.next_run_at >= now_secs - self.grace_secs {
			state.next_run_at = record.next_run_at;
		}
	}
}

impl fmt::Display for Job {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "[{}|{}] every {}", self.id, self.name, self.every_desc)?;
		if let Some(at) = self.at {
			write!(f, " at {:02}:{:02}", at.hour(), at.minute())?;
		}
		Ok(())
	}
}

impl fmt::Debug for Job {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Job")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("every", &self.every_desc)
			.field("at", &self.at)
			.field("tz", &self.tz_name)
			.field("next_run_at", &state.next_run_at)
			.field("is_running", &state.is_running)
			.field("is_enabled", &state.is_enabled)
			.finish_non_exhaustive()
	}
}

fn render_error(error: &(dyn std::error::Error + Send + Sync)) -> String {
	let mut message = error.to_string();
	let mut source = error.source();
	while let Some(cause) = source {
		message.push_str("\ncaused by: ");
		message.push_str(&cause.to_string());
		source = cause.source();
	}
	message
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(text) = panic.downcast_ref::<&str>() {
		format!("panicked: {text}")
	} else if let Some(text) = panic.downcast_ref::<String>() {
		format!("panicked: {text}")
	} else {
		"panicked".to_string()
	}
}

/// Content hash over the declarative fields. Dense ids never participate,
/// so reordering registrations cannot misalign restored logs.
fn identity_digest(
	name: &str,
	every_desc: &str,
	at: Option<Time>,
	tz_name: &str,
	kwargs: &Kwargs,
) -> Result<String> {
	let at = match at {
		Some(at) => format!("{:02}:{:02}", at.hour(), at.minute()),
		None => "-".to_string(),
	};
	let kwargs = serde_json::to_string(kwargs)?;
	let mut hasher = Sha256::new();
	for field in [name, every_desc, at.as_str(), tz_name, kwargs.as_str()] {
		hasher.update(field.as_bytes());
		hasher.update(b"\n");
	}
	Ok(hex::encode(hasher.finalize()))
}

/// Runs a job on a short-lived worker thread so the dispatch loop is not
/// blocked. The running flag is set on the dispatcher's thread before the
/// worker spawns.
pub(crate) struct AsyncJob {
	inner: Arc<Job>,
	worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncJob {
	pub(crate) fn new(inner: Arc<Job>) -> Self {
		Self {
			inner,
			worker: Mutex::new(None),
		}
	}

	pub(crate) fn job(&self) -> &Arc<Job> {
		&self.inner
	}

	pub(crate) fn run(&self, is_rerun: bool) {
		let Some(token) = self.inner.begin(is_rerun) else {
			return;
		};
		let job = Arc::clone(&self.inner);
		let spawned = thread::Builder::new()
			.name(format!("duty-{}", self.inner.name()))
			.spawn(move || job.execute(token));
		match spawned {
			Ok(handle) => *self.worker.lock() = Some(handle),
			Err(error) => {
				warn!("could not spawn worker for {}: {error}", self.inner);
				self.inner.cancel_begin("worker thread failed to spawn");
			}
		}
	}

	/// Wait for the in-flight worker, if any.
	pub(crate) fn join(&self) {
		let handle = self.worker.lock().take();
		if let Some(handle) = handle {
			if handle.join().is_err() {
				warn!("worker for {} exited by panic", self.inner);
			}
		}
	}
}

/// The dispatch loop's uniform interface over serial and parallel jobs.
pub(crate) enum Runner {
	Serial(Arc<Job>),
	Parallel(AsyncJob),
}

impl Runner {
	pub(crate) fn job(&self) -> &Arc<Job> {
		match self {
			Self::Serial(job) => job,
			Self::Parallel(async_job) => async_job.job(),
		}
	}

	pub(crate) fn run(&self, is_rerun: bool) {
		match self {
			Self::Serial(job) => job.run(is_rerun),
			Self::Parallel(async_job) => async_job.run(is_rerun),
		}
	}

	pub(crate) fn join(&self) {
		if let Self::Parallel(async_job) = self {
			async_job.join();
		}
	}
}
