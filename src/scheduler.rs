//! The scheduler is responsible for registering jobs and driving the
//! dispatch loop.
//!
//! Registration is a fluent builder: `every()` (alias `on()`) opens a
//! partial specification, and `run()`/`run_parallel()` finalizes it into a
//! concrete job variant, wires the state store into its lifecycle
//! callbacks, and appends it to the registry. The dispatch loop is a
//! single-threaded tick: scan jobs, fire the due ones, sleep.

use crate::{
	calendar::{HolidayCalendar, UsFederalHolidays},
	callable::{FnCallable, JobResult, Kwargs, RunContext},
	error::{Error, JobFailure, Result},
	job::{AsyncJob, CallbackKind, ErrorHandler, Job, JobSpec, Runner},
	monitor::JobReport,
	schedule::{is_monthly_descriptor, Every, Schedule},
	state::{FileStore, StateStore},
	time::{parse_at, resolve_tz, system_tz, Clock, Timekeeper},
};
use jiff::{civil::Time, tz::TimeZone};
use parking_lot::Mutex;
use signal_hook::{consts::SIGINT, flag, low_level};
use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread::{self, JoinHandle},
	time::Duration,
};
use tracing::{info, warn};

/// Configuration for a [`Scheduler`].
///
/// Every option has a production default: a five second tick, the system
/// timezone, the US federal holiday calendar, no startup grace, and state
/// persistence under the platform data directory.
pub struct SchedulerBuilder {
	check_interval: Duration,
	tz: Option<(TimeZone, String)>,
	calendar: Arc<dyn HolidayCalendar>,
	on_job_error: Option<ErrorHandler>,
	grace_secs: i64,
	persist_states: bool,
	store: Option<Arc<dyn StateStore>>,
	clock: Clock,
}

impl Default for SchedulerBuilder {
	fn default() -> Self {
		Self {
			check_interval: Duration::from_secs(5),
			tz: None,
			calendar: Arc::new(UsFederalHolidays),
			on_job_error: None,
			grace_secs: 0,
			persist_states: true,
			store: None,
			clock: Clock::default(),
		}
	}
}

impl SchedulerBuilder {
	/// How often the dispatch loop scans for due jobs.
	pub fn check_interval(mut self, interval: Duration) -> Self {
		self.check_interval = interval;
		self
	}

	/// Default timezone for jobs that do not set their own.
	///
	/// # Errors
	///
	/// Fails fast on a timezone name the IANA database does not know.
	pub fn timezone(mut self, name: &str) -> Result<Self> {
		let tz = resolve_tz(name)?;
		self.tz = Some((tz, name.to_string()));
		Ok(self)
	}

	/// Default holiday calendar for `businessday` jobs.
	pub fn calendar(mut self, calendar: impl HolidayCalendar + 'static) -> Self {
		self.calendar = Arc::new(calendar);
		self
	}

	/// Scheduler-wide handler for failures inside job functions. A job's
	/// own `catch` handler takes precedence.
	pub fn on_job_error(
		mut self,
		handler: impl Fn(&JobFailure) + Send + Sync + 'static,
	) -> Self {
		self.on_job_error = Some(Arc::new(handler));
		self
	}

	/// How long after its instant a missed run still fires, recovering
	/// schedules missed during a brief restart.
	pub fn startup_grace_mins(mut self, mins: u64) -> Self {
		self.grace_secs = (mins * 60) as i64;
		self
	}

	/// Turn state persistence off (or back on).
	pub fn persist_states(mut self, persist: bool) -> Self {
		self.persist_states = persist;
		self
	}

	/// Persist job state with a custom store.
	pub fn state_store(mut self, store: impl StateStore + 'static) -> Self {
		self.store = Some(Arc::new(store));
		self.persist_states = true;
		self
	}

	/// Persist job state under an explicit directory.
	///
	/// # Errors
	///
	/// Fails if the directory cannot be created.
	pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
		self.store = Some(Arc::new(FileStore::at(dir)?));
		self.persist_states = true;
		Ok(self)
	}

	#[cfg(test)]
	pub(crate) fn clock(mut self, clock: Clock) -> Self {
		self.clock = clock;
		self
	}

	pub fn build(self) -> Scheduler {
		let (tz, tz_name) = self.tz.unwrap_or_else(system_tz);
		let store = if self.persist_states {
			self.store.or_else(|| match FileStore::for_current_app() {
				Ok(store) => Some(Arc::new(store) as Arc<dyn StateStore>),
				Err(error) => {
					warn!("state persistence disabled, could not open store: {error}");
					None
				}
			})
		} else {
			None
		};
		Scheduler {
			jobs: Vec::new(),
			clock: self.clock,
			check_interval: self.check_interval,
			tz,
			tz_name,
			calendar: self.calendar,
			grace_secs: self.grace_secs,
			on_job_error: self.on_job_error,
			store,
			stop_flag: Arc::new(AtomicBool::new(false)),
			rerun_workers: Mutex::new(Vec::new()),
		}
	}
}

/// Registers jobs, tracks them, and drives the dispatch loop.
pub struct Scheduler {
	jobs: Vec<Runner>,
	clock: Clock,
	check_interval: Duration,
	tz: TimeZone,
	tz_name: String,
	calendar: Arc<dyn HolidayCalendar>,
	grace_secs: i64,
	on_job_error: Option<ErrorHandler>,
	store: Option<Arc<dyn StateStore>>,
	stop_flag: Arc<AtomicBool>,
	rerun_workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
	fn default() -> Self {
		SchedulerBuilder::default().build()
	}
}

impl Scheduler {
	/// A scheduler with the default configuration.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn builder() -> SchedulerBuilder {
		SchedulerBuilder::default()
	}

	/// Open a job specification for the given interval descriptor: a
	/// number of seconds, a day rule (`"day"`, `"businessday"`,
	/// `"tuesday"`, ...), a month ordinal (`"31st"`), a one-time date
	/// (`"2025-12-31"`), or `"never"`.
	///
	/// ```rust
	/// use duty::Scheduler;
	/// use std::fmt::Write;
	///
	/// # fn main() -> duty::Result<()> {
	/// let mut scheduler = Scheduler::builder().persist_states(false).build();
	/// scheduler
	/// 	.every("businessday")
	/// 	.at("10:00")?
	/// 	.timezone("America/New_York")?
	/// 	.run("morning_report", |ctx| {
	/// 		writeln!(ctx, "good morning")?;
	/// 		Ok(())
	/// 	})?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn every(&mut self, every: impl Into<Every>) -> JobBuilder<'_> {
		JobBuilder {
			scheduler: self,
			every: every.into(),
			calendar: None,
			at: None,
			tz: None,
			strict_date: None,
			doc: None,
			kwargs: Kwargs::new(),
		}
	}

	/// Alias of [`Scheduler::every`], reading better for one-time dates:
	/// `scheduler.on("2025-12-31")`.
	pub fn on(&mut self, every: impl Into<Every>) -> JobBuilder<'_> {
		self.every(every)
	}

	/// The registered jobs, in registration order.
	pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
		self.jobs.iter().map(|runner| runner.job())
	}

	pub fn get_job(&self, job_id: usize) -> Option<&Arc<Job>> {
		self.jobs.iter().map(|runner| runner.job()).find(|job| job.id() == job_id)
	}

	/// Snapshot every job for external rendering.
	pub fn report(&self) -> Vec<JobReport> {
		self.jobs().map(|job| job.report()).collect()
	}

	/// One dispatch pass: fire every due job. Serial jobs run on the
	/// calling thread; parallel jobs are handed to worker threads and
	/// show `is_running` before this returns.
	pub fn check(&self) {
		for runner in &self.jobs {
			if runner.job().is_due() {
				runner.run(false);
			}
		}
	}

	/// Best-effort restore of persisted job state.
	pub fn restore_states(&self) {
		if let Some(store) = &self.store {
			let jobs: Vec<Arc<Job>> =
				self.jobs.iter().map(|runner| Arc::clone(runner.job())).collect();
			if let Err(error) = store.restore_all(&jobs) {
				warn!("unable to restore job states: {error}");
			}
		}
	}

	/// Run the dispatch loop until [`Scheduler::stop`] or SIGINT, then
	/// wait for outstanding workers.
	pub fn start(&self) {
		self.restore_states();
		self.stop_flag.store(false, Ordering::SeqCst);
		let sigint = match flag::register(SIGINT, Arc::clone(&self.stop_flag)) {
			Ok(id) => Some(id),
			Err(error) => {
				warn!("could not install SIGINT handler: {error}");
				None
			}
		};
		info!(
			"scheduler started with {} jobs, checking every {:?}",
			self.jobs.len(),
			self.check_interval
		);
		while !self.stop_flag.load(Ordering::SeqCst) {
			self.check();
			thread::sleep(self.check_interval);
		}
		if let Some(id) = sigint {
			low_level::unregister(id);
		}
		info!("stopping, waiting for active parallel jobs");
		self.join();
		info!("scheduler stopped");
	}

	/// Ask the dispatch loop to exit at the top of its next tick. Only
	/// stores a flag, so it is safe from a signal handler or another
	/// thread.
	pub fn stop(&self) {
		self.stop_flag.store(true, Ordering::SeqCst);
	}

	/// Wait for every outstanding worker thread to finish.
	pub fn join(&self) {
		for runner in &self.jobs {
			runner.join();
		}
		let workers = std::mem::take(&mut *self.rerun_workers.lock());
		for handle in workers {
			if handle.join().is_err() {
				warn!("rerun worker exited by panic");
			}
		}
	}

	/// Force-run a job now, on a worker thread, without touching its
	/// schedule.
	///
	/// # Errors
	///
	/// [`Error::UnknownJob`] for an unregistered id,
	/// [`Error::AlreadyRunning`] when the job is in flight.
	pub fn rerun(&self, job_id: usize) -> Result<()> {
		let job = self
			.get_job(job_id)
			.map(Arc::clone)
			.ok_or(Error::UnknownJob(job_id))?;
		let token = job.begin(true).ok_or(Error::AlreadyRunning(job_id))?;
		let worker_job = Arc::clone(&job);
		let spawned = thread::Builder::new()
			.name(format!("duty-rerun-{}", job.name()))
			.spawn(move || worker_job.execute(token));
		match spawned {
			Ok(handle) => {
				self.rerun_workers.lock().push(handle);
				Ok(())
			}
			Err(error) => {
				job.cancel_begin("worker thread failed to spawn");
				Err(error.into())
			}
		}
	}

	pub fn enable_all(&self) {
		for runner in &self.jobs {
			runner.job().enable();
		}
	}

	/// Skip every job in future eligibility scans; in-flight runs finish.
	pub fn disable_all(&self) {
		for runner in &self.jobs {
			runner.job().disable();
		}
	}

	/// "Now" `HH:MM` for jobs registered without `.at()`, resolved in the
	/// scheduler's default timezone rather than the job's own.
	fn default_at(&self) -> Result<Time> {
		let now = self.clock.now().timestamp().to_zoned(self.tz.clone());
		Ok(Time::new(now.time().hour(), now.time().minute(), 0, 0)?)
	}
}

/// A partially specified job, between `every()` and `run()`.
pub struct JobBuilder<'s> {
	scheduler: &'s mut Scheduler,
	every: Every,
	calendar: Option<Arc<dyn HolidayCalendar>>,
	at: Option<Time>,
	tz: Option<(TimeZone, String)>,
	strict_date: Option<bool>,
	doc: Option<String>,
	kwargs: Kwargs,
}

impl JobBuilder<'_> {
	/// 24-hour wall-clock anchor for the run, e.g. `"15:00"` for 3PM.
	///
	/// # Errors
	///
	/// Rejects anything that is not `HH:MM`.
	pub fn at(mut self, time_str: &str) -> Result<Self> {
		self.at = Some(parse_at(time_str)?);
		Ok(self)
	}

	/// Timezone this job schedules in, overriding the scheduler default.
	///
	/// # Errors
	///
	/// Fails fast on a timezone name the IANA database does not know.
	pub fn timezone(mut self, name: &str) -> Result<Self> {
		let tz = resolve_tz(name)?;
		self.tz = Some((tz, name.to_string()));
		Ok(self)
	}

	/// Alias of [`JobBuilder::timezone`].
	pub fn tz(self, name: &str) -> Result<Self> {
		self.timezone(name)
	}

	/// Required for monthly schedules: whether months lacking the target
	/// day are skipped (`true`) or clamped to their last day (`false`).
	///
	/// # Errors
	///
	/// Rejects non-monthly schedules.
	pub fn strict_date(mut self, strict: bool) -> Result<Self> {
		if !is_monthly_descriptor(&self.every) {
			return Err(Error::StrictDateNotMonthly);
		}
		self.strict_date = Some(strict);
		Ok(self)
	}

	/// Holiday calendar for this job's `businessday` rule, overriding the
	/// scheduler default.
	pub fn calendar(mut self, calendar: impl HolidayCalendar + 'static) -> Self {
		self.calendar = Some(Arc::new(calendar));
		self
	}

	/// Free-form description surfaced by the monitor projection.
	pub fn doc(mut self, doc: &str) -> Self {
		self.doc = Some(doc.to_string());
		self
	}

	/// Bind a keyword argument, readable in the run via
	/// [`RunContext::arg`].
	pub fn arg(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
		self.kwargs.insert(key.to_string(), value.into());
		self
	}

	/// Finalize the job, running on the dispatcher thread.
	///
	/// # Errors
	///
	/// `Error::InvalidInterval` when no variant accepts the descriptor,
	/// `Error::MissingStrictDate` for monthly jobs without a policy.
	pub fn run(
		self,
		name: &str,
		work: impl Fn(&mut RunContext) -> JobResult + Send + Sync + 'static,
	) -> Result<Arc<Job>> {
		self.finish(name, work, false)
	}

	/// Finalize the job, running on a short-lived worker thread per fire
	/// so it never blocks the dispatch loop.
	///
	/// # Errors
	///
	/// Same as [`JobBuilder::run`].
	pub fn run_parallel(
		self,
		name: &str,
		work: impl Fn(&mut RunContext) -> JobResult + Send + Sync + 'static,
	) -> Result<Arc<Job>> {
		self.finish(name, work, true)
	}

	fn finish(
		self,
		name: &str,
		work: impl Fn(&mut RunContext) -> JobResult + Send + Sync + 'static,
		parallel: bool,
	) -> Result<Arc<Job>> {
		let schedule = Schedule::parse(&self.every, self.strict_date)?;
		let (tz, tz_name) = self
			.tz
			.unwrap_or_else(|| (self.scheduler.tz.clone(), self.scheduler.tz_name.clone()));
		let at = match (&schedule, self.at) {
			// repeat jobs are anchored by their interval alone
			(Schedule::Repeat(_), _) => None,
			(_, Some(at)) => Some(at),
			(_, None) => Some(self.scheduler.default_at()?),
		};
		let job = Job::new(JobSpec {
			id: self.scheduler.jobs.len(),
			name: name.to_string(),
			doc: self.doc,
			every_desc: self.every.to_string(),
			schedule,
			at,
			tz,
			tz_name,
			calendar: self
				.calendar
				.unwrap_or_else(|| Arc::clone(&self.scheduler.calendar)),
			kwargs: self.kwargs,
			func: Box::new(FnCallable::new(name, work)),
			grace_secs: self.scheduler.grace_secs,
			clock: self.scheduler.clock.clone(),
			default_error_handler: self.scheduler.on_job_error.clone(),
		})?;

		// the store rides along on every lifecycle transition
		if let Some(store) = &self.scheduler.store {
			for kind in [
				CallbackKind::OnEnable,
				CallbackKind::OnDisable,
				CallbackKind::OnComplete,
			] {
				let store = Arc::clone(store);
				job.register_callback(kind, move |job| {
					if let Err(error) = store.save(job) {
						warn!("could not persist state of {job}: {error}");
					}
				});
			}
		}

		info!("registered {job}");
		let runner = if parallel {
			Runner::Parallel(AsyncJob::new(Arc::clone(&job)))
		} else {
			Runner::Serial(Arc::clone(&job))
		};
		self.scheduler.jobs.push(runner);
		Ok(job)
	}
}
