//! This module defines the error type and Result alias.

use std::fmt;
use thiserror::Error;

/// Anything that can go wrong while configuring or driving the scheduler.
#[derive(Debug, Error)]
pub enum Error {
	/// The interval descriptor matched no job variant.
	#[error("`{0}` is not a valid schedule interval")]
	InvalidInterval(String),
	/// An `.at()` string that is not 24-hour `HH:MM`.
	#[error("invalid time of day `{0}` (valid format is HH:MM)")]
	InvalidAtTime(String),
	/// Timezone lookup failed.
	#[error("unknown timezone `{0}`")]
	UnknownTimezone(String),
	/// A monthly schedule was finalized without `.strict_date()`.
	#[error("monthly schedules require .strict_date(bool), e.g. .every(\"31st\").strict_date(true)")]
	MissingStrictDate,
	/// `.strict_date()` was called on a non-monthly schedule.
	#[error(".strict_date(bool) is only used for monthly schedules")]
	StrictDateNotMonthly,
	/// A job id that was never registered.
	#[error("no job with id {0}")]
	UnknownJob(usize),
	/// `rerun` was asked for a job that is currently executing.
	#[error("job {0} is already running")]
	AlreadyRunning(usize),
	/// Datetime arithmetic failed (out-of-range instants and the like).
	#[error(transparent)]
	Time(#[from] jiff::Error),
	/// State persistence I/O failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// A persisted job record could not be encoded or decoded.
	#[error(transparent)]
	Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failure raised by user code inside a job run.
///
/// Handed to the per-job `catch` handler, or the scheduler-wide
/// `on_job_error` handler when no override is set. Displays as the bare
/// failure message.
#[derive(Debug, Clone)]
pub struct JobFailure {
	/// Name of the job that failed.
	pub job: String,
	/// Rendered failure message, including any source chain.
	pub message: String,
}

impl fmt::Display for JobFailure {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.message)
	}
}
