//! Read-only snapshot projection of jobs for external rendering.
//!
//! An embedding host (an HTTP handler, a TUI, a log line) takes
//! [`JobReport`]s and renders them however it likes; nothing here mutates a
//! job, and a report taken mid-run simply shows `end: None`.

use crate::{
	job::{Job, RunLogs},
	time::epoch_to_zoned,
};
use serde::Serialize;

/// Derived display state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
	Ready,
	Running,
	Error,
	Success,
}

impl Status {
	fn derive(is_running: bool, logs: &RunLogs) -> Self {
		if is_running {
			Self::Running
		} else if !logs.err.trim().is_empty() {
			Self::Error
		} else if logs.end.is_some() && !logs.log.trim().is_empty() {
			Self::Success
		} else {
			Self::Ready
		}
	}
}

/// Everything an external monitor needs to render one job.
#[derive(Clone, Debug, Serialize)]
pub struct JobReport {
	pub id: usize,
	/// Name of the registered work function.
	pub func: String,
	pub doc: Option<String>,
	/// The interval descriptor as registered.
	pub every: String,
	/// `HH:MM` anchor, when the variant uses one.
	pub at: Option<String>,
	pub timezone: String,
	/// Human-readable schedule, e.g. `every day at 10:00`.
	pub schedule: String,
	pub state: Status,
	pub is_running: bool,
	pub is_enabled: bool,
	/// Wall-clock seconds the last completed run took.
	pub duration_secs: Option<i64>,
	/// Epoch seconds of the next fire; `0` means never.
	pub next_run_at: i64,
	/// The next fire rendered in the job's timezone.
	pub next_run: Option<String>,
	pub logs: RunLogs,
}

impl Job {
	/// Project this job for external rendering.
	pub fn report(&self) -> JobReport {
		let (next_run_at, is_running, is_enabled, logs) = self.state_snapshot();
		let at = self
			.at()
			.map(|at| format!("{:02}:{:02}", at.hour(), at.minute()));
		let schedule = match &at {
			Some(at) => format!("every {} at {}", self.every_desc(), at),
			None => format!("every {} seconds", self.every_desc()),
		};
		let next_run = if next_run_at == 0 {
			None
		} else {
			epoch_to_zoned(next_run_at, self.tz())
				.ok()
				.map(|zoned| zoned.to_string())
		};
		let duration_secs = match (logs.start, logs.end) {
			(Some(start), Some(end)) => Some(end - start),
			_ => None,
		};
		JobReport {
			id: self.id(),
			func: self.name().to_string(),
			doc: self.doc().map(str::to_string),
			every: self.every_desc().to_string(),
			at,
			timezone: self.tz_name().to_string(),
			schedule,
			state: Status::derive(is_running, &logs),
			is_running,
			is_enabled,
			duration_secs,
			next_run_at,
			next_run,
			logs,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		calendar::FixedHolidays,
		callable::{FnCallable, Kwargs},
		job::JobSpec,
		schedule::{Every, Schedule},
		time::{mock::Mock, resolve_tz, Clock},
	};
	use jiff::ToSpan;
	use pretty_assertions::assert_eq;
	use std::{fmt::Write as _, sync::Arc};

	fn build_job(fails: bool, clock: &Mock) -> Arc<Job> {
		let every = Every::Seconds(30);
		Job::new(JobSpec {
			id: 7,
			name: "poller".to_string(),
			doc: Some("polls the thing".to_string()),
			every_desc: every.to_string(),
			schedule: Schedule::parse(&every, None).unwrap(),
			at: None,
			tz: resolve_tz("America/New_York").unwrap(),
			tz_name: "America/New_York".to_string(),
			calendar: Arc::new(FixedHolidays::default()),
			kwargs: Kwargs::new(),
			func: Box::new(FnCallable::new("poller", move |ctx| {
				if fails {
					Err("no luck".into())
				} else {
					writeln!(ctx, "polled")?;
					Ok(())
				}
			})),
			grace_secs: 0,
			clock: Clock::Mock(clock.clone()),
			default_error_handler: None,
		})
		.unwrap()
	}

	#[test]
	fn test_status_progression() {
		let clock = Mock::default();
		let job = build_job(false, &clock);
		assert_eq!(job.report().state, Status::Ready);

		let token = job.begin(false).unwrap();
		let mid_run = job.report();
		assert_eq!(mid_run.state, Status::Running);
		assert!(mid_run.is_running);
		assert_eq!(mid_run.logs.end, None);

		clock.advance(2.seconds());
		job.execute(token);
		let done = job.report();
		assert_eq!(done.state, Status::Success);
		assert_eq!(done.duration_secs, Some(2));
	}

	#[test]
	fn test_error_state() {
		let clock = Mock::default();
		let job = build_job(true, &clock);
		job.run(true);
		assert_eq!(job.report().state, Status::Error);
	}

	#[test]
	fn test_report_shape() {
		let clock = Mock::default();
		let job = build_job(false, &clock);
		let report = job.report();
		assert_eq!(report.id, 7);
		assert_eq!(report.func, "poller");
		assert_eq!(report.doc.as_deref(), Some("polls the thing"));
		assert_eq!(report.schedule, "every 30 seconds");
		assert_eq!(report.at, None);
		assert!(report.next_run_at > 0);
		assert!(report.next_run.is_some());

		let encoded = serde_json::to_value(&report).unwrap();
		assert_eq!(encoded["state"], "READY");
		assert_eq!(encoded["logs"]["log"], "");
	}
}
