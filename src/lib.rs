//! # duty
//!
//! `duty` is a calendar- and timezone-aware in-process job scheduler.
//!
//! Jobs are declared fluently and dispatched by a single polling loop:
//! fixed second intervals, named weekdays, business days against a holiday
//! calendar, month-anchored days, one-time dates, or rerun-only. Each run's
//! output is captured into per-job logs that persist across process
//! restarts, and a read-only snapshot projection feeds external monitors.
//!
//! ```rust
//! use duty::Scheduler;
//! use std::fmt::Write;
//!
//! # fn main() -> duty::Result<()> {
//! let mut scheduler = Scheduler::builder()
//! 	.persist_states(false)
//! 	.build();
//!
//! scheduler
//! 	.every("businessday")
//! 	.at("09:30")?
//! 	.timezone("America/New_York")?
//! 	.arg("desk", "equities")
//! 	.run("open_report", |ctx| {
//! 		let desk = ctx.str_arg("desk").unwrap_or("unknown");
//! 		writeln!(ctx, "opening the {desk} desk")?;
//! 		Ok(())
//! 	})?;
//!
//! scheduler.every(30).run_parallel("heartbeat", |ctx| {
//! 	writeln!(ctx, "still here")?;
//! 	Ok(())
//! })?;
//!
//! // scheduler.start() blocks until stop() or SIGINT; one pass:
//! scheduler.check();
//! # Ok(())
//! # }
//! ```

mod calendar;
mod callable;
mod error;
mod job;
mod monitor;
mod schedule;
mod scheduler;
mod state;
mod time;

pub use calendar::{FixedHolidays, HolidayCalendar, UsFederalHolidays};
pub use callable::{Callable, FnCallable, JobResult, Kwargs, RunContext};
pub use error::{Error, JobFailure, Result};
pub use job::{CallbackKind, Job, RunLogs};
pub use monitor::{JobReport, Status};
pub use schedule::{DayRule, Every, Schedule};
pub use scheduler::{JobBuilder, Scheduler, SchedulerBuilder};
pub use state::{FileStore, StateStore};
