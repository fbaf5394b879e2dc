// Some varied usage: a heartbeat, calendar-aware jobs, and the blocking loop.

use duty::{JobResult, RunContext, Scheduler};
use jiff::Zoned;
use std::{fmt::Write as _, time::Duration};

fn heartbeat(ctx: &mut RunContext) -> JobResult {
	let now = Zoned::now();
	println!("heartbeat at {now}");
	writeln!(ctx, "beat at {now}")?;
	Ok(())
}

fn main() -> duty::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let mut scheduler = Scheduler::builder()
		.check_interval(Duration::from_secs(1))
		.persist_states(false)
		.build();

	scheduler.every(10).run("heartbeat", heartbeat)?;

	scheduler.every("day").at("10:30")?.run("daily_report", |ctx| {
		writeln!(ctx, "good morning")?;
		Ok(())
	})?;

	scheduler
		.every("businessday")
		.at("09:30")?
		.timezone("America/New_York")?
		.run_parallel("market_open", |ctx| {
			writeln!(ctx, "ding ding")?;
			Ok(())
		})?;

	scheduler
		.every("31st")
		.strict_date(false)?
		.at("17:00")?
		.run("month_end", |ctx| {
			writeln!(ctx, "closing the books")?;
			Ok(())
		})?;

	println!("starting at {}", Zoned::now());
	// Ctrl-C stops the loop and joins any outstanding workers
	scheduler.start();
	Ok(())
}
