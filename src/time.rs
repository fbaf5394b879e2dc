//! Access to the current time is funneled through [`Clock`] so tests can
//! substitute a controllable timestamp.

use crate::error::{Error, Result};
use jiff::{
	civil::{Date, Time},
	tz::TimeZone,
	Timestamp, Zoned,
};
use regex::Regex;
use std::{fmt, sync::LazyLock};

// 24-hour wall clock anchor, e.g. "09:30" or "9:30"
static AT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^([01]?\d|2[0-3]):([0-5]\d)$").unwrap());

pub(crate) trait Timekeeper: fmt::Debug {
	/// Return the current instant in the system timezone.
	fn now(&self) -> Zoned;
}

/// Source of the current time, real by default and mockable in tests.
#[derive(Clone, Debug, Default)]
pub(crate) enum Clock {
	#[default]
	Real,
	#[cfg(test)]
	Mock(mock::Mock),
}

impl Timekeeper for Clock {
	fn now(&self) -> Zoned {
		match self {
			Self::Real => Zoned::now(),
			#[cfg(test)]
			Self::Mock(mock) => mock.now(),
		}
	}
}

/// Parse a 24-hour `HH:MM` wall-clock anchor.
pub(crate) fn parse_at(time_str: &str) -> Result<Time> {
	let caps = AT_RE
		.captures(time_str)
		.ok_or_else(|| Error::InvalidAtTime(time_str.to_string()))?;
	// unwraps are safe - already validated by the regex
	let hour: i8 = caps[1].parse().unwrap();
	let minute: i8 = caps[2].parse().unwrap();
	Ok(Time::new(hour, minute, 0, 0)?)
}

/// Resolve an IANA timezone name, failing fast on unknown zones.
pub(crate) fn resolve_tz(name: &str) -> Result<TimeZone> {
	TimeZone::get(name).map_err(|_| Error::UnknownTimezone(name.to_string()))
}

/// The system timezone and a printable name for it.
pub(crate) fn system_tz() -> (TimeZone, String) {
	let tz = TimeZone::system();
	let name = tz.iana_name().unwrap_or("system").to_string();
	(tz, name)
}

/// Epoch seconds of an instant.
pub(crate) fn epoch(zoned: &Zoned) -> i64 {
	zoned.timestamp().as_second()
}

/// A local date + time interpreted in `tz`, as epoch seconds.
pub(crate) fn to_epoch(date: Date, time: Time, tz: &TimeZone) -> Result<i64> {
	Ok(date
		.to_datetime(time)
		.to_zoned(tz.clone())?
		.timestamp()
		.as_second())
}

/// Epoch seconds back to a wall clock in `tz`.
pub(crate) fn epoch_to_zoned(secs: i64, tz: &TimeZone) -> Result<Zoned> {
	Ok(Timestamp::from_second(secs)?.to_zoned(tz.clone()))
}

#[cfg(test)]
pub(crate) mod mock {
	use super::{LazyLock, Timekeeper, Zoned};
	use jiff::{civil, Span};
	use parking_lot::Mutex;
	use std::sync::Arc;

	/// Default starting time: a Friday, midday, New York.
	pub(crate) static START: LazyLock<Zoned> = LazyLock::new(|| {
		civil::date(2021, 1, 1)
			.at(12, 0, 0, 0)
			.intz("America/New_York")
			.unwrap()
	});

	/// Mock the datetime for predictable results. Clones share the stamp,
	/// so advancing the scheduler's clock advances every job's view of it.
	#[derive(Clone, Debug)]
	pub(crate) struct Mock {
		stamp: Arc<Mutex<Zoned>>,
	}

	impl Mock {
		pub(crate) fn new(stamp: Zoned) -> Self {
			Self {
				stamp: Arc::new(Mutex::new(stamp)),
			}
		}

		/// Move the clock forward.
		pub(crate) fn advance(&self, span: Span) {
			let mut stamp = self.stamp.lock();
			*stamp = stamp.checked_add(span).unwrap();
		}
	}

	impl Default for Mock {
		fn default() -> Self {
			Self::new(START.clone())
		}
	}

	impl Timekeeper for Mock {
		fn now(&self) -> Zoned {
			self.stamp.lock().clone()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_parse_at() {
		assert_eq!(parse_at("09:30").unwrap(), Time::new(9, 30, 0, 0).unwrap());
		assert_eq!(parse_at("9:30").unwrap(), Time::new(9, 30, 0, 0).unwrap());
		assert_eq!(parse_at("23:59").unwrap(), Time::new(23, 59, 0, 0).unwrap());
		assert!(parse_at("24:00").is_err());
		assert!(parse_at("10:60").is_err());
		assert!(parse_at("10").is_err());
		assert!(parse_at("10:00:00").is_err());
	}

	#[test]
	fn test_resolve_tz() {
		assert!(resolve_tz("America/New_York").is_ok());
		assert!(resolve_tz("Mars/Olympus_Mons").is_err());
	}

	#[test]
	fn test_epoch_round_trip() {
		let tz = resolve_tz("America/New_York").unwrap();
		let secs = to_epoch(
			jiff::civil::date(2021, 1, 1),
			Time::new(12, 0, 0, 0).unwrap(),
			&tz,
		)
		.unwrap();
		assert_eq!(secs, epoch(&mock::START));
		let back = epoch_to_zoned(secs, &tz).unwrap();
		assert_eq!(back, *mock::START);
	}
}
