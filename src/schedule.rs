//! Interval descriptors and the schedule variants they resolve to.
//!
//! A [`Schedule`] is selected from an [`Every`] descriptor by testing the
//! variants in a fixed order: repeat-seconds, one-time date, monthly
//! ordinal, day rule, never. All next-run arithmetic happens on civil dates
//! in the job's own timezone and is handed back as epoch seconds, with `0`
//! meaning "never again".

use crate::{
	calendar::HolidayCalendar,
	error::{Error, Result},
	time::{epoch, to_epoch},
};
use jiff::{
	civil::{Date, Time, Weekday},
	ToSpan, Zoned,
};
use regex::Regex;
use std::{fmt, sync::LazyLock};

// "1st", "2nd", ... "31st"
static ORDINAL_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^(\d{1,2})(?:st|nd|rd|th)$").unwrap());

/// A raw interval descriptor as handed to `every()`/`on()`: either a number
/// of seconds or a named rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Every {
	Seconds(i64),
	Named(String),
}

impl From<i32> for Every {
	fn from(secs: i32) -> Self {
		Self::Seconds(i64::from(secs))
	}
}

impl From<u32> for Every {
	fn from(secs: u32) -> Self {
		Self::Seconds(i64::from(secs))
	}
}

impl From<i64> for Every {
	fn from(secs: i64) -> Self {
		Self::Seconds(secs)
	}
}

impl From<&str> for Every {
	fn from(name: &str) -> Self {
		Self::Named(name.to_string())
	}
}

impl From<String> for Every {
	fn from(name: String) -> Self {
		Self::Named(name)
	}
}

impl fmt::Display for Every {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Seconds(secs) => write!(f, "{secs}"),
			Self::Named(name) => write!(f, "{name}"),
		}
	}
}

/// Which days a [`Schedule::Daily`] job fires on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DayRule {
	/// Every calendar day.
	Every,
	/// Monday through Friday.
	Weekday,
	/// Saturday and Sunday.
	Weekend,
	/// Monday through Friday, excluding holidays.
	BusinessDay,
	/// One specific day of the week.
	On(Weekday),
}

impl DayRule {
	pub(crate) fn matches(&self, date: Date, calendar: &dyn HolidayCalendar) -> bool {
		let weekday = date.weekday();
		let workday = !matches!(weekday, Weekday::Saturday | Weekday::Sunday);
		match self {
			Self::Every => true,
			Self::Weekday => workday,
			Self::Weekend => !workday,
			Self::BusinessDay => workday && !calendar.is_holiday(date),
			Self::On(day) => weekday == *day,
		}
	}
}

impl fmt::Display for DayRule {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Self::Every => "day",
			Self::Weekday => "weekday",
			Self::Weekend => "weekend",
			Self::BusinessDay => "businessday",
			Self::On(Weekday::Monday) => "monday",
			Self::On(Weekday::Tuesday) => "tuesday",
			Self::On(Weekday::Wednesday) => "wednesday",
			Self::On(Weekday::Thursday) => "thursday",
			Self::On(Weekday::Friday) => "friday",
			Self::On(Weekday::Saturday) => "saturday",
			Self::On(Weekday::Sunday) => "sunday",
		};
		write!(f, "{name}")
	}
}

/// The resolved shape of a job's schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schedule {
	/// Every N seconds, anchored at the last run's start.
	Repeat(i64),
	/// Once, on a fixed calendar date.
	OneTime(Date),
	/// The Nth day of each month. When `strict`, months without day N are
	/// skipped; otherwise the last calendar day stands in.
	Monthly { day: i8, strict: bool },
	/// Daily, gated by a day rule.
	Daily(DayRule),
	/// Only ever run by explicit rerun.
	Never,
}

fn ensure_not_strict(strict_date: Option<bool>) -> Result<()> {
	if strict_date.is_some() {
		return Err(Error::StrictDateNotMonthly);
	}
	Ok(())
}

/// True if the descriptor names a day-of-month ordinal like `"31st"`.
pub(crate) fn is_monthly_descriptor(every: &Every) -> bool {
	match every {
		Every::Named(name) => ORDINAL_RE
			.captures(name)
			// unwrap is safe - the regex only matches 1-2 digits
			.is_some_and(|caps| (1..=31).contains(&caps[1].parse::<i8>().unwrap())),
		Every::Seconds(_) => false,
	}
}

impl Schedule {
	/// Resolve a descriptor, testing the job variants in fixed order.
	pub(crate) fn parse(every: &Every, strict_date: Option<bool>) -> Result<Self> {
		let name = match every {
			Every::Seconds(secs) if *secs > 0 => {
				ensure_not_strict(strict_date)?;
				return Ok(Self::Repeat(*secs));
			}
			Every::Seconds(secs) => return Err(Error::InvalidInterval(secs.to_string())),
			Every::Named(name) => name,
		};

		if let Ok(date) = name.parse::<Date>() {
			ensure_not_strict(strict_date)?;
			return Ok(Self::OneTime(date));
		}

		if let Some(caps) = ORDINAL_RE.captures(name) {
			// unwrap is safe - the regex only matches 1-2 digits
			let day: i8 = caps[1].parse().unwrap();
			if !(1..=31).contains(&day) {
				return Err(Error::InvalidInterval(name.clone()));
			}
			let strict = strict_date.ok_or(Error::MissingStrictDate)?;
			return Ok(Self::Monthly { day, strict });
		}

		let rule = match name.as_str() {
			"day" => Some(DayRule::Every),
			"weekday" => Some(DayRule::Weekday),
			"weekend" => Some(DayRule::Weekend),
			"businessday" => Some(DayRule::BusinessDay),
			"monday" => Some(DayRule::On(Weekday::Monday)),
			"tuesday" => Some(DayRule::On(Weekday::Tuesday)),
			"wednesday" => Some(DayRule::On(Weekday::Wednesday)),
			"thursday" => Some(DayRule::On(Weekday::Thursday)),
			"friday" => Some(DayRule::On(Weekday::Friday)),
			"saturday" => Some(DayRule::On(Weekday::Saturday)),
			"sunday" => Some(DayRule::On(Weekday::Sunday)),
			_ => None,
		};
		if let Some(rule) = rule {
			ensure_not_strict(strict_date)?;
			return Ok(Self::Daily(rule));
		}

		if name == "never" {
			ensure_not_strict(strict_date)?;
			return Ok(Self::Never);
		}

		Err(Error::InvalidInterval(name.clone()))
	}

	/// Terminal variants stop at `next_run_at = 0` instead of advancing.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::OneTime(_) | Self::Never)
	}

	/// The day of month a monthly job targets within `month`, if any.
	fn monthly_target(day: i8, month: Date, strict: bool) -> Option<i8> {
		let days_in_month = month.days_in_month();
		if day <= days_in_month {
			Some(day)
		} else if strict {
			None
		} else {
			Some(days_in_month)
		}
	}

	/// The dispatch-time gate: is `date` a day this schedule fires on?
	///
	/// Repeat and one-time jobs carry the day in their timestamp, so they
	/// pass unconditionally and a run missed just before midnight can still
	/// be recovered by the startup grace on the next day.
	pub fn must_run_today(&self, date: Date, calendar: &dyn HolidayCalendar) -> bool {
		match self {
			Self::Repeat(_) | Self::OneTime(_) => true,
			Self::Monthly { day, strict } => {
				Self::monthly_target(*day, date, *strict) == Some(date.day())
			}
			Self::Daily(rule) => rule.matches(date, calendar),
			Self::Never => false,
		}
	}

	/// Compute the next fire instant as epoch seconds, `0` for never.
	///
	/// `now` must already be in the job's timezone. A candidate instant is
	/// accepted while `now - candidate <= grace_secs`, which leaves a
	/// just-missed occurrence in the past for the next tick to pick up.
	/// `last_start` anchors repeat jobs at the previous run's start.
	pub(crate) fn next_run(
		&self,
		now: &Zoned,
		last_start: Option<i64>,
		at: Option<Time>,
		calendar: &dyn HolidayCalendar,
		grace_secs: i64,
	) -> Result<i64> {
		let tz = now.time_zone();
		let now_secs = epoch(now);
		let at = at.unwrap_or(Time::midnight());
		match self {
			Self::Repeat(secs) => Ok(last_start.unwrap_or(now_secs) + secs),
			Self::OneTime(date) => {
				let fire_at = to_epoch(*date, at, tz)?;
				if fire_at >= now_secs - grace_secs {
					Ok(fire_at)
				} else {
					Ok(0)
				}
			}
			Self::Monthly { day, strict } => {
				let mut month = now.date().first_of_month();
				for _ in 0..48 {
					if let Some(target) = Self::monthly_target(*day, month, *strict) {
						let date = Date::new(month.year(), month.month(), target)?;
						let fire_at = to_epoch(date, at, tz)?;
						if fire_at >= now_secs - grace_secs {
							return Ok(fire_at);
						}
					}
					month = month.checked_add(1.months())?;
				}
				tracing::warn!("no eligible month found for day {day}");
				Ok(0)
			}
			Self::Daily(rule) => {
				let mut date = now.date();
				// two years is past any stretch of skipped days
				for _ in 0..740 {
					if rule.matches(date, calendar) {
						let fire_at = to_epoch(date, at, tz)?;
						if fire_at >= now_secs - grace_secs {
							return Ok(fire_at);
						}
					}
					date = date.tomorrow()?;
				}
				tracing::warn!("no eligible day found for `{rule}` schedule");
				Ok(0)
			}
			Self::Never => Ok(0),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::calendar::{FixedHolidays, UsFederalHolidays};
	use jiff::civil;
	use pretty_assertions::assert_eq;

	fn at(hour: i8, minute: i8) -> Option<Time> {
		Some(Time::new(hour, minute, 0, 0).unwrap())
	}

	fn nyc(year: i16, month: i8, day: i8, hour: i8, minute: i8) -> Zoned {
		civil::date(year, month, day)
			.at(hour, minute, 0, 0)
			.intz("America/New_York")
			.unwrap()
	}

	fn no_holidays() -> FixedHolidays {
		FixedHolidays::default()
	}

	#[test]
	fn test_parse_precedence() {
		assert_eq!(Schedule::parse(&30.into(), None).unwrap(), Schedule::Repeat(30));
		assert_eq!(
			Schedule::parse(&"2019-05-16".into(), None).unwrap(),
			Schedule::OneTime(civil::date(2019, 5, 16))
		);
		assert_eq!(
			Schedule::parse(&"31st".into(), Some(true)).unwrap(),
			Schedule::Monthly { day: 31, strict: true }
		);
		assert_eq!(
			Schedule::parse(&"businessday".into(), None).unwrap(),
			Schedule::Daily(DayRule::BusinessDay)
		);
		assert_eq!(
			Schedule::parse(&"tuesday".into(), None).unwrap(),
			Schedule::Daily(DayRule::On(Weekday::Tuesday))
		);
		assert_eq!(Schedule::parse(&"never".into(), None).unwrap(), Schedule::Never);
	}

	#[test]
	fn test_parse_rejects() {
		assert!(matches!(
			Schedule::parse(&0.into(), None),
			Err(Error::InvalidInterval(_))
		));
		assert!(matches!(
			Schedule::parse(&(-5).into(), None),
			Err(Error::InvalidInterval(_))
		));
		assert!(matches!(
			Schedule::parse(&"32nd".into(), Some(true)),
			Err(Error::InvalidInterval(_))
		));
		assert!(matches!(
			Schedule::parse(&"fortnight".into(), None),
			Err(Error::InvalidInterval(_))
		));
		assert!(matches!(
			Schedule::parse(&"31st".into(), None),
			Err(Error::MissingStrictDate)
		));
		assert!(matches!(
			Schedule::parse(&"day".into(), Some(true)),
			Err(Error::StrictDateNotMonthly)
		));
	}

	#[test]
	fn test_repeat_anchoring() {
		let now = nyc(2021, 1, 1, 12, 0);
		let sched = Schedule::Repeat(30);
		let cal = no_holidays();
		assert_eq!(
			sched.next_run(&now, None, None, &cal, 0).unwrap(),
			epoch(&now) + 30
		);
		assert_eq!(
			sched.next_run(&now, Some(epoch(&now) - 10), None, &cal, 0).unwrap(),
			epoch(&now) + 20
		);
	}

	#[test]
	fn test_one_time() {
		let now = nyc(2021, 1, 1, 12, 0);
		let cal = no_holidays();
		let future = Schedule::OneTime(civil::date(2021, 1, 2));
		assert_eq!(
			future.next_run(&now, None, at(23, 59), &cal, 0).unwrap(),
			epoch(&nyc(2021, 1, 2, 23, 59))
		);
		let past = Schedule::OneTime(civil::date(2020, 12, 31));
		assert_eq!(past.next_run(&now, None, at(23, 59), &cal, 0).unwrap(), 0);
		// a half-day grace keeps this morning's missed date live
		let missed = Schedule::OneTime(civil::date(2021, 1, 1));
		assert_eq!(
			missed
				.next_run(&now, None, at(9, 0), &cal, 12 * 60 * 60)
				.unwrap(),
			epoch(&nyc(2021, 1, 1, 9, 0))
		);
	}

	#[test]
	fn test_monthly_strict_skips_short_months() {
		let now = nyc(2021, 2, 1, 9, 0);
		let cal = no_holidays();
		let strict = Schedule::Monthly { day: 31, strict: true };
		assert_eq!(
			strict.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 3, 31, 10, 0))
		);
	}

	#[test]
	fn test_monthly_lenient_clamps_to_month_end() {
		let cal = no_holidays();
		let lenient = Schedule::Monthly { day: 31, strict: false };
		let now = nyc(2021, 2, 1, 9, 0);
		assert_eq!(
			lenient.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 2, 28, 10, 0))
		);
		// leap year
		let now = nyc(2020, 2, 1, 9, 0);
		assert_eq!(
			lenient.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2020, 2, 29, 10, 0))
		);
		// already fired this month, roll over
		let now = nyc(2021, 2, 28, 11, 0);
		assert_eq!(
			lenient.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 3, 31, 10, 0))
		);
	}

	#[test]
	fn test_daily_anchor() {
		// Friday midday
		let now = nyc(2021, 1, 1, 12, 0);
		let cal = no_holidays();
		let daily = Schedule::Daily(DayRule::Every);
		assert_eq!(
			daily.next_run(&now, None, at(23, 59), &cal, 0).unwrap(),
			epoch(&nyc(2021, 1, 1, 23, 59))
		);
		assert_eq!(
			daily.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 1, 2, 10, 0))
		);
		// within the grace window the missed anchor stays in the past
		assert_eq!(
			daily
				.next_run(&now, None, at(10, 0), &cal, 3 * 60 * 60)
				.unwrap(),
			epoch(&nyc(2021, 1, 1, 10, 0))
		);
	}

	#[test]
	fn test_weekday_anchoring() {
		// Friday, with Friday's anchor already past: lands a week out
		let now = nyc(2021, 1, 1, 12, 0);
		let cal = no_holidays();
		let fridays = Schedule::Daily(DayRule::On(Weekday::Friday));
		assert_eq!(
			fridays.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 1, 8, 10, 0))
		);
		// weekday rule skips the weekend instead
		let weekdays = Schedule::Daily(DayRule::Weekday);
		assert_eq!(
			weekdays.next_run(&now, None, at(10, 0), &cal, 0).unwrap(),
			epoch(&nyc(2021, 1, 4, 10, 0))
		);
	}

	#[test]
	fn test_businessday_skips_holidays() {
		// New Year's Day 2021 is a Friday and a federal holiday
		let now = nyc(2021, 1, 1, 9, 0);
		let sched = Schedule::Daily(DayRule::BusinessDay);
		assert_eq!(
			sched
				.next_run(&now, None, at(10, 0), &UsFederalHolidays, 0)
				.unwrap(),
			epoch(&nyc(2021, 1, 4, 10, 0))
		);
	}

	#[test]
	fn test_must_run_today() {
		let sched = Schedule::Daily(DayRule::BusinessDay);
		let cal = UsFederalHolidays;
		// Thursday and Good Friday 2020: not a federal holiday
		assert!(sched.must_run_today(civil::date(2020, 4, 9), &cal));
		assert!(sched.must_run_today(civil::date(2020, 4, 10), &cal));
		// Saturday
		assert!(!sched.must_run_today(civil::date(2020, 4, 11), &cal));
		// Independence Day 2019, a Thursday
		assert!(!sched.must_run_today(civil::date(2019, 7, 4), &cal));

		let trading = FixedHolidays::layered(
			std::sync::Arc::new(UsFederalHolidays),
			[civil::date(2020, 4, 10)],
		);
		assert!(!sched.must_run_today(civil::date(2020, 4, 10), &trading));
	}

	#[test]
	fn test_must_run_today_monthly() {
		let strict = Schedule::Monthly { day: 31, strict: true };
		let lenient = Schedule::Monthly { day: 31, strict: false };
		let cal = no_holidays();
		assert!(strict.must_run_today(civil::date(2021, 1, 31), &cal));
		assert!(!strict.must_run_today(civil::date(2021, 2, 28), &cal));
		assert!(lenient.must_run_today(civil::date(2021, 2, 28), &cal));
		assert!(!lenient.must_run_today(civil::date(2021, 2, 27), &cal));
	}
}
