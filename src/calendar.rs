//! Holiday calendars used by `businessday` schedules.
//!
//! A calendar is just an is-holiday predicate over civil dates. The default
//! is the US federal calendar with observed-day shifting; custom sets can be
//! layered on top of any base calendar for things like exchange closures.

use jiff::civil::{self, Date, Weekday};
use std::{collections::BTreeSet, fmt, sync::Arc};

/// An opaque is-holiday predicate.
pub trait HolidayCalendar: Send + Sync + fmt::Debug {
	fn is_holiday(&self, date: Date) -> bool;
}

/// Nth occurrence of a weekday within a month, e.g. the 3rd Monday of January.
fn nth_weekday(year: i16, month: i8, weekday: Weekday, nth: i8) -> Date {
	let first = civil::date(year, month, 1);
	let offset =
		(weekday.to_monday_zero_offset() - first.weekday().to_monday_zero_offset()).rem_euclid(7);
	civil::date(year, month, 1 + offset + (nth - 1) * 7)
}

/// Last occurrence of a weekday within a month, e.g. the last Monday of May.
fn last_weekday(year: i16, month: i8, weekday: Weekday) -> Date {
	let last = civil::date(year, month, 1).last_of_month();
	let offset =
		(last.weekday().to_monday_zero_offset() - weekday.to_monday_zero_offset()).rem_euclid(7);
	civil::date(year, month, last.day() - offset)
}

/// Shift a fixed-date holiday to its observed day: Saturday observes on the
/// preceding Friday, Sunday on the following Monday.
fn observed(date: Date) -> Date {
	match date.weekday() {
		// unwraps are safe - civil dates nowhere near the representable range
		Weekday::Saturday => date.yesterday().unwrap(),
		Weekday::Sunday => date.tomorrow().unwrap(),
		_ => date,
	}
}

/// The eleven US federal holidays, on their observed days.
#[derive(Clone, Copy, Debug, Default)]
pub struct UsFederalHolidays;

impl UsFederalHolidays {
	fn observed_in(year: i16) -> Vec<Date> {
		let mut days = vec![
			observed(civil::date(year, 1, 1)),
			nth_weekday(year, 1, Weekday::Monday, 3),
			nth_weekday(year, 2, Weekday::Monday, 3),
			last_weekday(year, 5, Weekday::Monday),
			observed(civil::date(year, 7, 4)),
			nth_weekday(year, 9, Weekday::Monday, 1),
			nth_weekday(year, 10, Weekday::Monday, 2),
			observed(civil::date(year, 11, 11)),
			nth_weekday(year, 11, Weekday::Thursday, 4),
			observed(civil::date(year, 12, 25)),
		];
		// Juneteenth became a federal holiday in 2021
		if year >= 2021 {
			days.push(observed(civil::date(year, 6, 19)));
		}
		days
	}
}

impl HolidayCalendar for UsFederalHolidays {
	fn is_holiday(&self, date: Date) -> bool {
		Self::observed_in(date.year()).contains(&date)
			// next year's New Year observed on Dec 31
			|| observed(civil::date(date.year() + 1, 1, 1)) == date
	}
}

/// An explicit set of holiday dates, optionally layered over a base calendar.
///
/// ```rust
/// use duty::{FixedHolidays, HolidayCalendar, UsFederalHolidays};
/// use jiff::civil::date;
/// use std::sync::Arc;
///
/// // US federal closures plus Good Friday, as an exchange would observe
/// let trading = FixedHolidays::layered(
/// 	Arc::new(UsFederalHolidays),
/// 	[date(2020, 4, 10)],
/// );
/// assert!(trading.is_holiday(date(2020, 4, 10)));
/// assert!(trading.is_holiday(date(2020, 12, 25)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct FixedHolidays {
	dates: BTreeSet<Date>,
	base: Option<Arc<dyn HolidayCalendar>>,
}

impl FixedHolidays {
	pub fn new(dates: impl IntoIterator<Item = Date>) -> Self {
		Self {
			dates: dates.into_iter().collect(),
			base: None,
		}
	}

	/// Extend `base` with extra closure dates.
	pub fn layered(
		base: Arc<dyn HolidayCalendar>,
		dates: impl IntoIterator<Item = Date>,
	) -> Self {
		Self {
			dates: dates.into_iter().collect(),
			base: Some(base),
		}
	}

	pub fn insert(&mut self, date: Date) {
		self.dates.insert(date);
	}
}

impl HolidayCalendar for FixedHolidays {
	fn is_holiday(&self, date: Date) -> bool {
		self.dates.contains(&date)
			|| self
				.base
				.as_ref()
				.is_some_and(|base| base.is_holiday(date))
	}
}
