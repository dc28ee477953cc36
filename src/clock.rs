use chrono::{Datelike, Local, NaiveDate};

/// Source of "today" for date validation and age computation.
pub trait Clock: Send + Sync + 'static {
	fn today(&self) -> NaiveDate;
}

/// Wall clock in the server's local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn today(&self) -> NaiveDate {
		Local::now().date_naive()
	}
}

/// A clock pinned to a single date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
	fn today(&self) -> NaiveDate {
		self.0
	}
}

/// Whole years elapsed between `born` and `today`; zero for future dates.
pub fn age_in_years(born: NaiveDate, today: NaiveDate) -> i32 {
	let mut age = today.year() - born.year();
	if (today.month(), today.day()) < (born.month(), born.day()) {
		age -= 1;
	}
	age.max(0)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use chrono::NaiveDate;

	use super::age_in_years;

	fn d(y: i32, m: u32, day: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(y, m, day).unwrap()
	}

	#[test]
	fn age_counts_completed_years_only() {
		assert_eq!(age_in_years(d(2020, 6, 15), d(2024, 6, 14)), 3);
		assert_eq!(age_in_years(d(2020, 6, 15), d(2024, 6, 15)), 4);
		assert_eq!(age_in_years(d(2024, 1, 1), d(2024, 1, 1)), 0);
	}

	#[test]
	fn age_never_negative() {
		assert_eq!(age_in_years(d(2030, 1, 1), d(2024, 1, 1)), 0);
	}
}
