//! Property tests for month window resolution

use chrono::{Datelike, Months, NaiveDate};
use monthly_invoices::window::{DateWindow, FixedClock, MAX_YEAR, MIN_YEAR};
use proptest::prelude::*;

proptest! {
    #[test]
    fn window_covers_exactly_one_month(year in MIN_YEAR..MAX_YEAR, month in 1u32..=12) {
        let window = DateWindow::for_month(year, month).unwrap();

        prop_assert!(window.start() < window.end());
        prop_assert_eq!(window.start().day(), 1);
        prop_assert_eq!(window.end().day(), 1);
        prop_assert_eq!(window.start().month(), month);
        prop_assert_eq!(window.start().checked_add_months(Months::new(1)), Some(window.end()));
        prop_assert!((28..=31).contains(&window.days()));
    }

    #[test]
    fn december_rolls_into_next_year(year in MIN_YEAR..MAX_YEAR) {
        let window = DateWindow::for_month(year, 12).unwrap();
        prop_assert_eq!(window.end().year(), year + 1);
        prop_assert_eq!(window.end().month(), 1);
    }

    #[test]
    fn every_day_of_the_month_is_inside(year in MIN_YEAR..MAX_YEAR, month in 1u32..=12, day in 1u32..=31) {
        let window = DateWindow::for_month(year, month).unwrap();
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            prop_assert!(window.contains(date));
        }
        prop_assert!(!window.contains(window.end()));
    }

    #[test]
    fn out_of_range_month_is_rejected(year in MIN_YEAR..MAX_YEAR, month in 13u32..1000) {
        prop_assert!(DateWindow::for_month(year, month).is_err());
        prop_assert!(DateWindow::for_month(year, 0).is_err());
    }

    #[test]
    fn default_window_contains_today(year in MIN_YEAR..MAX_YEAR, ordinal in 1u32..=365) {
        let today = NaiveDate::from_yo_opt(year, ordinal).unwrap();
        let window = DateWindow::resolve(None, None, &FixedClock(today)).unwrap();
        prop_assert!(window.contains(today));
        prop_assert_eq!(window.label(), today.format("%m_%Y").to_string());
    }
}
