// Property-based tests for date rules and holiday calendars

use chrono::{Datelike, Days, NaiveDate, TimeZone, Utc};
use engine::availability::HolidayCalendar;
use engine::models::Holiday;
use engine::rules::{dates_from, EventKind, MonthDay, Rule, RuleContext, WeekDay};
use proptest::prelude::*;
use uuid::Uuid;

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn month_day_strategy() -> impl Strategy<Value = (u32, u32)> {
    (1u32..=12, 1u32..=28)
}

fn weekday_strategy() -> impl Strategy<Value = WeekDay> {
    prop_oneof![
        Just(WeekDay::Monday),
        Just(WeekDay::Tuesday),
        Just(WeekDay::Wednesday),
        Just(WeekDay::Thursday),
        Just(WeekDay::Friday),
        Just(WeekDay::Saturday),
        Just(WeekDay::Sunday),
    ]
}

fn ctx(reference: NaiveDate) -> RuleContext {
    RuleContext {
        closed: reference,
        created: reference,
        due: reference,
    }
}

// DayInYear keeps both ends and wraps over the new year when gte > lte
#[test]
fn day_in_year_is_inclusive_and_wraps() {
    proptest!(|(
        gte in month_day_strategy(),
        lte in month_day_strategy(),
        date in date_strategy()
    )| {
        let rule = Rule::day_in_year(
            &format!("{:02}-{:02}", gte.0, gte.1),
            &format!("{:02}-{:02}", lte.0, lte.1),
        ).unwrap();
        let day = (date.month(), date.day());

        let expected = if gte <= lte {
            gte <= day && day <= lte
        } else {
            day >= gte || day <= lte
        };
        prop_assert_eq!(rule.matches(&ctx(date), date), expected);

        let start = NaiveDate::from_ymd_opt(date.year(), gte.0, gte.1).unwrap();
        let end = NaiveDate::from_ymd_opt(date.year(), lte.0, lte.1).unwrap();
        prop_assert!(rule.matches(&ctx(date), start));
        prop_assert!(rule.matches(&ctx(date), end));
    });
}

// Month-day strings round trip through parsing
#[test]
fn month_day_display_parses_back() {
    proptest!(|((m, d) in month_day_strategy())| {
        let value = MonthDay::new(m, d).unwrap();
        prop_assert_eq!(value.to_string().parse::<MonthDay>().unwrap(), value);
    });
}

// The first date let through by DayInWeek is on an allowed day within a week
#[test]
fn day_in_week_finds_an_allowed_day_within_a_week() {
    proptest!(|(
        days in prop::collection::btree_set(weekday_strategy(), 1..7),
        start in date_strategy()
    )| {
        let rule = Rule::day_in_week(days.iter().copied()).unwrap();
        let first = rule.apply(&ctx(start), dates_from(start)).next().unwrap();

        prop_assert!(days.contains(&WeekDay::from(first.weekday())));
        prop_assert!(first >= start);
        prop_assert!((first - start).num_days() < 7);
    });
}

// DaysSince starts at the later of the stream start and the event plus offset
#[test]
fn days_since_starts_at_event_plus_offset() {
    proptest!(|(
        reference in date_strategy(),
        start in date_strategy(),
        days in 0i64..400
    )| {
        let rule = Rule::days_since(EventKind::Closed, days).unwrap();
        let first = rule.apply(&ctx(reference), dates_from(start)).next().unwrap();
        let earliest = reference.checked_add_days(Days::new(days as u64)).unwrap();

        prop_assert_eq!(first, earliest.max(start));
    });
}

// Holidays block both their first and last day and nothing outside them
#[test]
fn holiday_calendar_is_inclusive() {
    proptest!(|(
        from in date_strategy(),
        length in 0u64..60,
        hour in 0u32..24
    )| {
        let to = from.checked_add_days(Days::new(length)).unwrap();
        let holiday = Holiday::new(
            Uuid::new_v4(),
            Utc.from_utc_datetime(&from.and_hms_opt(hour, 0, 0).unwrap()),
            Utc.from_utc_datetime(&to.and_hms_opt(23 - hour, 59, 0).unwrap()),
        );
        let calendar = HolidayCalendar::from_holidays(&[holiday], chrono_tz::UTC);

        prop_assert!(calendar.is_on_holiday(from));
        prop_assert!(calendar.is_on_holiday(to));
        prop_assert!(!calendar.is_on_holiday(from.pred_opt().unwrap()));
        prop_assert!(!calendar.is_on_holiday(to.succ_opt().unwrap()));
    });
}
