// Date filter rules attached to job triggers
//
// Rules narrow a lazy, forward-only stream of calendar dates. They compose
// left to right in the order the trigger lists them.

use crate::errors::ValidationError;
use crate::models::Job;
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Lazy sequence of consecutive candidate dates
pub type DateStream<'a> = Box<dyn Iterator<Item = NaiveDate> + Send + 'a>;

/// Upper bound on the offset a DaysSince rule may carry (about a century)
pub const MAX_DAYS_SINCE: i64 = 36_500;

static MONTH_DAY_REGEX: OnceLock<Regex> = OnceLock::new();

fn month_day_regex() -> &'static Regex {
    MONTH_DAY_REGEX.get_or_init(|| {
        // Match MM-DD
        Regex::new(r"^(\d{2})-(\d{2})$").expect("Invalid regex pattern")
    })
}

/// Every calendar date from `start` onwards
pub fn dates_from(start: NaiveDate) -> DateStream<'static> {
    Box::new(start.iter_days())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WeekDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for WeekDay {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => WeekDay::Monday,
            Weekday::Tue => WeekDay::Tuesday,
            Weekday::Wed => WeekDay::Wednesday,
            Weekday::Thu => WeekDay::Thursday,
            Weekday::Fri => WeekDay::Friday,
            Weekday::Sat => WeekDay::Saturday,
            Weekday::Sun => WeekDay::Sunday,
        }
    }
}

impl fmt::Display for WeekDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Job timestamp a DaysSince rule counts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Closed,
    Created,
    Due,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Closed => "closed",
            EventKind::Created => "created",
            EventKind::Due => "due",
        };
        f.write_str(name)
    }
}

/// Month and day without a year, written "MM-DD"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    pub fn new(month: u32, day: u32) -> Result<Self, ValidationError> {
        let max_day = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => 29,
            _ => 0,
        };
        if day == 0 || day > max_day {
            return Err(ValidationError::InvalidMonthDay {
                value: format!("{:02}-{:02}", month, day),
            });
        }
        Ok(Self { month, day })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl FromStr for MonthDay {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidMonthDay {
            value: value.to_string(),
        };
        let captures = month_day_regex().captures(value).ok_or_else(invalid)?;
        let month = captures[1].parse::<u32>().map_err(|_| invalid())?;
        let day = captures[2].parse::<u32>().map_err(|_| invalid())?;
        MonthDay::new(month, day).map_err(|_| invalid())
    }
}

impl TryFrom<String> for MonthDay {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthDay> for String {
    fn from(value: MonthDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// Reference dates of the job a rule is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleContext {
    pub closed: NaiveDate,
    pub created: NaiveDate,
    pub due: NaiveDate,
}

impl RuleContext {
    /// Local dates of the job's timestamps; unset timestamps read as `now`
    pub fn for_job(job: &Job, now: DateTime<Utc>, tz: Tz) -> Self {
        let local = |at: DateTime<Utc>| at.with_timezone(&tz).date_naive();
        Self {
            closed: local(job.closed_date.unwrap_or(now)),
            created: local(job.created_date),
            due: local(job.due_date.unwrap_or(now)),
        }
    }

    pub fn reference(&self, event: EventKind) -> NaiveDate {
        match event {
            EventKind::Closed => self.closed,
            EventKind::Created => self.created,
            EventKind::Due => self.due,
        }
    }
}

/// A validated date filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule", into = "RawRule")]
pub enum Rule {
    /// Dates falling on one of the listed weekdays
    DayInWeek { days: BTreeSet<WeekDay> },
    /// Dates on or after the job event plus `days`
    DaysSince { event: EventKind, days: i64 },
    /// Dates inside an inclusive month-day range, wrapping over new year when gte > lte
    DayInYear { gte: MonthDay, lte: MonthDay },
}

/// Stored form of a rule: a type tag plus its JSON parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRule {
    pub rule_type: String,
    pub params: serde_json::Value,
}

#[derive(Deserialize)]
struct DayInWeekParams {
    days: Vec<WeekDay>,
}

#[derive(Deserialize)]
struct DaysSinceParams {
    event: EventKind,
    days: i64,
}

#[derive(Deserialize)]
struct DayInYearParams {
    gte: String,
    lte: String,
}

impl Rule {
    pub const DAY_IN_WEEK: &'static str = "DayInWeek";
    pub const DAYS_SINCE: &'static str = "DaysSince";
    pub const DAY_IN_YEAR: &'static str = "DayInYear";

    /// Build a rule from its type tag and parameter payload
    pub fn from_parts(rule_type: &str, params: serde_json::Value) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidRuleParams {
            rule_type: rule_type.to_string(),
            reason,
        };

        match rule_type {
            Self::DAY_IN_WEEK => {
                let parsed: DayInWeekParams =
                    serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
                Rule::day_in_week(parsed.days)
            }
            Self::DAYS_SINCE => {
                let parsed: DaysSinceParams =
                    serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
                Rule::days_since(parsed.event, parsed.days)
            }
            Self::DAY_IN_YEAR => {
                let parsed: DayInYearParams =
                    serde_json::from_value(params).map_err(|e| invalid(e.to_string()))?;
                Ok(Rule::DayInYear {
                    gte: parsed.gte.parse()?,
                    lte: parsed.lte.parse()?,
                })
            }
            other => Err(ValidationError::UnknownRuleType(other.to_string())),
        }
    }

    pub fn day_in_week(days: impl IntoIterator<Item = WeekDay>) -> Result<Self, ValidationError> {
        let days: BTreeSet<WeekDay> = days.into_iter().collect();
        if days.is_empty() {
            return Err(ValidationError::InvalidRuleParams {
                rule_type: Self::DAY_IN_WEEK.to_string(),
                reason: "at least one day is required".to_string(),
            });
        }
        Ok(Rule::DayInWeek { days })
    }

    pub fn days_since(event: EventKind, days: i64) -> Result<Self, ValidationError> {
        if days.abs() > MAX_DAYS_SINCE {
            return Err(ValidationError::InvalidRuleParams {
                rule_type: Self::DAYS_SINCE.to_string(),
                reason: format!("days must be within {} of the event", MAX_DAYS_SINCE),
            });
        }
        Ok(Rule::DaysSince { event, days })
    }

    pub fn day_in_year(gte: &str, lte: &str) -> Result<Self, ValidationError> {
        Ok(Rule::DayInYear {
            gte: gte.parse()?,
            lte: lte.parse()?,
        })
    }

    pub fn rule_type(&self) -> &'static str {
        match self {
            Rule::DayInWeek { .. } => Self::DAY_IN_WEEK,
            Rule::DaysSince { .. } => Self::DAYS_SINCE,
            Rule::DayInYear { .. } => Self::DAY_IN_YEAR,
        }
    }

    pub fn params(&self) -> serde_json::Value {
        match self {
            Rule::DayInWeek { days } => serde_json::json!({ "days": days }),
            Rule::DaysSince { event, days } => serde_json::json!({ "event": event, "days": days }),
            Rule::DayInYear { gte, lte } => {
                serde_json::json!({ "gte": gte.to_string(), "lte": lte.to_string() })
            }
        }
    }

    /// Human readable description of what the rule lets through
    pub fn summary(&self) -> String {
        match self {
            Rule::DayInWeek { days } => {
                let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                format!("Only on {}", names.join(", "))
            }
            Rule::DaysSince { event, days } => {
                format!("At least {} days after the job is {}", days, event)
            }
            Rule::DayInYear { gte, lte } if gte > lte => {
                format!("Between {} and {}, wrapping over the new year", gte, lte)
            }
            Rule::DayInYear { gte, lte } => format!("Between {} and {}", gte, lte),
        }
    }

    pub fn matches(&self, ctx: &RuleContext, date: NaiveDate) -> bool {
        match self {
            Rule::DayInWeek { days } => days.contains(&WeekDay::from(date.weekday())),
            Rule::DaysSince { event, days } => {
                offset_days(ctx.reference(*event), *days).map_or(false, |earliest| date >= earliest)
            }
            Rule::DayInYear { gte, lte } => {
                let day = MonthDay::of(date);
                if gte <= lte {
                    *gte <= day && day <= *lte
                } else {
                    day >= *gte || day <= *lte
                }
            }
        }
    }

    /// Wrap `dates` in this rule's filter
    pub fn apply<'a>(&self, ctx: &RuleContext, dates: DateStream<'a>) -> DateStream<'a> {
        let rule = self.clone();
        let ctx = *ctx;
        Box::new(dates.filter(move |date| rule.matches(&ctx, *date)))
    }
}

fn offset_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

impl TryFrom<RawRule> for Rule {
    type Error = ValidationError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        Rule::from_parts(&raw.rule_type, raw.params)
    }
}

impl From<Rule> for RawRule {
    fn from(rule: Rule) -> Self {
        RawRule {
            rule_type: rule.rule_type().to_string(),
            params: rule.params(),
        }
    }
}

/// Outcome of validating a rule, shaped for an API response field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleValidation {
    pub ok: bool,
    pub message: String,
}

/// Validate a stored rule without raising; the message is the rule summary
/// on success and the validation error otherwise
pub fn validate_rule(rule_type: &str, params: &serde_json::Value) -> RuleValidation {
    match Rule::from_parts(rule_type, params.clone()) {
        Ok(rule) => RuleValidation {
            ok: true,
            message: rule.summary(),
        },
        Err(e) => RuleValidation {
            ok: false,
            message: e.to_string(),
        },
    }
}

/// Thread `dates` through every rule in order
pub fn apply_all<'a>(rules: &[Rule], ctx: &RuleContext, dates: DateStream<'a>) -> DateStream<'a> {
    rules
        .iter()
        .fold(dates, |stream, rule| rule.apply(ctx, stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ctx_closed(closed: NaiveDate) -> RuleContext {
        RuleContext {
            closed,
            created: closed,
            due: closed,
        }
    }

    #[test]
    fn test_month_day_parsing() {
        assert_eq!("11-01".parse::<MonthDay>().unwrap(), MonthDay::new(11, 1).unwrap());
        assert!("02-29".parse::<MonthDay>().is_ok());
        assert!("02-30".parse::<MonthDay>().is_err());
        assert!("13-01".parse::<MonthDay>().is_err());
        assert!("1-01".parse::<MonthDay>().is_err());
        assert!("aa-bb".parse::<MonthDay>().is_err());
    }

    #[test]
    fn test_day_in_week_rejects_empty_set() {
        let result = Rule::from_parts("DayInWeek", json!({ "days": [] }));
        assert!(matches!(result, Err(ValidationError::InvalidRuleParams { .. })));
    }

    #[test]
    fn test_day_in_week_filters_weekdays() {
        let rule = Rule::from_parts("DayInWeek", json!({ "days": ["Monday", "Friday"] })).unwrap();
        let ctx = ctx_closed(date(2023, 1, 1));
        // 2023-01-01 is a Sunday
        let found: Vec<NaiveDate> = rule.apply(&ctx, dates_from(date(2023, 1, 1))).take(3).collect();
        assert_eq!(found, vec![date(2023, 1, 2), date(2023, 1, 6), date(2023, 1, 9)]);
    }

    #[test]
    fn test_days_since_closed() {
        let rule = Rule::from_parts("DaysSince", json!({ "event": "closed", "days": 4 })).unwrap();
        let ctx = ctx_closed(date(2023, 1, 1));
        let first = rule.apply(&ctx, dates_from(date(2023, 1, 2))).next();
        assert_eq!(first, Some(date(2023, 1, 5)));
    }

    #[test]
    fn test_days_since_rejects_unknown_event() {
        let result = Rule::from_parts("DaysSince", json!({ "event": "opened", "days": 4 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_day_in_year_wraps_over_new_year() {
        let rule = Rule::day_in_year("11-01", "03-31").unwrap();
        let ctx = ctx_closed(date(2023, 1, 1));
        assert!(rule.matches(&ctx, date(2023, 12, 25)));
        assert!(rule.matches(&ctx, date(2023, 11, 1)));
        assert!(rule.matches(&ctx, date(2023, 3, 31)));
        assert!(!rule.matches(&ctx, date(2023, 6, 15)));
        assert!(!rule.matches(&ctx, date(2023, 4, 1)));
    }

    #[test]
    fn test_day_in_year_inner_range_is_inclusive() {
        let rule = Rule::day_in_year("06-01", "06-30").unwrap();
        let ctx = ctx_closed(date(2023, 1, 1));
        assert!(rule.matches(&ctx, date(2023, 6, 1)));
        assert!(rule.matches(&ctx, date(2023, 6, 30)));
        assert!(!rule.matches(&ctx, date(2023, 7, 1)));
    }

    #[test]
    fn test_rules_compose_in_order() {
        let rules = vec![
            Rule::days_since(EventKind::Closed, 4).unwrap(),
            Rule::day_in_week([WeekDay::Saturday]).unwrap(),
        ];
        let ctx = ctx_closed(date(2023, 1, 1));
        let first = apply_all(&rules, &ctx, dates_from(date(2023, 1, 2))).next();
        assert_eq!(first, Some(date(2023, 1, 7)));
    }

    #[test]
    fn test_rule_serde_uses_tag_and_params() {
        let rule = Rule::days_since(EventKind::Closed, 4).unwrap();
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            value,
            json!({ "rule_type": "DaysSince", "params": { "event": "closed", "days": 4 } })
        );
        let parsed: Rule = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, rule);
    }

    #[test]
    fn test_validate_rule_reports_instead_of_failing() {
        let bad = validate_rule("DayInYear", &json!({ "gte": "13-40", "lte": "01-01" }));
        assert!(!bad.ok);
        assert!(bad.message.contains("13-40"));

        let unknown = validate_rule("Fortnightly", &json!({}));
        assert!(!unknown.ok);

        let good = validate_rule("DayInYear", &json!({ "gte": "11-01", "lte": "03-31" }));
        assert!(good.ok);
        assert_eq!(good.message, "Between 11-01 and 03-31, wrapping over the new year");
    }

    #[test]
    fn test_rule_context_falls_back_to_now() {
        let now = "2023-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let job = Job::one_off(uuid::Uuid::new_v4(), "Hoover", 5, uuid::Uuid::new_v4(), now);
        let ctx = RuleContext::for_job(&job, now, chrono_tz::UTC);
        assert_eq!(ctx.closed, date(2023, 1, 1));
        assert_eq!(ctx.due, date(2023, 1, 1));
    }
}
