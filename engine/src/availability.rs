// Availability calculation for trigger candidates

use crate::errors::ConfigurationError;
use crate::models::Holiday;
use crate::rules::{apply_all, dates_from, Rule, RuleContext};
use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use tracing::debug;
use uuid::Uuid;

/// Inclusive date ranges a person is away
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    ranges: Vec<(NaiveDate, NaiveDate)>,
}

impl HolidayCalendar {
    /// Local calendar days covered by each holiday, both ends included
    pub fn from_holidays(holidays: &[Holiday], tz: Tz) -> Self {
        let ranges = holidays
            .iter()
            .map(|h| {
                (
                    h.from_time.with_timezone(&tz).date_naive(),
                    h.to_time.with_timezone(&tz).date_naive(),
                )
            })
            .filter(|(from, to)| from <= to)
            .collect();
        Self { ranges }
    }

    pub fn is_on_holiday(&self, date: NaiveDate) -> bool {
        self.ranges
            .iter()
            .any(|(from, to)| *from <= date && date <= *to)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Finds the earliest date a trigger's rules and a member's holidays allow
pub struct AvailabilityCalculator<'a> {
    trigger_id: Uuid,
    rules: &'a [Rule],
    ctx: RuleContext,
    today: NaiveDate,
    horizon_days: u32,
}

impl<'a> AvailabilityCalculator<'a> {
    pub fn new(
        trigger_id: Uuid,
        rules: &'a [Rule],
        ctx: RuleContext,
        today: NaiveDate,
        horizon_days: u32,
    ) -> Self {
        Self {
            trigger_id,
            rules,
            ctx,
            today,
            horizon_days,
        }
    }

    /// First date from `delay + 1` days after today that survives the
    /// holiday calendar and every rule. The search stops after the horizon.
    pub fn earliest_date(
        &self,
        calendar: &HolidayCalendar,
        delay: u32,
    ) -> Result<NaiveDate, ConfigurationError> {
        let exhausted = || ConfigurationError::SearchHorizonExceeded {
            trigger_id: self.trigger_id,
            horizon_days: self.horizon_days,
        };

        let start = self
            .today
            .checked_add_days(Days::new(u64::from(delay) + 1))
            .ok_or_else(exhausted)?;

        let calendar = calendar.clone();
        let candidates = dates_from(start)
            .take(self.horizon_days as usize)
            .filter(move |date| !calendar.is_on_holiday(*date));

        let found = apply_all(self.rules, &self.ctx, Box::new(candidates)).next();

        debug!(
            trigger_id = %self.trigger_id,
            start = %start,
            found = ?found,
            "Availability search finished"
        );

        found.ok_or_else(exhausted)
    }
}
