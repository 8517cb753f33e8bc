// Weighted assignee selection
//
// Scores every candidate on a random draw plus its normalised team and job
// credit balances; the lowest score wins. The Markdown transcript written here
// is stored on the job verbatim and must stay byte-stable.

use crate::errors::ConfigurationError;
use crate::models::{HolidayPolicy, Team};
use chrono::NaiveDate;
use std::fmt::Write as _;
use uuid::Uuid;

/// Everything the scorer needs to know about one team member
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateInput {
    pub membership_id: Uuid,
    pub display_name: String,
    pub available_date: NaiveDate,
    /// Credit earned across all jobs of the team
    pub team_balance: i64,
    /// Credit earned on jobs of the config being scheduled
    pub job_balance: i64,
    /// Uniform draw in [0, 1)
    pub random_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub membership_id: Uuid,
    pub display_name: String,
    pub available_date: NaiveDate,
    pub random_value: f64,
    pub normed_team_balance: f64,
    pub normed_job_balance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct AssignmentRequest<'a> {
    pub team: &'a Team,
    /// Name of the config the new job is created from. Heads the transcript
    /// and labels the job balance, which is summed over that same config
    /// rather than the source job's.
    pub job_name: &'a str,
    pub urgent: bool,
}

/// Result of a scoring run
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub membership_id: Uuid,
    pub available_date: NaiveDate,
    pub explanation: String,
    /// Candidates that reached scoring, in input order
    pub scored: Vec<ScoredCandidate>,
}

/// `min(1, (v - min(values)) / max_diff)` for each value
pub fn normalise(values: &[i64], max_diff: u32) -> Vec<f64> {
    let Some(min_value) = values.iter().copied().min() else {
        return Vec::new();
    };
    values
        .iter()
        .map(|v| ((v - min_value) as f64 / f64::from(max_diff)).min(1.0))
        .collect()
}

/// Pick the assignee for a new job and write the audit transcript
pub fn assign(
    request: &AssignmentRequest<'_>,
    candidates: Vec<CandidateInput>,
) -> Result<Assignment, ConfigurationError> {
    let team = request.team;
    let policy = &team.policy;

    if candidates.is_empty() {
        return Err(ConfigurationError::NoCandidates { team_id: team.id });
    }
    if policy.max_team_diff == 0 || policy.max_job_diff == 0 {
        return Err(ConfigurationError::InvalidPolicy {
            team_id: team.id,
            reason: "credit difference caps must be greater than 0".to_string(),
        });
    }

    let mut explanation = format!("# Scheduling {}\n", request.job_name);
    for candidate in &candidates {
        let _ = write!(
            explanation,
            "\n## {}\n\n\
             - Available from: {}\n\
             - Has {} credit on job {}\n\
             - Has {} credit in team {}\n\
             - Gets {:.2} random value\n",
            candidate.display_name,
            candidate.available_date,
            candidate.job_balance,
            request.job_name,
            candidate.team_balance,
            team.name,
            candidate.random_value,
        );
    }

    let team_balances: Vec<i64> = candidates.iter().map(|c| c.team_balance).collect();
    let job_balances: Vec<i64> = candidates.iter().map(|c| c.job_balance).collect();
    let normed_team = normalise(&team_balances, policy.max_team_diff);
    let normed_job = normalise(&job_balances, policy.max_job_diff);

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .zip(normed_team.into_iter().zip(normed_job))
        .map(|(candidate, (normed_team_balance, normed_job_balance))| {
            let score = candidate.random_value * f64::from(policy.random_weight)
                + normed_team_balance * f64::from(policy.team_credit_weight)
                + normed_job_balance * f64::from(policy.job_credit_weight);
            ScoredCandidate {
                membership_id: candidate.membership_id,
                display_name: candidate.display_name,
                available_date: candidate.available_date,
                random_value: candidate.random_value,
                normed_team_balance,
                normed_job_balance,
                score,
            }
        })
        .collect();

    if request.urgent || policy.when_on_holiday == HolidayPolicy::FindOther {
        if let Some(earliest) = scored.iter().map(|c| c.available_date).min() {
            let before = scored.len();
            scored.retain(|c| c.available_date == earliest);
            if scored.len() < before {
                explanation.push_str(
                    "\n## Availability\n\nSome candidates were removed due to lack of availability.\n",
                );
            }
        }
    }

    explanation.push_str(
        "\n## Scoring\n\n| Candidate | Random | Team | Job | Score |\n| - | - | - | - | - |\n",
    );
    for candidate in &scored {
        let _ = writeln!(
            explanation,
            "| {} |{:.2} * {} |{:.2} * {} |{:.2} * {} |{:.2} |",
            candidate.display_name,
            candidate.random_value,
            policy.random_weight,
            candidate.normed_team_balance,
            policy.team_credit_weight,
            candidate.normed_job_balance,
            policy.job_credit_weight,
            candidate.score,
        );
    }

    // First minimum wins ties
    let selected = scored
        .iter()
        .fold(None::<&ScoredCandidate>, |best, c| match best {
            Some(b) if b.score <= c.score => Some(b),
            _ => Some(c),
        })
        .ok_or(ConfigurationError::NoCandidates { team_id: team.id })?;

    let _ = write!(
        explanation,
        "\n## Result\n\n{} is selected.\n",
        selected.display_name
    );
    let membership_id = selected.membership_id;
    let available_date = selected.available_date;

    Ok(Assignment {
        membership_id,
        available_date,
        explanation,
        scored,
    })
}
