//! Activity record and weighted time distribution rules.
//!
//! # Invariants
//! - `duration_hours` lies in `(0, MAX_ACTIVITY_DURATION_HOURS]`.
//! - Weights are in `(0, 1]` and sum to 1 within `WEIGHT_SUM_TOLERANCE`.
//! - A skill appears at most once per activity.
//! - A skill's share is `contribution_units(duration, weight)`; the same
//!   integer is added on apply and subtracted on reversal.

use super::skill::SkillId;
use super::user::UserId;
use super::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type ActivityId = Uuid;

pub const MAX_ACTIVITY_DURATION_HOURS: f64 = 12.0;
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
/// Fixed-point scale for aggregate time (one unit is a nano-hour).
pub const TIME_UNITS_PER_HOUR: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedSkill {
    pub skill_id: SkillId,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: ActivityId,
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    pub duration: f64,
    /// Caller-supplied order is preserved.
    pub weighted_skills: Vec<WeightedSkill>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Activity {
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        description: impl Into<String>,
        duration: f64,
        weighted_skills: Vec<WeightedSkill>,
    ) -> Self {
        let now = super::now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: description.into(),
            duration,
            weighted_skills,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the duration and weight rules.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_duration(self.duration)?;
        validate_weighted_skills(&self.weighted_skills)
    }

    /// Per-skill contributions this activity applies, in list order.
    pub fn contributions(&self) -> Vec<(SkillId, i64)> {
        self.weighted_skills
            .iter()
            .map(|entry| {
                (
                    entry.skill_id,
                    contribution_units(self.duration, entry.weight),
                )
            })
            .collect()
    }
}

pub fn validate_duration(duration: f64) -> Result<(), ValidationError> {
    if !duration.is_finite() || duration <= 0.0 || duration > MAX_ACTIVITY_DURATION_HOURS {
        return Err(ValidationError::OutOfRange {
            field: "duration",
            value: duration,
        });
    }
    Ok(())
}

pub fn validate_weighted_skills(weighted_skills: &[WeightedSkill]) -> Result<(), ValidationError> {
    if weighted_skills.is_empty() {
        return Err(ValidationError::NoWeightedSkills);
    }

    let mut seen = HashSet::new();
    let mut sum = 0.0;
    for entry in weighted_skills {
        if !entry.weight.is_finite() || entry.weight <= 0.0 || entry.weight > 1.0 {
            return Err(ValidationError::OutOfRange {
                field: "weight",
                value: entry.weight,
            });
        }
        if !seen.insert(entry.skill_id) {
            return Err(ValidationError::DuplicateSkill(entry.skill_id));
        }
        sum += entry.weight;
    }

    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ValidationError::WeightSum(sum));
    }
    Ok(())
}

/// Exact integer share of `duration` attributed at `weight`.
pub fn contribution_units(duration: f64, weight: f64) -> i64 {
    (duration * weight * TIME_UNITS_PER_HOUR as f64).round() as i64
}

pub fn units_to_hours(units: i64) -> f64 {
    units as f64 / TIME_UNITS_PER_HOUR as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted(weight: f64) -> WeightedSkill {
        WeightedSkill {
            skill_id: Uuid::new_v4(),
            weight,
        }
    }

    #[test]
    fn duration_bounds_are_exclusive_zero_inclusive_twelve() {
        assert!(validate_duration(0.0).is_err());
        assert!(validate_duration(-1.0).is_err());
        assert!(validate_duration(12.5).is_err());
        assert!(validate_duration(f64::NAN).is_err());
        assert!(validate_duration(12.0).is_ok());
        assert!(validate_duration(0.25).is_ok());
    }

    #[test]
    fn weights_must_sum_to_one_within_tolerance() {
        assert!(validate_weighted_skills(&[weighted(0.3), weighted(0.7)]).is_ok());
        assert!(
            validate_weighted_skills(&[weighted(1.0 / 3.0), weighted(1.0 / 3.0), weighted(1.0 / 3.0)])
                .is_ok()
        );
        assert!(matches!(
            validate_weighted_skills(&[weighted(0.5), weighted(0.4)]),
            Err(ValidationError::WeightSum(_))
        ));
        assert!(matches!(
            validate_weighted_skills(&[weighted(0.5), weighted(0.500_01)]),
            Err(ValidationError::WeightSum(_))
        ));
    }

    #[test]
    fn weights_must_be_positive_unique_and_present() {
        assert_eq!(
            validate_weighted_skills(&[]),
            Err(ValidationError::NoWeightedSkills)
        );
        assert!(matches!(
            validate_weighted_skills(&[weighted(0.0), weighted(1.0)]),
            Err(ValidationError::OutOfRange { field: "weight", .. })
        ));
        let repeated = weighted(0.5);
        assert_eq!(
            validate_weighted_skills(&[repeated, repeated]),
            Err(ValidationError::DuplicateSkill(repeated.skill_id))
        );
    }

    #[test]
    fn contributions_convert_back_to_exact_hours() {
        assert_eq!(units_to_hours(contribution_units(2.0, 1.0)), 2.0);
        assert_eq!(units_to_hours(contribution_units(4.0, 0.5)), 2.0);
        assert_eq!(contribution_units(1.5, 0.25), 375_000_000);
    }
}
