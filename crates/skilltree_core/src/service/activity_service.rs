//! Activity aggregation use-case service.
//!
//! # Responsibility
//! - Validate activities (duration range, weight rules) before persistence.
//! - Route every create, patch and delete through the repository's atomic
//!   apply/reverse of skill contributions.
//! - Summarize recent activity per day, with the current streak.
//!
//! # Invariants
//! - Accepted weights are in `(0, 1]`, unique per skill and sum to 1 within
//!   `WEIGHT_SUM_TOLERANCE`.
//! - A rejected write leaves every skill aggregate untouched.

use super::{record, EntityRef};
use crate::error::{EngineError, EngineResult};
use crate::model::activity::{Activity, WeightedSkill};
use crate::model::patch::{decode_patch, ActivityPatch};
use crate::model::recent::{day_start_ms, window_start, RecentActivity, MAX_RECENT_DAYS};
use crate::model::user::UserId;
use crate::model::validation::{
    optional_text, required_text, ValidationError, MAX_DESCRIPTION_CHARS, MAX_LABEL_CHARS,
};
use crate::repo::activity_repo::ActivityRepository;
use chrono::{NaiveDate, Utc};
use log::debug;
use serde_json::Value;
use std::time::Instant;

pub struct ActivityAggregator<R: ActivityRepository> {
    repo: R,
}

impl<R: ActivityRepository> ActivityAggregator<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Logs an activity and adds `duration × weight` to every weighted skill.
    ///
    /// Skills may span several trees of the same owner.
    pub fn create_activity(
        &self,
        owner: UserId,
        name: &str,
        description: &str,
        duration: f64,
        weighted_skills: Vec<WeightedSkill>,
    ) -> EngineResult<Activity> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Activity> {
            let activity = Activity::new(
                owner,
                required_text("name", name, MAX_LABEL_CHARS)?,
                normalize_description(description)?,
                duration,
                weighted_skills,
            );
            activity.validate()?;
            self.repo.create_activity(owner, &activity)?;
            debug!(
                "event=activity_create module=aggregator status=applied activity_id={} skills={}",
                activity.id,
                activity.weighted_skills.len()
            );
            Ok(activity)
        })();
        record("activity_create", "aggregator", started_at, result)
    }

    pub fn get_activity(
        &self,
        owner: UserId,
        activity_id: impl EntityRef,
    ) -> EngineResult<Activity> {
        let activity_id = activity_id.resolve("activity")?;
        self.repo
            .get_activity(owner, activity_id)?
            .ok_or_else(|| EngineError::not_found("activity", activity_id))
    }

    /// Owned activities, newest first.
    pub fn list_activities(&self, owner: UserId) -> EngineResult<Vec<Activity>> {
        Ok(self.repo.list_activities(owner, None)?)
    }

    /// Owned activities weighting `skill_id`, newest first.
    pub fn list_skill_activities(
        &self,
        owner: UserId,
        skill_id: impl EntityRef,
    ) -> EngineResult<Vec<Activity>> {
        let skill_id = skill_id.resolve("skill")?;
        Ok(self.repo.list_activities(owner, Some(skill_id))?)
    }

    /// Applies a merge patch of `name`, `description`, `duration` and
    /// `weightedSkills` to the stored activity inside one write transaction.
    ///
    /// When duration or weights change, the previous contribution is reversed
    /// and the new one applied in the same transaction.
    pub fn patch_activity(
        &self,
        owner: UserId,
        activity_id: impl EntityRef,
        patch: Value,
    ) -> EngineResult<Activity> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<Activity> {
            let patch: ActivityPatch = decode_patch(patch)?;
            let activity_id = activity_id.resolve("activity")?;
            let (activity, reaggregated) =
                self.repo.update_activity(owner, activity_id, |activity| {
                    if let Some(name) = patch.name {
                        activity.name = required_text("name", &name, MAX_LABEL_CHARS)?;
                    }
                    if let Some(description) = patch.description {
                        activity.description = normalize_description(&description)?;
                    }
                    if let Some(duration) = patch.duration {
                        activity.duration = duration;
                    }
                    if let Some(weighted_skills) = patch.weighted_skills {
                        activity.weighted_skills = weighted_skills;
                    }
                    activity.validate()?;
                    activity.updated_at = crate::model::now_epoch_ms();
                    Ok(())
                })?;
            debug!(
                "event=activity_patch module=aggregator status=applied activity_id={} reaggregated={}",
                activity.id, reaggregated
            );
            Ok(activity)
        })();
        record("activity_patch", "aggregator", started_at, result)
    }

    /// Reverses the activity's contribution, then removes it.
    pub fn delete_activity(&self, owner: UserId, activity_id: impl EntityRef) -> EngineResult<()> {
        let started_at = Instant::now();
        let result = (|| -> EngineResult<()> {
            let activity_id = activity_id.resolve("activity")?;
            self.repo.delete_activity(owner, activity_id)?;
            Ok(())
        })();
        record("activity_delete", "aggregator", started_at, result)
    }

    /// Removes every activity of `owner`, reversing each contribution.
    pub fn delete_all_activities(&self, owner: UserId) -> EngineResult<usize> {
        let started_at = Instant::now();
        let result = self.repo.delete_all_activities(owner).map_err(Into::into);
        record("activity_delete_all", "aggregator", started_at, result)
    }

    /// Per-day counts and streak over the last `days` UTC days, today included.
    pub fn recent_activity(&self, owner: UserId, days: u32) -> EngineResult<RecentActivity> {
        self.recent_activity_until(owner, days, Utc::now().date_naive())
    }

    /// Like [`Self::recent_activity`], with an explicit last day.
    pub fn recent_activity_until(
        &self,
        owner: UserId,
        days: u32,
        today: NaiveDate,
    ) -> EngineResult<RecentActivity> {
        if days == 0 || days > MAX_RECENT_DAYS {
            return Err(ValidationError::OutOfRange {
                field: "days",
                value: f64::from(days),
            }
            .into());
        }
        let since = day_start_ms(window_start(today, days));
        let created_at = self.repo.activity_times_since(owner, since)?;
        Ok(RecentActivity::summarize(created_at, today, days))
    }
}

fn normalize_description(description: &str) -> Result<String, ValidationError> {
    Ok(optional_text("description", Some(description), MAX_DESCRIPTION_CHARS)?.unwrap_or_default())
}
