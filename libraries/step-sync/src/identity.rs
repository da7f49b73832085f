//! Once-per-day username changes.
//!
//! A player may switch Minecraft usernames once per reference day. Asking again on the same day
//! queues the new name; it is promoted automatically once a later reference day starts, so a
//! typo fix does not require the player to come back and confirm it.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::SyncError;
use crate::clock::{Clock, reference_day};
use crate::profile::{LocalProfile, ProfileStore};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeResult {
    /// The new name is active now.
    Applied,
    /// The new name waits for the next reset after `queued_on`.
    Queued { queued_on: NaiveDate },
    /// The name is already active. Any queued change was dropped.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChange {
    pub username: String,
    pub queued_on: NaiveDate,
}

impl LocalProfile {
    pub fn can_change_on(&self, today: NaiveDate) -> bool {
        self.last_username_change_day != Some(today)
    }

    pub fn request_change_on(&mut self, new_username: &str, today: NaiveDate) -> ChangeResult {
        if self.minecraft_username == new_username {
            self.clear_queue();
            return ChangeResult::Unchanged;
        }

        // The first username picked during onboarding counts as the day's change too.
        if self.can_change_on(today) {
            self.minecraft_username = new_username.to_string();
            self.last_username_change_day = Some(today);
            self.clear_queue();
            ChangeResult::Applied
        } else {
            self.queued_username = Some(new_username.to_string());
            self.queued_day = Some(today);
            ChangeResult::Queued { queued_on: today }
        }
    }

    /// Promote the queued username once a day boundary has passed since it was queued and no
    /// change has happened yet today. Returns whether the active username changed.
    pub fn apply_queued_on(&mut self, today: NaiveDate) -> bool {
        let (Some(queued), Some(queued_day)) = (self.queued_username.clone(), self.queued_day)
        else {
            // Half-written queues are not applied.
            self.clear_queue();
            return false;
        };
        if queued_day == today || !self.can_change_on(today) {
            return false;
        }
        self.clear_queue();
        if queued == self.minecraft_username {
            return false;
        }
        self.minecraft_username = queued;
        self.last_username_change_day = Some(today);
        true
    }

    pub fn queued_change(&self) -> Option<QueuedChange> {
        match (&self.queued_username, self.queued_day) {
            (Some(username), Some(queued_on)) => Some(QueuedChange {
                username: username.clone(),
                queued_on,
            }),
            _ => None,
        }
    }

    fn clear_queue(&mut self) {
        self.queued_username = None;
        self.queued_day = None;
    }
}

/// Store-backed username policy, evaluated in the fixed reference time zone.
#[derive(Clone)]
pub struct IdentityPolicy {
    profiles: ProfileStore,
    clock: Arc<dyn Clock>,
    zone: Tz,
}

impl IdentityPolicy {
    pub fn new(profiles: ProfileStore, clock: Arc<dyn Clock>, zone: Tz) -> Self {
        Self {
            profiles,
            clock,
            zone,
        }
    }

    pub fn today(&self) -> NaiveDate {
        reference_day(self.clock.now(), self.zone)
    }

    pub fn can_change_today(&self) -> Result<bool, StoreError> {
        Ok(self.profiles.profile()?.can_change_on(self.today()))
    }

    pub fn request_change(&self, new_username: &str) -> Result<ChangeResult, SyncError> {
        let new_username = new_username.trim();
        if new_username.is_empty() {
            return Err(SyncError::InvalidUsername(
                "username cannot be blank".to_string(),
            ));
        }
        if new_username.chars().any(|c| c.is_whitespace()) {
            return Err(SyncError::InvalidUsername(format!(
                "`{new_username}` contains whitespace"
            )));
        }
        let today = self.today();
        let result = self
            .profiles
            .update_profile(|profile| profile.request_change_on(new_username, today))?;
        match &result {
            ChangeResult::Applied => log::info!("Username changed to {new_username}"),
            ChangeResult::Queued { .. } => {
                log::info!("Username change to {new_username} queued until the next reset")
            }
            ChangeResult::Unchanged => {}
        }
        Ok(result)
    }

    pub fn apply_queued_if_due(&self) -> Result<bool, StoreError> {
        let today = self.today();
        let applied = self
            .profiles
            .update_profile(|profile| profile.apply_queued_on(today))?;
        if applied {
            log::info!("Applied queued username change");
        }
        Ok(applied)
    }

    pub fn queued(&self) -> Result<Option<QueuedChange>, StoreError> {
        Ok(self.profiles.profile()?.queued_change())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::store::{MemoryStore, SharedStore};
    use chrono::{TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    fn steve() -> LocalProfile {
        LocalProfile {
            minecraft_username: "Steve".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn first_change_of_the_day_applies() {
        let mut profile = steve();
        assert_eq!(profile.request_change_on("Alex", day(1)), ChangeResult::Applied);
        assert_eq!(profile.minecraft_username, "Alex");
        assert!(!profile.can_change_on(day(1)));
        assert!(profile.can_change_on(day(2)));
    }

    #[test]
    fn second_change_is_queued_and_replaces_earlier_queue() {
        let mut profile = steve();
        profile.request_change_on("Alex", day(1));
        assert_eq!(
            profile.request_change_on("Notch", day(1)),
            ChangeResult::Queued { queued_on: day(1) }
        );
        assert_eq!(
            profile.request_change_on("Jeb", day(1)),
            ChangeResult::Queued { queued_on: day(1) }
        );

        assert_eq!(profile.minecraft_username, "Alex");
        assert_eq!(profile.queued_change().unwrap().username, "Jeb");
    }

    #[test]
    fn queue_waits_for_next_reset_even_if_change_is_allowed_today() {
        let mut profile = steve();
        profile.queued_username = Some("Alex".to_string());
        profile.queued_day = Some(day(3));

        // No change happened on day 3, but the queue was created on day 3.
        assert!(profile.can_change_on(day(3)));
        assert!(!profile.apply_queued_on(day(3)));
        assert_eq!(profile.minecraft_username, "Steve");

        assert!(profile.apply_queued_on(day(4)));
        assert_eq!(profile.minecraft_username, "Alex");
        assert_eq!(profile.last_username_change_day, Some(day(4)));
        assert_eq!(profile.queued_change(), None);
    }

    #[test]
    fn apply_queued_is_idempotent() {
        let mut profile = steve();
        profile.request_change_on("Alex", day(1));
        profile.request_change_on("Notch", day(1));

        assert!(profile.apply_queued_on(day(2)));
        let after_first = profile.clone();
        assert!(!profile.apply_queued_on(day(2)));
        assert_eq!(profile, after_first);
    }

    #[test]
    fn requesting_the_active_name_cancels_the_queue() {
        let mut profile = steve();
        profile.request_change_on("Alex", day(1));
        profile.request_change_on("Notch", day(1));
        assert_eq!(profile.request_change_on("Alex", day(1)), ChangeResult::Unchanged);
        assert_eq!(profile.queued_change(), None);
    }

    #[test]
    fn onboarding_name_uses_up_the_daily_change() {
        let mut profile = LocalProfile::default();
        assert_eq!(profile.request_change_on("Steve", day(1)), ChangeResult::Applied);
        assert!(!profile.can_change_on(day(1)));
        assert_eq!(
            profile.request_change_on("Alex", day(1)),
            ChangeResult::Queued { queued_on: day(1) }
        );
        assert_eq!(profile.minecraft_username, "Steve");

        assert!(profile.apply_queued_on(day(2)));
        assert_eq!(profile.minecraft_username, "Alex");
    }

    #[test]
    fn at_most_one_active_and_one_queued_name_per_day() {
        let mut profile = steve();
        for name in ["A1", "B2", "C3", "D4", "E5"] {
            profile.request_change_on(name, day(7));
            assert!(profile.queued_username.is_some() == profile.queued_day.is_some());
        }
        assert_eq!(profile.minecraft_username, "A1");
        assert_eq!(profile.queued_username.as_deref(), Some("E5"));
    }

    #[test]
    fn policy_uses_reference_zone_day() {
        let store = SharedStore::new(MemoryStore::new());
        let profiles = ProfileStore::new(store);
        profiles
            .update_profile(|p| p.minecraft_username = "Steve".to_string())
            .unwrap();
        // 23:00 in Chicago on May 1st is already May 2nd in UTC.
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 5, 2, 4, 0, 0).unwrap(),
        ));
        let policy = IdentityPolicy::new(profiles, clock.clone(), chrono_tz::America::Chicago);

        assert_eq!(policy.request_change("Alex").unwrap(), ChangeResult::Applied);
        assert_eq!(
            policy.request_change("Notch").unwrap(),
            ChangeResult::Queued { queued_on: day(1) }
        );

        // Two hours later it is 01:00 on May 2nd in Chicago: the queue is due.
        clock.advance(chrono::Duration::hours(2));
        assert!(policy.apply_queued_if_due().unwrap());
        assert_eq!(policy.queued().unwrap(), None);
        assert!(!policy.can_change_today().unwrap());
    }

    #[test]
    fn blank_username_is_rejected() {
        let profiles = ProfileStore::new(SharedStore::new(MemoryStore::new()));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let policy = IdentityPolicy::new(profiles, clock, chrono_tz::America::Chicago);
        assert!(matches!(
            policy.request_change("   "),
            Err(SyncError::InvalidUsername(_))
        ));
    }
}
