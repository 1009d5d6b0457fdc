//! Key data as delivered by the key store.
//!
//! A [`LockKey`] is never mutated in place: the key store reports a fresh set
//! on every refresh and the roster replaces its list wholesale.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display format for offline-access timestamps.
pub const OFFLINE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Identifier of a signed-in user whose keys are queried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The physical lock a grant is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundLock {
    /// Stable hardware identifier.
    pub physical_lock_id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
}

/// Authorization record binding a key to a lock and a validity window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Lock this grant opens. `None` if the lock cannot be resolved.
    #[serde(default)]
    pub bound_lock: Option<BoundLock>,
    /// Start of validity. `None` if valid since forever.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// End of validity. `None` if valid forever.
    #[serde(default)]
    pub valid_before: Option<DateTime<Utc>>,
    /// Recurrence rule (iCal) restricting access times.
    #[serde(default)]
    pub time_restriction_ical: Option<String>,
}

impl Grant {
    /// Grant bound to `physical_lock_id` with unlimited validity.
    pub fn unlimited(physical_lock_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            bound_lock: Some(BoundLock {
                physical_lock_id: physical_lock_id.into(),
                title: title.into(),
            }),
            ..Self::default()
        }
    }

    /// True when no start, end, or recurrence restricts the grant.
    pub fn has_unlimited_validity(&self) -> bool {
        self.valid_from.is_none()
            && self.valid_before.is_none()
            && self.time_restriction_ical.is_none()
    }
}

/// Credential granting access to one physical lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockKey {
    /// Originating grant. `None` if it cannot be resolved.
    #[serde(default)]
    pub grant: Option<Grant>,
    /// Start of the offline-access window.
    #[serde(default)]
    pub offline_from: Option<DateTime<Utc>>,
    /// End of the offline-access window.
    #[serde(default)]
    pub offline_until: Option<DateTime<Utc>>,
}

impl LockKey {
    /// Key for `grant` without an offline window.
    pub fn new(grant: Grant) -> Self {
        Self { grant: Some(grant), offline_from: None, offline_until: None }
    }

    /// Set the offline-access window.
    #[must_use]
    pub fn with_offline_window(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.offline_from = from;
        self.offline_until = until;
        self
    }

    /// Bound lock. `None` if the grant is missing or unresolved.
    pub fn bound_lock(&self) -> Option<&BoundLock> {
        self.grant.as_ref().and_then(|grant| grant.bound_lock.as_ref())
    }

    /// Physical lock id, if the key maps to a non-empty one.
    pub fn physical_lock_id(&self) -> Option<&str> {
        self.bound_lock()
            .map(|lock| lock.physical_lock_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Display data for this key given its current presence.
    ///
    /// Returns `None` for keys that cannot be placed in the roster.
    pub fn details(&self, nearby: bool) -> Option<LockDetails> {
        let grant = self.grant.as_ref()?;
        let lock = grant.bound_lock.as_ref()?;
        if lock.physical_lock_id.is_empty() {
            return None;
        }

        Some(LockDetails {
            physical_lock_id: lock.physical_lock_id.clone(),
            title: lock.title.clone(),
            nearby,
            unlimited_validity: grant.has_unlimited_validity(),
            offline_from: self.offline_from.map(format_offline),
            offline_until: self.offline_until.map(format_offline),
        })
    }
}

fn format_offline(at: DateTime<Utc>) -> String {
    at.format(OFFLINE_DATE_FORMAT).to_string()
}

/// Display data carried by a roster entry, replaced on every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockDetails {
    /// Stable hardware identifier.
    pub physical_lock_id: String,
    /// Display title.
    pub title: String,
    /// Currently reported nearby by the scanner.
    pub nearby: bool,
    /// No validity restriction applies.
    pub unlimited_validity: bool,
    /// Formatted start of the offline-access window.
    pub offline_from: Option<String>,
    /// Formatted end of the offline-access window.
    pub offline_until: Option<String>,
}

impl LockDetails {
    /// Minimal details for a lock id and title.
    pub fn new(physical_lock_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            physical_lock_id: physical_lock_id.into(),
            title: title.into(),
            nearby: false,
            unlimited_validity: true,
            offline_from: None,
            offline_until: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn unresolved_grants_have_no_details() {
        assert!(LockKey::default().details(true).is_none());
        assert!(LockKey::new(Grant::default()).details(true).is_none());
        assert!(LockKey::new(Grant::unlimited("", "Nameless")).details(true).is_none());
    }

    #[test]
    fn validity_is_unlimited_only_without_restrictions() {
        let mut grant = Grant::unlimited("lock-1", "Front door");
        assert!(grant.has_unlimited_validity());

        grant.time_restriction_ical = Some("RRULE:FREQ=DAILY".into());
        assert!(!grant.has_unlimited_validity());

        grant.time_restriction_ical = None;
        grant.valid_before = Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());
        assert!(!grant.has_unlimited_validity());
    }

    #[test]
    fn details_format_offline_window() {
        let from = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        let key = LockKey::new(Grant::unlimited("lock-1", "Front door"))
            .with_offline_window(Some(from), None);

        let details = key.details(true).unwrap();
        assert_eq!(details.physical_lock_id, "lock-1");
        assert_eq!(details.title, "Front door");
        assert!(details.nearby);
        assert_eq!(details.offline_from.as_deref(), Some("2024-03-09 07:05"));
        assert_eq!(details.offline_until, None);
    }

    #[test]
    fn keys_parse_from_json() {
        let json = r#"{
            "grant": {
                "bound_lock": { "physical_lock_id": "lock-9", "title": "Garage" },
                "valid_from": "2024-01-01T00:00:00Z"
            }
        }"#;

        let key: LockKey = serde_json::from_str(json).unwrap();
        assert_eq!(key.physical_lock_id(), Some("lock-9"));
        assert!(!key.details(false).unwrap().unlimited_validity);
    }
}
