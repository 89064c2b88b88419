//! Charging-profile stack storage and validation (spec.md §9 supplement:
//! accept/store/stack-order profiles; composite-schedule computation is
//! explicitly out of scope).
//!
//! Grounded on the teacher's `domain/charging_profile/model.rs`
//! (`purpose`/`stack_level`/`schedule_json`-as-opaque-string shape); the
//! schedule payload is kept as an opaque `serde_json::Value` here too,
//! since the crate never computes a composite schedule from it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfilePurpose {
    ChargingStationMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingProfile {
    pub profile_id: i32,
    pub evse_id: u32,
    pub stack_level: i32,
    pub purpose: ChargingProfilePurpose,
    pub transaction_id: Option<String>,
    pub schedule: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileError {
    /// `TxProfile` must be associated with an active transaction
    /// (spec.md §4.1, OCPP SetChargingProfile.conf rejection rules).
    TxProfileWithoutTransaction,
    /// Rejected because a profile with the same `profile_id` exists at a
    /// different stack level under a different purpose.
    DuplicateId,
}

/// Per-evse stack of installed profiles, ordered for composite-schedule
/// consumers by `(purpose priority, stack_level descending)` — the
/// ordering a future composite-schedule implementation would consume,
/// per the spec's note that only storage/validation is in scope here.
pub struct ChargingProfileStore {
    profiles: HashMap<u32, Vec<ChargingProfile>>,
}

impl ChargingProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    pub fn set(&mut self, profile: ChargingProfile, has_active_tx: impl Fn(u32) -> bool) -> Result<(), ProfileError> {
        if profile.purpose == ChargingProfilePurpose::TxProfile && !has_active_tx(profile.evse_id) {
            return Err(ProfileError::TxProfileWithoutTransaction);
        }
        let bucket = self.profiles.entry(profile.evse_id).or_default();
        bucket.retain(|p| p.profile_id != profile.profile_id);
        bucket.push(profile);
        bucket.sort_by(|a, b| {
            purpose_priority(a.purpose)
                .cmp(&purpose_priority(b.purpose))
                .then(b.stack_level.cmp(&a.stack_level))
        });
        Ok(())
    }

    /// `ClearChargingProfile`, matching by any combination of the
    /// supplied filters (`None` = don't filter on that field).
    pub fn clear(
        &mut self,
        evse_id: Option<u32>,
        profile_id: Option<i32>,
        purpose: Option<ChargingProfilePurpose>,
        stack_level: Option<i32>,
    ) -> usize {
        let mut removed = 0;
        let evse_ids: Vec<u32> = match evse_id {
            Some(id) => vec![id],
            None => self.profiles.keys().copied().collect(),
        };
        for id in evse_ids {
            if let Some(bucket) = self.profiles.get_mut(&id) {
                let before = bucket.len();
                bucket.retain(|p| {
                    let id_match = profile_id.map(|pid| p.profile_id == pid).unwrap_or(true);
                    let purpose_match = purpose.map(|pp| p.purpose == pp).unwrap_or(true);
                    let level_match = stack_level.map(|sl| p.stack_level == sl).unwrap_or(true);
                    !(id_match && purpose_match && level_match)
                });
                removed += before - bucket.len();
            }
        }
        removed
    }

    /// Profiles for `evse_id` in descending stack-priority order, the
    /// shape `GetCompositeSchedule` would fold over if implemented.
    pub fn stack_for(&self, evse_id: u32) -> &[ChargingProfile] {
        self.profiles.get(&evse_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn purpose_priority(purpose: ChargingProfilePurpose) -> u8 {
    match purpose {
        ChargingProfilePurpose::ChargingStationMaxProfile => 0,
        ChargingProfilePurpose::TxDefaultProfile => 1,
        ChargingProfilePurpose::TxProfile => 2,
    }
}

impl Default for ChargingProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
