//! Reservation (`ReserveNow`/`CancelReservation`), supplemented from
//! `original_source/` (spec.md §9 supplement: MicroOcpp's
//! `ReservationService` sweeps expired reservations on every loop tick
//! rather than waiting for a CSMS round-trip).
//!
//! Expiry sweep grounded on the teacher's `application/charging/
//! services/reservation_expiry.rs`, adapted from a `tokio::spawn`
//! background loop to an explicit `sweep_expired` the host calls on its
//! own tick — spec.md §5 forbids the crate spawning its own tasks.

use std::collections::HashMap;

use tracing::info;

use crate::clock::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationStatus {
    Accepted,
    Expired,
    Cancelled,
    Used,
}

#[derive(Debug, Clone)]
pub struct Reservation {
    pub reservation_id: i32,
    pub evse_id: u32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry_timestamp: i64,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationError {
    Conflict,
    ConnectorOccupied,
}

/// Outcome of checking a begin-protocol attempt against a held
/// reservation (spec.md §4.1 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationCheck {
    /// No reservation, or the attempt matches the reservation's tag.
    Ok,
    /// The attempt's id tag is known and does not match the reservation.
    Conflict,
    /// The reservation is held under a different tag than the id tag
    /// presented, but the parent id tag isn't known locally yet — the
    /// online Authorize response resolves whether they're the same
    /// underlying account.
    Deferred,
}

/// All active reservations, keyed by `evseId` (spec.md: at most one
/// reservation may be outstanding per connector at a time).
pub struct ReservationBook {
    by_evse: HashMap<u32, Reservation>,
}

impl ReservationBook {
    pub fn new() -> Self {
        Self {
            by_evse: HashMap::new(),
        }
    }

    /// `ReserveNow`. Rejects with `Conflict` if the connector already
    /// holds a non-terminal reservation for a different id tag.
    pub fn reserve(&mut self, reservation: Reservation) -> Result<(), ReservationError> {
        if let Some(existing) = self.by_evse.get(&reservation.evse_id) {
            if existing.status == ReservationStatus::Accepted && existing.id_tag != reservation.id_tag {
                return Err(ReservationError::Conflict);
            }
        }
        self.by_evse.insert(reservation.evse_id, reservation);
        Ok(())
    }

    /// `CancelReservation`. Returns `true` if a reservation with this id
    /// was found and cancelled.
    pub fn cancel(&mut self, reservation_id: i32) -> bool {
        if let Some((evse_id, _)) = self
            .by_evse
            .iter()
            .find(|(_, r)| r.reservation_id == reservation_id)
            .map(|(evse_id, r)| (*evse_id, r.clone()))
        {
            self.by_evse.remove(&evse_id);
            return true;
        }
        false
    }

    /// Whether a begin protocol attempt against `evse_id` with `id_tag`
    /// is compatible with the current reservation (spec.md §4.1 step 2
    /// "Check reservation"). `known_parent_id_tag` is the parent id tag
    /// already resolved locally (whitelist lookup), if any — when it's
    /// absent, a reservation held under a different tag can't yet be
    /// ruled compatible or not, so the decision defers to the online
    /// Authorize response rather than rejecting outright.
    pub fn check(&self, evse_id: u32, id_tag: &str, known_parent_id_tag: Option<&str>) -> ReservationCheck {
        let Some(r) = self.by_evse.get(&evse_id) else {
            return ReservationCheck::Ok;
        };
        if r.status != ReservationStatus::Accepted {
            return ReservationCheck::Ok;
        }
        if r.id_tag == id_tag || r.parent_id_tag.as_deref() == Some(id_tag) {
            return ReservationCheck::Ok;
        }
        let Some(parent) = known_parent_id_tag else {
            return ReservationCheck::Deferred;
        };
        if r.id_tag == parent || r.parent_id_tag.as_deref() == Some(parent) {
            ReservationCheck::Ok
        } else {
            ReservationCheck::Conflict
        }
    }

    pub fn mark_used(&mut self, evse_id: u32) {
        if let Some(r) = self.by_evse.get_mut(&evse_id) {
            r.status = ReservationStatus::Used;
        }
    }

    /// Sweep reservations past their `expiry_timestamp`, called on every
    /// loop tick by the host (no internal timer, per spec.md §5).
    pub fn sweep_expired(&mut self, now: Timestamp, resolve: impl Fn(Timestamp) -> Option<i64>) {
        let Some(now_unix) = resolve(now) else {
            return;
        };
        for (evse_id, reservation) in self.by_evse.iter_mut() {
            if reservation.status == ReservationStatus::Accepted && reservation.expiry_timestamp <= now_unix {
                reservation.status = ReservationStatus::Expired;
                info!(evse_id, reservation_id = reservation.reservation_id, "reservation expired");
            }
        }
    }

    pub fn get(&self, evse_id: u32) -> Option<&Reservation> {
        self.by_evse.get(&evse_id)
    }
}

impl Default for ReservationBook {
    fn default() -> Self {
        Self::new()
    }
}
