//! Transaction Engine (spec.md §2 bullet 9, §4.1) — the largest module:
//! the per-connector state machine, begin protocol, start/stop
//! conditions, FreeVend, 2.0.1 `TxStartPoint`/`TxStopPoint` evaluation,
//! and the staleness rule.
//!
//! Grounded on the teacher's `application/charging/session/registry.rs`
//! (one state-holder per connector, `DashMap`-indexed) for shape, and on
//! `original_source/src/TransactionService16.cpp` /
//! `TransactionService201.cpp` for the begin-protocol step ordering and
//! the `Authorized`/`idTagDeauthorized` bookkeeping those spell out.

pub mod inputs;

use std::collections::HashMap;

use serde_json::json;
use tracing::{info, warn};

use crate::authlist::{AuthStatus, LocalAuthList};
use crate::clock::Timestamp;
use crate::enums::{AbortReason, StopReason, TxControlPoint};
use crate::error::EngineError;
use crate::journal::{ConnectorJournal, TxHandle};
use crate::queue::MessageQueue;
use crate::reservation::{ReservationBook, ReservationCheck, ReservationStatus};

pub use inputs::{AuthResult, EngineInput};

/// Per-connector knobs the begin/stop protocol reads (spec.md §4.1
/// "config knobs").
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `AuthorizeRemoteTxRequests`: a remote-start request must still go
    /// through an online Authorize round trip even if `LocalPreAuthorize`
    /// would otherwise admit it immediately.
    pub authorize_remote_tx_requests: bool,
    pub local_pre_authorize: bool,
    pub local_authorize_offline: bool,
    pub stop_transaction_on_invalid_id: bool,
    pub stop_transaction_on_ev_side_disconnect: bool,
    pub allow_offline_tx_for_unknown_id: bool,
    /// FreeVend: when set, every begin request for this connector is
    /// admitted under `free_vend_id_tag` without authorization (spec.md
    /// §4.1 "FreeVend"), and a rising edge of `connectorPlugged` with no
    /// active tx auto-begins one.
    pub free_vend_active: bool,
    pub free_vend_id_tag: Option<String>,
    /// 2.0.1 only; empty means "always start on EV plug" (1.6 behavior).
    pub tx_start_point: Vec<TxControlPoint>,
    pub tx_stop_point: Vec<TxControlPoint>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            authorize_remote_tx_requests: true,
            local_pre_authorize: true,
            local_authorize_offline: false,
            stop_transaction_on_invalid_id: true,
            stop_transaction_on_ev_side_disconnect: true,
            allow_offline_tx_for_unknown_id: false,
            free_vend_active: false,
            free_vend_id_tag: None,
            tx_start_point: Vec::new(),
            tx_stop_point: Vec::new(),
        }
    }
}

/// Outputs the host reacts to (spec.md §4.1 "outputs"): events the engine
/// raises as a side effect of processing an input, consumed by the queue
/// (to emit StartTransaction/StopTransaction/TransactionEvent) and by the
/// availability tracker.
#[derive(Debug, Clone)]
pub enum TxNotification {
    Began { handle: TxHandle },
    /// `unique_id` is the Message Queue entry the host should track to
    /// learn when `startSync` is confirmed (see `on_start_confirmed`).
    Started { handle: TxHandle, unique_id: String },
    /// `unique_id` is the Message Queue entry for `stopSync`.
    Stopped { handle: TxHandle, reason: StopReason, unique_id: String },
    Aborted { evse_id: u32, reason: AbortReason },
    /// A server Authorize response diverges from the local whitelist
    /// entry for the same id tag (spec.md §4.4, SPEC_FULL.md §C.3).
    LocalListConflict { evse_id: u32, id_tag: String },
}

struct ConnectorState {
    config: EngineConfig,
    active: Option<TxHandle>,
    ev_connected: bool,
    authorized: bool,
    parking_bay_occupied: bool,
    power_path_closed: bool,
    energy_transfer_active: bool,
    /// `connectorPlugged`; absent from the host ⇒ assumed `true`.
    connector_plugged: bool,
    /// A fatal error condition; absent ⇒ assumed `false`.
    faulted: bool,
    /// `startTxReady` hardware interlock; absent ⇒ assumed `true`.
    start_tx_ready: bool,
    /// `stopTxReady` hardware interlock; absent ⇒ assumed `true`.
    stop_tx_ready: bool,
    /// Set in `begin` step 2 when the local whitelist holds a
    /// rejected/expired entry for this id tag (spec.md §4.1 step 2).
    offline_blocked_auth: bool,
    /// Set in `begin` step 3 when the reservation check deferred to the
    /// online Authorize response (spec.md §4.1 step 3).
    offline_blocked_resv: bool,
    /// Set in `begin` step 2 when the local whitelist has an Accepted
    /// entry for this id tag.
    local_auth_found: bool,
}

impl ConnectorState {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            active: None,
            ev_connected: false,
            authorized: false,
            parking_bay_occupied: false,
            power_path_closed: false,
            energy_transfer_active: false,
            connector_plugged: true,
            faulted: false,
            start_tx_ready: true,
            stop_tx_ready: true,
            offline_blocked_auth: false,
            offline_blocked_resv: false,
            local_auth_found: false,
        }
    }
}

/// Owns per-connector engine state; `journal`, `reservations`,
/// `local_list` and `queue` are passed in by reference on each call
/// rather than owned, since they're shared with other modules (boot
/// recovery, availability) too.
pub struct TransactionEngine {
    connectors: HashMap<u32, ConnectorState>,
}

impl TransactionEngine {
    pub fn new() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    pub fn configure(&mut self, evse_id: u32, config: EngineConfig) {
        self.connectors.insert(evse_id, ConnectorState::new(config));
    }

    fn state_mut(&mut self, evse_id: u32) -> &mut ConnectorState {
        self.connectors.entry(evse_id).or_insert_with(|| ConnectorState::new(EngineConfig::default()))
    }

    /// The begin protocol (spec.md §4.1 step list):
    /// 1. Reject if a non-terminal transaction is already active.
    /// 2. Check the local whitelist, remembering `parentIdTag`/
    ///    `localAuthFound`, or `offlineBlockedAuth` on a rejected entry.
    /// 3. Check reservation compatibility; a known mismatch aborts, an
    ///    unresolvable one sets `offlineBlockedResv` and proceeds.
    /// 4. Allocate a journal slot.
    /// 5. Persist the tx (spec.md §9: `parenIdTag` typo corrected, never
    ///    replicated) and take the `LocalPreAuthorize`/FreeVend fast path
    ///    when eligible — unless `remote_request` and
    ///    `AuthorizeRemoteTxRequests` force an online round trip.
    /// 6. Otherwise hand back a `TxHandle` the caller's Authorize-response
    ///    callback must present back through `confirm_authorization`,
    ///    which re-checks the handle for staleness before mutating.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        journal: &mut ConnectorJournal,
        reservations: &ReservationBook,
        local_list: &LocalAuthList,
        queue: &mut MessageQueue,
        evse_id: u32,
        id_tag: &str,
        timestamp: Timestamp,
        silent_offline_allowed: bool,
        remote_request: bool,
    ) -> Result<Vec<TxNotification>, EngineError> {
        {
            let state = self.state_mut(evse_id);
            if let Some(handle) = state.active {
                if journal.get(handle.tx_nr).map(|tx| !tx.is_terminal()).unwrap_or(false) {
                    return Err(EngineError::AlreadyActive(evse_id));
                }
                state.active = None;
            }
        }

        // Step 2: local whitelist check.
        let local_entry = local_list.lookup(id_tag);
        let local_auth_found = local_entry.map(|e| e.status == AuthStatus::Accepted).unwrap_or(false);
        let offline_blocked_auth = local_entry.is_some() && !local_auth_found;
        let known_parent_id_tag = local_entry.and_then(|e| e.parent_id_tag.as_deref());

        // Step 3: reservation check.
        let mut offline_blocked_resv = false;
        match reservations.check(evse_id, id_tag, known_parent_id_tag) {
            ReservationCheck::Conflict => {
                warn!(evse_id, id_tag, "begin rejected: reservation conflict");
                return Ok(vec![TxNotification::Aborted {
                    evse_id,
                    reason: AbortReason::ReservationConflict,
                }]);
            }
            ReservationCheck::Deferred => offline_blocked_resv = true,
            ReservationCheck::Ok => {}
        }
        let reservation_id = reservations
            .get(evse_id)
            .filter(|r| r.status == ReservationStatus::Accepted)
            .map(|r| r.reservation_id);

        // Step 4: allocate tx.
        let tx = journal
            .allocate(id_tag, timestamp, silent_offline_allowed)
            .map_err(EngineError::Journal)?;

        // Step 5: persist + LocalPreAuthorize/FreeVend fast path.
        if let Some(entry) = local_entry {
            tx.parent_id_tag = entry.parent_id_tag.clone();
        }
        if let Some(rid) = reservation_id {
            tx.reservation_id = Some(rid);
        }
        let handle = tx.handle();

        let (config_local_pre_authorize, config_free_vend_active, config_free_vend_id_tag, config_authorize_remote_tx_requests) = {
            let state = self.state_mut(evse_id);
            state.active = Some(handle);
            state.offline_blocked_auth = offline_blocked_auth;
            state.offline_blocked_resv = offline_blocked_resv;
            state.local_auth_found = local_auth_found;
            (
                state.config.local_pre_authorize,
                state.config.free_vend_active,
                state.config.free_vend_id_tag.clone(),
                state.config.authorize_remote_tx_requests,
            )
        };

        let free_vend = config_free_vend_active && config_free_vend_id_tag.as_deref() == Some(id_tag);
        let force_online_authorize = remote_request && config_authorize_remote_tx_requests;
        let fast_authorize = !force_online_authorize && (free_vend || (config_local_pre_authorize && local_auth_found));

        info!(evse_id, id_tag, tx_nr = handle.tx_nr, "transaction begin");
        let mut notifications = vec![TxNotification::Began { handle }];

        if fast_authorize {
            if let Some(tx) = journal.get_mut(handle.tx_nr) {
                tx.authorized = true;
            }
            if free_vend {
                info!(evse_id, id_tag, "FreeVend: begin admitted without authorization");
            } else {
                info!(evse_id, id_tag, "LocalPreAuthorize: begin admitted from local list");
            }
            notifications.extend(self.evaluate_start(journal, queue, handle));
        }

        Ok(notifications)
    }

    /// Apply an Authorize response to the transaction a stale-checked
    /// `handle` still refers to (spec.md §4.1 "Staleness rule", §8
    /// testable property 3). Returns an empty `Vec` if the handle is
    /// stale (the caller should simply discard the response) — spec.md
    /// §4.1 step 6's timeout decision table, and the `LocalListConflict`
    /// check against `local_list` (spec.md §4.4, SPEC_FULL.md §C.3).
    pub fn confirm_authorization(
        &mut self,
        journal: &mut ConnectorJournal,
        local_list: &LocalAuthList,
        queue: &mut MessageQueue,
        handle: TxHandle,
        result: AuthResult,
    ) -> Vec<TxNotification> {
        let tx_matches = journal.get(handle.tx_nr).map(|tx| tx.matches(handle)).unwrap_or(false);
        if !tx_matches {
            warn!(evse_id = handle.evse_id, tx_nr = handle.tx_nr, "stale Authorize response discarded");
            return Vec::new();
        }

        match result {
            AuthResult::Accepted { parent_id_tag } => {
                let mut notifications = Vec::new();
                let id_tag = journal.get(handle.tx_nr).unwrap().id_tag.clone();
                if local_list.detect_conflict(&id_tag, parent_id_tag.as_deref()) {
                    warn!(evse_id = handle.evse_id, id_tag, "LocalListConflict: server Authorize diverges from local list");
                    notifications.push(TxNotification::LocalListConflict {
                        evse_id: handle.evse_id,
                        id_tag: id_tag.clone(),
                    });
                }
                let tx = journal.get_mut(handle.tx_nr).unwrap();
                tx.authorized = true;
                if parent_id_tag.is_some() {
                    tx.parent_id_tag = parent_id_tag;
                }
                notifications.extend(self.evaluate_start(journal, queue, handle));
                notifications
            }
            AuthResult::Rejected => {
                let on_invalid = self.state_mut(handle.evse_id).config.stop_transaction_on_invalid_id;
                let tx = journal.get_mut(handle.tx_nr).unwrap();
                if on_invalid {
                    tx.aborted = true;
                    self.state_mut(handle.evse_id).active = None;
                    vec![TxNotification::Aborted {
                        evse_id: handle.evse_id,
                        reason: AbortReason::AuthorizationRejected,
                    }]
                } else {
                    tx.id_tag_deauthorized = true;
                    Vec::new()
                }
            }
            AuthResult::Timeout => self.resolve_authorize_timeout(journal, queue, handle),
        }
    }

    /// spec.md §4.1 step 6's offline decision table: on Authorize
    /// timeout, abort for a known-bad reservation/whitelist entry,
    /// authorize locally when policy allows it, or abort outright.
    fn resolve_authorize_timeout(&mut self, journal: &mut ConnectorJournal, queue: &mut MessageQueue, handle: TxHandle) -> Vec<TxNotification> {
        let (offline_blocked_auth, offline_blocked_resv, local_auth_found, local_authorize_offline, allow_offline_unknown) = {
            let state = self.state_mut(handle.evse_id);
            (
                state.offline_blocked_auth,
                state.offline_blocked_resv,
                state.local_auth_found,
                state.config.local_authorize_offline,
                state.config.allow_offline_tx_for_unknown_id,
            )
        };

        if offline_blocked_auth {
            let tx = journal.get_mut(handle.tx_nr).unwrap();
            tx.aborted = true;
            self.state_mut(handle.evse_id).active = None;
            return vec![TxNotification::Aborted {
                evse_id: handle.evse_id,
                reason: AbortReason::AuthorizationTimeout,
            }];
        }
        if offline_blocked_resv {
            let tx = journal.get_mut(handle.tx_nr).unwrap();
            tx.aborted = true;
            self.state_mut(handle.evse_id).active = None;
            return vec![TxNotification::Aborted {
                evse_id: handle.evse_id,
                reason: AbortReason::ReservationConflict,
            }];
        }
        if (local_auth_found && local_authorize_offline) || allow_offline_unknown {
            let tx = journal.get_mut(handle.tx_nr).unwrap();
            tx.authorized = true;
            info!(evse_id = handle.evse_id, tx_nr = handle.tx_nr, "authorized locally after Authorize timeout");
            return self.evaluate_start(journal, queue, handle).into_iter().collect();
        }
        let tx = journal.get_mut(handle.tx_nr).unwrap();
        tx.aborted = true;
        self.state_mut(handle.evse_id).active = None;
        vec![TxNotification::Aborted {
            evse_id: handle.evse_id,
            reason: AbortReason::AuthorizationTimeout,
        }]
    }

    /// Physical-layer inputs (EV plug, parking bay, power path, energy
    /// transfer, connector-plugged, fault, start/stop interlocks) driving
    /// the 1.6 AND-of-five start condition and the 2.0.1 `TxStartPoint`
    /// evaluation (spec.md §4.1). Also the entry point for FreeVend's
    /// auto-begin on the rising edge of `connectorPlugged` (spec.md §4.1
    /// "FreeVend") when no transaction is active yet.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_input(
        &mut self,
        journal: &mut ConnectorJournal,
        reservations: &ReservationBook,
        local_list: &LocalAuthList,
        queue: &mut MessageQueue,
        evse_id: u32,
        input: EngineInput,
        timestamp: Timestamp,
    ) -> Vec<TxNotification> {
        let had_active = self.state_mut(evse_id).active;
        let rising_edge_plugged =
            matches!(input, EngineInput::ConnectorPlugged(true)) && !self.state_mut(evse_id).connector_plugged;

        {
            let state = self.state_mut(evse_id);
            match input {
                EngineInput::EvConnected(v) => state.ev_connected = v,
                EngineInput::ParkingBayOccupied(v) => state.parking_bay_occupied = v,
                EngineInput::PowerPathClosed(v) => state.power_path_closed = v,
                EngineInput::EnergyTransferActive(v) => state.energy_transfer_active = v,
                EngineInput::ConnectorPlugged(v) => state.connector_plugged = v,
                EngineInput::Faulted(v) => state.faulted = v,
                EngineInput::StartTxReady(v) => state.start_tx_ready = v,
                EngineInput::StopTxReady(v) => state.stop_tx_ready = v,
            }
        }

        if matches!(input, EngineInput::EvConnected(false)) {
            if let Some(handle) = had_active {
                let on_disconnect = self.state_mut(evse_id).config.stop_transaction_on_ev_side_disconnect;
                if on_disconnect {
                    return self.stop(journal, queue, handle, StopReason::EVDisconnected).into_iter().collect();
                }
            }
        }

        if had_active.is_none() {
            if rising_edge_plugged {
                let (free_vend_active, free_vend_id_tag) = {
                    let state = self.state_mut(evse_id);
                    (state.config.free_vend_active, state.config.free_vend_id_tag.clone())
                };
                if free_vend_active {
                    if let Some(id_tag) = free_vend_id_tag {
                        return self
                            .begin(journal, reservations, local_list, queue, evse_id, &id_tag, timestamp, false, false)
                            .unwrap_or_default();
                    }
                }
            }
            return Vec::new();
        }

        match self.state_mut(evse_id).active {
            Some(handle) => self.evaluate_start(journal, queue, handle).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn control_points_satisfied(state: &ConnectorState, points: &[TxControlPoint]) -> bool {
        points.iter().all(|p| match p {
            TxControlPoint::EVConnected => state.ev_connected,
            TxControlPoint::Authorized => state.authorized,
            TxControlPoint::ParkingBayOccupancy => state.parking_bay_occupied,
            TxControlPoint::PowerPathClosed => state.power_path_closed,
            TxControlPoint::EnergyTransfer => state.energy_transfer_active,
            TxControlPoint::DataSigned => true,
        })
    }

    fn evaluate_start(&mut self, journal: &mut ConnectorJournal, queue: &mut MessageQueue, handle: TxHandle) -> Option<TxNotification> {
        {
            let tx = journal.get(handle.tx_nr)?;
            if tx.started() || !tx.authorized {
                return None;
            }
        }
        let points: Vec<TxControlPoint> = {
            let tx = journal.get(handle.tx_nr)?;
            let state = self.state_mut(handle.evse_id);
            state.authorized = tx.authorized;
            if state.config.tx_start_point.is_empty() {
                vec![TxControlPoint::Authorized]
            } else {
                state.config.tx_start_point.clone()
            }
        };
        let state = self.state_mut(handle.evse_id);
        if !Self::control_points_satisfied(state, &points) {
            return None;
        }
        // 1.6 AND-of-five start condition (spec.md §4.1 "Start condition
        // (1.6)"): tx active+authorized is covered above; the remaining
        // three only gate the 1.6 default (empty tx_start_point) — a
        // 2.0.1 connector with its own TxStartPoint set already expressed
        // any hardware dependency it cares about as a control point.
        if state.config.tx_start_point.is_empty() && (!state.connector_plugged || state.faulted || !state.start_tx_ready) {
            return None;
        }

        let (id_tag, meter_start, begin_timestamp) = {
            let tx = journal.get(handle.tx_nr)?;
            (tx.id_tag.clone(), tx.meter_start, tx.begin_timestamp)
        };
        let payload = json!({
            "connectorId": handle.evse_id,
            "idTag": id_tag,
            "meterStart": meter_start,
            "timestamp": serde_json::to_value(begin_timestamp).ok(),
        });
        let (op_nr, unique_id) = queue.enqueue_next("StartTransaction", payload, true);

        let tx = journal.get_mut(handle.tx_nr)?;
        tx.start(begin_timestamp, meter_start);
        tx.start_sync.request(op_nr);
        info!(evse_id = handle.evse_id, tx_nr = handle.tx_nr, op_nr, "transaction started");
        Some(TxNotification::Started { handle, unique_id })
    }

    /// `stop`: ends the connector's active transaction if `handle` still
    /// refers to it (staleness-checked) and `stopTxReady` permits it.
    pub fn stop(&mut self, journal: &mut ConnectorJournal, queue: &mut MessageQueue, handle: TxHandle, reason: StopReason) -> Option<TxNotification> {
        let active_matches = self.connectors.get(&handle.evse_id).map(|s| s.active == Some(handle)).unwrap_or(false);
        if !active_matches {
            return None;
        }
        {
            let tx = journal.get(handle.tx_nr)?;
            if !tx.matches(handle) || tx.stopped() {
                return None;
            }
        }
        let stop_tx_ready = self.connectors.get(&handle.evse_id).map(|s| s.stop_tx_ready).unwrap_or(true);
        if !stop_tx_ready {
            return None;
        }

        let (stop_timestamp, meter_stop, id_tag) = {
            let tx = journal.get(handle.tx_nr)?;
            (tx.stop_timestamp.unwrap_or(tx.begin_timestamp), tx.meter_stop, tx.id_tag.clone())
        };
        let payload = json!({
            "connectorId": handle.evse_id,
            "idTag": id_tag,
            "meterStop": meter_stop,
            "timestamp": serde_json::to_value(stop_timestamp).ok(),
            "reason": reason.as_ref(),
        });
        let (op_nr, unique_id) = queue.enqueue_next("StopTransaction", payload, true);

        let tx = journal.get_mut(handle.tx_nr)?;
        tx.stop(stop_timestamp, meter_stop, reason);
        tx.stop_sync.request(op_nr);

        if let Some(state) = self.connectors.get_mut(&handle.evse_id) {
            state.active = None;
            state.ev_connected = false;
            state.authorized = false;
        }
        info!(evse_id = handle.evse_id, tx_nr = handle.tx_nr, ?reason, op_nr, "transaction stopped");
        Some(TxNotification::Stopped { handle, reason, unique_id })
    }

    /// Resolve `startSync` once the queue reports the matching
    /// StartTransaction message as confirmed (CallResult received),
    /// per spec.md §3's "destroyed when both sync points are confirmed"
    /// lifecycle.
    pub fn on_start_confirmed(&self, journal: &mut ConnectorJournal, tx_nr: u32) {
        if let Some(tx) = journal.get_mut(tx_nr) {
            tx.start_sync.confirm();
        }
        journal.advance_front();
    }

    /// Resolve `stopSync` once the queue reports the matching
    /// StopTransaction message as confirmed.
    pub fn on_stop_confirmed(&self, journal: &mut ConnectorJournal, tx_nr: u32) {
        if let Some(tx) = journal.get_mut(tx_nr) {
            tx.stop_sync.confirm();
        }
        journal.advance_front();
    }

    pub fn active_handle(&self, evse_id: u32) -> Option<TxHandle> {
        self.connectors.get(&evse_id).and_then(|s| s.active)
    }

    /// Exposes a connector's configured knobs to callers composing the
    /// engine with other modules (e.g. `ocppPermitsCharge`'s FreeVend/
    /// `TxStartOnPowerPathClosed` check).
    pub fn config(&self, evse_id: u32) -> Option<&EngineConfig> {
        self.connectors.get(&evse_id).map(|s| &s.config)
    }
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;

    fn engine_with(evse_id: u32, config: EngineConfig) -> (TransactionEngine, ConnectorJournal, ReservationBook, LocalAuthList, MessageQueue) {
        let mut engine = TransactionEngine::new();
        engine.configure(evse_id, config);
        (
            engine,
            ConnectorJournal::new(evse_id, 4),
            ReservationBook::new(),
            LocalAuthList::new(),
            MessageQueue::new(3, 1000),
        )
    }

    fn began_handle(notifications: &[TxNotification]) -> TxHandle {
        notifications
            .iter()
            .find_map(|n| match n {
                TxNotification::Began { handle } => Some(*handle),
                _ => None,
            })
            .expect("expected a Began notification")
    }

    fn has_started(notifications: &[TxNotification]) -> bool {
        notifications.iter().any(|n| matches!(n, TxNotification::Started { .. }))
    }

    #[test]
    fn begin_rejects_when_already_active() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        engine.begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false).unwrap();
        let err = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "B", Timestamp::Unix(2), false, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyActive(1)));
    }

    #[test]
    fn authorize_accepted_starts_transaction_for_1_6_connector() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications = engine.confirm_authorization(
            &mut journal,
            &local_list,
            &mut queue,
            handle,
            AuthResult::Accepted { parent_id_tag: None },
        );
        assert!(has_started(&notifications));
        assert!(journal.get(handle.tx_nr).unwrap().start_sync.requested, "start_sync must be requested once started");
    }

    #[test]
    fn stale_authorize_response_is_discarded() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let stale_handle = began_handle(&notifications);
        // Simulate the transaction having been replaced (abort + new begin).
        journal.get_mut(stale_handle.tx_nr).unwrap().aborted = true;
        engine.stop(&mut journal, &mut queue, stale_handle, StopReason::Local);
        let mut journal2 = ConnectorJournal::new(1, 4);
        journal2.allocate("B", Timestamp::Unix(5), false).unwrap();
        let result = engine.confirm_authorization(
            &mut journal2,
            &local_list,
            &mut queue,
            stale_handle,
            AuthResult::Accepted { parent_id_tag: None },
        );
        assert!(result.is_empty());
    }

    #[test]
    fn authorization_rejected_aborts_when_configured() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications = engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Rejected);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, TxNotification::Aborted { reason: AbortReason::AuthorizationRejected, .. })));
    }

    #[test]
    fn tx_start_point_gates_2_0_1_start_until_ev_connected() {
        let mut config = EngineConfig::default();
        config.tx_start_point = vec![TxControlPoint::Authorized, TxControlPoint::EVConnected];
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, config);
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications =
            engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Accepted { parent_id_tag: None });
        assert!(!has_started(&notifications), "must not start until EV connected");
        let notifications = engine.apply_input(
            &mut journal,
            &reservations,
            &local_list,
            &mut queue,
            1,
            EngineInput::EvConnected(true),
            Timestamp::Unix(2),
        );
        assert!(has_started(&notifications));
    }

    #[test]
    fn ev_disconnect_stops_when_configured() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Accepted { parent_id_tag: None });
        engine.apply_input(&mut journal, &reservations, &local_list, &mut queue, 1, EngineInput::EvConnected(true), Timestamp::Unix(2));
        let notifications =
            engine.apply_input(&mut journal, &reservations, &local_list, &mut queue, 1, EngineInput::EvConnected(false), Timestamp::Unix(3));
        assert!(notifications
            .iter()
            .any(|n| matches!(n, TxNotification::Stopped { reason: StopReason::EVDisconnected, .. })));
    }

    #[test]
    fn free_vend_auto_begins_on_rising_edge_of_plug() {
        let mut config = EngineConfig::default();
        config.free_vend_active = true;
        config.free_vend_id_tag = Some("FREE".to_string());
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, config);
        engine.apply_input(&mut journal, &reservations, &local_list, &mut queue, 1, EngineInput::ConnectorPlugged(false), Timestamp::Unix(1));
        let notifications =
            engine.apply_input(&mut journal, &reservations, &local_list, &mut queue, 1, EngineInput::ConnectorPlugged(true), Timestamp::Unix(2));
        let handle = began_handle(&notifications);
        assert!(journal.get(handle.tx_nr).unwrap().authorized);
        assert!(has_started(&notifications));
    }

    #[test]
    fn reservation_conflict_aborts_begin() {
        let (mut engine, mut journal, mut reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        reservations
            .reserve(crate::reservation::Reservation {
                reservation_id: 1,
                evse_id: 1,
                id_tag: "OTHER".to_string(),
                parent_id_tag: Some("OTHERPARENT".to_string()),
                expiry_timestamp: 1000,
                status: crate::reservation::ReservationStatus::Accepted,
            })
            .unwrap();
        let mut list = LocalAuthList::new();
        let fs = crate::filesystem::MemFilesystem::new();
        list.replace_full(
            &fs,
            1,
            vec![crate::authlist::LocalListEntry {
                id_tag: "A".to_string(),
                parent_id_tag: Some("DIFFERENT".to_string()),
                status: crate::authlist::AuthStatus::Accepted,
            }],
        )
        .unwrap();
        let notifications = engine
            .begin(&mut journal, &reservations, &list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        assert!(notifications
            .iter()
            .any(|n| matches!(n, TxNotification::Aborted { reason: AbortReason::ReservationConflict, .. })));
        let _ = local_list;
    }

    #[test]
    fn authorize_timeout_with_local_auth_found_authorizes_offline() {
        let mut config = EngineConfig::default();
        config.local_authorize_offline = true;
        // Disable the LocalPreAuthorize fast path so `begin` waits for an
        // online Authorize response instead of admitting immediately —
        // this test targets the offline decision table on a later timeout.
        config.local_pre_authorize = false;
        let (mut engine, mut journal, reservations, _unused, mut queue) = engine_with(1, config);
        let fs = crate::filesystem::MemFilesystem::new();
        let mut local_list = LocalAuthList::new();
        local_list
            .replace_full(
                &fs,
                1,
                vec![crate::authlist::LocalListEntry {
                    id_tag: "L".to_string(),
                    parent_id_tag: Some("P".to_string()),
                    status: crate::authlist::AuthStatus::Accepted,
                }],
            )
            .unwrap();
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "L", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications = engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Timeout);
        assert!(has_started(&notifications), "S4: localAuthFound + LocalAuthorizeOffline authorizes on timeout");
    }

    #[test]
    fn authorize_timeout_without_local_auth_aborts() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "UNKNOWN", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications = engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Timeout);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, TxNotification::Aborted { reason: AbortReason::AuthorizationTimeout, .. })));
    }

    #[test]
    fn local_list_conflict_detected_on_accepted_response() {
        let (mut engine, mut journal, reservations, _unused, mut queue) = engine_with(1, EngineConfig::default());
        let fs = crate::filesystem::MemFilesystem::new();
        let mut local_list = LocalAuthList::new();
        local_list
            .replace_full(
                &fs,
                1,
                vec![crate::authlist::LocalListEntry {
                    id_tag: "A".to_string(),
                    parent_id_tag: Some("LOCALPARENT".to_string()),
                    status: crate::authlist::AuthStatus::Accepted,
                }],
            )
            .unwrap();
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        let notifications = engine.confirm_authorization(
            &mut journal,
            &local_list,
            &mut queue,
            handle,
            AuthResult::Accepted { parent_id_tag: Some("SERVERPARENT".to_string()) },
        );
        assert!(notifications
            .iter()
            .any(|n| matches!(n, TxNotification::LocalListConflict { .. })));
    }

    #[test]
    fn remote_start_point_ignores_local_pre_authorize_when_configured() {
        let mut config = EngineConfig::default();
        config.authorize_remote_tx_requests = true;
        let (mut engine, mut journal, reservations, _unused, mut queue) = engine_with(1, config);
        let fs = crate::filesystem::MemFilesystem::new();
        let mut local_list = LocalAuthList::new();
        local_list
            .replace_full(
                &fs,
                1,
                vec![crate::authlist::LocalListEntry {
                    id_tag: "A".to_string(),
                    parent_id_tag: None,
                    status: crate::authlist::AuthStatus::Accepted,
                }],
            )
            .unwrap();
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, true)
            .unwrap();
        assert!(!has_started(&notifications), "remote request must wait for online Authorize");
    }

    #[test]
    fn on_start_confirmed_advances_journal_front() {
        let (mut engine, mut journal, reservations, local_list, mut queue) = engine_with(1, EngineConfig::default());
        let notifications = engine
            .begin(&mut journal, &reservations, &local_list, &mut queue, 1, "A", Timestamp::Unix(1), false, false)
            .unwrap();
        let handle = began_handle(&notifications);
        engine.confirm_authorization(&mut journal, &local_list, &mut queue, handle, AuthResult::Accepted { parent_id_tag: None });
        engine.on_start_confirmed(&mut journal, handle.tx_nr);
        assert!(journal.get(handle.tx_nr).unwrap().start_sync.confirmed);
    }
}
