//! Charge point context — the library API surface spec.md §6 names
//! (`initialize`/`loop`, `beginTransaction`, `ocppPermitsCharge`,
//! `isAcceptedByCsms`, ...), composing every other module into one
//! object a host embeds. Every other module in this crate is usable
//! standalone for its own unit tests; `ChargePoint` is where they're
//! wired together the way a consumer actually calls this library.
//!
//! Grounded on the teacher's `main.rs`, which builds one long-lived
//! `AppConfig` + service struct at startup and hands requests to it —
//! here the struct owns one `TransactionEngine` shared across
//! connectors plus a per-connector `ConnectorJournal`/`AvailabilityTracker`,
//! since spec.md §4.1 models the engine as "per connector" state rather
//! than one engine instance per connector object.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::authlist::LocalAuthList;
use crate::availability::{AvailabilityTracker, ConnectorInputs};
use crate::boot::{self, BootStats};
use crate::clock::{Clock, Timestamp};
use crate::config::{Accessibility, ConfigStore, HostConfig};
use crate::engine::{AuthResult, EngineConfig, EngineInput, TransactionEngine, TxNotification};
use crate::enums::{ConnectorStatus, StopReason, TxControlPoint};
use crate::error::{ConfigError, EngineError, FsError, JournalError, QueueError};
use crate::filesystem::FilesystemAdapter;
use crate::journal::{ConnectorJournal, TxHandle};
use crate::queue::{MessageQueue, OutboundMessage};
use crate::registry::{OperationHandler, OperationRegistry};
use crate::reservation::ReservationBook;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown connector: {0}")]
    UnknownConnector(u32),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

fn declare_standard_keys(config: &mut ConfigStore) {
    config.declare("ConnectionTimeOut", "60", Accessibility::ReadWrite, false);
    config.declare("StopTransactionOnEVSideDisconnect", "true", Accessibility::ReadWrite, false);
    config.declare("StopTransactionOnInvalidId", "true", Accessibility::ReadWrite, false);
    config.declare("LocalPreAuthorize", "true", Accessibility::ReadWrite, false);
    config.declare("LocalAuthorizeOffline", "true", Accessibility::ReadWrite, false);
    config.declare("AllowOfflineTxForUnknownId", "false", Accessibility::ReadWrite, false);
    config.declare("AuthorizeRemoteTxRequests", "true", Accessibility::ReadWrite, false);
    config.declare("AuthorizationTimeout", "20", Accessibility::ReadWrite, false);
    config.declare("SilentOfflineTransactions", "false", Accessibility::ReadWrite, false);
    config.declare("TxStartOnPowerPathClosed", "false", Accessibility::ReadWrite, false);
    config.declare("FreeVendActive", "false", Accessibility::ReadWrite, true);
    config.declare("FreeVendIdTag", "", Accessibility::ReadWrite, true);
    config.declare("TransactionMessageAttempts", "3", Accessibility::ReadWrite, false);
    config.declare("TransactionMessageRetryInterval", "60", Accessibility::ReadWrite, false);
    config.declare("PreBootTransactions", "false", Accessibility::ReadWrite, true);
}

/// Composes every collaborator module behind the spec.md §6 library API.
/// One instance per charge point; connectors are added with
/// `add_connector` and addressed by `evseId` thereafter.
pub struct ChargePoint {
    clock: Clock,
    fs: Box<dyn FilesystemAdapter>,
    host_config: HostConfig,
    config: ConfigStore,
    queue: MessageQueue,
    registry: OperationRegistry,
    journals: HashMap<u32, ConnectorJournal>,
    engine: TransactionEngine,
    reservations: ReservationBook,
    local_list: LocalAuthList,
    availability: HashMap<u32, AvailabilityTracker>,
    boot_stats: BootStats,
    accepted_by_csms: bool,
    connected: bool,
}

impl ChargePoint {
    /// spec.md §6 `initialize`: boot-counter bump/recovery, load the
    /// config store and local list. Connectors are added afterward via
    /// `add_connector`, which recovers each journal independently.
    pub fn new(fs: Box<dyn FilesystemAdapter>, host_config: HostConfig) -> Result<Self, ContextError> {
        let boot_stats = boot::boot(fs.as_ref())?;
        let mut config = ConfigStore::load(fs.as_ref())?;
        declare_standard_keys(&mut config);
        let local_list = LocalAuthList::load(fs.as_ref())?;
        Ok(Self {
            clock: Clock::new(),
            fs,
            host_config,
            config,
            queue: MessageQueue::new(3, 60_000),
            registry: OperationRegistry::new(),
            journals: HashMap::new(),
            engine: TransactionEngine::new(),
            reservations: ReservationBook::new(),
            local_list,
            availability: HashMap::new(),
            boot_stats,
            accepted_by_csms: false,
            connected: false,
        })
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host_config
    }

    fn engine_config_from_store(&self) -> EngineConfig {
        let bool_of = |key: &str, default: bool| self.config.get(key).ok().map(|v| v == "true").unwrap_or(default);
        EngineConfig {
            authorize_remote_tx_requests: bool_of("AuthorizeRemoteTxRequests", true),
            local_pre_authorize: bool_of("LocalPreAuthorize", true),
            local_authorize_offline: bool_of("LocalAuthorizeOffline", false),
            stop_transaction_on_invalid_id: bool_of("StopTransactionOnInvalidId", true),
            stop_transaction_on_ev_side_disconnect: bool_of("StopTransactionOnEVSideDisconnect", true),
            allow_offline_tx_for_unknown_id: bool_of("AllowOfflineTxForUnknownId", false),
            free_vend_active: bool_of("FreeVendActive", false),
            free_vend_id_tag: self.config.get("FreeVendIdTag").ok().filter(|v| !v.is_empty()).map(str::to_string),
            tx_start_point: Vec::new(),
            tx_stop_point: Vec::new(),
        }
    }

    /// Register a connector: recovers its journal from disk and derives
    /// its `EngineConfig` from the current configuration store.
    pub fn add_connector(&mut self, evse_id: u32, capacity: u32) -> Result<(), ContextError> {
        let engine_config = self.engine_config_from_store();
        let mut journal = ConnectorJournal::new(evse_id, capacity);
        journal.recover(self.fs.as_ref())?;
        self.journals.insert(evse_id, journal);
        self.availability.insert(evse_id, AvailabilityTracker::new(evse_id));
        self.engine.configure(evse_id, engine_config);
        Ok(())
    }

    /// spec.md §6 `loop()`: the host's cooperative-scheduling tick.
    /// Sweeps expired reservations; the queue's own due-message check
    /// is polled separately via `next_outbound` since sending is the
    /// host's job, not this crate's (§5: no internal threads).
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let clock = &self.clock;
        self.reservations.sweep_expired(now, |ts| clock.resolve(ts));
    }

    pub fn next_outbound(&self) -> Option<OutboundMessage> {
        self.queue.next_due(self.clock.uptime_ms())
    }

    pub fn mark_sent(&mut self, unique_id: &str) {
        self.queue.mark_sent(unique_id, self.clock.uptime_ms());
    }

    pub fn resolve_outbound(&mut self, unique_id: &str) -> Result<(), ContextError> {
        self.queue.resolve(unique_id)?;
        Ok(())
    }

    pub fn fail_outbound(&mut self, unique_id: &str, code: &str, description: &str) -> Result<(), ContextError> {
        self.queue.fail(unique_id, code, description)?;
        Ok(())
    }

    // ---- transaction control (spec.md §6) ----

    pub fn begin_transaction(&mut self, evse_id: u32, id_tag: &str) -> Result<Vec<TxNotification>, ContextError> {
        let timestamp = self.clock.now();
        let silent_offline_allowed = self.config.get("SilentOfflineTransactions").map(|v| v == "true").unwrap_or(false);
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        let notifications = self.engine.begin(
            journal,
            &self.reservations,
            &self.local_list,
            &mut self.queue,
            evse_id,
            id_tag,
            timestamp,
            silent_offline_allowed,
            false,
        )?;
        Ok(notifications)
    }

    /// `beginTransaction_authorized`: the caller already knows the id tag
    /// is authorized (e.g. offline, supplied by the host's own cache) —
    /// begins the tx and immediately resolves it as Accepted rather than
    /// waiting on an online Authorize round trip.
    pub fn begin_transaction_authorized(
        &mut self,
        evse_id: u32,
        id_tag: &str,
        parent_id_tag: Option<String>,
    ) -> Result<Vec<TxNotification>, ContextError> {
        let mut notifications = self.begin_transaction(evse_id, id_tag)?;
        let handle = notifications.iter().find_map(|n| match n {
            TxNotification::Began { handle } => Some(*handle),
            _ => None,
        });
        if let Some(handle) = handle {
            let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
            let more = self.engine.confirm_authorization(
                journal,
                &self.local_list,
                &mut self.queue,
                handle,
                AuthResult::Accepted { parent_id_tag },
            );
            notifications.extend(more);
        }
        Ok(notifications)
    }

    pub fn confirm_authorization(&mut self, evse_id: u32, handle: TxHandle, result: AuthResult) -> Result<Vec<TxNotification>, ContextError> {
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        Ok(self.engine.confirm_authorization(journal, &self.local_list, &mut self.queue, handle, result))
    }

    pub fn apply_connector_input(&mut self, evse_id: u32, input: EngineInput) -> Result<Vec<TxNotification>, ContextError> {
        let timestamp = self.clock.now();
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        Ok(self.engine.apply_input(journal, &self.reservations, &self.local_list, &mut self.queue, evse_id, input, timestamp))
    }

    pub fn on_start_confirmed(&mut self, evse_id: u32, tx_nr: u32) -> Result<(), ContextError> {
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        self.engine.on_start_confirmed(journal, tx_nr);
        Ok(())
    }

    pub fn on_stop_confirmed(&mut self, evse_id: u32, tx_nr: u32) -> Result<(), ContextError> {
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        self.engine.on_stop_confirmed(journal, tx_nr);
        Ok(())
    }

    /// `endTransaction`: stops the active tx if `id_tag` matches its
    /// `idTag`/`parentIdTag`, or unconditionally when `id_tag` is `None`
    /// (spec.md §4.1 "nullptr idTag (force)").
    pub fn end_transaction(&mut self, evse_id: u32, id_tag: Option<&str>) -> Result<Option<TxNotification>, ContextError> {
        let Some(handle) = self.engine.active_handle(evse_id) else {
            return Ok(None);
        };
        if let Some(id_tag) = id_tag {
            let journal = self.journals.get(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
            let matches = journal
                .get(handle.tx_nr)
                .map(|tx| tx.id_tag == id_tag || tx.parent_id_tag.as_deref() == Some(id_tag))
                .unwrap_or(false);
            if !matches {
                return Ok(None);
            }
        }
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        Ok(self.engine.stop(journal, &mut self.queue, handle, StopReason::Local))
    }

    /// `endTransaction_authorized`: a server-resolved stop (matching
    /// `parentIdTag` via online Authorize, or RemoteStop) rather than a
    /// locally presented id tag.
    pub fn end_transaction_authorized(&mut self, evse_id: u32) -> Result<Option<TxNotification>, ContextError> {
        let Some(handle) = self.engine.active_handle(evse_id) else {
            return Ok(None);
        };
        let journal = self.journals.get_mut(&evse_id).ok_or(ContextError::UnknownConnector(evse_id))?;
        Ok(self.engine.stop(journal, &mut self.queue, handle, StopReason::Remote))
    }

    // ---- state queries (spec.md §6) ----

    pub fn is_transaction_active(&self, evse_id: u32) -> bool {
        self.engine.active_handle(evse_id).is_some()
    }

    pub fn is_transaction_running(&self, evse_id: u32) -> bool {
        let Some(handle) = self.engine.active_handle(evse_id) else {
            return false;
        };
        self.journals
            .get(&evse_id)
            .and_then(|j| j.get(handle.tx_nr))
            .map(|tx| tx.started() && tx.active)
            .unwrap_or(false)
    }

    pub fn get_transaction_id_tag(&self, evse_id: u32) -> Option<String> {
        let handle = self.engine.active_handle(evse_id)?;
        self.journals.get(&evse_id)?.get(handle.tx_nr).map(|tx| tx.id_tag.clone())
    }

    /// spec.md §8 testable property 4: `(TxStartOnPowerPathClosed ∧
    /// tx.authorized ∧ tx.active) or (tx.running ∧ tx.active)`, and not
    /// `idTagDeauthorized` except under FreeVend.
    pub fn ocpp_permits_charge(&self, evse_id: u32) -> bool {
        let Some(handle) = self.engine.active_handle(evse_id) else {
            return false;
        };
        let Some(tx) = self.journals.get(&evse_id).and_then(|j| j.get(handle.tx_nr)) else {
            return false;
        };
        let free_vend = self.engine.config(evse_id).map(|c| c.free_vend_active).unwrap_or(false);
        if tx.id_tag_deauthorized && !free_vend {
            return false;
        }
        let power_path_start = self
            .engine
            .config(evse_id)
            .map(|c| c.tx_start_point.iter().any(|p| *p == TxControlPoint::PowerPathClosed))
            .unwrap_or(false);
        if power_path_start && tx.authorized && tx.active {
            return true;
        }
        tx.started() && tx.active
    }

    pub fn get_charge_point_status(&self, evse_id: u32) -> Option<ConnectorStatus> {
        self.availability.get(&evse_id).map(|t| t.status())
    }

    pub fn update_connector_availability(&mut self, evse_id: u32, inputs: ConnectorInputs) -> Result<Option<ConnectorStatus>, ContextError> {
        self.availability
            .get_mut(&evse_id)
            .ok_or(ContextError::UnknownConnector(evse_id))
            .map(|t| t.update(inputs))
    }

    pub fn is_operative(&self, evse_id: u32) -> bool {
        !matches!(
            self.get_charge_point_status(evse_id),
            Some(ConnectorStatus::Unavailable) | Some(ConnectorStatus::Faulted) | None
        )
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_accepted_by_csms(&self) -> bool {
        self.accepted_by_csms
    }

    /// Call once BootNotification resolves `Accepted`: opens the queue's
    /// tx-scoped gate and marks this boot successful (resets the
    /// consecutive-failure counter, spec.md §7).
    pub fn mark_accepted_by_csms(&mut self) -> Result<(), ContextError> {
        self.accepted_by_csms = true;
        self.queue.set_boot_pending(false);
        boot::mark_boot_success(self.fs.as_ref(), &mut self.boot_stats)?;
        Ok(())
    }

    pub fn boot_stats(&self) -> &BootStats {
        &self.boot_stats
    }

    pub fn get_unix_time(&self) -> Option<i64> {
        self.clock.now_unix()
    }

    pub fn set_unix_time(&mut self, unix_time: i64) {
        self.clock.set_unix_time(unix_time);
    }

    pub fn get_uptime_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ---- configuration accessors ----

    pub fn get_configuration(&self, key: &str) -> Result<&str, ContextError> {
        self.config.get(key).map_err(ContextError::from)
    }

    pub fn set_configuration(&mut self, key: &str, value: &str, validate: impl FnOnce(&str, &str) -> Result<(), String>) -> Result<(), ContextError> {
        self.config.set(key, value, validate)?;
        self.config.commit(self.fs.as_ref())?;
        Ok(())
    }

    pub fn configuration_descriptors(&self) -> Vec<crate::config::VariableDescriptor> {
        self.config.descriptors()
    }

    // ---- custom operation registration ----

    pub fn register_operation(&mut self, action: impl Into<String>, handler: Box<dyn OperationHandler>) {
        self.registry.register(action, handler);
    }

    pub fn dispatch_incoming(&self, action: &str, payload: Value) -> Result<Value, ContextError> {
        self.registry.dispatch(action, payload).map_err(ContextError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    fn charge_point() -> ChargePoint {
        let fs: Box<dyn FilesystemAdapter> = Box::new(MemFilesystem::new());
        let mut cp = ChargePoint::new(fs, HostConfig::default()).unwrap();
        cp.add_connector(1, 4).unwrap();
        cp
    }

    #[test]
    fn begin_and_confirm_starts_transaction() {
        let mut cp = charge_point();
        let notifications = cp.begin_transaction(1, "A").unwrap();
        let handle = notifications
            .iter()
            .find_map(|n| match n {
                TxNotification::Began { handle } => Some(*handle),
                _ => None,
            })
            .unwrap();
        assert!(cp.is_transaction_active(1));
        cp.confirm_authorization(1, handle, AuthResult::Accepted { parent_id_tag: None }).unwrap();
        assert!(cp.is_transaction_running(1));
        assert!(cp.ocpp_permits_charge(1));
        assert_eq!(cp.get_transaction_id_tag(1), Some("A".to_string()));
    }

    #[test]
    fn begin_transaction_authorized_skips_online_round_trip() {
        let mut cp = charge_point();
        cp.begin_transaction_authorized(1, "mIdTag", None).unwrap();
        assert!(cp.is_transaction_running(1));
        assert!(cp.ocpp_permits_charge(1));
    }

    #[test]
    fn end_transaction_rejects_mismatched_id_tag() {
        let mut cp = charge_point();
        cp.begin_transaction_authorized(1, "A", None).unwrap();
        let result = cp.end_transaction(1, Some("WRONG")).unwrap();
        assert!(result.is_none(), "mismatched idTag must not stop the transaction");
        assert!(cp.is_transaction_active(1));
    }

    #[test]
    fn end_transaction_force_stops_regardless_of_id_tag() {
        let mut cp = charge_point();
        cp.begin_transaction_authorized(1, "A", None).unwrap();
        let result = cp.end_transaction(1, None).unwrap();
        assert!(result.is_some());
        assert!(!cp.is_transaction_active(1));
    }

    #[test]
    fn availability_updates_charge_point_status() {
        let mut cp = charge_point();
        let changed = cp
            .update_connector_availability(1, ConnectorInputs { plugged: true, evse_ready: true, ..Default::default() })
            .unwrap();
        assert_eq!(changed, Some(ConnectorStatus::Preparing));
        assert_eq!(cp.get_charge_point_status(1), Some(ConnectorStatus::Preparing));
    }

    #[test]
    fn accepted_by_csms_opens_boot_gate() {
        let mut cp = charge_point();
        assert!(!cp.is_accepted_by_csms());
        cp.mark_accepted_by_csms().unwrap();
        assert!(cp.is_accepted_by_csms());
    }

    #[test]
    fn configuration_round_trips_through_store() {
        let mut cp = charge_point();
        cp.set_configuration("AuthorizationTimeout", "45", |_, _| Ok(())).unwrap();
        assert_eq!(cp.get_configuration("AuthorizationTimeout").unwrap(), "45");
    }

    #[test]
    fn unknown_connector_is_reported() {
        let mut cp = charge_point();
        let err = cp.begin_transaction(99, "A").unwrap_err();
        assert!(matches!(err, ContextError::UnknownConnector(99)));
    }

    #[test]
    fn registered_operation_is_dispatched() {
        struct Echo;
        impl OperationHandler for Echo {
            fn handle(&self, payload: Value) -> Result<Value, QueueError> {
                Ok(payload)
            }
        }
        let mut cp = charge_point();
        cp.register_operation("UnlockConnector", Box::new(Echo));
        let result = cp.dispatch_incoming("UnlockConnector", serde_json::json!({"connectorId": 1})).unwrap();
        assert_eq!(result, serde_json::json!({"connectorId": 1}));
    }
}
