//! Transaction record (spec.md §3 "Transaction record").

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::enums::StopReason;

/// `TXNR_MAX` — txNr is a local sequence number modulo this value
/// (spec.md §3).
pub const TXNR_MAX: u32 = 1_000_000;

/// Tracks one request/response pair (StartTx, StopTx, or a 2.0.1
/// TransactionEvent) through the Message Queue (spec.md §3 "startSync,
/// stopSync").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncPoint {
    pub requested: bool,
    pub confirmed: bool,
    pub op_nr: Option<u64>,
    pub attempt_nr: u32,
    /// Uptime (ms) at which the last attempt was made; used to gate retry
    /// per `TransactionMessageRetryInterval` (spec.md §4.2).
    pub attempt_time_ms: Option<u64>,
}

impl SyncPoint {
    pub fn request(&mut self, op_nr: u64) {
        self.requested = true;
        self.op_nr = Some(op_nr);
    }

    pub fn confirm(&mut self) {
        self.confirmed = true;
    }
}

/// A `(evseId, txNr, beginTimestamp)` fingerprint captured by every
/// deferred callback (Authorize response, RemoteStop response,
/// UnlockConnector) so it can detect that the transaction it was issued
/// against has since been replaced (spec.md §4.1 "Staleness rule", §9
/// design note "Callback capture of tx identity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle {
    pub evse_id: u32,
    pub tx_nr: u32,
    pub begin_fingerprint: i64,
}

fn fingerprint(ts: Timestamp) -> i64 {
    match ts {
        Timestamp::Unix(t) => t,
        // Negate uptime-based fingerprints so they can never collide with a
        // legitimate Unix timestamp (which is always positive in practice).
        Timestamp::Uptime(t) => -(t as i64),
    }
}

/// A charging transaction, covering both the 1.6 and 2.0.1 field sets
/// (spec.md §3). The 2.0.1-only fields are `Option` and unused by the 1.6
/// engine path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub evse_id: u32,
    pub tx_nr: u32,

    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub reservation_id: Option<i32>,

    pub begin_timestamp: Timestamp,
    pub start_timestamp: Option<Timestamp>,
    pub stop_timestamp: Option<Timestamp>,

    /// -1 = undefined, per spec.md §3.
    pub meter_start: i32,
    pub meter_stop: i32,

    pub start_sync: SyncPoint,
    pub stop_sync: SyncPoint,

    pub active: bool,
    pub authorized: bool,
    pub id_tag_deauthorized: bool,
    pub silent: bool,
    pub aborted: bool,
    pub completed: bool,

    pub stop_reason: Option<StopReason>,

    // ---- 2.0.1 additions ----
    pub transaction_id: Option<String>,
    pub charging_state: Option<crate::enums::ChargingState>,
    pub stopped_reason: Option<StopReason>,
    pub stop_trigger: Option<String>,
    pub seq_nos: Vec<u32>,
    pub remote_start_id: Option<i32>,
    pub is_authorization_active: bool,
    pub is_deauthorized: bool,
    pub stop_id_token: Option<String>,
    pub notify_id_token: bool,
    pub notify_stop_id_token: bool,
    pub notify_charging_state: bool,
    pub notify_evse_id: bool,
    pub notify_remote_start_id: bool,
    pub ev_connection_timeout_listen: bool,
}

impl Transaction {
    pub fn new(evse_id: u32, tx_nr: u32, id_tag: impl Into<String>, begin_timestamp: Timestamp) -> Self {
        Self {
            evse_id,
            tx_nr,
            id_tag: id_tag.into(),
            parent_id_tag: None,
            reservation_id: None,
            begin_timestamp,
            start_timestamp: None,
            stop_timestamp: None,
            meter_start: -1,
            meter_stop: -1,
            start_sync: SyncPoint::default(),
            stop_sync: SyncPoint::default(),
            active: true,
            authorized: false,
            id_tag_deauthorized: false,
            silent: false,
            aborted: false,
            completed: false,
            stop_reason: None,
            transaction_id: None,
            charging_state: None,
            stopped_reason: None,
            stop_trigger: None,
            seq_nos: Vec::new(),
            remote_start_id: None,
            is_authorization_active: false,
            is_deauthorized: false,
            stop_id_token: None,
            notify_id_token: false,
            notify_stop_id_token: false,
            notify_charging_state: false,
            notify_evse_id: false,
            notify_remote_start_id: false,
            ev_connection_timeout_listen: false,
        }
    }

    pub fn handle(&self) -> TxHandle {
        TxHandle {
            evse_id: self.evse_id,
            tx_nr: self.tx_nr,
            begin_fingerprint: fingerprint(self.begin_timestamp),
        }
    }

    /// `true` if `handle` still refers to this transaction — the mandatory
    /// check every deferred callback must perform before mutating
    /// (spec.md §4.1, §8 testable property 3).
    pub fn matches(&self, handle: TxHandle) -> bool {
        self.evse_id == handle.evse_id
            && self.tx_nr == handle.tx_nr
            && fingerprint(self.begin_timestamp) == handle.begin_fingerprint
    }

    pub fn started(&self) -> bool {
        self.start_sync.requested
    }

    pub fn stopped(&self) -> bool {
        self.stop_sync.requested
    }

    /// Both sync points confirmed (spec.md §3 Lifecycle: "Destroyed when
    /// both sync points are confirmed").
    pub fn is_fully_confirmed(&self) -> bool {
        self.silent || (self.start_sync.confirmed && self.stop_sync.confirmed)
    }

    /// A transaction is non-terminal while it hasn't both stopped and been
    /// fully confirmed (spec.md §3 invariant: "At most one transaction per
    /// connector is non-terminal at any time").
    pub fn is_terminal(&self) -> bool {
        self.aborted || (self.stopped() && self.is_fully_confirmed())
    }

    /// Begin the stop half of the lifecycle.
    pub fn stop(&mut self, stop_timestamp: Timestamp, meter_stop: i32, reason: StopReason) {
        self.active = false;
        self.stop_timestamp = Some(stop_timestamp);
        self.meter_stop = meter_stop;
        self.stop_reason = Some(reason);
    }

    pub fn start(&mut self, start_timestamp: Timestamp, meter_start: i32) {
        self.start_timestamp = Some(start_timestamp);
        self.meter_start = meter_start;
    }
}
