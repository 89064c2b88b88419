//! # evse-ocpp-core
//!
//! Charger-side OCPP 1.6 / 2.0.1 transaction-lifecycle engine: a library
//! that owns the begin/stop protocol, the transaction journal, metering
//! cadence, and the outbound message queue for a single charge point. No
//! binary ships from this crate — the host process owns the WebSocket
//! event loop, hardware drivers, and UI.
//!
//! ## Modules
//!
//! - **clock**: monotonic uptime plus wall-clock, with explicit sync tracking
//! - **config**: host bootstrap (TOML) and the OCPP configuration/variable store
//! - **filesystem**: the persisted-state adapter boundary
//! - **wire**: the `[type, id, ...]` OCPP-J frame envelope
//! - **enums**: wire-facing enums and the comma-list `TokenList` parser
//! - **journal**: the per-connector transaction/meter-value ring buffer
//! - **metering**: measurand sampling and cadence timers
//! - **engine**: the transaction state machine (begin/stop protocol, FreeVend)
//! - **queue**: outbound message multiplexing, retry, and the boot gate
//! - **registry**: incoming-action dispatch table
//! - **boot**: boot-counter persistence and crash-recovery wipe
//! - **availability**: connector status derivation
//! - **authlist**: local authorization list
//! - **reservation**: `ReserveNow`/`CancelReservation`
//! - **smart_charging**: charging-profile stack storage
//! - **firmware**: firmware/diagnostics status sequencing
//! - **certificate**: certificate store
//! - **connection**: the WebSocket transport boundary
//! - **error**: crate-wide error types
//! - **context**: `ChargePoint`, the top-level object composing every
//!   module above behind the library's `initialize`/`loop`/
//!   `beginTransaction`/`ocppPermitsCharge` API surface

pub mod authlist;
pub mod availability;
pub mod boot;
pub mod certificate;
pub mod clock;
pub mod config;
pub mod connection;
pub mod context;
pub mod engine;
pub mod enums;
pub mod error;
pub mod filesystem;
pub mod firmware;
pub mod journal;
pub mod metering;
pub mod queue;
pub mod registry;
pub mod reservation;
pub mod smart_charging;
pub mod wire;

pub use clock::{Clock, Timestamp};
pub use context::{ChargePoint, ContextError};
pub use engine::{EngineConfig, TransactionEngine, TxNotification};
pub use error::{ConfigError, EngineError, FsError, JournalError, QueueError};
pub use journal::{ConnectorJournal, Transaction, TxHandle};
