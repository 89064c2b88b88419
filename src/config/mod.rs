//! Configuration (spec.md §2 bullet 2, §6 "Config / variable surface").
//!
//! Two distinct surfaces, matching the teacher's own split between
//! `config.rs` (host bootstrap, TOML) and the runtime variable store
//! `interfaces`/`domain` code persists to the database:
//!
//! - [`bootstrap`]: host-level settings read once at startup (data
//!   directory, CSMS endpoint, charge point identity) via `toml` +
//!   `dirs-next`, mirroring the teacher's `AppConfig::load` /
//!   `default_config_path` pair.
//! - [`store`]: the OCPP Configuration (1.6) / Variable (2.0.1) store —
//!   the set of named, typed, mutable knobs the spec and the CSMS can
//!   both read and (within limits) write, persisted to
//!   `ocpp-config.jsn`.

pub mod bootstrap;
pub mod store;

pub use bootstrap::{default_config_path, HostConfig};
pub use store::{Accessibility, ConfigStore, VariableDescriptor};
