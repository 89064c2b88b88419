//! Wire-facing enums shared across the journal, metering and engine
//! modules, plus the comma-separated-list parsing design note from
//! spec.md §9: "implement a FromStr that rejects on the first unknown
//! token and preserves ordering. The caller keeps the original token list
//! for round-trip serialization."
//!
//! `strum`/`strum_macros` give `Display`/`EnumString` for the individual
//! tokens, grounded on `mastercom-au-ocpp`'s use of the same crates for its
//! OCPP enum surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Why a transaction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum StopReason {
    Local,
    Remote,
    EVDisconnected,
    DeAuthorized,
    HardReset,
    SoftReset,
    PowerLoss,
    Reboot,
    UnlockCommand,
    EmergencyStop,
    Other,
}

/// Engine-internal reason an abort/stop happened, used to pick `StopReason`
/// and to drive `txNotification` events (spec.md §4.1 outputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    ConnectionTimeout,
    AuthorizationTimeout,
    AuthorizationRejected,
    ReservationConflict,
    QueueFull,
}

/// MeterValue sample classifier (spec.md §3 "Meter-value record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ReadingContext {
    #[strum(serialize = "Transaction.Begin")]
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[strum(serialize = "Transaction.End")]
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
    #[strum(serialize = "Sample.Periodic")]
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[strum(serialize = "Sample.Clock")]
    #[serde(rename = "Sample.Clock")]
    SampleClock,
    Trigger,
    Other,
}

/// Measurand tokens recognized in `MeterValuesSampledData` /
/// `StopTxnSampledData` / `MeterValuesAlignedData` (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum Measurand {
    #[strum(serialize = "Energy.Active.Import.Register")]
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[strum(serialize = "Power.Active.Import")]
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[strum(serialize = "Current.Import")]
    #[serde(rename = "Current.Import")]
    CurrentImport,
    Voltage,
    #[strum(serialize = "SoC")]
    #[serde(rename = "SoC")]
    StateOfCharge,
    Temperature,
    Frequency,
}

/// Connector status (spec.md §4.1 "States per connector"). 2.0.1's
/// `Occupied` is modeled as a distinct variant rather than folded into
/// `Preparing`/`Finishing`, per the REDESIGN note that status should be a
/// derived, not imperative, function of engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
    Occupied,
}

/// 2.0.1 transaction `chargingState` (spec.md §3, 2.0.1 fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ChargingState {
    Charging,
    EVConnected,
    SuspendedEV,
    SuspendedEVSE,
    Idle,
}

/// `TxStartPoint`/`TxStopPoint` condition tokens (spec.md §4.1, 2.0.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum TxControlPoint {
    ParkingBayOccupancy,
    EVConnected,
    Authorized,
    DataSigned,
    PowerPathClosed,
    EnergyTransfer,
}

/// An ordered, deduplication-preserving set of comma-separated tokens, as
/// used for `TxStartPoint`, `TxStopPoint`, `MeterValuesSampledData`, and
/// other multi-valued configuration keys. `FromStr` rejects atomically on
/// the first unknown token (spec.md §4.5 "Validators reject unknown
/// measurand names atomically"); the original token order is kept so the
/// value can be serialized back out unchanged (spec.md §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenList<T> {
    tokens: Vec<T>,
    original: String,
}

impl<T: Copy> TokenList<T> {
    pub fn contains(&self, needle: T) -> bool
    where
        T: PartialEq,
    {
        self.tokens.iter().any(|t| *t == needle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.tokens.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<T> fmt::Display for TokenList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

#[derive(Debug)]
pub struct TokenListParseError {
    pub bad_token: String,
}

impl fmt::Display for TokenListParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized token: {}", self.bad_token)
    }
}

impl std::error::Error for TokenListParseError {}

impl<T: FromStr> FromStr for TokenList<T> {
    type Err = TokenListParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = Vec::new();
        for raw in s.split(',') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed = T::from_str(trimmed).map_err(|_| TokenListParseError {
                bad_token: trimmed.to_string(),
            })?;
            tokens.push(parsed);
        }
        Ok(TokenList {
            tokens,
            original: s.to_string(),
        })
    }
}
