//! Meter-value record (spec.md §3 "Meter-value record").

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::enums::{Measurand, ReadingContext};

/// Location of the sampled value, mirroring the OCPP `Location` enum
/// (`Body`, `Cable`, `EV`, `Inlet`, `Outlet`). Kept as a plain string-typed
/// newtype rather than a closed enum since vendors commonly add values here
/// and spec.md doesn't enumerate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    pub measurand: Measurand,
    pub unit: Option<String>,
    pub location: Option<Location>,
    pub phase: Option<String>,
    pub value: String,
}

/// One meter-value reading, optionally bound to a transaction via
/// `(evseId, txNr)` or free-standing (clock-aligned) — spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValueRecord {
    pub evse_id: u32,
    pub tx_nr: Option<u32>,
    pub timestamp: Timestamp,
    pub reading_context: ReadingContext,
    pub sampled_values: Vec<SampledValue>,
}

impl MeterValueRecord {
    pub fn new(evse_id: u32, timestamp: Timestamp, reading_context: ReadingContext) -> Self {
        Self {
            evse_id,
            tx_nr: None,
            timestamp,
            reading_context,
            sampled_values: Vec::new(),
        }
    }

    pub fn bound_to(mut self, tx_nr: u32) -> Self {
        self.tx_nr = Some(tx_nr);
        self
    }

    pub fn with_sample(mut self, sample: SampledValue) -> Self {
        self.sampled_values.push(sample);
        self
    }

    pub fn is_tx_bound(&self) -> bool {
        self.tx_nr.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_standing_by_default() {
        let mv = MeterValueRecord::new(1, Timestamp::Unix(1), ReadingContext::SampleClock);
        assert!(!mv.is_tx_bound());
    }

    #[test]
    fn binding_to_tx_sets_tx_nr() {
        let mv = MeterValueRecord::new(1, Timestamp::Unix(1), ReadingContext::TransactionBegin)
            .bound_to(5);
        assert!(mv.is_tx_bound());
        assert_eq!(mv.tx_nr, Some(5));
    }
}
