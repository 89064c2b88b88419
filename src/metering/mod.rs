//! Metering (spec.md §2 bullet 6, §4.5): measurand sampling, cadence
//! timers and the TransactionBegin/SamplePeriodic/TransactionEnd
//! ordering guarantee.
//!
//! Cadence is driven by an explicit `tick`, not a background task — the
//! crate has no internal threads (spec.md §5), so the host loop is
//! responsible for calling `Cadence::due` on whatever schedule it pumps
//! the engine.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::trace;

use crate::clock::Timestamp;
use crate::enums::{Measurand, ReadingContext, TokenList};
use crate::journal::{MeterValueRecord, SampledValue};

/// A single measurand sample source: given a measurand, produce its
/// current value as a string (already unit-converted by the caller).
/// Collaborator the engine's host supplies — the crate has no notion of
/// what a volt or an ampere actually is (spec.md §1 out-of-scope: "no
/// hardware metering drivers").
pub trait MeterReader: Send + Sync {
    fn sample(&self, measurand: Measurand) -> Option<String>;
}

/// Which cadence, if any, triggered a particular tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceKind {
    Sample,
    TxUpdated,
    ClockAligned,
    TxEnded,
}

/// Tracks the four interval configs from spec.md §4.5 and reports which
/// ones are due on a given uptime tick. All intervals are in seconds;
/// `0` disables that cadence, matching OCPP's "0 = disabled" convention.
pub struct Cadence {
    sample_interval_s: u32,
    tx_updated_interval_s: u32,
    clock_aligned_interval_s: u32,
    tx_ended_interval_s: u32,
    last_sample_ms: HashMap<u32, u64>,
    last_tx_updated_ms: HashMap<u32, u64>,
    last_clock_aligned_ms: u64,
    last_tx_ended_ms: HashMap<u32, u64>,
}

impl Cadence {
    pub fn new(
        sample_interval_s: u32,
        tx_updated_interval_s: u32,
        clock_aligned_interval_s: u32,
        tx_ended_interval_s: u32,
    ) -> Self {
        Self {
            sample_interval_s,
            tx_updated_interval_s,
            clock_aligned_interval_s,
            tx_ended_interval_s,
            last_sample_ms: HashMap::new(),
            last_tx_updated_ms: HashMap::new(),
            last_clock_aligned_ms: 0,
            last_tx_ended_ms: HashMap::new(),
        }
    }

    fn due(map: &mut HashMap<u32, u64>, evse_id: u32, interval_s: u32, now_ms: u64) -> bool {
        if interval_s == 0 {
            return false;
        }
        let due = match map.get(&evse_id) {
            None => true,
            Some(last) => now_ms.saturating_sub(*last) >= interval_s as u64 * 1000,
        };
        if due {
            map.insert(evse_id, now_ms);
        }
        due
    }

    pub fn sample_due(&mut self, evse_id: u32, now_ms: u64) -> bool {
        Self::due(&mut self.last_sample_ms, evse_id, self.sample_interval_s, now_ms)
    }

    pub fn tx_updated_due(&mut self, evse_id: u32, now_ms: u64) -> bool {
        Self::due(&mut self.last_tx_updated_ms, evse_id, self.tx_updated_interval_s, now_ms)
    }

    pub fn tx_ended_due(&mut self, evse_id: u32, now_ms: u64) -> bool {
        Self::due(&mut self.last_tx_ended_ms, evse_id, self.tx_ended_interval_s, now_ms)
    }

    pub fn clock_aligned_due(&mut self, now_ms: u64) -> bool {
        if self.clock_aligned_interval_s == 0 {
            return false;
        }
        let due = now_ms.saturating_sub(self.last_clock_aligned_ms) >= self.clock_aligned_interval_s as u64 * 1000;
        if due {
            self.last_clock_aligned_ms = now_ms;
        }
        due
    }
}

/// Which measurands to sample for a given context, parsed from the
/// corresponding configuration keys (`MeterValuesSampledData`,
/// `StopTxnSampledData`, `MeterValuesAlignedData`).
pub struct MeasurandSets {
    pub periodic: TokenList<Measurand>,
    pub stop_txn: TokenList<Measurand>,
    pub aligned: TokenList<Measurand>,
}

impl MeasurandSets {
    pub fn parse(periodic: &str, stop_txn: &str, aligned: &str) -> Result<Self, crate::enums::TokenListParseError> {
        Ok(Self {
            periodic: TokenList::from_str(periodic)?,
            stop_txn: TokenList::from_str(stop_txn)?,
            aligned: TokenList::from_str(aligned)?,
        })
    }
}

/// Builds a `MeterValueRecord` from the configured measurand set for a
/// given context, skipping measurands the reader has no value for
/// (spec.md §4.5: "A measurand with no value available is omitted, not
/// sent as null").
pub fn sample(
    reader: &dyn MeterReader,
    evse_id: u32,
    timestamp: Timestamp,
    context: ReadingContext,
    measurands: &TokenList<Measurand>,
) -> MeterValueRecord {
    let mut record = MeterValueRecord::new(evse_id, timestamp, context);
    for measurand in measurands.iter() {
        if let Some(value) = reader.sample(*measurand) {
            record = record.with_sample(SampledValue {
                measurand: *measurand,
                unit: None,
                location: None,
                phase: None,
                value,
            });
        } else {
            trace!(evse_id, ?measurand, "measurand unavailable, omitted from sample");
        }
    }
    record
}

/// Tracks whether the one-shot `Transaction.Begin` meter value has
/// already been emitted for a transaction, so that a retried begin
/// protocol step never emits it twice (spec.md §9 "Dedup
/// TransactionBegin meter value emission").
#[derive(Default)]
pub struct BeginSampleGuard {
    emitted: std::collections::HashSet<(u32, u32)>,
}

impl BeginSampleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time it's called for `(evse_id, tx_nr)`,
    /// `false` on every subsequent call.
    pub fn should_emit(&mut self, evse_id: u32, tx_nr: u32) -> bool {
        self.emitted.insert((evse_id, tx_nr))
    }

    pub fn forget(&mut self, evse_id: u32, tx_nr: u32) {
        self.emitted.remove(&(evse_id, tx_nr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReader;
    impl MeterReader for FixedReader {
        fn sample(&self, measurand: Measurand) -> Option<String> {
            match measurand {
                Measurand::EnergyActiveImportRegister => Some("1000".to_string()),
                _ => None,
            }
        }
    }

    #[test]
    fn sample_omits_unavailable_measurands() {
        let measurands: TokenList<Measurand> =
            "Energy.Active.Import.Register,Voltage".parse().unwrap();
        let record = sample(
            &FixedReader,
            1,
            Timestamp::Unix(100),
            ReadingContext::SamplePeriodic,
            &measurands,
        );
        assert_eq!(record.sampled_values.len(), 1);
        assert_eq!(record.sampled_values[0].value, "1000");
    }

    #[test]
    fn cadence_not_due_until_interval_elapses() {
        let mut cadence = Cadence::new(60, 0, 0, 0);
        assert!(cadence.sample_due(1, 0));
        assert!(!cadence.sample_due(1, 30_000));
        assert!(cadence.sample_due(1, 60_000));
    }

    #[test]
    fn zero_interval_is_disabled() {
        let mut cadence = Cadence::new(0, 0, 0, 0);
        assert!(!cadence.sample_due(1, 1_000_000));
    }

    #[test]
    fn begin_sample_guard_emits_once() {
        let mut guard = BeginSampleGuard::new();
        assert!(guard.should_emit(1, 0));
        assert!(!guard.should_emit(1, 0));
        assert!(guard.should_emit(1, 1), "different tx_nr is independent");
    }
}
