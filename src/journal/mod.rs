//! Transaction Journal (spec.md §2 bullet 5, §4.2): a per-connector
//! persistent ring of transaction records, with bounded capacity and a
//! defined eviction/replace policy.

pub mod meter_value;
pub mod transaction;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::clock::Timestamp;
use crate::enums::StopReason;
use crate::error::JournalError;
use crate::filesystem::{load_json, save_json, FilesystemAdapter};

pub use meter_value::{MeterValueRecord, SampledValue};
pub use transaction::{Transaction, TxHandle, TXNR_MAX};

fn tx_filename(evse_id: u32, tx_nr: u32) -> String {
    format!("tx-{evse_id}-{tx_nr}.jsn")
}

fn mv_filename(evse_id: u32, tx_nr: u32) -> String {
    format!("mv-{evse_id}-{tx_nr}.jsn")
}

fn ring_advance(n: u32) -> u32 {
    (n + 1) % TXNR_MAX
}

/// `(txNrEnd - txNrBegin) mod TXNR_MAX` — spec.md §3.
fn ring_size(begin: u32, end: u32) -> u32 {
    (end + TXNR_MAX - begin) % TXNR_MAX
}

/// Per-connector journal of transaction records, backed by a
/// `FilesystemAdapter`. One instance exists per `evseId`.
pub struct ConnectorJournal {
    pub evse_id: u32,
    capacity: u32,
    tx_nr_begin: u32,
    tx_nr_front: u32,
    tx_nr_end: u32,
    /// Records with `begin <= tx_nr < end`, loaded lazily from disk.
    records: BTreeMap<u32, Transaction>,
    /// Silent transactions allocated while the ring was at capacity with no
    /// reclaimable slot (see `allocate`'s fallback branch). These never
    /// touch the ring counters because they never emit on the wire and are
    /// reclaimed the moment both local sync points resolve.
    overflow: BTreeMap<u32, Transaction>,
    next_overflow_id: u32,
    meter_values: BTreeMap<u32, Vec<MeterValueRecord>>,
}

impl ConnectorJournal {
    pub fn new(evse_id: u32, capacity: u32) -> Self {
        Self {
            evse_id,
            capacity,
            tx_nr_begin: 0,
            tx_nr_front: 0,
            tx_nr_end: 0,
            records: BTreeMap::new(),
            overflow: BTreeMap::new(),
            next_overflow_id: TXNR_MAX, // disjoint namespace from real tx_nrs
            meter_values: BTreeMap::new(),
        }
    }

    /// Recover ring indices by scanning filename prefixes on boot
    /// (spec.md §6: "Ring indices txNrBegin/txNrEnd recovered by scanning
    /// filename prefixes").
    pub fn recover(
        &mut self,
        fs: &dyn FilesystemAdapter,
    ) -> Result<(), JournalError> {
        let prefix = format!("tx-{}-", self.evse_id);
        let names = fs.list(&prefix)?;
        let mut tx_nrs: Vec<u32> = names
            .iter()
            .filter_map(|n| n.strip_prefix(&prefix))
            .filter_map(|n| n.strip_suffix(".jsn"))
            .filter_map(|n| n.parse::<u32>().ok())
            .collect();
        tx_nrs.sort_unstable();
        if tx_nrs.is_empty() {
            return Ok(());
        }
        self.tx_nr_begin = tx_nrs[0];
        self.tx_nr_end = ring_advance(*tx_nrs.last().unwrap());
        self.tx_nr_front = self.tx_nr_begin;
        for tx_nr in tx_nrs {
            match self.load_from_disk(fs, tx_nr) {
                Ok(tx) => {
                    if !tx.is_terminal() {
                        self.tx_nr_front = self.tx_nr_front.min(tx_nr);
                    }
                    self.records.insert(tx_nr, tx);
                }
                Err(JournalError::Corrupt { .. }) => {
                    // Corrupt record policy (spec.md §9): leave it in place,
                    // do not auto-delete, let the front pointer pass it.
                    warn!(evse_id = self.evse_id, tx_nr, "corrupt tx record retained in place");
                }
                Err(e) => return Err(e),
            }
        }
        // Advance front past anything already fully confirmed.
        self.advance_front();
        Ok(())
    }

    pub fn size(&self) -> u32 {
        ring_size(self.tx_nr_begin, self.tx_nr_end)
    }

    fn is_reclaimable(tx: &Transaction) -> bool {
        tx.completed || tx.aborted || (tx.silent && tx.stopped())
    }

    /// `allocate(evseId) -> tx | null` (spec.md §4.2), implementing the
    /// begin-protocol's "Allocate tx" step (§4.1 step 4).
    pub fn allocate(
        &mut self,
        id_tag: impl Into<String>,
        begin_timestamp: Timestamp,
        silent_offline_allowed: bool,
    ) -> Result<&mut Transaction, JournalError> {
        self.collect_dangling();

        if self.size() < self.capacity {
            let tx_nr = self.tx_nr_end;
            self.tx_nr_end = ring_advance(self.tx_nr_end);
            let tx = Transaction::new(self.evse_id, tx_nr, id_tag, begin_timestamp);
            self.records.insert(tx_nr, tx);
            return Ok(self.records.get_mut(&tx_nr).unwrap());
        }

        if let Some(reclaim_nr) = self.find_reclaimable() {
            self.records.remove(&reclaim_nr);
            self.meter_values.remove(&reclaim_nr);
            if reclaim_nr == self.tx_nr_begin {
                self.tx_nr_begin = ring_advance(self.tx_nr_begin);
            }
            let tx_nr = self.tx_nr_end;
            self.tx_nr_end = ring_advance(self.tx_nr_end);
            let tx = Transaction::new(self.evse_id, tx_nr, id_tag, begin_timestamp);
            self.records.insert(tx_nr, tx);
            return Ok(self.records.get_mut(&tx_nr).unwrap());
        }

        if silent_offline_allowed {
            let tx_nr = self.next_overflow_id;
            self.next_overflow_id += 1;
            let mut tx = Transaction::new(self.evse_id, tx_nr, id_tag, begin_timestamp);
            tx.silent = true;
            self.overflow.insert(tx_nr, tx);
            info!(evse_id = self.evse_id, tx_nr, "journal full; allocated silent overflow transaction");
            return Ok(self.overflow.get_mut(&tx_nr).unwrap());
        }

        Err(JournalError::Full(self.evse_id))
    }

    fn find_reclaimable(&self) -> Option<u32> {
        let mut cursor = self.tx_nr_begin;
        while cursor != self.tx_nr_front {
            if let Some(tx) = self.records.get(&cursor) {
                if Self::is_reclaimable(tx) {
                    return Some(cursor);
                }
            }
            cursor = ring_advance(cursor);
        }
        None
    }

    /// Drop dangling silent/aborted entries at the tail so they don't
    /// permanently consume ring capacity (spec.md §4.1 step 4 "clean
    /// dangling silent/aborted tail entries").
    fn collect_dangling(&mut self) {
        while self.tx_nr_begin != self.tx_nr_front {
            match self.records.get(&self.tx_nr_begin) {
                Some(tx) if Self::is_reclaimable(tx) => {
                    self.records.remove(&self.tx_nr_begin);
                    self.meter_values.remove(&self.tx_nr_begin);
                    self.tx_nr_begin = ring_advance(self.tx_nr_begin);
                }
                _ => break,
            }
        }
        self.overflow.retain(|_, tx| !Self::is_fully_reclaimed(tx));
    }

    fn is_fully_reclaimed(tx: &Transaction) -> bool {
        tx.is_fully_confirmed() || tx.aborted
    }

    /// Advance `txNrFront` past every record that is `completed-and-
    /// confirmed` (spec.md §3 "Per-connector journal state").
    pub fn advance_front(&mut self) {
        while self.tx_nr_front != self.tx_nr_end {
            match self.records.get(&self.tx_nr_front) {
                Some(tx) if tx.is_fully_confirmed() => {
                    self.tx_nr_front = ring_advance(self.tx_nr_front);
                }
                _ => break,
            }
        }
    }

    pub fn commit(&mut self, fs: &dyn FilesystemAdapter, tx_nr: u32) -> Result<(), JournalError> {
        let tx = self
            .get(tx_nr)
            .ok_or(JournalError::NotFound { evse_id: self.evse_id, tx_nr })?
            .clone();
        if !self.overflow.contains_key(&tx_nr) {
            save_json(fs, &tx_filename(self.evse_id, tx_nr), &tx)?;
        }
        debug!(evse_id = self.evse_id, tx_nr, "transaction committed");
        Ok(())
    }

    pub fn get(&self, tx_nr: u32) -> Option<&Transaction> {
        self.records.get(&tx_nr).or_else(|| self.overflow.get(&tx_nr))
    }

    pub fn get_mut(&mut self, tx_nr: u32) -> Option<&mut Transaction> {
        if self.records.contains_key(&tx_nr) {
            self.records.get_mut(&tx_nr)
        } else {
            self.overflow.get_mut(&tx_nr)
        }
    }

    fn load_from_disk(
        &self,
        fs: &dyn FilesystemAdapter,
        tx_nr: u32,
    ) -> Result<Transaction, JournalError> {
        load_json(fs, &tx_filename(self.evse_id, tx_nr))
            .map_err(|e| match e {
                crate::error::FsError::Corrupt(_) => JournalError::Corrupt {
                    evse_id: self.evse_id,
                    tx_nr,
                },
                other => JournalError::Fs(other),
            })?
            .ok_or(JournalError::NotFound {
                evse_id: self.evse_id,
                tx_nr,
            })
    }

    /// `load(evseId, txNr) -> tx | NotFound | Corrupt | OOM` (spec.md
    /// §4.2 contract).
    pub fn load(
        &mut self,
        fs: &dyn FilesystemAdapter,
        tx_nr: u32,
    ) -> Result<&Transaction, JournalError> {
        if !self.records.contains_key(&tx_nr) {
            let tx = self.load_from_disk(fs, tx_nr)?;
            self.records.insert(tx_nr, tx);
        }
        Ok(self.records.get(&tx_nr).unwrap())
    }

    /// `remove(evseId, txNr)` — also removes the associated meter-value
    /// record (spec.md §4.2 contract).
    pub fn remove(&mut self, fs: &dyn FilesystemAdapter, tx_nr: u32) -> Result<(), JournalError> {
        self.records.remove(&tx_nr);
        self.overflow.remove(&tx_nr);
        self.meter_values.remove(&tx_nr);
        fs.remove(&tx_filename(self.evse_id, tx_nr))?;
        fs.remove(&mv_filename(self.evse_id, tx_nr))?;
        if tx_nr == self.tx_nr_begin {
            self.tx_nr_begin = ring_advance(self.tx_nr_begin);
        }
        self.advance_front();
        Ok(())
    }

    pub fn add_meter_value(&mut self, tx_nr: u32, mv: MeterValueRecord) {
        self.meter_values.entry(tx_nr).or_default().push(mv);
    }

    pub fn meter_values(&self, tx_nr: u32) -> &[MeterValueRecord] {
        self.meter_values
            .get(&tx_nr)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Discard a transaction's meter data without removing the tx record
    /// itself (spec.md §4.2 "After `TransactionMessageAttempts`, mark the
    /// tx `silent` ... and discard its meter data").
    pub fn discard_meter_values(&mut self, fs: &dyn FilesystemAdapter, tx_nr: u32) -> Result<(), JournalError> {
        self.meter_values.remove(&tx_nr);
        fs.remove(&mv_filename(self.evse_id, tx_nr))?;
        Ok(())
    }

    pub fn persist_meter_values(&self, fs: &dyn FilesystemAdapter, tx_nr: u32) -> Result<(), JournalError> {
        if let Some(values) = self.meter_values.get(&tx_nr) {
            save_json(fs, &mv_filename(self.evse_id, tx_nr), values)?;
        }
        Ok(())
    }

    /// The front-most pending `tx_nr` in `[txNrFront, txNrEnd)`, if any.
    pub fn front_tx_nr(&self) -> Option<u32> {
        if self.tx_nr_front == self.tx_nr_end {
            None
        } else {
            Some(self.tx_nr_front)
        }
    }

    pub fn begin(&self) -> u32 {
        self.tx_nr_begin
    }

    pub fn front(&self) -> u32 {
        self.tx_nr_front
    }

    pub fn end(&self) -> u32 {
        self.tx_nr_end
    }

    /// Mark a transaction silent after retry exhaustion, clearing it from
    /// the active send queue and discarding its meter data (spec.md §4.2,
    /// §8 scenario S2).
    pub fn silence(&mut self, fs: &dyn FilesystemAdapter, tx_nr: u32) -> Result<(), JournalError> {
        if let Some(tx) = self.get_mut(tx_nr) {
            tx.silent = true;
            tx.start_sync.confirmed = true;
            tx.stop_sync.confirmed = true;
        }
        self.discard_meter_values(fs, tx_nr)?;
        self.advance_front();
        Ok(())
    }

    pub fn all_tx_nrs_pending(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cursor = self.tx_nr_front;
        while cursor != self.tx_nr_end {
            out.push(cursor);
            cursor = ring_advance(cursor);
        }
        out
    }
}

/// Convenience used by tests and by `boot` recovery: is a stop reason a
/// server- or policy-driven stop vs. a local one.
pub fn is_server_driven(reason: StopReason) -> bool {
    matches!(reason, StopReason::Remote | StopReason::HardReset | StopReason::SoftReset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    fn fs() -> MemFilesystem {
        MemFilesystem::new()
    }

    #[test]
    fn allocate_rejects_when_full_without_silent_fallback() {
        let mut j = ConnectorJournal::new(1, 2);
        j.allocate("a", Timestamp::Unix(1), false).unwrap();
        j.allocate("b", Timestamp::Unix(2), false).unwrap();
        let err = j.allocate("c", Timestamp::Unix(3), false).unwrap_err();
        assert!(matches!(err, JournalError::Full(1)));
    }

    #[test]
    fn allocate_silent_overflow_when_full_and_allowed() {
        let mut j = ConnectorJournal::new(1, 1);
        j.allocate("a", Timestamp::Unix(1), false).unwrap();
        let tx = j.allocate("b", Timestamp::Unix(2), true).unwrap();
        assert!(tx.silent);
        assert_eq!(j.size(), 1, "overflow tx must not consume ring capacity");
    }

    #[test]
    fn allocate_reclaims_oldest_completed_slot() {
        let mut j = ConnectorJournal::new(1, 2);
        let fs = fs();
        j.allocate("a", Timestamp::Unix(1), false).unwrap();
        {
            let tx = j.get_mut(0).unwrap();
            tx.completed = true;
            tx.stop_sync.request(1);
            tx.stop_sync.confirm();
            tx.start_sync.confirm();
        }
        j.advance_front();
        j.allocate("b", Timestamp::Unix(2), false).unwrap();
        // Ring is at capacity (2/2) but tx 0 is reclaimable.
        let tx = j.allocate("c", Timestamp::Unix(3), false).unwrap();
        assert_eq!(tx.tx_nr, 2);
        assert_eq!(j.begin(), 1);
        let _ = fs;
    }

    #[test]
    fn commit_then_load_recovers_record() {
        let fs = fs();
        let mut j = ConnectorJournal::new(3, 4);
        j.allocate("abc", Timestamp::Unix(10), false).unwrap();
        j.commit(&fs, 0).unwrap();

        let mut j2 = ConnectorJournal::new(3, 4);
        j2.recover(&fs).unwrap();
        let tx = j2.load(&fs, 0).unwrap();
        assert_eq!(tx.id_tag, "abc");
    }

    #[test]
    fn corrupt_record_is_retained_and_skipped() {
        let fs = fs();
        fs.write("tx-5-0.jsn", b"not json").unwrap();
        let mut j = ConnectorJournal::new(5, 4);
        j.recover(&fs).unwrap();
        assert!(fs.stat("tx-5-0.jsn").unwrap(), "corrupt record must not be deleted");
        let err = j.load(&fs, 0).unwrap_err();
        assert!(matches!(err, JournalError::Corrupt { .. }));
    }

    #[test]
    fn remove_advances_begin_when_removing_oldest() {
        let fs = fs();
        let mut j = ConnectorJournal::new(1, 4);
        j.allocate("a", Timestamp::Unix(1), false).unwrap();
        j.allocate("b", Timestamp::Unix(2), false).unwrap();
        j.commit(&fs, 0).unwrap();
        j.commit(&fs, 1).unwrap();
        j.remove(&fs, 0).unwrap();
        assert_eq!(j.begin(), 1);
    }

    #[test]
    fn silence_clears_meter_data_and_advances_front() {
        let fs = fs();
        let mut j = ConnectorJournal::new(1, 4);
        j.allocate("a", Timestamp::Unix(1), false).unwrap();
        j.add_meter_value(
            0,
            MeterValueRecord::new(1, Timestamp::Unix(1), crate::enums::ReadingContext::TransactionBegin),
        );
        j.silence(&fs, 0).unwrap();
        assert!(j.meter_values(0).is_empty());
        assert_eq!(j.front(), j.end());
    }
}
