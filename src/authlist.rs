//! Authorization helpers and local authorization list (spec.md §4.4,
//! §2 "Authorization helpers/local list").
//!
//! Status semantics grounded on the teacher's `infrastructure/database/
//! entities/id_tag.rs` (`IdTagStatus::{Accepted,Blocked,Expired,Invalid,
//! ConcurrentTx}`); persistence grounded on `filesystem.rs`'s JSON
//! commit helpers rather than SeaORM, since this crate has no database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, FsError};
use crate::filesystem::{load_json, save_json, FilesystemAdapter};

const LOCAL_LIST_FILE: &str = "local-list.jsn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalListEntry {
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub status: AuthStatus,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedList {
    version: i32,
    entries: BTreeMap<String, LocalListEntry>,
}

/// `SendLocalList`/`GetLocalListVersion` store (spec.md §4.4). Entries
/// are addressed by `idTag`; a full update replaces the whole map, a
/// differential update merges additions/removals, both bumping
/// `listVersion` only on success.
pub struct LocalAuthList {
    version: i32,
    entries: BTreeMap<String, LocalListEntry>,
}

/// One differential change from `SendLocalList` (`updateType = Differential`).
pub enum ListUpdate {
    Set(LocalListEntry),
    Remove(String),
}

impl LocalAuthList {
    pub fn new() -> Self {
        Self {
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn load(fs: &dyn FilesystemAdapter) -> Result<Self, FsError> {
        let persisted: PersistedList = load_json(fs, LOCAL_LIST_FILE)?.unwrap_or_default();
        Ok(Self {
            version: persisted.version,
            entries: persisted.entries,
        })
    }

    fn commit(&self, fs: &dyn FilesystemAdapter) -> Result<(), FsError> {
        save_json(
            fs,
            LOCAL_LIST_FILE,
            &PersistedList {
                version: self.version,
                entries: self.entries.clone(),
            },
        )
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// `SendLocalList` full update: replaces the list outright.
    pub fn replace_full(
        &mut self,
        fs: &dyn FilesystemAdapter,
        new_version: i32,
        entries: Vec<LocalListEntry>,
    ) -> Result<(), FsError> {
        self.entries = entries.into_iter().map(|e| (e.id_tag.clone(), e)).collect();
        // spec.md §4.4: an empty full update resets the list version to 0
        // rather than adopting whatever version the CSMS sent with it.
        self.version = if self.entries.is_empty() { 0 } else { new_version };
        self.commit(fs)?;
        info!(new_version, count = self.entries.len(), "local list replaced (full update)");
        Ok(())
    }

    /// `SendLocalList` differential update. Rejects (without applying
    /// anything) if `new_version` does not exceed the current version —
    /// the `LocalListConflict` case supplemented from the original
    /// MicroOcpp implementation (spec.md §9 supplement: out-of-order
    /// version updates must be detectable, not silently applied).
    pub fn apply_differential(
        &mut self,
        fs: &dyn FilesystemAdapter,
        new_version: i32,
        updates: Vec<ListUpdate>,
    ) -> Result<(), ConfigError> {
        if new_version <= self.version {
            warn!(
                current = self.version,
                attempted = new_version,
                "LocalListConflict: differential update version not newer than current"
            );
            return Err(ConfigError::Rejected {
                key: "SendLocalList".to_string(),
                reason: "LocalListConflict".to_string(),
            });
        }
        for update in updates {
            match update {
                ListUpdate::Set(entry) => {
                    self.entries.insert(entry.id_tag.clone(), entry);
                }
                ListUpdate::Remove(id_tag) => {
                    self.entries.remove(&id_tag);
                }
            }
        }
        self.version = new_version;
        self.commit(fs)?;
        Ok(())
    }

    /// Local authorization check (spec.md §4.4 "Authorize locally before
    /// falling back to the CSMS, when `LocalAuthorizeOffline`/
    /// `LocalPreAuthorize` allow it").
    pub fn lookup(&self, id_tag: &str) -> Option<&LocalListEntry> {
        self.entries.get(id_tag)
    }

    /// Whether a server-side Authorize response for `id_tag` diverges
    /// from what the local list holds for it (spec.md §4.4,
    /// SPEC_FULL.md §C.3 `LocalListConflict`). `false` when there's no
    /// local entry to diverge from, or when the server's parent id tag
    /// agrees with the locally held one.
    pub fn detect_conflict(&self, id_tag: &str, server_parent_id_tag: Option<&str>) -> bool {
        match self.entries.get(id_tag) {
            None => false,
            Some(local) => local.parent_id_tag.as_deref() != server_parent_id_tag,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocalAuthList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    fn entry(id_tag: &str, status: AuthStatus) -> LocalListEntry {
        LocalListEntry {
            id_tag: id_tag.to_string(),
            parent_id_tag: None,
            status,
        }
    }

    #[test]
    fn full_update_replaces_and_bumps_version() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        list.replace_full(&fs, 1, vec![entry("A", AuthStatus::Accepted)]).unwrap();
        assert_eq!(list.version(), 1);
        assert!(list.lookup("A").is_some());
    }

    #[test]
    fn differential_update_rejects_stale_version() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        list.replace_full(&fs, 5, vec![entry("Z", AuthStatus::Accepted)]).unwrap();
        let err = list
            .apply_differential(&fs, 5, vec![ListUpdate::Set(entry("A", AuthStatus::Accepted))])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Rejected { .. }));
    }

    #[test]
    fn full_update_with_empty_list_resets_version_to_zero() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        list.replace_full(&fs, 7, vec![entry("A", AuthStatus::Accepted)]).unwrap();
        list.replace_full(&fs, 8, vec![]).unwrap();
        assert_eq!(list.version(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn detect_conflict_flags_parent_id_tag_mismatch() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        let mut e = entry("A", AuthStatus::Accepted);
        e.parent_id_tag = Some("P1".to_string());
        list.replace_full(&fs, 1, vec![e]).unwrap();
        assert!(list.detect_conflict("A", Some("P2")));
    }

    #[test]
    fn detect_conflict_false_when_no_local_entry() {
        let list = LocalAuthList::new();
        assert!(!list.detect_conflict("A", Some("P1")));
    }

    #[test]
    fn detect_conflict_false_when_matching() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        let mut e = entry("A", AuthStatus::Accepted);
        e.parent_id_tag = Some("P1".to_string());
        list.replace_full(&fs, 1, vec![e]).unwrap();
        assert!(!list.detect_conflict("A", Some("P1")));
    }

    #[test]
    fn differential_update_applies_additions_and_removals() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        list.replace_full(&fs, 1, vec![entry("A", AuthStatus::Accepted)]).unwrap();
        list.apply_differential(
            &fs,
            2,
            vec![
                ListUpdate::Remove("A".to_string()),
                ListUpdate::Set(entry("B", AuthStatus::Blocked)),
            ],
        )
        .unwrap();
        assert!(list.lookup("A").is_none());
        assert_eq!(list.lookup("B").unwrap().status, AuthStatus::Blocked);
    }

    #[test]
    fn persists_across_reload() {
        let fs = MemFilesystem::new();
        let mut list = LocalAuthList::new();
        list.replace_full(&fs, 3, vec![entry("A", AuthStatus::Accepted)]).unwrap();
        let reloaded = LocalAuthList::load(&fs).unwrap();
        assert_eq!(reloaded.version(), 3);
        assert!(reloaded.lookup("A").is_some());
    }
}
