//! Masternode identity as seen by a client: enough to address one over the
//! wire and verify its signatures. Quorum formation, PoSe scoring and
//! registration validation belong to the masternode-side implementation and
//! are out of scope here (spec §1) — this core only ever *reads* a
//! masternode list handed to it by the external collaborator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::OutPoint;

/// A masternode is identified by its collateral outpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasternodeId(pub OutPoint);

impl From<OutPoint> for MasternodeId {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeId(outpoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MasternodeStatus {
    Enabled,
    PreEnabled,
    Banned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasternodeEntry {
    pub id: MasternodeId,
    pub service: SocketAddr,
    /// 48-byte BLS12-381 operator public key, used to verify `dsq` signatures.
    pub operator_public_key: [u8; 48],
    pub status: MasternodeStatus,
}

impl MasternodeEntry {
    pub fn is_enabled(&self) -> bool {
        matches!(self.status, MasternodeStatus::Enabled)
    }
}

/// A read-only snapshot of the current masternode list, as supplied by the
/// external chain-validation collaborator (spec §1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasternodeList {
    entries: HashMap<MasternodeId, MasternodeEntry>,
}

impl MasternodeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: MasternodeEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub fn get(&self, id: &MasternodeId) -> Option<&MasternodeEntry> {
        self.entries.get(id)
    }

    pub fn get_by_outpoint(&self, outpoint: &OutPoint) -> Option<&MasternodeEntry> {
        self.get(&MasternodeId(*outpoint))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &MasternodeEntry> {
        self.entries.values().filter(|e| e.is_enabled())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(byte: u8) -> MasternodeEntry {
        MasternodeEntry {
            id: MasternodeId(OutPoint::new([byte; 32], 0)),
            service: "127.0.0.1:9937".parse().unwrap(),
            operator_public_key: [byte; 48],
            status: MasternodeStatus::Enabled,
        }
    }

    #[test]
    fn lookup_by_outpoint() {
        let mut list = MasternodeList::new();
        list.insert(entry(1));
        let outpoint = OutPoint::new([1u8; 32], 0);
        assert!(list.get_by_outpoint(&outpoint).is_some());
        assert!(list.get_by_outpoint(&OutPoint::new([2u8; 32], 0)).is_none());
    }

    #[test]
    fn enabled_filters_banned() {
        let mut list = MasternodeList::new();
        list.insert(entry(1));
        let mut banned = entry(2);
        banned.status = MasternodeStatus::Banned;
        list.insert(banned);
        assert_eq!(list.enabled().count(), 1);
    }
}
