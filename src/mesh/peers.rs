//! Neighbour management.
//!
//! Wraps the radio driver's peer registration and mirrors it in an in-memory neighbour set. The
//! set is what the forwarding engine floods over when no recorded route is available, so it must
//! not contain duplicates. Links start out unencrypted (discovery frames must be readable by
//! strangers) and are upgraded to the pre-shared link key once both sides know each other.

use crate::mesh::{Address, LinkKey, Radio};
use crate::Error;

/// Upper bound on tracked neighbours.
pub const MAX_PEERS: usize = 16;

/// The set of known direct neighbours, and the key their links are upgraded to.
pub struct PeerTable {
    neighbours: heapless::Vec<Address, MAX_PEERS>,
    link_key: LinkKey,
}

impl PeerTable {
    /// Creates an empty table using `link_key` for encrypted links.
    pub fn new(link_key: LinkKey) -> Self {
        PeerTable {
            neighbours: heapless::Vec::new(),
            link_key,
        }
    }

    /// Returns whether `addr` is a known neighbour.
    pub fn has(&self, addr: Address) -> bool {
        self.neighbours.iter().any(|&n| n == addr)
    }

    /// Registers `addr` with the driver (unencrypted) and records it as a neighbour.
    ///
    /// Re-adding a known neighbour is a no-op. When the table is full the neighbour is rejected
    /// with `Error::Eof`. A driver registration failure is propagated to the caller; the table
    /// entry is kept, so sends to the half-registered neighbour surface as link failures rather
    /// than silent omissions.
    pub fn add<R: Radio>(&mut self, radio: &mut R, addr: Address) -> Result<(), Error> {
        if self.has(addr) {
            return Ok(());
        }
        self.neighbours.push(addr).map_err(|_| Error::Eof)?;
        info!("new neighbour {:?}", addr);
        radio.add_peer(addr, &self.link_key, false)
    }

    /// Upgrades the link to `addr` to encrypted.
    ///
    /// The driver cannot change a peer in place, so the peer is deleted and re-added with the
    /// pre-shared link key. An already encrypted link is left alone. A failed delete is only
    /// reported; the add is attempted regardless.
    pub fn enable_encryption<R: Radio>(&mut self, radio: &mut R, addr: Address) {
        if !radio.has_peer(addr) {
            return;
        }
        if radio.peer_encrypted(addr) {
            debug!("link to {:?} already encrypted", addr);
            return;
        }
        if let Err(e) = radio.delete_peer(addr) {
            warn!("failed to delete peer {:?}: {}", addr, e);
        }
        match radio.add_peer(addr, &self.link_key, true) {
            Ok(()) => info!("link to {:?} now encrypted", addr),
            Err(e) => warn!("failed to re-add peer {:?} encrypted: {}", addr, e),
        }
    }

    /// Returns the neighbour set, in insertion order.
    pub fn neighbours(&self) -> &[Address] {
        &self.neighbours
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    const PEER: Address = Address::new([0x48, 0xE7, 0x29, 0xA3, 0x47, 0x40]);

    #[derive(Default)]
    struct FakeRadio {
        peers: Vec<(Address, bool)>,
        deletes: usize,
        fail_delete: bool,
    }

    impl Radio for FakeRadio {
        fn set_pmk(&mut self, _pmk: &[u8; 16]) {}

        fn add_peer(&mut self, addr: Address, _key: &LinkKey, encrypt: bool) -> Result<(), Error> {
            self.peers.push((addr, encrypt));
            Ok(())
        }

        fn delete_peer(&mut self, addr: Address) -> Result<(), Error> {
            self.deletes += 1;
            if self.fail_delete {
                return Err(Error::LinkFailure);
            }
            self.peers.retain(|&(a, _)| a != addr);
            Ok(())
        }

        fn has_peer(&self, addr: Address) -> bool {
            self.peers.iter().any(|&(a, _)| a == addr)
        }

        fn peer_encrypted(&self, addr: Address) -> bool {
            self.peers.iter().any(|&(a, e)| a == addr && e)
        }

        fn send(&mut self, _dest: Address, _frame: &[u8]) -> Result<(), Error> {
            Ok(())
        }
    }

    fn table() -> PeerTable {
        PeerTable::new(LinkKey::new(*b"0123456789ABCDEF"))
    }

    #[test]
    fn add_is_idempotent() {
        let mut radio = FakeRadio::default();
        let mut peers = table();
        peers.add(&mut radio, PEER).unwrap();
        peers.add(&mut radio, PEER).unwrap();
        assert_eq!(peers.neighbours(), &[PEER]);
        assert_eq!(radio.peers.len(), 1);
        assert!(peers.has(PEER));
    }

    #[test]
    fn encryption_upgrade_replaces_peer() {
        let mut radio = FakeRadio::default();
        let mut peers = table();
        peers.add(&mut radio, PEER).unwrap();
        assert!(!radio.peer_encrypted(PEER));

        peers.enable_encryption(&mut radio, PEER);
        assert_eq!(radio.deletes, 1);
        assert!(radio.peer_encrypted(PEER));

        // Second upgrade is a no-op.
        peers.enable_encryption(&mut radio, PEER);
        assert_eq!(radio.deletes, 1);
    }

    #[test]
    fn failed_delete_still_attempts_add() {
        let mut radio = FakeRadio::default();
        let mut peers = table();
        peers.add(&mut radio, PEER).unwrap();
        radio.fail_delete = true;

        peers.enable_encryption(&mut radio, PEER);
        assert!(radio.peer_encrypted(PEER));
    }

    #[test]
    fn unknown_peer_is_not_upgraded() {
        let mut radio = FakeRadio::default();
        let mut peers = table();
        peers.enable_encryption(&mut radio, PEER);
        assert_eq!(radio.deletes, 0);
    }
}
