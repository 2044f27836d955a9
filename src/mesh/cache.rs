//! Two-level route cache.
//!
//! Learned routes live in an in-memory table and are mirrored into the persistent byte store so
//! they survive reboots. The persistent region is append-only: records are never rewritten, new
//! routes consume free space until the store is reset.
//!
//! # Record format
//!
//! Starting at the offset held in the header byte (the last byte of the store), records are laid
//! out back to back:
//!
//! ```notrust
//! +-----------+------------------------------+-----------+-----
//! | hop count |  hop count x 6 address bytes | hop count |  ...
//! | (1 byte)  |                              | (1 byte)  |
//! +-----------+------------------------------+-----------+-----
//! ```
//!
//! A hop count of `0xFF` is free space and ends the region. Addresses are arbitrary bytes (the
//! broadcast address is all `0xFF`), so the length prefix is what keeps record boundaries
//! unambiguous; no byte value inside a record is reserved. A hop count of zero never occurs in a
//! valid record and is treated as corruption.

use crate::mesh::{Address, Route, MAX_NODES};
use crate::store::{Store, STORE_SIZE};
use crate::Error;

/// Offset of the header byte holding the start of the first record (`0xFF` when the region is
/// empty).
const HEADER: usize = STORE_SIZE - 1;

/// Free-space marker, the erased state of the store.
const FREE: u8 = 0xFF;

/// Upper bound on routes mirrored in memory.
pub const MAX_ROUTES: usize = 16;

/// Destination-indexed table of learned routes, persisted in a byte store.
pub struct RouteCache<S: Store> {
    store: S,
    routes: heapless::Vec<Route, MAX_ROUTES>,
    /// First free byte of the region; records are appended here.
    next_free: usize,
}

impl<S: Store> RouteCache<S> {
    /// Creates the cache and loads every record already present in `store`.
    pub fn new(store: S) -> Self {
        let mut cache = RouteCache {
            store,
            routes: heapless::Vec::new(),
            next_free: 0,
        };
        cache.load();
        cache
    }

    /// Walks the persistent records into the in-memory table.
    fn load(&mut self) {
        let start = self.store.read(HEADER);
        if start == FREE {
            return;
        }

        let mut offset = usize::from(start);
        loop {
            if offset >= HEADER {
                break;
            }
            let count = self.store.read(offset);
            if count == FREE {
                break;
            }
            let count = usize::from(count);
            if count == 0 || count > MAX_NODES || offset + 1 + count * Address::LEN > HEADER {
                warn!("corrupt route record at offset {}, ignoring the rest", offset);
                break;
            }

            let mut route = Route::empty();
            for hop in 0..count {
                let mut bytes = [0; Address::LEN];
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = self.store.read(offset + 1 + hop * Address::LEN + i);
                }
                // Cannot fail: `count` was checked against `MAX_NODES`.
                route.push(Address::new(bytes)).unwrap();
            }
            offset += 1 + count * Address::LEN;

            debug!("loaded route {:?}", route);
            if self.routes.push(route).is_err() {
                warn!("route table full, ignoring remaining records");
                break;
            }
        }
        self.next_free = offset;
    }

    /// Returns the recorded route to `dst`: the first whose last hop is `dst`.
    pub fn lookup(&self, dst: Address) -> Option<&Route> {
        self.routes.iter().find(|route| route.last() == Some(dst))
    }

    /// Returns the number of cached routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns whether no routes are cached.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Appends `route` to the table and the persistent region.
    ///
    /// A route to an already-known destination is not saved again (`save` is idempotent per
    /// destination, and the first learned route wins). Fails with `Error::StoreFull` when neither
    /// the region nor the table has room left.
    pub fn save(&mut self, route: &Route) -> Result<(), Error> {
        let dst = match route.last() {
            Some(dst) => dst,
            None => return Ok(()),
        };
        if self.lookup(dst).is_some() {
            debug!("route to {:?} already cached", dst);
            return Ok(());
        }

        let record_len = 1 + route.len() * Address::LEN;
        if self.next_free + record_len > HEADER || self.routes.is_full() {
            return Err(Error::StoreFull);
        }

        if self.store.read(HEADER) == FREE {
            self.store.write(HEADER, self.next_free as u8);
        }

        let mut offset = self.next_free;
        self.store.write(offset, route.len() as u8);
        offset += 1;
        for hop in route.as_slice() {
            for &b in hop.raw() {
                self.store.write(offset, b);
                offset += 1;
            }
        }
        self.next_free = offset;
        self.store.commit();

        debug!("cached route {:?}", route);
        // Cannot fail: `is_full` was checked above.
        self.routes.push(route.clone()).unwrap();
        Ok(())
    }

    /// Erases the persistent region and forgets every route.
    pub fn reset(&mut self) {
        for offset in 0..STORE_SIZE {
            self.store.write(offset, FREE);
        }
        self.store.commit();
        self.routes.clear();
        self.next_free = 0;
    }

    /// Consumes the cache and hands the store back.
    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RamStore;

    fn addr(n: u8) -> Address {
        Address::new([n; 6])
    }

    fn route(hops: &[u8]) -> Route {
        let hops: std::vec::Vec<Address> = hops.iter().map(|&n| addr(n)).collect();
        Route::from_hops(&hops).unwrap()
    }

    #[test]
    fn save_then_lookup() {
        let mut cache = RouteCache::new(RamStore::new());
        assert!(cache.lookup(addr(3)).is_none());

        cache.save(&route(&[1, 2, 3])).unwrap();
        assert_eq!(cache.lookup(addr(3)), Some(&route(&[1, 2, 3])));
        assert!(cache.lookup(addr(2)).is_none());
    }

    #[test]
    fn save_is_idempotent_per_destination() {
        let mut cache = RouteCache::new(RamStore::new());
        cache.save(&route(&[1, 2, 3])).unwrap();
        cache.save(&route(&[1, 3])).unwrap();
        // First learned route wins.
        assert_eq!(cache.lookup(addr(3)), Some(&route(&[1, 2, 3])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn records_survive_reboot() {
        let mut cache = RouteCache::new(RamStore::new());
        cache.save(&route(&[1, 2, 3])).unwrap();
        cache.save(&route(&[1, 4])).unwrap();

        // "Reboot": rebuild the cache from the same store contents.
        let cache = RouteCache::new(cache.into_store());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(addr(3)), Some(&route(&[1, 2, 3])));
        assert_eq!(cache.lookup(addr(4)), Some(&route(&[1, 4])));
    }

    #[test]
    fn broadcast_style_addresses_do_not_break_framing() {
        // All-0xFF and all-0x00 bytes are legal inside a record.
        let mut cache = RouteCache::new(RamStore::new());
        cache
            .save(&Route::from_hops(&[addr(1), Address::new([0x00; 6]), Address::new([0xFF; 6])]).unwrap())
            .unwrap();
        cache.save(&route(&[1, 9])).unwrap();

        let cache = RouteCache::new(cache.into_store());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(addr(9)), Some(&route(&[1, 9])));
    }

    #[test]
    fn reset_erases_everything() {
        let mut cache = RouteCache::new(RamStore::new());
        cache.save(&route(&[1, 2])).unwrap();
        cache.reset();
        assert!(cache.is_empty());

        let store = cache.into_store();
        assert_eq!(store.read(HEADER), FREE);
        let cache = RouteCache::new(store);
        assert!(cache.lookup(addr(2)).is_none());
    }

    #[test]
    fn full_region_rejects_new_routes() {
        let mut cache = RouteCache::new(RamStore::new());
        // 9-hop records are 55 bytes; 9 of them fit in 511 bytes, a tenth does not.
        let mut saved = 0;
        for dst in 0..MAX_ROUTES as u8 {
            let mut hops = [0u8; MAX_NODES];
            for (i, h) in hops.iter_mut().enumerate() {
                *h = 100 + i as u8;
            }
            hops[MAX_NODES - 1] = dst;
            match cache.save(&route(&hops)) {
                Ok(()) => saved += 1,
                Err(Error::StoreFull) => break,
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(saved, 9);
        // Existing routes are untouched.
        assert_eq!(cache.len(), 9);
    }
}
