//! Mesh routing and reliability layer.
//!
//! A node's radio gives it a connectionless datagram service: MAC-addressed unicast and broadcast
//! with a fixed MTU and best-effort delivery, no infrastructure. This module layers reliable,
//! multi-hop delivery on top: neighbour discovery, acknowledgement-driven retransmission,
//! duplicate suppression, TTL-bounded flooding for route discovery, source-routed forwarding, and
//! a persistent route cache.
//!
//! # Packet Format
//!
//! Every datagram is one fixed-layout packet (141 bytes, see [`packet::PACKET_LEN`]); numeric
//! fields are little-endian:
//!
//! ```notrust
//! +---------+-----+------+-------+-------+-------+-------+--------+--------------+-------+-------+--------+
//! | payload | ttl | kind | b-ack | d-ack |  dst  |  src  |   id   |     path     | p-idx | p-len | routed |
//! |  (64)   | (1) | (1)  |  (1)  |  (1)  |  (6)  |  (6)  | (4 LE) |    (9 x 6)   |  (1)  |  (1)  |  (1)   |
//! +---------+-----+------+-------+-------+-------+-------+--------+--------------+-------+-------+--------+
//! ```
//!
//! `kind` is 1 for discovery broadcasts and 2 for data; together with the two ack flags it forms
//! the packet [`packet::Class`]. `path` records the hops a discovery-phase packet has traversed,
//! or prescribes the hops to follow once a route is known (`routed` set); `p-idx` is the position
//! of the node currently holding a routed packet and `p-len` the number of valid entries.
//!
//! # Discovery round trip
//!
//! The first packet to a destination without a cached route floods through the mesh, each node
//! appending its address to `path`. The destination reverses the recorded list and sends it back
//! inside the acknowledgement as a prescriptive route; the originator reverses it once more and
//! commits it to its [`cache::RouteCache`]. From then on packets to that destination are unicast
//! hop by hop along the recorded route.
//!
//! # Hardware interface
//!
//! The stack is driver-agnostic. The embedder implements [`Radio`] (plus [`crate::store::Store`],
//! [`crate::time::Timer`] and a `rand_core` RNG), bundles the types in a [`crate::config::Config`]
//! and hands them to [`node::Node`]. The radio's receive callback only decodes and enqueues (see
//! [`queue::enqueue_frame`]); everything else runs on the main loop.

mod address;
pub mod cache;
pub mod dedup;
pub mod node;
pub mod packet;
mod path;
pub mod peers;
pub mod queue;
pub mod session;

pub use self::address::Address;
pub use self::path::Route;

use crate::Error;

/// Upper bound on the nodes a recorded route can contain (originator, forwarders and
/// destination).
pub const MAX_NODES: usize = 9;

/// TTL given to originated packets: enough forwarding budget for the longest recordable route.
pub const DEFAULT_TTL: u8 = (MAX_NODES - 1) as u8;

/// Pre-shared 16-byte symmetric key used by the radio driver for per-peer link encryption.
#[derive(Copy, Clone)]
pub struct LinkKey([u8; 16]);

impl LinkKey {
    /// Creates a link key from raw key material.
    pub const fn new(bytes: [u8; 16]) -> Self {
        LinkKey(bytes)
    }

    /// Returns the raw key bytes, for handing to the radio driver.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl core::fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of the trace output.
        f.write_str("LinkKey(..)")
    }
}

/// The pre-shared key material a node is provisioned with.
pub struct KeySet {
    /// Primary master key, installed into the radio driver at startup.
    pub pmk: [u8; 16],
    /// Per-peer link key used whenever a link is upgraded to encrypted.
    pub link_key: LinkKey,
}

/// Interface to the connectionless datagram radio driver.
///
/// Models an ESP-NOW-class link: peers are registered by MAC address, optionally with link-layer
/// encryption under a pre-shared key; `send` transmits one datagram, best-effort. The driver's own
/// acknowledgement/retry machinery (if any) is treated as part of that best effort and not relied
/// upon.
///
/// Implementing this trait on a mock is how the test suite drives whole nodes without hardware.
pub trait Radio {
    /// Installs the primary master key used to protect per-peer key exchanges.
    fn set_pmk(&mut self, pmk: &[u8; 16]);

    /// Registers `addr` as a peer. With `encrypt` set, traffic to the peer is protected with
    /// `key`.
    fn add_peer(&mut self, addr: Address, key: &LinkKey, encrypt: bool) -> Result<(), Error>;

    /// Removes a registered peer.
    fn delete_peer(&mut self, addr: Address) -> Result<(), Error>;

    /// Returns whether `addr` is a registered peer.
    fn has_peer(&self, addr: Address) -> bool;

    /// Returns whether the link to `addr` is encrypted.
    fn peer_encrypted(&self, addr: Address) -> bool;

    /// Transmits one datagram to `dest`, which may be [`Address::BROADCAST`].
    ///
    /// A returned error means the driver did not accept the frame; delivery of accepted frames
    /// remains best-effort either way.
    fn send(&mut self, dest: Address, frame: &[u8]) -> Result<(), Error>;
}
