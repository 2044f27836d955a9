//! Stack configuration trait.

use crate::mesh::{node::Handler, queue::PacketQueue, Radio};
use crate::store::Store;
use crate::time::Timer;
use rand_core::RngCore;

/// Trait for mesh stack configurations.
///
/// This trait bundles the hardware interfaces and capacity choices a node is built from. Every
/// application defines one type implementing it and supplies that type to [`crate::mesh::node::Node`].
pub trait Config {
    /// The millisecond time source.
    type Timer: Timer;

    /// The datagram radio driver.
    type Radio: Radio;

    /// The non-volatile byte store holding the route cache.
    type Store: Store;

    /// Source of packet ids. Must be cryptographically strong so ids are unpredictable.
    type Rng: RngCore;

    /// The receive queue connecting the radio's callback context to the main loop.
    type Queue: PacketQueue;

    /// The application's delivery hooks.
    type Handler: Handler;
}

/// Producing half of the configured receive queue.
pub type ConfProducer<C> = <<C as Config>::Queue as PacketQueue>::Producer;

/// Consuming half of the configured receive queue.
pub type ConfConsumer<C> = <<C as Config>::Queue as PacketQueue>::Consumer;
