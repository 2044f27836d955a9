//! An SPSC queue for received datagrams.
//!
//! Frames arrive in the radio driver's receive callback, which runs on a driver-internal context
//! and must not block or take routing decisions. The callback decodes the frame and enqueues it
//! together with its link source address; the main loop drains the queue and does everything else.
//!
//! This module defines the [`PacketQueue`] trait implemented by all types providing such a queue,
//! the [`Producer`] and [`Consumer`] halves obtained by splitting one, and [`SimpleQueue`], a
//! bounded ring implementation backed by `heapless`.

use crate::bytes::{ByteReader, FromBytes};
use crate::mesh::{packet::Packet, Address};
use crate::utils::HexSlice;
use heapless::spsc;

/// Ring size of [`SimpleQueue`] (one slot remains unused by the ring).
const QUEUE_LEN: usize = 8;

/// A decoded frame together with the address it arrived from on the link.
///
/// The link source is the immediately preceding hop, not necessarily the packet's originator.
#[derive(Clone, Debug)]
pub struct Received {
    pub packet: Packet,
    pub link_src: Address,
}

/// A splittable SPSC queue for received frames.
pub trait PacketQueue {
    /// Producing (writing) half of the queue, used by the receive callback.
    type Producer: Producer;

    /// Consuming (reading) half of the queue, owned by the main loop.
    type Consumer: Consumer;

    /// Splits the queue into its producing and consuming ends.
    ///
    /// Implementations for `&'a mut SomeQueue` allow a queue in a `static` to be split into
    /// borrowing halves, which is how the producer ends up in the radio's callback context.
    fn split(self) -> (Self::Producer, Self::Consumer);
}

/// The producing (writing) half of a packet queue.
pub trait Producer {
    /// Enqueues a received frame.
    ///
    /// Returns the frame back when the queue is full. The caller drops it; the originator's
    /// retransmission timer recovers the loss.
    fn enqueue(&mut self, item: Received) -> Result<(), Received>;
}

/// The consuming (reading) half of a packet queue.
pub trait Consumer {
    /// Returns whether there is a frame to dequeue.
    fn has_data(&self) -> bool;

    /// Removes and returns the oldest frame, if any.
    fn dequeue(&mut self) -> Option<Received>;
}

/// Decodes a raw frame and enqueues it with its link source address.
///
/// This is the receive-callback entry point: malformed frames and frames that do not fit in the
/// queue are dropped silently, exactly as if they had been lost on the air.
pub fn enqueue_frame(producer: &mut impl Producer, link_src: Address, frame: &[u8]) {
    match Packet::from_bytes(&mut ByteReader::new(frame)) {
        Ok(packet) => {
            if producer.enqueue(Received { packet, link_src }).is_err() {
                trace!("rx queue full, dropping frame from {:?}", link_src);
            }
        }
        Err(e) => {
            trace!(
                "undecodable frame from {:?} ({}): {:?}",
                link_src,
                e,
                HexSlice(frame)
            );
        }
    }
}

/// A bounded ring queue for received frames.
///
/// Compatible with single-core targets; the producer may run in interrupt context while the
/// consumer runs in the idle loop.
pub struct SimpleQueue {
    inner: spsc::Queue<Received, QUEUE_LEN>,
}

impl SimpleQueue {
    /// Creates a new, empty queue.
    pub const fn new() -> Self {
        SimpleQueue {
            inner: spsc::Queue::new(),
        }
    }
}

impl<'a> PacketQueue for &'a mut SimpleQueue {
    type Producer = SimpleProducer<'a>;

    type Consumer = SimpleConsumer<'a>;

    fn split(self) -> (Self::Producer, Self::Consumer) {
        let (p, c) = self.inner.split();
        (SimpleProducer { inner: p }, SimpleConsumer { inner: c })
    }
}

/// Producer (writer) half returned by splitting a [`SimpleQueue`].
pub struct SimpleProducer<'a> {
    inner: spsc::Producer<'a, Received, QUEUE_LEN>,
}

impl<'a> Producer for SimpleProducer<'a> {
    fn enqueue(&mut self, item: Received) -> Result<(), Received> {
        self.inner.enqueue(item)
    }
}

/// Consumer (reader) half returned by splitting a [`SimpleQueue`].
pub struct SimpleConsumer<'a> {
    inner: spsc::Consumer<'a, Received, QUEUE_LEN>,
}

impl<'a> Consumer for SimpleConsumer<'a> {
    fn has_data(&self) -> bool {
        self.inner.ready()
    }

    fn dequeue(&mut self) -> Option<Received> {
        self.inner.dequeue()
    }
}

/// Runs the packet queue testsuite against the given [`PacketQueue`].
///
/// This can be used when implementing your own packet queue: create a `#[test]` function and call
/// `run_tests` from there. The function panics when any test fails. The passed `queue` must be
/// empty and have bounded space for at least two frames.
pub fn run_tests(queue: impl PacketQueue) {
    use crate::mesh::packet::{Class, Payload};

    fn frame(id: u32) -> Received {
        Received {
            packet: Packet::new(
                Class::Data,
                Address::new([2; 6]),
                Address::new([1; 6]),
                id,
                3,
                Payload::empty(),
            ),
            link_src: Address::new([1; 6]),
        }
    }

    let (mut p, mut c) = queue.split();

    assert!(!c.has_data(), "empty queue `has_data()` returned true");
    assert!(
        c.dequeue().is_none(),
        "empty queue `dequeue()` returned a frame"
    );

    p.enqueue(frame(1)).expect("enqueue into empty queue failed");
    p.enqueue(frame(2)).expect("enqueue of second frame failed");
    assert!(c.has_data(), "`has_data()` false after enqueue");

    let first = c.dequeue().expect("dequeue returned no frame");
    assert_eq!(first.packet.packet_id, 1, "frames dequeued out of order");
    let second = c.dequeue().expect("second dequeue returned no frame");
    assert_eq!(second.packet.packet_id, 2, "frames dequeued out of order");

    assert!(!c.has_data(), "`has_data()` true after draining");

    // Fill the queue completely; the overflowing frame must come back to the caller.
    let mut stored = 0;
    for id in 10.. {
        if p.enqueue(frame(id)).is_err() {
            break;
        }
        stored += 1;
        assert!(stored < 10_000, "queue does not appear to be bounded");
    }
    for id in 0..stored {
        assert_eq!(c.dequeue().unwrap().packet.packet_id, 10 + id as u32);
    }
    assert!(!c.has_data());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::packet::{Class, Payload, PACKET_LEN};
    use crate::bytes::{ByteWriter, ToBytes};

    #[test]
    fn simple_queue() {
        run_tests(&mut SimpleQueue::new());
    }

    #[test]
    fn enqueue_frame_drops_garbage() {
        let mut queue = SimpleQueue::new();
        let (mut p, mut c) = (&mut queue).split();
        enqueue_frame(&mut p, Address::new([1; 6]), &[0xAB; 10]);
        assert!(!c.has_data());
    }

    #[test]
    fn enqueue_frame_decodes() {
        let packet = Packet::new(
            Class::Data,
            Address::new([2; 6]),
            Address::new([1; 6]),
            99,
            3,
            Payload::from_text("hi"),
        );
        let mut buf = [0; PACKET_LEN];
        packet.to_bytes(&mut ByteWriter::new(&mut buf)).unwrap();

        let mut queue = SimpleQueue::new();
        let (mut p, mut c) = (&mut queue).split();
        enqueue_frame(&mut p, Address::new([1; 6]), &buf);
        let rx = c.dequeue().unwrap();
        assert_eq!(rx.packet, packet);
        assert_eq!(rx.link_src, Address::new([1; 6]));
    }
}
