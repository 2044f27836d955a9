//! Originator reliability.
//!
//! A single-slot stop-and-wait machine: the originator keeps at most one unacknowledged packet in
//! flight, retransmits it with exponentially growing timeouts, and gives up after a bounded number
//! of tries. Forwarders hold no reliability state at all; a loss anywhere along the route is
//! repaired from the origin.

use crate::mesh::{packet::Packet, Address};
use crate::time::{Duration, Instant};
use crate::Error;

/// Number of timeouts after which a session is abandoned.
pub const MAX_TRIES: u8 = 3;

/// Timeout before the first retransmission; doubles on every retry.
pub const INITIAL_RTO: Duration = Duration::from_millis(3_000);

enum State {
    /// No packet in flight.
    Ready,

    /// A packet has been transmitted and its acknowledgement is outstanding.
    AwaitingAck {
        /// The transmitted packet, kept for retransmission (same packet id).
        pending: Packet,
        /// Current retransmission timeout.
        rto: Duration,
        /// Timeouts suffered so far.
        retries: u8,
        /// When the packet was last put on the air.
        sent_at: Instant,
    },
}

/// Outcome of polling the retransmission timer.
#[must_use]
pub enum Poll {
    /// Nothing to do.
    Idle,

    /// The RTO elapsed; retransmit this packet (it carries the original id).
    Retransmit(Packet),

    /// The retry budget is exhausted. The pending packet has been discarded and the session is
    /// ready again; the application observes the non-delivery through the missing acknowledgement.
    Failed {
        /// Destination the abandoned packet was addressed to.
        dst: Address,
    },
}

/// The per-node sender state machine.
pub struct Session {
    state: State,
}

impl Session {
    /// Creates a session in the ready state.
    pub const fn new() -> Self {
        Session {
            state: State::Ready,
        }
    }

    /// Returns whether a new transmission may be started.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    /// Arms the session with `packet`; the caller transmits it.
    ///
    /// Fails with `Error::Busy` while an earlier packet is unacknowledged.
    pub fn begin(&mut self, packet: Packet, now: Instant) -> Result<(), Error> {
        if !self.is_ready() {
            return Err(Error::Busy);
        }
        self.state = State::AwaitingAck {
            pending: packet,
            rto: INITIAL_RTO,
            retries: 0,
            sent_at: now,
        };
        Ok(())
    }

    /// Completes the session if `ack_id` matches the pending packet.
    ///
    /// Returns the destination and the time since the last transmission (the measured round trip)
    /// on a match; an unrelated or stale acknowledgement leaves the session untouched.
    pub fn complete(&mut self, ack_id: u32, now: Instant) -> Option<(Address, Duration)> {
        if let State::AwaitingAck {
            pending, sent_at, ..
        } = &self.state
        {
            if pending.packet_id == ack_id {
                let result = (pending.dst, now.duration_since(*sent_at));
                self.state = State::Ready;
                return Some(result);
            }
        }
        None
    }

    /// Re-arms the RTO clock; called when the driver reports the frame on the air.
    pub fn mark_sent(&mut self, now: Instant) {
        if let State::AwaitingAck { sent_at, .. } = &mut self.state {
            *sent_at = now;
        }
    }

    /// Checks the retransmission timer.
    ///
    /// Call once per main-loop iteration. At most one action is returned per call; the timeout
    /// cadence for a session is `INITIAL_RTO`, doubled on each retry.
    pub fn poll(&mut self, now: Instant) -> Poll {
        let (pending, rto, retries, sent_at) = match &mut self.state {
            State::Ready => return Poll::Idle,
            State::AwaitingAck {
                pending,
                rto,
                retries,
                sent_at,
            } => (pending, rto, retries, sent_at),
        };

        if now.duration_since(*sent_at) <= *rto {
            return Poll::Idle;
        }

        *retries += 1;
        if *retries == MAX_TRIES {
            let dst = pending.dst;
            self.state = State::Ready;
            return Poll::Failed { dst };
        }

        *rto = *rto * 2;
        *sent_at = now;
        Poll::Retransmit(pending.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::packet::{Class, Payload};

    const DST: Address = Address::new([0x48, 0xE7, 0x29, 0xA3, 0x47, 0x40]);
    const SRC: Address = Address::new([0xEC, 0x62, 0x60, 0x93, 0xC7, 0xA8]);

    fn packet(id: u32) -> Packet {
        Packet::new(Class::Data, DST, SRC, id, 8, Payload::from_text("x"))
    }

    fn at(ms: u32) -> Instant {
        Instant::from_raw_millis(ms)
    }

    #[test]
    fn single_packet_in_flight() {
        let mut session = Session::new();
        session.begin(packet(1), at(0)).unwrap();
        assert!(!session.is_ready());
        assert_eq!(session.begin(packet(2), at(1)), Err(Error::Busy));
    }

    #[test]
    fn matching_ack_completes() {
        let mut session = Session::new();
        session.begin(packet(7), at(0)).unwrap();

        assert!(session.complete(8, at(100)).is_none());
        assert!(!session.is_ready());

        let (dst, rtt) = session.complete(7, at(120)).unwrap();
        assert_eq!(dst, DST);
        assert_eq!(rtt, Duration::from_millis(120));
        assert!(session.is_ready());

        // A stale duplicate ack is ignored once the session is over.
        assert!(session.complete(7, at(130)).is_none());
    }

    #[test]
    fn rto_schedule_and_exhaustion() {
        let mut session = Session::new();
        session.begin(packet(7), at(0)).unwrap();

        // Not yet: the timeout is strictly greater-than.
        assert!(matches!(session.poll(at(3_000)), Poll::Idle));

        // First retransmission 3s after the send, RTO doubles to 6s.
        match session.poll(at(3_001)) {
            Poll::Retransmit(p) => assert_eq!(p.packet_id, 7),
            _ => panic!("expected first retransmission"),
        }

        // Second retransmission after the doubled timeout, RTO becomes 12s.
        assert!(matches!(session.poll(at(9_001)), Poll::Idle));
        assert!(matches!(session.poll(at(9_002)), Poll::Retransmit(_)));

        // The third timeout exhausts the budget: no fourth transmission.
        assert!(matches!(session.poll(at(21_002)), Poll::Idle));
        match session.poll(at(21_003)) {
            Poll::Failed { dst } => assert_eq!(dst, DST),
            _ => panic!("expected session failure"),
        }
        assert!(session.is_ready());
    }

    #[test]
    fn mark_sent_rearms_the_clock() {
        let mut session = Session::new();
        session.begin(packet(7), at(0)).unwrap();
        // Driver confirms the frame on the air 500ms later; the RTO counts from there.
        session.mark_sent(at(500));
        assert!(matches!(session.poll(at(3_400)), Poll::Idle));
        assert!(matches!(session.poll(at(3_501)), Poll::Retransmit(_)));
    }
}
