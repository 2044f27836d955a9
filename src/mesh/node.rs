//! Per-node dispatch: ties the receive queue, duplicate filter, route cache, peer table and
//! reliability session together behind one owning value.
//!
//! A [`Node`] is driven cooperatively from the application's main loop:
//!
//! ```notrust
//! loop {
//!     node.tick();            // drain received frames, service the retransmission timer
//!     // ... application work; node.send_text(..) when it has something to say ...
//!     delay_ms(50);
//! }
//! ```
//!
//! The radio's receive callback stays tiny: it hands incoming frames to
//! [`crate::mesh::queue::enqueue_frame`] with the producer half of the configured queue and
//! returns. All routing decisions, cache mutation and state transitions happen here, on the main
//! loop.

use crate::bytes::{ByteWriter, ToBytes};
use crate::config::{ConfConsumer, Config};
use crate::mesh::{
    cache::RouteCache,
    dedup::DuplicateFilter,
    packet::{Class, Packet, Payload, PACKET_LEN},
    peers::PeerTable,
    queue::{Consumer, Received},
    session::{Poll, Session},
    Address, KeySet, Radio, Route, DEFAULT_TTL,
};
use crate::time::Timer;
use crate::Error;
use rand_core::RngCore;

/// Application hooks invoked by the dispatch loop.
///
/// All hooks run synchronously on the main loop.
pub trait Handler {
    /// Confirmed inbound text from `src`, delivered exactly once per packet id within the
    /// duplicate filter's window.
    fn on_delivered(&mut self, src: Address, text: &str);

    /// The destination acknowledged the last [`Node::send_text`] to `dst`.
    fn on_acknowledged(&mut self, dst: Address) {
        let _ = dst;
    }

    /// The retry budget for the last [`Node::send_text`] to `dst` is exhausted; the packet was
    /// abandoned.
    fn on_session_failed(&mut self, dst: Address) {
        let _ = dst;
    }
}

/// One mesh node: the state machine owning all mutable stack state.
pub struct Node<C: Config> {
    addr: Address,
    timer: C::Timer,
    radio: C::Radio,
    rng: C::Rng,
    rx: ConfConsumer<C>,
    handler: C::Handler,
    peers: PeerTable,
    cache: RouteCache<C::Store>,
    dedup: DuplicateFilter,
    session: Session,
    /// Local delivery counter, only used in the trace output.
    sessions: u32,
}

impl<C: Config> Node<C> {
    /// Creates a node.
    ///
    /// Installs the primary master key into the radio and loads previously learned routes from
    /// `store`.
    pub fn new(
        addr: Address,
        mut radio: C::Radio,
        timer: C::Timer,
        store: C::Store,
        rng: C::Rng,
        rx: ConfConsumer<C>,
        handler: C::Handler,
        keys: KeySet,
    ) -> Self {
        radio.set_pmk(&keys.pmk);
        let cache = RouteCache::new(store);
        info!("node {:?} up, {} cached routes", addr, cache.len());
        Node {
            addr,
            timer,
            radio,
            rng,
            rx,
            handler,
            peers: PeerTable::new(keys.link_key),
            cache,
            dedup: DuplicateFilter::new(),
            session: Session::new(),
            sessions: 0,
        }
    }

    /// Returns this node's link-layer address.
    pub fn address(&self) -> Address {
        self.addr
    }

    /// Returns a reference to the timer instance used by the node.
    pub fn timer(&mut self) -> &mut C::Timer {
        &mut self.timer
    }

    /// Returns a reference to the radio driver, for hardware servicing.
    pub fn radio(&mut self) -> &mut C::Radio {
        &mut self.radio
    }

    /// Returns whether a new reliable transmission may be started.
    pub fn is_ready(&self) -> bool {
        self.session.is_ready()
    }

    /// Returns the learned route to `dst`, if any.
    pub fn route_to(&self, dst: Address) -> Option<&Route> {
        self.cache.lookup(dst)
    }

    /// Erases all learned routes, in memory and in the persistent store.
    pub fn reset_routes(&mut self) {
        self.cache.reset();
    }

    /// Registers a known neighbour explicitly (pre-provisioned topologies).
    ///
    /// Neighbours normally register themselves through discovery; see [`Node::broadcast`].
    pub fn add_neighbour(&mut self, addr: Address) -> Result<(), Error> {
        self.peers.add(&mut self.radio, addr)
    }

    /// One main-loop iteration: drains the receive queue, then services the retransmission
    /// timer.
    pub fn tick(&mut self) {
        self.process_queue();
        self.poll_timer();
    }

    /// Drains and dispatches every frame in the receive queue.
    pub fn process_queue(&mut self) {
        while let Some(rx) = self.rx.dequeue() {
            self.process(rx);
        }
    }

    /// Checks the retransmission timer, retransmitting or abandoning the pending packet when its
    /// RTO elapsed.
    pub fn poll_timer(&mut self) {
        match self.session.poll(self.timer.now()) {
            Poll::Idle => {}
            Poll::Retransmit(packet) => {
                info!("retransmitting #{:08x} to {:?}", packet.packet_id, packet.dst);
                self.transmit(packet);
            }
            Poll::Failed { dst } => {
                warn!("giving up on delivery to {:?}", dst);
                self.handler.on_session_failed(dst);
            }
        }
    }

    /// Starts a reliable text delivery to `dst`.
    ///
    /// With a cached route the packet is unicast hop by hop; otherwise it floods and records its
    /// route on the way (discovery). The delivery is acknowledged end-to-end and retransmitted on
    /// timeout; [`Handler::on_acknowledged`] fires on success.
    ///
    /// Fails with `Error::Busy` while an earlier delivery is unacknowledged: the stack keeps at
    /// most one packet in flight, callers queue their own backlog.
    pub fn send_text(&mut self, dst: Address, text: &str) -> Result<(), Error> {
        if !self.session.is_ready() {
            return Err(Error::Busy);
        }
        let id = self.fresh_id();
        let mut packet = Packet::new(
            Class::Data,
            dst,
            self.addr,
            id,
            DEFAULT_TTL,
            Payload::from_text(text),
        );
        if let Some(route) = self.cache.lookup(dst) {
            debug!("cached route {:?}", route);
            packet.path = route.clone();
            packet.source_routed = true;
        } else {
            // Discovery: the originator is the first recorded hop.
            packet.path.push(self.addr)?;
        }
        let now = self.timer.now();
        self.session.begin(packet.clone(), now)?;
        info!("sending \"{}\" to {:?} (#{:08x})", packet.payload.text(), dst, id);
        self.transmit(packet);
        Ok(())
    }

    /// Transmits a neighbour discovery probe to the broadcast address.
    ///
    /// Nodes in range answer with a discovery response; both sides register each other as
    /// neighbours and upgrade the link to the pre-shared key. Probes are fire-and-forget, they
    /// are not retransmitted.
    pub fn broadcast(&mut self) {
        let id = self.fresh_id();
        let packet = Packet::new(
            Class::Broadcast,
            Address::BROADCAST,
            self.addr,
            id,
            0,
            Payload::empty(),
        );
        info!("probing for neighbours (#{:08x})", id);
        self.transmit(packet);
    }

    /// Feeds the driver's send-complete callback outcome into the stack.
    ///
    /// A confirmed transmission re-arms the retransmission clock, so the RTO measures time on
    /// the air rather than time since queuing. Failures are only logged; the retransmission
    /// timer recovers the loss.
    pub fn tx_complete(&mut self, dest: Address, ok: bool) {
        if ok {
            self.session.mark_sent(self.timer.now());
            trace!("frame to {:?} confirmed on air", dest);
        } else {
            warn!("link-layer send to {:?} failed", dest);
        }
    }

    fn fresh_id(&mut self) -> u32 {
        loop {
            let id = self.rng.next_u32();
            if id != 0 {
                return id;
            }
        }
    }

    fn process(&mut self, rx: Received) {
        let Received { packet, link_src } = rx;
        if !self.dedup.insert(packet.packet_id, packet.class) {
            // A replayed ack must still release the sender's pending slot.
            if packet.class == Class::DataAck && packet.dst == self.addr {
                self.handle_ack(&packet);
            }
            trace!("replay of {:?} #{:08x}, dropped", packet.class, packet.packet_id);
            return;
        }
        trace!(
            "<- {:?} #{:08x} via {:?} ({:?} -> {:?})",
            packet.class,
            packet.packet_id,
            link_src,
            packet.src,
            packet.dst
        );
        if packet.dst == self.addr || packet.dst.is_broadcast() {
            // Broadcasts are terminal: delivered locally, never forwarded.
            self.deliver(packet, link_src);
        } else {
            self.forward(packet, link_src);
        }
    }

    fn deliver(&mut self, packet: Packet, link_src: Address) {
        match packet.class {
            Class::Broadcast => {
                info!("discovery probe from {:?}", packet.src);
                if let Err(e) = self.peers.add(&mut self.radio, link_src) {
                    warn!("cannot add neighbour {:?}: {}", link_src, e);
                    return;
                }
                let ack = Packet::new(
                    Class::BroadcastAck,
                    link_src,
                    self.addr,
                    self.fresh_id(),
                    0,
                    Payload::empty(),
                );
                self.unicast(link_src, &ack);
                self.peers.enable_encryption(&mut self.radio, link_src);
            }
            Class::BroadcastAck => {
                info!("discovery response from {:?}", packet.src);
                if let Err(e) = self.peers.add(&mut self.radio, link_src) {
                    warn!("cannot add neighbour {:?}: {}", link_src, e);
                    return;
                }
                self.peers.enable_encryption(&mut self.radio, link_src);
            }
            Class::Data => self.deliver_data(packet),
            Class::DataAck => self.handle_ack(&packet),
        }
    }

    fn deliver_data(&mut self, packet: Packet) {
        self.sessions += 1;
        info!(
            "session {}: \"{}\" from {:?} (#{:08x})",
            self.sessions,
            packet.payload.text(),
            packet.src,
            packet.packet_id
        );
        self.handler.on_delivered(packet.src, packet.payload.text());

        // The acknowledgement answers with the id of the data packet, so the originator can match
        // it against its pending slot.
        let mut ack = Packet::new(
            Class::DataAck,
            packet.src,
            self.addr,
            packet.packet_id,
            DEFAULT_TTL,
            Payload::empty(),
        );

        // Turn the traversed route into the return route: complete the recording with this node,
        // then flip it around.
        let mut route = packet.path.clone();
        if !packet.source_routed && route.push(self.addr).is_err() {
            warn!(
                "route record full, acknowledging #{:08x} unrouted",
                packet.packet_id
            );
            self.transmit(ack);
            return;
        }
        route.reverse();
        if route.len() >= 2 && route.first() == Some(self.addr) {
            if let Err(e) = self.cache.save(&route) {
                warn!("route {:?} not cached: {}", route, e);
            }
            ack.path = route;
            ack.source_routed = true;
        }
        self.transmit(ack);
    }

    fn handle_ack(&mut self, packet: &Packet) {
        let now = self.timer.now();
        match self.session.complete(packet.packet_id, now) {
            Some((dst, rtt)) => {
                info!("delivery to {:?} acknowledged, rtt {}", dst, rtt);
                if packet.source_routed {
                    // The ack carries the route destination-first; flip it back into
                    // originator-first order before committing it.
                    let mut route = packet.path.clone();
                    route.reverse();
                    if let Err(e) = self.cache.save(&route) {
                        warn!("route {:?} not cached: {}", route, e);
                    }
                }
                self.handler.on_acknowledged(dst);
            }
            None => trace!("unmatched ack #{:08x}", packet.packet_id),
        }
    }

    /// Next-hop selection for a packet that is not addressed to this node.
    fn forward(&mut self, mut packet: Packet, link_src: Address) {
        if packet.ttl == 0 {
            debug!("ttl expired for #{:08x}, dropping", packet.packet_id);
            return;
        }
        packet.ttl -= 1;
        if packet.source_routed {
            self.follow_route(packet);
        } else {
            if packet.path.push(self.addr).is_err() {
                debug!("route record full, dropping #{:08x}", packet.packet_id);
                return;
            }
            self.flood(&packet, Some(link_src));
        }
    }

    /// Advances a source-routed packet one hop along its prescribed route.
    fn follow_route(&mut self, mut packet: Packet) {
        let pos = usize::from(packet.path_index);
        if packet.path.get(pos) != Some(self.addr) {
            debug!(
                "route desynchronised: {:?} is not hop {} of {:?}, dropping #{:08x}",
                self.addr, pos, packet.path, packet.packet_id
            );
            return;
        }
        packet.path_index += 1;
        match packet.path.get(usize::from(packet.path_index)) {
            Some(next) => self.unicast(next, &packet),
            None => debug!(
                "route for #{:08x} ends here but {:?} is the destination, dropping",
                packet.packet_id, packet.dst
            ),
        }
    }

    /// Transmits an originated (or re-originated) packet: along the prescribed route when one is
    /// attached, directly when the destination is a registered peer, flooding otherwise.
    fn transmit(&mut self, packet: Packet) {
        if packet.source_routed {
            self.follow_route(packet);
        } else if packet.dst.is_broadcast() {
            self.unicast(Address::BROADCAST, &packet);
        } else if self.radio.has_peer(packet.dst) {
            self.unicast(packet.dst, &packet);
        } else {
            self.flood(&packet, None);
        }
    }

    fn unicast(&mut self, dest: Address, packet: &Packet) {
        let mut frame = [0; PACKET_LEN];
        packet
            .to_bytes(&mut ByteWriter::new(&mut frame))
            .expect("frame buffer too small");
        trace!("-> {:?} #{:08x} to {:?}", packet.class, packet.packet_id, dest);
        if let Err(e) = self.radio.send(dest, &frame) {
            warn!("send to {:?} failed: {}", dest, e);
        }
    }

    /// Unicasts `packet` to every neighbour except `exclude` (the link the packet arrived on).
    fn flood(&mut self, packet: &Packet, exclude: Option<Address>) {
        let mut frame = [0; PACKET_LEN];
        packet
            .to_bytes(&mut ByteWriter::new(&mut frame))
            .expect("frame buffer too small");
        let mut sent = false;
        for &hop in self.peers.neighbours() {
            if Some(hop) == exclude {
                continue;
            }
            trace!("~> {:?} #{:08x} to {:?}", packet.class, packet.packet_id, hop);
            if let Err(e) = self.radio.send(hop, &frame) {
                warn!("send to {:?} failed: {}", hop, e);
            } else {
                sent = true;
            }
        }
        if !sent {
            debug!(
                "no neighbour to flood #{:08x} towards {:?}",
                packet.packet_id, packet.dst
            );
        }
    }
}
