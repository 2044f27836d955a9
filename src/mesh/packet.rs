//! The on-air packet format.
//!
//! Every datagram exchanged on the mesh is one fixed-size packet; there is no fragmentation, the
//! whole packet fits in a single link MTU. The flat wire fields `kind`/`broadcast ack`/`data ack`
//! are folded into the [`Class`] variant on decode, so the rest of the stack dispatches on a
//! proper tagged type rather than a pair of booleans.

use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::mesh::{Address, Route, MAX_NODES};
use crate::Error;
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

/// Number of payload bytes carried by every packet.
pub const PAYLOAD_CAP: usize = 64;

/// Total encoded size of a packet in bytes.
pub const PACKET_LEN: usize = PAYLOAD_CAP   // payload
    + 1                                     // ttl
    + 3                                     // kind + broadcast ack + data ack
    + 2 * Address::LEN                      // dst + src
    + 4                                     // packet id
    + MAX_NODES * Address::LEN              // recorded route
    + 3; // route position + route length + source-routed flag

const KIND_BROADCAST: u8 = 1;
const KIND_DATA: u8 = 2;

/// Opaque application payload, NUL-terminated when carrying text.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: [u8; PAYLOAD_CAP],
}

impl Payload {
    /// Creates an empty (all-zero) payload.
    pub const fn empty() -> Self {
        Payload {
            bytes: [0; PAYLOAD_CAP],
        }
    }

    /// Creates a payload carrying `text`.
    ///
    /// Text longer than the payload capacity is truncated; the stored bytes are always
    /// NUL-terminated.
    pub fn from_text(text: &str) -> Self {
        let mut payload = Self::empty();
        ByteWriter::new(&mut payload.bytes[..PAYLOAD_CAP - 1]).write_slice_truncate(text.as_bytes());
        payload
    }

    /// Returns the text carried by this payload, up to the first NUL byte.
    ///
    /// Non-UTF-8 contents yield an empty string.
    pub fn text(&self) -> &str {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PAYLOAD_CAP);
        core::str::from_utf8(&self.bytes[..end]).unwrap_or("")
    }

    /// Returns the raw payload bytes.
    pub fn as_bytes(&self) -> &[u8; PAYLOAD_CAP] {
        &self.bytes
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.text())
    }
}

/// Packet classification, as dispatched on by the mesh layer.
///
/// On the wire this is stored as a `kind` byte (1 = broadcast/discovery, 2 = data) plus two ack
/// flag bytes; only the four combinations below are valid.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Class {
    /// Neighbour discovery probe, addressed to the broadcast address.
    Broadcast,
    /// Response to a discovery probe, unicast back to the prober.
    BroadcastAck,
    /// Application data.
    Data,
    /// Acknowledgement of a data packet, carrying the same packet id.
    DataAck,
}

impl Class {
    fn from_wire(kind: u8, bcast_ack: bool, data_ack: bool) -> Result<Self, Error> {
        match (kind, bcast_ack, data_ack) {
            (KIND_BROADCAST, false, false) => Ok(Class::Broadcast),
            (KIND_DATA, true, false) => Ok(Class::BroadcastAck),
            (KIND_DATA, false, false) => Ok(Class::Data),
            (KIND_DATA, false, true) => Ok(Class::DataAck),
            _ => Err(Error::MalformedPacket),
        }
    }

    fn to_wire(self) -> (u8, bool, bool) {
        match self {
            Class::Broadcast => (KIND_BROADCAST, false, false),
            Class::BroadcastAck => (KIND_DATA, true, false),
            Class::Data => (KIND_DATA, false, false),
            Class::DataAck => (KIND_DATA, false, true),
        }
    }
}

/// In-memory representation of one mesh datagram.
///
/// `path` records the hops the packet traversed while it is being accumulated
/// (`source_routed == false`), or prescribes the hops to follow when a route is already known
/// (`source_routed == true`). In the latter case the route starts at `src` and ends at `dst`, and
/// `path_index` is the position of the node currently holding the packet.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Packet {
    pub payload: Payload,
    /// Remaining forwarding budget; decremented at each forwarder, 0 means "do not forward".
    pub ttl: u8,
    pub class: Class,
    /// Final destination.
    pub dst: Address,
    /// Original originator.
    pub src: Address,
    /// Random per-origination identifier, never 0. A data acknowledgement reuses the id of the
    /// packet it answers.
    pub packet_id: u32,
    pub path: Route,
    pub path_index: u8,
    pub source_routed: bool,
}

impl Packet {
    /// Creates a packet with an empty, accumulating route.
    pub fn new(
        class: Class,
        dst: Address,
        src: Address,
        packet_id: u32,
        ttl: u8,
        payload: Payload,
    ) -> Self {
        Packet {
            payload,
            ttl,
            class,
            dst,
            src,
            packet_id,
            path: Route::empty(),
            path_index: 0,
            source_routed: false,
        }
    }
}

fn read_flag(bytes: &mut ByteReader<'_>) -> Result<bool, Error> {
    match bytes.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::MalformedPacket),
    }
}

impl<'a> FromBytes<'a> for Packet {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        if bytes.bytes_left() < PACKET_LEN {
            return Err(Error::MalformedPacket);
        }

        let mut payload = Payload::empty();
        payload.bytes.copy_from_slice(bytes.read_slice(PAYLOAD_CAP)?);
        let ttl = bytes.read_u8()?;
        let kind = bytes.read_u8()?;
        let bcast_ack = read_flag(bytes)?;
        let data_ack = read_flag(bytes)?;
        let class = Class::from_wire(kind, bcast_ack, data_ack)?;
        let dst = Address::from_bytes(bytes)?;
        let src = Address::from_bytes(bytes)?;
        let packet_id = LittleEndian::read_u32(bytes.read_slice(4)?);
        if packet_id == 0 {
            return Err(Error::MalformedPacket);
        }

        let mut hops = [Address::new([0; 6]); MAX_NODES];
        for hop in hops.iter_mut() {
            *hop = Address::from_bytes(bytes)?;
        }
        let path_index = bytes.read_u8()?;
        let path_length = bytes.read_u8()?;
        let source_routed = read_flag(bytes)?;
        if usize::from(path_length) > MAX_NODES || path_index > path_length {
            return Err(Error::MalformedPacket);
        }
        let path = Route::from_hops(&hops[..usize::from(path_length)])
            .map_err(|_| Error::MalformedPacket)?;

        let packet = Packet {
            payload,
            ttl,
            class,
            dst,
            src,
            packet_id,
            path,
            path_index,
            source_routed,
        };

        // A prescriptive route must lead from the packet's originator to its destination.
        if packet.source_routed
            && (packet.path.first() != Some(packet.src) || packet.path.last() != Some(packet.dst))
        {
            return Err(Error::MalformedPacket);
        }

        Ok(packet)
    }
}

impl ToBytes for Packet {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_slice(&self.payload.bytes)?;
        writer.write_u8(self.ttl)?;
        let (kind, bcast_ack, data_ack) = self.class.to_wire();
        writer.write_u8(kind)?;
        writer.write_u8(bcast_ack as u8)?;
        writer.write_u8(data_ack as u8)?;
        self.dst.to_bytes(writer)?;
        self.src.to_bytes(writer)?;
        let mut id = [0; 4];
        LittleEndian::write_u32(&mut id, self.packet_id);
        writer.write_slice(&id)?;
        for hop in self.path.as_slice() {
            hop.to_bytes(writer)?;
        }
        for _ in self.path.len()..MAX_NODES {
            Address::new([0; 6]).to_bytes(writer)?;
        }
        writer.write_u8(self.path_index)?;
        writer.write_u8(self.path.len() as u8)?;
        writer.write_u8(self.source_routed as u8)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DST: Address = Address::new([0x48, 0xE7, 0x29, 0xA3, 0x47, 0x40]);
    const SRC: Address = Address::new([0xEC, 0x62, 0x60, 0x93, 0xC7, 0xA8]);
    const VIA: Address = Address::new([0x24, 0xDC, 0xC3, 0xC6, 0xAE, 0xCC]);

    fn encode(packet: &Packet) -> [u8; PACKET_LEN] {
        let mut buf = [0; PACKET_LEN];
        packet.to_bytes(&mut ByteWriter::new(&mut buf)).unwrap();
        buf
    }

    fn decode(buf: &[u8]) -> Result<Packet, Error> {
        Packet::from_bytes(&mut ByteReader::new(buf))
    }

    #[test]
    fn roundtrip_all_classes() {
        for &class in &[
            Class::Broadcast,
            Class::BroadcastAck,
            Class::Data,
            Class::DataAck,
        ] {
            let packet = Packet::new(class, DST, SRC, 0xDEAD_BEEF, 5, Payload::from_text("ping"));
            assert_eq!(decode(&encode(&packet)).unwrap(), packet);
        }
    }

    #[test]
    fn roundtrip_with_route() {
        let mut packet = Packet::new(
            Class::DataAck,
            DST,
            SRC,
            0x0102_0304,
            8,
            Payload::empty(),
        );
        packet.path = Route::from_hops(&[SRC, VIA, DST]).unwrap();
        packet.path_index = 1;
        packet.source_routed = true;
        let decoded = decode(&encode(&packet)).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.path.as_slice(), &[SRC, VIA, DST]);
    }

    #[test]
    fn encode_of_decode_is_identity() {
        let mut packet = Packet::new(Class::Data, DST, SRC, 42, 3, Payload::from_text("hi"));
        packet.path = Route::from_hops(&[SRC]).unwrap();
        let buf = encode(&packet);
        assert_eq!(encode(&decode(&buf).unwrap()), buf);
    }

    #[test]
    fn short_buffer_is_malformed() {
        let packet = Packet::new(Class::Data, DST, SRC, 42, 3, Payload::empty());
        let buf = encode(&packet);
        assert_eq!(decode(&buf[..PACKET_LEN - 1]), Err(Error::MalformedPacket));
        assert_eq!(decode(&[]), Err(Error::MalformedPacket));
    }

    #[test]
    fn invalid_field_combinations_are_malformed() {
        let packet = Packet::new(Class::Data, DST, SRC, 42, 3, Payload::empty());

        // Unknown kind byte.
        let mut buf = encode(&packet);
        buf[PAYLOAD_CAP + 1] = 7;
        assert_eq!(decode(&buf), Err(Error::MalformedPacket));

        // Broadcast combined with the data-ack flag.
        let mut buf = encode(&packet);
        buf[PAYLOAD_CAP + 1] = 1;
        buf[PAYLOAD_CAP + 3] = 1;
        assert_eq!(decode(&buf), Err(Error::MalformedPacket));

        // Zero packet id.
        let mut buf = encode(&packet);
        for b in &mut buf[PAYLOAD_CAP + 4 + 2 * Address::LEN..][..4] {
            *b = 0;
        }
        assert_eq!(decode(&buf), Err(Error::MalformedPacket));

        // Route position past the recorded length.
        let mut buf = encode(&packet);
        buf[PACKET_LEN - 3] = 1;
        assert_eq!(decode(&buf), Err(Error::MalformedPacket));
    }

    #[test]
    fn prescriptive_route_must_match_endpoints() {
        let mut packet = Packet::new(Class::Data, DST, SRC, 42, 3, Payload::empty());
        packet.path = Route::from_hops(&[VIA, DST]).unwrap();
        packet.source_routed = true;
        assert_eq!(decode(&encode(&packet)), Err(Error::MalformedPacket));
    }

    #[test]
    fn text_is_truncated_and_terminated() {
        let bytes = [b'x'; 100];
        let long = core::str::from_utf8(&bytes).unwrap();
        let payload = Payload::from_text(long);
        assert_eq!(payload.text().len(), PAYLOAD_CAP - 1);
        assert_eq!(payload.as_bytes()[PAYLOAD_CAP - 1], 0);

        let payload = Payload::from_text("hello");
        assert_eq!(payload.text(), "hello");
    }
}
