use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::Error;
use core::fmt;

/// A 6-byte link-layer node address.
///
/// A node's identity on the mesh is the MAC address of its radio. The all-ones value is the
/// broadcast address, which every neighbour in range accepts and delivers locally.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Address([u8; 6]);

impl Address {
    /// Number of bytes in an address.
    pub const LEN: usize = 6;

    /// The all-ones broadcast address.
    pub const BROADCAST: Self = Address([0xFF; 6]);

    /// Creates an address from 6 raw bytes, in transmission order.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Address(bytes)
    }

    /// Returns the raw bytes making up this address.
    pub fn raw(&self) -> &[u8; 6] {
        &self.0
    }

    /// Returns whether this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Debug>::fmt(self, f)
    }
}

impl<'a> FromBytes<'a> for Address {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Address(bytes.read_array()?))
    }
}

impl ToBytes for Address {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_slice(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_representation() {
        let addr = Address::new([0xEC, 0x62, 0x60, 0x93, 0xC7, 0xA8]);
        assert_eq!(format!("{:?}", addr), "EC:62:60:93:C7:A8");
    }

    #[test]
    fn broadcast() {
        assert!(Address::BROADCAST.is_broadcast());
        assert!(!Address::new([0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]).is_broadcast());
    }
}
