use core::fmt;

/// Errors returned by the mesh stack.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Received frame was too short or contained an invalid field encoding.
    ///
    /// Malformed frames carry no usable routing information and are dropped
    /// without further processing.
    MalformedPacket,

    /// Unexpectedly reached EOF while reading or writing data.
    ///
    /// This is returned when trying to fit too much data into a fixed-size
    /// buffer or bounded container, and when reaching EOF prematurely while
    /// reading data from a buffer.
    Eof,

    /// The radio driver reported a transmit failure.
    ///
    /// Losses on the link are recovered by the originator's retransmission
    /// timer, not by the layer that observed the failure.
    LinkFailure,

    /// No free byte left in the persistent route region.
    StoreFull,

    /// A reliable transmission is already in flight.
    ///
    /// Only one unacknowledged packet may exist per originator; callers must
    /// hold further payloads until the current session completes.
    Busy,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::MalformedPacket => "malformed packet",
            Error::Eof => "end of buffer",
            Error::LinkFailure => "link-layer send failure",
            Error::StoreFull => "persistent route store is full",
            Error::Busy => "a transmission is already in flight",
        })
    }
}
