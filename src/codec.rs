//! Wire format of the ranging messages
//!
//! Two messages take part in a ranging session:
//!
//! - [`PollPacket`], broadcast by the tag `N` times per session. Anchors
//!   timestamp its arrival, and learn from it when and how long to reply.
//! - [`AnchorFinal`], sent by each anchor during the listening phase. It
//!   carries the arrival times of all polls the anchor heard, and the time the
//!   anchor sent the final message itself.
//!
//! Both start with an IEEE 802.15.4 data frame header with PAN ID compression
//! and an extended source address. All multi-byte fields are little-endian.
//! The frame check sequence is appended and checked by the radio, so it is not
//! part of the encoded messages. Trailing bytes after a decoded message are
//! ignored.

use core::convert::TryFrom;

use byte::{BytesExt, TryRead, TryWrite, LE};
use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{configs::{TagConfig, MAX_BROADCASTS}, mac};

/// Frame control of a data frame with PAN ID compression, a short (broadcast)
/// destination and an extended source address
pub const FRAME_CONTROL_BROADCAST: [u8; 2] = [0x41, 0xC8];

/// Frame control of a data frame with PAN ID compression and extended
/// destination and source addresses
pub const FRAME_CONTROL_UNICAST: [u8; 2] = [0x41, 0xCC];

/// Short address that every node accepts
pub const BROADCAST_ADDRESS: u16 = 0xffff;

/// Length of a header with a short destination address
pub const HEADER_BROADCAST_LEN: usize = 15;

/// Length of a header with an extended destination address
pub const HEADER_UNICAST_LEN: usize = 21;

/// Offset of the message type within an anchor final message
pub const ANCHOR_FINAL_TYPE_OFFSET: usize = HEADER_UNICAST_LEN;

/// Length of the body of a poll, behind the header
pub const POLL_BODY_LEN: usize = 9;

/// Length of an encoded poll
pub const POLL_LEN: usize = HEADER_BROADCAST_LEN + POLL_BODY_LEN;

/// Size of a buffer that can hold any message this crate encodes
pub const MAX_MESSAGE_LEN: usize = AnchorFinal::len_for(MAX_BROADCASTS);

/// Identifies the type of a ranging message
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MessageType {
    /// A poll broadcast by a tag
    TagPoll = 0x80,
    /// An anchor's reply with its poll arrival times
    AnchorFinal = 0x81,
}

impl MessageType {
    /// Reads the message type of a received frame
    ///
    /// Only anchor final messages are addressed to tags, so the type byte is
    /// expected at [`ANCHOR_FINAL_TYPE_OFFSET`]. Returns `None` if the frame
    /// is too short, or the byte is no known message type.
    pub fn of_anchor_frame(frame: &[u8]) -> Option<Self> {
        let byte = *frame.get(ANCHOR_FINAL_TYPE_OFFSET)?;
        MessageType::try_from(byte).ok()
    }
}

/// Destination address of a ranging message
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Destination {
    /// Short address, `0xffff` for broadcast
    Short(mac::ShortAddress),
    /// Extended address of a single node
    Extended(mac::ExtendedAddress),
}

/// The 802.15.4 header in front of every ranging message
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Sequence number
    pub seq: u8,
    /// PAN ID, shared by destination and source
    pub pan_id: mac::PanId,
    /// Destination address
    pub destination: Destination,
    /// Extended address of the sender
    pub source: mac::ExtendedAddress,
}

impl Header {
    /// Encoded length of this header
    pub fn len(&self) -> usize {
        match self.destination {
            Destination::Short(_) => HEADER_BROADCAST_LEN,
            Destination::Extended(_) => HEADER_UNICAST_LEN,
        }
    }
}

impl TryWrite for Header {
    fn try_write(self, bytes: &mut [u8], _ctx: ()) -> byte::Result<usize> {
        let offset = &mut 0;

        let frame_control = match self.destination {
            Destination::Short(_) => FRAME_CONTROL_BROADCAST,
            Destination::Extended(_) => FRAME_CONTROL_UNICAST,
        };
        bytes.write_with(offset, frame_control[0], LE)?;
        bytes.write_with(offset, frame_control[1], LE)?;
        bytes.write_with(offset, self.seq, LE)?;
        bytes.write_with(offset, self.pan_id.0, LE)?;
        match self.destination {
            Destination::Short(address) => bytes.write_with(offset, address.0, LE)?,
            Destination::Extended(address) => bytes.write_with(offset, address.0, LE)?,
        }
        bytes.write_with(offset, self.source.0, LE)?;

        Ok(*offset)
    }
}

impl<'a> TryRead<'a> for Header {
    fn try_read(bytes: &'a [u8], _ctx: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;

        let frame_control: [u8; 2] = [
            bytes.read_with(offset, LE)?,
            bytes.read_with(offset, LE)?,
        ];
        let seq: u8 = bytes.read_with(offset, LE)?;
        let pan_id = mac::PanId(bytes.read_with(offset, LE)?);

        let destination = match frame_control {
            FRAME_CONTROL_BROADCAST => {
                Destination::Short(mac::ShortAddress(bytes.read_with(offset, LE)?))
            }
            FRAME_CONTROL_UNICAST => {
                Destination::Extended(mac::ExtendedAddress(bytes.read_with(offset, LE)?))
            }
            _ => {
                return Err(byte::Error::BadInput {
                    err: "unsupported frame control",
                })
            }
        };
        let source = mac::ExtendedAddress(bytes.read_with(offset, LE)?);

        Ok((
            Header {
                seq,
                pan_id,
                destination,
                source,
            },
            *offset,
        ))
    }
}

/// The fixed part of a poll behind the header
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(C)]
pub struct PollBody {
    /// Always [`MessageType::TagPoll`]
    pub message_type: u8,
    /// Which of the `N` polls of the session this is
    pub subsequence: u8,
    /// Subsequence index of the last poll, `N - 1`
    pub reply_after_subsequence: u8,
    /// Duration of one listening window, in microseconds
    pub listening_window_us: u32,
    /// Duration of one anchor slot, in microseconds
    pub listening_slot_us: u16,
}

/// A poll broadcast by the tag
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PollPacket {
    /// The frame header, with a broadcast destination
    pub header: Header,
    /// The poll's body
    pub body: PollBody,
}

impl PollPacket {
    /// Creates the poll template for a session with the given configuration
    ///
    /// The sequence number and subsequence index start at zero and are updated
    /// for each transmission.
    pub fn new(config: &TagConfig, source: mac::ExtendedAddress) -> Self {
        PollPacket {
            header: Header {
                seq: 0,
                pan_id: mac::PanId(config.pan_id),
                destination: Destination::Short(mac::ShortAddress(BROADCAST_ADDRESS)),
                source,
            },
            body: PollBody {
                message_type: MessageType::TagPoll.into(),
                subsequence: 0,
                reply_after_subsequence: config.broadcast_count.saturating_sub(1),
                listening_window_us: config.listening_window_us,
                listening_slot_us: config.listening_slot_us,
            },
        }
    }

    /// Encodes the poll into `buf`, returning the number of bytes written
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if buf.len() < POLL_LEN {
            return Err(CodecError::TooShort { required_len: POLL_LEN });
        }

        let offset = &mut 0;
        buf.write(offset, self.header)?;
        *offset += ssmarshal::serialize(&mut buf[*offset..], &self.body)?;

        Ok(*offset)
    }

    /// Decodes a poll
    ///
    /// Tags never receive polls. This is used by anchor simulations and tests.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < POLL_LEN {
            return Err(CodecError::TooShort { required_len: POLL_LEN });
        }

        let offset = &mut 0;
        let header: Header = bytes.read(offset)?;
        let (body, _) = ssmarshal::deserialize::<PollBody>(&bytes[*offset..])?;

        if body.message_type != u8::from(MessageType::TagPoll) {
            return Err(CodecError::UnexpectedMessageType(body.message_type));
        }

        Ok(PollPacket { header, body })
    }
}

/// An anchor's final message
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnchorFinal {
    /// The frame header, with the anchor as source
    pub header: Header,
    /// Arrival times of the tag's polls in anchor time, one per subsequence
    ///
    /// Zero marks a poll the anchor didn't hear.
    pub toas: Vec<u64, MAX_BROADCASTS>,
    /// When the anchor sent this message, truncated to the upper 32 bits
    pub time_sent: u32,
}

impl AnchorFinal {
    /// Encoded length of a final message for a session with `broadcasts` polls
    pub const fn len_for(broadcasts: usize) -> usize {
        HEADER_UNICAST_LEN + 1 + broadcasts * 8 + 4
    }

    /// Decodes a final message of a session with `broadcasts` polls
    ///
    /// Validates the length before interpreting any field.
    pub fn decode(bytes: &[u8], broadcasts: usize) -> Result<Self, CodecError> {
        if broadcasts > MAX_BROADCASTS {
            return Err(CodecError::TooManyTimestamps(broadcasts));
        }

        let required_len = Self::len_for(broadcasts);
        if bytes.len() < required_len {
            return Err(CodecError::TooShort { required_len });
        }

        let offset = &mut 0;
        let header: Header = bytes.read(offset)?;
        if header.len() != HEADER_UNICAST_LEN {
            return Err(CodecError::Byte(byte::Error::BadInput {
                err: "anchor final must be unicast",
            }));
        }

        let message_type: u8 = bytes.read_with(offset, LE)?;
        if message_type != u8::from(MessageType::AnchorFinal) {
            return Err(CodecError::UnexpectedMessageType(message_type));
        }

        let mut toas = Vec::new();
        for _ in 0..broadcasts {
            let toa: u64 = bytes.read_with(offset, LE)?;
            // Can't fail, `broadcasts` was checked against the capacity.
            let _ = toas.push(toa);
        }
        let time_sent: u32 = bytes.read_with(offset, LE)?;

        Ok(AnchorFinal {
            header,
            toas,
            time_sent,
        })
    }

    /// Encodes the message into `buf`, returning the number of bytes written
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let required_len = Self::len_for(self.toas.len());
        if buf.len() < required_len {
            return Err(CodecError::TooShort { required_len });
        }

        let offset = &mut 0;
        buf.write(offset, self.header)?;
        buf.write_with(offset, u8::from(MessageType::AnchorFinal), LE)?;
        for &toa in &self.toas {
            buf.write_with(offset, toa, LE)?;
        }
        buf.write_with(offset, self.time_sent, LE)?;

        Ok(*offset)
    }
}

/// An error that can occur while encoding or decoding a ranging message
#[derive(Debug)]
pub enum CodecError {
    /// Error reported by the `byte` crate
    Byte(byte::Error),

    /// Error while serializing or deserializing a fixed-layout body
    Ssmarshal(ssmarshal::Error),

    /// The buffer is shorter than the message
    TooShort {
        /// Indicates how large a buffer would have been required
        required_len: usize,
    },

    /// The message type byte doesn't match the decoded message
    UnexpectedMessageType(u8),

    /// More timestamps were requested than a message can hold
    TooManyTimestamps(usize),
}

impl From<byte::Error> for CodecError {
    fn from(error: byte::Error) -> Self {
        CodecError::Byte(error)
    }
}

impl From<ssmarshal::Error> for CodecError {
    fn from(error: ssmarshal::Error) -> Self {
        CodecError::Ssmarshal(error)
    }
}
