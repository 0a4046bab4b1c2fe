use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::DecodeError;

/// Well-known UDP port for DDP.
pub const DDP_PORT: u16 = 4048;

/// Fixed header length without a timecode.
pub const HEADER_LEN: usize = 10;

/// Header length when the timecode flag is set.
pub const HEADER_LEN_TIMECODE: usize = 14;

pub const FLAG_VERSION_MASK: u8 = 0xc0;
pub const FLAG_TIMECODE: u8 = 0x10;
pub const FLAG_STORE: u8 = 0x08;
pub const FLAG_REPLY: u8 = 0x04;
pub const FLAG_QUERY: u8 = 0x02;
pub const FLAG_PUSH: u8 = 0x01;

/// Version 1 in the top two bits of flags1.
pub const FLAG_VERSION_1: u8 = 0x40;

/// Largest payload a sender puts in one datagram (480 RGB pixels).
pub const MAX_CHUNK_LEN: usize = 480 * 3;

/// Decoded DDP header (10 bytes, or 14 with timecode, big-endian fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdpHeader {
    pub flags1: u8,
    pub flags2: u8,
    pub data_type: u8,
    /// Destination id as reported by the sender. Not trusted for string assignment.
    pub source_id: u8,
    pub offset: u32,
    pub length: u16,
    pub timecode: Option<u32>,
    pub payload_start: usize,
}

/// A decoded header together with its payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DdpPacket<'a> {
    pub header: DdpHeader,
    pub payload: &'a [u8],
}

impl DdpHeader {
    /// Decodes the header of a raw datagram.
    ///
    /// Also checks that the datagram carries at least `length` payload bytes,
    /// so a successfully decoded header always describes a whole payload.
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                len: datagram.len(),
            });
        }

        let flags1 = datagram[0];
        let offset = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
        let length = u16::from_be_bytes([datagram[8], datagram[9]]);

        let (timecode, payload_start) = if flags1 & FLAG_TIMECODE != 0 {
            if datagram.len() < HEADER_LEN_TIMECODE {
                return Err(DecodeError::TruncatedTimecode {
                    len: datagram.len(),
                });
            }
            let tc = u32::from_be_bytes([datagram[10], datagram[11], datagram[12], datagram[13]]);
            (Some(tc), HEADER_LEN_TIMECODE)
        } else {
            (None, HEADER_LEN)
        };

        let available = datagram.len() - payload_start;
        if available < length as usize {
            return Err(DecodeError::PayloadLengthMismatch {
                expected: length as usize,
                available,
            });
        }

        Ok(Self {
            flags1,
            flags2: datagram[1],
            data_type: datagram[2],
            source_id: datagram[3],
            offset,
            length,
            timecode,
            payload_start,
        })
    }

    /// Builds a version 1 header for a plain (no timecode) data packet.
    pub fn data(offset: u32, length: u16, push: bool, sequence: u8) -> Self {
        Self {
            flags1: FLAG_VERSION_1 | if push { FLAG_PUSH } else { 0 },
            flags2: sequence & 0x0f,
            data_type: 0x01,
            source_id: 0x01,
            offset,
            length,
            timecode: None,
            payload_start: HEADER_LEN,
        }
    }

    pub fn version(&self) -> u8 {
        (self.flags1 & FLAG_VERSION_MASK) >> 6
    }

    pub fn has_timecode(&self) -> bool {
        self.flags1 & FLAG_TIMECODE != 0
    }

    pub fn is_store(&self) -> bool {
        self.flags1 & FLAG_STORE != 0
    }

    pub fn is_reply(&self) -> bool {
        self.flags1 & FLAG_REPLY != 0
    }

    pub fn is_query(&self) -> bool {
        self.flags1 & FLAG_QUERY != 0
    }

    pub fn is_push(&self) -> bool {
        self.flags1 & FLAG_PUSH != 0
    }

    /// Sequence number from the low nibble of flags2 (0 means unused).
    pub fn sequence(&self) -> u8 {
        self.flags2 & 0x0f
    }

    /// First byte after the addressed range.
    pub fn end_offset(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    /// Wire form of the header. The timecode is written only when the
    /// timecode flag is set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_TIMECODE);
        buf.push(self.flags1);
        buf.push(self.flags2);
        buf.push(self.data_type);
        buf.push(self.source_id);
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
        if self.has_timecode() {
            buf.extend_from_slice(&self.timecode.unwrap_or(0).to_be_bytes());
        }
        buf
    }
}

impl<'a> DdpPacket<'a> {
    /// Decodes a datagram into header and exactly `length` payload bytes.
    pub fn parse(datagram: &'a [u8]) -> Result<Self, DecodeError> {
        let header = DdpHeader::decode(datagram)?;
        let start = header.payload_start;
        let payload = &datagram[start..start + header.length as usize];
        Ok(Self { header, payload })
    }
}

/// Header followed by payload, ready to send.
pub fn encode_packet(header: &DdpHeader, payload: &[u8]) -> Vec<u8> {
    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(payload);
    bytes
}

/// Sends pixel data to a DDP receiver, one frame at a time.
pub struct DdpSender {
    socket: UdpSocket,
    target: SocketAddr,
    sequence: u8,
}

impl DdpSender {
    /// Opens an ephemeral socket of the same address family as `target`.
    pub fn new(target: SocketAddr) -> std::io::Result<Self> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        Ok(Self {
            socket: UdpSocket::bind(local)?,
            target,
            sequence: 1,
        })
    }

    /// Sends `data` starting at `offset`, split into chunks of at most
    /// [`MAX_CHUNK_LEN`] bytes. Only the last chunk carries the push flag.
    pub fn send_string(&mut self, offset: u32, data: &[u8]) -> std::io::Result<()> {
        for packet in chunk_packets(offset, data, self.sequence) {
            self.socket.send_to(&packet, self.target)?;
        }
        self.sequence = self.sequence % 15 + 1;
        Ok(())
    }
}

/// Splits one string's data into encoded packets, push on the last one.
pub fn chunk_packets(offset: u32, data: &[u8], sequence: u8) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = data.chunks(MAX_CHUNK_LEN).collect();
    let last = chunks.len().saturating_sub(1);
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let chunk_offset = offset + (i * MAX_CHUNK_LEN) as u32;
            let header = DdpHeader::data(chunk_offset, chunk.len() as u16, i == last, sequence);
            encode_packet(&header, chunk)
        })
        .collect()
}
