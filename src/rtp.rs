// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The RTP packet-file format used by the JM reference software to store
//! packetized H.264 streams on disk: a concatenation of records
//! `{u32 little-endian packet length, u32 little-endian timestamp,
//! packet bytes}`, each packet being a complete RTP packet as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).
//!
//! The simulator only handles the profile the reference encoder produces: a
//! bare 12-byte header (no padding, no extensions, no CSRCs), payload type
//! 105, and the fixed debugging SSRC `0x12345678`. Anything else is treated
//! as file corruption rather than parsed around.

use std::io::{Read, Write};

use bytes::Bytes;

use crate::error::ErrorInt;
use crate::Error;

/// The minimum length of an RTP header (no CSRCs or extensions).
const MIN_HEADER_LEN: usize = 12;

/// Maximum stored packet size: 65,536 minus IP/UDP header headroom.
pub const MAX_PACKET_SIZE: u32 = 65_536 - 28;

/// RTP payload type the reference encoder assigns to H.264.
pub const H264_PAYLOAD_TYPE: u8 = 105;

/// Synchronization source identifier, fixed to simplify debugging.
pub const H264_SSRC: u32 = 0x1234_5678;

/// One-line hex rendering of the start of a packet, after the reference
/// decoder's header dump: the first 30 octets, with the remainder elided.
fn dump_packet_head(data: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for b in &data[..data.len().min(30)] {
        write!(&mut out, "{b:02x} ").expect("write to String should succeed");
    }
    if data.len() > 30 {
        write!(&mut out, "... ({} bytes)", data.len()).expect("write to String should succeed");
    } else {
        out.pop();
    }
    out
}

/// Raw RTP packet: a validated buffer plus accessors.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub struct RawPacket(Bytes);

impl RawPacket {
    /// Validates `data` against the profile above. `pos` is the input byte
    /// offset of the packet, used in error messages.
    pub fn validate(data: Bytes, pos: u64) -> Result<Self, Error> {
        let fail = |reason: String| {
            wrap!(ErrorInt::CorruptStream {
                pos,
                description: format!("{reason}\npacket head: {}", dump_packet_head(&data)),
            })
        };
        if data.len() < MIN_HEADER_LEN {
            return Err(fail(format!(
                "RTP packet of {} bytes is shorter than the 12-byte header",
                data.len()
            )));
        }
        if (data[0] & 0b1100_0000) != 2 << 6 {
            return Err(fail("RTP version must be 2".to_owned()));
        }
        if (data[0] & 0b0010_0000) != 0 {
            return Err(fail("RTP padding must not be used".to_owned()));
        }
        if (data[0] & 0b0001_0000) != 0 {
            return Err(fail("RTP header extension must not be used".to_owned()));
        }
        if (data[0] & 0b0000_1111) != 0 {
            return Err(fail("RTP CSRC count must be zero".to_owned()));
        }
        let pt = data[1] & 0x7F;
        if pt != H264_PAYLOAD_TYPE {
            return Err(fail(format!(
                "RTP payload type {pt} (expected {H264_PAYLOAD_TYPE})"
            )));
        }
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        if ssrc != H264_SSRC {
            return Err(fail(format!("RTP SSRC {ssrc:#010x} (expected {H264_SSRC:#010x})")));
        }
        Ok(Self(data))
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.0[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }

    /// The NAL payload following the fixed header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.0[MIN_HEADER_LEN..]
    }
}

impl std::fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPacket")
            .field("sequence_number", &self.sequence_number())
            .field("timestamp", &self.timestamp())
            .field("mark", &self.mark())
            .field("payload", &dump_packet_head(self.payload()))
            .finish()
    }
}

/// Composes a packet in the fixed profile; the complement of
/// [`RawPacket::validate`].
pub struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub mark: bool,
}

impl RawPacketBuilder {
    pub fn build(self, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(MIN_HEADER_LEN + payload.len());
        data.push(2 << 6); // version=2, no padding, no extension, no CSRCs
        data.push(if self.mark { 0b1000_0000 } else { 0 } | H264_PAYLOAD_TYPE);
        data.extend_from_slice(&self.sequence_number.to_be_bytes());
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&H264_SSRC.to_be_bytes());
        data.extend_from_slice(payload);
        data
    }
}

/// One packet-file record.
#[derive(Debug)]
pub struct Record {
    /// The record-level timestamp field. Stored for completeness; nothing
    /// downstream consumes it.
    pub timestamp: u32,
    pub packet: RawPacket,
}

/// Reads packet-file records.
pub struct PacketFileReader<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> PacketFileReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    /// Current position within the input stream, in bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Reads the next record, or `None` on a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<Record>, Error> {
        let mut len_field = [0u8; 4];
        match self.read_up_to(&mut len_field)? {
            0 => return Ok(None),
            4 => {}
            n => bail!(ErrorInt::CorruptStream {
                pos: self.pos,
                description: format!("file ends inside a record length field ({n} of 4 bytes)"),
            }),
        }
        let packlen = u32::from_le_bytes(len_field);

        let mut ts_field = [0u8; 4];
        if self.read_up_to(&mut ts_field)? != 4 {
            bail!(ErrorInt::CorruptStream {
                pos: self.pos,
                description: "could not read the record timestamp".to_owned(),
            });
        }
        let timestamp = u32::from_le_bytes(ts_field);

        if packlen >= MAX_PACKET_SIZE {
            bail!(ErrorInt::CorruptStream {
                pos: self.pos,
                description: format!(
                    "record claims a {packlen}-byte packet (limit {MAX_PACKET_SIZE})"
                ),
            });
        }
        let packet_pos = self.pos;
        let mut packet = vec![0u8; packlen as usize];
        if self.read_up_to(&mut packet)? != packet.len() {
            bail!(ErrorInt::CorruptStream {
                pos: self.pos,
                description: format!("file ends inside a {packlen}-byte packet"),
            });
        }
        let packet = RawPacket::validate(Bytes::from(packet), packet_pos)?;
        Ok(Some(Record { timestamp, packet }))
    }

    /// Reads until `buf` is full or EOF; returns the byte count.
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.inner.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => bail!(ErrorInt::ReadError { source }),
            }
        }
        self.pos += n as u64;
        Ok(n)
    }
}

/// Writes packet-file records, numbering packets from zero.
///
/// The RTP timestamp on outgoing packets is a fixed counter (it starts at 0
/// and nothing advances it) and the record-level timestamp is written as the
/// placeholder `-1`, matching the reference tool's transmitter.
pub struct PacketFileWriter<W> {
    inner: W,
    next_sequence_number: u16,
    timestamp: u32,
}

impl<W: Write> PacketFileWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            next_sequence_number: 0,
            timestamp: 0,
        }
    }

    /// Wraps `payload` in an RTP packet and appends it as a record.
    pub fn write_packet(&mut self, mark: bool, payload: &[u8]) -> Result<(), Error> {
        let packet = RawPacketBuilder {
            sequence_number: self.next_sequence_number,
            timestamp: self.timestamp,
            mark,
        }
        .build(payload);
        let packlen = packet.len() as u32;
        self.inner
            .write_all(&packlen.to_le_bytes())
            .and_then(|()| self.inner.write_all(&(-1i32).to_le_bytes()))
            .and_then(|()| self.inner.write_all(&packet))
            .and_then(|()| self.inner.flush())
            .map_err(|source| wrap!(ErrorInt::WriteError { source }))?;
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        Ok(())
    }
}
