// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! H.264/AVC NAL units, behind either packet format the simulator accepts:
//! the Annex B byte stream or the RTP packet file.
//!
//! Slice headers here are shallow enough (two exp-Golomb codes from the
//! second payload byte) that emulation-prevention removal is unnecessary: an
//! escape sequence cannot occur before the third payload byte.

use std::io::{BufRead, Seek, Write};

use log::trace;

use crate::annexb::{self, ByteStreamReader};
use crate::error::ErrorInt;
use crate::rbsp::BitReader;
use crate::rtp::{PacketFileReader, PacketFileWriter};
use crate::Error;

/// NAL unit type, as in T.REC H.264 Table 7-1 (5-bit field).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum UnitType {
    Unspecified0 = 0,
    Slice = 1,
    DataPartitionA = 2,
    DataPartitionB = 3,
    DataPartitionC = 4,
    IdrSlice = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    FillerData = 12,
    SpsExtension = 13,
    PrefixNal = 14,
    SubsetSps = 15,
    DepthParameterSet = 16,
    RsvNonVcl17 = 17,
    RsvNonVcl18 = 18,
    SliceAux = 19,
    SliceExtension = 20,
    SliceDepth = 21,
    RsvNonVcl22 = 22,
    RsvNonVcl23 = 23,
    /// View and dependency representation delimiter.
    Vdrd = 24,
    Unspecified25 = 25,
    Unspecified26 = 26,
    Unspecified27 = 27,
    Unspecified28 = 28,
    Unspecified29 = 29,
    Unspecified30 = 30,
    Unspecified31 = 31,
}

impl UnitType {
    /// Interprets the low 5 bits of `id` as a unit type.
    pub fn from_id(id: u8) -> Self {
        // SAFETY: `UnitType` is `repr(u8)` and C-like with all 32 values of
        // the masked field present.
        unsafe { std::mem::transmute::<u8, UnitType>(id & 0x1F) }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether the unit carries coded slice data and is therefore subject to
    /// loss. The simulator treats everything up to and including IDR as VCL,
    /// matching the reference tool.
    pub fn is_vcl(self) -> bool {
        self.id() <= UnitType::IdrSlice.id()
    }
}

/// Slice type recovered from a slice header.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    /// Maps the `slice_type` codeword. Values 5..=9 declare that every slice
    /// of the picture shares the type and reduce modulo 5; anything beyond
    /// that is stream corruption, reported against `pos`.
    pub fn from_codeword(codeword: u32, pos: u64) -> Result<Self, Error> {
        let reduced = if codeword >= 5 { codeword - 5 } else { codeword };
        Ok(match reduced {
            0 => SliceType::P,
            1 => SliceType::B,
            2 => SliceType::I,
            3 => SliceType::Sp,
            4 => SliceType::Si,
            _ => bail!(ErrorInt::CorruptStream {
                pos,
                description: format!("slice_type codeword {codeword} is out of range"),
            }),
        })
    }
}

/// One H.264 NAL unit, however it was framed.
#[derive(Debug)]
pub struct NalUnit {
    /// Start-code prefix length (3 or 4) for byte-stream units; `None` for
    /// RTP-sourced units, which carry no prefix.
    pub start_code_len: Option<u8>,

    /// RTP header timestamp; `None` in Annex B mode.
    pub timestamp: Option<u32>,

    pub forbidden_bit: bool,
    pub nal_ref_idc: u8,
    pub unit_type: UnitType,

    /// NAL header byte followed by the (still escaped) payload.
    pub data: Vec<u8>,

    /// Input byte position just past this unit, for error context.
    pub pos: u64,
}

impl NalUnit {
    fn from_payload(
        start_code_len: Option<u8>,
        timestamp: Option<u32>,
        data: Vec<u8>,
        pos: u64,
    ) -> Result<Self, Error> {
        let Some(&header) = data.first() else {
            bail!(ErrorInt::CorruptStream {
                pos,
                description: "NAL unit with no header byte".to_owned(),
            });
        };
        Ok(Self {
            start_code_len,
            timestamp,
            forbidden_bit: (header >> 7) & 1 != 0,
            nal_ref_idc: (header >> 5) & 0b11,
            unit_type: UnitType::from_id(header),
            data,
            pos,
        })
    }

    pub fn is_vcl(&self) -> bool {
        self.unit_type.is_vcl()
    }

    /// The NAL header byte rebuilt from the stored fields.
    pub fn header_byte(&self) -> u8 {
        u8::from(self.forbidden_bit) << 7 | self.nal_ref_idc << 5 | self.unit_type.id()
    }

    /// Decodes the slice type: `first_mb_in_slice` then `slice_type`, both
    /// unsigned exp-Golomb, starting at the byte after the NAL header.
    pub fn decode_slice_type(&self) -> Result<SliceType, Error> {
        let mut r = BitReader::new(&self.data[1..]);
        let _first_mb_in_slice = r.read_ue("first_mb_in_slice")?;
        SliceType::from_codeword(r.read_ue("slice_type")?, self.pos)
    }
}

/// Reads H.264 NAL units from either packet format.
pub enum Framer<R> {
    AnnexB(ByteStreamReader<R>),
    Rtp(PacketFileReader<R>),
}

impl<R: BufRead + Seek> Framer<R> {
    pub fn next_unit(&mut self) -> Result<Option<NalUnit>, Error> {
        match self {
            Framer::AnnexB(r) => {
                let Some(u) = r.next_unit()? else {
                    return Ok(None);
                };
                let nal =
                    NalUnit::from_payload(Some(u.start_code_len), None, u.data, r.pos())?;
                trace!(
                    "framed {:?} ({} bytes, {}-byte prefix)",
                    nal.unit_type,
                    nal.data.len(),
                    u.start_code_len,
                );
                Ok(Some(nal))
            }
            Framer::Rtp(r) => {
                let Some(rec) = r.next_record()? else {
                    return Ok(None);
                };
                let payload = rec.packet.payload().to_vec();
                let nal = NalUnit::from_payload(
                    None,
                    Some(rec.packet.timestamp()),
                    payload,
                    r.pos(),
                )?;
                trace!(
                    "depacketized {:?} (seq {}, ts {})",
                    nal.unit_type,
                    rec.packet.sequence_number(),
                    rec.packet.timestamp(),
                );
                Ok(Some(nal))
            }
        }
    }
}

/// Writes H.264 NAL units in the matching packet format.
pub enum Writer<W> {
    AnnexB(W),
    Rtp(PacketFileWriter<W>),
}

impl<W: Write> Writer<W> {
    pub fn write_unit(&mut self, nal: &mut NalUnit) -> Result<(), Error> {
        if nal.forbidden_bit {
            bail!(ErrorInt::MalformedUnit(
                "forbidden_zero_bit is set".to_owned()
            ));
        }
        nal.data[0] = nal.header_byte();
        match self {
            Writer::AnnexB(w) => {
                let Some(start_code_len) = nal.start_code_len else {
                    bail!(ErrorInt::MalformedUnit(
                        "unit has no start-code prefix to write".to_owned()
                    ));
                };
                annexb::write_unit(w, start_code_len, &nal.data)
            }
            // A 4-byte Annex B prefix maps to the RTP marker bit; RTP-sourced
            // units have no prefix and the marker stays clear.
            Writer::Rtp(w) => w.write_packet(nal.start_code_len == Some(4), &nal.data),
        }
    }
}
