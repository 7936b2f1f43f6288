// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! H.265/HEVC NAL units over the Annex B byte stream.
//!
//! Unlike the H.264 side, slice-segment headers here reach deep enough into
//! the payload that emulation-prevention bytes must be stripped first, and
//! decoding them requires the referenced picture/sequence parameter sets, so
//! each unit carries its RBSP and the simulator keeps a parameter-set
//! memory ([`syntax::ParameterSetContext`]).

pub mod syntax;

use std::io::{BufRead, Seek, Write};

use log::trace;

use crate::annexb::{self, ByteStreamReader};
use crate::error::ErrorInt;
use crate::rbsp;
use crate::Error;

/// NAL unit type, as in T.REC H.265 Table 7-1 (6-bit field).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum UnitType {
    TrailN = 0,
    TrailR = 1,
    TsaN = 2,
    TsaR = 3,
    StsaN = 4,
    StsaR = 5,
    RadlN = 6,
    RadlR = 7,
    RaslN = 8,
    RaslR = 9,
    RsvVclN10 = 10,
    RsvVclR11 = 11,
    RsvVclN12 = 12,
    RsvVclR13 = 13,
    RsvVclN14 = 14,
    RsvVclR15 = 15,
    BlaWLp = 16,
    BlaWRadl = 17,
    BlaNLp = 18,
    IdrWRadl = 19,
    IdrNLp = 20,
    CraNut = 21,
    RsvIrapVcl22 = 22,
    RsvIrapVcl23 = 23,
    RsvVcl24 = 24,
    RsvVcl25 = 25,
    RsvVcl26 = 26,
    RsvVcl27 = 27,
    RsvVcl28 = 28,
    RsvVcl29 = 29,
    RsvVcl30 = 30,
    RsvVcl31 = 31,
    VpsNut = 32,
    SpsNut = 33,
    PpsNut = 34,

    /// Access unit delimiter.
    AudNut = 35,

    /// End of sequence.
    EosNut = 36,

    /// End of bitstream.
    EobNut = 37,
    FdNut = 38,
    PrefixSeiNut = 39,
    SuffixSeiNut = 40,
    RsvNvcl41 = 41,
    RsvNvcl42 = 42,
    RsvNvcl43 = 43,
    RsvNvcl44 = 44,
    RsvNvcl45 = 45,
    RsvNvcl46 = 46,
    RsvNvcl47 = 47,
    Unspec48 = 48,
    Unspec49 = 49,
    Unspec50 = 50,
    Unspec51 = 51,
    Unspec52 = 52,
    Unspec53 = 53,
    Unspec54 = 54,
    Unspec55 = 55,
    Unspec56 = 56,
    Unspec57 = 57,
    Unspec58 = 58,
    Unspec59 = 59,
    Unspec60 = 60,
    Unspec61 = 61,
    Unspec62 = 62,
    Unspec63 = 63,
}

impl UnitType {
    /// Interprets the low 6 bits of `id` as a unit type.
    pub fn from_id(id: u8) -> Self {
        // SAFETY: `UnitType` is `repr(u8)` and C-like with all 64 values of
        // the masked field present.
        unsafe { std::mem::transmute::<u8, UnitType>(id & 0x3F) }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether this type is in the VCL range (and so subject to loss).
    pub fn is_vcl(self) -> bool {
        self.id() < UnitType::VpsNut.id()
    }

    /// Whether this type is a coded slice segment (the reserved VCL ranges
    /// are VCL but carry no slice header to parse).
    pub fn is_slice(self) -> bool {
        matches!(
            self,
            UnitType::TrailN
                | UnitType::TrailR
                | UnitType::TsaN
                | UnitType::TsaR
                | UnitType::StsaN
                | UnitType::StsaR
                | UnitType::RadlN
                | UnitType::RadlR
                | UnitType::RaslN
                | UnitType::RaslR
                | UnitType::BlaWLp
                | UnitType::BlaWRadl
                | UnitType::BlaNLp
                | UnitType::IdrWRadl
                | UnitType::IdrNLp
                | UnitType::CraNut
        )
    }

    /// Intra random access point types (BLA/IDR/CRA and the reserved IRAP
    /// range); these carry `no_output_of_prior_pics_flag`.
    pub fn is_irap(self) -> bool {
        (UnitType::BlaWLp.id()..=UnitType::RsvIrapVcl23.id()).contains(&self.id())
    }
}

/// Slice type of a coded slice segment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SliceType {
    B,
    P,
    I,
}

impl SliceType {
    /// Maps the `slice_type` codeword; anything past 2 is stream corruption,
    /// reported against `pos`.
    pub fn from_codeword(codeword: u32, pos: u64) -> Result<Self, Error> {
        Ok(match codeword {
            0 => SliceType::B,
            1 => SliceType::P,
            2 => SliceType::I,
            _ => bail!(ErrorInt::CorruptStream {
                pos,
                description: format!("slice_type codeword {codeword} is out of range"),
            }),
        })
    }
}

/// One H.265 NAL unit.
#[derive(Debug)]
pub struct NalUnit {
    /// Start-code prefix length, 3 or 4.
    pub start_code_len: u8,

    pub forbidden_bit: bool,
    pub unit_type: UnitType,

    /// Two header bytes followed by the escaped payload, as framed.
    pub data: Vec<u8>,

    /// The same bytes with emulation-prevention bytes stripped; parsers
    /// start after the two header bytes.
    pub rbsp: Vec<u8>,

    /// Input byte position just past this unit, for error context.
    pub pos: u64,
}

impl NalUnit {
    fn from_byte_stream_unit(u: annexb::ByteStreamUnit, pos: u64) -> Result<Self, Error> {
        if u.data.len() < 2 {
            bail!(ErrorInt::CorruptStream {
                pos,
                description: "NAL unit shorter than its two-byte header".to_owned(),
            });
        }
        let rbsp = rbsp::strip_emulation_prevention(&u.data);
        Ok(Self {
            start_code_len: u.start_code_len,
            forbidden_bit: (u.data[0] >> 7) & 1 != 0,
            unit_type: UnitType::from_id(u.data[0] >> 1),
            data: u.data,
            rbsp,
            pos,
        })
    }

    pub fn is_vcl(&self) -> bool {
        self.unit_type.is_vcl()
    }

    /// RBSP bytes after the NAL header, ready for a `BitReader`.
    pub fn rbsp_payload(&self) -> &[u8] {
        &self.rbsp[2..]
    }
}

/// Reads H.265 NAL units from a byte stream.
pub struct Framer<R> {
    inner: ByteStreamReader<R>,
}

impl<R: BufRead + Seek> Framer<R> {
    pub fn new(inner: ByteStreamReader<R>) -> Self {
        Self { inner }
    }

    pub fn next_unit(&mut self) -> Result<Option<NalUnit>, Error> {
        let Some(u) = self.inner.next_unit()? else {
            return Ok(None);
        };
        let nal = NalUnit::from_byte_stream_unit(u, self.inner.pos())?;
        trace!(
            "framed {:?} ({} bytes, {} after unescaping)",
            nal.unit_type,
            nal.data.len(),
            nal.rbsp.len(),
        );
        Ok(Some(nal))
    }
}

/// Writes H.265 NAL units back to a byte stream.
///
/// The first header byte is rebuilt from the stored fields, which forces the
/// high bit of `nuh_layer_id` to zero exactly as the reference tool did; the
/// simulator only concerns itself with single-layer streams.
pub struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_unit(&mut self, nal: &mut NalUnit) -> Result<(), Error> {
        if nal.forbidden_bit {
            bail!(ErrorInt::MalformedUnit(
                "forbidden_zero_bit is set".to_owned()
            ));
        }
        nal.data[0] = nal.unit_type.id() << 1;
        annexb::write_unit(&mut self.inner, nal.start_code_len, &nal.data)
    }
}
