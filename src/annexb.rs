// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NAL unit framing for the byte-stream format of _ITU-T H.264 Annex B_ /
//! _H.265 Annex B_.
//!
//! Units are delimited by `00 00 01` or `00 00 00 01` start-code prefixes at
//! byte-aligned positions. Zero bytes before the first start code are
//! `leading_zero_8bits` (legal on the first unit only); zero bytes between a
//! unit's last payload byte and the next start code (or EOF) are
//! `trailing_zero_8bits` and belong to neither unit.
//!
//! The scanner here is codec-agnostic: it yields raw payload bytes between
//! start codes, and the codec layers interpret the one-byte (H.264) or
//! two-byte (H.265) NAL header.

use std::io::{BufRead, Seek, Write};

use crate::error::ErrorInt;
use crate::Error;

/// Ceiling on the size of a single NAL unit, matching the scratch buffer the
/// reference decoders allocate.
pub const NALU_MAX_SIZE: usize = 8_000_000;

/// One framed byte-stream NAL unit.
#[derive(Debug, PartialEq, Eq)]
pub struct ByteStreamUnit {
    /// 3 or 4.
    pub start_code_len: u8,

    /// Payload bytes, starting with the NAL header. Emulation prevention
    /// bytes are still present.
    pub data: Vec<u8>,

    /// Input bytes consumed by this unit, including its start-code prefix
    /// and any leading/trailing zero bytes attributed to it.
    pub consumed: u64,
}

/// Pulls NAL units out of a byte stream, one per call.
///
/// The source must be seekable: on finding the next unit's start code the
/// scanner has read 3 or 4 bytes too many and rewinds so the following call
/// re-reads them.
pub struct ByteStreamReader<R> {
    inner: R,
    pos: u64,
    max_unit_size: usize,
    first_unit: bool,
    scratch: Vec<u8>,
}

impl<R: BufRead + Seek> ByteStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_unit_size(inner, NALU_MAX_SIZE)
    }

    pub fn with_max_unit_size(inner: R, max_unit_size: usize) -> Self {
        Self {
            inner,
            pos: 0,
            max_unit_size,
            first_unit: true,
            scratch: Vec::new(),
        }
    }

    /// Current position within the input stream, in bytes.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Reads the next NAL unit, or `None` on a clean end of stream.
    pub fn next_unit(&mut self) -> Result<Option<ByteStreamUnit>, Error> {
        let unit_start = self.pos;
        self.scratch.clear();

        // leading_zero_8bits and the start-code prefix.
        loop {
            match self.read_byte()? {
                None if self.scratch.is_empty() => return Ok(None),
                None => bail!(ErrorInt::BadStartCode {
                    pos: self.pos,
                    description: "stream ended inside a zero run with no start code".to_owned(),
                }),
                Some(0x00) => {
                    self.scratch.push(0x00);
                    if self.scratch.len() > self.max_unit_size {
                        bail!(ErrorInt::CorruptStream {
                            pos: self.pos,
                            description: "zero run exceeds the maximum NAL unit size".to_owned(),
                        });
                    }
                }
                Some(b) => {
                    self.scratch.push(b);
                    break;
                }
            }
        }

        let prefix_end = self.scratch.len();
        if self.scratch[prefix_end - 1] != 0x01 || prefix_end < 3 {
            bail!(ErrorInt::BadStartCode {
                pos: self.pos,
                description: format!(
                    "expected a 00 00 01 or 00 00 00 01 prefix, got {:02x?}",
                    &self.scratch[prefix_end.saturating_sub(4)..]
                ),
            });
        }
        let (start_code_len, leading_zeros) = if prefix_end == 3 {
            (3u8, 0usize)
        } else {
            (4u8, prefix_end - 4)
        };
        if !self.first_unit && leading_zeros > 0 {
            bail!(ErrorInt::BadStartCode {
                pos: self.pos,
                description: "leading_zero_8bits are only permitted before the first NAL unit"
                    .to_owned(),
            });
        }
        self.first_unit = false;
        let payload_start = leading_zeros + usize::from(start_code_len);

        // Payload bytes, up to the next start code or EOF.
        loop {
            let Some(b) = self.read_byte()? else {
                let trailing = count_trailing_zeros(&self.scratch, self.scratch.len());
                return Ok(Some(self.take_unit(
                    start_code_len,
                    payload_start,
                    self.scratch.len() - trailing,
                    0,
                    unit_start,
                )?));
            };
            self.scratch.push(b);
            let n = self.scratch.len();
            if n > self.max_unit_size {
                bail!(ErrorInt::CorruptStream {
                    pos: self.pos,
                    description: "NAL unit exceeds the maximum size".to_owned(),
                });
            }
            if n >= 4 && self.scratch[n - 4..] == [0x00, 0x00, 0x00, 0x01] {
                // A zero immediately before a three-byte code promotes it to
                // this four-byte form, so only here can trailing zeros occur.
                let trailing = count_trailing_zeros(&self.scratch, n - 4);
                return Ok(Some(self.take_unit(
                    start_code_len,
                    payload_start,
                    n - 4 - trailing,
                    4,
                    unit_start,
                )?));
            }
            if n >= 3 && self.scratch[n - 3..] == [0x00, 0x00, 0x01] {
                return Ok(Some(self.take_unit(
                    start_code_len,
                    payload_start,
                    n - 3,
                    3,
                    unit_start,
                )?));
            }
        }
    }

    /// Extracts `scratch[payload_start..payload_end]`, rewinding the input by
    /// `rewind` bytes so the just-seen start code is read again.
    fn take_unit(
        &mut self,
        start_code_len: u8,
        payload_start: usize,
        payload_end: usize,
        rewind: u8,
        unit_start: u64,
    ) -> Result<ByteStreamUnit, Error> {
        if rewind > 0 {
            self.inner
                .seek_relative(-i64::from(rewind))
                .map_err(|source| wrap!(ErrorInt::ReadError { source }))?;
            self.pos -= u64::from(rewind);
        }
        if payload_end <= payload_start {
            bail!(ErrorInt::CorruptStream {
                pos: self.pos,
                description: "NAL unit with empty payload".to_owned(),
            });
        }
        Ok(ByteStreamUnit {
            start_code_len,
            data: self.scratch[payload_start..payload_end].to_vec(),
            consumed: self.pos - unit_start,
        })
    }

    fn read_byte(&mut self) -> Result<Option<u8>, Error> {
        let b = {
            let buf = self
                .inner
                .fill_buf()
                .map_err(|source| wrap!(ErrorInt::ReadError { source }))?;
            match buf.first() {
                None => return Ok(None),
                Some(&b) => b,
            }
        };
        self.inner.consume(1);
        self.pos += 1;
        Ok(Some(b))
    }
}

/// Zero bytes at the tail of `buf[..end]`. The `0x01` terminating the unit's
/// own start code bounds the scan, so an all-zero payload cannot underflow.
fn count_trailing_zeros(buf: &[u8], end: usize) -> usize {
    let mut trailing = 0;
    while trailing < end && buf[end - 1 - trailing] == 0x00 {
        trailing += 1;
    }
    trailing
}

/// Writes one unit back out: the start-code prefix followed by the payload,
/// flushed so partial output survives an abort.
pub fn write_unit<W: Write>(w: &mut W, start_code_len: u8, payload: &[u8]) -> Result<(), Error> {
    let prefix: &[u8] = match start_code_len {
        3 => &[0x00, 0x00, 0x01],
        4 => &[0x00, 0x00, 0x00, 0x01],
        other => bail!(ErrorInt::MalformedUnit(format!(
            "start-code prefix length {other} is not 3 or 4"
        ))),
    };
    w.write_all(prefix)
        .and_then(|()| w.write_all(payload))
        .and_then(|()| w.flush())
        .map_err(|source| wrap!(ErrorInt::WriteError { source }))
}
