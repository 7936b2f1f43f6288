// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loss patterns: fixed `'0'`/`'1'` traces consulted circularly while the
//! simulator walks a stream.
//!
//! A pattern is loaded once, rotated left by the configured offset (so one
//! trace file yields many channel realizations), and then walked strictly
//! linearly. The wrap point is `len - 1`, not `len`: the cursor resets as
//! soon as it reaches the final symbol, which therefore gets consulted at
//! most once, at the start of a lap. The off-by-one is deliberate, inherited
//! from the reference tool so that its published traces reproduce bit-exact
//! outputs.

use std::path::Path;

use crate::error::ErrorInt;
use crate::Error;

/// A rotated loss trace plus the consultation cursor.
#[derive(Debug, Clone)]
pub struct LossPattern {
    symbols: Vec<u8>,
    cursor: usize,
}

impl LossPattern {
    /// Builds a pattern from raw trace bytes, rotating left by
    /// `offset % len`.
    ///
    /// Symbols other than `'0'`/`'1'` are kept: the engine warns and ignores
    /// them at consultation time rather than rejecting the file.
    pub fn new(mut symbols: Vec<u8>, offset: usize) -> Result<Self, Error> {
        if symbols.is_empty() {
            bail!(ErrorInt::ConfigError(
                "loss pattern is empty; it must contain at least one '0' or '1'".to_owned()
            ));
        }
        let offset = offset % symbols.len();
        symbols.rotate_left(offset);
        Ok(Self { symbols, cursor: 0 })
    }

    /// Reads a trace file and builds the rotated pattern.
    pub fn from_file<P: AsRef<Path>>(path: P, offset: usize) -> Result<Self, Error> {
        let path = path.as_ref();
        let symbols = std::fs::read(path).map_err(|e| {
            wrap!(ErrorInt::ConfigError(format!(
                "cannot read loss pattern file {}: {e}",
                path.display()
            )))
        })?;
        Self::new(symbols, offset)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The symbol under the cursor.
    pub fn current(&self) -> u8 {
        self.symbols[self.cursor]
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    /// Applies the circular-buffer wrap; call once per engine iteration.
    /// Resets on reaching `len - 1` (see the module docs).
    pub fn rewind_if_exhausted(&mut self) {
        if self.cursor >= self.symbols.len() - 1 {
            self.cursor = 0;
        }
    }
}

/// Burst census over a loss trace. A burst is a contiguous run of two or
/// more `'1'` symbols.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstStats {
    pub burst_count: usize,
    pub mean_burst_length: f64,
    /// Fraction of symbols that are `'1'`, in `[0, 1]`.
    pub realized_loss_rate: f64,
}

impl BurstStats {
    pub fn analyze(symbols: &[u8]) -> Self {
        let mut burst_count = 0usize;
        let mut burst_symbols = 0usize;
        let mut ones = 0usize;
        let mut run = 0usize;
        for &s in symbols.iter().chain(std::iter::once(&b'0')) {
            if s == b'1' {
                ones += 1;
                run += 1;
            } else {
                if run >= 2 {
                    burst_count += 1;
                    burst_symbols += run;
                }
                run = 0;
            }
        }
        BurstStats {
            burst_count,
            mean_burst_length: if burst_count > 0 {
                burst_symbols as f64 / burst_count as f64
            } else {
                0.0
            },
            realized_loss_rate: if symbols.is_empty() {
                0.0
            } else {
                ones as f64 / symbols.len() as f64
            },
        }
    }
}
