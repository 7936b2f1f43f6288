// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transmitter simulator for H.264/AVC and H.265/HEVC coded bitstreams.
//!
//! Given an elementary stream and a binary loss pattern, the simulator
//! emulates transmission over a lossy channel by selectively dropping Video
//! Coding Layer (VCL) NAL units, producing a corrupted stream a downstream
//! decoder can attempt to conceal. The loss pattern is a fixed `'0'`/`'1'`
//! trace consulted circularly, so channel behavior is exactly reproducible
//! across runs.
//!
//! The building blocks are usable on their own:
//!
//! *   [`annexb`]: byte-stream NAL unit framing (start-code scanning).
//! *   [`rtp`]: the packet-file format wrapping RTP packets, as produced by
//!     the JM reference encoder.
//! *   [`rbsp`]: bit-accurate reading of NAL payloads, including exp-Golomb
//!     codes and emulation-prevention-byte removal.
//! *   [`codec`]: just enough H.264/H.265 syntax decoding to recover the
//!     slice type of each coded slice.
//! *   [`loss`] and [`gilbert`]: loss-pattern handling and generation.
//! *   [`sim`]: the loss-decision engines tying the above together.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

mod error;

pub use error::Error;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

pub mod annexb;
pub mod codec;
pub mod config;
pub mod gilbert;
pub mod loss;
pub mod rbsp;
pub mod rtp;
pub mod sim;

#[cfg(test)]
pub(crate) mod testutil;
