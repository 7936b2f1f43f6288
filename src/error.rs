// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::sync::Arc;

use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// The focus is on detailed human-readable messages: framing errors carry the
/// byte position within the input stream, and RTP errors a bounded hex dump
/// of the offending packet, so the failure can be located in a hex editor.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

/// Which parameter set family a slice header referenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ParameterSetKind {
    Sequence,
    Picture,
}

impl Display for ParameterSetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ParameterSetKind::Sequence => "sequence",
            ParameterSetKind::Picture => "picture",
        })
    }
}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The supplied configuration (command line or config file) is unusable.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The byte stream does not carry a valid Annex B start-code prefix
    /// where one is required.
    #[error("Bad start code at input byte {pos}: {description}")]
    BadStartCode { pos: u64, description: String },

    /// The stream is structurally broken beyond the start-code layer:
    /// oversized or undersized packets, RTP header mismatches, malformed
    /// syntax element values.
    #[error("Corrupt stream at input byte {pos}: {description}")]
    CorruptStream { pos: u64, description: String },

    /// A NAL payload ended in the middle of a syntax element.
    #[error("Truncated NAL unit while reading {name}")]
    TruncatedNal { name: &'static str },

    /// A syntax element decoded to a value the simulator cannot accept.
    #[error("Invalid {name} in NAL unit: {description}")]
    InvalidSyntax {
        name: &'static str,
        description: String,
    },

    /// An exp-Golomb codeword whose decoded value cannot fit in 32 bits.
    #[error("Oversized exp-Golomb code while reading {name}")]
    OversizedExpGolomb { name: &'static str },

    /// A caller asked the bit reader for more than 32 bits in one go.
    /// This is a programming error, not a property of the stream.
    #[error("Invalid read of {requested} bits in one go (limit is 32)")]
    InvalidBitRead { requested: u32 },

    /// The write path was handed a unit that must not be emitted as-is
    /// (forbidden bit set, impossible start-code length).
    #[error("Refusing to write malformed NAL unit: {0}")]
    MalformedUnit(String),

    /// A slice header referenced a parameter set that has not appeared in
    /// the stream.
    #[error("Slice references unknown {kind} parameter set with id {id}")]
    UnknownParameterSet { kind: ParameterSetKind, id: u32 },

    #[error("Error reading input: {source}")]
    ReadError {
        #[source]
        source: std::io::Error,
    },

    #[error("Error writing output: {source}")]
    WriteError {
        #[source]
        source: std::io::Error,
    },
}
