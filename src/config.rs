// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validated run configuration for the simulators.
//!
//! Two sources: a positional argument vector, or a plain-text configuration
//! file. Config files list one value per line — input path, output path,
//! loss-pattern path, packet type (H.264 only), offset, modality — skipping
//! blank lines and lines starting with `#`, space or carriage return:
//!
//! ```text
//! # transmission settings
//! str.264        input bitstream
//! str_err.264    transmitted bitstream
//! error_plr_3    loss pattern
//! 1              packet type (0 = RTP, 1 = Annex B)
//! 0              offset
//! 0              modality
//! ```
//!
//! Trailing words on a line are ignored, so inline comments need no marker.
//! Validation is fault-tolerant where the reference tool was: a negative
//! offset or an unknown modality logs a warning and clamps to 0.

use std::path::{Path, PathBuf};

use log::warn;

use crate::error::ErrorInt;
use crate::Error;

/// How the H.264 bitstream is packetized. H.265 input is always Annex B.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketFormat {
    Rtp,
    AnnexB,
}

impl PacketFormat {
    fn from_raw(raw: i64) -> Result<Self, Error> {
        match raw {
            0 => Ok(PacketFormat::Rtp),
            1 => Ok(PacketFormat::AnnexB),
            other => bail!(ErrorInt::ConfigError(format!(
                "packet type {other} is not 0 (RTP) or 1 (Annex B)"
            ))),
        }
    }
}

/// Which slice types the loss pattern is allowed to affect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Modality {
    /// Modality 0: every VCL unit flagged by the pattern is dropped.
    AllSlices,

    /// Modality 1: intra slices are emitted even when flagged.
    ProtectIntra,

    /// Modality 2: only intra slices can be dropped.
    IntraOnly,
}

impl Modality {
    fn from_raw(raw: i64) -> Self {
        match raw {
            0 => Modality::AllSlices,
            1 => Modality::ProtectIntra,
            2 => Modality::IntraOnly,
            other => {
                warn!("modality {other} is not allowed, setting it to zero");
                Modality::AllSlices
            }
        }
    }

    /// Human description for the run banner.
    pub fn describe(self) -> &'static str {
        match self {
            Modality::AllSlices => "all",
            Modality::ProtectIntra => "all but intra",
            Modality::IntraOnly => "intra only",
        }
    }
}

/// Everything a simulator run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input: PathBuf,
    pub output: PathBuf,
    pub loss_pattern: PathBuf,
    pub packet_format: PacketFormat,
    pub offset: usize,
    pub modality: Modality,
}

impl Config {
    /// Builds an H.264 configuration from the six positional arguments
    /// `<in> <out> <loss> <packet_type> <offset> <modality>`.
    pub fn from_avc_args(args: &[String]) -> Result<Self, Error> {
        expect_args(args, 6)?;
        Ok(Config {
            input: PathBuf::from(&args[0]),
            output: PathBuf::from(&args[1]),
            loss_pattern: PathBuf::from(&args[2]),
            packet_format: PacketFormat::from_raw(parse_integer_arg(&args[3], "packet type")?)?,
            offset: clamp_offset(parse_integer_arg(&args[4], "offset")?),
            modality: Modality::from_raw(parse_integer_arg(&args[5], "modality")?),
        })
    }

    /// Builds an H.265 configuration from the five positional arguments
    /// `<in> <out> <loss> <offset> <modality>`. Packetization is Annex B.
    pub fn from_hevc_args(args: &[String]) -> Result<Self, Error> {
        expect_args(args, 5)?;
        Ok(Config {
            input: PathBuf::from(&args[0]),
            output: PathBuf::from(&args[1]),
            loss_pattern: PathBuf::from(&args[2]),
            packet_format: PacketFormat::AnnexB,
            offset: clamp_offset(parse_integer_arg(&args[3], "offset")?),
            modality: Modality::from_raw(parse_integer_arg(&args[4], "modality")?),
        })
    }

    /// Reads the six-line H.264 configuration file.
    pub fn from_avc_config_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let lines = parameter_lines(path.as_ref(), 6)?;
        Ok(Config {
            input: PathBuf::from(first_token(&lines[0])),
            output: PathBuf::from(first_token(&lines[1])),
            loss_pattern: PathBuf::from(first_token(&lines[2])),
            packet_format: PacketFormat::from_raw(first_integer(&lines[3], "packet type")?)?,
            offset: clamp_offset(first_integer(&lines[4], "offset")?),
            modality: Modality::from_raw(first_integer(&lines[5], "modality")?),
        })
    }

    /// Reads the five-line H.265 configuration file.
    pub fn from_hevc_config_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let lines = parameter_lines(path.as_ref(), 5)?;
        Ok(Config {
            input: PathBuf::from(first_token(&lines[0])),
            output: PathBuf::from(first_token(&lines[1])),
            loss_pattern: PathBuf::from(first_token(&lines[2])),
            packet_format: PacketFormat::AnnexB,
            offset: clamp_offset(first_integer(&lines[3], "offset")?),
            modality: Modality::from_raw(first_integer(&lines[4], "modality")?),
        })
    }
}

fn expect_args(args: &[String], n: usize) -> Result<(), Error> {
    if args.len() != n {
        bail!(ErrorInt::ConfigError(format!(
            "expected {n} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn clamp_offset(raw: i64) -> usize {
    if raw < 0 {
        warn!("offset {raw} is not allowed, setting it to zero");
        0
    } else {
        raw as usize
    }
}

fn parse_integer_arg(arg: &str, what: &str) -> Result<i64, Error> {
    arg.parse().map_err(|_| {
        wrap!(ErrorInt::ConfigError(format!(
            "{what} argument {arg:?} is not an integer"
        )))
    })
}

/// A line carries a parameter unless it is empty or starts with `#`,
/// carriage return, space or newline.
fn is_parameter_line(line: &str) -> bool {
    !matches!(
        line.as_bytes().first().copied(),
        None | Some(b'#' | b'\r' | b' ' | b'\n')
    )
}

/// Collects exactly `expected` parameter lines from the config file,
/// warning about extras.
fn parameter_lines(path: &Path, expected: usize) -> Result<Vec<String>, Error> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        wrap!(ErrorInt::ConfigError(format!(
            "cannot open config file {}: {e}",
            path.display()
        )))
    })?;
    let mut lines = Vec::with_capacity(expected);
    for line in contents.lines().filter(|l| is_parameter_line(l)) {
        if lines.len() == expected {
            warn!("ignoring extra config line {line:?}");
            continue;
        }
        lines.push(line.to_owned());
    }
    if lines.len() < expected {
        bail!(ErrorInt::ConfigError(format!(
            "config file {} has {} parameter lines, expected {expected}",
            path.display(),
            lines.len()
        )));
    }
    Ok(lines)
}

/// First whitespace-delimited run on the line.
fn first_token(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

/// First signed-integer literal appearing anywhere on the line.
fn first_integer(line: &str, what: &str) -> Result<i64, Error> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let signed = (bytes[i] == b'+' || bytes[i] == b'-')
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if signed || bytes[i].is_ascii_digit() {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            return line[start..i].parse().map_err(|_| {
                wrap!(ErrorInt::ConfigError(format!(
                    "{what} value {} is out of range",
                    &line[start..i]
                )))
            });
        }
        i += 1;
    }
    bail!(ErrorInt::ConfigError(format!(
        "no integer {what} found in config line {line:?}"
    )))
}
