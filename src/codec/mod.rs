// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-codec NAL unit models and the minimal syntax decoding the loss
//! engine needs: unit-type classification for every unit, slice-type
//! recovery for coded slices, and (H.265 only) the parameter-set records the
//! slice-segment header references.

pub mod h264;
pub mod h265;
