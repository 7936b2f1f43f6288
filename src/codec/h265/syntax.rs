// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The subset of H.265 syntax the loss engine must understand: picture and
//! sequence parameter sets reduced to the fields a slice-segment header
//! depends on, and the header parse itself, which stops as soon as
//! `slice_type` is decoded.
//!
//! `profile_tier_level` carries no information the simulator uses, but it
//! sits between the fixed SPS prefix and `sps_seq_parameter_set_id`, so it
//! is walked field-by-field (T.REC H.265 section 7.3.3) purely to keep the
//! bit cursor honest.

use std::collections::BTreeMap;

use log::debug;

use super::{SliceType, UnitType};
use crate::error::{ErrorInt, ParameterSetKind};
use crate::rbsp::BitReader;
use crate::Error;

/// Picture parameter set, reduced to what slice-segment parsing needs
/// (T.REC H.265 section 7.3.2.3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducedPps {
    pub id: u32,
    pub sps_id: u32,
    pub dependent_slice_segments_enabled: bool,
    pub num_extra_slice_header_bits: u32,
}

/// Sequence parameter set, reduced to what slice-segment parsing needs
/// (T.REC H.265 section 7.3.2.2.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReducedSps {
    pub id: u32,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub log2_min_luma_coding_block_size_minus3: u32,
    pub log2_diff_max_min_luma_coding_block_size: u32,
}

impl ReducedSps {
    /// Derived size of the largest coding unit, in luma samples.
    pub fn max_cu_size(&self) -> u64 {
        1u64
            << (self.log2_min_luma_coding_block_size_minus3
                + 3
                + self.log2_diff_max_min_luma_coding_block_size)
    }

    /// Width of `slice_segment_address`: the picture's CTU count rounded up
    /// to a power of two, in bits.
    pub fn slice_segment_address_bits(&self) -> u32 {
        let cu = self.max_cu_size();
        let ctus_across = (u64::from(self.pic_width_in_luma_samples) + cu - 1) / cu;
        let ctus_down = (u64::from(self.pic_height_in_luma_samples) + cu - 1) / cu;
        let total_ctus = ctus_across * ctus_down;
        let mut bits = 0;
        while total_ctus > 1u64 << bits {
            bits += 1;
        }
        bits
    }
}

/// Latest definition of each parameter-set id seen in the stream.
///
/// Ids may be redefined at any time; the newest definition simply replaces
/// the prior one. No eviction is ever needed.
#[derive(Default)]
pub struct ParameterSetContext {
    sps: BTreeMap<u32, ReducedSps>,
    pps: BTreeMap<u32, ReducedPps>,
}

impl ParameterSetContext {
    pub fn store_sps(&mut self, sps: ReducedSps) {
        debug!("storing SPS id {}", sps.id);
        self.sps.insert(sps.id, sps);
    }

    pub fn store_pps(&mut self, pps: ReducedPps) {
        debug!("storing PPS id {}", pps.id);
        self.pps.insert(pps.id, pps);
    }

    fn sps(&self, id: u32) -> Result<&ReducedSps, Error> {
        match self.sps.get(&id) {
            Some(sps) => Ok(sps),
            None => bail!(ErrorInt::UnknownParameterSet {
                kind: ParameterSetKind::Sequence,
                id,
            }),
        }
    }

    fn pps(&self, id: u32) -> Result<&ReducedPps, Error> {
        match self.pps.get(&id) {
            Some(pps) => Ok(pps),
            None => bail!(ErrorInt::UnknownParameterSet {
                kind: ParameterSetKind::Picture,
                id,
            }),
        }
    }
}

/// Parses a picture parameter set far enough to populate a [`ReducedPps`].
pub fn parse_pps(r: &mut BitReader) -> Result<ReducedPps, Error> {
    let id = r.read_ue("pps_pic_parameter_set_id")?;
    let sps_id = r.read_ue("pps_seq_parameter_set_id")?;
    let dependent_slice_segments_enabled = r.read_bool("dependent_slice_segments_enabled_flag")?;
    let _output_flag_present_flag = r.read_bool("output_flag_present_flag")?;
    let num_extra_slice_header_bits = r.read(3, "num_extra_slice_header_bits")?;
    Ok(ReducedPps {
        id,
        sps_id,
        dependent_slice_segments_enabled,
        num_extra_slice_header_bits,
    })
}

/// Parses a sequence parameter set up to the coding-block-size fields.
pub fn parse_sps(r: &mut BitReader) -> Result<ReducedSps, Error> {
    r.skip(4, "sps_video_parameter_set_id")?;
    let max_sub_layers_minus1 = r.read(3, "sps_max_sub_layers_minus1")?;
    r.skip(1, "sps_temporal_id_nesting_flag")?;
    profile_tier_level(r, true, max_sub_layers_minus1)?;
    let id = r.read_ue("sps_seq_parameter_set_id")?;
    let chroma_format_idc = r.read_ue("chroma_format_idc")?;
    if chroma_format_idc == 3 {
        r.skip(1, "separate_colour_plane_flag")?;
    }
    let pic_width_in_luma_samples = r.read_ue("pic_width_in_luma_samples")?;
    let pic_height_in_luma_samples = r.read_ue("pic_height_in_luma_samples")?;
    if r.read_bool("conformance_window_flag")? {
        r.read_ue("conf_win_left_offset")?;
        r.read_ue("conf_win_right_offset")?;
        r.read_ue("conf_win_top_offset")?;
        r.read_ue("conf_win_bottom_offset")?;
    }
    r.read_ue("bit_depth_luma_minus8")?;
    r.read_ue("bit_depth_chroma_minus8")?;
    r.read_ue("log2_max_pic_order_cnt_lsb_minus4")?;
    let ordering_info_present = r.read_bool("sps_sub_layer_ordering_info_present_flag")?;
    let first_layer = if ordering_info_present {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in first_layer..=max_sub_layers_minus1 {
        r.read_ue("sps_max_dec_pic_buffering_minus1")?;
        r.read_ue("sps_max_num_reorder_pics")?;
        r.read_ue("sps_max_latency_increase_plus1")?;
    }
    let log2_min_luma_coding_block_size_minus3 =
        r.read_ue("log2_min_luma_coding_block_size_minus3")?;
    let log2_diff_max_min_luma_coding_block_size =
        r.read_ue("log2_diff_max_min_luma_coding_block_size")?;
    if u64::from(log2_min_luma_coding_block_size_minus3)
        + 3
        + u64::from(log2_diff_max_min_luma_coding_block_size)
        > 31
    {
        bail!(ErrorInt::InvalidSyntax {
            name: "log2_diff_max_min_luma_coding_block_size",
            description: "derived coding-unit size exceeds any level limit".to_owned(),
        });
    }
    Ok(ReducedSps {
        id,
        pic_width_in_luma_samples,
        pic_height_in_luma_samples,
        log2_min_luma_coding_block_size_minus3,
        log2_diff_max_min_luma_coding_block_size,
    })
}

/// Walks one `profile_tier` block: profile space/tier/idc, the 32
/// compatibility flags, the constraint-source flags and the profile-shaped
/// reserved tail, then `inbld_flag` or its reserved stand-in.
fn profile_tier(r: &mut BitReader) -> Result<(), Error> {
    const MAIN: u32 = 1;
    const MAIN_10: u32 = 2;
    const MAIN_STILL_PICTURE: u32 = 3;
    const MAIN_REXT: u32 = 4;
    const HIGH_THROUGHPUT_REXT: u32 = 5;

    r.skip(2, "profile_space")?;
    r.skip(1, "tier_flag")?;
    let profile_idc = r.read(5, "profile_idc")?;
    let compat = r.read(32, "profile_compatibility_flags")?;
    let flag = |j: u32| compat & (1 << (31 - j)) != 0;

    r.skip(1, "progressive_source_flag")?;
    r.skip(1, "interlaced_source_flag")?;
    r.skip(1, "non_packed_constraint_flag")?;
    r.skip(1, "frame_only_constraint_flag")?;

    if profile_idc == MAIN_REXT
        || flag(MAIN_REXT)
        || profile_idc == HIGH_THROUGHPUT_REXT
        || flag(HIGH_THROUGHPUT_REXT)
    {
        r.skip(1, "max_12bit_constraint_flag")?;
        r.skip(1, "max_10bit_constraint_flag")?;
        r.skip(1, "max_8bit_constraint_flag")?;
        r.skip(1, "max_422chroma_constraint_flag")?;
        r.skip(1, "max_420chroma_constraint_flag")?;
        r.skip(1, "max_monochrome_constraint_flag")?;
        r.skip(1, "intra_constraint_flag")?;
        r.skip(1, "one_picture_only_constraint_flag")?;
        r.skip(1, "lower_bit_rate_constraint_flag")?;
        r.skip(16, "reserved_zero_34bits")?;
        r.skip(16, "reserved_zero_34bits")?;
        r.skip(2, "reserved_zero_34bits")?;
    } else if profile_idc == MAIN_10 || flag(MAIN_10) {
        r.skip(7, "reserved_zero_7bits")?;
        r.skip(1, "one_picture_only_constraint_flag")?;
        r.skip(16, "reserved_zero_35bits")?;
        r.skip(16, "reserved_zero_35bits")?;
        r.skip(3, "reserved_zero_35bits")?;
    } else {
        r.skip(16, "reserved_zero_43bits")?;
        r.skip(16, "reserved_zero_43bits")?;
        r.skip(11, "reserved_zero_43bits")?;
    }

    if (MAIN..=HIGH_THROUGHPUT_REXT).contains(&profile_idc)
        || flag(MAIN)
        || flag(MAIN_10)
        || flag(MAIN_STILL_PICTURE)
        || flag(MAIN_REXT)
        || flag(HIGH_THROUGHPUT_REXT)
    {
        r.skip(1, "inbld_flag")?;
    } else {
        r.skip(1, "reserved_zero_bit")?;
    }
    Ok(())
}

/// Walks `profile_tier_level` (T.REC H.265 section 7.3.3): the general
/// block, per-sub-layer presence flags with their byte-alignment padding,
/// then each present sub-layer's profile/level.
pub fn profile_tier_level(
    r: &mut BitReader,
    profile_present: bool,
    max_sub_layers_minus1: u32,
) -> Result<(), Error> {
    if profile_present {
        profile_tier(r)?;
    }
    r.skip(8, "general_level_idc")?;

    let n = max_sub_layers_minus1.min(7) as usize;
    let mut sub_layer_profile_present = [false; 7];
    let mut sub_layer_level_present = [false; 7];
    for i in 0..n {
        sub_layer_profile_present[i] = r.read_bool("sub_layer_profile_present_flag")?;
        sub_layer_level_present[i] = r.read_bool("sub_layer_level_present_flag")?;
    }
    if n > 0 {
        for _ in n..8 {
            r.skip(2, "reserved_zero_2bits")?;
        }
    }
    for i in 0..n {
        if sub_layer_profile_present[i] {
            profile_tier(r)?;
        }
        if sub_layer_level_present[i] {
            r.skip(8, "sub_layer_level_idc")?;
        }
    }
    Ok(())
}

/// Parses a slice-segment header (T.REC H.265 section 7.3.6.1) up to and
/// including `slice_type`. `pos` is the unit's input byte position, used in
/// corruption reports.
///
/// Returns `None` for a dependent slice segment, whose header inherits the
/// independent segment's fields and carries no `slice_type` of its own.
pub fn parse_slice_header(
    r: &mut BitReader,
    unit_type: UnitType,
    ctx: &ParameterSetContext,
    pos: u64,
) -> Result<Option<SliceType>, Error> {
    let first_slice_segment_in_pic = r.read_bool("first_slice_segment_in_pic_flag")?;
    if unit_type.is_irap() {
        r.skip(1, "no_output_of_prior_pics_flag")?;
    }
    let pps_id = r.read_ue("slice_pic_parameter_set_id")?;
    let pps = ctx.pps(pps_id)?;

    let mut dependent_slice_segment = false;
    if !first_slice_segment_in_pic {
        if pps.dependent_slice_segments_enabled {
            dependent_slice_segment = r.read_bool("dependent_slice_segment_flag")?;
        }
        let sps = ctx.sps(pps.sps_id)?;
        r.skip(sps.slice_segment_address_bits(), "slice_segment_address")?;
    }
    if dependent_slice_segment {
        return Ok(None);
    }
    for _ in 0..pps.num_extra_slice_header_bits {
        r.skip(1, "slice_reserved_flag")?;
    }
    SliceType::from_codeword(r.read_ue("slice_type")?, pos).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{h265_pps_payload as pps_payload, h265_sps_payload as sps_payload, BitString};

    fn context() -> ParameterSetContext {
        let mut ctx = ParameterSetContext::default();
        ctx.store_sps(parse_sps(&mut BitReader::new(&sps_payload(0, 1920, 1080))).unwrap());
        ctx.store_pps(parse_pps(&mut BitReader::new(&pps_payload(0, 0, true, 2))).unwrap());
        ctx
    }

    #[test]
    fn parses_reduced_pps() {
        let payload = pps_payload(3, 2, true, 5);
        let pps = parse_pps(&mut BitReader::new(&payload)).unwrap();
        assert_eq!(
            pps,
            ReducedPps {
                id: 3,
                sps_id: 2,
                dependent_slice_segments_enabled: true,
                num_extra_slice_header_bits: 5,
            }
        );
    }

    #[test]
    fn parses_reduced_sps() {
        let payload = sps_payload(1, 1920, 1080);
        let sps = parse_sps(&mut BitReader::new(&payload)).unwrap();
        assert_eq!(sps.id, 1);
        assert_eq!(sps.pic_width_in_luma_samples, 1920);
        assert_eq!(sps.pic_height_in_luma_samples, 1080);
        assert_eq!(sps.max_cu_size(), 64);
        // 30 * 17 = 510 CTUs → 9 address bits.
        assert_eq!(sps.slice_segment_address_bits(), 9);
    }

    #[test]
    fn redefining_an_id_replaces_the_record() {
        let mut ctx = ParameterSetContext::default();
        ctx.store_sps(parse_sps(&mut BitReader::new(&sps_payload(0, 1920, 1080))).unwrap());
        ctx.store_sps(parse_sps(&mut BitReader::new(&sps_payload(0, 1280, 720))).unwrap());
        assert_eq!(ctx.sps(0).unwrap().pic_width_in_luma_samples, 1280);
    }

    #[test]
    fn first_segment_slice_header() {
        let ctx = context();
        let payload = BitString::new()
            .u(1, 1) // first_slice_segment_in_pic_flag
            .u(0, 1) // no_output_of_prior_pics_flag (IRAP)
            .ue(0) // slice_pic_parameter_set_id
            .u(0, 2) // slice_reserved_flags (num_extra_slice_header_bits = 2)
            .ue(2) // slice_type: I
            .u(1, 1)
            .to_bytes();
        let mut r = BitReader::new(&payload);
        let t = parse_slice_header(&mut r, UnitType::IdrWRadl, &ctx, 0).unwrap();
        assert_eq!(t, Some(SliceType::I));
    }

    #[test]
    fn non_irap_has_no_output_flag() {
        let ctx = context();
        let payload = BitString::new()
            .u(1, 1) // first_slice_segment_in_pic_flag
            .ue(0) // slice_pic_parameter_set_id
            .u(0, 2)
            .ue(1) // slice_type: P
            .u(1, 1)
            .to_bytes();
        let mut r = BitReader::new(&payload);
        let t = parse_slice_header(&mut r, UnitType::TrailR, &ctx, 0).unwrap();
        assert_eq!(t, Some(SliceType::P));
    }

    #[test]
    fn non_first_segment_consumes_address_bits() {
        let ctx = context();
        let payload = BitString::new()
            .u(0, 1) // first_slice_segment_in_pic_flag
            .ue(0) // slice_pic_parameter_set_id
            .u(0, 1) // dependent_slice_segment_flag
            .u(509, 9) // slice_segment_address
            .u(0, 2)
            .ue(0) // slice_type: B
            .u(1, 1)
            .to_bytes();
        let mut r = BitReader::new(&payload);
        let t = parse_slice_header(&mut r, UnitType::TrailN, &ctx, 0).unwrap();
        assert_eq!(t, Some(SliceType::B));
    }

    #[test]
    fn dependent_segment_has_no_slice_type() {
        let ctx = context();
        let payload = BitString::new()
            .u(0, 1)
            .ue(0)
            .u(1, 1) // dependent_slice_segment_flag
            .u(12, 9) // slice_segment_address
            .u(1, 1)
            .to_bytes();
        let mut r = BitReader::new(&payload);
        let t = parse_slice_header(&mut r, UnitType::TrailN, &ctx, 0).unwrap();
        assert_eq!(t, None);
    }

    #[test]
    fn unknown_pps_is_fatal() {
        let ctx = ParameterSetContext::default();
        let payload = BitString::new().u(1, 1).ue(7).u(1, 1).to_bytes();
        let mut r = BitReader::new(&payload);
        let e = parse_slice_header(&mut r, UnitType::TrailR, &ctx, 0).unwrap_err();
        assert!(e.to_string().contains("picture parameter set"), "{e}");
        assert!(e.to_string().contains('7'), "{e}");
    }

    #[test]
    fn unknown_sps_is_fatal() {
        let mut ctx = ParameterSetContext::default();
        ctx.store_pps(parse_pps(&mut BitReader::new(&pps_payload(0, 4, false, 0))).unwrap());
        let payload = BitString::new()
            .u(0, 1) // non-first segment forces the SPS lookup
            .ue(0)
            .u(1, 1)
            .to_bytes();
        let mut r = BitReader::new(&payload);
        let e = parse_slice_header(&mut r, UnitType::TrailR, &ctx, 0).unwrap_err();
        assert!(e.to_string().contains("sequence parameter set"), "{e}");
    }

    #[test]
    fn sub_layer_ptl_consumes_padding() {
        // One sub-layer with neither profile nor level present: two presence
        // flags then 14 bits of reserved padding.
        let mut bits = BitString::new();
        bits.u(0, 2).u(0, 1).u(1, 5).u(1 << 30, 32).u(0, 4);
        bits.u(0, 16).u(0, 16).u(0, 11).u(0, 1); // reserved + inbld
        bits.u(120, 8); // general_level_idc
        bits.u(0, 2); // sub_layer presence flags
        bits.u(0, 14); // reserved_zero_2bits padding to 8 layers
        bits.u(0b1010, 4); // sentinel
        let bytes = bits.to_bytes();
        let mut r = BitReader::new(&bytes);
        profile_tier_level(&mut r, true, 1).unwrap();
        assert_eq!(r.read(4, "sentinel").unwrap(), 0b1010);
    }
}
