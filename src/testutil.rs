// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for building bit-exact test fixtures.

/// MSB-first bit string builder, the write-side mirror of
/// [`crate::rbsp::BitReader`].
#[derive(Default)]
pub(crate) struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends the low `n` bits of `value`, most significant first.
    pub(crate) fn u(&mut self, value: u32, n: u32) -> &mut Self {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 != 0);
        }
        self
    }

    /// Appends `value` as an unsigned exp-Golomb codeword.
    pub(crate) fn ue(&mut self, value: u32) -> &mut Self {
        let w = value + 1;
        let width = 32 - w.leading_zeros(); // bits in w
        self.u(0, width - 1);
        self.u(w, width)
    }

    /// Packs the bits into bytes, zero-padded to a byte boundary.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (7 - i % 8);
            }
        }
        out
    }
}

/// A Main-profile `profile_tier` block followed by `general_level_idc`,
/// with no sub-layers.
fn h265_main_profile_ptl(bits: &mut BitString) {
    bits.u(0, 2) // profile_space
        .u(0, 1) // tier_flag
        .u(1, 5) // profile_idc: Main
        .u(1 << 30, 32) // compatibility: Main only
        .u(0, 4) // source/constraint flags
        .u(0, 16)
        .u(0, 16)
        .u(0, 11) // reserved_zero_43bits
        .u(0, 1) // inbld_flag
        .u(120, 8); // general_level_idc
}

/// RBSP of a minimal H.265 sequence parameter set with a 64-sample CTU.
pub(crate) fn h265_sps_payload(id: u32, width: u32, height: u32) -> Vec<u8> {
    let mut bits = BitString::new();
    bits.u(0, 4) // sps_video_parameter_set_id
        .u(0, 3) // sps_max_sub_layers_minus1
        .u(1, 1); // sps_temporal_id_nesting_flag
    h265_main_profile_ptl(&mut bits);
    bits.ue(id)
        .ue(1) // chroma_format_idc: 4:2:0
        .ue(width)
        .ue(height)
        .u(0, 1) // conformance_window_flag
        .ue(0) // bit_depth_luma_minus8
        .ue(0) // bit_depth_chroma_minus8
        .ue(4) // log2_max_pic_order_cnt_lsb_minus4
        .u(1, 1) // sps_sub_layer_ordering_info_present_flag
        .ue(4) // sps_max_dec_pic_buffering_minus1
        .ue(0) // sps_max_num_reorder_pics
        .ue(0) // sps_max_latency_increase_plus1
        .ue(0) // log2_min_luma_coding_block_size_minus3
        .ue(3) // log2_diff_max_min_luma_coding_block_size
        .u(1, 1); // rbsp_stop_one_bit
    bits.to_bytes()
}

/// RBSP of a minimal H.265 picture parameter set.
pub(crate) fn h265_pps_payload(id: u32, sps_id: u32, dependent: bool, extra_bits: u32) -> Vec<u8> {
    BitString::new()
        .ue(id)
        .ue(sps_id)
        .u(u32::from(dependent), 1)
        .u(0, 1) // output_flag_present_flag
        .u(extra_bits, 3)
        .u(1, 1) // rbsp_stop_one_bit
        .to_bytes()
}

/// Joins NAL payloads into an Annex B byte stream, each unit prefixed with a
/// 4-byte start code.
pub(crate) fn annexb_stream(units: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for payload in units {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(payload);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbsp::BitReader;

    #[test]
    fn round_trips_through_bit_reader() {
        let bytes = BitString::new()
            .u(0b101, 3)
            .ue(0)
            .ue(7)
            .u(0x5A, 8)
            .to_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3, "a").unwrap(), 0b101);
        assert_eq!(r.read_ue("b").unwrap(), 0);
        assert_eq!(r.read_ue("c").unwrap(), 7);
        assert_eq!(r.read(8, "d").unwrap(), 0x5A);
    }
}
