// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The loss-decision engines: one NAL unit per iteration, classify, consult
//! the loss pattern for VCL units, emit or drop.
//!
//! Both engines share the decision core:
//!
//! *   non-VCL units (parameter sets, SEI, delimiters) pass through without
//!     touching the loss pattern;
//! *   a `'0'` symbol emits the unit and advances the cursor;
//! *   a `'1'` symbol drops the unit and advances — unless the modality
//!     protects the current slice type, in which case the unit is emitted
//!     and the cursor does **not** advance. A run of protected slices thus
//!     consumes no pattern symbols, shifting the alignment for everything
//!     after it; deliberate, as the reference tool behaves this way;
//! *   any other symbol logs a warning and the unit is neither emitted nor
//!     is the cursor advanced.
//!
//! The H.264 engine additionally emits every unit whose RTP timestamp is 0
//! (the first access unit, which concealment needs intact); Annex B units
//! carry no timestamp and never trigger this.

use std::io::{BufRead, Seek, Write};

use log::{info, warn};

use crate::codec::{h264, h265};
use crate::config::Modality;
use crate::loss::LossPattern;
use crate::rbsp::BitReader;
use crate::Error;

/// Totals reported after a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub units_read: u64,
    pub units_written: u64,
    pub units_dropped: u64,
}

/// Whether the modality overrides a loss indication for a slice of the
/// given intra-ness.
fn writeable(modality: Modality, is_intra: bool) -> bool {
    match modality {
        Modality::AllSlices => false,
        Modality::ProtectIntra => is_intra,
        Modality::IntraOnly => !is_intra,
    }
}

/// H.264/AVC transmitter simulator.
pub struct AvcSimulator<R, W> {
    framer: h264::Framer<R>,
    writer: h264::Writer<W>,
    pattern: LossPattern,
    modality: Modality,

    /// Most recently decoded slice type; retained across units.
    slice_type: Option<h264::SliceType>,
}

impl<R: BufRead + Seek, W: Write> AvcSimulator<R, W> {
    pub fn new(
        framer: h264::Framer<R>,
        writer: h264::Writer<W>,
        pattern: LossPattern,
        modality: Modality,
    ) -> Self {
        Self {
            framer,
            writer,
            pattern,
            modality,
            slice_type: None,
        }
    }

    pub fn run(mut self) -> Result<RunStats, Error> {
        let mut stats = RunStats::default();
        while let Some(mut nal) = self.framer.next_unit()? {
            stats.units_read += 1;
            if nal.is_vcl() {
                self.slice_type = Some(nal.decode_slice_type()?);
            }
            let writeable = writeable(
                self.modality,
                self.slice_type == Some(h264::SliceType::I),
            );

            if !nal.is_vcl() {
                self.writer.write_unit(&mut nal)?;
                stats.units_written += 1;
            } else if nal.timestamp == Some(0) {
                // The first access unit is never corrupted.
                self.writer.write_unit(&mut nal)?;
                stats.units_written += 1;
                self.pattern.advance();
            } else {
                match self.pattern.current() {
                    b'0' => {
                        self.writer.write_unit(&mut nal)?;
                        stats.units_written += 1;
                        self.pattern.advance();
                    }
                    b'1' if writeable => {
                        self.writer.write_unit(&mut nal)?;
                        stats.units_written += 1;
                    }
                    b'1' => {
                        stats.units_dropped += 1;
                        self.pattern.advance();
                    }
                    other => {
                        warn!(
                            "wrong character {:?} in the loss pattern; unit neither \
                             written nor charged",
                            other as char
                        );
                        stats.units_dropped += 1;
                    }
                }
            }
            self.pattern.rewind_if_exhausted();
        }
        info!(
            "transmission finished: {} units read, {} written, {} dropped",
            stats.units_read, stats.units_written, stats.units_dropped
        );
        Ok(stats)
    }
}

/// H.265/HEVC transmitter simulator.
pub struct HevcSimulator<R, W> {
    framer: h265::Framer<R>,
    writer: h265::Writer<W>,
    pattern: LossPattern,
    modality: Modality,
    parameter_sets: h265::syntax::ParameterSetContext,

    /// Most recently decoded slice type. `None` both before the first slice
    /// and after a dependent slice segment, whose header carries no type.
    slice_type: Option<h265::SliceType>,
}

impl<R: BufRead + Seek, W: Write> HevcSimulator<R, W> {
    pub fn new(
        framer: h265::Framer<R>,
        writer: h265::Writer<W>,
        pattern: LossPattern,
        modality: Modality,
    ) -> Self {
        Self {
            framer,
            writer,
            pattern,
            modality,
            parameter_sets: h265::syntax::ParameterSetContext::default(),
            slice_type: None,
        }
    }

    pub fn run(mut self) -> Result<RunStats, Error> {
        let mut stats = RunStats::default();
        while let Some(mut nal) = self.framer.next_unit()? {
            stats.units_read += 1;
            match nal.unit_type {
                h265::UnitType::SpsNut => {
                    let mut r = BitReader::new(nal.rbsp_payload());
                    self.parameter_sets
                        .store_sps(h265::syntax::parse_sps(&mut r)?);
                }
                h265::UnitType::PpsNut => {
                    let mut r = BitReader::new(nal.rbsp_payload());
                    self.parameter_sets
                        .store_pps(h265::syntax::parse_pps(&mut r)?);
                }
                t if t.is_slice() => {
                    let mut r = BitReader::new(nal.rbsp_payload());
                    self.slice_type =
                        h265::syntax::parse_slice_header(&mut r, t, &self.parameter_sets, nal.pos)?;
                }
                _ => {}
            }
            let writeable = writeable(
                self.modality,
                self.slice_type == Some(h265::SliceType::I),
            );

            if !nal.is_vcl() {
                self.writer.write_unit(&mut nal)?;
                stats.units_written += 1;
            } else {
                match self.pattern.current() {
                    b'0' => {
                        self.writer.write_unit(&mut nal)?;
                        stats.units_written += 1;
                        self.pattern.advance();
                    }
                    b'1' if writeable => {
                        self.writer.write_unit(&mut nal)?;
                        stats.units_written += 1;
                    }
                    b'1' => {
                        stats.units_dropped += 1;
                        self.pattern.advance();
                    }
                    other => {
                        warn!(
                            "wrong character {:?} in the loss pattern; unit neither \
                             written nor charged",
                            other as char
                        );
                        stats.units_dropped += 1;
                    }
                }
            }
            self.pattern.rewind_if_exhausted();
        }
        info!(
            "transmission finished: {} units read, {} written, {} dropped",
            stats.units_read, stats.units_written, stats.units_dropped
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annexb::ByteStreamReader;
    use crate::rtp::{PacketFileReader, PacketFileWriter, RawPacketBuilder};
    use crate::testutil::{annexb_stream, h265_pps_payload, h265_sps_payload, BitString};
    use std::io::Cursor;

    fn pattern(s: &[u8]) -> LossPattern {
        LossPattern::new(s.to_vec(), 0).unwrap()
    }

    fn run_avc_annexb(input: &[u8], pattern_bytes: &[u8], modality: Modality) -> (Vec<u8>, RunStats) {
        let mut out = Vec::new();
        let sim = AvcSimulator::new(
            h264::Framer::AnnexB(ByteStreamReader::new(Cursor::new(input.to_vec()))),
            h264::Writer::AnnexB(&mut out),
            pattern(pattern_bytes),
            modality,
        );
        let stats = sim.run().unwrap();
        (out, stats)
    }

    fn run_hevc(input: &[u8], pattern_bytes: &[u8], modality: Modality) -> (Vec<u8>, RunStats) {
        let mut out = Vec::new();
        let sim = HevcSimulator::new(
            h265::Framer::new(ByteStreamReader::new(Cursor::new(input.to_vec()))),
            h265::Writer::new(&mut out),
            pattern(pattern_bytes),
            modality,
        );
        let stats = sim.run().unwrap();
        (out, stats)
    }

    // H.264 payloads: NAL header byte + a slice header encoding the type.
    const AVC_SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1E];
    const AVC_PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];
    const AVC_IDR: &[u8] = &[0x65, 0x88, 0x80]; // slice_type 7 → I
    const AVC_P: &[u8] = &[0x41, 0xC0]; // slice_type 0 → P

    #[test]
    fn avc_round_trip_identity() {
        let input = annexb_stream(&[AVC_SPS, AVC_PPS, AVC_IDR, AVC_P, AVC_P]);
        let (out, stats) = run_avc_annexb(&input, b"00000000", Modality::AllSlices);
        assert_eq!(out, input);
        assert_eq!(stats.units_read, 5);
        assert_eq!(stats.units_written, 5);
        assert_eq!(stats.units_dropped, 0);
    }

    #[test]
    fn avc_drops_flagged_vcl_only() {
        // Cursor walk over "1000" (wrap at 3): IDR sees '1', the two P
        // slices see '0'; parameter sets consult nothing.
        let input = annexb_stream(&[AVC_SPS, AVC_PPS, AVC_IDR, AVC_P, AVC_P]);
        let (out, stats) = run_avc_annexb(&input, b"1000", Modality::AllSlices);
        assert_eq!(out, annexb_stream(&[AVC_SPS, AVC_PPS, AVC_P, AVC_P]));
        assert_eq!(stats.units_dropped, 1);
    }

    #[test]
    fn avc_protect_intra_emits_and_freezes_cursor() {
        // Modality 1 with an all-ones head: the IDR is protected and leaves
        // the cursor alone, so both P slices then read the same '1'.
        let input = annexb_stream(&[AVC_IDR, AVC_P, AVC_P]);
        let (out, stats) = run_avc_annexb(&input, b"11000", Modality::ProtectIntra);
        assert_eq!(out, annexb_stream(&[AVC_IDR]));
        assert_eq!(stats.units_written, 1);
        assert_eq!(stats.units_dropped, 2);
    }

    #[test]
    fn avc_intra_only_corruption() {
        let input = annexb_stream(&[AVC_IDR, AVC_P, AVC_P]);
        let (out, stats) = run_avc_annexb(&input, b"11111", Modality::IntraOnly);
        // The IDR is dropped ('1', not protected); the P slices are emitted
        // despite their '1's because only intra may be corrupted.
        assert_eq!(out, annexb_stream(&[AVC_P, AVC_P]));
        assert_eq!(stats.units_dropped, 1);
    }

    #[test]
    fn avc_bad_pattern_symbol_is_inert() {
        let input = annexb_stream(&[AVC_SPS, AVC_IDR, AVC_P]);
        let (out, stats) = run_avc_annexb(&input, b"x000", Modality::AllSlices);
        // Both slices read the stray symbol: neither written nor advanced.
        assert_eq!(out, annexb_stream(&[AVC_SPS]));
        assert_eq!(stats.units_dropped, 2);
    }

    /// Builds a packet-file record by hand so the RTP timestamp is
    /// controllable (the writer pins its own timestamps to 0).
    fn rtp_record(timestamp: u32, sequence_number: u16, payload: &[u8]) -> Vec<u8> {
        let packet = RawPacketBuilder {
            sequence_number,
            timestamp,
            mark: false,
        }
        .build(payload);
        let mut out = Vec::new();
        out.extend_from_slice(&(packet.len() as u32).to_le_bytes());
        out.extend_from_slice(&(-1i32).to_le_bytes());
        out.extend_from_slice(&packet);
        out
    }

    fn run_avc_rtp(input: Vec<u8>, pattern_bytes: &[u8], modality: Modality) -> (Vec<u8>, RunStats) {
        let mut out = Vec::new();
        let sim = AvcSimulator::new(
            h264::Framer::Rtp(PacketFileReader::new(Cursor::new(input))),
            h264::Writer::Rtp(PacketFileWriter::new(&mut out)),
            pattern(pattern_bytes),
            modality,
        );
        let stats = sim.run().unwrap();
        (out, stats)
    }

    #[test]
    fn rtp_round_trip_identity() {
        // Input produced by the same writer scheme (sequence from 0,
        // timestamp 0, record timestamp -1) survives byte-exactly.
        let mut input = Vec::new();
        {
            let mut w = PacketFileWriter::new(&mut input);
            w.write_packet(false, AVC_SPS).unwrap();
            w.write_packet(false, AVC_IDR).unwrap();
            w.write_packet(false, AVC_P).unwrap();
        }
        let (out, stats) = run_avc_rtp(input.clone(), b"0000", Modality::AllSlices);
        assert_eq!(out, input);
        assert_eq!(stats.units_written, 3);
    }

    #[test]
    fn rtp_timestamp_zero_forces_emission() {
        // All-ones pattern, but the first access unit (timestamp 0) goes
        // through anyway, consuming a pattern symbol as it does.
        let mut input = Vec::new();
        input.extend(rtp_record(0, 0, AVC_IDR));
        input.extend(rtp_record(90_000, 1, AVC_P));
        input.extend(rtp_record(90_000, 2, AVC_P));
        let (out, stats) = run_avc_rtp(input, b"11111", Modality::AllSlices);
        let mut expect = Vec::new();
        {
            let mut w = PacketFileWriter::new(&mut expect);
            w.write_packet(false, AVC_IDR).unwrap();
        }
        assert_eq!(out, expect);
        assert_eq!(stats.units_written, 1);
        assert_eq!(stats.units_dropped, 2);
    }

    #[test]
    fn rtp_non_vcl_does_not_consult_the_pattern() {
        // SPS first, then a slice. With pattern "10", the slice must still
        // see the '1' (the SPS consumed nothing) and be dropped.
        let mut input = Vec::new();
        input.extend(rtp_record(90_000, 0, AVC_SPS));
        input.extend(rtp_record(90_000, 1, AVC_P));
        let (out, stats) = run_avc_rtp(input, b"100", Modality::AllSlices);
        let mut expect = Vec::new();
        {
            let mut w = PacketFileWriter::new(&mut expect);
            w.write_packet(false, AVC_SPS).unwrap();
        }
        assert_eq!(out, expect);
        assert_eq!(stats.units_dropped, 1);
    }

    // H.265 units: two header bytes + crafted payloads.
    fn hevc_unit(unit_type: h265::UnitType, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![unit_type.id() << 1, 0x01];
        data.extend_from_slice(payload);
        data
    }

    fn hevc_vps() -> Vec<u8> {
        hevc_unit(h265::UnitType::VpsNut, &[0x0C, 0x01, 0xFF, 0xFF])
    }

    fn hevc_sps() -> Vec<u8> {
        hevc_unit(h265::UnitType::SpsNut, &h265_sps_payload(0, 1920, 1080))
    }

    fn hevc_pps(dependent: bool) -> Vec<u8> {
        hevc_unit(
            h265::UnitType::PpsNut,
            &h265_pps_payload(0, 0, dependent, 0),
        )
    }

    /// First slice segment of the given type.
    fn hevc_slice(unit_type: h265::UnitType, slice_type_codeword: u32) -> Vec<u8> {
        let mut bits = BitString::new();
        bits.u(1, 1); // first_slice_segment_in_pic_flag
        if unit_type.is_irap() {
            bits.u(0, 1); // no_output_of_prior_pics_flag
        }
        bits.ue(0) // slice_pic_parameter_set_id
            .ue(slice_type_codeword)
            .u(1, 1); // rbsp_stop_one_bit
        hevc_unit(unit_type, &bits.to_bytes())
    }

    #[test]
    fn hevc_round_trip_identity() {
        let units = [
            hevc_vps(),
            hevc_sps(),
            hevc_pps(false),
            hevc_slice(h265::UnitType::IdrWRadl, 2),
            hevc_slice(h265::UnitType::TrailR, 1),
            hevc_slice(h265::UnitType::TrailN, 0),
        ];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let (out, stats) = run_hevc(&input, b"00000000", Modality::AllSlices);
        assert_eq!(out, input);
        assert_eq!(stats.units_read, 6);
        assert_eq!(stats.units_written, 6);
    }

    #[test]
    fn hevc_drops_slices_keeps_parameter_sets() {
        let units = [
            hevc_vps(),
            hevc_sps(),
            hevc_pps(false),
            hevc_slice(h265::UnitType::IdrWRadl, 2),
            hevc_slice(h265::UnitType::TrailR, 1),
        ];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let (out, stats) = run_hevc(&input, b"11111111", Modality::AllSlices);
        let kept = [hevc_vps(), hevc_sps(), hevc_pps(false)];
        let kept_refs: Vec<&[u8]> = kept.iter().map(Vec::as_slice).collect();
        assert_eq!(out, annexb_stream(&kept_refs));
        assert_eq!(stats.units_dropped, 2);
    }

    #[test]
    fn hevc_protect_intra_freezes_cursor() {
        let units = [
            hevc_sps(),
            hevc_pps(false),
            hevc_slice(h265::UnitType::IdrWRadl, 2), // I, protected
            hevc_slice(h265::UnitType::TrailR, 1),   // P
            hevc_slice(h265::UnitType::TrailN, 0),   // B
        ];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let (out, stats) = run_hevc(&input, b"11000000", Modality::ProtectIntra);
        // The IDR reads '1' but is intra: emitted, cursor frozen. The trail
        // slices then read index 0 and 1, both '1': dropped.
        let kept = [
            hevc_sps(),
            hevc_pps(false),
            hevc_slice(h265::UnitType::IdrWRadl, 2),
        ];
        let kept_refs: Vec<&[u8]> = kept.iter().map(Vec::as_slice).collect();
        assert_eq!(out, annexb_stream(&kept_refs));
        assert_eq!(stats.units_dropped, 2);
    }

    #[test]
    fn hevc_slice_without_pps_is_fatal() {
        let units = [hevc_slice(h265::UnitType::TrailR, 1)];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let sim = HevcSimulator::new(
            h265::Framer::new(ByteStreamReader::new(Cursor::new(input))),
            h265::Writer::new(Vec::new()),
            pattern(b"0000"),
            Modality::AllSlices,
        );
        let e = sim.run().unwrap_err();
        assert!(e.to_string().contains("picture parameter set"), "{e}");
    }

    #[test]
    fn hevc_dependent_segment_clears_retained_type() {
        // A dependent segment after an I slice: under ProtectIntra with an
        // all-ones pattern it is no longer protected, because its header
        // carries no slice type.
        let first = hevc_slice(h265::UnitType::TrailR, 2); // I, first segment
        let dependent = {
            let mut bits = BitString::new();
            bits.u(0, 1) // first_slice_segment_in_pic_flag
                .ue(0) // slice_pic_parameter_set_id
                .u(1, 1) // dependent_slice_segment_flag
                .u(12, 9) // slice_segment_address (510 CTUs → 9 bits)
                .u(1, 1); // rbsp_stop_one_bit
            hevc_unit(h265::UnitType::TrailR, &bits.to_bytes())
        };
        let units = [hevc_sps(), hevc_pps(true), first, dependent];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let (out, stats) = run_hevc(&input, b"11111111", Modality::ProtectIntra);
        let kept = [
            hevc_sps(),
            hevc_pps(true),
            hevc_slice(h265::UnitType::TrailR, 2),
        ];
        let kept_refs: Vec<&[u8]> = kept.iter().map(Vec::as_slice).collect();
        assert_eq!(out, annexb_stream(&kept_refs));
        assert_eq!(stats.units_dropped, 1);
    }

    #[test]
    fn hevc_reserved_vcl_consults_pattern_without_parsing() {
        // RSV_VCL_N10 is VCL but not a coded slice segment: it consumes a
        // pattern symbol yet needs no parameter sets.
        let units = [hevc_unit(h265::UnitType::RsvVclN10, &[0x80])];
        let refs: Vec<&[u8]> = units.iter().map(Vec::as_slice).collect();
        let input = annexb_stream(&refs);
        let (out, stats) = run_hevc(&input, b"0100", Modality::AllSlices);
        assert_eq!(out, input);
        assert_eq!(stats.units_written, 1);
    }
}
