// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! H.264/AVC transmitter simulator.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use anyhow::Context;
use log::{error, info};
use scotoma::annexb::ByteStreamReader;
use scotoma::codec::h264;
use scotoma::config::{Config, PacketFormat};
use scotoma::loss::LossPattern;
use scotoma::rtp::{PacketFileReader, PacketFileWriter};
use scotoma::sim::AvcSimulator;

fn usage() {
    println!(
        "scotoma-avc {}: transmitter simulator for H.264/AVC bitstreams\n\n\
         Usage (1): scotoma-avc <in_bitstream> <out_bitstream> <loss_pattern_file> \
         <packet_type> <offset> <modality>\n\
         Usage (2): scotoma-avc <configuration_file>\n\n\
         packet_type: 0 = RTP packet file, 1 = Annex B byte stream\n\
         offset:      starting offset into the loss pattern (clamped to >= 0)\n\
         modality:    0 = corrupt all slices, 1 = all but intra, 2 = intra only\n",
        env!("CARGO_PKG_VERSION"),
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = main_inner() {
        error!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

fn main_inner() -> Result<(), anyhow::Error> {
    let args: Vec<String> = std::env::args().collect();
    let config = match args.len() {
        2 => Config::from_avc_config_file(&args[1])?,
        7 => Config::from_avc_args(&args[1..])?,
        _ => {
            usage();
            return Ok(());
        }
    };

    info!("Input bitstream: {}", config.input.display());
    info!("Transmitted bitstream: {}", config.output.display());
    info!("Error pattern file: {}", config.loss_pattern.display());
    info!(
        "Packetization: {}",
        match config.packet_format {
            PacketFormat::Rtp => "RTP packet file",
            PacketFormat::AnnexB => "Annex B byte stream",
        }
    );
    info!("Starting offset: {}", config.offset);
    info!("Corruption modality: {}", config.modality.describe());

    let pattern = LossPattern::from_file(&config.loss_pattern, config.offset)?;
    let input = BufReader::new(
        File::open(&config.input)
            .with_context(|| format!("cannot open input bitstream {}", config.input.display()))?,
    );
    let output = BufWriter::new(File::create(&config.output).with_context(|| {
        format!(
            "cannot open transmitted bitstream {}",
            config.output.display()
        )
    })?);

    let (framer, writer) = match config.packet_format {
        PacketFormat::Rtp => (
            h264::Framer::Rtp(PacketFileReader::new(input)),
            h264::Writer::Rtp(PacketFileWriter::new(output)),
        ),
        PacketFormat::AnnexB => (
            h264::Framer::AnnexB(ByteStreamReader::new(input)),
            h264::Writer::AnnexB(output),
        ),
    };
    AvcSimulator::new(framer, writer, pattern, config.modality).run()?;
    Ok(())
}
