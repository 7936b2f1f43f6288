// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! H.265/HEVC transmitter simulator.

use std::fs::File;
use std::io::{BufReader, BufWriter};

use anyhow::Context;
use log::{error, info};
use scotoma::annexb::ByteStreamReader;
use scotoma::codec::h265;
use scotoma::config::Config;
use scotoma::loss::LossPattern;
use scotoma::sim::HevcSimulator;

fn usage() {
    println!(
        "scotoma-hevc {}: transmitter simulator for H.265/HEVC bitstreams\n\n\
         Usage (1): scotoma-hevc <in_bitstream> <out_bitstream> <loss_pattern_file> \
         <offset> <modality>\n\
         Usage (2): scotoma-hevc <configuration_file>\n\n\
         offset:   starting offset into the loss pattern (clamped to >= 0)\n\
         modality: 0 = corrupt all slices, 1 = all but intra, 2 = intra only\n",
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
        2 => Config::from_hevc_config_file(&args[1])?,
        6 => Config::from_hevc_args(&args[1..])?,
        _ => {
            usage();
            return Ok(());
        }
    };

    info!("Input bitstream: {}", config.input.display());
    info!("Transmitted bitstream: {}", config.output.display());
    info!("Error pattern file: {}", config.loss_pattern.display());
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

    let framer = h265::Framer::new(ByteStreamReader::new(input));
    let writer = h265::Writer::new(output);
    HevcSimulator::new(framer, writer, pattern, config.modality).run()?;
    Ok(())
}
