// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Loss-pattern generator: draws a `'0'`/`'1'` trace from a two-state
//! Gilbert–Elliott channel model and reports the realized statistics.

use anyhow::Context;
use log::{error, info};
use scotoma::gilbert::GilbertElliott;
use scotoma::loss::BurstStats;

fn usage() {
    println!(
        "scotoma-pattern {}: Gilbert-Elliott loss pattern generator\n\n\
         Usage: scotoma-pattern <plr> <burst_len> <length> <out_file>\n\n\
         plr:       target packet loss rate in percent, inside (0, 100)\n\
         burst_len: target mean burst length in packets, >= 1\n\
         length:    number of pattern symbols to generate\n",
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
    if args.len() != 5 {
        usage();
        return Ok(());
    }
    let plr: f64 = args[1]
        .parse()
        .with_context(|| format!("packet loss rate {:?} is not a number", args[1]))?;
    let burst_len: f64 = args[2]
        .parse()
        .with_context(|| format!("burst length {:?} is not a number", args[2]))?;
    let length: usize = args[3]
        .parse()
        .with_context(|| format!("pattern length {:?} is not a number", args[3]))?;

    let model = GilbertElliott::from_target(plr, burst_len)?;
    let pattern = model.generate(length, &mut rand::thread_rng());
    std::fs::write(&args[4], &pattern)
        .with_context(|| format!("cannot write pattern file {}", args[4]))?;

    let stats = BurstStats::analyze(&pattern);
    info!("True mean PLR [%]: {:.2}", stats.realized_loss_rate * 100.0);
    info!(
        "True burst length [packets]: {:.2}",
        stats.mean_burst_length
    );
    info!("Bursts: {}", stats.burst_count);
    Ok(())
}
