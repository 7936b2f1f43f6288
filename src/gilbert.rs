// Copyright (C) 2024 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Two-state Gilbert–Elliott channel model for generating loss patterns.
//!
//! ```text
//!               _______       Pgb           _______
//!        ------|       |------------------>|       |------
//!    Pgg |     |   G   |                   |   B   |     | Pbb
//!        ----->|_______|<------------------|_______|<-----
//!                             Pbg
//! ```
//!
//! The model is parameterized by a target packet-loss rate and a mean burst
//! length; the steady-state loss probability is `Pgb / (Pbg + Pgb)`. A burst
//! is a contiguous run of two or more lost packets.

use rand::Rng;

use crate::error::ErrorInt;
use crate::Error;

/// A configured two-state channel.
#[derive(Debug, Clone, Copy)]
pub struct GilbertElliott {
    /// Probability that the good state stays good.
    p_stay_good: f64,

    /// Probability that the bad state stays bad.
    p_stay_bad: f64,
}

impl GilbertElliott {
    /// Derives the transition probabilities from a target loss rate
    /// (`plr`, in percent) and a mean burst length (`burst_len`, packets).
    pub fn from_target(plr: f64, burst_len: f64) -> Result<Self, Error> {
        if !(plr > 0.0 && plr < 100.0) {
            bail!(ErrorInt::ConfigError(format!(
                "packet loss rate {plr} must be inside (0, 100)"
            )));
        }
        if burst_len < 1.0 {
            bail!(ErrorInt::ConfigError(format!(
                "mean burst length {burst_len} must be at least 1"
            )));
        }
        let p_stay_bad = 1.0 - 1.0 / burst_len;
        let p = plr / 100.0;
        let p_stay_good = 1.0 - ((1.0 - p_stay_bad) / (1.0 - p)) * p;
        if !(0.0..=1.0).contains(&p_stay_good) {
            bail!(ErrorInt::ConfigError(format!(
                "loss rate {plr}% with burst length {burst_len} is unreachable \
                 (good-state retention would be {p_stay_good:.3})"
            )));
        }
        Ok(Self {
            p_stay_good,
            p_stay_bad,
        })
    }

    /// Generates `len` pattern symbols. The first symbol is always `'0'`,
    /// matching the reference generator.
    pub fn generate<R: Rng>(&self, len: usize, rng: &mut R) -> Vec<u8> {
        let mut pattern = Vec::with_capacity(len);
        let mut lost = false;
        for i in 0..len {
            if i > 0 {
                lost = if lost {
                    rng.gen::<f64>() <= self.p_stay_bad
                } else {
                    rng.gen::<f64>() > self.p_stay_good
                };
            }
            pattern.push(if lost { b'1' } else { b'0' });
        }
        pattern
    }
}
