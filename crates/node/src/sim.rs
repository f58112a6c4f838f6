//! Stateful water-surface and rain-gauge simulator for local development.
//!
//! Models the sensors the node expects to see in the field:
//! - Surface distance as a random walk with scenario drift and mean reversion
//! - Per-sample ultrasonic noise
//! - Occasional lost echoes (reported as the no-echo sentinel)
//! - Rain-gauge tips at a scenario-dependent rate, with contact bounce

use std::fmt;

use crate::rain::RainInput;
use crate::range::{RangeSensor, NO_ECHO_DISTANCE_CM};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f32 {
    let mut sum: f32 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f32();
    }
    sum - 6.0
}

fn gaussian(mean: f32, sigma: f32) -> f32 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured profiles selectable via `[sim].scenario` / `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// River well below the sensor, hovering.  Rare rain.
    Calm,
    /// Steady rise toward the sensor with regular rain.
    Rising,
    /// Fast rise into the critical band under heavy rain.
    FlashFlood,
    /// Noisy readings and frequent lost echoes.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "rising" => Self::Rising,
            "flash_flood" | "flood" => Self::FlashFlood,
            "flaky" => Self::Flaky,
            _ => Self::Calm, // default
        }
    }

    fn profile(self) -> Profile {
        match self {
            Self::Calm => Profile {
                start_cm: 150.0,
                drift_per_sample: 0.0,
                walk_sigma: 0.2,
                mean_reversion: 0.01,
                noise_sigma: 0.5,
                no_echo_prob: 0.001,
                tip_prob: 0.0005,
            },
            Self::Rising => Profile {
                start_cm: 140.0,
                drift_per_sample: -0.02,
                walk_sigma: 0.3,
                mean_reversion: 0.0,
                noise_sigma: 0.8,
                no_echo_prob: 0.002,
                tip_prob: 0.01,
            },
            Self::FlashFlood => Profile {
                start_cm: 80.0,
                drift_per_sample: -0.1,
                walk_sigma: 0.5,
                mean_reversion: 0.0,
                noise_sigma: 1.0,
                no_echo_prob: 0.005,
                tip_prob: 0.05,
            },
            Self::Flaky => Profile {
                start_cm: 120.0,
                drift_per_sample: 0.0,
                walk_sigma: 1.0,
                mean_reversion: 0.02,
                noise_sigma: 8.0,
                no_echo_prob: 0.05,
                tip_prob: 0.005,
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Rising => write!(f, "rising"),
            Self::FlashFlood => write!(f, "flash_flood"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

struct Profile {
    start_cm: f32,
    drift_per_sample: f32,
    walk_sigma: f32,
    mean_reversion: f32,
    noise_sigma: f32,
    no_echo_prob: f32,
    tip_prob: f32,
}

/// Closest the simulated surface gets to the sensor face.
const MIN_SURFACE_CM: f32 = 2.0;
/// Furthest the simulated surface drops.
const MAX_SURFACE_CM: f32 = 400.0;

// ---------------------------------------------------------------------------
// Water surface
// ---------------------------------------------------------------------------

pub struct WaterSurfaceSim {
    base_cm: f32,
    center_cm: f32,
    profile: Profile,
}

impl WaterSurfaceSim {
    pub fn new(scenario: Scenario) -> Self {
        let profile = scenario.profile();
        Self {
            base_cm: profile.start_cm,
            center_cm: profile.start_cm,
            profile,
        }
    }
}

impl RangeSensor for WaterSurfaceSim {
    fn measure(&mut self) -> f32 {
        let p = &self.profile;

        let pull = p.mean_reversion * (self.center_cm - self.base_cm);
        let walk = gaussian(0.0, p.walk_sigma);
        self.base_cm =
            (self.base_cm + p.drift_per_sample + pull + walk).clamp(MIN_SURFACE_CM, MAX_SURFACE_CM);

        if fastrand::f32() < p.no_echo_prob {
            return NO_ECHO_DISTANCE_CM;
        }

        let reading = self.base_cm + gaussian(0.0, p.noise_sigma);
        reading.clamp(MIN_SURFACE_CM, MAX_SURFACE_CM)
    }
}

// ---------------------------------------------------------------------------
// Rain gauge
// ---------------------------------------------------------------------------

/// Samples a tip stays closed for.
const TIP_HOLD_SAMPLES: u32 = 3;
/// Chance a closed contact reads open on its first sample.
const BOUNCE_PROB: f32 = 0.3;

pub struct RainGaugeSim {
    tip_prob: f32,
    closed_for: u32,
}

impl RainGaugeSim {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            tip_prob: scenario.profile().tip_prob,
            closed_for: 0,
        }
    }
}

impl RainInput for RainGaugeSim {
    fn is_pressed(&mut self) -> bool {
        if self.closed_for == 0 {
            if fastrand::f32() >= self.tip_prob {
                return false;
            }
            self.closed_for = TIP_HOLD_SAMPLES;
        }

        let first = self.closed_for == TIP_HOLD_SAMPLES;
        self.closed_for -= 1;
        !(first && fastrand::f32() < BOUNCE_PROB)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
