//! Threshold-band classification of raw readings.
//!
//! The ultrasonic sensor points down at the water surface, so a *smaller*
//! distance means a *higher* water level.  Every band is closed on its lower
//! edge and open on its upper edge.

use std::fmt;

use crate::config::Thresholds;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WaterLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RainIntensity {
    None,
    Light,
    Moderate,
    Heavy,
}

impl fmt::Display for WaterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
        }
    }
}

impl fmt::Display for RainIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Light => write!(f, "Light"),
            Self::Moderate => write!(f, "Moderate"),
            Self::Heavy => write!(f, "Heavy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Map a distance to the water surface onto a water-level band.
///
/// The no-echo sentinel is far beyond `water_medium_cm` and lands in `Low`.
pub fn classify_water(distance_cm: f32, t: &Thresholds) -> WaterLevel {
    if distance_cm < t.water_high_cm {
        WaterLevel::High
    } else if distance_cm < t.water_medium_cm {
        WaterLevel::Medium
    } else {
        WaterLevel::Low
    }
}

/// Map the accumulated rain-gauge count onto an intensity band.
pub fn classify_rain(count: u32, t: &Thresholds) -> RainIntensity {
    if count == 0 {
        RainIntensity::None
    } else if count < t.rain_moderate {
        RainIntensity::Light
    } else if count < t.rain_heavy {
        RainIntensity::Moderate
    } else {
        RainIntensity::Heavy
    }
}

// ===========================================================================
// Tests
// ===========================================================================
