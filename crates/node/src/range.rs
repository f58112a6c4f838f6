//! Ultrasonic range sensor (HC-SR04) facing down at the water surface.
//!
//! One trigger pulse per tick, one bounded wait for the echo.  A missing echo
//! is reported as [`NO_ECHO_DISTANCE_CM`], never as an error and never as a
//! near-zero distance, and is not retried within the tick.

use std::time::Duration;

/// Distance reported when no echo arrives in time.  Far beyond any band edge,
/// so it classifies as the lowest water level.
pub const NO_ECHO_DISTANCE_CM: f32 = 999.0;

/// Round-trip wait for the echo.  ~30 ms covers the sensor's 4-5 m range.
pub const ECHO_TIMEOUT: Duration = Duration::from_millis(30);

/// Speed of sound at ~20 °C, in cm per microsecond.
const SOUND_CM_PER_US: f32 = 0.0343;

/// Source of one distance sample per tick.
pub trait RangeSensor {
    /// Fire a ranging pulse and return the distance to the surface in cm.
    fn measure(&mut self) -> f32;
}

/// Convert an echo pulse width to a one-way distance.
pub fn echo_to_cm(echo: Duration) -> f32 {
    echo.as_micros() as f32 * SOUND_CM_PER_US / 2.0
}

// ---------------------------------------------------------------------------
// Real HC-SR04 on Raspberry Pi GPIO (requires rppal)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub use hw::Hcsr04;

#[cfg(feature = "gpio")]
mod hw {
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use rppal::gpio::{Gpio, InputPin, OutputPin};

    use super::{echo_to_cm, RangeSensor, ECHO_TIMEOUT, NO_ECHO_DISTANCE_CM};

    pub struct Hcsr04 {
        trigger: OutputPin,
        echo: InputPin,
    }

    impl Hcsr04 {
        pub fn new(gpio: &Gpio, trigger_pin: u8, echo_pin: u8) -> Result<Self> {
            let mut trigger = gpio.get(trigger_pin)?.into_output();
            trigger.set_low();
            let echo = gpio.get(echo_pin)?.into_input();

            tracing::info!(trigger_pin, echo_pin, "hc-sr04 initialised");
            Ok(Self { trigger, echo })
        }

        /// Spin until the echo line reaches `high`, or give up at `deadline`.
        fn wait_for(&self, high: bool, deadline: Instant) -> Option<Instant> {
            loop {
                if self.echo.is_high() == high {
                    return Some(Instant::now());
                }
                if Instant::now() >= deadline {
                    return None;
                }
            }
        }
    }

    impl RangeSensor for Hcsr04 {
        fn measure(&mut self) -> f32 {
            self.trigger.set_low();
            thread::sleep(Duration::from_micros(2));
            self.trigger.set_high();
            thread::sleep(Duration::from_micros(10));
            self.trigger.set_low();

            let deadline = Instant::now() + ECHO_TIMEOUT;
            let Some(rise) = self.wait_for(true, deadline) else {
                return NO_ECHO_DISTANCE_CM;
            };
            let Some(fall) = self.wait_for(false, deadline) else {
                return NO_ECHO_DISTANCE_CM;
            };

            echo_to_cm(fall - rise)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_conversion() {
        // 1 ms round trip = 17.15 cm one way.
        let cm = echo_to_cm(Duration::from_micros(1000));
        assert!((cm - 17.15).abs() < 0.01, "got {cm}");
    }

    #[test]
    fn zero_echo_is_zero_distance() {
        assert_eq!(echo_to_cm(Duration::ZERO), 0.0);
    }

    #[test]
    fn timeout_covers_sensor_range() {
        // The longest wait must still resolve ~4 m.
        assert!(echo_to_cm(ECHO_TIMEOUT) > 400.0);
    }

    #[test]
    fn sentinel_is_beyond_measurable_range() {
        assert!(NO_ECHO_DISTANCE_CM > echo_to_cm(ECHO_TIMEOUT));
    }
}
