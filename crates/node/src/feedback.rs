//! Status indicators.  Purely observational: derived from the tick's
//! categories and alert state, consumed by nothing else in the loop.
//!
//! | Indicator   | Condition                         | Output          |
//! |-------------|-----------------------------------|-----------------|
//! | Network     | associated + channel up           | on              |
//! |             | associated, channel down          | blink 1000 ms   |
//! |             | offline                           | off             |
//! | Water L/M/H | matching level category           | on (others off) |
//! | Rain        | None / Light / Moderate / Heavy   | off / blink 1000 ms / blink 400 ms / on |
//! | Alert       | local condition or remote flag    | blink 200 ms    |

use crate::classify::{RainIntensity, WaterLevel};

pub const RAIN_LIGHT_BLINK_MS: u32 = 1000;
pub const RAIN_MODERATE_BLINK_MS: u32 = 400;
pub const ALERT_BLINK_MS: u32 = 200;
pub const NETWORK_WAIT_BLINK_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Network,
    WaterLow,
    WaterMedium,
    WaterHigh,
    Rain,
    Alert,
}

impl Led {
    pub const ALL: [Led; 6] = [
        Led::Network,
        Led::WaterLow,
        Led::WaterMedium,
        Led::WaterHigh,
        Led::Rain,
        Led::Alert,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    Off,
    On,
    /// 50% duty square wave, phase taken from the tick counter.
    Blink { period_ms: u32 },
}

impl IndicatorState {
    pub fn level_at(self, now_ms: u32) -> bool {
        match self {
            Self::Off => false,
            Self::On => true,
            Self::Blink { period_ms } => period_ms == 0 || now_ms % period_ms < period_ms / 2,
        }
    }
}

/// Everything the indicators are derived from.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackInput {
    pub network_associated: bool,
    pub channel_connected: bool,
    pub water: WaterLevel,
    pub rain: RainIntensity,
    pub alert_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicators {
    pub network: IndicatorState,
    pub water_low: IndicatorState,
    pub water_medium: IndicatorState,
    pub water_high: IndicatorState,
    pub rain: IndicatorState,
    pub alert: IndicatorState,
}

fn on_if(cond: bool) -> IndicatorState {
    if cond {
        IndicatorState::On
    } else {
        IndicatorState::Off
    }
}

impl Indicators {
    pub fn derive(input: &FeedbackInput) -> Self {
        let network = match (input.network_associated, input.channel_connected) {
            (true, true) => IndicatorState::On,
            (true, false) => IndicatorState::Blink {
                period_ms: NETWORK_WAIT_BLINK_MS,
            },
            (false, _) => IndicatorState::Off,
        };

        // Any non-None category keeps the rain LED lit in some form.
        let rain = match input.rain {
            RainIntensity::None => IndicatorState::Off,
            RainIntensity::Light => IndicatorState::Blink {
                period_ms: RAIN_LIGHT_BLINK_MS,
            },
            RainIntensity::Moderate => IndicatorState::Blink {
                period_ms: RAIN_MODERATE_BLINK_MS,
            },
            RainIntensity::Heavy => IndicatorState::On,
        };

        let alert = if input.alert_active {
            IndicatorState::Blink {
                period_ms: ALERT_BLINK_MS,
            }
        } else {
            IndicatorState::Off
        };

        Self {
            network,
            water_low: on_if(input.water == WaterLevel::Low),
            water_medium: on_if(input.water == WaterLevel::Medium),
            water_high: on_if(input.water == WaterLevel::High),
            rain,
            alert,
        }
    }

    pub fn get(&self, led: Led) -> IndicatorState {
        match led {
            Led::Network => self.network,
            Led::WaterLow => self.water_low,
            Led::WaterMedium => self.water_medium,
            Led::WaterHigh => self.water_high,
            Led::Rain => self.rain,
            Led::Alert => self.alert,
        }
    }

    /// Resolve every indicator to a level at `now_ms` and push it out.
    pub fn render<P: IndicatorPanel>(&self, panel: &mut P, now_ms: u32) {
        for led in Led::ALL {
            panel.set(led, self.get(led).level_at(now_ms));
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Sink for indicator levels.  Implementations must not fail the caller.
pub trait IndicatorPanel {
    fn set(&mut self, led: Led, on: bool);

    fn toggle(&mut self, led: Led);
}

/// Panel without hardware: keeps the levels and logs changes.
#[derive(Debug, Default)]
pub struct LogPanel {
    levels: [bool; 6],
}

impl LogPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, led: Led) -> bool {
        self.levels[led.index()]
    }
}

impl IndicatorPanel for LogPanel {
    fn set(&mut self, led: Led, on: bool) {
        let slot = &mut self.levels[led.index()];
        if *slot != on {
            tracing::debug!(?led, on, "indicator");
            *slot = on;
        }
    }

    fn toggle(&mut self, led: Led) {
        let on = !self.is_on(led);
        self.set(led, on);
    }
}

// ---------------------------------------------------------------------------
// LEDs on Raspberry Pi GPIO (requires rppal)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct GpioPanel {
    pins: Vec<rppal::gpio::OutputPin>, // indexed by Led
}

#[cfg(feature = "gpio")]
impl GpioPanel {
    pub fn new(gpio: &rppal::gpio::Gpio, pins: &crate::config::GpioPins) -> anyhow::Result<Self> {
        let numbers = [
            pins.led_network,
            pins.led_water_low,
            pins.led_water_medium,
            pins.led_water_high,
            pins.led_rain,
            pins.led_alert,
        ];
        let mut out = Vec::with_capacity(numbers.len());
        for n in numbers {
            let mut pin = gpio.get(n)?.into_output();
            pin.set_low();
            out.push(pin);
        }
        tracing::info!(pins = ?numbers, "indicator leds initialised");
        Ok(Self { pins: out })
    }
}

#[cfg(feature = "gpio")]
impl IndicatorPanel for GpioPanel {
    fn set(&mut self, led: Led, on: bool) {
        let pin = &mut self.pins[led.index()];
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }

    fn toggle(&mut self, led: Led) {
        self.pins[led.index()].toggle();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> FeedbackInput {
        FeedbackInput {
            network_associated: true,
            channel_connected: true,
            water: WaterLevel::Low,
            rain: RainIntensity::None,
            alert_active: false,
        }
    }

    // -- derive ---------------------------------------------------------------

    #[test]
    fn exactly_one_water_led() {
        for water in [WaterLevel::Low, WaterLevel::Medium, WaterLevel::High] {
            let ind = Indicators::derive(&FeedbackInput { water, ..input() });
            let lit = [ind.water_low, ind.water_medium, ind.water_high]
                .iter()
                .filter(|s| **s == IndicatorState::On)
                .count();
            assert_eq!(lit, 1, "{water}");
        }
    }

    #[test]
    fn rain_led_only_off_when_dry() {
        let cases = [
            (RainIntensity::None, IndicatorState::Off),
            (RainIntensity::Light, IndicatorState::Blink { period_ms: RAIN_LIGHT_BLINK_MS }),
            (RainIntensity::Moderate, IndicatorState::Blink { period_ms: RAIN_MODERATE_BLINK_MS }),
            (RainIntensity::Heavy, IndicatorState::On),
        ];
        for (rain, expected) in cases {
            let ind = Indicators::derive(&FeedbackInput { rain, ..input() });
            assert_eq!(ind.rain, expected, "{rain}");
        }
    }

    #[test]
    fn alert_led_follows_aggregate() {
        let off = Indicators::derive(&input());
        assert_eq!(off.alert, IndicatorState::Off);
        let on = Indicators::derive(&FeedbackInput {
            alert_active: true,
            ..input()
        });
        assert_eq!(on.alert, IndicatorState::Blink { period_ms: ALERT_BLINK_MS });
    }

    #[test]
    fn network_led_states() {
        let up = Indicators::derive(&input());
        assert_eq!(up.network, IndicatorState::On);

        let waiting = Indicators::derive(&FeedbackInput {
            channel_connected: false,
            ..input()
        });
        assert!(matches!(waiting.network, IndicatorState::Blink { .. }));

        let offline = Indicators::derive(&FeedbackInput {
            network_associated: false,
            channel_connected: false,
            ..input()
        });
        assert_eq!(offline.network, IndicatorState::Off);
    }

    // -- level_at / render ----------------------------------------------------

    #[test]
    fn blink_is_half_duty() {
        let s = IndicatorState::Blink { period_ms: 200 };
        assert!(s.level_at(0));
        assert!(s.level_at(99));
        assert!(!s.level_at(100));
        assert!(!s.level_at(199));
        assert!(s.level_at(200));
    }

    #[test]
    fn render_pushes_every_led() {
        let mut panel = LogPanel::new();
        let ind = Indicators::derive(&FeedbackInput {
            water: WaterLevel::High,
            rain: RainIntensity::Heavy,
            alert_active: true,
            ..input()
        });
        ind.render(&mut panel, 0);
        assert!(panel.is_on(Led::Network));
        assert!(!panel.is_on(Led::WaterLow));
        assert!(!panel.is_on(Led::WaterMedium));
        assert!(panel.is_on(Led::WaterHigh));
        assert!(panel.is_on(Led::Rain));
        assert!(panel.is_on(Led::Alert));

        ind.render(&mut panel, ALERT_BLINK_MS / 2);
        assert!(!panel.is_on(Led::Alert));
    }

    #[test]
    fn toggle_flips_level() {
        let mut panel = LogPanel::new();
        panel.toggle(Led::Network);
        assert!(panel.is_on(Led::Network));
        panel.toggle(Led::Network);
        assert!(!panel.is_on(Led::Network));
    }
}
