//! Rain gauge input with level + hold-time debounce.
//!
//! Each tip of the gauge closes a reed switch.  A raw level change restarts
//! the hold timer; the debounced level only follows the raw level once it has
//! been stable for the debounce window.  A stable released → pressed change
//! counts one rain event.

/// Raw digital input sampled once per tick.
pub trait RainInput {
    /// `true` while the gauge switch is closed.
    fn is_pressed(&mut self) -> bool;
}

/// Debounce state for the rain gauge.  Only [`RainDebounceState::update`]
/// mutates it; `accumulated_count` never decreases.
#[derive(Debug, Clone, Default)]
pub struct RainDebounceState {
    pub raw_pressed: bool,
    pub debounced_pressed: bool,
    pub last_transition_ms: u32,
    pub accumulated_count: u32,
}

impl RainDebounceState {
    /// Feed one raw sample.  Returns `true` only on the tick a new press is
    /// committed.
    pub fn update(&mut self, raw_pressed: bool, now_ms: u32, window_ms: u32) -> bool {
        if raw_pressed != self.raw_pressed {
            self.raw_pressed = raw_pressed;
            self.last_transition_ms = now_ms;
        }

        if now_ms.wrapping_sub(self.last_transition_ms) < window_ms {
            return false;
        }
        if self.debounced_pressed == self.raw_pressed {
            return false;
        }

        self.debounced_pressed = self.raw_pressed;
        if self.debounced_pressed {
            self.accumulated_count = self.accumulated_count.saturating_add(1);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Real rain gauge on Raspberry Pi GPIO (requires rppal)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct RainGauge {
    pin: rppal::gpio::InputPin,
}

#[cfg(feature = "gpio")]
impl RainGauge {
    /// Reed switch to ground with the internal pull-up: low = closed.
    pub fn new(gpio: &rppal::gpio::Gpio, pin: u8) -> anyhow::Result<Self> {
        let pin_handle = gpio.get(pin)?.into_input_pullup();
        tracing::info!(pin, "rain gauge initialised");
        Ok(Self { pin: pin_handle })
    }
}

#[cfg(feature = "gpio")]
impl RainInput for RainGauge {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u32 = 50;

    /// Feed `(raw, now_ms)` samples and return how many presses were reported.
    fn feed(state: &mut RainDebounceState, samples: &[(bool, u32)]) -> usize {
        samples
            .iter()
            .filter(|&&(raw, now)| state.update(raw, now, WINDOW))
            .count()
    }

    #[test]
    fn idle_input_never_counts() {
        let mut st = RainDebounceState::default();
        for t in (0..1000).step_by(10) {
            assert!(!st.update(false, t, WINDOW));
        }
        assert_eq!(st.accumulated_count, 0);
    }

    #[test]
    fn short_press_is_filtered() {
        let mut st = RainDebounceState::default();
        let presses = feed(&mut st, &[(true, 100), (true, 130), (true, 149), (false, 150), (false, 400)]);
        assert_eq!(presses, 0);
        assert_eq!(st.accumulated_count, 0);
    }

    #[test]
    fn stable_press_counts_once() {
        let mut st = RainDebounceState::default();
        assert!(!st.update(true, 100, WINDOW));
        assert!(!st.update(true, 120, WINDOW));
        assert!(st.update(true, 150, WINDOW), "held exactly the window");
        assert!(!st.update(true, 200, WINDOW), "reported once per edge");
        assert!(!st.update(true, 5_000, WINDOW));
        assert_eq!(st.accumulated_count, 1);
        assert!(st.debounced_pressed);
    }

    #[test]
    fn bounce_before_settling_counts_once() {
        let mut st = RainDebounceState::default();
        let presses = feed(
            &mut st,
            &[
                (true, 100),
                (false, 103),
                (true, 107),
                (false, 111),
                (true, 115),
                (true, 140),
                (true, 165),
                (true, 200),
            ],
        );
        assert_eq!(presses, 1);
        assert_eq!(st.accumulated_count, 1);
    }

    #[test]
    fn release_must_also_settle_before_next_press() {
        let mut st = RainDebounceState::default();
        feed(&mut st, &[(true, 0), (true, 60)]);
        assert_eq!(st.accumulated_count, 1);

        // Brief release glitch: debounced level stays pressed, no new count.
        feed(&mut st, &[(false, 100), (true, 110), (true, 200)]);
        assert_eq!(st.accumulated_count, 1);

        // Proper release then press.
        feed(&mut st, &[(false, 300), (false, 360), (true, 400), (true, 460)]);
        assert_eq!(st.accumulated_count, 2);
    }

    #[test]
    fn survives_tick_counter_wraparound() {
        let mut st = RainDebounceState::default();
        let start = u32::MAX - 20;
        assert!(!st.update(true, start, WINDOW));
        assert!(!st.update(true, start.wrapping_add(30), WINDOW));
        assert!(st.update(true, start.wrapping_add(60), WINDOW));
        assert_eq!(st.accumulated_count, 1);
    }
}
