//! TOML config file loading, environment overrides, and validation for the
//! node.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::telemetry::LabelSet;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    pub topic_prefix: String,
    pub mqtt: MqttConfig,
    pub network: NetworkConfig,
    pub thresholds: Thresholds,
    pub timing: Timing,
    pub telemetry: TelemetryConfig,
    pub gpio: GpioPins,
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_s: u64,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub associate_timeout_ms: u64,
    /// Link check period while offline.
    pub poll_interval_ms: u64,
    /// Link check period while online.
    pub recheck_interval_ms: u64,
    pub check_timeout_ms: u64,
}

/// Band edges for the classifier and the critical-alert distance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub water_high_cm: f32,
    pub water_medium_cm: f32,
    pub critical_cm: f32,
    pub rain_moderate: u32,
    pub rain_heavy: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub loop_interval_ms: u64,
    pub publish_interval_ms: u32,
    pub debounce_ms: u32,
    pub status_log_interval_ms: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Category vocabulary expected by the hub.
    pub labels: LabelSet,
}

/// BCM pin numbers on the Raspberry Pi header.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioPins {
    pub trigger: u8,
    pub echo: u8,
    pub rain_gauge: u8,
    pub led_network: u8,
    pub led_water_low: u8,
    pub led_water_medium: u8,
    pub led_water_high: u8,
    pub led_rain: u8,
    pub led_alert: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scenario: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "node-a".to_string(),
            topic_prefix: "flood_sentry".to_string(),
            mqtt: MqttConfig::default(),
            network: NetworkConfig::default(),
            thresholds: Thresholds::default(),
            timing: Timing::default(),
            telemetry: TelemetryConfig::default(),
            gpio: GpioPins::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".to_string(),
            port: 1883,
            keep_alive_s: 60,
            connect_timeout_ms: 5_000,
            retry_interval_ms: 5_000,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            associate_timeout_ms: 20_000,
            poll_interval_ms: 500,
            recheck_interval_ms: 10_000,
            check_timeout_ms: 2_000,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            water_high_cm: 50.0,
            water_medium_cm: 100.0,
            critical_cm: 10.0,
            rain_moderate: 5,
            rain_heavy: 10,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            loop_interval_ms: 100,
            publish_interval_ms: 10_000,
            debounce_ms: 50,
            status_log_interval_ms: 300_000,
        }
    }
}

impl Default for GpioPins {
    fn default() -> Self {
        Self {
            trigger: 23,
            echo: 24,
            rain_gauge: 17,
            led_network: 5,
            led_water_low: 6,
            led_water_medium: 13,
            led_water_high: 19,
            led_rain: 26,
            led_alert: 21,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            scenario: "calm".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the 40-pin header. GPIO 0-1 belong to the ID
/// EEPROM; GPIO 28+ are not broken out.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all entries. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_identity(&mut errors);
        self.validate_thresholds(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_gpio(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_identity(&self, errors: &mut Vec<String>) {
        if self.node_id.trim().is_empty() {
            errors.push("node_id is empty".to_string());
        }

        let prefix = self.topic_prefix.trim();
        if prefix.is_empty() {
            errors.push("topic_prefix is empty".to_string());
        } else if prefix.contains(['+', '#']) {
            errors.push(format!(
                "topic_prefix '{prefix}' must not contain MQTT wildcards"
            ));
        } else if prefix.ends_with('/') {
            errors.push(format!("topic_prefix '{prefix}' must not end with '/'"));
        }

        if self.mqtt.host.trim().is_empty() {
            errors.push("mqtt.host is empty".to_string());
        }
        if self.mqtt.port == 0 {
            errors.push("mqtt.port must be non-zero".to_string());
        }
    }

    fn validate_thresholds(&self, errors: &mut Vec<String>) {
        let t = &self.thresholds;

        // ── Water bands ─────────────────────────────────────
        if !(t.water_high_cm > 0.0) {
            errors.push(format!(
                "thresholds.water_high_cm must be positive, got {}",
                t.water_high_cm
            ));
        }
        if !(t.water_high_cm < t.water_medium_cm) {
            errors.push(format!(
                "thresholds.water_medium_cm ({}) must be greater than water_high_cm ({})",
                t.water_medium_cm, t.water_high_cm
            ));
        }
        if !(t.critical_cm > 0.0) {
            errors.push(format!(
                "thresholds.critical_cm must be positive, got {}",
                t.critical_cm
            ));
        }

        // ── Rain bands ──────────────────────────────────────
        if t.rain_moderate == 0 {
            errors.push("thresholds.rain_moderate must be positive".to_string());
        }
        if t.rain_heavy <= t.rain_moderate {
            errors.push(format!(
                "thresholds.rain_heavy ({}) must be greater than rain_moderate ({})",
                t.rain_heavy, t.rain_moderate
            ));
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let positive: [(&str, u64); 11] = [
            ("mqtt.keep_alive_s", self.mqtt.keep_alive_s),
            ("mqtt.connect_timeout_ms", self.mqtt.connect_timeout_ms),
            ("mqtt.retry_interval_ms", self.mqtt.retry_interval_ms),
            ("network.associate_timeout_ms", self.network.associate_timeout_ms),
            ("network.poll_interval_ms", self.network.poll_interval_ms),
            ("network.recheck_interval_ms", self.network.recheck_interval_ms),
            ("network.check_timeout_ms", self.network.check_timeout_ms),
            ("timing.loop_interval_ms", self.timing.loop_interval_ms),
            ("timing.publish_interval_ms", self.timing.publish_interval_ms.into()),
            ("timing.debounce_ms", self.timing.debounce_ms.into()),
            (
                "timing.status_log_interval_ms",
                self.timing.status_log_interval_ms.into(),
            ),
        ];
        for (name, value) in positive {
            if value == 0 {
                errors.push(format!("{name} must be positive, got 0"));
            }
        }
    }

    fn validate_gpio(&self, errors: &mut Vec<String>) {
        let g = &self.gpio;
        let pins = [
            ("gpio.trigger", g.trigger),
            ("gpio.echo", g.echo),
            ("gpio.rain_gauge", g.rain_gauge),
            ("gpio.led_network", g.led_network),
            ("gpio.led_water_low", g.led_water_low),
            ("gpio.led_water_medium", g.led_water_medium),
            ("gpio.led_water_high", g.led_water_high),
            ("gpio.led_rain", g.led_rain),
            ("gpio.led_alert", g.led_alert),
        ];

        let mut seen: HashSet<u8> = HashSet::new();
        for (name, pin) in pins {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "{name}: {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen.insert(pin) {
                errors.push(format!("{name}: pin {pin} is already in use"));
            }
        }
    }

    /// Apply the environment overrides the node has always honoured.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = var("MQTT_PORT") {
            self.mqtt.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid MQTT_PORT: {port:?}"))?;
        }
        if let Some(node_id) = var("NODE_ID") {
            self.node_id = node_id;
        }
        if let Some(prefix) = var("TOPIC_PREFIX") {
            self.topic_prefix = prefix;
        }
        if let Some(scenario) = var("SIM_SCENARIO") {
            self.sim.scenario = scenario;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. Validation happens after env overrides.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

/// Resolve the effective config: optional file at `CONFIG_PATH`, then env
/// overrides, then validation.
pub fn resolve() -> Result<Config> {
    let mut config = match std::env::var("CONFIG_PATH") {
        Ok(path) => load(&path)?,
        Err(_) => Config::default(),
    };
    config.apply_env(|k| std::env::var(k).ok())?;
    config.validate().context("invalid config")?;
    tracing::info!(
        node_id = %config.node_id,
        broker = %config.mqtt.host,
        port = config.mqtt.port,
        prefix = %config.topic_prefix,
        "config resolved"
    );
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.topic_prefix, "flood_sentry");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.thresholds.water_high_cm, 50.0);
        assert_eq!(config.timing.debounce_ms, 50);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_section_keeps_other_defaults() {
        let toml_str = r#"
node_id = "riverbank-2"

[mqtt]
host = "broker.local"

[thresholds]
critical_cm = 15.0
rain_heavy = 20
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node_id, "riverbank-2");
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.thresholds.critical_cm, 15.0);
        assert_eq!(config.thresholds.rain_heavy, 20);
        assert_eq!(config.thresholds.rain_moderate, 5);
        config.validate().unwrap();
    }

    #[test]
    fn parse_label_set() {
        let config: Config = toml::from_str("[telemetry]\nlabels = \"portuguese\"").unwrap();
        assert_eq!(config.telemetry.labels, LabelSet::Portuguese);
        assert_eq!(Config::default().telemetry.labels, LabelSet::English);
        assert!(toml::from_str::<Config>("[telemetry]\nlabels = \"klingon\"").is_err());
    }

    #[test]
    fn parse_rejects_wrong_types() {
        assert!(toml::from_str::<Config>("[mqtt]\nport = \"abc\"").is_err());
    }

    // -- Env overrides ----------------------------------------------------

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", " 8883 "),
            ("NODE_ID", "node-z"),
            ("SIM_SCENARIO", "flash_flood"),
        ]))
        .unwrap();
        assert_eq!(cfg.mqtt.host, "10.0.0.2");
        assert_eq!(cfg.mqtt.port, 8883);
        assert_eq!(cfg.node_id, "node-z");
        assert_eq!(cfg.sim.scenario, "flash_flood");
        assert_eq!(cfg.topic_prefix, "flood_sentry");
    }

    #[test]
    fn env_bad_port_is_an_error() {
        let mut cfg = Config::default();
        assert!(cfg.apply_env(env(&[("MQTT_PORT", "http")])).is_err());
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_node_id_rejected() {
        let mut cfg = Config::default();
        cfg.node_id = "  ".into();
        assert_validation_err(&cfg, "node_id is empty");
    }

    #[test]
    fn wildcard_prefix_rejected() {
        let mut cfg = Config::default();
        cfg.topic_prefix = "flood/+".into();
        assert_validation_err(&cfg, "must not contain MQTT wildcards");
    }

    #[test]
    fn trailing_slash_prefix_rejected() {
        let mut cfg = Config::default();
        cfg.topic_prefix = "flood/".into();
        assert_validation_err(&cfg, "must not end with '/'");
    }

    #[test]
    fn water_bands_must_be_ordered() {
        let mut cfg = Config::default();
        cfg.thresholds.water_high_cm = 100.0;
        cfg.thresholds.water_medium_cm = 100.0;
        assert_validation_err(
            &cfg,
            "water_medium_cm (100) must be greater than water_high_cm (100)",
        );
    }

    #[test]
    fn nan_threshold_rejected() {
        let mut cfg = Config::default();
        cfg.thresholds.critical_cm = f32::NAN;
        assert_validation_err(&cfg, "critical_cm must be positive");
    }

    #[test]
    fn rain_bands_must_be_ordered() {
        let mut cfg = Config::default();
        cfg.thresholds.rain_moderate = 8;
        cfg.thresholds.rain_heavy = 8;
        assert_validation_err(&cfg, "rain_heavy (8) must be greater than rain_moderate (8)");
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = Config::default();
        cfg.timing.publish_interval_ms = 0;
        assert_validation_err(&cfg, "timing.publish_interval_ms must be positive");
    }

    #[test]
    fn zero_check_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.network.check_timeout_ms = 0;
        assert_validation_err(&cfg, "network.check_timeout_ms must be positive");
    }

    #[test]
    fn gpio_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.gpio.echo = 1;
        assert_validation_err(&cfg, "gpio.echo: 1 is not a valid BCM GPIO pin");
    }

    #[test]
    fn gpio_duplicate_rejected() {
        let mut cfg = Config::default();
        cfg.gpio.led_alert = cfg.gpio.trigger;
        assert_validation_err(&cfg, "gpio.led_alert: pin 23 is already in use");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.node_id = "".into();
        cfg.mqtt.port = 0;
        cfg.thresholds.rain_moderate = 0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("node_id is empty"), "{msg}");
        assert!(msg.contains("mqtt.port"), "{msg}");
        assert!(msg.contains("rain_moderate must be positive"), "{msg}");
        assert!(msg.contains("3 errors"), "{msg}");
    }
}
