use serde::{Deserialize, Serialize};

use crate::alert::{AlertStatus, AlertTransition};
use crate::classify::{RainIntensity, WaterLevel};

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// All topics live under one project prefix shared with the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub water_level: String,
    pub rainfall: String,
    pub critical_status: String,
    pub command: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim();
        Self {
            water_level: format!("{prefix}/sensor/water_level"),
            rainfall: format!("{prefix}/sensor/rainfall"),
            critical_status: format!("{prefix}/alert/critical_status"),
            command: format!("{prefix}/command/alert_status"),
        }
    }
}

// ---------------------------------------------------------------------------
// Category labels
// ---------------------------------------------------------------------------

/// Wire vocabulary for the category payloads.  The Portuguese set matches
/// the labels the flood-sentry hub compares against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelSet {
    #[default]
    #[serde(alias = "en")]
    English,
    #[serde(alias = "pt")]
    Portuguese,
}

impl LabelSet {
    pub fn water(self, level: WaterLevel) -> &'static str {
        match (self, level) {
            (Self::English, WaterLevel::Low) => "Low",
            (Self::English, WaterLevel::Medium) => "Medium",
            (Self::English, WaterLevel::High) => "High",
            (Self::Portuguese, WaterLevel::Low) => "Baixo",
            (Self::Portuguese, WaterLevel::Medium) => "Medio",
            (Self::Portuguese, WaterLevel::High) => "Alto",
        }
    }

    pub fn rain(self, intensity: RainIntensity) -> &'static str {
        match (self, intensity) {
            (Self::English, RainIntensity::None) => "None",
            (Self::English, RainIntensity::Light) => "Light",
            (Self::English, RainIntensity::Moderate) => "Moderate",
            (Self::English, RainIntensity::Heavy) => "Heavy",
            (Self::Portuguese, RainIntensity::None) => "Nenhuma",
            (Self::Portuguese, RainIntensity::Light) => "Leve",
            (Self::Portuguese, RainIntensity::Moderate) => "Moderada",
            (Self::Portuguese, RainIntensity::Heavy) => "Pesada",
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WaterLevelMsg {
    pub level_category: &'static str,
}

impl WaterLevelMsg {
    pub fn new(level: WaterLevel, labels: LabelSet) -> Self {
        Self {
            level_category: labels.water(level),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RainfallMsg {
    pub intensity_category: &'static str,
}

impl RainfallMsg {
    pub fn new(intensity: RainIntensity, labels: LabelSet) -> Self {
        Self {
            intensity_category: labels.rain(intensity),
        }
    }
}

const ALERT_TYPE: &str = "imminent_flood_risk";
const ALERT_CAUSE: &str = "local_sensor_reading";

#[derive(Debug, Serialize)]
pub struct CriticalAlertMsg {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: AlertStatus,
    pub cause: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_cm: Option<f32>,
}

impl From<AlertTransition> for CriticalAlertMsg {
    fn from(t: AlertTransition) -> Self {
        let distance_cm = match t {
            AlertTransition::Activated { distance_cm } => Some(distance_cm),
            AlertTransition::Cleared => None,
        };
        Self {
            kind: ALERT_TYPE,
            status: t.status(),
            cause: ALERT_CAUSE,
            distance_cm,
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
    fn topics_share_prefix() {
        let t = Topics::new("flood_sentry");
        assert_eq!(t.water_level, "flood_sentry/sensor/water_level");
        assert_eq!(t.rainfall, "flood_sentry/sensor/rainfall");
        assert_eq!(t.critical_status, "flood_sentry/alert/critical_status");
        assert_eq!(t.command, "flood_sentry/command/alert_status");
    }

    #[test]
    fn water_level_msg_shape() {
        let json = serde_json::to_value(WaterLevelMsg::new(WaterLevel::High, LabelSet::English)).unwrap();
        assert_eq!(json, serde_json::json!({ "level_category": "High" }));
    }

    #[test]
    fn rainfall_msg_shape() {
        let json =
            serde_json::to_value(RainfallMsg::new(RainIntensity::Moderate, LabelSet::English)).unwrap();
        assert_eq!(json, serde_json::json!({ "intensity_category": "Moderate" }));
    }

    #[test]
    fn english_labels_match_category_names() {
        for level in [WaterLevel::Low, WaterLevel::Medium, WaterLevel::High] {
            assert_eq!(LabelSet::English.water(level), level.to_string());
        }
        for rain in [
            RainIntensity::None,
            RainIntensity::Light,
            RainIntensity::Moderate,
            RainIntensity::Heavy,
        ] {
            assert_eq!(LabelSet::English.rain(rain), rain.to_string());
        }
    }

    #[test]
    fn portuguese_labels_for_hub() {
        let pt = LabelSet::Portuguese;
        assert_eq!(
            [WaterLevel::Low, WaterLevel::Medium, WaterLevel::High].map(|l| pt.water(l)),
            ["Baixo", "Medio", "Alto"]
        );
        assert_eq!(
            [
                RainIntensity::None,
                RainIntensity::Light,
                RainIntensity::Moderate,
                RainIntensity::Heavy
            ]
            .map(|r| pt.rain(r)),
            ["Nenhuma", "Leve", "Moderada", "Pesada"]
        );
        let json = serde_json::to_value(WaterLevelMsg::new(WaterLevel::Medium, pt)).unwrap();
        assert_eq!(json, serde_json::json!({ "level_category": "Medio" }));
    }

    #[test]
    fn label_set_aliases() {
        #[derive(Deserialize)]
        struct Wrap {
            labels: LabelSet,
        }
        let w: Wrap = serde_json::from_str(r#"{"labels":"pt"}"#).unwrap();
        assert_eq!(w.labels, LabelSet::Portuguese);
        let w: Wrap = serde_json::from_str(r#"{"labels":"en"}"#).unwrap();
        assert_eq!(w.labels, LabelSet::English);
    }

    #[test]
    fn active_alert_carries_distance() {
        let msg = CriticalAlertMsg::from(AlertTransition::Activated { distance_cm: 5.5 });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "imminent_flood_risk",
                "status": "ACTIVE",
                "cause": "local_sensor_reading",
                "distance_cm": 5.5
            })
        );
    }

    #[test]
    fn cleared_alert_has_no_distance() {
        let json = serde_json::to_value(CriticalAlertMsg::from(AlertTransition::Cleared)).unwrap();
        assert_eq!(json["status"], "CLEARED");
        assert!(json.get("distance_cm").is_none());
        assert_eq!(json.as_object().unwrap().len(), 3);
    }
}
