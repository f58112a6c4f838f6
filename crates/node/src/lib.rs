//! Flood-risk sensing node.
//!
//! Samples an ultrasonic range sensor (distance to the water surface) and a
//! tipping-bucket rain gauge, classifies both, publishes the categories over
//! MQTT and raises a critical alert when the water gets too close.

pub mod alert;
pub mod classify;
pub mod command;
pub mod config;
pub mod feedback;
pub mod link;
pub mod node;
pub mod rain;
pub mod range;
#[cfg(feature = "sim")]
pub mod sim;
pub mod telemetry;

pub use alert::{AlertStatus, AlertTransition, RiskState};
pub use classify::{RainIntensity, WaterLevel};
pub use config::Config;
pub use node::{DeviceState, Node, NodeSettings, TickOutcome};
