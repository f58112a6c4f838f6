//! The control loop.
//!
//! One call to [`Node::tick`] is one iteration, always in this order:
//!
//! ```text
//! ensure session ─▶ sample distance ─▶ debounce rain ─▶ classify
//!        ─▶ publish telemetry (rate-limited) ─▶ indicators ─▶ alert edge
//! ```
//!
//! All mutable state lives in one [`DeviceState`] owned by the node.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::alert::{AlertTransition, RiskState};
use crate::classify::{classify_rain, classify_water, RainIntensity, WaterLevel};
use crate::command::parse_command;
use crate::config::{Config, Thresholds};
use crate::feedback::{FeedbackInput, IndicatorPanel, Indicators};
use crate::link::{Channel, ChannelSession, Connectivity, Inbound, NetworkLink};
use crate::rain::{RainDebounceState, RainInput};
use crate::range::RangeSensor;
use crate::telemetry::{CriticalAlertMsg, LabelSet, RainfallMsg, Topics, WaterLevelMsg};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub rain: RainDebounceState,
    pub risk: RiskState,
    pub session: ChannelSession,
}

/// One tick's reading.  Immutable once taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub distance_cm: f32,
    pub rain_count: u32,
}

/// What a tick observed and did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub sample: SensorSample,
    pub new_rain_event: bool,
    pub water: WaterLevel,
    pub rain: RainIntensity,
    pub telemetry_published: bool,
    pub transition: Option<AlertTransition>,
    pub alert_active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub ticks: u64,
    pub telemetry_published: u64,
    pub alerts_published: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
}

/// Loop tunables, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub thresholds: Thresholds,
    pub labels: LabelSet,
    pub publish_interval_ms: u32,
    pub debounce_ms: u32,
    pub status_log_interval_ms: u32,
    pub associate_timeout: Duration,
    pub associate_poll: Duration,
}

impl From<&Config> for NodeSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            thresholds: cfg.thresholds.clone(),
            labels: cfg.telemetry.labels,
            publish_interval_ms: cfg.timing.publish_interval_ms,
            debounce_ms: cfg.timing.debounce_ms,
            status_log_interval_ms: cfg.timing.status_log_interval_ms,
            associate_timeout: Duration::from_millis(cfg.network.associate_timeout_ms),
            associate_poll: Duration::from_millis(cfg.network.poll_interval_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node<S, R, L, C, P> {
    settings: NodeSettings,
    topics: Topics,
    range: S,
    rain: R,
    conn: Connectivity<L, C>,
    panel: P,
    state: DeviceState,
    stats: NodeStats,
    last_status_ms: u32,
}

impl<S, R, L, C, P> Node<S, R, L, C, P>
where
    S: RangeSensor,
    R: RainInput,
    L: NetworkLink,
    C: Channel,
    P: IndicatorPanel,
{
    pub fn new(
        settings: NodeSettings,
        topics: Topics,
        range: S,
        rain: R,
        conn: Connectivity<L, C>,
        panel: P,
    ) -> Self {
        Self {
            settings,
            topics,
            range,
            rain,
            conn,
            panel,
            state: DeviceState::default(),
            stats: NodeStats::default(),
            last_status_ms: 0,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn channel(&self) -> &C {
        self.conn.channel()
    }

    pub fn channel_mut(&mut self) -> &mut C {
        self.conn.channel_mut()
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    /// Boot-time network join.  Returns whether the node is online.
    pub async fn boot(&mut self) -> bool {
        let online = self
            .conn
            .associate(
                &mut self.state.session,
                &mut self.panel,
                self.settings.associate_timeout,
                self.settings.associate_poll,
            )
            .await;
        info!(
            online,
            water_topic = %self.topics.water_level,
            command_topic = %self.topics.command,
            "node booted"
        );
        online
    }

    /// Run one loop iteration at tick time `now_ms`.
    pub async fn tick(&mut self, now_ms: u32) -> TickOutcome {
        // 1. Session.
        let inbound = self
            .conn
            .ensure(&mut self.state.session, &mut self.panel)
            .await;
        for msg in inbound {
            self.handle_inbound(msg);
        }

        // 2-3. Sample + debounce.
        let distance_cm = self.range.measure();
        let raw = self.rain.is_pressed();
        let new_rain_event = self
            .state
            .rain
            .update(raw, now_ms, self.settings.debounce_ms);
        let sample = SensorSample {
            distance_cm,
            rain_count: self.state.rain.accumulated_count,
        };
        if new_rain_event {
            info!(count = sample.rain_count, "rain gauge tip");
        }

        // 4. Classify.
        let t = &self.settings.thresholds;
        let water = classify_water(sample.distance_cm, t);
        let rain = classify_rain(sample.rain_count, t);
        debug!(distance_cm = sample.distance_cm, rain_count = sample.rain_count, %water, %rain, "sample");

        // 5. Telemetry.
        let telemetry_published = self.publish_telemetry(now_ms, water, rain);

        // 6. Indicators.
        let indicators = Indicators::derive(&FeedbackInput {
            network_associated: self.state.session.network_associated,
            channel_connected: self.state.session.channel_connected,
            water,
            rain,
            alert_active: self.state.risk.alert_active(),
        });
        indicators.render(&mut self.panel, now_ms);

        // 7. Alert edge.
        let transition = self
            .state
            .risk
            .evaluate(sample.distance_cm, self.settings.thresholds.critical_cm);
        if let Some(t) = transition {
            self.publish_alert(t);
        }

        self.stats.ticks += 1;
        self.maybe_log_status(now_ms, water, rain);

        TickOutcome {
            sample,
            new_rain_event,
            water,
            rain,
            telemetry_published,
            transition,
            alert_active: self.state.risk.alert_active(),
        }
    }

    fn handle_inbound(&mut self, msg: Inbound) {
        if msg.topic != self.topics.command {
            debug!(topic = %msg.topic, "ignoring message on unexpected topic");
            return;
        }
        match parse_command(&msg.payload) {
            Ok(cmd) => {
                let flag = cmd.remote_flag();
                if flag != self.state.risk.remote_flag {
                    info!(?cmd, remote_flag = flag, "remote risk updated");
                }
                self.state.risk.set_remote(flag);
                self.stats.commands_accepted += 1;
            }
            Err(e) => {
                warn!(
                    remote_flag = self.state.risk.remote_flag,
                    "{e}; keeping current remote flag"
                );
                self.stats.commands_rejected += 1;
            }
        }
    }

    fn publish_telemetry(&mut self, now_ms: u32, water: WaterLevel, rain: RainIntensity) -> bool {
        let session = &self.state.session;
        if !session.online() || !session.telemetry_due(now_ms, self.settings.publish_interval_ms) {
            return false;
        }
        self.state.session.last_publish_ms = now_ms;

        let session = &self.state.session;
        let water_ok = self.conn.publish(
            session,
            &self.topics.water_level,
            &WaterLevelMsg::new(water, self.settings.labels),
        );
        let rain_ok = self.conn.publish(
            session,
            &self.topics.rainfall,
            &RainfallMsg::new(rain, self.settings.labels),
        );
        if water_ok && rain_ok {
            self.stats.telemetry_published += 1;
        }
        water_ok || rain_ok
    }

    fn publish_alert(&mut self, transition: AlertTransition) {
        match transition {
            AlertTransition::Activated { distance_cm } => {
                warn!(distance_cm, "critical flood risk ACTIVE");
            }
            AlertTransition::Cleared => info!("critical flood risk CLEARED"),
        }
        // The local state has already moved; a skipped or failed publish does
        // not roll it back.
        if self.conn.publish(
            &self.state.session,
            &self.topics.critical_status,
            &CriticalAlertMsg::from(transition),
        ) {
            self.stats.alerts_published += 1;
        }
    }

    fn maybe_log_status(&mut self, now_ms: u32, water: WaterLevel, rain: RainIntensity) {
        if now_ms.wrapping_sub(self.last_status_ms) < self.settings.status_log_interval_ms {
            return;
        }
        self.last_status_ms = now_ms;
        let s = &self.stats;
        info!(
            ticks = s.ticks,
            telemetry = s.telemetry_published,
            alerts = s.alerts_published,
            commands_ok = s.commands_accepted,
            commands_bad = s.commands_rejected,
            reconnects = self.state.session.reconnects,
            online = self.state.session.network_associated,
            connected = self.state.session.channel_connected,
            %water,
            %rain,
            alert_active = self.state.risk.alert_active(),
            "status"
        );
    }
}

// ===========================================================================
// Tests
// ===========================================================================
