use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flood_sentry_node::config::{self, Config};
use flood_sentry_node::feedback::IndicatorPanel;
use flood_sentry_node::link::{mqtt_options, Channel, Connectivity, HostLink, MqttChannel, NetworkLink};
use flood_sentry_node::node::{Node, NodeSettings};
use flood_sentry_node::rain::RainInput;
use flood_sentry_node::range::RangeSensor;
use flood_sentry_node::telemetry::Topics;

#[cfg(not(any(feature = "sim", feature = "gpio")))]
compile_error!("enable at least one of the `sim` or `gpio` features");

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::resolve()?;

    // ── Network + broker ────────────────────────────────────────────
    let link = HostLink::new(
        &cfg.mqtt.host,
        cfg.mqtt.port,
        Duration::from_millis(cfg.network.poll_interval_ms),
        Duration::from_millis(cfg.network.recheck_interval_ms),
        Duration::from_millis(cfg.network.check_timeout_ms),
    );
    let options = mqtt_options(
        &cfg.node_id,
        &cfg.mqtt.host,
        cfg.mqtt.port,
        Duration::from_secs(cfg.mqtt.keep_alive_s),
    );
    let channel = MqttChannel::spawn(options, Duration::from_millis(cfg.mqtt.connect_timeout_ms));

    start(&cfg, link, channel).await
}

#[cfg(feature = "gpio")]
async fn start(cfg: &Config, link: HostLink, channel: MqttChannel) -> Result<()> {
    use flood_sentry_node::feedback::GpioPanel;
    use flood_sentry_node::rain::RainGauge;
    use flood_sentry_node::range::Hcsr04;

    let gpio = rppal::gpio::Gpio::new()?;
    let range = Hcsr04::new(&gpio, cfg.gpio.trigger, cfg.gpio.echo)?;
    let rain = RainGauge::new(&gpio, cfg.gpio.rain_gauge)?;
    let panel = GpioPanel::new(&gpio, &cfg.gpio)?;
    info!("using gpio sensors");
    run(cfg, range, rain, link, channel, panel).await
}

#[cfg(all(feature = "sim", not(feature = "gpio")))]
async fn start(cfg: &Config, link: HostLink, channel: MqttChannel) -> Result<()> {
    use flood_sentry_node::feedback::LogPanel;
    use flood_sentry_node::sim::{RainGaugeSim, Scenario, WaterSurfaceSim};

    let scenario = Scenario::from_str_lossy(&cfg.sim.scenario);
    info!(%scenario, "using simulated sensors");
    let range = WaterSurfaceSim::new(scenario);
    let rain = RainGaugeSim::new(scenario);
    run(cfg, range, rain, link, channel, LogPanel::new()).await
}

async fn run<S, R, L, C, P>(cfg: &Config, range: S, rain: R, link: L, channel: C, panel: P) -> Result<()>
where
    S: RangeSensor,
    R: RainInput,
    L: NetworkLink,
    C: Channel,
    P: IndicatorPanel,
{
    let topics = Topics::new(&cfg.topic_prefix);
    let conn = Connectivity::new(
        link,
        channel,
        topics.command.clone(),
        Duration::from_millis(cfg.mqtt.retry_interval_ms),
    );
    let mut node = Node::new(NodeSettings::from(cfg), topics, range, rain, conn, panel);

    let clock = Instant::now();
    node.boot().await;

    let mut ticker = interval(Duration::from_millis(cfg.timing.loop_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        // Millisecond tick counter; wraps after ~49 days like a firmware millis().
        let now_ms = clock.elapsed().as_millis() as u32;
        node.tick(now_ms).await;
    }
}
