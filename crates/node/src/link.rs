//! Connectivity: network association and the MQTT session.
//!
//! Two lifecycles:
//!
//! 1. **Association** runs once at boot under a bounded timeout.  On timeout
//!    the node carries on offline; every network-path step becomes a no-op
//!    until the link reports associated on a later tick.
//! 2. **Session** is checked every tick.  If the link is up but the broker
//!    session is down, [`Connectivity::ensure`] enters the reconnect loop and
//!    does not return until the broker accepts a connection.  This is the
//!    only place the control loop suspends.
//!
//! The rumqttc event loop runs in its own task but only dials the broker when
//! asked to, so retry pacing stays here.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::feedback::{IndicatorPanel, Led};

/// Indicator toggle step while waiting to associate or to retry.
const WAIT_BLINK_STEP: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Network association (Wi-Fi join, link up, ...).
pub trait NetworkLink {
    /// Start joining.  Does not wait.
    fn begin(&mut self);

    /// Current association status.  Called every tick, so it must not block.
    fn is_associated(&mut self) -> bool;
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session with the broker.
#[allow(async_fn_in_trait)]
pub trait Channel {
    fn is_connected(&self) -> bool;

    /// One connection attempt.  `Ok` once the broker has accepted it.
    async fn connect(&mut self) -> Result<()>;

    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Fire-and-forget publish.  Never queues for later.
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Take inbound messages received since the last call and refresh the
    /// connection status.
    fn drain(&mut self) -> Vec<Inbound>;
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Owned by the device state, mutated only through [`Connectivity`].
#[derive(Debug, Clone, Default)]
pub struct ChannelSession {
    pub network_associated: bool,
    pub channel_connected: bool,
    pub last_publish_ms: u32,
    pub reconnects: u32,
}

impl ChannelSession {
    /// Both the network and the broker session are up.
    pub fn online(&self) -> bool {
        self.network_associated && self.channel_connected
    }

    /// Wraparound-safe telemetry rate limit.
    pub fn telemetry_due(&self, now_ms: u32, interval_ms: u32) -> bool {
        now_ms.wrapping_sub(self.last_publish_ms) >= interval_ms
    }
}

// ---------------------------------------------------------------------------
// Connectivity manager
// ---------------------------------------------------------------------------

pub struct Connectivity<L, C> {
    link: L,
    channel: C,
    command_topic: String,
    retry_interval: Duration,
}

impl<L: NetworkLink, C: Channel> Connectivity<L, C> {
    pub fn new(link: L, channel: C, command_topic: String, retry_interval: Duration) -> Self {
        Self {
            link,
            channel,
            command_topic,
            retry_interval,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Join the network, toggling the network LED while waiting.  Gives up
    /// silently after `limit`.
    pub async fn associate<P: IndicatorPanel>(
        &mut self,
        session: &mut ChannelSession,
        panel: &mut P,
        limit: Duration,
        poll: Duration,
    ) -> bool {
        info!(timeout_ms = limit.as_millis() as u64, "associating with network");
        self.link.begin();
        let started = Instant::now();

        while !self.link.is_associated() {
            if started.elapsed() >= limit {
                warn!(
                    timeout_ms = limit.as_millis() as u64,
                    "network association timed out; running offline"
                );
                panel.set(Led::Network, false);
                session.network_associated = false;
                return false;
            }
            panel.toggle(Led::Network);
            sleep(poll).await;
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "network associated"
        );
        session.network_associated = true;
        true
    }

    /// Per-tick session check.  Returns inbound messages to dispatch.
    ///
    /// Blocks in the reconnect loop while the network is up and the broker
    /// session is down.
    pub async fn ensure<P: IndicatorPanel>(
        &mut self,
        session: &mut ChannelSession,
        panel: &mut P,
    ) -> Vec<Inbound> {
        let associated = self.link.is_associated();
        if associated != session.network_associated {
            info!(associated, "network status changed");
        }
        session.network_associated = associated;

        let inbound = self.channel.drain();
        session.channel_connected = self.channel.is_connected();

        if associated && !session.channel_connected {
            self.reconnect(session, panel).await;
        }
        inbound
    }

    async fn reconnect<P: IndicatorPanel>(&mut self, session: &mut ChannelSession, panel: &mut P) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            info!(attempt, "connecting to broker");

            match self.channel.connect().await {
                Ok(()) => {
                    if let Err(e) = self.channel.subscribe(&self.command_topic) {
                        error!(topic = %self.command_topic, "subscribe failed: {e:#}");
                    }
                    session.channel_connected = true;
                    session.reconnects = session.reconnects.wrapping_add(1);
                    info!(attempt, topic = %self.command_topic, "broker connected, subscribed");
                    return;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        retry_ms = self.retry_interval.as_millis() as u64,
                        "broker connect failed: {e:#}"
                    );
                    self.wait_blinking(panel).await;
                }
            }
        }
    }

    async fn wait_blinking<P: IndicatorPanel>(&self, panel: &mut P) {
        let mut waited = Duration::ZERO;
        while waited < self.retry_interval {
            panel.toggle(Led::Network);
            let step = WAIT_BLINK_STEP.min(self.retry_interval - waited);
            sleep(step).await;
            waited += step;
        }
    }

    /// Serialize and publish.  Skipped when offline; failures are logged
    /// and dropped.
    pub fn publish<T: Serialize>(
        &mut self,
        session: &ChannelSession,
        topic: &str,
        msg: &T,
    ) -> bool {
        if !session.online() {
            debug!(topic, "offline; publish skipped");
            return false;
        }
        let payload = match serde_json::to_vec(msg) {
            Ok(p) => p,
            Err(e) => {
                error!(topic, "serialize failed: {e}");
                return false;
            }
        };
        match self.channel.publish(topic, payload) {
            Ok(()) => true,
            Err(e) => {
                error!(topic, "publish failed: {e:#}");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Host network link
// ---------------------------------------------------------------------------

/// Treats "the broker address resolves and is routable" as associated.
///
/// Checks run in a spawned task under `check_timeout`; `is_associated` only
/// collects finished results, so a hung resolver never stalls the loop.
/// Re-checks every `offline_interval` while down and every `online_interval`
/// while up, so a lost network is noticed.
pub struct HostLink {
    host: String,
    port: u16,
    offline_interval: Duration,
    online_interval: Duration,
    check_timeout: Duration,
    last_check: Option<Instant>,
    pending: Option<oneshot::Receiver<bool>>,
    associated: bool,
}

impl HostLink {
    pub fn new(
        host: &str,
        port: u16,
        offline_interval: Duration,
        online_interval: Duration,
        check_timeout: Duration,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            offline_interval,
            online_interval,
            check_timeout,
            last_check: None,
            pending: None,
            associated: false,
        }
    }

    fn start_check(&mut self) {
        let (tx, rx) = oneshot::channel();
        let host = self.host.clone();
        let port = self.port;
        let limit = self.check_timeout;
        tokio::spawn(async move {
            let reachable = timeout(limit, route_reachable(&host, port))
                .await
                .unwrap_or(false);
            let _ = tx.send(reachable);
        });
        self.pending = Some(rx);
        self.last_check = Some(Instant::now());
    }

    /// Take the result of a finished check.  `false` while one is in flight.
    fn collect(&mut self) -> bool {
        let Some(rx) = self.pending.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Ok(reachable) => {
                if reachable != self.associated {
                    debug!(host = %self.host, reachable, "link check changed");
                }
                self.associated = reachable;
                self.pending = None;
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => false,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                true
            }
        }
    }
}

/// Resolve the broker and check the host has a route to it.  Connecting a
/// UDP socket sends nothing; it fails when no route exists.
async fn route_reachable(host: &str, port: u16) -> bool {
    let addr = match lookup_host((host, port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => return false,
        },
        Err(_) => return false,
    };
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    match UdpSocket::bind(local).await {
        Ok(socket) => socket.connect(addr).await.is_ok(),
        Err(_) => false,
    }
}

impl NetworkLink for HostLink {
    fn begin(&mut self) {
        debug!(host = %self.host, port = self.port, "checking broker address");
        if self.pending.is_none() {
            self.start_check();
        }
    }

    fn is_associated(&mut self) -> bool {
        if !self.collect() {
            return self.associated;
        }
        let interval = if self.associated {
            self.online_interval
        } else {
            self.offline_interval
        };
        if self.last_check.map_or(true, |at| at.elapsed() >= interval) {
            self.start_check();
        }
        self.associated
    }
}

// ---------------------------------------------------------------------------
// MQTT channel (rumqttc)
// ---------------------------------------------------------------------------

/// Driver report, tagged with the dial request it belongs to.
#[derive(Debug)]
enum DriverEvent {
    Connected { attempt: u64 },
    Disconnected { attempt: u64, reason: String },
    Message(Inbound),
}

pub struct MqttChannel {
    client: AsyncClient,
    events: mpsc::UnboundedReceiver<DriverEvent>,
    dials: mpsc::UnboundedSender<u64>,
    attempt: u64,
    connected: bool,
    connect_timeout: Duration,
    pending: Vec<Inbound>,
}

impl MqttChannel {
    /// Build the client and spawn its event-loop driver.  Must be called
    /// inside a tokio runtime.  No connection is attempted until
    /// [`Channel::connect`].
    pub fn spawn(options: MqttOptions, connect_timeout: Duration) -> Self {
        let (client, eventloop) = AsyncClient::new(options, 20);
        let (tx, rx) = mpsc::unbounded_channel();
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(eventloop, tx, dial_rx));

        Self {
            client,
            events: rx,
            dials: dial_tx,
            attempt: 0,
            connected: false,
            connect_timeout,
            pending: Vec::new(),
        }
    }

    /// Wait for the current attempt's outcome.  Reports left over from
    /// earlier attempts are dropped.
    async fn wait_for_connack(&mut self) -> Result<()> {
        loop {
            match self.events.recv().await {
                Some(DriverEvent::Connected { attempt }) if attempt == self.attempt => return Ok(()),
                Some(DriverEvent::Disconnected { attempt, reason }) if attempt == self.attempt => {
                    bail!("{reason}")
                }
                Some(DriverEvent::Message(m)) => self.pending.push(m),
                Some(stale) => debug!(?stale, "dropping report from an earlier attempt"),
                None => bail!("mqtt driver stopped"),
            }
        }
    }
}

impl Channel for MqttChannel {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        self.attempt += 1;
        self.connected = false;
        self.dials
            .send(self.attempt)
            .map_err(|_| anyhow!("mqtt driver stopped"))?;

        let limit = self.connect_timeout;
        match timeout(limit, self.wait_for_connack()).await {
            Ok(Ok(())) => {
                self.connected = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("no CONNACK within {} ms", limit.as_millis())),
        }
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| anyhow!("subscribe {topic}: {e}"))
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| anyhow!("publish {topic}: {e}"))
    }

    fn drain(&mut self) -> Vec<Inbound> {
        let mut out = std::mem::take(&mut self.pending);
        while let Ok(event) = self.events.try_recv() {
            match event {
                DriverEvent::Connected { attempt } if attempt == self.attempt => self.connected = true,
                DriverEvent::Disconnected { attempt, reason } if attempt == self.attempt => {
                    if self.connected {
                        warn!(%reason, "broker connection lost");
                    }
                    self.connected = false;
                }
                DriverEvent::Message(m) => out.push(m),
                _ => {}
            }
        }
        out
    }
}

/// Wait for a dial request and collapse any backlog to the newest one.
async fn next_dial(dials: &mut mpsc::UnboundedReceiver<u64>) -> Option<u64> {
    let mut latest = dials.recv().await?;
    while let Ok(attempt) = dials.try_recv() {
        latest = attempt;
    }
    Some(latest)
}

/// Poll the rumqttc event loop on behalf of the latest dial request.
///
/// After an error it parks until the next request, so the client never
/// redials on its own.  A request that arrives while a dial is still in
/// flight abandons that dial and starts a fresh one.
async fn drive(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<DriverEvent>,
    mut dials: mpsc::UnboundedReceiver<u64>,
) {
    let Some(mut attempt) = next_dial(&mut dials).await else {
        return;
    };
    let mut connected = false;

    loop {
        let polled = tokio::select! {
            biased;
            dial = next_dial(&mut dials) => {
                let Some(next) = dial else { return };
                attempt = next;
                if connected && events.send(DriverEvent::Connected { attempt }).is_err() {
                    return;
                }
                continue;
            }
            polled = eventloop.poll() => polled,
        };

        let event = match polled {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                DriverEvent::Connected { attempt }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => DriverEvent::Message(Inbound {
                topic: p.topic.clone(),
                payload: p.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected = false;
                DriverEvent::Disconnected {
                    attempt,
                    reason: "broker sent DISCONNECT".to_string(),
                }
            }
            Ok(_) => continue,
            Err(e) => {
                connected = false;
                let report = DriverEvent::Disconnected {
                    attempt,
                    reason: e.to_string(),
                };
                if events.send(report).is_err() {
                    return;
                }
                match next_dial(&mut dials).await {
                    Some(next) => attempt = next,
                    None => return,
                }
                continue;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

/// MQTT options for this node.
pub fn mqtt_options(node_id: &str, host: &str, port: u16, keep_alive: Duration) -> MqttOptions {
    let mut options = MqttOptions::new(format!("flood-sentry-{node_id}"), host, port);
    options.set_keep_alive(keep_alive);
    options
}

// ===========================================================================
// Tests
// ===========================================================================
