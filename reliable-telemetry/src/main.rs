//! Entry point for `reliable-telemetry`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, signal handling, argument parsing) and the
//! simulated vessel that feeds the sender.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::time::MissedTickBehavior;

use reliable_telemetry::{
    Event, EventStream, Receiver, ReceiverConfig, Sender, SenderConfig, SimulatorConfig,
    TelemetryRecord,
};

/// Acknowledged, gap-filling telemetry over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Simulate a moving vessel and stream its telemetry.
    Send {
        /// Receiver address.
        #[arg(short, long, default_value = "127.0.0.1:12345")]
        target: SocketAddr,
        /// Milliseconds between records.
        #[arg(short, long, default_value_t = 1000)]
        interval: u64,
        /// Milliseconds between position updates.
        #[arg(short, long, default_value_t = 3000)]
        movement: u64,
        /// Milliseconds to wait for an ack before resending.
        #[arg(long, default_value_t = 3000)]
        ack_timeout: u64,
        /// Resends per record before giving up.
        #[arg(long, default_value_t = 3)]
        max_retx: u32,
        /// Fire and forget: no acks, no retransmission.
        #[arg(long)]
        unreliable: bool,
        /// Stop after this many records.
        #[arg(short, long)]
        count: Option<u64>,
        #[command(flatten)]
        fault: FaultArgs,
    },
    /// Listen for telemetry, ack it and fill gaps.
    Receive {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:12345")]
        bind: SocketAddr,
        /// Records kept for gap detection and interpolation.
        #[arg(long, default_value_t = 1000)]
        capacity: usize,
        /// Milliseconds a gap may stay open before it is filled.
        #[arg(long, default_value_t = 5000)]
        packet_timeout: u64,
        /// Repeat the last valid record instead of interpolating.
        #[arg(long)]
        no_interpolation: bool,
        /// Seconds between statistics lines.
        #[arg(long, default_value_t = 10)]
        stats_every: u64,
        #[command(flatten)]
        fault: FaultArgs,
    },
}

/// Outbound fault injection.
#[derive(Args)]
struct FaultArgs {
    /// Probability of dropping an outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability of duplicating an outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// RNG seed for reproducible faults.
    #[arg(long)]
    seed: Option<u64>,
}

impl FaultArgs {
    fn into_config(self) -> Option<SimulatorConfig> {
        if self.loss <= 0.0 && self.duplicate <= 0.0 {
            return None;
        }
        Some(SimulatorConfig {
            loss_rate: self.loss,
            duplicate_rate: self.duplicate,
            seed: self.seed,
        })
    }
}

/// Simulated vessel position.
struct Vessel {
    latitude: f64,
    longitude: f64,
    speed: f64,
}

impl Vessel {
    const STEP: f64 = 0.01;

    fn new() -> Self {
        Self {
            latitude: 39.0,
            longitude: 35.5,
            speed: 25.0,
        }
    }

    fn advance(&mut self) {
        self.latitude += Self::STEP;
        self.longitude += Self::STEP;
    }

    fn record(&self) -> TelemetryRecord {
        TelemetryRecord::new(self.latitude, self.longitude, self.speed, "OK")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            target,
            interval,
            movement,
            ack_timeout,
            max_retx,
            unreliable,
            count,
            fault,
        } => {
            let config = SenderConfig {
                target,
                reliability_enabled: !unreliable,
                ack_timeout: Duration::from_millis(ack_timeout),
                max_retransmissions: max_retx,
                fault: fault.into_config(),
                ..SenderConfig::default()
            };
            run_sender(
                config,
                Duration::from_millis(interval),
                Duration::from_millis(movement),
                count,
            )
            .await
        }
        Mode::Receive {
            bind,
            capacity,
            packet_timeout,
            no_interpolation,
            stats_every,
            fault,
        } => {
            let config = ReceiverConfig {
                bind,
                interpolation_enabled: !no_interpolation,
                buffer_capacity: capacity,
                packet_timeout: Duration::from_millis(packet_timeout),
                fault: fault.into_config(),
                ..ReceiverConfig::default()
            };
            run_receiver(config, Duration::from_secs(stats_every.max(1))).await
        }
    }
}

async fn run_sender(
    config: SenderConfig,
    interval: Duration,
    movement: Duration,
    count: Option<u64>,
) -> anyhow::Result<()> {
    let target = config.target;
    let (sender, mut events) = Sender::start(config)
        .await
        .context("starting sender")?;
    log::info!("Sending telemetry from {} to {target}", sender.local_addr());

    let mut vessel = Vessel::new();
    let mut send_tick = tokio::time::interval(interval.max(Duration::from_millis(1)));
    let mut move_tick = tokio::time::interval(movement.max(Duration::from_millis(1)));
    send_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    move_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval fires immediately; keep the start position.
    move_tick.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut sent = 0u64;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Interrupted");
                break;
            }
            _ = send_tick.tick() => {
                if count.is_some_and(|n| sent >= n) {
                    break;
                }
                sender.send(vessel.record())?;
                sent += 1;
            }
            _ = move_tick.tick() => vessel.advance(),
            Some(event) = events.recv() => log_sender_event(event),
        }
    }

    let stats = sender.statistics();
    let pending = sender.pending_acks().await.unwrap_or(0);
    sender.stop().await;
    log::info!("Final: {stats}, pending={pending}");
    Ok(())
}

fn log_sender_event(event: Event) {
    match event {
        Event::AckReceived(seq) => log::debug!("ACK seq={seq}"),
        Event::PacketTimeout(seq) => log::warn!("No ack for seq={seq}, giving up"),
        Event::TransportError(msg) => log::warn!("Transport error: {msg}"),
        _ => {}
    }
}

async fn run_receiver(config: ReceiverConfig, stats_every: Duration) -> anyhow::Result<()> {
    let bind = config.bind;
    let (receiver, mut events) = Receiver::start(config)
        .await
        .with_context(|| format!("listening on {bind}"))?;

    let mut stats_tick = tokio::time::interval(stats_every);
    stats_tick.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Interrupted");
                break;
            }
            _ = stats_tick.tick() => log::info!("Stats: {}", receiver.statistics()),
            event = events.recv() => {
                if !log_receiver_event(event) {
                    break;
                }
            }
        }
    }

    let stats = receiver.statistics();
    receiver.stop().await;
    drain(&mut events);
    log::info!("Final: {stats}");
    Ok(())
}

/// Returns `false` once the receiver has gone away.
fn log_receiver_event(event: Option<Event>) -> bool {
    match event {
        Some(Event::TelemetryReceived(r)) => {
            log::info!(
                "#{} lat={:.4} lon={:.4} speed={:.1} status={}",
                r.sequence_number,
                r.latitude,
                r.longitude,
                r.speed,
                r.status
            );
            true
        }
        Some(Event::ConnectionStatusChanged(false)) | None => false,
        Some(Event::TransportError(msg)) => {
            log::warn!("Transport error: {msg}");
            true
        }
        Some(_) => true,
    }
}

fn drain(events: &mut EventStream) {
    while let Ok(event) = events.try_recv() {
        log_receiver_event(Some(event));
    }
}
