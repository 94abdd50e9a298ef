//! Sending side: sequencing, acknowledgement tracking, retransmission.
//!
//! # Architecture
//!
//! ```text
//!  Sender (handle)                    event_loop task
//!  ┌───────────────┐   Command    ┌──────────────────────────────┐
//!  │ send()        │─────────────▶│ SenderCore                   │
//!  │ set_*()       │  (mpsc)      │  ├── next_seq                │
//!  │ pending_acks()│              │  └── PendingAckTable         │
//!  └───────────────┘              │ Socket ◀── acks              │
//!          ▲                      │ sweep timer ── retransmit    │
//!          │ Event (mpsc)         └──────────────┬───────────────┘
//!          └─────────────────────────────────────┘
//! ```
//!
//! The task is the only owner of the pending-ack table, so the ack path and
//! the timeout sweep never race.  [`SenderCore`] mutates state and hands back
//! the bytes to put on the wire; the loop does the I/O afterwards.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::event::{Event, EventSink, EventStream};
use crate::pending::PendingAckTable;
use crate::record::{now_millis, TelemetryRecord};
use crate::simulator::{transmit, Simulator};
use crate::socket::{Socket, SocketError};
use crate::state::{SessionError, SessionState};
use crate::stats::{Statistics, StatsSnapshot};
use crate::timer::sweep_timer;
use crate::wire::Datagram;

// ---------------------------------------------------------------------------
// SenderCore — state without I/O
// ---------------------------------------------------------------------------

struct SenderCore {
    /// Sequence number for the next record; the first record gets 1.
    next_seq: u32,
    pending: PendingAckTable,
    config: SenderConfig,
    stats: Arc<Statistics>,
    events: EventSink,
}

impl SenderCore {
    fn new(config: SenderConfig, stats: Arc<Statistics>, events: EventSink) -> Self {
        Self {
            next_seq: 1,
            pending: PendingAckTable::new(),
            config,
            stats,
            events,
        }
    }

    /// Assign the next sequence number, the current time and the ack flag.
    fn stamp(&mut self, mut record: TelemetryRecord) -> TelemetryRecord {
        record.sequence_number = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        record.timestamp = now_millis();
        record.needs_ack = self.config.reliability_enabled;
        record
    }

    /// Bookkeeping after the first transmission of `record` succeeded.
    fn on_sent(&mut self, record: TelemetryRecord, payload: Vec<u8>, now: Instant) {
        self.stats.record_packet_sent();
        if record.needs_ack {
            self.pending.insert(record.sequence_number, payload, now);
        }
        self.emit_stats();
    }

    /// Returns `true` when `seq` retired a pending entry.
    fn on_ack(&mut self, seq: u32) -> bool {
        if !self.pending.acknowledge(seq) {
            return false;
        }
        self.stats.record_acknowledged();
        self.events.emit(Event::AckReceived(seq));
        self.emit_stats();
        true
    }

    /// Expire exhausted entries and return `(seq, bytes)` to resend.
    fn sweep(&mut self, now: Instant) -> Vec<(u32, Vec<u8>)> {
        let outcome =
            self.pending
                .sweep(now, self.config.ack_timeout, self.config.max_retransmissions);

        for &seq in &outcome.expired {
            log::warn!(
                "[sender] seq={seq} timed out after {} retransmission(s)",
                self.config.max_retransmissions
            );
            self.stats.record_timeout();
            self.events.emit(Event::PacketTimeout(seq));
        }
        if !outcome.expired.is_empty() {
            self.emit_stats();
        }
        outcome.retransmit
    }

    fn on_retransmitted(&mut self, seq: u32) {
        self.stats.record_retransmission();
        if let Some(entry) = self.pending.get(seq) {
            log::debug!(
                "[sender] → RETX seq={seq} (attempt {})",
                entry.retransmission_count
            );
        }
        self.emit_stats();
    }

    fn transport_error(&self, context: String) {
        log::warn!("[sender] {context}");
        self.events.emit(Event::TransportError(context));
    }

    fn emit_stats(&self) {
        self.events.emit(Event::StatisticsUpdated(self.stats.snapshot()));
    }
}

// ---------------------------------------------------------------------------
// Sender — public handle
// ---------------------------------------------------------------------------

enum Command {
    Send(TelemetryRecord),
    SetTarget(SocketAddr),
    SetAckTimeout(Duration),
    SetMaxRetransmissions(u32),
    SetReliability(bool),
    PendingAcks(oneshot::Sender<usize>),
    Stop,
}

/// Handle to a running sender session.
///
/// Dropping the handle stops the background task as well; [`Sender::stop`]
/// additionally waits for it to finish.
pub struct Sender {
    cmd_tx: mpsc::UnboundedSender<Command>,
    stats: Arc<Statistics>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Sender {
    /// Bind `config.bind` and start sending to `config.target`.
    pub async fn start(config: SenderConfig) -> Result<(Self, EventStream), SessionError> {
        let socket = Socket::bind(config.bind).await.map_err(|e| {
            log::warn!("[sender] failed to bind {}: {e}", config.bind);
            SessionError::Bind(e)
        })?;
        Ok(Self::with_socket(socket, config))
    }

    /// Start a session on an already-bound socket (e.g. one with a custom
    /// codec).  `config.bind` is ignored.
    pub fn with_socket(socket: Socket, config: SenderConfig) -> (Self, EventStream) {
        let (events, stream) = EventSink::channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Statistics::new());
        let local_addr = socket.local_addr;
        let sim = config.fault.clone().map(Simulator::new);

        log::info!(
            "[sender] bound {local_addr}, target {} (reliability {})",
            config.target,
            if config.reliability_enabled { "on" } else { "off" }
        );
        let core = SenderCore::new(config, Arc::clone(&stats), events);
        let task = tokio::spawn(event_loop(socket, core, sim, cmd_rx));

        (
            Self {
                cmd_tx,
                stats,
                local_addr,
                task,
            },
            stream,
        )
    }

    /// Address acks must be sent to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SessionState {
        if self.task.is_finished() {
            SessionState::Stopped
        } else {
            SessionState::Sending
        }
    }

    /// Queue `record` for transmission.
    ///
    /// Sequence number, timestamp and `needs_ack` are overwritten by the
    /// session.  Returns immediately; the outcome is reported through events.
    pub fn send(&self, record: TelemetryRecord) -> Result<(), SessionError> {
        self.command(Command::Send(record))
    }

    pub fn set_target(&self, target: SocketAddr) -> Result<(), SessionError> {
        self.command(Command::SetTarget(target))
    }

    pub fn set_ack_timeout(&self, timeout: Duration) -> Result<(), SessionError> {
        self.command(Command::SetAckTimeout(timeout))
    }

    pub fn set_max_retransmissions(&self, max: u32) -> Result<(), SessionError> {
        self.command(Command::SetMaxRetransmissions(max))
    }

    pub fn set_reliability_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(Command::SetReliability(enabled))
    }

    /// Number of records currently awaiting an ack.
    pub async fn pending_acks(&self) -> Result<usize, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::PendingAcks(tx))?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop both the socket and the sweep timer and wait for the task to end.
    /// In-flight records are discarded.
    pub async fn stop(self) {
        let _ = self.cmd_tx.send(Command::Stop);
        let _ = self.task.await;
    }

    fn command(&self, cmd: Command) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).map_err(|_| SessionError::Stopped)
    }
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

async fn event_loop(
    socket: Socket,
    mut core: SenderCore,
    mut sim: Option<Simulator>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut sweep = sweep_timer(core.config.sweep_interval);

    loop {
        tokio::select! {
            // ── Branch 1: application commands ───────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Send(record) => {
                        send_record(&socket, &mut core, sim.as_mut(), record).await;
                    }
                    Command::SetTarget(target) => {
                        log::info!("[sender] target set to {target}");
                        core.config.target = target;
                    }
                    Command::SetAckTimeout(timeout) => core.config.ack_timeout = timeout,
                    Command::SetMaxRetransmissions(max) => core.config.max_retransmissions = max,
                    Command::SetReliability(enabled) => core.config.reliability_enabled = enabled,
                    Command::PendingAcks(reply) => {
                        let _ = reply.send(core.pending.len());
                    }
                    Command::Stop => break,
                }
            }

            // ── Branch 2: incoming acks ──────────────────────────────────
            result = socket.recv_from() => match result {
                Ok((Datagram::Ack(ack), _)) => {
                    if core.on_ack(ack.sequence_number) {
                        log::debug!("[sender] ← ACK seq={}", ack.sequence_number);
                    }
                }
                Ok((Datagram::Telemetry(_), from)) => {
                    log::debug!("[sender] ignoring telemetry from {from}");
                }
                Err(SocketError::Wire(e)) => log::debug!("[sender] dropping datagram: {e}"),
                Err(e) => log::warn!("[sender] receive failed: {e}"),
            },

            // ── Branch 3: retransmission sweep ───────────────────────────
            _ = sweep.tick() => {
                let target = core.config.target;
                for (seq, bytes) in core.sweep(Instant::now()) {
                    match transmit(&socket, sim.as_mut(), &bytes, target).await {
                        Ok(()) => core.on_retransmitted(seq),
                        Err(e) => core.transport_error(format!("retransmit seq={seq} failed: {e}")),
                    }
                }
            }
        }
    }

    core.pending.clear();
    log::info!("[sender] stopped");
}

/// Stamp, encode and transmit one record; track it if it needs an ack.
async fn send_record(
    socket: &Socket,
    core: &mut SenderCore,
    sim: Option<&mut Simulator>,
    record: TelemetryRecord,
) {
    let record = core.stamp(record);
    let seq = record.sequence_number;
    let target = core.config.target;

    let sent = match socket.encode(&Datagram::Telemetry(record.clone())) {
        Ok(bytes) => transmit(socket, sim, &bytes, target).await.map(|()| bytes),
        Err(e) => Err(e),
    };
    match sent {
        Ok(bytes) => {
            log::debug!("[sender] → DATA seq={seq} to {target} ({} bytes)", bytes.len());
            core.on_sent(record, bytes, Instant::now());
        }
        Err(e) => core.transport_error(format!("send seq={seq} to {target} failed: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn core(config: SenderConfig) -> (SenderCore, EventStream) {
        let (events, stream) = EventSink::channel();
        (
            SenderCore::new(config, Arc::new(Statistics::new()), events),
            stream,
        )
    }

    fn drain(stream: &mut EventStream) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(e) = stream.try_recv() {
            out.push(e);
        }
        out
    }

    fn send(core: &mut SenderCore, now: Instant) -> u32 {
        let r = core.stamp(TelemetryRecord::new(1.0, 2.0, 3.0, "OK"));
        let seq = r.sequence_number;
        core.on_sent(r, vec![seq as u8], now);
        seq
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let (mut c, _rx) = core(SenderConfig::default());
        let seqs: Vec<u32> = (0..4)
            .map(|_| c.stamp(TelemetryRecord::default()).sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[test]
    fn stamp_sets_ack_flag_from_reliability() {
        let (mut c, _rx) = core(SenderConfig::default());
        assert!(c.stamp(TelemetryRecord::default()).needs_ack);
        c.config.reliability_enabled = false;
        let r = c.stamp(TelemetryRecord::default());
        assert!(!r.needs_ack);
        assert!(r.timestamp > 0);
    }

    #[test]
    fn unreliable_sends_are_not_tracked() {
        let config = SenderConfig {
            reliability_enabled: false,
            ..SenderConfig::default()
        };
        let (mut c, _rx) = core(config);
        send(&mut c, Instant::now());
        assert!(c.pending.is_empty());
        assert_eq!(c.stats.snapshot().packets_sent, 1);
    }

    #[test]
    fn all_acks_in_time_leave_nothing_pending() {
        let (mut c, mut rx) = core(SenderConfig::default());
        let t0 = Instant::now();
        let seqs: Vec<u32> = (0..5).map(|_| send(&mut c, t0)).collect();
        assert_eq!(c.pending.len(), 5);

        for seq in &seqs {
            assert!(c.on_ack(*seq));
        }
        assert!(c.sweep(t0 + Duration::from_millis(10)).is_empty());
        assert!(c.pending.is_empty());

        let snap = c.stats.snapshot();
        assert_eq!(snap.acknowledged, 5);
        assert_eq!(snap.retransmitted, 0);

        let acked: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::AckReceived(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(acked, seqs);
    }

    #[test]
    fn stale_ack_is_silent() {
        let (mut c, mut rx) = core(SenderConfig::default());
        send(&mut c, Instant::now());
        drain(&mut rx);
        assert!(!c.on_ack(42));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn exhausted_entry_reports_timeout_once() {
        let config = SenderConfig {
            ack_timeout: Duration::from_millis(100),
            max_retransmissions: 2,
            ..SenderConfig::default()
        };
        let (mut c, mut rx) = core(config);
        let mut now = Instant::now();
        let seq = send(&mut c, now);

        let mut resent = 0;
        for _ in 0..6 {
            now += Duration::from_millis(150);
            for (s, _) in c.sweep(now) {
                assert_eq!(s, seq);
                c.on_retransmitted(s);
                resent += 1;
            }
        }
        assert_eq!(resent, 2);
        assert!(c.pending.is_empty());

        let timeouts: Vec<u32> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::PacketTimeout(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts, vec![seq]);

        let snap = c.stats.snapshot();
        assert_eq!(snap.retransmitted, 2);
        assert_eq!(snap.timed_out, 1);
        // The late ack no longer matches anything.
        assert!(!c.on_ack(seq));
    }

    #[test]
    fn every_mutation_publishes_statistics() {
        let (mut c, mut rx) = core(SenderConfig::default());
        let seq = send(&mut c, Instant::now());
        c.on_ack(seq);
        let stats_events = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Event::StatisticsUpdated(_)))
            .count();
        assert_eq!(stats_events, 2);
    }
}
