//! Receiving side: acknowledgement, gap detection, interpolation, eviction.
//!
//! A [`Receiver`] owns one background task that multiplexes the socket, the
//! command queue and two sweep timers:
//!
//! - **datagram intake** — ack if requested, update the cursors, buffer the
//!   record and surface it immediately (records are never held back for
//!   reordering);
//! - **gap sweep** — every sequence number between the cursors that never
//!   arrived is declared lost and replaced by an interpolated record (or a
//!   copy of the last valid one);
//! - **eviction sweep** — trims the buffer back to its capacity.
//!
//! # Cursors
//!
//! `expected` is the first sequence number not yet accounted for, either by
//! arrival or by the gap sweep; `last_valid` is the highest sequence number
//! seen.  `expected <= last_valid + 1` holds after every step and neither
//! ever moves backwards.  A record that arrives ahead of `expected` leaves
//! the cursor in place so the hole below it stays visible to the sweep.
//!
//! Two things move `expected` without a sweep:
//!
//! - a record more than [`MAX_GAP`] ahead of it resynchronizes the cursor to
//!   that record; the skipped numbers are not counted as lost;
//! - eviction settles any hole below the first record it keeps and moves the
//!   cursor past everything it dropped.
//!
//! A record that arrives after its sequence number was already synthesized is
//! still surfaced; consumers see both.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buffer::ReceivedBuffer;
use crate::config::ReceiverConfig;
use crate::event::{Event, EventSink, EventStream};
use crate::interpolate::interpolate;
use crate::record::{AckRecord, TelemetryRecord};
use crate::simulator::{transmit, Simulator};
use crate::socket::{Socket, SocketError};
use crate::state::{SessionError, SessionState};
use crate::stats::{Statistics, StatsSnapshot};
use crate::timer::sweep_timer;
use crate::wire::Datagram;

/// Largest backlog one arrival may open ahead of `expected`.  A record
/// further ahead resynchronizes the cursor instead of opening the gap, which
/// also bounds the work of a single sweep.
pub const MAX_GAP: u32 = 10_000;

/// Position of the receiver's sequence cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub expected: u32,
    pub last_valid: u32,
    pub buffered: usize,
}

// ---------------------------------------------------------------------------
// ReceiverCore — state without I/O
// ---------------------------------------------------------------------------

struct ReceiverCore {
    buffer: ReceivedBuffer,
    expected: u32,
    last_valid_seq: u32,
    last_valid: TelemetryRecord,
    config: ReceiverConfig,
    stats: Arc<Statistics>,
    events: EventSink,
}

impl ReceiverCore {
    fn new(config: ReceiverConfig, stats: Arc<Statistics>, events: EventSink) -> Self {
        Self {
            buffer: ReceivedBuffer::new(config.buffer_capacity),
            expected: 1,
            last_valid_seq: 0,
            last_valid: TelemetryRecord::default(),
            config,
            stats,
            events,
        }
    }

    fn cursors(&self) -> Cursors {
        Cursors {
            expected: self.expected,
            last_valid: self.last_valid_seq,
            buffered: self.buffer.len(),
        }
    }

    /// Take in one telemetry record (the ack, if any, was already sent).
    fn accept(&mut self, record: TelemetryRecord, now: Instant) {
        self.stats.record_received();

        let seq = record.sequence_number;
        if seq > self.expected && seq - self.expected > MAX_GAP {
            log::warn!(
                "[receiver] seq={seq} is {} past expected={}, resynchronizing",
                seq - self.expected,
                self.expected
            );
            self.expected = seq;
        }
        if seq >= self.last_valid_seq {
            self.last_valid_seq = seq;
            self.last_valid = record.clone();
        }
        self.buffer.insert(record.clone(), now);
        self.events.emit(Event::TelemetryReceived(record));
        self.advance_expected();

        self.emit_stats();
    }

    /// Move `expected` over every contiguous sequence number already held.
    fn advance_expected(&mut self) {
        while self.buffer.contains(self.expected) {
            match self.expected.checked_add(1) {
                Some(next) => self.expected = next,
                None => break,
            }
        }
    }

    /// Declare overdue holes in `[expected, last_valid)` lost and emit a
    /// stand-in for each.
    fn sweep_gaps(&mut self, now: Instant) {
        let mut changed = false;

        for seq in self.expected..self.last_valid_seq {
            if self.buffer.contains(seq) {
                continue;
            }
            // The hole may still be filled by a late or retransmitted record.
            if let Some(arrived) = self.buffer.next_arrival_after(seq) {
                if now.saturating_duration_since(arrived) < self.config.packet_timeout {
                    break;
                }
            }
            self.fill(seq);
            self.expected = seq + 1;
            changed = true;
        }

        if changed {
            self.emit_stats();
        }
    }

    /// Count `seq` as lost and emit its stand-in.
    fn fill(&mut self, seq: u32) {
        self.stats.record_lost();
        let stand_in = if self.config.interpolation_enabled {
            self.stats.record_interpolated();
            log::debug!("[receiver] interpolated seq={seq}");
            interpolate(seq, &self.buffer, &self.last_valid)
        } else {
            log::debug!("[receiver] repeated last valid record for seq={seq}");
            self.last_valid.restamped(seq)
        };
        self.events.emit(Event::TelemetryReceived(stand_in));
    }

    /// Trim the buffer to capacity.
    ///
    /// Holes below the first surviving record are settled before their
    /// neighbours go, grace window or not, and `expected` is moved past
    /// everything evicted.
    fn evict(&mut self) {
        let Some(boundary) = self.buffer.eviction_boundary() else {
            return;
        };
        let end = boundary.min(self.last_valid_seq.saturating_add(1));

        let mut filled = false;
        for seq in self.expected..end {
            if !self.buffer.contains(seq) {
                self.fill(seq);
                filled = true;
            }
        }

        let removed = self.buffer.evict();
        log::debug!(
            "[receiver] evicted {removed} old record(s), keeping {}",
            self.buffer.capacity()
        );
        self.expected = self.expected.max(end);
        self.advance_expected();

        if filled {
            self.emit_stats();
        }
    }

    fn emit_stats(&self) {
        self.events.emit(Event::StatisticsUpdated(self.stats.snapshot()));
    }
}

// ---------------------------------------------------------------------------
// Receiver — public handle
// ---------------------------------------------------------------------------

enum Command {
    SetInterpolation(bool),
    SetBufferCapacity(usize),
    SetPacketTimeout(Duration),
    Cursors(oneshot::Sender<Cursors>),
    Stop,
}

/// Handle to a listening receiver.
///
/// The session is Listening from a successful [`Receiver::start`] until
/// [`Receiver::stop`] (or drop); no events are emitted after that.
pub struct Receiver {
    cmd_tx: mpsc::UnboundedSender<Command>,
    stats: Arc<Statistics>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Receiver {
    /// Bind `config.bind` and start listening.
    ///
    /// A bind failure is returned as [`SessionError::Bind`]; nothing keeps
    /// running in that case.
    pub async fn start(config: ReceiverConfig) -> Result<(Self, EventStream), SessionError> {
        let socket = Socket::bind(config.bind).await.map_err(|e| {
            log::warn!("[receiver] failed to bind {}: {e}", config.bind);
            SessionError::Bind(e)
        })?;
        Ok(Self::with_socket(socket, config))
    }

    /// Start listening on an already-bound socket.  `config.bind` is ignored.
    pub fn with_socket(socket: Socket, config: ReceiverConfig) -> (Self, EventStream) {
        let (events, stream) = EventSink::channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Statistics::new());
        let local_addr = socket.local_addr;
        let sim = config.fault.clone().map(Simulator::new);

        log::info!("[receiver] listening on {local_addr}");
        events.emit(Event::ConnectionStatusChanged(true));

        let core = ReceiverCore::new(config, Arc::clone(&stats), events);
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

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SessionState {
        if self.task.is_finished() {
            SessionState::Stopped
        } else {
            SessionState::Listening
        }
    }

    pub fn is_listening(&self) -> bool {
        self.state() == SessionState::Listening
    }

    pub fn set_interpolation_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(Command::SetInterpolation(enabled))
    }

    pub fn set_buffer_capacity(&self, capacity: usize) -> Result<(), SessionError> {
        self.command(Command::SetBufferCapacity(capacity))
    }

    pub fn set_packet_timeout(&self, timeout: Duration) -> Result<(), SessionError> {
        self.command(Command::SetPacketTimeout(timeout))
    }

    pub async fn cursors(&self) -> Result<Cursors, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Cursors(tx))?;
        rx.await.map_err(|_| SessionError::Stopped)
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop listening and wait for the task to end.
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
    mut core: ReceiverCore,
    mut sim: Option<Simulator>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut gap_sweep = sweep_timer(core.config.gap_sweep_interval);
    let mut eviction = sweep_timer(core.config.eviction_interval);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::SetInterpolation(enabled) => core.config.interpolation_enabled = enabled,
                    Command::SetBufferCapacity(capacity) => {
                        core.config.buffer_capacity = capacity;
                        core.buffer.set_capacity(capacity);
                    }
                    Command::SetPacketTimeout(timeout) => core.config.packet_timeout = timeout,
                    Command::Cursors(reply) => {
                        let _ = reply.send(core.cursors());
                    }
                    Command::Stop => break,
                }
            }

            result = socket.recv_from() => match result {
                Ok((Datagram::Telemetry(record), from)) => {
                    log::debug!(
                        "[receiver] ← DATA seq={} lat={} lon={} from {from}",
                        record.sequence_number,
                        record.latitude,
                        record.longitude
                    );
                    if record.needs_ack {
                        send_ack(&socket, &core, sim.as_mut(), record.sequence_number, from).await;
                    }
                    core.accept(record, Instant::now());
                }
                // Acks belong to the sending side.
                Ok((Datagram::Ack(_), _)) => {}
                Err(SocketError::Wire(e)) => log::warn!("[receiver] dropping malformed datagram: {e}"),
                Err(e) => log::warn!("[receiver] receive failed: {e}"),
            },

            _ = gap_sweep.tick() => core.sweep_gaps(Instant::now()),

            _ = eviction.tick() => core.evict(),
        }
    }

    if !core.buffer.is_empty() {
        log::debug!("[receiver] discarding {} buffered record(s)", core.buffer.len());
        core.buffer.clear();
    }
    log::info!("[receiver] stopped listening on {}", socket.local_addr);
    core.events.emit(Event::ConnectionStatusChanged(false));
}

async fn send_ack(
    socket: &Socket,
    core: &ReceiverCore,
    sim: Option<&mut Simulator>,
    seq: u32,
    dest: SocketAddr,
) {
    let sent = match socket.encode(&Datagram::Ack(AckRecord::for_sequence(seq))) {
        Ok(bytes) => transmit(socket, sim, &bytes, dest).await,
        Err(e) => Err(e),
    };
    match sent {
        Ok(()) => {
            core.stats.record_ack_sent();
            log::debug!("[receiver] → ACK seq={seq} to {dest}");
        }
        Err(e) => {
            let msg = format!("ack seq={seq} to {dest} failed: {e}");
            log::warn!("[receiver] {msg}");
            core.events.emit(Event::TransportError(msg));
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn core(config: ReceiverConfig) -> (ReceiverCore, EventStream) {
        let (events, stream) = EventSink::channel();
        (
            ReceiverCore::new(config, Arc::new(Statistics::new()), events),
            stream,
        )
    }

    fn immediate() -> ReceiverConfig {
        ReceiverConfig {
            packet_timeout: Duration::ZERO,
            ..ReceiverConfig::default()
        }
    }

    fn record(seq: u32, lat: f64, lon: f64, speed: f64) -> TelemetryRecord {
        TelemetryRecord {
            sequence_number: seq,
            timestamp: 1,
            latitude: lat,
            longitude: lon,
            speed,
            status: "OK".into(),
            needs_ack: true,
        }
    }

    fn telemetry(stream: &mut EventStream) -> Vec<TelemetryRecord> {
        let mut out = Vec::new();
        while let Ok(e) = stream.try_recv() {
            if let Event::TelemetryReceived(r) = e {
                out.push(r);
            }
        }
        out
    }

    #[test]
    fn in_order_arrivals_advance_cursors() {
        let (mut c, mut rx) = core(immediate());
        let now = Instant::now();
        for seq in 1..=3 {
            c.accept(record(seq, 0.0, 0.0, 0.0), now);
        }
        assert_eq!(
            c.cursors(),
            Cursors {
                expected: 4,
                last_valid: 3,
                buffered: 3
            }
        );
        assert_eq!(telemetry(&mut rx).len(), 3);
        c.sweep_gaps(now);
        assert!(telemetry(&mut rx).is_empty());
    }

    #[test]
    fn dropped_record_is_interpolated() {
        let (mut c, mut rx) = core(immediate());
        let now = Instant::now();
        c.accept(record(1, 8.0, 16.0, 3.0), now);
        c.accept(record(2, 10.0, 20.0, 5.0), now);
        c.accept(record(4, 14.0, 28.0, 9.0), now);
        c.accept(record(5, 16.0, 32.0, 11.0), now);

        assert_eq!(c.expected, 3);
        assert_eq!(c.last_valid_seq, 5);
        // Arrivals are surfaced as they come.
        let seen: Vec<u32> = telemetry(&mut rx).iter().map(|r| r.sequence_number).collect();
        assert_eq!(seen, vec![1, 2, 4, 5]);

        c.sweep_gaps(now);
        let synthesized = telemetry(&mut rx);
        assert_eq!(synthesized.len(), 1);
        let r = &synthesized[0];
        assert_eq!(r.sequence_number, 3);
        assert_eq!(r.status, "INTERPOLATED");
        assert!((r.latitude - 12.0).abs() < 1e-9);
        assert!((r.longitude - 24.0).abs() < 1e-9);
        assert!((r.speed - 7.0).abs() < 1e-9);
        assert_eq!(c.expected, 4);

        let snap = c.stats.snapshot();
        assert_eq!(snap.received, 4);
        assert_eq!(snap.lost, 1);
        assert_eq!(snap.interpolated, 1);
        assert_eq!(snap.loss_rate(), 20.0);

        // A second sweep has nothing left to do.
        c.sweep_gaps(now);
        assert!(telemetry(&mut rx).is_empty());
    }

    #[test]
    fn fallback_repeats_last_valid_when_interpolation_off() {
        let config = ReceiverConfig {
            interpolation_enabled: false,
            ..immediate()
        };
        let (mut c, mut rx) = core(config);
        let now = Instant::now();
        c.accept(record(1, 1.0, 1.0, 1.0), now);
        c.accept(record(3, 3.0, 3.0, 3.0), now);
        telemetry(&mut rx);

        c.sweep_gaps(now);
        let out = telemetry(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sequence_number, 2);
        assert_eq!(out[0].latitude, 3.0);
        assert_eq!(out[0].status, "OK");
        assert_eq!(c.stats.snapshot().interpolated, 0);
        assert_eq!(c.stats.snapshot().lost, 1);
    }

    #[test]
    fn recent_gaps_wait_for_packet_timeout() {
        let config = ReceiverConfig {
            packet_timeout: Duration::from_millis(500),
            ..ReceiverConfig::default()
        };
        let (mut c, mut rx) = core(config);
        let t0 = Instant::now();
        c.accept(record(1, 0.0, 0.0, 0.0), t0);
        c.accept(record(3, 0.0, 0.0, 0.0), t0);
        telemetry(&mut rx);

        c.sweep_gaps(t0 + Duration::from_millis(100));
        assert!(telemetry(&mut rx).is_empty());
        assert_eq!(c.expected, 2);

        c.sweep_gaps(t0 + Duration::from_millis(600));
        assert_eq!(telemetry(&mut rx).len(), 1);
        assert_eq!(c.expected, 3);
    }

    #[test]
    fn late_arrival_after_synthesis_is_surfaced_again() {
        let (mut c, mut rx) = core(immediate());
        let now = Instant::now();
        c.accept(record(1, 0.0, 0.0, 0.0), now);
        c.accept(record(3, 0.0, 0.0, 0.0), now);
        c.sweep_gaps(now);
        telemetry(&mut rx);

        c.accept(record(2, 5.0, 5.0, 5.0), now);
        let out = telemetry(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, "OK");
        // Cursors never move backwards.
        assert_eq!(c.expected, 4);
        assert_eq!(c.last_valid_seq, 3);
    }

    #[test]
    fn cursor_invariant_holds_under_reordering() {
        let (mut c, _rx) = core(immediate());
        let now = Instant::now();
        for seq in [5, 1, 3, 2, 9, 4, 7] {
            let before = (c.expected, c.last_valid_seq);
            c.accept(record(seq, 0.0, 0.0, 0.0), now);
            assert!(c.expected >= before.0 && c.last_valid_seq >= before.1);
            assert!(c.expected <= c.last_valid_seq + 1);
            c.sweep_gaps(now);
            assert!(c.expected <= c.last_valid_seq + 1);
        }
    }

    #[test]
    fn eviction_trims_to_capacity() {
        let config = ReceiverConfig {
            buffer_capacity: 3,
            ..immediate()
        };
        let (mut c, _rx) = core(config);
        let now = Instant::now();
        for seq in 1..=8 {
            c.accept(record(seq, 0.0, 0.0, 0.0), now);
        }
        assert_eq!(c.buffer.len(), 8);
        c.evict();
        assert_eq!(c.buffer.sequence_numbers().collect::<Vec<_>>(), vec![6, 7, 8]);
        assert_eq!(c.expected, 9);
    }

    #[test]
    fn eviction_settles_holes_below_the_kept_records() {
        let config = ReceiverConfig {
            buffer_capacity: 3,
            packet_timeout: Duration::from_secs(5),
            ..ReceiverConfig::default()
        };
        let (mut c, mut rx) = core(config);
        let t0 = Instant::now();
        for seq in [1, 3, 4, 5, 6, 7] {
            c.accept(record(seq, seq as f64, 0.0, 0.0), t0);
        }
        telemetry(&mut rx);

        // Hole 2 is still inside its grace window when eviction runs.
        c.evict();
        let settled = telemetry(&mut rx);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].sequence_number, 2);
        assert!((settled[0].latitude - 2.0).abs() < 1e-9);
        assert_eq!(c.buffer.sequence_numbers().collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(c.expected, 8);

        // Evicted records were received; a later sweep must not resynthesize them.
        c.sweep_gaps(t0 + Duration::from_secs(6));
        assert!(telemetry(&mut rx).is_empty());
        let snap = c.stats.snapshot();
        assert_eq!(snap.received, 6);
        assert_eq!(snap.lost, 1);
    }

    #[test]
    fn eviction_to_zero_capacity_keeps_cursor_past_last_valid() {
        let config = ReceiverConfig {
            buffer_capacity: 0,
            ..immediate()
        };
        let (mut c, mut rx) = core(config);
        let now = Instant::now();
        c.accept(record(1, 0.0, 0.0, 0.0), now);
        c.accept(record(2, 0.0, 0.0, 0.0), now);
        c.evict();
        assert!(c.buffer.is_empty());
        assert_eq!(c.expected, 3);

        c.accept(record(3, 0.0, 0.0, 0.0), now);
        c.sweep_gaps(now);
        telemetry(&mut rx);
        assert_eq!(c.stats.snapshot().lost, 0);
        assert!(c.expected <= c.last_valid_seq + 1);
    }

    #[test]
    fn stray_far_ahead_record_resynchronizes_instead_of_filling() {
        let (mut c, mut rx) = core(immediate());
        let now = Instant::now();
        c.accept(record(1, 0.0, 0.0, 0.0), now);
        c.accept(record(2_000_001, 0.0, 0.0, 0.0), now);
        assert_eq!(c.expected, 2_000_002);
        assert_eq!(c.last_valid_seq, 2_000_001);
        telemetry(&mut rx);

        c.sweep_gaps(now);
        assert!(telemetry(&mut rx).is_empty());
        assert_eq!(c.stats.snapshot().lost, 0);
    }

    #[test]
    fn gap_at_the_limit_is_still_filled() {
        let (mut c, mut rx) = core(immediate());
        let now = Instant::now();
        c.accept(record(1, 0.0, 0.0, 0.0), now);
        c.accept(record(2 + MAX_GAP, 0.0, 0.0, 0.0), now);
        assert_eq!(c.expected, 2);
        telemetry(&mut rx);

        c.sweep_gaps(now);
        assert_eq!(telemetry(&mut rx).len(), MAX_GAP as usize);
        assert_eq!(c.expected, 2 + MAX_GAP);
    }
}
