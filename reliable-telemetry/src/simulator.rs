//! Optional fault injection on the outbound path.
//!
//! Real networks drop and duplicate datagrams.  To exercise retransmission
//! and gap filling without depending on actual network conditions, a role
//! can route its outbound datagrams through a [`Simulator`]:
//!
//! | Fault       | Description                                         |
//! |-------------|-----------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.       |
//! | Duplication | Deliver a datagram twice with `duplicate_rate`.     |
//!
//! A dropped datagram counts as sent: the local write "succeeded" and the
//! datagram was lost in transit.  With a `seed` the fault sequence is
//! reproducible.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::{Socket, SocketError};

/// Fault model.  Probabilities are clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    /// Seed for the RNG; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

/// Decides the fate of each outbound datagram.
#[derive(Debug)]
pub struct Simulator {
    pub config: SimulatorConfig,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// How many copies of the next datagram reach the wire (0, 1 or 2).
    pub fn copies(&mut self) -> usize {
        if self.rng.gen_bool(self.config.loss_rate.clamp(0.0, 1.0)) {
            return 0;
        }
        if self.rng.gen_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            2
        } else {
            1
        }
    }
}

/// Send `bytes` to `dest`, applying `sim`'s faults when present.
pub async fn transmit(
    socket: &Socket,
    sim: Option<&mut Simulator>,
    bytes: &[u8],
    dest: SocketAddr,
) -> Result<(), SocketError> {
    let copies = sim.map_or(1, Simulator::copies);
    if copies == 0 {
        log::debug!("[sim] dropped datagram to {dest}");
    }
    for _ in 0..copies {
        socket.send_bytes(bytes, dest).await?;
    }
    Ok(())
}
