//! Simulation-side half of the bridge
//!
//! The host calls [`SimulationLink::tick`] from its frame loop. Listener
//! requests are drained here so world state is only ever touched from the
//! simulation context, and streaming snapshots are built and queued here.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::protocol::{encode, BridgeMsg, ProtocolError};
use crate::util::time::Cadence;
use crate::world::{Command, SnapshotBuilder, WorldError, WorldSnapshot, WorldStateProvider};

use super::queue::{OutboundMessage, OutboundQueue};
use super::stats::StreamStats;

pub type SharedStats = Arc<Mutex<StreamStats>>;

/// Work the listener hands to the simulation context
#[derive(Debug)]
pub enum SimRequest {
    /// Apply agent input
    Command(Command),
    /// Run the host reset hook
    Reset {
        reply: oneshot::Sender<Result<(), WorldError>>,
    },
    /// Build a one-off snapshot
    Snapshot { reply: oneshot::Sender<WorldSnapshot> },
}

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requests: usize,
    pub published: bool,
}

pub struct SimulationLink {
    requests: mpsc::Receiver<SimRequest>,
    /// None when the bridge does not stream
    queue: Option<Arc<OutboundQueue>>,
    builder: SnapshotBuilder,
    cadence: Cadence,
    stats: SharedStats,
}

impl SimulationLink {
    pub(crate) fn new(
        requests: mpsc::Receiver<SimRequest>,
        queue: Option<Arc<OutboundQueue>>,
        tick_interval: Duration,
        stats: SharedStats,
    ) -> Self {
        Self {
            requests,
            queue,
            builder: SnapshotBuilder::default(),
            cadence: Cadence::new(tick_interval),
            stats,
        }
    }

    /// Call once per host frame with the time elapsed since the last call
    pub fn tick<W: WorldStateProvider + ?Sized>(
        &mut self,
        world: &mut W,
        dt: Duration,
    ) -> TickReport {
        let requests = self.service_requests(world);

        let published = self.queue.is_some()
            && self.cadence.advance(dt)
            && world.is_gameplay()
            && self.publish(world);

        TickReport {
            requests,
            published,
        }
    }

    /// Drain pending listener requests without blocking.
    ///
    /// Resets and snapshots whose requester already timed out are skipped:
    /// the agent has been told the request failed.
    pub fn service_requests<W: WorldStateProvider + ?Sized>(&mut self, world: &mut W) -> usize {
        let mut handled = 0;

        while let Ok(request) = self.requests.try_recv() {
            handled += 1;
            match request {
                SimRequest::Command(cmd) => {
                    let axes = cmd.axes();
                    if let Err(e) = world.apply_input(axes) {
                        warn!(error = %e, "Failed to apply command");
                    } else {
                        trace!(
                            horizontal = axes.horizontal,
                            vertical = axes.vertical,
                            attack = axes.attack,
                            "Command applied"
                        );
                    }
                }
                SimRequest::Reset { reply } => {
                    if reply.is_closed() {
                        debug!("Reset requester gave up, skipping reset");
                        continue;
                    }
                    let result = world.reset();
                    if result.is_ok() {
                        // the agent wants to see the post-reset world promptly
                        self.cadence.force_next();
                    }
                    if reply.send(result).is_err() {
                        debug!("Reset requester went away before the reply");
                    }
                }
                SimRequest::Snapshot { reply } => {
                    if reply.is_closed() {
                        debug!("State requester gave up, skipping snapshot");
                        continue;
                    }
                    if reply.send(self.builder.build(world)).is_err() {
                        debug!("State requester went away before the reply");
                    }
                }
            }
        }

        handled
    }

    /// Build, serialize and queue one full_update
    fn publish<W: WorldStateProvider + ?Sized>(&self, world: &W) -> bool {
        let Some(queue) = &self.queue else {
            return false;
        };

        let msg = BridgeMsg::FullUpdate {
            state: self.builder.build(world),
        };

        let outbound = match encode(&msg).and_then(OutboundMessage::new) {
            Ok(outbound) => outbound,
            Err(ProtocolError::TooLarge { size, limit }) => {
                warn!(size, limit, "Snapshot too large for UDP, dropping");
                self.stats.lock().oversize_drops += 1;
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to encode snapshot");
                return false;
            }
        };

        if queue.enqueue(outbound).is_some() {
            self.stats.lock().overflow_drops += 1;
            debug!(capacity = queue.capacity(), "Outbound queue full, dropped oldest update");
        }
        true
    }
}
