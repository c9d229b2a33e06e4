use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use crate::config::clamp_fire_step;
use crate::edge_set::EdgeSet;
use crate::fire::{FireEngine, PropagationMode, StepOutcome};
use crate::message::{Directive, Message};
use crate::metrics::ProcessTimers;
use crate::partition::PartitionMap;
use crate::transport::{Inbox, TransportLike, is_aggregator};
use crate::{AGGREGATOR_RANK, FireError, Rank, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Spreading,
    Resetting,
    Killed,
}

/// Aggregator traffic forwarded by the listener task.
#[derive(Debug)]
enum Control {
    Directive(Directive),
    FireStep(u32),
}

#[derive(Debug)]
struct PeerRequest {
    from: Rank,
    sample: u32,
    vertices: Vec<VertexId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub rank: Rank,
    pub samples: u32,
    pub heartbeats: u64,
    pub counters: BTreeMap<String, u64>,
}

pub struct Worker<T: TransportLike> {
    rank: Rank,
    state: WorkerState,
    sample: u32,
    fire_step: u32,
    engine: FireEngine,
    owners: Arc<PartitionMap>,
    transport: T,
    deferred: Vec<PeerRequest>,
    heartbeats: u64,
    timers: ProcessTimers,
}

impl<T: TransportLike> Worker<T> {
    pub fn new(engine: FireEngine, owners: Arc<PartitionMap>, transport: T, fire_step: u32) -> Self {
        let rank = transport.rank();
        Self {
            rank,
            state: WorkerState::Idle,
            sample: 0,
            fire_step: clamp_fire_step(fire_step),
            engine,
            owners,
            transport,
            deferred: Vec::new(),
            heartbeats: 0,
            timers: ProcessTimers::new(format!("worker-{}", rank)),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn sample(&self) -> u32 {
        self.sample
    }

    pub fn engine(&self) -> &FireEngine {
        &self.engine
    }

    pub fn set_fire_step(&mut self, step: u32) {
        self.fire_step = clamp_fire_step(step);
        debug!(rank = self.rank, fire_step = self.fire_step, "fire step adjusted");
    }

    /// Light the first vertex of a sample.
    pub fn begin_sample(&mut self) {
        let ignited = self.engine.ignite_random(1);
        self.state = WorkerState::Spreading;
        debug!(rank = self.rank, sample = self.sample, ?ignited, "sample ignited");
    }

    /// Run one burst of spread steps and collect the edges discovered. An
    /// exhausted partition ends the burst early; the heartbeat still goes out.
    pub fn spread_burst(&mut self) -> EdgeSet {
        self.timers.start("spread");
        let mut edges = EdgeSet::new();
        for _ in 0..self.fire_step {
            if self.engine.spread_one_step(&mut edges) == StepOutcome::Exhausted {
                self.timers.add("exhausted_bursts", 1);
                break;
            }
        }
        self.timers.stop("spread");
        edges
    }

    /// Ship pending remote ignitions grouped by owning worker, then mark
    /// them confirmed. Returns the number of vertices requested.
    pub fn flush_burn_requests(&mut self) -> Result<usize, FireError> {
        self.timers.start("burn_requests");
        let rank = self.rank;
        let owners = &self.owners;
        let grouped = self
            .engine
            .pending_requests()
            .into_iter()
            .filter_map(|v| match owners.owner(v) {
                Some(owner) if owner != rank => Some((owner, v)),
                Some(_) => {
                    warn!(rank, vertex = v, "partition map assigns a non-local vertex to this rank");
                    None
                }
                None => {
                    warn!(rank, "{}", FireError::UnknownOwner(v));
                    None
                }
            })
            .into_group_map();

        let mut requested = 0;
        for (owner, vertices) in grouped.into_iter().sorted_by_key(|(owner, _)| *owner) {
            let count = vertices.len();
            let msg = Message::BurnRequest {
                sample: self.sample,
                vertices,
            };
            match self.transport.send(owner, &msg) {
                Ok(()) => requested += count,
                Err(e @ FireError::UnknownDestination { .. }) => {
                    self.timers.stop("burn_requests");
                    return Err(e);
                }
                // Peer channel is best effort.
                Err(e) => debug!(rank, owner, "burn request dropped: {}", e),
            }
        }
        self.engine.reset_remote_pending();
        self.timers.add("burn_requests_sent", requested as u64);
        self.timers.stop("burn_requests");
        Ok(requested)
    }

    pub fn send_heartbeat(&mut self, edges: EdgeSet) -> Result<(), FireError> {
        self.timers.start("heartbeat");
        self.timers.add("heartbeat_edges", edges.len() as u64);
        let msg = Message::Heartbeat {
            sample: self.sample,
            edges: edges.list_rep(),
        };
        let sent = self.transport.send(AGGREGATOR_RANK, &msg);
        self.timers.stop("heartbeat");
        sent?;
        self.heartbeats += 1;
        Ok(())
    }

    /// Merge a peer's burn request if it belongs to the current sample.
    pub fn absorb_burn_request(&mut self, from: Rank, sample: u32, vertices: Vec<VertexId>) -> usize {
        if sample < self.sample {
            debug!(rank = self.rank, from, sample, "stale burn request dropped");
            return 0;
        }
        if sample > self.sample {
            self.deferred.push(PeerRequest { from, sample, vertices });
            return 0;
        }
        let foreign = vertices.iter().filter(|v| !self.engine.graph().is_local(**v)).count();
        if foreign > 0 {
            warn!(rank = self.rank, from, foreign, "burn request names vertices this rank does not own");
        }
        let merged = self.engine.merge_remote_ignition(&vertices);
        self.timers.add("remote_ignitions", merged as u64);
        merged
    }

    /// Returns false once the worker is killed.
    pub fn apply_directive(&mut self, directive: Directive) -> Result<bool, FireError> {
        match directive {
            Directive::Continue => Ok(true),
            Directive::Reset => {
                self.state = WorkerState::Resetting;
                self.engine.reset();
                self.sample += 1;
                self.transport.send(AGGREGATOR_RANK, &Message::ResetAck { sample: self.sample })?;
                info!(rank = self.rank, sample = self.sample, "reset for next sample");
                self.replay_deferred();
                self.begin_sample();
                Ok(true)
            }
            Directive::Kill => {
                self.state = WorkerState::Killed;
                info!(rank = self.rank, "received kill");
                Ok(false)
            }
        }
    }

    fn replay_deferred(&mut self) {
        let (ready, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|r| r.sample <= self.sample);
        self.deferred = later;
        for request in ready {
            self.absorb_burn_request(request.from, request.sample, request.vertices);
        }
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            rank: self.rank,
            samples: self.sample + 1,
            heartbeats: self.heartbeats,
            counters: self.timers.counters(),
        }
    }

    /// Drive the spread/heartbeat loop until the aggregator says KILL. A
    /// listener task drains the inbox concurrently.
    #[instrument(skip_all, fields(rank = self.rank))]
    pub async fn run(mut self, inbox: Inbox) -> Result<WorkerReport, FireError> {
        let (control_tx, mut control_rx) = unbounded_channel();
        let (peer_tx, mut peer_rx) = unbounded_channel();
        let listener = tokio::spawn(listen(inbox, control_tx, peer_tx));

        self.timers.start("run");
        let result = self.drive(&mut control_rx, &mut peer_rx).await;
        self.timers.stop("run");
        if result.is_err() {
            listener.abort();
        }
        listener_failed(self.rank, listener.await);
        result?;

        self.timers.log_summary();
        Ok(self.report())
    }

    async fn drive(
        &mut self,
        control_rx: &mut UnboundedReceiver<Control>,
        peer_rx: &mut UnboundedReceiver<PeerRequest>,
    ) -> Result<(), FireError> {
        self.begin_sample();
        loop {
            while let Ok(request) = peer_rx.try_recv() {
                self.absorb_burn_request(request.from, request.sample, request.vertices);
            }

            let edges = self.spread_burst();
            if self.engine.mode() == PropagationMode::Wild {
                self.flush_burn_requests()?;
            }
            self.send_heartbeat(edges)?;

            self.timers.start("receive_directive");
            let directive = self.receive_directive(control_rx).await;
            self.timers.stop("receive_directive");
            if !self.apply_directive(directive?)? {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    async fn receive_directive(&mut self, control_rx: &mut UnboundedReceiver<Control>) -> Result<Directive, FireError> {
        loop {
            match control_rx.recv().await {
                Some(Control::Directive(directive)) => return Ok(directive),
                Some(Control::FireStep(step)) => self.set_fire_step(step),
                None => {
                    return Err(FireError::Transport(format!(
                        "rank {} lost its aggregator link",
                        self.rank
                    )));
                }
            }
        }
    }
}

/// Log a listener that panicked. An abort after a failed loop is expected
/// and stays quiet.
fn listener_failed(rank: Rank, joined: Result<(), JoinError>) -> bool {
    match joined {
        Err(e) if !e.is_cancelled() => {
            warn!(rank, "listener task failed: {}", e);
            true
        }
        _ => false,
    }
}

/// Demultiplex a worker's inbox: aggregator control goes to one channel,
/// peer burn requests to another. Stops after forwarding KILL.
async fn listen(mut inbox: Inbox, control_tx: UnboundedSender<Control>, peer_tx: UnboundedSender<PeerRequest>) {
    let rank = inbox.rank();
    while let Some((from, msg)) = inbox.recv().await {
        let forwarded = match msg {
            Message::Continue | Message::Reset | Message::Kill if is_aggregator(from) => {
                let kill = msg == Message::Kill;
                let sent = Directive::try_from(msg)
                    .map(|d| control_tx.send(Control::Directive(d)).is_ok())
                    .unwrap_or(false);
                if kill {
                    return;
                }
                sent
            }
            Message::FireStep(step) if is_aggregator(from) => control_tx.send(Control::FireStep(step)).is_ok(),
            Message::BurnRequest { sample, vertices } if !is_aggregator(from) => {
                // Receiver side gone just means the loop has finished.
                peer_tx.send(PeerRequest { from, sample, vertices }).is_ok()
            }
            other => {
                warn!(
                    rank,
                    from,
                    "{}",
                    FireError::ProtocolViolation(format!("unexpected {} from rank {}", other.kind(), from))
                );
                true
            }
        };
        if !forwarded {
            return;
        }
    }
}
