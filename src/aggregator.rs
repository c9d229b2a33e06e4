use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::{MAX_FIRE_STEP, RunConfig};
use crate::message::{Directive, Message};
use crate::metrics::ProcessTimers;
use crate::sample_graph::{GraphSinkLike, SampleStore};
use crate::stitch::StitchTopology;
use crate::transport::{Inbox, TransportLike};
use crate::{FireError, Rank, VertexId};

/// How many samples to burn and how large each must grow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScalePlan {
    pub samples: u32,
    pub cutoff: f64,
}

impl ScalePlan {
    pub fn from_scale_factor(scale_factor: f64, vertices: u64) -> Result<Self, FireError> {
        if !(scale_factor > 0.0) || !scale_factor.is_finite() {
            return Err(FireError::Config(format!("scale factor must be positive, got {}", scale_factor)));
        }
        let v = vertices as f64;
        let plan = if scale_factor <= 0.5 {
            ScalePlan {
                samples: 1,
                cutoff: v * scale_factor,
            }
        } else if scale_factor < 1.0 {
            ScalePlan {
                samples: 2,
                cutoff: v * scale_factor / 2.0,
            }
        } else {
            let samples = (2.0 * scale_factor).floor() as u32;
            ScalePlan {
                samples,
                cutoff: v * scale_factor / samples as f64,
            }
        };
        Ok(plan)
    }

    pub fn is_upscale(&self) -> bool {
        self.samples > 1
    }

    fn reached(&self, vertices: usize) -> bool {
        vertices as f64 >= self.cutoff
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatorReport {
    pub plan: ScalePlan,
    pub rounds: u64,
    pub vertices: u64,
    pub edges: u64,
    pub stitched_edges: u64,
    pub samples_closed_early: u32,
    pub protocol_violations: u64,
    pub final_fire_step: u32,
    /// Heartbeats received, indexed by worker rank - 1.
    pub heartbeats: Vec<u64>,
    pub counters: BTreeMap<String, u64>,
}

pub struct AggregatorOutcome<S> {
    pub report: AggregatorReport,
    pub sink: S,
}

pub struct Aggregator<T: TransportLike, S: GraphSinkLike> {
    transport: T,
    store: SampleStore<S>,
    plan: ScalePlan,
    do_stitch: bool,
    ring_stitch: bool,
    connectivity: f64,
    stitch_batch: usize,
    fire_step: u32,
    max_idle_rounds: u64,
    rng: StdRng,
    rounds: u64,
    closed_early: u32,
    violations: u64,
    heartbeats: Vec<u64>,
    timers: ProcessTimers,
}

impl<T: TransportLike, S: GraphSinkLike> Aggregator<T, S> {
    pub fn new(config: &RunConfig, original_vertices: u64, transport: T, sink: S) -> Result<Self, FireError> {
        let workers = transport.size().saturating_sub(1);
        if workers == 0 {
            return Err(FireError::Config("at least one worker rank is required".to_string()));
        }
        let plan = ScalePlan::from_scale_factor(config.scale_factor, original_vertices)?;
        let rng = match config.rank_seed(transport.rank()) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            transport,
            store: SampleStore::new(original_vertices, sink),
            plan,
            do_stitch: config.do_stitch,
            ring_stitch: config.ring_stitch,
            connectivity: config.connectivity,
            stitch_batch: config.stitch_batch,
            fire_step: config.initial_fire_step(),
            max_idle_rounds: config.max_idle_rounds.max(1),
            rng,
            rounds: 0,
            closed_early: 0,
            violations: 0,
            heartbeats: vec![0; workers],
            timers: ProcessTimers::new("aggregator"),
        })
    }

    pub fn plan(&self) -> ScalePlan {
        self.plan
    }

    fn workers(&self) -> usize {
        self.heartbeats.len()
    }

    fn violation(&mut self, from: Rank, detail: String) {
        self.violations += 1;
        warn!(from, "{}", FireError::ProtocolViolation(detail));
    }

    /// Burn every sample, stitch, and hand back the sink.
    #[instrument(skip_all, fields(samples = self.plan.samples, cutoff = self.plan.cutoff))]
    pub async fn run(mut self, mut inbox: Inbox) -> Result<AggregatorOutcome<S>, FireError> {
        info!(workers = self.workers(), "aggregator starting");
        self.timers.start("run");
        for sample in 0..self.plan.samples {
            self.burn_sample(sample, &mut inbox).await?;

            let last = sample + 1 == self.plan.samples;
            let directive = if last { Directive::Kill } else { Directive::Reset };
            self.transport.broadcast_workers(&directive.message())?;

            let finished = self.store.finish_sample()?;
            info!(
                sample,
                vertices = finished.vertices.len(),
                edges = finished.edges.len(),
                rounds = self.rounds,
                "sample complete"
            );
            if !last {
                self.await_reset_acks(sample + 1, &mut inbox).await?;
            }
        }
        self.timers.stop("run");

        if self.do_stitch {
            self.timers.start("stitch");
            let topology = StitchTopology::choose(self.ring_stitch, self.plan.samples as usize);
            let added = self
                .store
                .stitch(topology, self.connectivity, self.stitch_batch, &mut self.rng)?;
            self.timers.stop("stitch");
            info!(?topology, edges = added, "stitching done");
        }

        self.timers.add("rounds", self.rounds);
        self.timers.log_summary();
        let report = AggregatorReport {
            plan: self.plan,
            rounds: self.rounds,
            vertices: self.store.vertices_written(),
            edges: self.store.edges_written(),
            stitched_edges: self.store.stitched_edges(),
            samples_closed_early: self.closed_early,
            protocol_violations: self.violations,
            final_fire_step: self.fire_step,
            heartbeats: self.heartbeats.clone(),
            counters: self.timers.counters(),
        };
        let sink = self.store.finish()?;
        Ok(AggregatorOutcome { report, sink })
    }

    /// Collect heartbeat rounds until the sample reaches its cutoff. Returns
    /// with every worker blocked waiting for the next directive.
    async fn burn_sample(&mut self, sample: u32, inbox: &mut Inbox) -> Result<(), FireError> {
        let mut idle_rounds = 0;
        loop {
            self.rounds += 1;
            let mut added = 0;
            let mut done = false;
            for rank in 1..=self.workers() {
                let edges = self.next_heartbeat(rank, sample, inbox).await?;
                // Past the cutoff the rest of the round is drained unfolded.
                if done {
                    continue;
                }
                for (from, to) in edges {
                    added += self.store.add_edge(from, to);
                    if self.plan.reached(self.store.current().vertex_count()) {
                        done = true;
                        break;
                    }
                }
            }
            if done {
                return Ok(());
            }

            if added == 0 {
                idle_rounds += 1;
                if idle_rounds >= self.max_idle_rounds {
                    self.closed_early += 1;
                    warn!(
                        sample,
                        vertices = self.store.current().vertex_count(),
                        cutoff = self.plan.cutoff,
                        "no progress for {} rounds, closing sample early",
                        idle_rounds
                    );
                    return Ok(());
                }
                self.raise_fire_step()?;
            } else {
                idle_rounds = 0;
            }
            debug!(sample, round = self.rounds, added, "round folded");
            self.transport.broadcast_workers(&Directive::Continue.message())?;
        }
    }

    /// Next heartbeat from `rank`. Anything else is logged and skipped; a
    /// heartbeat tagged with another sample counts for the round but is not
    /// folded.
    async fn next_heartbeat(
        &mut self,
        rank: Rank,
        sample: u32,
        inbox: &mut Inbox,
    ) -> Result<Vec<(VertexId, VertexId)>, FireError> {
        loop {
            match inbox.recv_from(rank).await? {
                Message::Heartbeat { sample: tagged, edges } => {
                    self.heartbeats[rank - 1] += 1;
                    self.timers.add("heartbeat_edges", edges.len() as u64);
                    if tagged == sample {
                        return Ok(edges);
                    }
                    self.violation(rank, format!("heartbeat for sample {} during sample {}", tagged, sample));
                    return Ok(Vec::new());
                }
                other => {
                    self.violation(rank, format!("expected HEARTBEAT, got {}", other.kind()));
                }
            }
        }
    }

    async fn await_reset_acks(&mut self, sample: u32, inbox: &mut Inbox) -> Result<(), FireError> {
        for rank in 1..=self.workers() {
            loop {
                match inbox.recv_from(rank).await? {
                    Message::ResetAck { sample: acked } if acked == sample => break,
                    other => self.violation(rank, format!("expected RESET_ACK for sample {}, got {}", sample, other.kind())),
                }
            }
        }
        debug!(sample, "all workers reset");
        Ok(())
    }

    fn raise_fire_step(&mut self) -> Result<(), FireError> {
        let next = (self.fire_step * 2).min(MAX_FIRE_STEP);
        if next != self.fire_step {
            self.fire_step = next;
            debug!(fire_step = next, "raising fire step");
            self.transport.broadcast_workers(&Message::FireStep(next))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_graph::MemoryGraphSink;
    use crate::transport::mesh;

    fn heartbeat(sample: u32, edges: &[(u64, u64)]) -> Message {
        Message::Heartbeat {
            sample,
            edges: edges.to_vec(),
        }
    }

    fn config(scale: f64) -> RunConfig {
        let mut config = RunConfig::new(scale, "test");
        config.seed = Some(9);
        config
    }

    #[test]
    fn test_scale_plan_downscale() {
        let plan = ScalePlan::from_scale_factor(0.5, 4).unwrap();
        assert_eq!(plan, ScalePlan { samples: 1, cutoff: 2.0 });
        assert!(!plan.is_upscale());
    }

    #[test]
    fn test_scale_plan_between_half_and_one() {
        let plan = ScalePlan::from_scale_factor(0.8, 100).unwrap();
        assert_eq!(plan.samples, 2);
        assert!((plan.cutoff - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_plan_upscale() {
        let plan = ScalePlan::from_scale_factor(2.0, 4).unwrap();
        assert_eq!(plan, ScalePlan { samples: 4, cutoff: 2.0 });
        let plan = ScalePlan::from_scale_factor(1.75, 100).unwrap();
        assert_eq!(plan.samples, 3);
        assert!(ScalePlan::from_scale_factor(0.0, 4).is_err());
    }

    #[tokio::test]
    async fn test_cutoff_stops_folding_mid_round() {
        let mut ranks = mesh(2);
        let (w2_out, mut w2_in) = ranks.pop().unwrap();
        let (w1_out, mut w1_in) = ranks.pop().unwrap();
        let (agg_out, agg_in) = ranks.pop().unwrap();
        let aggregator = Aggregator::new(&config(0.5), 4, agg_out, MemoryGraphSink::default()).unwrap();
        let handle = tokio::spawn(aggregator.run(agg_in));

        w1_out.send(0, &heartbeat(0, &[(0, 1), (1, 0), (1, 2)])).unwrap();
        w2_out.send(0, &heartbeat(0, &[(2, 3), (3, 2)])).unwrap();
        assert_eq!(w1_in.recv().await, Some((0, Message::Kill)));
        assert_eq!(w2_in.recv().await, Some((0, Message::Kill)));

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.sink.vertices, vec![0, 1]);
        assert_eq!(outcome.sink.edges[..2], [(0, 1), (1, 0)]);
        assert!(outcome.sink.edges.iter().all(|(a, b)| *a != 3 && *b != 3));
        assert_eq!(outcome.report.heartbeats, vec![1, 1]);
    }

    #[tokio::test]
    async fn test_idle_rounds_raise_fire_step_and_close_sample() {
        let mut ranks = mesh(1);
        let (w_out, mut w_in) = ranks.pop().unwrap();
        let (agg_out, agg_in) = ranks.pop().unwrap();
        let mut cfg = config(0.5);
        cfg.max_idle_rounds = 3;
        cfg.do_stitch = false;
        let aggregator = Aggregator::new(&cfg, 10, agg_out, MemoryGraphSink::default()).unwrap();
        let handle = tokio::spawn(aggregator.run(agg_in));

        w_out.send(0, &heartbeat(0, &[])).unwrap();
        assert_eq!(w_in.recv().await, Some((0, Message::FireStep(20))));
        assert_eq!(w_in.recv().await, Some((0, Message::Continue)));
        w_out.send(0, &heartbeat(0, &[])).unwrap();
        assert_eq!(w_in.recv().await, Some((0, Message::FireStep(32))));
        assert_eq!(w_in.recv().await, Some((0, Message::Continue)));
        w_out.send(0, &heartbeat(0, &[])).unwrap();
        assert_eq!(w_in.recv().await, Some((0, Message::Kill)));

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.report.samples_closed_early, 1);
        assert_eq!(outcome.report.final_fire_step, 32);
        assert_eq!(outcome.report.rounds, 3);
    }

    #[tokio::test]
    async fn test_reset_waits_for_acks_and_skips_anomalies() {
        let mut ranks = mesh(1);
        let (w_out, mut w_in) = ranks.pop().unwrap();
        let (agg_out, agg_in) = ranks.pop().unwrap();
        let mut cfg = config(1.0);
        cfg.do_stitch = false;
        let aggregator = Aggregator::new(&cfg, 2, agg_out, MemoryGraphSink::default()).unwrap();
        assert_eq!(aggregator.plan().samples, 2);
        let handle = tokio::spawn(aggregator.run(agg_in));

        w_out.send(0, &Message::ResetAck { sample: 9 }).unwrap();
        w_out.send(0, &heartbeat(0, &[(0, 1)])).unwrap();
        assert_eq!(w_in.recv().await, Some((0, Message::Reset)));
        w_out.send(0, &Message::ResetAck { sample: 1 }).unwrap();
        w_out.send(0, &heartbeat(0, &[(0, 1)])).unwrap();
        w_out.send(0, &heartbeat(1, &[(1, 0)])).unwrap();
        let mut saw_kill = false;
        while let Some((_, msg)) = w_in.recv().await {
            if msg == Message::Kill {
                saw_kill = true;
                break;
            }
            w_out.send(0, &heartbeat(1, &[(1, 0)])).unwrap();
        }
        assert!(saw_kill);

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.report.protocol_violations, 2);
        assert_eq!(outcome.sink.vertices, vec![0, 1, 2, 3]);
    }
}
