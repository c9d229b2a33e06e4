use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Geometric};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::edge_set::EdgeSet;
use crate::partition::{PartitionedGraph, VertexStatus};
use crate::{FireError, VertexId};

/// Whether a worker asks the owning peer to ignite a remote neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationMode {
    Wild,
    /// Crossing edges are recorded but no burn request is ever sent.
    Halted,
}

impl std::str::FromStr for PropagationMode {
    type Err = FireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wild" => Ok(PropagationMode::Wild),
            "halted" => Ok(PropagationMode::Halted),
            other => Err(FireError::Config(format!("unknown propagation mode {:?}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FireConfig {
    /// Expected burned neighbors per vertex is `p / (1 - p)`.
    pub forward_burn_prob: f64,
    pub mode: PropagationMode,
    pub relight_floor: u32,
    pub relight_ceiling: u32,
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            forward_burn_prob: 0.7,
            mode: PropagationMode::Wild,
            relight_floor: 4,
            relight_ceiling: 24,
        }
    }
}

/// Adaptive backoff deciding how many vertices to relight when the local
/// queue runs dry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelightPolicy {
    exponent: u32,
    budget: u64,
    floor: u32,
    ceiling: u32,
}

impl RelightPolicy {
    pub fn new(floor: u32, ceiling: u32) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            exponent: floor,
            budget: 1 << (floor + 1),
            floor,
            ceiling,
        }
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// A step found work in the queue.
    pub fn tick(&mut self) {
        self.budget = self.budget.saturating_sub(1);
        if self.budget <= 1 {
            if self.exponent > self.floor {
                self.exponent -= 1;
            }
            self.budget = 1 << (self.exponent + 4);
        }
    }

    /// A step found the queue empty. Returns how many vertices to ignite.
    pub fn on_empty(&mut self) -> usize {
        let count = 1usize << self.exponent;
        self.budget = 1 << (self.exponent + 4);
        if self.exponent < self.ceiling {
            self.exponent += 1;
        }
        count
    }
}

/// Per-sample fire bookkeeping.
#[derive(Debug, Clone)]
pub struct FireState {
    pub burning_queue: VecDeque<VertexId>,
    pub remote_pending: FxHashSet<VertexId>,
    pub remote_confirmed: FxHashSet<VertexId>,
    pub relight: RelightPolicy,
}

impl FireState {
    fn new(config: &FireConfig) -> Self {
        Self {
            burning_queue: VecDeque::new(),
            remote_pending: FxHashSet::default(),
            remote_confirmed: FxHashSet::default(),
            relight: RelightPolicy::new(config.relight_floor, config.relight_ceiling),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Spread { vertex: VertexId, ignited: usize },
    Relit { ignited: usize },
    /// Queue empty and nothing local left to ignite.
    Exhausted,
}

pub struct FireEngine {
    graph: PartitionedGraph,
    state: FireState,
    config: FireConfig,
    spread: Geometric,
    rng: StdRng,
}

impl FireEngine {
    pub fn new(graph: PartitionedGraph, config: FireConfig, rng: StdRng) -> Result<Self, FireError> {
        let p = config.forward_burn_prob;
        if !(0.0..1.0).contains(&p) {
            return Err(FireError::Config(format!(
                "forward burning probability must be in [0, 1), got {}",
                p
            )));
        }
        let spread = Geometric::new(1.0 - p)
            .map_err(|e| FireError::Config(format!("geometric distribution: {}", e)))?;
        Ok(Self {
            state: FireState::new(&config),
            graph,
            config,
            spread,
            rng,
        })
    }

    pub fn graph(&self) -> &PartitionedGraph {
        &self.graph
    }

    pub fn state(&self) -> &FireState {
        &self.state
    }

    pub fn mode(&self) -> PropagationMode {
        self.config.mode
    }

    /// Mark up to `count` random `NotBurned` local vertices as burning.
    pub fn ignite_random(&mut self, count: usize) -> Vec<VertexId> {
        let candidates = self.graph.vertices_with_status(VertexStatus::NotBurned);
        let chosen: Vec<VertexId> = candidates
            .choose_multiple(&mut self.rng, count)
            .copied()
            .collect();
        for &v in &chosen {
            self.graph.set_status(v, VertexStatus::Burning);
            self.state.burning_queue.push_back(v);
        }
        chosen
    }

    pub fn spread_one_step(&mut self, sink: &mut EdgeSet) -> StepOutcome {
        let Some(vertex) = self.state.burning_queue.pop_front() else {
            let count = self.state.relight.on_empty();
            let ignited = self.ignite_random(count);
            if ignited.is_empty() {
                return StepOutcome::Exhausted;
            }
            return StepOutcome::Relit { ignited: ignited.len() };
        };
        self.state.relight.tick();

        let not_burned = self.graph.neighbors_with_status(vertex, VertexStatus::NotBurned);
        let already_burned = self.graph.neighbors_with_status(vertex, VertexStatus::Burned);

        let drawn = self.spread.sample(&mut self.rng) as usize;
        let k = drawn.min(not_burned.len());
        let chosen: Vec<VertexId> = not_burned
            .choose_multiple(&mut self.rng, k)
            .copied()
            .collect();

        for &n in &chosen {
            if self.graph.set_status(n, VertexStatus::Burning) {
                self.state.burning_queue.push_back(n);
            } else if !self.state.remote_confirmed.contains(&n) {
                self.state.remote_pending.insert(n);
            }
            sink.add_edge(vertex, n);
        }
        for m in already_burned {
            sink.add_edge(vertex, m);
        }

        self.graph.set_status(vertex, VertexStatus::Burned);
        StepOutcome::Spread {
            vertex,
            ignited: chosen.len(),
        }
    }

    /// Ignite vertices a peer asked for. They already burned at the origin,
    /// so they enter as `Burned` but are still queued for their neighbors.
    pub fn merge_remote_ignition(&mut self, vertices: &[VertexId]) -> usize {
        let mut merged = 0;
        for &v in vertices {
            if self.graph.status(v) != VertexStatus::NotBurned {
                continue;
            }
            self.graph.set_status(v, VertexStatus::Burned);
            self.state.burning_queue.push_back(v);
            self.state.remote_confirmed.insert(v);
            merged += 1;
        }
        merged
    }

    /// Remote vertices awaiting a burn request, in id order.
    pub fn pending_requests(&self) -> Vec<VertexId> {
        let mut pending: Vec<VertexId> = self.state.remote_pending.iter().copied().collect();
        pending.sort_unstable();
        pending
    }

    pub fn reset_remote_pending(&mut self) {
        let pending = std::mem::take(&mut self.state.remote_pending);
        self.state.remote_confirmed.extend(pending);
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.burning_queue.is_empty()
            && self.graph.count_with_status(VertexStatus::NotBurned) == 0
    }

    /// Clear everything for a new sample.
    pub fn reset(&mut self) {
        self.graph.set_all_status(VertexStatus::NotBurned);
        self.state = FireState::new(&self.config);
    }
}
