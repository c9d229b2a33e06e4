use std::fs;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::aggregator::{Aggregator, AggregatorReport, ScalePlan};
use crate::config::RunConfig;
use crate::fire::FireEngine;
use crate::partition::{PartitionMap, PartitionedGraph, VertexStatus};
use crate::sample_graph::{FileGraphSink, GraphSinkLike, MemoryGraphSink};
use crate::transport::{TransportLike, mesh};
use crate::worker::{Worker, WorkerReport};
use crate::{FireError, Rank};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub workers: usize,
    pub original_vertices: u64,
    pub plan: ScalePlan,
    pub vertices: u64,
    pub edges: u64,
    pub stitched_edges: u64,
    pub rounds: u64,
    pub aggregator: AggregatorReport,
    pub worker_reports: Vec<WorkerReport>,
}

impl RunSummary {
    /// Heartbeats the aggregator received from each worker rank.
    pub fn heartbeats_by_rank(&self) -> Vec<(Rank, u64)> {
        self.aggregator
            .heartbeats
            .iter()
            .enumerate()
            .map(|(i, n)| (i + 1, *n))
            .collect()
    }
}

fn rng_for(config: &RunConfig, rank: Rank) -> StdRng {
    match config.rank_seed(rank) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn joined<T>(res: Result<Result<T, FireError>, JoinError>) -> Result<T, FireError> {
    res.map_err(|e| FireError::Other(format!("task failed: {}", e)))?
}

/// Load every rank's partition from the dataset layout, run the fleet, and
/// write `scaled_graph.{v,e}` plus `run_summary.json` under the result dir.
pub async fn run_local(config: &RunConfig, workers: usize) -> Result<RunSummary, FireError> {
    config.validate()?;
    if workers == 0 {
        return Err(FireError::Config("at least one worker rank is required".to_string()));
    }
    let layout = config.layout(workers);
    let original_vertices = layout.count_vertices()?;

    let partition_files: Vec<_> = (1..=workers).map(|r| layout.partition_file(r)).collect();
    let mut owners = PartitionMap::from_partition_files(&partition_files, workers)?;
    let mut graphs = Vec::with_capacity(workers);
    for rank in 1..=workers {
        let graph = PartitionedGraph::from_file(rank, &layout.edge_file(rank), &owners)?;
        info!(
            rank,
            local = graph.local_vertex_count(),
            adjacency = graph.adjacency_len(),
            "partition loaded"
        );
        graphs.push(graph);
    }
    for graph in &graphs {
        for v in graph.vertices_with_status(VertexStatus::NotBurned) {
            owners.claim(v, graph.rank());
        }
    }

    fs::create_dir_all(&config.play_dir)?;
    let sink = FileGraphSink::create(&layout.output_vertices(), &layout.output_edges())?;
    let (summary, _) = launch(config, graphs, owners, original_vertices, sink).await?;

    let summary_path = config.result_dir.join("run_summary.json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    info!(path = %summary_path.display(), "run summary written");
    Ok(summary)
}

/// Run the fleet over pre-built partitions, one per worker rank in order,
/// collecting the output graph in memory.
pub async fn run_in_memory(
    config: &RunConfig,
    graphs: Vec<PartitionedGraph>,
    owners: PartitionMap,
    original_vertices: u64,
) -> Result<(RunSummary, MemoryGraphSink), FireError> {
    config.validate()?;
    launch(config, graphs, owners, original_vertices, MemoryGraphSink::default()).await
}

async fn launch<S>(
    config: &RunConfig,
    graphs: Vec<PartitionedGraph>,
    owners: PartitionMap,
    original_vertices: u64,
    sink: S,
) -> Result<(RunSummary, S), FireError>
where
    S: GraphSinkLike + Send + 'static,
{
    let workers = graphs.len();
    let mut ranks = mesh(workers).into_iter();
    let (agg_out, agg_in) = ranks
        .next()
        .ok_or_else(|| FireError::Other("mesh has no aggregator rank".to_string()))?;
    let aggregator = Aggregator::new(config, original_vertices, agg_out, sink)?;

    let owners = Arc::new(owners);
    let mut fleet = JoinSet::new();
    for ((outbox, inbox), graph) in ranks.zip(graphs) {
        let rank = outbox.rank();
        if graph.rank() != rank {
            return Err(FireError::Config(format!(
                "partition for rank {} supplied in slot {}",
                graph.rank(),
                rank
            )));
        }
        let engine = FireEngine::new(graph, config.fire_config(), rng_for(config, rank))?;
        let worker = Worker::new(engine, Arc::clone(&owners), outbox, config.initial_fire_step());
        fleet.spawn(worker.run(inbox));
    }

    let mut aggregator = tokio::spawn(aggregator.run(agg_in));
    let mut worker_reports = Vec::with_capacity(workers);
    let outcome = loop {
        tokio::select! {
            res = &mut aggregator => match joined(res) {
                Ok(outcome) => break outcome,
                Err(e) => {
                    error!("aggregator failed: {}", e);
                    fleet.abort_all();
                    return Err(e);
                }
            },
            Some(res) = fleet.join_next() => match joined(res) {
                Ok(report) => worker_reports.push(report),
                Err(e) => {
                    error!("worker failed: {}", e);
                    aggregator.abort();
                    fleet.abort_all();
                    return Err(e);
                }
            },
        }
    };
    while let Some(res) = fleet.join_next().await {
        worker_reports.push(joined(res)?);
    }
    worker_reports.sort_by_key(|r| r.rank);

    let report = outcome.report;
    let summary = RunSummary {
        workers,
        original_vertices,
        plan: report.plan,
        vertices: report.vertices,
        edges: report.edges,
        stitched_edges: report.stitched_edges,
        rounds: report.rounds,
        aggregator: report,
        worker_reports,
    };
    info!(
        samples = summary.plan.samples,
        vertices = summary.vertices,
        edges = summary.edges,
        stitched = summary.stitched_edges,
        "run complete"
    );
    Ok((summary, outcome.sink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partition_slot_mismatch_rejected() {
        let map = PartitionMap::modulo(1);
        let graph = PartitionedGraph::from_edges(2, [(0, 1)], &map);
        let config = RunConfig::new(0.5, "g");
        let err = run_in_memory(&config, vec![graph], map, 2).await.unwrap_err();
        assert!(matches!(err, FireError::Config(_)));
    }

    #[tokio::test]
    async fn test_single_worker_path_graph() {
        let map = PartitionMap::modulo(1);
        let edges: Vec<_> = (0..9u64).flat_map(|v| [(v, v + 1), (v + 1, v)]).collect();
        let graph = PartitionedGraph::from_edges(1, edges, &map);
        let mut config = RunConfig::new(0.5, "path");
        config.seed = Some(1);
        let (summary, sink) = run_in_memory(&config, vec![graph], map, 10).await.unwrap();
        assert_eq!(summary.plan.samples, 1);
        assert!(summary.vertices >= 5);
        assert_eq!(summary.heartbeats_by_rank()[0].0, 1);
        let sampled = (summary.edges - summary.stitched_edges) as usize;
        for (a, b) in &sink.edges[..sampled] {
            assert_eq!(a.abs_diff(*b), 1, "({}, {}) is not a path edge", a, b);
        }
    }
}
