use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{FireError, Rank, VertexId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexStatus {
    NotBurned,
    Burning,
    Burned,
    /// Referenced as a neighbor but owned by another partition.
    Unknown,
}

/// Deterministic vertex -> worker rank assignment shared by every worker.
#[derive(Debug, Clone)]
pub enum PartitionMap {
    /// `v % workers + 1`
    Modulo { workers: usize },
    Table {
        workers: usize,
        owners: FxHashMap<VertexId, Rank>,
    },
}

impl PartitionMap {
    pub fn modulo(workers: usize) -> Self {
        PartitionMap::Modulo { workers }
    }

    pub fn workers(&self) -> usize {
        match self {
            PartitionMap::Modulo { workers } | PartitionMap::Table { workers, .. } => *workers,
        }
    }

    pub fn owner(&self, vertex: VertexId) -> Option<Rank> {
        match self {
            PartitionMap::Modulo { workers } if *workers > 0 => {
                Some((vertex % *workers as u64) as Rank + 1)
            }
            PartitionMap::Modulo { .. } => None,
            PartitionMap::Table { owners, .. } => owners.get(&vertex).copied(),
        }
    }

    /// Parse `"vertex rank"` lines.
    pub fn load<R: BufRead>(path: &Path, reader: R, workers: usize) -> Result<Self, FireError> {
        let mut owners = FxHashMap::default();
        for (vertex, rank, line) in parse_pairs(path, reader)? {
            let rank = rank as Rank;
            if rank == 0 || rank > workers {
                return Err(FireError::PartitionLoad {
                    path: path.to_path_buf(),
                    line,
                    reason: format!("rank {} outside 1..={}", rank, workers),
                });
            }
            owners.insert(vertex, rank);
        }
        Ok(PartitionMap::Table { workers, owners })
    }

    pub fn from_file(path: &Path, workers: usize) -> Result<Self, FireError> {
        let file = File::open(path)?;
        Self::load(path, BufReader::new(file), workers)
    }

    /// Union of the per-rank partition files that exist; `Modulo` when none do.
    pub fn from_partition_files<P: AsRef<Path>>(paths: &[P], workers: usize) -> Result<Self, FireError> {
        let mut merged: Option<FxHashMap<VertexId, Rank>> = None;
        for path in paths {
            let path: &Path = path.as_ref();
            if !path.exists() {
                continue;
            }
            if let PartitionMap::Table { owners, .. } = Self::from_file(path, workers)? {
                merged.get_or_insert_with(FxHashMap::default).extend(owners);
            }
        }
        Ok(match merged {
            Some(owners) => PartitionMap::Table { workers, owners },
            None => PartitionMap::modulo(workers),
        })
    }

    /// Record that `rank` owns `vertex`. No-op for `Modulo`.
    pub fn claim(&mut self, vertex: VertexId, rank: Rank) {
        if let PartitionMap::Table { owners, .. } = self {
            owners.insert(vertex, rank);
        }
    }
}

/// One worker's share of the graph: adjacency for locally owned vertices
/// plus their burn status. Neighbor ids may belong to other partitions.
#[derive(Debug, Clone)]
pub struct PartitionedGraph {
    rank: Rank,
    neighbors: FxHashMap<VertexId, FxHashSet<VertexId>>,
    status: FxHashMap<VertexId, VertexStatus>,
}

impl PartitionedGraph {
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            neighbors: FxHashMap::default(),
            status: FxHashMap::default(),
        }
    }

    /// Read `"local neighbor"` pairs, then declare every neighbor the
    /// partition map assigns to this rank as local as well.
    pub fn load<R: BufRead>(
        rank: Rank,
        path: &Path,
        reader: R,
        map: &PartitionMap,
    ) -> Result<Self, FireError> {
        let pairs = parse_pairs(path, reader)?;
        Ok(Self::from_edges(rank, pairs.into_iter().map(|(a, b, _)| (a, b)), map))
    }

    pub fn from_file(rank: Rank, path: &Path, map: &PartitionMap) -> Result<Self, FireError> {
        let file = File::open(path)?;
        Self::load(rank, path, BufReader::new(file), map)
    }

    pub fn from_edges<I>(rank: Rank, edges: I, map: &PartitionMap) -> Self
    where
        I: IntoIterator<Item = (VertexId, VertexId)>,
    {
        let mut graph = Self::new(rank);
        let mut referenced = Vec::new();
        for (from, to) in edges {
            graph.add_vertex_and_neighbor(from, to);
            referenced.push(to);
        }
        for to in referenced {
            if map.owner(to) == Some(rank) {
                graph.declare_local(to);
            }
        }
        graph
    }

    pub fn add_vertex_and_neighbor(&mut self, from: VertexId, to: VertexId) {
        self.status.entry(from).or_insert(VertexStatus::NotBurned);
        self.neighbors.entry(from).or_default().insert(to);
    }

    pub fn declare_local(&mut self, vertex: VertexId) {
        self.status.entry(vertex).or_insert(VertexStatus::NotBurned);
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn is_local(&self, vertex: VertexId) -> bool {
        self.status.contains_key(&vertex)
    }

    pub fn status(&self, vertex: VertexId) -> VertexStatus {
        self.status.get(&vertex).copied().unwrap_or(VertexStatus::Unknown)
    }

    /// Returns false (and changes nothing) for ids this partition does not own.
    pub fn set_status(&mut self, vertex: VertexId, status: VertexStatus) -> bool {
        match self.status.get_mut(&vertex) {
            Some(entry) => {
                *entry = status;
                true
            }
            None => false,
        }
    }

    pub fn set_all_status(&mut self, status: VertexStatus) {
        for entry in self.status.values_mut() {
            *entry = status;
        }
    }

    pub fn neighbors(&self, vertex: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.neighbors.get(&vertex).into_iter().flatten().copied()
    }

    /// Neighbors whose local status equals `status`. Remote neighbors are
    /// always part of a `NotBurned` query since their state is unknown here.
    pub fn neighbors_with_status(&self, vertex: VertexId, status: VertexStatus) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self
            .neighbors(vertex)
            .filter(|n| match self.status.get(n) {
                Some(s) => *s == status,
                None => status == VertexStatus::NotBurned,
            })
            .collect();
        out.sort_unstable();
        out
    }

    /// Locally owned vertices with the given status, in id order.
    pub fn vertices_with_status(&self, status: VertexStatus) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self
            .status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(v, _)| *v)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn count_with_status(&self, status: VertexStatus) -> usize {
        self.status.values().filter(|s| **s == status).count()
    }

    pub fn local_vertex_count(&self) -> usize {
        self.status.len()
    }

    pub fn adjacency_len(&self) -> usize {
        self.neighbors.values().map(|n| n.len()).sum()
    }
}

fn parse_pairs<R: BufRead>(path: &Path, reader: R) -> Result<Vec<(u64, u64, usize)>, FireError> {
    let mut pairs = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let bad = |reason: String| FireError::PartitionLoad {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };
        let mut fields = trimmed.split_whitespace();
        let (Some(a), Some(b), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(bad(format!("expected two ids, got {:?}", trimmed)));
        };
        let a = a.parse::<u64>().map_err(|e| bad(format!("{:?}: {}", a, e)))?;
        let b = b.parse::<u64>().map_err(|e| bad(format!("{:?}: {}", b, e)))?;
        pairs.push((a, b, idx + 1));
    }
    Ok(pairs)
}
