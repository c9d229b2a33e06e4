use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::Rng;
use rustc_hash::FxHashSet;

use crate::edge_set::EdgeSet;
use crate::stitch::{StitchTopology, stitch};
use crate::{FireError, VertexId};

/// Destination for the scaled graph. Edges arrive one completed sample at a
/// time, stitch edges last.
pub trait GraphSinkLike {
    fn write_vertices(&mut self, vertices: &[VertexId]) -> Result<(), FireError>;
    fn write_edges(&mut self, edges: &[(VertexId, VertexId)]) -> Result<(), FireError>;
    fn flush(&mut self) -> Result<(), FireError>;
}

/// Writes `{result}/scaled_graph.v` (one id per line) and
/// `{result}/scaled_graph.e` (`"src dst"` per line).
pub struct FileGraphSink {
    vertices: BufWriter<File>,
    edges: BufWriter<File>,
}

impl FileGraphSink {
    pub fn create(vertex_path: &Path, edge_path: &Path) -> Result<Self, FireError> {
        for path in [vertex_path, edge_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            vertices: BufWriter::new(File::create(vertex_path)?),
            edges: BufWriter::new(File::create(edge_path)?),
        })
    }
}

impl GraphSinkLike for FileGraphSink {
    fn write_vertices(&mut self, vertices: &[VertexId]) -> Result<(), FireError> {
        for v in vertices {
            writeln!(self.vertices, "{}", v)?;
        }
        Ok(())
    }

    fn write_edges(&mut self, edges: &[(VertexId, VertexId)]) -> Result<(), FireError> {
        for (src, dst) in edges {
            writeln!(self.edges, "{} {}", src, dst)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FireError> {
        self.vertices.flush()?;
        self.edges.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryGraphSink {
    pub vertices: Vec<VertexId>,
    pub edges: Vec<(VertexId, VertexId)>,
    pub flushes: usize,
}

impl GraphSinkLike for MemoryGraphSink {
    fn write_vertices(&mut self, vertices: &[VertexId]) -> Result<(), FireError> {
        self.vertices.extend_from_slice(vertices);
        Ok(())
    }

    fn write_edges(&mut self, edges: &[(VertexId, VertexId)]) -> Result<(), FireError> {
        self.edges.extend_from_slice(edges);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FireError> {
        self.flushes += 1;
        Ok(())
    }
}

/// Vertices and symmetric edges burned in one sample, in original ids.
#[derive(Debug, Clone)]
pub struct SampleGraph {
    index: u32,
    offset: u64,
    vertices: FxHashSet<VertexId>,
    edges: EdgeSet,
}

impl SampleGraph {
    pub fn new(index: u32, original_vertices: u64) -> Self {
        Self {
            index,
            offset: index as u64 * original_vertices,
            vertices: FxHashSet::default(),
            edges: EdgeSet::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Fold one edge in; returns how many vertices were new to the sample.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId) -> usize {
        self.edges.add_edge(from, to);
        self.vertices.insert(from) as usize + self.vertices.insert(to) as usize
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_edge(&self, from: VertexId, to: VertexId) -> bool {
        self.edges.contains(from, to)
    }

    /// Shift every id by the sample's offset.
    pub fn finalize(self) -> FinishedSample {
        let offset = self.offset;
        let mut vertices: Vec<VertexId> = self.vertices.into_iter().map(|v| v + offset).collect();
        vertices.sort_unstable();
        let edges = self
            .edges
            .list_rep()
            .into_iter()
            .map(|(a, b)| (a + offset, b + offset))
            .collect();
        FinishedSample {
            index: self.index,
            vertices,
            edges,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FinishedSample {
    pub index: u32,
    pub vertices: Vec<VertexId>,
    pub edges: Vec<(VertexId, VertexId)>,
}

/// Aggregator-side store: the sample being burned plus the final vertex
/// ids of every completed sample, kept for stitching. Edges are streamed
/// to the sink as each sample completes.
pub struct SampleStore<S: GraphSinkLike> {
    original_vertices: u64,
    current: SampleGraph,
    completed: Vec<Vec<VertexId>>,
    sink: S,
    edges_written: u64,
    stitched_edges: u64,
}

impl<S: GraphSinkLike> SampleStore<S> {
    pub fn new(original_vertices: u64, sink: S) -> Self {
        Self {
            original_vertices,
            current: SampleGraph::new(0, original_vertices),
            completed: Vec::new(),
            sink,
            edges_written: 0,
            stitched_edges: 0,
        }
    }

    pub fn current(&self) -> &SampleGraph {
        &self.current
    }

    pub fn add_edge(&mut self, from: VertexId, to: VertexId) -> usize {
        self.current.add_edge(from, to)
    }

    /// Write out the current sample and start the next one.
    pub fn finish_sample(&mut self) -> Result<FinishedSample, FireError> {
        let next = SampleGraph::new(self.current.index() + 1, self.original_vertices);
        let finished = std::mem::replace(&mut self.current, next).finalize();
        self.sink.write_vertices(&finished.vertices)?;
        self.sink.write_edges(&finished.edges)?;
        self.sink.flush()?;
        self.edges_written += finished.edges.len() as u64;
        self.completed.push(finished.vertices.clone());
        Ok(finished)
    }

    /// Stitch the completed samples together, writing each batch of stitch
    /// edges as it is drawn. Returns the directed edges written.
    pub fn stitch<R: Rng>(
        &mut self,
        topology: StitchTopology,
        connectivity: f64,
        batch: usize,
        rng: &mut R,
    ) -> Result<u64, FireError> {
        let Self {
            completed,
            sink,
            edges_written,
            stitched_edges,
            ..
        } = self;
        let before = *stitched_edges;
        stitch(topology, completed, connectivity, batch, rng, |edges| {
            let edges = edges.list_rep();
            sink.write_edges(&edges)?;
            sink.flush()?;
            *stitched_edges += edges.len() as u64;
            *edges_written += edges.len() as u64;
            Ok(())
        })?;
        Ok(*stitched_edges - before)
    }

    pub fn edges_written(&self) -> u64 {
        self.edges_written
    }

    pub fn stitched_edges(&self) -> u64 {
        self.stitched_edges
    }

    pub fn vertices_written(&self) -> u64 {
        self.completed.iter().map(|s| s.len() as u64).sum()
    }

    pub fn finish(mut self) -> Result<S, FireError> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}
