use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::fire::{FireConfig, PropagationMode};
use crate::{FireError, Rank};

pub const DEFAULT_FIRE_STEP: u32 = 10;
pub const MAX_FIRE_STEP: u32 = 32;
pub const DEFAULT_STITCH_BATCH: usize = 10_000;

/// Parameters rank 0 broadcasts to every rank at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub scale_factor: f64,
    pub dataset: String,
    pub do_stitch: bool,
    pub ring_stitch: bool,
    pub connectivity: f64,
    pub play_dir: PathBuf,
    pub data_dir: PathBuf,
    pub result_dir: PathBuf,

    #[serde(default = "default_forward_burn_prob")]
    pub forward_burn_prob: f64,
    #[serde(default = "default_mode")]
    pub mode: PropagationMode,
    #[serde(default = "default_fire_step")]
    pub fire_step: u32,
    #[serde(default = "default_stitch_batch")]
    pub stitch_batch: usize,
    #[serde(default = "default_relight_floor")]
    pub relight_floor: u32,
    #[serde(default = "default_relight_ceiling")]
    pub relight_ceiling: u32,
    #[serde(default = "default_max_idle_rounds")]
    pub max_idle_rounds: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_forward_burn_prob() -> f64 {
    0.7
}

fn default_mode() -> PropagationMode {
    PropagationMode::Wild
}

fn default_fire_step() -> u32 {
    DEFAULT_FIRE_STEP
}

fn default_stitch_batch() -> usize {
    DEFAULT_STITCH_BATCH
}

fn default_relight_floor() -> u32 {
    4
}

fn default_relight_ceiling() -> u32 {
    24
}

fn default_max_idle_rounds() -> u64 {
    10_000
}

impl RunConfig {
    pub fn new(scale_factor: f64, dataset: &str) -> Self {
        Self {
            scale_factor,
            dataset: dataset.to_string(),
            do_stitch: true,
            ring_stitch: false,
            connectivity: 0.1,
            play_dir: PathBuf::from("./play"),
            data_dir: PathBuf::from("./data"),
            result_dir: PathBuf::from("./results"),
            forward_burn_prob: default_forward_burn_prob(),
            mode: default_mode(),
            fire_step: default_fire_step(),
            stitch_batch: default_stitch_batch(),
            relight_floor: default_relight_floor(),
            relight_ceiling: default_relight_ceiling(),
            max_idle_rounds: default_max_idle_rounds(),
            seed: None,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, FireError> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FireError> {
        if !(self.scale_factor > 0.0) || !self.scale_factor.is_finite() {
            return Err(FireError::Config(format!("scale factor must be positive, got {}", self.scale_factor)));
        }
        if !(self.connectivity > 0.0 && self.connectivity <= 1.0) {
            return Err(FireError::Config(format!("connectivity must be in (0, 1], got {}", self.connectivity)));
        }
        if !(0.0..1.0).contains(&self.forward_burn_prob) {
            return Err(FireError::Config(format!(
                "forward burning probability must be in [0, 1), got {}",
                self.forward_burn_prob
            )));
        }
        if self.stitch_batch == 0 {
            return Err(FireError::Config("stitch batch must be at least 1".to_string()));
        }
        if self.relight_ceiling < self.relight_floor || self.relight_ceiling > 40 {
            return Err(FireError::Config(format!(
                "relight exponent range {}..={} is invalid",
                self.relight_floor, self.relight_ceiling
            )));
        }
        Ok(())
    }

    pub fn fire_config(&self) -> FireConfig {
        FireConfig {
            forward_burn_prob: self.forward_burn_prob,
            mode: self.mode,
            relight_floor: self.relight_floor,
            relight_ceiling: self.relight_ceiling,
        }
    }

    /// Burst length clamped to the range workers accept.
    pub fn initial_fire_step(&self) -> u32 {
        clamp_fire_step(self.fire_step)
    }

    pub fn rank_seed(&self, rank: Rank) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(rank as u64))
    }

    pub fn layout(&self, workers: usize) -> DatasetLayout {
        DatasetLayout {
            data_dir: self.data_dir.clone(),
            result_dir: self.result_dir.clone(),
            dataset: self.dataset.clone(),
            workers,
        }
    }
}

pub fn clamp_fire_step(step: u32) -> u32 {
    step.clamp(DEFAULT_FIRE_STEP, MAX_FIRE_STEP)
}

/// Where the partitioning tools leave a dataset and where results go.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    pub data_dir: PathBuf,
    pub result_dir: PathBuf,
    pub dataset: String,
    pub workers: usize,
}

impl DatasetLayout {
    pub fn vertex_file(&self) -> PathBuf {
        self.data_dir
            .join(&self.dataset)
            .join(format!("{}.v", self.dataset))
    }

    pub fn partition_dir(&self) -> PathBuf {
        self.data_dir
            .join(&self.dataset)
            .join(format!("{}-{}-partitions", self.dataset, self.workers))
    }

    pub fn edge_file(&self, rank: Rank) -> PathBuf {
        self.partition_dir().join(format!("node{}.e", rank))
    }

    pub fn partition_file(&self, rank: Rank) -> PathBuf {
        self.partition_dir().join(format!("node{}.p", rank))
    }

    pub fn output_vertices(&self) -> PathBuf {
        self.result_dir.join("scaled_graph.v")
    }

    pub fn output_edges(&self) -> PathBuf {
        self.result_dir.join("scaled_graph.e")
    }

    /// Vertex count of the original graph: one id per line of the `.v` file.
    pub fn count_vertices(&self) -> Result<u64, FireError> {
        let text = fs::read_to_string(self.vertex_file())?;
        Ok(text.lines().filter(|l| !l.trim().is_empty()).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_tunables() {
        let json = r#"{
            "scale_factor": 2.0,
            "dataset": "web",
            "do_stitch": true,
            "ring_stitch": true,
            "connectivity": 0.1,
            "play_dir": "/tmp/play",
            "data_dir": "/tmp/data",
            "result_dir": "/tmp/res"
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.forward_burn_prob, 0.7);
        assert_eq!(config.mode, PropagationMode::Wild);
        assert_eq!(config.fire_step, 10);
        assert_eq!(config.stitch_batch, 10_000);
        assert_eq!(config.seed, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RunConfig::new(0.0, "g");
        assert!(config.validate().is_err());
        config.scale_factor = 0.5;
        config.connectivity = 1.5;
        assert!(config.validate().is_err());
        config.connectivity = 1.0;
        config.forward_burn_prob = 1.0;
        assert!(config.validate().is_err());
        config.forward_burn_prob = 0.7;
        config.validate().unwrap();
    }

    #[test]
    fn test_fire_step_clamped() {
        assert_eq!(clamp_fire_step(1), 10);
        assert_eq!(clamp_fire_step(20), 20);
        assert_eq!(clamp_fire_step(100), 32);
    }

    #[test]
    fn test_layout_paths() {
        let mut config = RunConfig::new(1.0, "web");
        config.data_dir = PathBuf::from("/d");
        config.result_dir = PathBuf::from("/r");
        let layout = config.layout(4);
        assert_eq!(layout.vertex_file(), PathBuf::from("/d/web/web.v"));
        assert_eq!(layout.edge_file(2), PathBuf::from("/d/web/web-4-partitions/node2.e"));
        assert_eq!(layout.partition_file(3), PathBuf::from("/d/web/web-4-partitions/node3.p"));
        assert_eq!(layout.output_edges(), PathBuf::from("/r/scaled_graph.e"));
    }

    #[test]
    fn test_count_vertices_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::new(1.0, "tiny");
        config.data_dir = temp_dir.path().to_path_buf();
        let layout = config.layout(1);
        fs::create_dir_all(layout.vertex_file().parent().unwrap()).unwrap();
        fs::write(layout.vertex_file(), "0\n1\n2\n\n").unwrap();
        assert_eq!(layout.count_vertices().unwrap(), 3);
    }

    #[test]
    fn test_rank_seed_offsets() {
        let mut config = RunConfig::new(1.0, "g");
        assert_eq!(config.rank_seed(2), None);
        config.seed = Some(40);
        assert_eq!(config.rank_seed(2), Some(42));
    }
}
