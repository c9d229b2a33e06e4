use std::fs;
use std::path::Path;

use wildfire::FireError;
use wildfire::cluster::run_local;
use wildfire::config::RunConfig;

/// Lay out the 4-cycle 0-1-2-3-0 partitioned over two ranks (evens on 1,
/// odds on 2) the way the partitioning tools leave it on disk.
fn write_cycle_dataset(data_dir: &Path, with_partition_files: bool) {
    let dir = data_dir.join("cycle").join("cycle-2-partitions");
    fs::create_dir_all(&dir).unwrap();
    fs::write(data_dir.join("cycle").join("cycle.v"), "0\n1\n2\n3\n").unwrap();
    fs::write(dir.join("node1.e"), "0 1\n0 3\n2 1\n2 3\n").unwrap();
    fs::write(dir.join("node2.e"), "1 0\n1 2\n3 2\n3 0\n").unwrap();
    if with_partition_files {
        fs::write(dir.join("node1.p"), "1 2\n3 2\n").unwrap();
        fs::write(dir.join("node2.p"), "0 1\n2 1\n").unwrap();
    }
}

fn config(root: &Path, scale: f64) -> RunConfig {
    let mut config = RunConfig::new(scale, "cycle");
    config.data_dir = root.join("data");
    config.play_dir = root.join("play");
    config.result_dir = root.join("results");
    config.seed = Some(2024);
    config
}

fn read_edges(path: &Path) -> Vec<(u64, u64)> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| {
            let mut parts = line.split_whitespace().map(|p| p.parse::<u64>().unwrap());
            (parts.next().unwrap(), parts.next().unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_run_local_writes_scaled_graph() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_cycle_dataset(&temp_dir.path().join("data"), true);
    let mut config = config(temp_dir.path(), 1.0);
    config.ring_stitch = true;

    let summary = run_local(&config, 2).await.unwrap();
    assert_eq!(summary.original_vertices, 4);
    assert_eq!(summary.plan.samples, 2);

    let layout = config.layout(2);
    let vertices: Vec<u64> = fs::read_to_string(layout.output_vertices())
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect();
    assert_eq!(vertices.len() as u64, summary.vertices);
    assert!(vertices.iter().all(|v| *v < 8));

    let edges = read_edges(&layout.output_edges());
    assert_eq!(edges.len() as u64, summary.edges);
    assert!(edges.iter().all(|(a, b)| a != b));

    let json = fs::read_to_string(config.result_dir.join("run_summary.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["plan"]["samples"], 2);
    assert!(config.play_dir.exists());
}

#[tokio::test]
async fn test_missing_partition_files_fall_back_to_modulo() {
    let temp_dir = tempfile::tempdir().unwrap();
    write_cycle_dataset(&temp_dir.path().join("data"), false);
    let mut config = config(temp_dir.path(), 0.5);
    config.do_stitch = false;

    let summary = run_local(&config, 2).await.unwrap();
    assert_eq!(summary.plan.samples, 1);
    assert!(summary.vertices >= 2);
}

#[tokio::test]
async fn test_malformed_edge_file_aborts_before_messaging() {
    let temp_dir = tempfile::tempdir().unwrap();
    let data_dir = temp_dir.path().join("data");
    write_cycle_dataset(&data_dir, true);
    fs::write(
        data_dir.join("cycle").join("cycle-2-partitions").join("node2.e"),
        "1 0\n1 two\n",
    )
    .unwrap();
    let config = config(temp_dir.path(), 0.5);

    let err = run_local(&config, 2).await.unwrap_err();
    match err {
        FireError::PartitionLoad { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!config.layout(2).output_edges().exists());
}
