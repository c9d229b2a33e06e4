use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use wildfire::aggregator::ScalePlan;
use wildfire::cluster::run_local;
use wildfire::config::RunConfig;
use wildfire::fire::PropagationMode;
use wildfire::{FireError, init_tracing};

#[derive(Parser)]
#[command(name = "wildfire")]
#[command(about = "Distributed forest-fire graph sampler and scaler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample and rescale a partitioned dataset
    Run {
        scale_factor: f64,
        dataset: String,
        #[arg(action = ArgAction::Set)]
        do_stitch: bool,
        #[arg(action = ArgAction::Set)]
        ring_stitch: bool,
        connectivity: f64,
        play_dir: PathBuf,
        data_dir: PathBuf,
        result_dir: PathBuf,
        /// Number of worker ranks (the dataset must be partitioned for it)
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// wild or halted
        #[arg(long)]
        mode: Option<PropagationMode>,
        #[arg(long)]
        seed: Option<u64>,
        /// JSON file with engine tunables; positional arguments win
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print how many samples a scale factor needs and their cutoff
    Plan { scale_factor: f64, vertices: u64 },
}

#[tokio::main]
async fn main() -> Result<(), FireError> {
    init_tracing("wildfire")?;
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scale_factor,
            dataset,
            do_stitch,
            ring_stitch,
            connectivity,
            play_dir,
            data_dir,
            result_dir,
            workers,
            mode,
            seed,
            config,
        } => {
            let mut run = match config {
                Some(path) => RunConfig::from_json_file(&path)?,
                None => RunConfig::new(scale_factor, &dataset),
            };
            run.scale_factor = scale_factor;
            run.dataset = dataset;
            run.do_stitch = do_stitch;
            run.ring_stitch = ring_stitch;
            run.connectivity = connectivity;
            run.play_dir = play_dir;
            run.data_dir = data_dir;
            run.result_dir = result_dir;
            if let Some(mode) = mode {
                run.mode = mode;
            }
            if seed.is_some() {
                run.seed = seed;
            }
            let summary = run_local(&run, workers).await?;
            info!(
                samples = summary.plan.samples,
                vertices = summary.vertices,
                edges = summary.edges,
                "done"
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Plan { scale_factor, vertices } => {
            let plan = ScalePlan::from_scale_factor(scale_factor, vertices)?;
            println!("samples: {}", plan.samples);
            println!("cutoff vertices per sample: {:.2}", plan.cutoff);
        }
    }
    Ok(())
}
