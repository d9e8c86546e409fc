use std::path::PathBuf;

use clap::Parser;
use lvis_rs::{Lvis, LvisConfig, ResultsConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lvis")]
#[command(about = "Load, index and query LVIS annotations and detection results")]
struct Cli {
    /// Path to ground truth annotations JSON file
    #[arg(long)]
    gt: PathBuf,

    /// Path to detection results JSON file
    #[arg(long)]
    dt: Option<PathBuf>,

    /// Attach a boundary RLE to every annotation while indexing
    #[arg(long)]
    precompute_boundary: bool,

    /// Boundary erosion radius as a fraction of the image diagonal
    #[arg(long, default_value_t = 0.02)]
    dilation_ratio: f64,

    /// Upper bound on boundary workers
    #[arg(long, default_value_t = 80)]
    max_cpu_num: usize,

    /// Max detections kept per image (-1 for unlimited)
    #[arg(long, default_value_t = 300, allow_negative_numbers = true)]
    max_dets_per_im: i64,

    /// Max detections kept per category (-1 for unlimited)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    max_dets_per_cat: i64,

    /// Filter to specific image IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    img_ids: Option<Vec<u64>>,

    /// Filter to specific category IDs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    cat_ids: Option<Vec<u64>>,

    /// Open area range "lo,hi" for the annotation filter
    #[arg(long, value_delimiter = ',', num_args = 2, allow_negative_numbers = true)]
    area_rng: Option<Vec<f64>>,

    /// Download the selected images into this directory
    #[cfg(feature = "download")]
    #[arg(long)]
    download: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let area_rng = match cli.area_rng.as_deref() {
        None => None,
        Some(&[lo, hi]) => Some([lo, hi]),
        Some(other) => {
            eprintln!("--area-rng takes exactly two values, got {}", other.len());
            std::process::exit(1);
        }
    };

    let config = LvisConfig {
        precompute_boundary: cli.precompute_boundary,
        dilation_ratio: cli.dilation_ratio,
        max_cpu_num: cli.max_cpu_num,
    };

    info!("Loading ground truth from {:?}", cli.gt);
    let lvis_gt = Lvis::new(&cli.gt, config)?;

    let lvis = match &cli.dt {
        Some(dt) => {
            let results_config = ResultsConfig::from_signed(cli.max_dets_per_cat, cli.max_dets_per_im);
            info!("Loading detections from {:?}", dt);
            lvis_gt.load_results(dt, &results_config)?
        }
        None => lvis_gt,
    };

    let ann_ids = lvis.get_ann_ids(cli.img_ids.as_deref(), cli.cat_ids.as_deref(), area_rng);
    let selected_imgs = lvis.load_imgs(cli.img_ids.as_deref())?;

    #[cfg(feature = "download")]
    if let Some(dir) = &cli.download {
        lvis.download(dir, cli.img_ids.as_deref())?;
    }

    // Machine-readable summary on stdout; logs go to stderr.
    println!("images: {}", lvis.dataset().images.len());
    println!("categories: {}", lvis.dataset().categories.len());
    println!("annotations: {}", lvis.dataset().annotations.len());
    println!("selected images: {}", selected_imgs.len());
    println!("selected annotations: {}", ann_ids.len());
    if lvis.config().precompute_boundary {
        let with_boundary = lvis
            .dataset()
            .annotations
            .iter()
            .filter(|ann| ann.boundary.is_some())
            .count();
        println!("annotations with boundary: {}", with_boundary);
    }

    Ok(())
}
