use std::error::Error;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ks_runtime::{draw_regions, Detector, Preprocess};

/// Run a detection network on images and print the regions it finds.
#[derive(Debug, clap::Parser)]
struct Args {
    /// The JSON graph description.
    param: String,
    /// The little-endian f32 weight file.
    weights: String,
    /// Images to run the network on.
    #[clap(required = true)]
    images: Vec<String>,

    #[clap(short, long, default_value_t = 0.5)]
    threshold: f32,
    #[clap(short = 'v', long, default_value_t = 0.45)]
    overlap: f32,

    #[clap(long, default_value_t = 1.0 / 255.0)]
    scale: f32,
    #[clap(long, num_args = 3, default_values_t = [0.0, 0.0, 0.0])]
    mean: Vec<f32>,
    #[clap(long)]
    bgr: bool,

    /// Write copies of the images with the regions drawn on top into this directory.
    #[clap(short, long)]
    output: Option<String>,

    /// Log filter, same syntax as `RUST_LOG`.
    #[clap(long, default_value = "info")]
    log: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log)?)
        .init();

    let preprocess = Preprocess {
        scale: args.scale,
        mean: [args.mean[0], args.mean[1], args.mean[2]],
        bgr: args.bgr,
    };
    let mut detector = Detector::load(&args.param, &args.weights, preprocess)?;
    info!("Network input size: {:?}", detector.input_size());

    if let Some(output) = &args.output {
        std::fs::create_dir_all(output)?;
    }

    for path in &args.images {
        let mut image = image::open(path)?.to_rgb8();

        let start = Instant::now();
        let regions = detector.detect(&image, args.threshold, args.overlap)?;
        info!("{}: {} regions in {:?}", path, regions.len(), start.elapsed());

        for region in &regions {
            println!(
                "{}: class {} p={:.3} x={:.1} y={:.1} w={:.1} h={:.1}",
                path, region.id, region.prob, region.x, region.y, region.w, region.h
            );
        }

        if let Some(output) = &args.output {
            draw_regions(&mut image, &regions);
            let name = std::path::Path::new(path).file_name().ok_or("image path without file name")?;
            image.save(std::path::Path::new(output).join(name))?;
        }
    }

    Ok(())
}
