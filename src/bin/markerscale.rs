extern crate markerscale;
extern crate structopt;
extern crate tracing_subscriber;

use markerscale::mesh::{scale_ply_mesh, write_landmarks};
use markerscale::synthetic::{generate, SyntheticOptions};
use markerscale::*;
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::info;

#[derive(StructOpt, Debug)]
struct ScaleOpt {
    /// Posed views in .scene or .bscene format.
    #[structopt(name = "SCENE", parse(from_os_str))]
    scene: PathBuf,

    /// Marker detections, one marker per line.
    #[structopt(name = "DETECTIONS", parse(from_os_str))]
    detections: PathBuf,

    /// Edge length of the markers. The scale factor maps the scene to these units.
    #[structopt(long = "marker-size")]
    marker_size: f64,

    /// Write the scaled scene here.
    #[structopt(long = "output-scene", parse(from_os_str))]
    output_scene: Option<PathBuf>,

    /// Only use views whose image is listed in this file.
    #[structopt(long = "include-from", parse(from_os_str))]
    include_from: Option<PathBuf>,

    /// Ignore views whose image is listed in this file.
    #[structopt(long = "exclude-from", parse(from_os_str))]
    exclude_from: Option<PathBuf>,

    /// Detections were made on undistorted images.
    #[structopt(long = "undistorted")]
    undistorted: bool,

    /// Triangulate landmarks from all observations instead of with RANSAC.
    #[structopt(long = "no-ransac")]
    no_ransac: bool,

    /// Seed for RANSAC sampling.
    #[structopt(long = "seed", default_value = "0")]
    seed: u64,

    /// Maximum number of RANSAC iterations per landmark.
    #[structopt(long = "max-iters", default_value = "1000")]
    max_iters: usize,

    /// Write triangulated landmarks (.obj or .ply) before scaling.
    #[structopt(long = "save-landmarks", parse(from_os_str))]
    save_landmarks: Option<PathBuf>,

    /// Write triangulated landmarks (.obj or .ply) after scaling.
    #[structopt(long = "save-scaled-landmarks", parse(from_os_str))]
    save_scaled_landmarks: Option<PathBuf>,

    /// Scale a .ply mesh: `--scale-mesh <in> <out>`. May be repeated.
    #[structopt(long = "scale-mesh", parse(from_os_str), number_of_values = 2)]
    scale_mesh: Vec<PathBuf>,

    /// Show progress bars.
    #[structopt(long = "progress")]
    progress: bool,
}

#[derive(StructOpt, Debug)]
struct SyntheticOpt {
    /// Output scene in .scene or .bscene format.
    #[structopt(name = "SCENE", parse(from_os_str))]
    scene: PathBuf,

    /// Output marker detections.
    #[structopt(name = "DETECTIONS", parse(from_os_str))]
    detections: PathBuf,

    #[structopt(long = "markers", default_value = "10")]
    num_markers: usize,

    #[structopt(long = "cameras", default_value = "12")]
    num_cameras: usize,

    /// Edge length of the markers in meters.
    #[structopt(long = "marker-size", default_value = "0.2")]
    marker_size: f64,

    /// Size of the written scene relative to the metric one.
    #[structopt(long = "scene-scale", default_value = "1")]
    scene_scale: f64,

    /// Standard deviation of corner noise in pixels.
    #[structopt(long = "pixel-noise", default_value = "0")]
    pixel_noise: f64,

    /// Chance that a corner is replaced with a random pixel.
    #[structopt(long = "outlier-chance", default_value = "0")]
    outlier_chance: f64,

    #[structopt(long = "seed", default_value = "0")]
    seed: u64,
}

#[derive(StructOpt, Debug)]
struct ScaleMeshOpt {
    /// Input mesh in .ply format.
    #[structopt(name = "IN", parse(from_os_str))]
    input: PathBuf,

    /// Output mesh in .ply format.
    #[structopt(name = "OUT", parse(from_os_str))]
    output: PathBuf,

    #[structopt(long = "scale")]
    scale: f64,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "markerscale")]
enum Opt {
    /// Estimate the scale of a scene from marker detections.
    Scale(ScaleOpt),
    /// Generate a synthetic scene and marker detections with known scale.
    Synthetic(SyntheticOpt),
    /// Scale the vertices of a .ply mesh.
    ScaleMesh(ScaleMeshOpt),
}

fn run_scale(opt: ScaleOpt) -> Result<(), Error> {
    let mut scene = Scene::from_file(&opt.scene)?;
    info!("{} from {}", scene, opt.scene.display());

    let mut filters = vec![ViewFilter::Defined];
    if let Some(path) = &opt.include_from {
        filters.push(ViewFilter::include_from(path)?);
    }
    if let Some(path) = &opt.exclude_from {
        filters.push(ViewFilter::exclude_from(path)?);
    }
    scene.select_views(&filters)?;

    let detections = read_detections(&opt.detections)?;
    info!("{} marker detections", detections.len());

    let options = ScalerOptions {
        use_ransac: !opt.no_ransac,
        undistorted: opt.undistorted,
        seed: Some(opt.seed),
        max_iters: opt.max_iters,
        verbose: opt.progress,
        ..ScalerOptions::new(opt.marker_size)
    };
    let mut report = scaler::run(&scene, &detections, &options)?;

    println!(
        "Using {} views, {} of {} landmarks triangulated",
        report.num_views,
        report.triangulation.triangulated,
        report.landmarks.len()
    );
    let scale = report.estimate.scale;
    println!("Calculated scale factor: {}", scale);

    if let Some(path) = &opt.save_landmarks {
        write_landmarks(path, &report.landmarks.positions())?;
    }
    if let Some(path) = &opt.save_scaled_landmarks {
        report.landmarks.scale_positions(scale);
        write_landmarks(path, &report.landmarks.positions())?;
    }
    if let Some(path) = &opt.output_scene {
        scene.apply_scale(scale);
        scene.write(path)?;
        info!("scaled scene written to {}", path.display());
    }
    for pair in opt.scale_mesh.chunks(2) {
        if let [input, output] = pair {
            scale_ply_mesh(input, output, scale)?;
        }
    }

    Ok(())
}

fn run_synthetic(opt: SyntheticOpt) -> Result<(), Error> {
    let options = SyntheticOptions {
        num_markers: opt.num_markers,
        num_cameras: opt.num_cameras,
        marker_size: opt.marker_size,
        scene_scale: opt.scene_scale,
        pixel_noise: opt.pixel_noise,
        outlier_chance: opt.outlier_chance,
        seed: opt.seed,
        ..SyntheticOptions::default()
    };
    let synthetic = generate(&options);
    synthetic.scene.write(&opt.scene)?;
    write_detections(&opt.detections, &synthetic.detections)?;
    println!(
        "Generated {} views and {} marker detections",
        synthetic.scene.num_views(),
        synthetic.detections.len()
    );
    println!("True scale factor: {}", synthetic.true_scale(&options));
    Ok(())
}

fn run_scale_mesh(opt: ScaleMeshOpt) -> Result<(), Error> {
    let count = scale_ply_mesh(&opt.input, &opt.output, opt.scale)?;
    println!("Scaled {} vertices", count);
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Opt::from_args() {
        Opt::Scale(opt) => run_scale(opt),
        Opt::Synthetic(opt) => run_synthetic(opt),
        Opt::ScaleMesh(opt) => run_scale_mesh(opt),
    }
}
