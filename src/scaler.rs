//! End-to-end scale estimation: detections to landmarks to a scale factor.
use tracing::{debug, info};

use crate::camera::Intrinsics;
use crate::detection::MarkerDetection;
use crate::landmark::{LandmarkStore, TriangulationOptions, TriangulationReport};
use crate::ransac::RansacOptions;
use crate::scale::{estimate_scale, ScaleEstimate};
use crate::scene::Scene;
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct ScalerOptions {
    /// Edge length of the markers, in the units the scene should end up in.
    pub marker_size: f64,
    pub use_ransac: bool,
    /// Detections were made on undistorted images.
    pub undistorted: bool,
    pub seed: Option<u64>,
    pub max_iters: usize,
    pub min_observations: usize,
    /// Show progress bars.
    pub verbose: bool,
}

impl ScalerOptions {
    pub fn new(marker_size: f64) -> Self {
        ScalerOptions {
            marker_size,
            use_ransac: true,
            undistorted: false,
            seed: Some(0),
            max_iters: 1000,
            min_observations: 3,
            verbose: false,
        }
    }

    pub fn triangulation_options(&self) -> TriangulationOptions {
        TriangulationOptions {
            use_ransac: self.use_ransac,
            undistorted: self.undistorted,
            min_observations: self.min_observations,
            ransac: RansacOptions {
                max_iters: self.max_iters,
                seed: self.seed,
                ..RansacOptions::new(2)
            },
            progress: self.verbose,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScaleReport {
    pub landmarks: LandmarkStore,
    pub triangulation: TriangulationReport,
    pub estimate: ScaleEstimate,
    /// Views detections were used from.
    pub num_views: usize,
    /// Detections in views the scene does not have.
    pub ignored_detections: usize,
}

/// Estimate the scale of `scene` from marker detections.
///
/// Detections in views missing from the scene are ignored. Fails if fewer than two landmarks
/// could be triangulated or fewer than two marker edges could be measured.
pub fn run<C: Intrinsics + Sync>(
    scene: &Scene<C>,
    detections: &[MarkerDetection],
    options: &ScalerOptions,
) -> Result<ScaleReport, Error> {
    let mut landmarks = LandmarkStore::new();
    let mut ignored_detections = 0;
    let mut views = std::collections::BTreeSet::new();
    for detection in detections {
        if scene.camera(detection.view_id).is_none() {
            debug!(
                "ignoring marker {} in unknown view {}",
                detection.marker_id, detection.view_id
            );
            ignored_detections += 1;
            continue;
        }
        views.insert(detection.view_id);
        landmarks.add_detection(detection);
    }
    info!(
        "{} markers and {} landmarks in {} views",
        landmarks.marker_ids().len(),
        landmarks.len(),
        views.len()
    );

    let triangulation = landmarks.triangulate_all(scene, &options.triangulation_options());
    if triangulation.triangulated < 2 {
        return Err(Error::NotEnoughLandmarks(triangulation.triangulated));
    }

    let estimate = estimate_scale(
        landmarks.marker_ids(),
        |m, c| landmarks.position(m, c),
        options.marker_size,
    )?;
    info!(
        "scale {} from {} samples (min {}, max {}, std dev {})",
        estimate.scale,
        estimate.samples.len(),
        estimate.min,
        estimate.max,
        estimate.std_dev
    );

    Ok(ScaleReport {
        landmarks,
        triangulation,
        estimate,
        num_views: views.len(),
        ignored_detections,
    })
}

#[cfg(test)]
use crate::synthetic::{generate, SyntheticOptions};

#[test]
fn test_recovers_scale() {
    let synthetic_options = SyntheticOptions {
        scene_scale: 2.5,
        ..SyntheticOptions::default()
    };
    let synthetic = generate(&synthetic_options);
    let report = run(
        &synthetic.scene,
        &synthetic.detections,
        &ScalerOptions::new(synthetic_options.marker_size),
    )
    .unwrap();
    assert!((report.estimate.scale - 0.4).abs() < 1e-6);
    assert_eq!(report.num_views, synthetic_options.num_cameras);
    assert_eq!(report.ignored_detections, 0);
    assert_eq!(report.landmarks.marker_ids().len(), synthetic_options.num_markers);
}

#[test]
fn test_recovers_scale_with_outliers_and_distortion() {
    let synthetic_options = SyntheticOptions {
        num_markers: 12,
        num_cameras: 16,
        scene_scale: 0.5,
        pixel_noise: 0.2,
        outlier_chance: 0.05,
        distortion: -0.05,
        seed: 4,
        ..SyntheticOptions::default()
    };
    let synthetic = generate(&synthetic_options);
    let report = run(
        &synthetic.scene,
        &synthetic.detections,
        &ScalerOptions::new(synthetic_options.marker_size),
    )
    .unwrap();
    assert!((report.estimate.scale - 2.0).abs() < 0.05);
}

#[test]
fn test_unknown_views_and_too_few_landmarks() {
    let synthetic = generate(&SyntheticOptions {
        num_markers: 1,
        ..SyntheticOptions::default()
    });
    let mut detections = synthetic.detections.clone();
    for d in detections.iter_mut() {
        d.view_id += 1000;
    }
    let result = run(&synthetic.scene, &detections, &ScalerOptions::new(0.2));
    assert!(matches!(result, Err(Error::NotEnoughLandmarks(0))));

    let mut detections = synthetic.detections.clone();
    detections.truncate(2);
    let result = run(&synthetic.scene, &detections, &ScalerOptions::new(0.2));
    assert!(matches!(result, Err(Error::NotEnoughLandmarks(0))));
}
