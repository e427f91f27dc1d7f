//! Fixtures shared by unit tests.
use cgmath::{Point2, Point3};

use crate::camera::{Intrinsics, PinholeCamera, Pose};
use crate::detection::MarkerDetection;
use crate::scene::{Scene, View, ViewId};
pub use crate::synthetic::camera_ring;
use crate::synthetic::{generate, synthetic_camera, SyntheticOptions};
use crate::triangulation::Observation;

pub fn test_camera() -> PinholeCamera {
    PinholeCamera::new(800.0, Point2::new(640.0, 360.0))
}

/// Exact observations of `x` from every pose.
pub fn observe<'a>(
    camera: &'a PinholeCamera,
    poses: &[Pose],
    x: Point3<f64>,
) -> Vec<Observation<'a, PinholeCamera>> {
    poses
        .iter()
        .enumerate()
        .map(|(i, pose)| {
            let pixel = camera.project(pose.transform(&x));
            Observation::new(i as ViewId, pixel, camera, *pose, false)
        })
        .collect()
}

/// A ring of `n` views sharing the synthetic camera.
pub fn marker_scene(n: usize) -> Scene<PinholeCamera> {
    let views = camera_ring(n, 4.0)
        .into_iter()
        .enumerate()
        .map(|(i, pose)| View {
            id: i as ViewId,
            intrinsic: 0,
            pose,
            image: format!("{}.jpg", i),
        })
        .collect();
    Scene::new(vec![synthetic_camera(0.0)], views)
}

pub fn scene_cameras(scene: &Scene<PinholeCamera>) -> Vec<(ViewId, &PinholeCamera, Pose)> {
    scene
        .views
        .keys()
        .filter_map(|id| scene.camera(*id).map(|(c, p)| (*id, c, *p)))
        .collect()
}

/// Detections of `num_markers` markers in `scene`, generated with the scene's own poses.
pub fn noisy_detections(
    scene: &Scene<PinholeCamera>,
    num_markers: usize,
    pixel_noise: f64,
    seed: u64,
) -> Vec<MarkerDetection> {
    let synthetic = generate(&SyntheticOptions {
        num_markers,
        num_cameras: scene.num_views(),
        pixel_noise,
        seed,
        ..SyntheticOptions::default()
    });
    synthetic.detections
}

pub fn exact_detections(scene: &Scene<PinholeCamera>, num_markers: usize) -> Vec<MarkerDetection> {
    noisy_detections(scene, num_markers, 0.0, 0)
}
