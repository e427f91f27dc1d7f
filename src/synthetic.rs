//! Synthetic marker scenes with known scale.
//!
//! Square markers lie flat on the ground plane (`y = 0`, with `y` pointing down) and are observed
//! by a ring of cameras looking at the origin. The scene handed to the estimator is the metric
//! scene with every camera center multiplied by `scene_scale`, so the scale that recovers metric
//! units is `1 / scene_scale`.
extern crate rand;
extern crate rand_distr;

use cgmath::prelude::*;
use cgmath::{Point2, Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::camera::{Intrinsics, PinholeCamera, Pose};
use crate::detection::{MarkerDetection, MarkerId};
use crate::scene::{Scene, View, ViewId};

/// Image size of the synthetic camera.
pub const IMAGE_SIZE: (f64, f64) = (1280.0, 720.0);

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticOptions {
    pub num_markers: usize,
    pub num_cameras: usize,
    /// Edge length of the markers in meters.
    pub marker_size: f64,
    /// Scale of the reconstruction relative to the metric scene.
    pub scene_scale: f64,
    /// Standard deviation of the noise added to detected corners, in pixels.
    pub pixel_noise: f64,
    /// Probability that a detected corner is replaced by a random pixel.
    pub outlier_chance: f64,
    /// First radial distortion coefficient of the camera.
    pub distortion: f64,
    pub seed: u64,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        SyntheticOptions {
            num_markers: 10,
            num_cameras: 12,
            marker_size: 0.2,
            scene_scale: 1.0,
            pixel_noise: 0.0,
            outlier_chance: 0.0,
            distortion: 0.0,
            seed: 0,
        }
    }
}

pub struct SyntheticScene {
    /// The scene in reconstruction units.
    pub scene: Scene<PinholeCamera>,
    pub detections: Vec<MarkerDetection>,
    /// Metric corner positions of each marker, indexed by marker id.
    pub markers: Vec<[Point3<f64>; 4]>,
}

impl SyntheticScene {
    /// Scale that maps the scene back to metric units.
    pub fn true_scale(&self, options: &SyntheticOptions) -> f64 {
        1.0 / options.scene_scale
    }
}

/// Corners of a marker centered at `center` on the ground plane, ordered clockwise when seen from
/// above.
pub fn marker_corners(center: Point3<f64>, size: f64) -> [Point3<f64>; 4] {
    let h = size / 2.0;
    [
        center + Vector3::new(-h, 0.0, -h),
        center + Vector3::new(h, 0.0, -h),
        center + Vector3::new(h, 0.0, h),
        center + Vector3::new(-h, 0.0, h),
    ]
}

/// The synthetic camera model.
pub fn synthetic_camera(distortion: f64) -> PinholeCamera {
    let mut camera = PinholeCamera::new(
        1000.0,
        Point2::new(IMAGE_SIZE.0 / 2.0, IMAGE_SIZE.1 / 2.0),
    );
    camera.distortion.x = distortion;
    camera
}

/// Metric poses of `n` cameras on a circle of radius `radius`, raised above the ground and looking
/// at the origin.
pub fn camera_ring(n: usize, radius: f64) -> Vec<Pose> {
    (0..n)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            let center = Point3::new(radius * angle.cos(), -0.5 * radius, radius * angle.sin());
            Pose::look_at(center, Point3::origin())
        })
        .collect()
}

fn in_image(p: Point2<f64>) -> bool {
    p.x >= 0.0 && p.y >= 0.0 && p.x < IMAGE_SIZE.0 && p.y < IMAGE_SIZE.1
}

/// Generate a synthetic scene and its marker detections. Markers are only detected in views
/// where all four corners are in front of the camera and inside the image.
pub fn generate(options: &SyntheticOptions) -> SyntheticScene {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let camera = synthetic_camera(options.distortion);
    let poses = camera_ring(options.num_cameras, 4.0);

    let spread = 1.0;
    let markers = (0..options.num_markers)
        .map(|_| {
            let center = Point3::new(
                rng.gen_range(-spread..spread),
                0.0,
                rng.gen_range(-spread..spread),
            );
            marker_corners(center, options.marker_size)
        })
        .collect::<Vec<_>>();

    let noise = if options.pixel_noise > 0.0 {
        Normal::new(0.0, options.pixel_noise).ok()
    } else {
        None
    };

    let mut detections = Vec::new();
    for (view_id, pose) in poses.iter().enumerate() {
        for (marker_id, corners) in markers.iter().enumerate() {
            if corners.iter().any(|c| pose.transform(c).z <= 0.0) {
                continue;
            }
            let pixels = corners
                .iter()
                .map(|c| camera.project(pose.transform(c)))
                .collect::<Vec<_>>();
            if !pixels.iter().all(|p| in_image(*p)) {
                continue;
            }
            let mut observed = [pixels[0], pixels[1], pixels[2], pixels[3]];
            for p in observed.iter_mut() {
                if let Some(noise) = &noise {
                    *p += cgmath::Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng));
                }
                if options.outlier_chance > 0.0 && rng.gen_bool(options.outlier_chance.min(1.0)) {
                    *p = Point2::new(
                        rng.gen_range(0.0..IMAGE_SIZE.0),
                        rng.gen_range(0.0..IMAGE_SIZE.1),
                    );
                }
            }
            detections.push(MarkerDetection {
                view_id: view_id as ViewId,
                marker_id: marker_id as MarkerId,
                corners: observed,
            });
        }
    }

    let views = poses
        .iter()
        .enumerate()
        .map(|(i, pose)| View {
            id: i as ViewId,
            intrinsic: 0,
            pose: pose.scaled(options.scene_scale),
            image: format!("view_{:04}.jpg", i),
        })
        .collect();

    SyntheticScene {
        scene: Scene::new(vec![camera], views),
        detections,
        markers,
    }
}

#[test]
fn test_generate() {
    let options = SyntheticOptions {
        num_markers: 5,
        num_cameras: 8,
        scene_scale: 3.0,
        ..SyntheticOptions::default()
    };
    let synthetic = generate(&options);
    assert_eq!(synthetic.scene.num_views(), 8);
    assert_eq!(synthetic.markers.len(), 5);
    assert!(!synthetic.detections.is_empty());
    assert!((synthetic.true_scale(&options) - 1.0 / 3.0).abs() < 1e-12);

    // detections are exact projections of the scaled scene
    let d = &synthetic.detections[0];
    let (camera, pose) = synthetic.scene.camera(d.view_id).unwrap();
    let corner = synthetic.markers[d.marker_id as usize][2];
    let scaled = Point3::from_vec(corner.to_vec() * options.scene_scale);
    assert!((camera.project(pose.transform(&scaled)) - d.corners[2]).magnitude() < 1e-6);

    for corners in &synthetic.markers {
        for i in 0..4 {
            let edge = (corners[(i + 1) % 4] - corners[i]).magnitude();
            assert!((edge - options.marker_size).abs() < 1e-12);
        }
    }
}

#[test]
fn test_generate_is_seeded() {
    let options = SyntheticOptions {
        pixel_noise: 0.5,
        outlier_chance: 0.1,
        ..SyntheticOptions::default()
    };
    assert_eq!(generate(&options).detections, generate(&options).detections);
    let other = SyntheticOptions { seed: 1, ..options.clone() };
    assert_ne!(generate(&options).detections, generate(&other).detections);
}
