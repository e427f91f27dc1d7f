//! Landmarks: marker corners observed in several views, and their triangulation.
extern crate indicatif;
extern crate rayon;

use cgmath::{EuclideanSpace, Point2, Point3};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use std::collections::{BTreeMap, BTreeSet};

use crate::camera::Intrinsics;
use crate::detection::{MarkerDetection, MarkerId};
use crate::ransac::RansacOptions;
use crate::scene::{Scene, ViewId};
use crate::triangulation::{robust_options, triangulate, triangulate_robust, Observation};

/// Id of the landmark for corner `corner` of marker `marker`.
pub fn landmark_id(marker: MarkerId, corner: usize) -> String {
    format!("{}.{}", marker, corner)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub id: String,
    /// Views the landmark was seen in and where.
    pub observations: Vec<(ViewId, Point2<f64>)>,
    /// Set by the last successful triangulation.
    pub position: Option<Point3<f64>>,
}

impl Landmark {
    fn new(id: String) -> Self {
        Landmark {
            id,
            observations: Vec::new(),
            position: None,
        }
    }

    /// Resolve observations against the scene. Observations in unknown views are dropped.
    pub fn observations_in<'a, C: Intrinsics>(
        &self,
        scene: &'a Scene<C>,
        undistorted: bool,
    ) -> Vec<Observation<'a, C>> {
        self.observations
            .iter()
            .filter_map(|(view_id, pixel)| {
                let (camera, pose) = scene.camera(*view_id)?;
                Some(Observation::new(*view_id, *pixel, camera, *pose, undistorted))
            })
            .collect()
    }
}

pub(crate) fn progress_bar(length: u64, message: &str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    let style = ProgressStyle::default_bar()
        .template("{msg} [{bar:40}] {percent}% ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Per landmark sampler seed, so results do not depend on the order landmarks are processed in.
/// Stable across platforms and compiler releases.
fn landmark_seed(seed: u64, id: &str) -> u64 {
    id.bytes()
        .fold(splitmix64(seed), |h, b| splitmix64(h ^ u64::from(b)))
}

#[derive(Debug, Clone)]
pub struct TriangulationOptions {
    /// Triangulate with RANSAC instead of using every observation.
    pub use_ransac: bool,
    /// Detections come from undistorted images.
    pub undistorted: bool,
    /// Landmarks seen fewer times are skipped.
    pub min_observations: usize,
    /// RANSAC parameters. The seed is combined with each landmark id.
    pub ransac: RansacOptions,
    /// Show a progress bar.
    pub progress: bool,
}

impl Default for TriangulationOptions {
    fn default() -> Self {
        TriangulationOptions {
            use_ransac: true,
            undistorted: false,
            min_observations: 3,
            ransac: robust_options(),
            progress: false,
        }
    }
}

/// Outcome of [LandmarkStore::triangulate_all].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangulationReport {
    pub triangulated: usize,
    /// Ids of landmarks with too few observations.
    pub skipped: Vec<String>,
    /// Ids of landmarks whose triangulation failed.
    pub failed: Vec<String>,
}

enum Outcome {
    Triangulated,
    Skipped,
    Failed,
}

/// All landmarks, keyed and iterated by id.
#[derive(Debug, Clone, Default)]
pub struct LandmarkStore {
    landmarks: BTreeMap<String, Landmark>,
    marker_ids: BTreeSet<MarkerId>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that landmark `id` was seen at `pixel` in view `view_id`.
    pub fn add_observation(&mut self, id: &str, view_id: ViewId, pixel: Point2<f64>) {
        self.landmarks
            .entry(id.to_string())
            .or_insert_with(|| Landmark::new(id.to_string()))
            .observations
            .push((view_id, pixel));
    }

    /// Record every corner of a marker detection.
    pub fn add_detection(&mut self, detection: &MarkerDetection) {
        self.marker_ids.insert(detection.marker_id);
        for (i, corner) in detection.corners.iter().enumerate() {
            self.add_observation(
                &landmark_id(detection.marker_id, i),
                detection.view_id,
                *corner,
            );
        }
    }

    pub fn get(&self, id: &str) -> Option<&Landmark> {
        self.landmarks.get(id)
    }

    /// Triangulated position of a marker corner.
    pub fn position(&self, marker: MarkerId, corner: usize) -> Option<Point3<f64>> {
        self.landmarks
            .get(&landmark_id(marker, corner))
            .and_then(|l| l.position)
    }

    pub fn marker_ids(&self) -> &BTreeSet<MarkerId> {
        &self.marker_ids
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn num_triangulated(&self) -> usize {
        self.landmarks
            .values()
            .filter(|l| l.position.is_some())
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    /// Positions of all triangulated landmarks, ordered by id.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.landmarks.values().filter_map(|l| l.position).collect()
    }

    /// Triangulate every landmark with enough observations in parallel.
    ///
    /// Observations in views the scene does not have are ignored. Skipped and failing landmarks
    /// lose any previous position. Nothing here aborts the pass: skipped and failed landmarks are
    /// logged and listed in the report.
    pub fn triangulate_all<C: Intrinsics + Sync>(
        &mut self,
        scene: &Scene<C>,
        options: &TriangulationOptions,
    ) -> TriangulationReport {
        let mut landmarks = self.landmarks.values_mut().collect::<Vec<_>>();
        let total = landmarks.len();
        let outcomes = landmarks
            .par_iter_mut()
            .progress_with(progress_bar(
                total as u64,
                "Triangulating landmarks",
                options.progress,
            ))
            .map(|landmark| {
                // only observations in known views count towards the minimum
                let observations = landmark.observations_in(scene, options.undistorted);
                if observations.len() < options.min_observations {
                    warn!(
                        "landmark {} has {} usable observations, need {}",
                        landmark.id,
                        observations.len(),
                        options.min_observations
                    );
                    landmark.position = None;
                    return Outcome::Skipped;
                }

                landmark.position = if options.use_ransac {
                    let opts = RansacOptions {
                        seed: options.ransac.seed.map(|s| landmark_seed(s, &landmark.id)),
                        ..options.ransac.clone()
                    };
                    triangulate_robust(&observations, &opts)
                } else {
                    triangulate(&observations)
                };

                match landmark.position {
                    Some(p) => {
                        debug!("landmark {} at {:?}", landmark.id, p);
                        Outcome::Triangulated
                    }
                    None => {
                        warn!("failed to triangulate landmark {}", landmark.id);
                        Outcome::Failed
                    }
                }
            })
            .collect::<Vec<_>>();

        let mut report = TriangulationReport::default();
        for (landmark, outcome) in landmarks.iter().zip(outcomes) {
            match outcome {
                Outcome::Triangulated => report.triangulated += 1,
                Outcome::Skipped => report.skipped.push(landmark.id.clone()),
                Outcome::Failed => report.failed.push(landmark.id.clone()),
            }
        }
        info!(
            "triangulated {} of {} landmarks ({} skipped, {} failed)",
            report.triangulated,
            total,
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// Multiply every triangulated position by `scale`.
    pub fn scale_positions(&mut self, scale: f64) {
        for landmark in self.landmarks.values_mut() {
            if let Some(p) = landmark.position.as_mut() {
                *p = Point3::from_vec(p.to_vec() * scale);
            }
        }
    }
}

#[cfg(test)]
use crate::test_utils::*;
#[test]
fn test_landmark_seed() {
    assert_eq!(splitmix64(0), 0xe220_a839_7b1d_cdaf);
    assert_eq!(landmark_seed(0, ""), splitmix64(0));
    assert_eq!(landmark_seed(7, "3.1"), landmark_seed(7, "3.1"));
    assert_ne!(landmark_seed(7, "3.1"), landmark_seed(7, "1.3"));
    assert_ne!(landmark_seed(7, "3.1"), landmark_seed(8, "3.1"));
}

#[test]
fn test_add_detection() {
    let mut store = LandmarkStore::new();
    let corners = [
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(1.0, 1.0),
        Point2::new(0.0, 1.0),
    ];
    store.add_detection(&MarkerDetection {
        view_id: 0,
        marker_id: 5,
        corners,
    });
    store.add_detection(&MarkerDetection {
        view_id: 1,
        marker_id: 5,
        corners,
    });
    store.add_observation("9.0", 2, Point2::new(3.0, 4.0));
    assert_eq!(store.len(), 5);
    assert_eq!(store.marker_ids().iter().cloned().collect::<Vec<_>>(), vec![5]);
    let l = store.get("5.2").unwrap();
    assert_eq!(l.observations, vec![(0, corners[2]), (1, corners[2])]);
    assert_eq!(store.get("9.0").unwrap().observations.len(), 1);
    assert_eq!(store.num_triangulated(), 0);
}

#[test]
fn test_triangulate_all_observation_counts() {
    let scene = marker_scene(6);
    let target = Point3::new(0.1, 0.2, -0.1);
    let mut store = LandmarkStore::new();
    for n in 0..5 {
        for (id, camera, pose) in scene_cameras(&scene).into_iter().take(n) {
            let pixel = camera.project(pose.transform(&target));
            store.add_observation(&format!("{}.0", n), id, pixel);
        }
    }
    let report = store.triangulate_all(&scene, &TriangulationOptions::default());
    assert_eq!(report.triangulated, 2);
    assert_eq!(report.skipped, vec!["1.0".to_string(), "2.0".to_string()]);
    assert!(report.failed.is_empty());
    assert!(store.get("1.0").unwrap().position.is_none());
    assert!(store.get("2.0").unwrap().position.is_none());
    for id in &["3.0", "4.0"] {
        let p = store.get(id).unwrap().position.unwrap();
        assert!((p - target).magnitude() < 1e-6);
    }
}

#[test]
fn test_unknown_views_clear_position() {
    let scene = marker_scene(4);
    let mut store = LandmarkStore::new();
    // seen often enough, but only in views the scene does not know about
    for id in 100..104 {
        store.add_observation("0.0", id, Point2::new(10.0, 10.0));
    }
    store.landmarks.get_mut("0.0").unwrap().position = Some(Point3::origin());
    let report = store.triangulate_all(&scene, &TriangulationOptions::default());
    assert_eq!(report.skipped, vec!["0.0".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(store.num_triangulated(), 0);
}

#[test]
fn test_unknown_views_do_not_count_towards_minimum() {
    let scene = marker_scene(6);
    let target = Point3::new(0.1, 0.2, -0.1);
    let mut store = LandmarkStore::new();
    for (id, camera, pose) in scene_cameras(&scene).into_iter().take(2) {
        store.add_observation("0.0", id, camera.project(pose.transform(&target)));
    }
    store.add_observation("0.0", 999, Point2::new(640.0, 360.0));
    assert_eq!(store.get("0.0").unwrap().observations.len(), 3);

    let report = store.triangulate_all(&scene, &TriangulationOptions::default());
    assert_eq!(report.triangulated, 0);
    assert_eq!(report.skipped, vec!["0.0".to_string()]);
    assert!(store.get("0.0").unwrap().position.is_none());

    let (id, camera, pose) = scene_cameras(&scene)[2];
    store.add_observation("0.0", id, camera.project(pose.transform(&target)));
    let report = store.triangulate_all(&scene, &TriangulationOptions::default());
    assert_eq!(report.triangulated, 1);
    let p = store.get("0.0").unwrap().position.unwrap();
    assert!((p - target).magnitude() < 1e-6);
}

#[test]
fn test_undistorted_flag() {
    let mut scene = marker_scene(6);
    scene.intrinsics[0].distortion.x = -0.5;
    let target = Point3::new(0.4, -0.3, 0.5);

    // pixels from undistorted images: a plain pinhole projection
    let mut pinhole = scene.intrinsics[0].clone();
    pinhole.distortion.x = 0.0;
    let mut store = LandmarkStore::new();
    for (id, _, pose) in scene_cameras(&scene) {
        store.add_observation("0.0", id, pinhole.project(pose.transform(&target)));
    }

    let undistorted = TriangulationOptions {
        undistorted: true,
        ..TriangulationOptions::default()
    };
    assert_eq!(store.triangulate_all(&scene, &undistorted).triangulated, 1);
    let exact = store.position(0, 0).unwrap();
    assert!((exact - target).magnitude() < 1e-6);

    // treating the same pixels as distorted moves the rays
    let direct = TriangulationOptions {
        use_ransac: false,
        ..TriangulationOptions::default()
    };
    store.triangulate_all(&scene, &direct);
    if let Some(p) = store.position(0, 0) {
        assert!((p - target).magnitude() > 1e-3);
    }
}

#[test]
fn test_triangulate_all_is_reproducible() {
    let scene = marker_scene(8);
    let detections = noisy_detections(&scene, 3, 0.3, 11);
    let run = || {
        let mut store = LandmarkStore::new();
        for d in &detections {
            store.add_detection(d);
        }
        store.triangulate_all(&scene, &TriangulationOptions::default());
        store.positions()
    };
    let a = run();
    let b = run();
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[test]
fn test_direct_and_scaled() {
    let scene = marker_scene(5);
    let mut store = LandmarkStore::new();
    for d in exact_detections(&scene, 1) {
        store.add_detection(&d);
    }
    let options = TriangulationOptions {
        use_ransac: false,
        ..TriangulationOptions::default()
    };
    let report = store.triangulate_all(&scene, &options);
    assert_eq!(report.triangulated, 4);
    let before = store.position(0, 1).unwrap();
    store.scale_positions(2.0);
    let after = store.position(0, 1).unwrap();
    assert!((after.to_vec() - before.to_vec() * 2.0).magnitude() < 1e-12);
    assert!(store.position(0, 7).is_none());
}

#[cfg(test)]
use cgmath::InnerSpace;
