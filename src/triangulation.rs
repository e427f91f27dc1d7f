//! Triangulation of a single 3D point from posed 2D observations.
extern crate nalgebra as na;

use cgmath::prelude::*;
use cgmath::{Point2, Point3, Vector3};

use crate::camera::{Intrinsics, Pose};
use crate::ransac::{ransac, RansacOptions, RansacResult};
use crate::scene::ViewId;

/// Observations whose reprojection residual is below this value are inliers. Measured on the
/// normalized image plane.
pub const INLIER_THRESHOLD: f64 = 0.1;

/// A 2D observation of a landmark in a posed view.
#[derive(Debug)]
pub struct Observation<'a, C> {
    pub view_id: ViewId,
    /// Observed pixel.
    pub pixel: Point2<f64>,
    /// Ray through the (undistorted) pixel in the camera frame.
    pub bearing: Vector3<f64>,
    pub camera: &'a C,
    pub pose: Pose,
}

impl<'a, C> Clone for Observation<'a, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, C> Copy for Observation<'a, C> {}

impl<'a, C: Intrinsics> Observation<'a, C> {
    /// Observation of `pixel` by `camera` at `pose`. If `undistorted` is set the pixel already
    /// comes from an undistorted image, otherwise lens distortion is removed first.
    pub fn new(
        view_id: ViewId,
        pixel: Point2<f64>,
        camera: &'a C,
        pose: Pose,
        undistorted: bool,
    ) -> Self {
        let bearing = if undistorted {
            camera.bearing(pixel)
        } else {
            camera.bearing(camera.undistort(pixel))
        };
        Observation {
            view_id,
            pixel,
            bearing,
            camera,
            pose,
        }
    }

    /// Is `x` in front of the camera along the observed ray?
    pub fn cheirality(&self, x: &Point3<f64>) -> bool {
        self.bearing.dot(self.pose.transform(x).to_vec()) > 0.0
    }

    /// Reprojection residual of `x`.
    pub fn residual(&self, x: &Point3<f64>) -> f64 {
        self.camera.residual(self.pose.transform(x), self.bearing)
    }
}

/// Triangulate a point seen by all observations.
///
/// Solves the algebraic n-view problem: the homogeneous point minimizing the distance to every
/// observed ray is the eigenvector of the smallest eigenvalue of `sum_i C_iᵀ C_i` with
/// `C_i = P_i - b_i b_iᵀ P_i`, `P_i` the pose matrix and `b_i` the unit bearing.
///
/// Returns `None` for fewer than two observations, a point at infinity, or a point behind any of
/// the cameras.
pub fn triangulate<C: Intrinsics>(x: &[Observation<C>]) -> Option<Point3<f64>> {
    if x.len() < 2 {
        return None;
    }

    let mut ata = na::Matrix4::<f64>::zeros();
    for o in x {
        let b = na::Vector3::new(o.bearing.x, o.bearing.y, o.bearing.z).normalize();
        let p = o.pose.as_matrix();
        let cost = p - b * (b.transpose() * p);
        ata += cost.transpose() * cost;
    }

    let eigen = ata.symmetric_eigen();
    let xh = eigen.eigenvectors.column(eigen.eigenvalues.imin());
    let point = Point3::new(xh[0] / xh[3], xh[1] / xh[3], xh[2] / xh[3]);
    if !(point.x.is_finite() && point.y.is_finite() && point.z.is_finite()) {
        return None;
    }

    if x.iter().all(|o| o.cheirality(&point)) {
        Some(point)
    } else {
        None
    }
}

/// Score a triangulated point against all observations.
///
/// If the point is behind any camera the result is unsuccessful with zero fitness. Otherwise every
/// observation with a residual below [INLIER_THRESHOLD] is an inlier.
pub fn evaluate<'a, C: Intrinsics>(
    x: &[Observation<'a, C>],
    point: &Point3<f64>,
) -> RansacResult<Observation<'a, C>> {
    let mut error = 0.0;
    let mut inliers = Vec::new();
    for o in x {
        if !o.cheirality(point) {
            return RansacResult::default();
        }
        let err = o.residual(point);
        if err < INLIER_THRESHOLD {
            error += err;
            inliers.push(*o);
        }
    }
    RansacResult::scored(inliers, error, x.len())
}

/// Options for [triangulate_robust]: minimal samples of two observations, 1000 iterations and a
/// fixed seed.
pub fn robust_options() -> RansacOptions {
    RansacOptions {
        seed: Some(0),
        ..RansacOptions::new(2)
    }
}

/// Triangulate a point with RANSAC, ignoring observations inconsistent with the consensus.
pub fn triangulate_robust<C: Intrinsics>(
    x: &[Observation<C>],
    opts: &RansacOptions,
) -> Option<Point3<f64>> {
    let (point, result) = ransac(x, |s| triangulate(s), |d, p| evaluate(d, p), opts);
    if result.success {
        point
    } else {
        None
    }
}

#[cfg(test)]
use crate::test_utils::*;

#[test]
fn test_triangulate_exact() {
    let camera = test_camera();
    let target = Point3::new(0.1, -0.2, 0.3);
    let poses = camera_ring(6, 3.0);
    let obs = observe(&camera, &poses, target);
    let x = triangulate(&obs).unwrap();
    assert!((x - target).magnitude() < 1e-9);

    let result = evaluate(&obs, &x);
    assert!(result.success);
    assert_eq!(result.fitness, 1.0);
    assert_eq!(result.inliers.len(), obs.len());
    assert!(result.inlier_rmse < 1e-9);
}

#[test]
fn test_too_few_observations() {
    let camera = test_camera();
    let poses = camera_ring(4, 3.0);
    let obs = observe(&camera, &poses[..1], Point3::origin());
    assert!(triangulate(&obs).is_none());
}

#[test]
fn test_behind_camera_fails() {
    let camera = test_camera();
    let target = Point3::new(0.0, 0.0, 0.0);
    let mut poses = camera_ring(5, 3.0);
    // one camera looking away from the point
    let away = poses[0].center + (poses[0].center - target);
    poses.push(Pose::look_at(poses[0].center, away));
    let obs = observe(&camera, &poses, target);
    assert!(!obs[5].cheirality(&target));

    let result = evaluate(&obs, &target);
    assert!(!result.success);
    assert_eq!(result.fitness, 0.0);
    assert!(result.inliers.is_empty());

    assert!(triangulate(&obs).is_none());
    assert!(triangulate(&obs[..5]).is_some());
}

#[test]
fn test_zero_inliers_is_successful() {
    let camera = test_camera();
    let poses = camera_ring(4, 3.0);
    let obs = observe(&camera, &poses, Point3::origin());
    // in front of every camera but far from every ray
    let result = evaluate(&obs, &Point3::new(0.0, -1.5, 0.0));
    assert!(result.success);
    assert_eq!(result.fitness, 0.0);
    assert!(result.inliers.is_empty());
    assert_eq!(result.inlier_rmse, std::f64::INFINITY);
}

#[test]
fn test_robust_ignores_outlier() {
    let camera = test_camera();
    let target = Point3::new(0.05, 0.1, -0.1);
    let poses = camera_ring(8, 3.0);
    let mut obs = observe(&camera, &poses, target);
    // a false positive detection far away from the true corner
    let bad = Point2::new(obs[2].pixel.x + 150.0, obs[2].pixel.y - 90.0);
    obs[2] = Observation::new(obs[2].view_id, bad, &camera, obs[2].pose, false);

    let x = triangulate_robust(&obs, &robust_options()).unwrap();
    assert!((x - target).magnitude() < 1e-6);
    let result = evaluate(&obs, &x);
    assert_eq!(result.inliers.len(), obs.len() - 1);
    assert!(result.inliers.iter().all(|o| o.view_id != obs[2].view_id));

    if let Some(direct) = triangulate(&obs) {
        assert!((direct - target).magnitude() > (x - target).magnitude());
    }
}

#[test]
fn test_robust_is_reproducible() {
    let camera = test_camera();
    let poses = camera_ring(7, 2.5);
    let mut obs = observe(&camera, &poses, Point3::new(0.2, 0.0, 0.1));
    obs[4] = Observation::new(4, Point2::new(10.0, 20.0), &camera, obs[4].pose, false);
    let a = triangulate_robust(&obs, &robust_options()).unwrap();
    let b = triangulate_robust(&obs, &robust_options()).unwrap();
    assert_eq!(a.x.to_bits(), b.x.to_bits());
    assert_eq!(a.y.to_bits(), b.y.to_bits());
    assert_eq!(a.z.to_bits(), b.z.to_bits());
}
