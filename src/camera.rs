//! Camera models and rigid poses of posed views.
extern crate cgmath;
extern crate nalgebra as na;

use cgmath::prelude::*;
use cgmath::{AbsDiffEq, Basis3, Matrix3, Point2, Point3, Quaternion, Vector2, Vector3};

/// Convert Rodrigues vector to a rotation.
pub fn from_rodrigues(x: Vector3<f64>) -> Basis3<f64> {
    let theta2 = x.dot(x);
    if theta2 > cgmath::Rad::<f64>::default_epsilon() {
        let angle = cgmath::Rad(x.magnitude());
        let axis = x.normalize();
        Basis3::from_axis_angle(axis, angle)
    } else {
        // taylor series approximation from ceres-solver
        Basis3::from(Quaternion::from(Matrix3::new(
            1.0, x[2], -x[1], -x[2], 1.0, x[0], x[1], -x[0], 1.0,
        )))
    }
}

/// Convert rotation to Rodrigues vector.
pub fn to_rodrigues(x: Basis3<f64>) -> Vector3<f64> {
    let q = Quaternion::from(x);
    let sin2 = 1.0 - q.s * q.s;
    if sin2 <= f64::EPSILON || q.v.magnitude2() <= f64::EPSILON {
        return Vector3::new(0.0, 0.0, 0.0);
    }
    let angle = 2.0 * q.s.clamp(-1.0, 1.0).acos();
    q.v.normalize() * angle
}

/// Point on the normalized image plane for a camera frame point or ray.
pub fn normalized(p: Vector3<f64>) -> Vector2<f64> {
    Vector2::new(p.x / p.z, p.y / p.z)
}

/// Rigid transform from the world into a camera frame, stored as a rotation and the camera center.
///
/// A world point `X` maps to `R (X - c)` in the camera frame. Cameras look down the positive z
/// axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Rotation `R` from world to camera axes.
    pub rotation: Basis3<f64>,
    /// Camera center `c` in world coordinates.
    pub center: Point3<f64>,
}

impl Pose {
    pub fn new(rotation: Basis3<f64>, center: Point3<f64>) -> Self {
        Pose { rotation, center }
    }

    /// Parse a pose from a Rodrigues rotation vector and a camera center.
    pub fn from_rodrigues(r: Vector3<f64>, center: Point3<f64>) -> Self {
        Pose {
            rotation: from_rodrigues(r),
            center,
        }
    }

    /// Camera at `center` looking at `target`. The image x axis is kept horizontal, image y
    /// points along world +y ("down") where possible.
    pub fn look_at(center: Point3<f64>, target: Point3<f64>) -> Self {
        let forward = (target - center).normalize();
        let mut down = Vector3::new(0.0, 1.0, 0.0);
        if down.cross(forward).magnitude2() < 1e-12 {
            down = Vector3::new(0.0, 0.0, 1.0);
        }
        let right = down.cross(forward).normalize();
        let down = forward.cross(right);
        let rotation = Matrix3::from_cols(right, down, forward).transpose();
        Pose {
            rotation: Basis3::from(Quaternion::from(rotation)),
            center,
        }
    }

    /// Rotation as a 3 element Rodrigues vector.
    pub fn rodrigues(&self) -> Vector3<f64> {
        to_rodrigues(self.rotation)
    }

    /// Project a point from the world into the camera coordinate system.
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from_vec(self.rotation.rotate_vector(*p - self.center))
    }

    /// Move a point from the camera coordinate system back into the world.
    pub fn to_world(&self, p: &Point3<f64>) -> Point3<f64> {
        self.center + self.rotation.invert().rotate_vector(p.to_vec())
    }

    /// Translational parameter `t = -R c`.
    pub fn translation(&self) -> Vector3<f64> {
        -self.rotation.rotate_vector(self.center.to_vec())
    }

    /// The pose as a `[R | t]` projection matrix.
    pub fn as_matrix(&self) -> na::Matrix3x4<f64> {
        let r: Matrix3<f64> = self.rotation.into();
        let t = self.translation();
        // cgmath matrices are indexed [column][row]
        na::Matrix3x4::new(
            r[0][0], r[1][0], r[2][0], t.x, //
            r[0][1], r[1][1], r[2][1], t.y, //
            r[0][2], r[1][2], r[2][2], t.z,
        )
    }

    /// Apply the scale part of a similarity transform. Rotations are unchanged, camera centers
    /// move away from the origin by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        Pose {
            rotation: self.rotation,
            center: Point3::from_vec(self.center.to_vec() * scale),
        }
    }
}

/// Intrinsic camera model.
///
/// Maps pixels to rays in the camera frame and camera frame points back to pixels.
pub trait Intrinsics {
    /// Ray through a pixel in the camera frame. The pixel is used as is, no distortion is
    /// removed.
    fn bearing(&self, p: Point2<f64>) -> Vector3<f64>;

    /// Remove lens distortion from a pixel.
    fn undistort(&self, p: Point2<f64>) -> Point2<f64>;

    /// Project a point from camera space into (distorted) pixel coordinates.
    fn project(&self, p: Point3<f64>) -> Point2<f64>;

    /// Distance between the projection of a camera frame point and an observed ray, measured on
    /// the undistorted normalized image plane.
    fn residual(&self, p: Point3<f64>, bearing: Vector3<f64>) -> f64 {
        (normalized(p.to_vec()) - normalized(bearing)).magnitude()
    }
}

/// Pinhole camera with up to three radial distortion coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    pub focal: f64,
    pub principal_point: Point2<f64>,
    /// Radial distortion `k1`, `k2`, `k3`. All zero for a plain pinhole camera.
    pub distortion: Vector3<f64>,
}

impl PinholeCamera {
    pub fn new(focal: f64, principal_point: Point2<f64>) -> Self {
        PinholeCamera {
            focal,
            principal_point,
            distortion: Vector3::new(0.0, 0.0, 0.0),
        }
    }

    /// Parse a camera from a vector of parameters. Order is focal length, principal point,
    /// distortion.
    pub fn from_vec(x: Vec<f64>) -> Self {
        PinholeCamera {
            focal: x[0],
            principal_point: Point2::new(x[1], x[2]),
            distortion: Vector3::new(x[3], x[4], x[5]),
        }
    }

    /// Parameters in the order accepted by [PinholeCamera::from_vec].
    pub fn to_vec(&self) -> Vec<f64> {
        vec![
            self.focal,
            self.principal_point.x,
            self.principal_point.y,
            self.distortion.x,
            self.distortion.y,
            self.distortion.z,
        ]
    }

    fn radial_factor(&self, p: Vector2<f64>) -> f64 {
        let r2 = p.magnitude2();
        let (k1, k2, k3) = (self.distortion.x, self.distortion.y, self.distortion.z);
        1.0 + r2 * (k1 + r2 * (k2 + r2 * k3))
    }

    fn has_distortion(&self) -> bool {
        self.distortion != Vector3::new(0.0, 0.0, 0.0)
    }
}

impl Intrinsics for PinholeCamera {
    fn bearing(&self, p: Point2<f64>) -> Vector3<f64> {
        let n = (p - self.principal_point) / self.focal;
        Vector3::new(n.x, n.y, 1.0)
    }

    fn undistort(&self, p: Point2<f64>) -> Point2<f64> {
        if !self.has_distortion() {
            return p;
        }
        let distorted = (p - self.principal_point) / self.focal;
        // fixed point iteration on x_u = x_d / f(|x_u|^2)
        let mut undistorted = distorted;
        for _ in 0..20 {
            undistorted = distorted / self.radial_factor(undistorted);
        }
        self.principal_point + undistorted * self.focal
    }

    fn project(&self, p: Point3<f64>) -> Point2<f64> {
        let n = normalized(p.to_vec());
        self.principal_point + n * self.radial_factor(n) * self.focal
    }
}

#[test]
fn test_rodrigues_isomorphic() {
    let r = Vector3::new(0.3, -0.2, 0.9);
    assert!(to_rodrigues(from_rodrigues(r)).abs_diff_eq(&r, 1e-8));
    let zero = Vector3::new(0.0, 0.0, 0.0);
    assert_eq!(to_rodrigues(from_rodrigues(zero)), zero);
}

#[test]
fn test_pose_isomorphic() {
    let pose = Pose::from_rodrigues(Vector3::new(3.0, 5.0, -2.0), Point3::new(0.5, -0.2, 0.1));
    let p = Point3::new(1.0, 3.0, -1.0);
    assert!(pose.to_world(&pose.transform(&p)).abs_diff_eq(&p, 1e-8));
    assert!(pose.transform(&pose.center).abs_diff_eq(&Point3::origin(), 1e-12));
}

#[test]
fn test_look_at() {
    let center = Point3::new(2.0, -1.0, -4.0);
    let target = Point3::new(0.5, 0.5, 0.5);
    let pose = Pose::look_at(center, target);
    let p = pose.transform(&target);
    assert!(p.x.abs() < 1e-9 && p.y.abs() < 1e-9);
    assert!((p.z - (target - center).magnitude()).abs() < 1e-9);

    let identity = Pose::look_at(Point3::new(0.0, 0.0, -5.0), Point3::origin());
    assert!(identity.rodrigues().magnitude() < 1e-9);
}

#[test]
fn test_pose_matrix_matches_transform() {
    let pose = Pose::from_rodrigues(Vector3::new(0.1, 0.4, -0.3), Point3::new(1.0, 2.0, -3.0));
    let p = Point3::new(0.2, -0.7, 4.0);
    let expected = pose.transform(&p);
    let actual = pose.as_matrix() * na::Vector4::new(p.x, p.y, p.z, 1.0);
    assert!((actual.x - expected.x).abs() < 1e-12);
    assert!((actual.y - expected.y).abs() < 1e-12);
    assert!((actual.z - expected.z).abs() < 1e-12);
}

#[test]
fn test_project_bearing() {
    let camera = PinholeCamera::new(800.0, Point2::new(320.0, 240.0));
    let p = Point3::new(0.1, -0.2, 2.0);
    let uv = camera.project(p);
    let ray = camera.bearing(uv);
    assert!(camera.residual(p, ray) < 1e-12);
    assert_eq!(camera.project(Point3::new(0.0, 0.0, 1.0)), Point2::new(320.0, 240.0));
}

#[test]
fn test_undistort() {
    let mut camera = PinholeCamera::new(600.0, Point2::new(300.0, 200.0));
    camera.distortion = Vector3::new(-0.05, 0.01, 0.0);
    let p = Point3::new(0.3, 0.2, 1.5);
    let distorted = camera.project(p);
    let ray = camera.bearing(camera.undistort(distorted));
    assert!(camera.residual(p, ray) < 1e-9);
    // without undistortion the ray misses the point
    assert!(camera.residual(p, camera.bearing(distorted)) > 1e-4);
}
