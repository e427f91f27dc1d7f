//! Estimate the metric scale of a multi-view reconstruction from fiducial markers of known size.
//!
//! Marker corners detected in posed views are grouped into landmarks, triangulated robustly and
//! compared against the known marker size:
//! ```no_run
//! use markerscale::*;
//! use std::path::Path;
//!
//! let scene = Scene::from_file(Path::new("scene.scene")).unwrap();
//! let detections = read_detections(Path::new("markers.txt")).unwrap();
//! let report = scaler::run(&scene, &detections, &ScalerOptions::new(0.2)).unwrap();
//! println!("Calculated scale factor: {}", report.estimate.scale);
//! ```
extern crate thiserror;

use thiserror::Error;

pub mod camera;
pub mod detection;
pub mod landmark;
pub mod mesh;
pub mod ransac;
pub mod scale;
pub mod scaler;
pub mod scene;
pub mod synthetic;
pub mod triangulation;

#[cfg(test)]
mod test_utils;

pub use camera::*;
pub use detection::*;
pub use landmark::*;
pub use ransac::{ransac, RansacOptions, RansacResult};
pub use scale::*;
pub use scaler::{ScaleReport, ScalerOptions};
pub use scene::*;
pub use triangulation::{triangulate, triangulate_robust, Observation};

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("need at least 2 triangulated landmarks, got {0}")]
    NotEnoughLandmarks(usize),
    #[error("need at least 2 scale samples, got {0}")]
    NotEnoughScales(usize),
    #[error("no views left after filtering")]
    NoViews,
    #[error("unsupported file format {0}")]
    UnsupportedFormat(String),
}

/// Extension of `path`, or an [Error::UnsupportedFormat] if it has none.
pub(crate) fn extension(path: &std::path::Path) -> Result<&str, Error> {
    path.extension()
        .and_then(|x| x.to_str())
        .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))
}
