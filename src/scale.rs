//! Scale estimation from triangulated marker corners.
use cgmath::prelude::*;
use cgmath::Point3;
use tracing::{debug, warn};

use crate::detection::MarkerId;
use crate::Error;

/// Fewer samples than this give a low confidence estimate.
pub const CONFIDENT_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleEstimate {
    /// Factor mapping reconstruction units to the units of the marker size.
    pub scale: f64,
    /// Per edge ratios the scale is averaged from.
    pub samples: Vec<f64>,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl ScaleEstimate {
    /// Average of `samples`. Fails with fewer than two samples.
    pub fn from_samples(samples: Vec<f64>) -> Result<Self, Error> {
        if samples.len() < 2 {
            return Err(Error::NotEnoughScales(samples.len()));
        }
        if samples.len() < CONFIDENT_SAMPLES {
            warn!(
                "only {} scale samples, the estimate may be unreliable",
                samples.len()
            );
        }

        let n = samples.len() as f64;
        let scale = samples.iter().map(|s| s / n).sum::<f64>();
        let variance = samples.iter().map(|s| (s - scale).powi(2) / n).sum::<f64>();
        let min = samples.iter().cloned().fold(std::f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(std::f64::NEG_INFINITY, f64::max);
        Ok(ScaleEstimate {
            scale,
            samples,
            min,
            max,
            std_dev: variance.sqrt(),
        })
    }
}

/// Ratios of the known marker edge length to the triangulated edge lengths.
///
/// `position(marker, corner)` gives the triangulated corner positions. Edges join consecutive
/// corners; edges with a missing or coincident endpoint are skipped.
pub fn scale_samples<'a, I, F>(marker_ids: I, position: F, marker_size: f64) -> Vec<f64>
where
    I: IntoIterator<Item = &'a MarkerId>,
    F: Fn(MarkerId, usize) -> Option<Point3<f64>>,
{
    let mut samples = Vec::new();
    for &marker in marker_ids {
        for i in 0..4 {
            let (a, b) = match (position(marker, i), position(marker, (i + 1) % 4)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            let length = (b - a).magnitude();
            let sample = marker_size / length;
            if sample.is_finite() {
                debug!("marker {} edge {}: {}", marker, i, sample);
                samples.push(sample);
            } else {
                warn!("marker {} edge {} has zero length", marker, i);
            }
        }
    }
    samples
}

/// Estimate the scale of a reconstruction from markers of edge length `marker_size`.
pub fn estimate_scale<'a, I, F>(
    marker_ids: I,
    position: F,
    marker_size: f64,
) -> Result<ScaleEstimate, Error>
where
    I: IntoIterator<Item = &'a MarkerId>,
    F: Fn(MarkerId, usize) -> Option<Point3<f64>>,
{
    ScaleEstimate::from_samples(scale_samples(marker_ids, position, marker_size))
}

#[cfg(test)]
fn square(size: f64, offset: f64) -> [Point3<f64>; 4] {
    [
        Point3::new(offset, 0.0, 0.0),
        Point3::new(offset + size, 0.0, 0.0),
        Point3::new(offset + size, size, 0.0),
        Point3::new(offset, size, 0.0),
    ]
}

#[test]
fn test_mean_of_samples() {
    let estimate = ScaleEstimate::from_samples(vec![0.9, 1.0, 1.1]).unwrap();
    assert!((estimate.scale - 1.0).abs() < 1e-12);
    assert_eq!(estimate.min, 0.9);
    assert_eq!(estimate.max, 1.1);
    assert!((estimate.std_dev - (0.02f64 / 3.0).sqrt()).abs() < 1e-12);
}

#[test]
fn test_not_enough_samples() {
    assert!(matches!(
        ScaleEstimate::from_samples(vec![1.0]),
        Err(Error::NotEnoughScales(1))
    ));
    assert!(matches!(
        ScaleEstimate::from_samples(Vec::new()),
        Err(Error::NotEnoughScales(0))
    ));
}

#[test]
fn test_missing_corners() {
    let markers = vec![square(2.0, 0.0), square(4.0, 10.0)];
    let ids = vec![0, 1, 7];
    // corner 2 of marker 1 was not triangulated and marker 7 not at all
    let position = |m: MarkerId, c: usize| match (m, c) {
        (1, 2) | (7, _) => None,
        _ => Some(markers[m as usize][c]),
    };
    let samples = scale_samples(&ids, position, 1.0);
    assert_eq!(samples, vec![0.5, 0.5, 0.5, 0.5, 0.25, 0.25]);
    let estimate = estimate_scale(&ids, position, 1.0).unwrap();
    assert!((estimate.scale - 2.5 / 6.0).abs() < 1e-12);
}

#[test]
fn test_rescaled_positions_have_unit_ratio() {
    let markers = vec![square(0.31, 0.0), square(0.29, 5.0), square(0.3, -3.0)];
    let ids = vec![0, 1, 2];
    let position = |m: MarkerId, c: usize| Some(markers[m as usize][c]);
    let estimate = estimate_scale(&ids, position, 0.15).unwrap();
    let rescaled = |m: MarkerId, c: usize| {
        position(m, c).map(|p| Point3::from_vec(p.to_vec() * estimate.scale))
    };
    let ratio = estimate_scale(&ids, rescaled, 0.15).unwrap();
    assert!((ratio.scale - 1.0).abs() < 0.01);
}
