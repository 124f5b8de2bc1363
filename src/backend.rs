use crate::features::FeatureMatrix;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A fitted model: inference only, free from training hyperparameters
pub trait FittedModel: Send {
    /// One prediction per row of `x`, in row order
    fn predict(&self, x: &FeatureMatrix) -> Vec<f64>;
}

/// A fit/predict capability. Implementations must be shareable across worker threads.
pub trait Backend: Send + Sync {
    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Box<dyn FittedModel>, String>;
}

/// Explicit mapping from model identifier to backend, built by the caller and passed to a run
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> BackendRegistry {
        BackendRegistry { backends: BTreeMap::new() }
    }

    /// Registry holding the built-in `mean` and `ridge` backends
    pub fn with_builtins() -> BackendRegistry {
        BackendRegistry::new()
            .with("mean", MeanBackend)
            .with("ridge", RidgeBackend::default())
    }

    pub fn with<B: Backend + 'static>(mut self, name: &str, backend: B) -> BackendRegistry {
        self.insert(name, Arc::new(backend));
        self
    }

    pub fn insert(&mut self, name: &str, backend: Arc<dyn Backend>) {
        self.backends.insert(name.to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(|k| k.as_str()).collect()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackendRegistry {:?}", self.names())
    }
}

//-----------------------------------------------------------------------------
// Built-in backends
//-----------------------------------------------------------------------------

/// Predicts the training mean everywhere. Baseline for predictive ability.
pub struct MeanBackend;

struct ConstantModel(f64);

impl FittedModel for ConstantModel {
    fn predict(&self, x: &FeatureMatrix) -> Vec<f64> {
        vec![self.0; x.n_rows()]
    }
}

impl Backend for MeanBackend {
    fn fit(&self, _x: &FeatureMatrix, y: &[f64]) -> Result<Box<dyn FittedModel>, String> {
        if y.is_empty() {
            return Err("cannot fit a mean on an empty training set".to_string());
        }
        Ok(Box::new(ConstantModel(y.mean())))
    }
}

/// Ridge regression on standardised columns, solved by cyclic coordinate descent
#[derive(Clone, Debug)]
pub struct RidgeBackend {
    pub lambda: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for RidgeBackend {
    fn default() -> Self {
        RidgeBackend { lambda: 1.0, max_iter: 200, tol: 1e-6 }
    }
}

struct RidgeModel {
    intercept: f64,
    centers: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
}

impl FittedModel for RidgeModel {
    fn predict(&self, x: &FeatureMatrix) -> Vec<f64> {
        (0..x.n_rows())
            .map(|i| {
                x.row(i)
                    .iter()
                    .zip(self.centers.iter().zip(self.scales.iter()))
                    .zip(self.weights.iter())
                    .map(|((v, (c, s)), w)| (v - c) / s * w)
                    .sum::<f64>()
                    + self.intercept
            })
            .collect()
    }
}

impl Backend for RidgeBackend {
    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Box<dyn FittedModel>, String> {
        let n = x.n_rows();
        let p = x.n_cols();
        if n == 0 {
            return Err("cannot fit ridge regression on an empty training set".to_string());
        }
        if y.len() != n {
            return Err(format!("{} targets for {} training rows", y.len(), n));
        }
        if self.lambda < 0.0 {
            return Err(format!("ridge lambda must be >= 0, got {}", self.lambda));
        }

        let intercept = y.mean();
        let mut centers = Vec::with_capacity(p);
        let mut scales = Vec::with_capacity(p);
        let mut columns = Vec::with_capacity(p);
        for j in 0..p {
            let col = x.column(j);
            let center = col.iter().mean();
            let sd = if n > 1 { col.iter().population_std_dev() } else { 0.0 };
            // constant columns carry no signal
            let scale = if sd > 1e-12 { sd } else { 1.0 };
            columns.push(col.iter().map(|v| (v - center) / scale).collect::<Vec<f64>>());
            centers.push(center);
            scales.push(scale);
        }

        let norms: Vec<f64> = columns.iter().map(|c| c.iter().map(|v| v * v).sum()).collect();
        let mut residual: Vec<f64> = y.iter().map(|v| v - intercept).collect();
        let mut weights = vec![0.0; p];

        for _ in 0..self.max_iter {
            let mut max_change: f64 = 0.0;
            for j in 0..p {
                if norms[j] == 0.0 {
                    continue;
                }
                let rho: f64 = columns[j].iter().zip(residual.iter()).map(|(a, r)| a * r).sum::<f64>() + norms[j] * weights[j];
                let updated = rho / (norms[j] + self.lambda);
                let delta = updated - weights[j];
                if delta != 0.0 {
                    for (r, a) in residual.iter_mut().zip(columns[j].iter()) {
                        *r -= delta * a;
                    }
                    weights[j] = updated;
                    max_change = max_change.max(delta.abs());
                }
            }
            if max_change < self.tol {
                break;
            }
        }

        if weights.iter().any(|w| !w.is_finite()) {
            return Err("ridge regression diverged".to_string());
        }

        Ok(Box::new(RidgeModel { intercept, centers, scales, weights }))
    }
}
