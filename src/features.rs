use crate::data::TrialDataset;
use crate::error::{CvError, Result};
use crate::param;
use log::debug;
use serde::{Deserialize, Serialize};

/// Dense row-major design matrix handed to the backends
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    n_rows: usize,
    values: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, n_rows: usize, values: Vec<f64>) -> Result<FeatureMatrix> {
        if values.len() != n_rows * columns.len() {
            return Err(CvError::validation(format!(
                "Feature matrix holds {} values, expected {} rows x {} columns",
                values.len(), n_rows, columns.len()
            )));
        }
        Ok(FeatureMatrix { columns, n_rows, values })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.columns.len();
        &self.values[i * n..(i + 1) * n]
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.columns.len() + j]
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_rows).map(|i| self.get(i, j)).collect()
    }
}

/// Column layout resolved once per run from the feature toggles.
/// Every check happens in `new`, so building a partition's matrices cannot fail.
#[derive(Clone, Debug)]
pub struct FeatureBuilder {
    marker_positions: Vec<usize>,
    covariate_positions: Vec<usize>,
    locations: Vec<String>,
    include_year: bool,
    include_coordinates: bool,
    columns: Vec<String>,
}

fn resolve_subset(available: &[String], subset: &[String], what: &str) -> Result<Vec<usize>> {
    if subset.is_empty() {
        return Ok((0..available.len()).collect());
    }
    subset
        .iter()
        .map(|name| {
            available.iter().position(|a| a == name).ok_or_else(|| {
                CvError::validation(format!("Unknown {} '{}' in subset", what, name))
            })
        })
        .collect()
}

impl FeatureBuilder {
    pub fn new(data: &TrialDataset, features: &param::Features) -> Result<FeatureBuilder> {
        let mut columns = Vec::new();

        let marker_positions = if features.use_markers {
            let markers = data.markers().ok_or_else(|| {
                CvError::validation("use_markers=true but the dataset carries no marker matrix")
            })?;
            let positions = resolve_subset(&markers.markers, &features.marker_subset, "marker")?;
            columns.extend(positions.iter().map(|&p| markers.markers[p].clone()));
            positions
        } else {
            Vec::new()
        };

        let covariate_positions = if features.use_env_covariates {
            if data.covariate_names().is_empty() {
                return Err(CvError::validation("use_env_covariates=true but no covariate is available"));
            }
            for env in data.environments() {
                if env.covariates.is_none() && !data.records_by_environment(&env.id).is_empty() {
                    return Err(CvError::validation(format!("Environment '{}' has no covariates", env.id)));
                }
            }
            let positions = resolve_subset(data.covariate_names(), &features.env_covariate_subset, "covariate")?;
            columns.extend(positions.iter().map(|&p| data.covariate_names()[p].clone()));
            positions
        } else {
            Vec::new()
        };

        let locations: Vec<String> = if features.include_location {
            if !data.has_locations() {
                return Err(CvError::validation("include_location=true but environments have no location"));
            }
            data.locations().into_iter().map(String::from).collect()
        } else {
            Vec::new()
        };
        columns.extend(locations.iter().map(|l| format!("location:{}", l)));

        if features.include_year {
            if !data.has_years() {
                return Err(CvError::validation("include_year=true but environments have no year"));
            }
            columns.push("year".to_string());
        }

        if features.include_coordinates {
            if let Some(env) = data.environments().iter().find(|e| e.longitude.is_none() || e.latitude.is_none()) {
                return Err(CvError::validation(format!(
                    "include_coordinates=true but environment '{}' lacks longitude/latitude", env.id
                )));
            }
            columns.push("longitude".to_string());
            columns.push("latitude".to_string());
        }

        debug!(
            "Feature layout: {} markers, {} covariates, {} location levels, year={}, coordinates={}",
            marker_positions.len(), covariate_positions.len(), locations.len(),
            features.include_year, features.include_coordinates
        );

        Ok(FeatureBuilder {
            marker_positions,
            covariate_positions,
            locations,
            include_year: features.include_year,
            include_coordinates: features.include_coordinates,
            columns,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Feature rows for the given records, in the given order
    pub fn build(&self, data: &TrialDataset, rows: &[usize]) -> FeatureMatrix {
        let mut values = Vec::with_capacity(rows.len() * self.columns.len());

        for &r in rows {
            let record = data.record(r);
            let env = data.environment_of(r);

            if let Some(markers) = data.markers().and_then(|m| m.row(&record.genotype)) {
                values.extend(self.marker_positions.iter().map(|&p| markers[p]));
            }
            if let Some(cov) = &env.covariates {
                values.extend(self.covariate_positions.iter().map(|&p| cov[p]));
            }
            for location in &self.locations {
                values.push(if env.location.as_deref() == Some(location.as_str()) { 1.0 } else { 0.0 });
            }
            if self.include_year {
                values.push(env.year.unwrap_or_default() as f64);
            }
            if self.include_coordinates {
                values.push(env.longitude.unwrap_or_default());
                values.push(env.latitude.unwrap_or_default());
            }
        }

        FeatureMatrix {
            columns: self.columns.clone(),
            n_rows: rows.len(),
            values,
        }
    }
}
