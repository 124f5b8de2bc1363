use crate::error::{CvError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub cv: CV,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub model: Model,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    /// Top-level seed; a random one is drawn and reported when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "one_default")]
    pub thread_number: usize,
    /// Wall-clock budget per partition in seconds, 0 disables it
    #[serde(default = "zero_default")]
    pub partition_timeout_secs: f64,
    #[serde(default = "log_base_default")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "empty_string")]
    pub save_result: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    #[serde(default = "empty_string")]
    pub phenotypes: String,
    #[serde(default = "empty_string")]
    pub environments: String,
    #[serde(default = "empty_string")]
    pub markers: String,
    #[serde(default = "empty_string")]
    pub env_covariates: String,
    #[serde(default = "trait_name_default")]
    pub trait_name: String,
    #[serde(default = "empty_string")]
    pub replicate_column: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CV {
    #[serde(default = "scheme_default")]
    pub scheme: String,
    #[serde(default = "cv_type_default")]
    pub cv_type: String,
    #[serde(default = "forward_rule_default")]
    pub forward_rule: String,
    #[serde(default = "cv00_restriction_default")]
    pub cv00_restriction: String,
    #[serde(default = "folds_default")]
    pub nb_folds_cv1: usize,
    #[serde(default = "one_default")]
    pub repeats_cv1: usize,
    #[serde(default = "folds_default")]
    pub nb_folds_cv2: usize,
    #[serde(default = "one_default")]
    pub repeats_cv2: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Features {
    #[serde(default = "true_default")]
    pub use_markers: bool,
    #[serde(default)]
    pub marker_subset: Vec<String>,
    #[serde(default = "false_default")]
    pub use_env_covariates: bool,
    #[serde(default)]
    pub env_covariate_subset: Vec<String>,
    #[serde(default = "false_default")]
    pub include_location: bool,
    #[serde(default = "false_default")]
    pub include_year: bool,
    #[serde(default = "false_default")]
    pub include_coordinates: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Model {
    #[serde(default = "model_default")]
    pub name: String,
    #[serde(default = "false_default")]
    pub save_partition_predictions: bool,
    #[serde(default = "output_dir_default")]
    pub output_dir: String,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for CV {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Features {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Model {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get(param_file: String) -> Result<Param> {
    let param_file_reader = File::open(param_file)?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

/// Eager checks of the configuration, before any data is touched.
/// Scheme-specific checks (fold counts, sub-types) live in `cv::CvScheme::from_param`.
pub fn validate(param: &mut Param) -> Result<()> {
    crate::cv::CvScheme::from_param(&param.cv)?;

    if param.general.thread_number == 0 {
        return Err(CvError::invalid_parameter("thread_number must be >= 1"));
    }

    crate::dispatch::partition_budget(param.general.partition_timeout_secs)?;

    if param.model.name.is_empty() {
        return Err(CvError::invalid_parameter("model.name must name a backend"));
    }

    if param.data.phenotypes.is_empty() {
        warn!("No phenotype file given: data must be supplied through run_on_data()");
    }

    if param.features.use_env_covariates && param.data.env_covariates.is_empty() && !param.data.phenotypes.is_empty() {
        return Err(CvError::validation(
            "use_env_covariates=true requires data.env_covariates to be provided",
        ));
    }

    if !param.features.use_env_covariates && !param.features.env_covariate_subset.is_empty() {
        warn!("env_covariate_subset is ignored because use_env_covariates=false");
    }

    if !param.features.use_markers && !param.features.marker_subset.is_empty() {
        warn!("marker_subset is ignored because use_markers=false");
    }

    if !param.features.use_markers
        && !param.features.use_env_covariates
        && !param.features.include_location
        && !param.features.include_year
        && !param.features.include_coordinates
    {
        warn!("Every feature group is disabled: backends will only see an empty design");
    }

    Ok(())
}

// Default value definitions

fn empty_string() -> String {
    "".to_string()
}
fn log_base_default() -> String {
    "".to_string()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn trait_name_default() -> String {
    "trait".to_string()
}
fn scheme_default() -> String {
    "cv1".to_string()
}
fn cv_type_default() -> String {
    "leave-one-environment-out".to_string()
}
fn forward_rule_default() -> String {
    "same-location".to_string()
}
fn cv00_restriction_default() -> String {
    "unique-genotypes".to_string()
}
fn model_default() -> String {
    "ridge".to_string()
}
fn output_dir_default() -> String {
    "cv_output".to_string()
}
fn folds_default() -> usize {
    5
}
fn one_default() -> usize {
    1
}
fn zero_default() -> f64 {
    0.0
}
fn false_default() -> bool {
    false
}
fn true_default() -> bool {
    true
}
