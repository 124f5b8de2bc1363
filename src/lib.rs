pub mod backend;
pub mod cv;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod folds;
pub mod param;
pub mod result;
pub mod utils;

use crate::backend::BackendRegistry;
use crate::cv::{CvScheme, Partition, SchemeKind};
use crate::data::TrialDataset;
use crate::dispatch::Dispatcher;
use crate::error::{CvError, Result};
use crate::folds::FoldGenerator;
use crate::param::Param;
use crate::result::{CvResult, PartitionEntry, ResultAggregator};
use chrono::Local;
use log::{debug, info};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Load the dataset named in the parameters and cross-validate the selected model on it
pub fn run(param: &Param, registry: &BackendRegistry, running: Arc<AtomicBool>) -> Result<CvResult> {
    let data = TrialDataset::load(&param.data)?;
    run_on_data(&data, registry, param, running)
}

/// Cross-validate on an already assembled dataset.
///
/// Every fatal problem (unknown model, bad scheme parameters, missing location or year for the
/// requested holdout, inconsistent feature toggles) is raised before any fitting starts.
/// Failures of individual partitions are recorded in the returned result.
pub fn run_on_data(data: &TrialDataset, registry: &BackendRegistry, param: &Param, running: Arc<AtomicBool>) -> Result<CvResult> {
    let start = std::time::Instant::now();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();

    debug!("{:?}", data);
    if data.phenotyped().is_empty() {
        return Err(CvError::validation("Dataset holds no phenotyped record to cross-validate"));
    }

    let scheme = CvScheme::from_param(&param.cv)?;
    let dispatcher = Dispatcher::new(data, &param.features, registry, &param.model.name, param.general.partition_timeout_secs)?;
    let generator = FoldGenerator::new(scheme.clone(), param.general.seed);
    let plan = generator.generate(data)?;

    info!(
        "Cross-validating '{}' with {} on {} threads\n-----------------------------------------------------",
        param.model.name, scheme, param.general.thread_number
    );
    let aggregator = ResultAggregator::new();
    dispatcher.run(&plan.partitions, param.general.thread_number, running, &aggregator)?;

    let result = CvResult {
        id: format!("{}_{}_{}", result_stem(&param.general.save_result), param.model.name, timestamp),
        version: result::version(),
        timestamp,
        scheme,
        model: param.model.name.clone(),
        seed: generator.seed(),
        feature_columns: dispatcher.feature_columns().to_vec(),
        entries: aggregator.finish(),
        skipped: plan.skipped,
        execution_time: start.elapsed().as_secs_f64(),
    };

    if param.model.save_partition_predictions {
        result.save_partition_tables(&param.model.output_dir)?;
    }

    Ok(result)
}

/// Train on every phenotyped record and predict every unphenotyped one
pub fn run_prediction(data: &TrialDataset, registry: &BackendRegistry, param: &Param) -> Result<PartitionEntry> {
    let targets = data.unphenotyped();
    if targets.is_empty() {
        return Err(CvError::validation("No unphenotyped record to predict"));
    }
    if data.phenotyped().is_empty() {
        return Err(CvError::validation("No phenotyped record to train on"));
    }

    let dispatcher = Dispatcher::new(data, &param.features, registry, &param.model.name, param.general.partition_timeout_secs)?;
    let partition = Partition {
        scheme: SchemeKind::prediction,
        repeat: 0,
        fold: 0,
        label: "prediction".to_string(),
        seed: None,
        train: data.phenotyped().to_vec(),
        test: targets,
    };

    info!("Predicting {} records with '{}' trained on {} records", partition.test.len(), param.model.name, partition.train.len());
    Ok(match dispatcher.fit_partition(&partition) {
        Ok(predictions) => PartitionEntry::fitted(&partition, predictions),
        Err(e) => PartitionEntry::failed(&partition, e),
    })
}

fn result_stem(save_result: &str) -> String {
    Path::new(save_result)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("cv")
        .to_string()
}
