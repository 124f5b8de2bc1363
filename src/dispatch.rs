use crate::backend::{Backend, BackendRegistry};
use crate::cv::Partition;
use crate::data::TrialDataset;
use crate::error::{CvError, PartitionError, Result};
use crate::features::{FeatureBuilder, FeatureMatrix};
use crate::param;
use crate::result::{PartitionEntry, Prediction, ResultAggregator};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Fits one backend per partition. Shares the dataset read-only with every worker.
pub struct Dispatcher<'a> {
    data: &'a TrialDataset,
    builder: FeatureBuilder,
    backend: Arc<dyn Backend>,
    model: String,
    timeout: Option<Duration>,
}

impl<'a> Dispatcher<'a> {
    /// Resolves the backend and the feature layout. Fails before any fitting on unknown model or bad toggles.
    pub fn new(
        data: &'a TrialDataset,
        features: &param::Features,
        registry: &BackendRegistry,
        model: &str,
        timeout_secs: f64,
    ) -> Result<Dispatcher<'a>> {
        let backend = registry.get(model).ok_or_else(|| {
            CvError::invalid_parameter(format!(
                "Unknown model '{}' (available: {})", model, registry.names().join(", ")
            ))
        })?;
        let builder = FeatureBuilder::new(data, features)?;
        let timeout = partition_budget(timeout_secs)?;

        Ok(Dispatcher { data, builder, backend, model: model.to_string(), timeout })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn feature_columns(&self) -> &[String] {
        self.builder.columns()
    }

    /// Train/test matrices and training targets of a partition
    pub fn matrices(&self, partition: &Partition) -> (FeatureMatrix, Vec<f64>, FeatureMatrix) {
        let x_train = self.builder.build(self.data, &partition.train);
        let y_train = partition
            .train
            .iter()
            .filter_map(|&r| self.data.record(r).observed)
            .collect();
        let x_test = self.builder.build(self.data, &partition.test);
        (x_train, y_train, x_test)
    }

    /// Fit on train, predict test. Errors stay local to the partition.
    pub fn fit_partition(&self, partition: &Partition) -> std::result::Result<Vec<Prediction>, PartitionError> {
        let (x_train, y_train, x_test) = self.matrices(partition);
        if y_train.len() != partition.train.len() {
            return Err(PartitionError::Backend("training set contains unphenotyped records".to_string()));
        }
        debug!(
            "{} {}: train {}x{}, test {}x{}",
            self.model, partition.label, x_train.n_rows(), x_train.n_cols(), x_test.n_rows(), x_test.n_cols()
        );

        let predicted = match self.timeout {
            None => fit_predict(self.backend.as_ref(), &x_train, &y_train, &x_test),
            Some(budget) => {
                let (sender, receiver) = mpsc::channel();
                let backend = Arc::clone(&self.backend);
                // the worker is detached: on timeout it is abandoned and its result dropped
                thread::spawn(move || {
                    let _ = sender.send(fit_predict(backend.as_ref(), &x_train, &y_train, &x_test));
                });
                match receiver.recv_timeout(budget) {
                    Ok(result) => result,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        return Err(PartitionError::Timeout { budget_secs: budget.as_secs_f64() })
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        Err("backend worker stopped without a result".to_string())
                    }
                }
            }
        }
        .map_err(PartitionError::Backend)?;

        if predicted.len() != partition.test.len() {
            return Err(PartitionError::Backend(format!(
                "backend returned {} predictions for {} test records",
                predicted.len(), partition.test.len()
            )));
        }

        Ok(partition
            .test
            .iter()
            .zip(predicted)
            .map(|(&r, predicted)| {
                let record = self.data.record(r);
                Prediction {
                    record: r,
                    genotype: record.genotype.clone(),
                    environment: record.environment.clone(),
                    observed: record.observed,
                    predicted,
                }
            })
            .collect())
    }

    /// Fit every partition on a pool of `thread_number` threads, appending to `aggregator` as they complete.
    /// Partitions not started once `running` is cleared are recorded as cancelled.
    pub fn run(
        &self,
        partitions: &[Partition],
        thread_number: usize,
        running: Arc<AtomicBool>,
        aggregator: &ResultAggregator,
    ) -> Result<()> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_number)
            .build()
            .map_err(|e| CvError::invalid_parameter(format!("Cannot build a pool of {} threads: {}", thread_number, e)))?;

        let total = partitions.len();
        thread_pool.install(|| {
            partitions.par_iter().for_each(|partition| {
                if !running.load(Ordering::Relaxed) {
                    aggregator.push(PartitionEntry::failed(partition, PartitionError::Cancelled));
                    return;
                }

                match self.fit_partition(partition) {
                    Ok(predictions) => {
                        info!(
                            "\x1b[1;93mPartition {:?} repeat #{} fold #{} ({}) completed | {} test records\x1b[0m",
                            partition.scheme, partition.repeat + 1, partition.fold + 1, partition.label, predictions.len()
                        );
                        aggregator.push(PartitionEntry::fitted(partition, predictions));
                    }
                    Err(e) => {
                        warn!(
                            "Partition {:?} repeat #{} fold #{} ({}) failed: {}",
                            partition.scheme, partition.repeat + 1, partition.fold + 1, partition.label, e
                        );
                        aggregator.push(PartitionEntry::failed(partition, e));
                    }
                }
            })
        });

        debug!("{} partitions dispatched", total);
        Ok(())
    }
}

/// Per-partition wall-clock budget; 0 disables it
pub fn partition_budget(timeout_secs: f64) -> Result<Option<Duration>> {
    if timeout_secs == 0.0 {
        return Ok(None);
    }
    if timeout_secs < 0.0 {
        return Err(CvError::invalid_parameter(format!(
            "Invalid partition_timeout_secs={}. Must be >= 0.", timeout_secs
        )));
    }
    Duration::try_from_secs_f64(timeout_secs)
        .map(Some)
        .map_err(|e| CvError::invalid_parameter(format!("Invalid partition_timeout_secs={}: {}", timeout_secs, e)))
}

fn fit_predict(backend: &dyn Backend, x_train: &FeatureMatrix, y_train: &[f64], x_test: &FeatureMatrix) -> std::result::Result<Vec<f64>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| -> std::result::Result<Vec<f64>, String> {
        let model = backend.fit(x_train, y_train)?;
        Ok(model.predict(x_test))
    }))
    .unwrap_or_else(|_| Err("backend panicked".to_string()))
}
