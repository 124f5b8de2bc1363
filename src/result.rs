use crate::cv::{CvScheme, Partition, SchemeKind, SkipNotice};
use crate::error::{CvError, PartitionError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

//-----------------------------------------------------------------------------
// Per-partition entries
//-----------------------------------------------------------------------------

/// Observed vs predicted value of one test record
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Prediction {
    pub record: usize,
    pub genotype: String,
    pub environment: String,
    pub observed: Option<f64>,
    pub predicted: f64,
}

/// Where a partition sits in the run
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PartitionMeta {
    pub scheme: SchemeKind,
    pub repeat: usize,
    pub fold: usize,
    /// held-out environment, site, year or fold
    pub label: String,
    pub seed: Option<u64>,
    pub n_train: usize,
    pub n_test: usize,
}

impl From<&Partition> for PartitionMeta {
    fn from(partition: &Partition) -> PartitionMeta {
        PartitionMeta {
            scheme: partition.scheme,
            repeat: partition.repeat,
            fold: partition.fold,
            label: partition.label.clone(),
            seed: partition.seed,
            n_train: partition.train.len(),
            n_test: partition.test.len(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum PartitionStatus {
    Fitted { predictions: Vec<Prediction> },
    Failed { error: PartitionError },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PartitionEntry {
    pub meta: PartitionMeta,
    pub status: PartitionStatus,
}

impl PartitionEntry {
    pub fn fitted(partition: &Partition, predictions: Vec<Prediction>) -> PartitionEntry {
        PartitionEntry { meta: partition.into(), status: PartitionStatus::Fitted { predictions } }
    }

    pub fn failed(partition: &Partition, error: PartitionError) -> PartitionEntry {
        PartitionEntry { meta: partition.into(), status: PartitionStatus::Failed { error } }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.status, PartitionStatus::Fitted { .. })
    }

    pub fn predictions(&self) -> Option<&[Prediction]> {
        match &self.status {
            PartitionStatus::Fitted { predictions } => Some(predictions),
            PartitionStatus::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PartitionError> {
        match &self.status {
            PartitionStatus::Failed { error } => Some(error),
            PartitionStatus::Fitted { .. } => None,
        }
    }

    /// (observed, predicted) pairs of the test records carrying an observation
    pub fn pairs(&self) -> Vec<(f64, f64)> {
        self.predictions()
            .unwrap_or(&[])
            .iter()
            .filter_map(|p| p.observed.map(|o| (o, p.predicted)))
            .collect()
    }

    fn sort_key(&self) -> (SchemeKind, usize, usize) {
        (self.meta.scheme, self.meta.repeat, self.meta.fold)
    }
}

//-----------------------------------------------------------------------------
// Aggregation
//-----------------------------------------------------------------------------

/// Append-only collector shared by the workers; entries may arrive in any order
#[derive(Debug, Default)]
pub struct ResultAggregator {
    entries: Mutex<Vec<PartitionEntry>>,
}

impl ResultAggregator {
    pub fn new() -> ResultAggregator {
        ResultAggregator { entries: Mutex::new(Vec::new()) }
    }

    pub fn push(&self, entry: PartitionEntry) {
        // a poisoned lock still holds every entry pushed so far
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries ordered by (scheme, repeat, fold), whatever the completion order
    pub fn finish(self) -> Vec<PartitionEntry> {
        let mut entries = self.entries.into_inner().unwrap_or_else(|e| e.into_inner());
        entries.sort_by_key(|e| e.sort_key());
        entries
    }
}

//-----------------------------------------------------------------------------
// Cross-validation result
//-----------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvResult {
    pub id: String,
    pub version: String,
    pub timestamp: String,
    pub scheme: CvScheme,
    pub model: String,
    /// top-level seed every sub-seed derives from
    pub seed: u64,
    pub feature_columns: Vec<String>,
    pub entries: Vec<PartitionEntry>,
    pub skipped: Vec<SkipNotice>,
    pub execution_time: f64,
}

/// Counts reported at the end of a run
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CvSummary {
    pub fitted: usize,
    pub backend_errors: usize,
    pub timeouts: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

impl CvSummary {
    pub fn failed(&self) -> usize {
        self.backend_errors + self.timeouts + self.cancelled
    }
}

impl fmt::Display for CvSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fitted | {} backend errors | {} timeouts | {} cancelled | {} skipped",
            self.fitted, self.backend_errors, self.timeouts, self.cancelled, self.skipped
        )
    }
}

pub fn version() -> String {
    format!("{}#{}", env!("CARGO_PKG_VERSION"), option_env!("METCV_GIT_SHA").unwrap_or("unknown"))
}

impl CvResult {
    pub fn summary(&self) -> CvSummary {
        let mut summary = CvSummary { skipped: self.skipped.len(), ..CvSummary::default() };
        for entry in &self.entries {
            match entry.error() {
                None => summary.fitted += 1,
                Some(PartitionError::Backend(_)) => summary.backend_errors += 1,
                Some(PartitionError::Timeout { .. }) => summary.timeouts += 1,
                Some(PartitionError::Cancelled) => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Restore (scheme, repeat, fold) order
    pub fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.sort_key());
    }

    pub fn fitted(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|e| e.is_fitted())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.entries.iter().filter(|e| !e.is_fitted())
    }

    /// Warns about every failed or skipped partition, then the counts
    pub fn log_summary(&self) {
        for entry in self.failures() {
            if let Some(error) = entry.error() {
                warn!("{:?} repeat #{} fold #{} ({}): {}", entry.meta.scheme, entry.meta.repeat + 1, entry.meta.fold + 1, entry.meta.label, error);
            }
        }
        for notice in &self.skipped {
            warn!("{:?} {} skipped: {}", notice.scheme, notice.label, notice.reason);
        }
        let summary = self.summary();
        if summary.failed() > 0 || summary.skipped > 0 {
            warn!("Cross-validation finished with issues: {}", summary);
        } else {
            info!("Cross-validation finished: {}", summary);
        }
    }

    /// Saves the result in a format chosen by the file extension (json, yaml/yml, bin/bincode).
    /// Unknown extensions fall back to json; the path actually written is returned.
    pub fn save_auto<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        let written = match ext.as_str() {
            "json" => {
                std::fs::write(path, serde_json::to_string_pretty(self)?)?;
                path.to_path_buf()
            }
            "yaml" | "yml" => {
                std::fs::write(path, serde_yaml::to_string(self)?)?;
                path.to_path_buf()
            }
            "bin" | "bincode" => {
                std::fs::write(path, bincode::serialize(self)?)?;
                path.to_path_buf()
            }
            _ => {
                warn!("Unknown format '{}'. Saving result in json.", ext);
                let json_path = path.with_extension("json");
                std::fs::write(&json_path, serde_json::to_string_pretty(self)?)?;
                json_path
            }
        };
        info!("Result saved to {}", written.display());
        Ok(written)
    }

    pub fn load_auto<P: AsRef<Path>>(path: P) -> Result<CvResult> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();

        match ext.as_str() {
            "json" => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(&std::fs::read_to_string(path)?)?),
            "bin" | "bincode" => Ok(bincode::deserialize(&std::fs::read(path)?)?),
            other => Err(CvError::invalid_parameter(format!("Unknown result format '{}'", other))),
        }
    }

    /// One TSV per fitted partition: genotype, IDenv, observed, predicted
    pub fn save_partition_tables<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<String>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut written = Vec::new();
        for entry in self.fitted() {
            let name = format!(
                "{:?}_{}_repeat{}_fold{}_{}.tsv",
                entry.meta.scheme, self.model, entry.meta.repeat + 1, entry.meta.fold + 1,
                entry.meta.label.replace(['/', '\\', ' '], "-")
            );
            let path = dir.join(name);
            let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(&path)?;
            writer.write_record(["genotype", "IDenv", "observed", "predicted"])?;
            for p in entry.predictions().unwrap_or(&[]) {
                let observed = p.observed.map_or("NA".to_string(), |o| o.to_string());
                writer.write_record([p.genotype.as_str(), p.environment.as_str(), observed.as_str(), p.predicted.to_string().as_str()])?;
            }
            writer.flush()?;
            written.push(path.to_string_lossy().to_string());
        }

        info!("{} partition tables written to {}", written.len(), dir.display());
        Ok(written)
    }
}

impl fmt::Display for CvResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cross-validation {} | scheme {} | model {} | seed {}", self.id, self.scheme, self.model, self.seed)?;
        writeln!(f, "{}", self.summary())?;
        for entry in &self.entries {
            let status = match &entry.status {
                PartitionStatus::Fitted { predictions } => format!("{} predictions", predictions.len()),
                PartitionStatus::Failed { error } => format!("\x1b[1;31m{}\x1b[0m", error),
            };
            writeln!(
                f,
                "  repeat {:>2} | fold {:>3} | {:<20} | train {:>6} | test {:>6} | {}",
                entry.meta.repeat + 1, entry.meta.fold + 1, entry.meta.label, entry.meta.n_train, entry.meta.n_test, status
            )?;
        }
        for notice in &self.skipped {
            writeln!(f, "  skipped {:<20} | {}", notice.label, notice.reason)?;
        }
        Ok(())
    }
}
