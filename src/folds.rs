use crate::cv::{CvScheme, PartitionPlan};
use crate::data::TrialDataset;
use crate::error::Result;
use crate::utils;
use log::{debug, info};

/// Produces the `repeats x folds` partitions of a scheme from one top-level seed.
///
/// Each repeat draws its own sub-seed from (top-level seed, repeat index), so a repeat can be
/// regenerated alone and asking for fewer repeats yields a prefix of the longer sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct FoldGenerator {
    scheme: CvScheme,
    seed: u64,
}

impl FoldGenerator {
    /// Without a seed, a random one is drawn; read it back with `seed()` to replay the run
    pub fn new(scheme: CvScheme, seed: Option<u64>) -> FoldGenerator {
        let seed = match seed {
            Some(seed) => seed,
            None => {
                let seed = utils::random_seed();
                info!("No seed supplied, using random seed {}", seed);
                seed
            }
        };
        FoldGenerator { scheme, seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn scheme(&self) -> &CvScheme {
        &self.scheme
    }

    pub fn repeat_seed(&self, repeat: usize) -> u64 {
        utils::derive_seed(self.seed, repeat, &format!("{:?}", self.scheme.kind()))
    }

    /// Partitions of a single repeat
    pub fn repeat(&self, data: &TrialDataset, repeat: usize) -> Result<PartitionPlan> {
        let seed = self.repeat_seed(repeat);
        debug!("{} repeat #{} uses sub-seed {}", self.scheme, repeat, seed);
        self.scheme.partition(data, repeat, seed)
    }

    /// Partitions of every repeat, repeat-major then fold order
    pub fn generate(&self, data: &TrialDataset) -> Result<PartitionPlan> {
        let mut plan = PartitionPlan::default();
        for repeat in 0..self.scheme.repeats() {
            let mut repeat_plan = self.repeat(data, repeat)?;
            plan.partitions.append(&mut repeat_plan.partitions);
            plan.skipped.append(&mut repeat_plan.skipped);
        }

        info!(
            "{}: {} partitions generated, {} skipped (seed {})",
            self.scheme, plan.partitions.len(), plan.skipped.len(), self.seed
        );
        Ok(plan)
    }
}
