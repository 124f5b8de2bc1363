use crate::data::{Environment, TrialDataset};
use crate::error::{CvError, Result};
use crate::param;
use crate::utils;
use log::{debug, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Cross-validation philosophy, used to tag partitions and results
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
pub enum SchemeKind {
    /// new environment
    cv0,
    /// new genotype in a new environment
    cv00,
    /// new genotype
    cv1,
    /// incomplete trials (sparse testing)
    cv2,
    /// not a cross-validation: unphenotyped records predicted from all phenotyped ones
    prediction,
}

/// Which environments are held out together by CV0/CV00
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Holdout {
    LeaveOneEnvironmentOut,
    LeaveOneSiteOut,
    LeaveOneYearOut,
    ForwardPrediction,
}

/// Eligibility of a target environment for forward prediction
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardRule {
    /// at least one earlier-year environment at the same location
    SameLocation,
    /// at least one earlier-year environment anywhere
    AnyLocation,
}

/// How CV00 keeps test genotypes out of the training set
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Cv00Restriction {
    /// test only the held-out genotypes absent from the training environments
    UniqueGenotypes,
    /// test every held-out record and drop their genotypes from training
    ExcludeFromTrain,
}

impl FromStr for Holdout {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Holdout> {
        match s {
            "leave-one-environment-out" => Ok(Holdout::LeaveOneEnvironmentOut),
            "leave-one-site-out" => Ok(Holdout::LeaveOneSiteOut),
            "leave-one-year-out" => Ok(Holdout::LeaveOneYearOut),
            "forward-prediction" => Ok(Holdout::ForwardPrediction),
            other => Err(CvError::invalid_parameter(format!("Unknown cv_type '{}'", other))),
        }
    }
}

impl FromStr for ForwardRule {
    type Err = CvError;

    fn from_str(s: &str) -> Result<ForwardRule> {
        match s {
            "same-location" => Ok(ForwardRule::SameLocation),
            "any-location" => Ok(ForwardRule::AnyLocation),
            other => Err(CvError::invalid_parameter(format!("Unknown forward_rule '{}'", other))),
        }
    }
}

impl FromStr for Cv00Restriction {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Cv00Restriction> {
        match s {
            "unique-genotypes" => Ok(Cv00Restriction::UniqueGenotypes),
            "exclude-from-train" => Ok(Cv00Restriction::ExcludeFromTrain),
            other => Err(CvError::invalid_parameter(format!("Unknown cv00_restriction '{}'", other))),
        }
    }
}

impl ForwardRule {
    /// `earlier` holds the environments of strictly earlier years, i.e. the training environments
    pub fn is_eligible(&self, target: &Environment, earlier: &[&Environment]) -> bool {
        match self {
            ForwardRule::AnyLocation => !earlier.is_empty(),
            ForwardRule::SameLocation => earlier
                .iter()
                .any(|e| e.location.is_some() && e.location == target.location),
        }
    }
}

/// A fully resolved cross-validation scheme
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum CvScheme {
    Cv0 { holdout: Holdout, forward_rule: ForwardRule },
    Cv00 { holdout: Holdout, forward_rule: ForwardRule, restriction: Cv00Restriction },
    Cv1 { nb_folds: usize, repeats: usize },
    Cv2 { nb_folds: usize, repeats: usize },
}

impl CvScheme {
    pub fn from_param(cv: &param::CV) -> Result<CvScheme> {
        match cv.scheme.to_lowercase().as_str() {
            "cv0" => Ok(CvScheme::Cv0 {
                holdout: cv.cv_type.parse()?,
                forward_rule: cv.forward_rule.parse()?,
            }),
            "cv00" => Ok(CvScheme::Cv00 {
                holdout: cv.cv_type.parse()?,
                forward_rule: cv.forward_rule.parse()?,
                restriction: cv.cv00_restriction.parse()?,
            }),
            "cv1" => {
                check_counts("cv1", cv.nb_folds_cv1, cv.repeats_cv1)?;
                Ok(CvScheme::Cv1 { nb_folds: cv.nb_folds_cv1, repeats: cv.repeats_cv1 })
            }
            "cv2" => {
                check_counts("cv2", cv.nb_folds_cv2, cv.repeats_cv2)?;
                Ok(CvScheme::Cv2 { nb_folds: cv.nb_folds_cv2, repeats: cv.repeats_cv2 })
            }
            other => Err(CvError::invalid_parameter(format!(
                "Unknown CV scheme '{}' (expected cv0, cv00, cv1 or cv2)", other
            ))),
        }
    }

    pub fn kind(&self) -> SchemeKind {
        match self {
            CvScheme::Cv0 { .. } => SchemeKind::cv0,
            CvScheme::Cv00 { .. } => SchemeKind::cv00,
            CvScheme::Cv1 { .. } => SchemeKind::cv1,
            CvScheme::Cv2 { .. } => SchemeKind::cv2,
        }
    }

    /// Environment holdouts are deterministic and run once
    pub fn repeats(&self) -> usize {
        match self {
            CvScheme::Cv0 { .. } | CvScheme::Cv00 { .. } => 1,
            CvScheme::Cv1 { repeats, .. } | CvScheme::Cv2 { repeats, .. } => *repeats,
        }
    }

    pub fn is_randomized(&self) -> bool {
        matches!(self, CvScheme::Cv1 { .. } | CvScheme::Cv2 { .. })
    }

    /// Partitions of one repeat. `seed` is only read by the randomized schemes.
    pub fn partition(&self, data: &TrialDataset, repeat: usize, seed: u64) -> Result<PartitionPlan> {
        let plan = match self {
            CvScheme::Cv0 { holdout, forward_rule } => environment_holdout(data, *holdout, *forward_rule, None)?,
            CvScheme::Cv00 { holdout, forward_rule, restriction } => {
                environment_holdout(data, *holdout, *forward_rule, Some(*restriction))?
            }
            CvScheme::Cv1 { nb_folds, .. } => PartitionPlan::from(genotype_folds(data, *nb_folds, repeat, seed)?),
            CvScheme::Cv2 { nb_folds, .. } => PartitionPlan::from(record_folds(data, *nb_folds, repeat, seed)?),
        };

        debug_assert!(plan.partitions.iter().all(|p| p.is_disjoint()));
        Ok(plan)
    }
}

impl fmt::Display for CvScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CvScheme::Cv0 { holdout, .. } => write!(f, "cv0 ({:?})", holdout),
            CvScheme::Cv00 { holdout, restriction, .. } => write!(f, "cv00 ({:?}, {:?})", holdout, restriction),
            CvScheme::Cv1 { nb_folds, repeats } => write!(f, "cv1 ({} folds x {} repeats)", nb_folds, repeats),
            CvScheme::Cv2 { nb_folds, repeats } => write!(f, "cv2 ({} folds x {} repeats)", nb_folds, repeats),
        }
    }
}

fn check_counts(scheme: &str, nb_folds: usize, repeats: usize) -> Result<()> {
    if nb_folds < 2 {
        return Err(CvError::invalid_parameter(format!(
            "nb_folds_{}={} must be at least 2", scheme, nb_folds
        )));
    }
    if repeats == 0 {
        return Err(CvError::invalid_parameter(format!("repeats_{} must be > 0", scheme)));
    }
    Ok(())
}

/// One train/test split over record indices (both ascending)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub scheme: SchemeKind,
    pub repeat: usize,
    pub fold: usize,
    /// held-out environment, site or year; `fold-k` for cv1/cv2
    pub label: String,
    pub seed: Option<u64>,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Partition {
    pub fn is_disjoint(&self) -> bool {
        let train: HashSet<usize> = self.train.iter().copied().collect();
        self.test.iter().all(|i| !train.contains(i))
    }
}

/// A partition that was not produced, with the reason
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SkipNotice {
    pub scheme: SchemeKind,
    pub repeat: usize,
    pub label: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionPlan {
    pub partitions: Vec<Partition>,
    pub skipped: Vec<SkipNotice>,
}

impl From<Vec<Partition>> for PartitionPlan {
    fn from(partitions: Vec<Partition>) -> PartitionPlan {
        PartitionPlan { partitions, skipped: Vec::new() }
    }
}

//-----------------------------------------------------------------------------
// CV0 / CV00: environment isolation
//-----------------------------------------------------------------------------

struct HoldoutGroup {
    label: String,
    test_envs: Vec<usize>,
    train_envs: Vec<usize>,
}

fn holdout_groups(data: &TrialDataset, holdout: Holdout, rule: ForwardRule, kind: SchemeKind) -> Result<(Vec<HoldoutGroup>, Vec<SkipNotice>)> {
    let envs = data.environments();
    let all: Vec<usize> = (0..envs.len()).collect();
    let others = |held: &[usize]| all.iter().copied().filter(|i| !held.contains(i)).collect::<Vec<usize>>();
    let mut skipped = Vec::new();

    let groups = match holdout {
        Holdout::LeaveOneEnvironmentOut => all
            .iter()
            .map(|&i| HoldoutGroup { label: envs[i].id.clone(), test_envs: vec![i], train_envs: others(&[i]) })
            .collect(),

        Holdout::LeaveOneSiteOut => {
            if !data.has_locations() {
                return Err(CvError::validation("leave-one-site-out requires a location for every environment"));
            }
            let mut sites: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (i, env) in envs.iter().enumerate() {
                sites.entry(env.location.as_deref().unwrap_or_default()).or_default().push(i);
            }
            sites
                .into_iter()
                .map(|(site, held)| HoldoutGroup { label: site.to_string(), train_envs: others(&held), test_envs: held })
                .collect()
        }

        Holdout::LeaveOneYearOut => {
            if !data.has_years() {
                return Err(CvError::validation("leave-one-year-out requires a year for every environment"));
            }
            let mut years: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
            for (i, env) in envs.iter().enumerate() {
                years.entry(env.year.unwrap_or_default()).or_default().push(i);
            }
            years
                .into_iter()
                .map(|(year, held)| HoldoutGroup { label: year.to_string(), train_envs: others(&held), test_envs: held })
                .collect()
        }

        Holdout::ForwardPrediction => {
            if !data.has_years() {
                return Err(CvError::validation("forward-prediction requires a year for every environment"));
            }
            if rule == ForwardRule::SameLocation && !data.has_locations() {
                return Err(CvError::validation("forward-prediction with same-location rule requires locations"));
            }
            let mut groups = Vec::new();
            for (i, target) in envs.iter().enumerate() {
                // only environments contributing phenotyped training records count as earlier
                let earlier: Vec<usize> = all
                    .iter()
                    .copied()
                    .filter(|&j| envs[j].year < target.year && !phenotyped_in(data, &[j]).is_empty())
                    .collect();
                let earlier_envs: Vec<&Environment> = earlier.iter().map(|&j| &envs[j]).collect();
                if rule.is_eligible(target, &earlier_envs) {
                    groups.push(HoldoutGroup { label: target.id.clone(), test_envs: vec![i], train_envs: earlier });
                } else {
                    skipped.push(SkipNotice {
                        scheme: kind,
                        repeat: 0,
                        label: target.id.clone(),
                        reason: format!("no earlier-year environment satisfies the {:?} rule", rule),
                    });
                }
            }
            groups
        }
    };

    Ok((groups, skipped))
}

fn phenotyped_in(data: &TrialDataset, env_idx: &[usize]) -> Vec<usize> {
    let mut idx: Vec<usize> = env_idx
        .iter()
        .flat_map(|&e| data.records_by_environment(&data.environments()[e].id).iter().copied())
        .filter(|&r| data.record(r).observed.is_some())
        .collect();
    idx.sort_unstable();
    idx
}

fn genotype_set<'a>(data: &'a TrialDataset, records: &[usize]) -> HashSet<&'a str> {
    records.iter().map(|&r| data.record(r).genotype.as_str()).collect()
}

/// CV0 (`restriction == None`) and CV00 partitions, ascending IDenv / site / year order. Not randomized.
pub fn environment_holdout(
    data: &TrialDataset,
    holdout: Holdout,
    rule: ForwardRule,
    restriction: Option<Cv00Restriction>,
) -> Result<PartitionPlan> {
    let kind = if restriction.is_some() { SchemeKind::cv00 } else { SchemeKind::cv0 };
    let (groups, mut skipped) = holdout_groups(data, holdout, rule, kind)?;
    let mut partitions = Vec::new();

    for group in groups {
        let mut test = phenotyped_in(data, &group.test_envs);
        let mut train = phenotyped_in(data, &group.train_envs);

        match restriction {
            None => {}
            Some(Cv00Restriction::UniqueGenotypes) => {
                let train_genotypes = genotype_set(data, &train);
                test.retain(|&r| !train_genotypes.contains(data.record(r).genotype.as_str()));
            }
            Some(Cv00Restriction::ExcludeFromTrain) => {
                let test_genotypes = genotype_set(data, &test);
                train.retain(|&r| !test_genotypes.contains(data.record(r).genotype.as_str()));
            }
        }

        let reason = if test.is_empty() {
            Some(if restriction.is_some() { "no test genotype left after genotype isolation" } else { "no phenotyped test record" })
        } else if train.is_empty() {
            Some("no phenotyped training record")
        } else {
            None
        };

        if let Some(reason) = reason {
            skipped.push(SkipNotice { scheme: kind, repeat: 0, label: group.label, reason: reason.to_string() });
            continue;
        }

        partitions.push(Partition {
            scheme: kind,
            repeat: 0,
            fold: partitions.len(),
            label: group.label,
            seed: None,
            train,
            test,
        });
    }

    for notice in &skipped {
        warn!("{:?}: skipping {} ({})", notice.scheme, notice.label, notice.reason);
    }
    debug!("{:?}: {} partitions, {} skipped", kind, partitions.len(), skipped.len());

    Ok(PartitionPlan { partitions, skipped })
}

//-----------------------------------------------------------------------------
// CV1 / CV2: random folds
//-----------------------------------------------------------------------------

fn folds_from_chunks(kind: SchemeKind, repeat: usize, seed: u64, test_sets: Vec<Vec<usize>>, universe: &[usize]) -> Vec<Partition> {
    test_sets
        .into_iter()
        .enumerate()
        .map(|(fold, mut test)| {
            test.sort_unstable();
            let held: HashSet<usize> = test.iter().copied().collect();
            let train = universe.iter().copied().filter(|r| !held.contains(r)).collect();
            Partition {
                scheme: kind,
                repeat,
                fold,
                label: format!("fold-{}", fold + 1),
                seed: Some(seed),
                train,
                test,
            }
        })
        .collect()
}

/// CV1: genotypes (not records) are shuffled into `nb_folds` balanced groups; one repeat
pub fn genotype_folds(data: &TrialDataset, nb_folds: usize, repeat: usize, seed: u64) -> Result<Vec<Partition>> {
    let universe = data.phenotyped();
    let genotypes: BTreeSet<&str> = universe.iter().map(|&r| data.record(r).genotype.as_str()).collect();
    if nb_folds < 2 || nb_folds > genotypes.len() {
        return Err(CvError::invalid_parameter(format!(
            "nb_folds_cv1={} must be between 2 and the number of phenotyped genotypes ({})",
            nb_folds, genotypes.len()
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let chunks = utils::split_into_balanced_random_chunks(genotypes.into_iter().collect(), nb_folds, &mut rng);

    let test_sets: Vec<Vec<usize>> = chunks
        .iter()
        .map(|chunk| {
            let held: HashSet<&str> = chunk.iter().copied().collect();
            universe.iter().copied().filter(|&r| held.contains(data.record(r).genotype.as_str())).collect()
        })
        .collect();

    Ok(folds_from_chunks(SchemeKind::cv1, repeat, seed, test_sets, universe))
}

/// CV2: phenotyped records are shuffled into `nb_folds` balanced groups; one repeat
pub fn record_folds(data: &TrialDataset, nb_folds: usize, repeat: usize, seed: u64) -> Result<Vec<Partition>> {
    let universe = data.phenotyped();
    if nb_folds < 2 || nb_folds > universe.len() {
        return Err(CvError::invalid_parameter(format!(
            "nb_folds_cv2={} must be between 2 and the number of phenotyped records ({})",
            nb_folds, universe.len()
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let chunks = utils::split_into_balanced_random_chunks(universe.to_vec(), nb_folds, &mut rng);

    Ok(folds_from_chunks(SchemeKind::cv2, repeat, seed, chunks, universe))
}

// unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TrialRecord;

    fn env_ids(data: &TrialDataset, idx: &[usize]) -> BTreeSet<String> {
        idx.iter().map(|&r| data.record(r).environment.clone()).collect()
    }

    fn genotypes(data: &TrialDataset, idx: &[usize]) -> BTreeSet<String> {
        idx.iter().map(|&r| data.record(r).genotype.clone()).collect()
    }

    /// A: 2019-2021, B: 2021 only, C: 2020-2021; genotypes partly shared
    fn staggered() -> TrialDataset {
        let envs = vec![
            Environment::new("A_2019", "A", 2019),
            Environment::new("A_2020", "A", 2020),
            Environment::new("A_2021", "A", 2021),
            Environment::new("B_2021", "B", 2021),
            Environment::new("C_2020", "C", 2020),
            Environment::new("C_2021", "C", 2021),
        ];
        let mut records = Vec::new();
        let layout: [(&str, &[&str]); 6] = [
            ("A_2019", &["g1", "g2", "g3"]),
            ("A_2020", &["g1", "g2", "g4"]),
            ("A_2021", &["g2", "g5"]),
            ("B_2021", &["g1", "g6"]),
            ("C_2020", &["g3", "g4"]),
            ("C_2021", &["g7"]),
        ];
        for (env, genos) in layout.iter() {
            for (k, g) in genos.iter().enumerate() {
                records.push(TrialRecord::new(g, env, Some(1.0 + k as f64)));
            }
        }
        TrialDataset::new(records, envs, None, vec![]).unwrap()
    }

    fn cv_param(scheme: &str) -> param::CV {
        let mut p = param::CV::default();
        p.scheme = scheme.to_string();
        p
    }

    #[test]
    fn test_scheme_from_param() {
        let mut p = cv_param("cv00");
        p.cv_type = "forward-prediction".to_string();
        p.cv00_restriction = "exclude-from-train".to_string();
        assert_eq!(
            CvScheme::from_param(&p).unwrap(),
            CvScheme::Cv00 {
                holdout: Holdout::ForwardPrediction,
                forward_rule: ForwardRule::SameLocation,
                restriction: Cv00Restriction::ExcludeFromTrain
            }
        );

        let mut p = cv_param("CV2");
        p.nb_folds_cv2 = 3;
        p.repeats_cv2 = 4;
        let scheme = CvScheme::from_param(&p).unwrap();
        assert_eq!(scheme, CvScheme::Cv2 { nb_folds: 3, repeats: 4 });
        assert_eq!(scheme.repeats(), 4);
        assert!(scheme.is_randomized());
    }

    #[test]
    fn test_scheme_from_param_errors() {
        let mut p = cv_param("cv0");
        p.cv_type = "leave-one-planet-out".to_string();
        assert!(matches!(CvScheme::from_param(&p), Err(CvError::InvalidParameter(_))));

        let mut p = cv_param("cv1");
        p.repeats_cv1 = 0;
        assert!(matches!(CvScheme::from_param(&p), Err(CvError::InvalidParameter(_))));

        let mut p = cv_param("cv2");
        p.nb_folds_cv2 = 0;
        assert!(matches!(CvScheme::from_param(&p), Err(CvError::InvalidParameter(_))));

        assert!(matches!(CvScheme::from_param(&cv_param("cv9")), Err(CvError::InvalidParameter(_))));
    }

    #[test]
    fn test_cv0_leave_one_environment_out_scenario() {
        let data = TrialDataset::test();
        let plan = environment_holdout(&data, Holdout::LeaveOneEnvironmentOut, ForwardRule::SameLocation, None).unwrap();

        assert_eq!(plan.partitions.len(), 4);
        assert!(plan.skipped.is_empty());
        for (p, env) in plan.partitions.iter().zip(data.environments()) {
            assert_eq!(p.label, env.id);
            assert_eq!(p.test, data.records_by_environment(&env.id));
            assert_eq!(p.train.len() + p.test.len(), data.len());
            assert!(env_ids(&data, &p.train).is_disjoint(&env_ids(&data, &p.test)));
            assert_eq!(p.seed, None);
        }
    }

    #[test]
    fn test_cv0_site_and_year_out() {
        let data = TrialDataset::test();

        let sites = environment_holdout(&data, Holdout::LeaveOneSiteOut, ForwardRule::SameLocation, None).unwrap();
        assert_eq!(sites.partitions.len(), 2);
        assert_eq!(sites.partitions[0].label, "Loc1");
        assert_eq!(env_ids(&data, &sites.partitions[0].test), ["Loc1_2020", "Loc1_2021"].iter().map(|s| s.to_string()).collect::<BTreeSet<String>>());

        let years = environment_holdout(&data, Holdout::LeaveOneYearOut, ForwardRule::SameLocation, None).unwrap();
        assert_eq!(years.partitions.len(), 2);
        assert_eq!(years.partitions[1].label, "2021");
        for p in &years.partitions {
            let test_years: BTreeSet<i32> = p.test.iter().map(|&r| data.environment_of(r).year.unwrap()).collect();
            let train_years: BTreeSet<i32> = p.train.iter().map(|&r| data.environment_of(r).year.unwrap()).collect();
            assert!(test_years.is_disjoint(&train_years));
        }
    }

    #[test]
    fn test_site_out_without_locations_fails() {
        let mut env = Environment::new("E1", "x", 2020);
        env.location = None;
        let data = TrialDataset::new(vec![TrialRecord::new("g", "E1", Some(1.0))], vec![env], None, vec![]).unwrap();
        let err = environment_holdout(&data, Holdout::LeaveOneSiteOut, ForwardRule::SameLocation, None).unwrap_err();
        assert!(matches!(err, CvError::Validation(_)));
    }

    #[test]
    fn test_forward_prediction_same_location() {
        let data = staggered();
        let plan = environment_holdout(&data, Holdout::ForwardPrediction, ForwardRule::SameLocation, None).unwrap();

        let labels: Vec<&str> = plan.partitions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["A_2020", "A_2021", "C_2021"]);

        let skipped: Vec<&str> = plan.skipped.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(skipped, vec!["A_2019", "B_2021", "C_2020"]);

        for p in &plan.partitions {
            let target_year = data.environment(&p.label).unwrap().year.unwrap();
            assert!(p.train.iter().all(|&r| data.environment_of(r).year.unwrap() < target_year));
        }
    }

    #[test]
    fn test_forward_prediction_any_location() {
        let data = staggered();
        let plan = environment_holdout(&data, Holdout::ForwardPrediction, ForwardRule::AnyLocation, None).unwrap();
        let labels: Vec<&str> = plan.partitions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["A_2020", "A_2021", "B_2021", "C_2020", "C_2021"]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].label, "A_2019");
    }

    #[test]
    fn test_forward_prediction_ignores_unphenotyped_earlier_environment() {
        let envs = vec![
            Environment::new("A_2019", "A", 2019),
            Environment::new("A_2020", "A", 2020),
            Environment::new("B_2019", "B", 2019),
        ];
        let records = vec![
            TrialRecord::new("g1", "A_2019", None),
            TrialRecord::new("g1", "A_2020", Some(2.0)),
            TrialRecord::new("g2", "A_2020", Some(3.0)),
            TrialRecord::new("g2", "B_2019", Some(1.0)),
        ];
        let data = TrialDataset::new(records, envs, None, vec![]).unwrap();

        let plan = environment_holdout(&data, Holdout::ForwardPrediction, ForwardRule::SameLocation, None).unwrap();
        assert!(plan.partitions.is_empty());
        let skipped: Vec<&str> = plan.skipped.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(skipped, vec!["A_2019", "A_2020", "B_2019"]);

        let plan = environment_holdout(&data, Holdout::ForwardPrediction, ForwardRule::AnyLocation, None).unwrap();
        assert_eq!(plan.partitions.len(), 1);
        assert_eq!(plan.partitions[0].label, "A_2020");
        assert_eq!(env_ids(&data, &plan.partitions[0].train), BTreeSet::from(["B_2019".to_string()]));
    }

    #[test]
    fn test_cv00_unique_genotypes() {
        let data = staggered();
        let plan = environment_holdout(
            &data, Holdout::LeaveOneEnvironmentOut, ForwardRule::SameLocation, Some(Cv00Restriction::UniqueGenotypes),
        ).unwrap();

        for p in &plan.partitions {
            assert_eq!(p.scheme, SchemeKind::cv00);
            assert!(genotypes(&data, &p.train).is_disjoint(&genotypes(&data, &p.test)));
        }
        // g5 only in A_2021, g6 only in B_2021, g7 only in C_2021
        let labels: Vec<&str> = plan.partitions.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["A_2021", "B_2021", "C_2021"]);
        assert_eq!(genotypes(&data, &plan.partitions[0].test), ["g5".to_string()].into_iter().collect::<BTreeSet<String>>());
        assert_eq!(plan.skipped.len(), 3);
    }

    #[test]
    fn test_cv00_exclude_from_train() {
        let data = staggered();
        let plan = environment_holdout(
            &data, Holdout::LeaveOneEnvironmentOut, ForwardRule::SameLocation, Some(Cv00Restriction::ExcludeFromTrain),
        ).unwrap();

        assert_eq!(plan.partitions.len(), 6);
        for p in &plan.partitions {
            assert_eq!(p.test, data.records_by_environment(&p.label));
            assert!(genotypes(&data, &p.train).is_disjoint(&genotypes(&data, &p.test)));
        }
    }

    #[test]
    fn test_cv00_complete_design_skips_everything() {
        let data = TrialDataset::test();
        let plan = environment_holdout(
            &data, Holdout::LeaveOneEnvironmentOut, ForwardRule::SameLocation, Some(Cv00Restriction::UniqueGenotypes),
        ).unwrap();
        assert!(plan.partitions.is_empty());
        assert_eq!(plan.skipped.len(), 4);
    }

    #[test]
    fn test_cv0_ignores_unphenotyped_records() {
        let envs = vec![Environment::new("A_2020", "A", 2020), Environment::new("B_2020", "B", 2020)];
        let records = vec![
            TrialRecord::new("g1", "A_2020", Some(1.0)),
            TrialRecord::new("g2", "A_2020", None),
            TrialRecord::new("g1", "B_2020", Some(2.0)),
        ];
        let data = TrialDataset::new(records, envs, None, vec![]).unwrap();
        let plan = environment_holdout(&data, Holdout::LeaveOneEnvironmentOut, ForwardRule::SameLocation, None).unwrap();
        assert_eq!(plan.partitions[0].test, vec![0]);
        assert_eq!(plan.partitions[1].train, vec![0]);
    }

    #[test]
    fn test_cv1_partitions_genotypes() {
        let data = TrialDataset::test_grid(&["L1", "L2"], &[2020], 23);
        let folds = genotype_folds(&data, 5, 0, 42).unwrap();
        assert_eq!(folds.len(), 5);

        let mut seen = BTreeSet::new();
        for p in &folds {
            let test = genotypes(&data, &p.test);
            assert!(test.len() == 4 || test.len() == 5);
            assert!(test.is_disjoint(&genotypes(&data, &p.train)));
            assert_eq!(p.train.len() + p.test.len(), data.len());
            for g in test {
                assert!(seen.insert(g));
            }
        }
        assert_eq!(seen.len(), 23);
    }

    #[test]
    fn test_cv1_too_many_folds() {
        let data = TrialDataset::test();
        assert!(matches!(genotype_folds(&data, 7, 0, 1), Err(CvError::InvalidParameter(_))));
    }

    #[test]
    fn test_cv2_partitions_records() {
        let data = TrialDataset::test();
        let folds = record_folds(&data, 5, 2, 9).unwrap();
        let mut all: Vec<usize> = folds.iter().flat_map(|p| p.test.iter().copied()).collect();
        all.sort();
        assert_eq!(all, (0..data.len()).collect::<Vec<usize>>());
        for p in &folds {
            assert!(p.is_disjoint());
            assert_eq!(p.repeat, 2);
            assert_eq!(p.seed, Some(9));
            assert!(p.test.len() == 4 || p.test.len() == 5);
        }
    }

    #[test]
    fn test_random_folds_are_deterministic() {
        let data = TrialDataset::test_grid(&["L1"], &[2020, 2021], 30);
        assert_eq!(genotype_folds(&data, 4, 0, 11).unwrap(), genotype_folds(&data, 4, 0, 11).unwrap());
        assert_eq!(record_folds(&data, 4, 0, 11).unwrap(), record_folds(&data, 4, 0, 11).unwrap());
        assert_ne!(record_folds(&data, 4, 0, 11).unwrap(), record_folds(&data, 4, 0, 12).unwrap());
    }

    #[test]
    fn test_scheme_partition_dispatch() {
        let data = TrialDataset::test();
        let scheme = CvScheme::Cv0 { holdout: Holdout::LeaveOneYearOut, forward_rule: ForwardRule::SameLocation };
        assert_eq!(scheme.partition(&data, 0, 0).unwrap(), scheme.partition(&data, 0, 999).unwrap());
        assert_eq!(scheme.kind(), SchemeKind::cv0);
        assert_eq!(scheme.repeats(), 1);
    }
}
