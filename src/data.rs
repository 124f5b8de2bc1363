use crate::error::{CvError, Result};
use crate::param;
use crate::utils::truncate_display;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;

/// One genotype evaluated in one environment (one row of the MET)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub genotype: String,
    pub environment: String,          // IDenv
    pub replicate: Option<u32>,
    pub observed: Option<f64>,        // None for prediction targets
}

impl TrialRecord {
    pub fn new(genotype: &str, environment: &str, observed: Option<f64>) -> TrialRecord {
        TrialRecord {
            genotype: genotype.to_string(),
            environment: environment.to_string(),
            replicate: None,
            observed,
        }
    }

    pub fn with_replicate(mut self, replicate: u32) -> TrialRecord {
        self.replicate = Some(replicate);
        self
    }
}

/// A location x year trial, identified by IDenv
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub location: Option<String>,
    pub year: Option<i32>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
    /// Ready-made covariate summary (weather, soil...), aligned on `TrialDataset::covariate_names`
    pub covariates: Option<Vec<f64>>,
}

impl Environment {
    pub fn new(id: &str, location: &str, year: i32) -> Environment {
        Environment {
            id: id.to_string(),
            location: Some(location.to_string()),
            year: Some(year),
            longitude: None,
            latitude: None,
            elevation: None,
            covariates: None,
        }
    }

    /// Build an environment from an IDenv of the form `<location>_<year>`
    pub fn from_id(id: &str) -> Result<Environment> {
        let (location, year) = id.rsplit_once('_').ok_or_else(|| {
            CvError::validation(format!("IDenv '{}' is not of the form <location>_<year>", id))
        })?;
        let year: i32 = year.parse().map_err(|_| {
            CvError::validation(format!("IDenv '{}' does not end with a year", id))
        })?;
        if location.is_empty() {
            return Err(CvError::validation(format!("IDenv '{}' has an empty location", id)));
        }
        Ok(Environment::new(id, location, year))
    }

    pub fn with_coordinates(mut self, longitude: f64, latitude: f64) -> Environment {
        self.longitude = Some(longitude);
        self.latitude = Some(latitude);
        self
    }

    pub fn with_covariates(mut self, covariates: Vec<f64>) -> Environment {
        self.covariates = Some(covariates);
        self
    }
}

/// Genotype x marker matrix, row-major
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerMatrix {
    pub markers: Vec<String>,
    pub genotypes: Vec<String>,
    values: Vec<f64>,
    index: HashMap<String, usize>,
}

impl MarkerMatrix {
    pub fn new(genotypes: Vec<String>, markers: Vec<String>, values: Vec<f64>) -> Result<MarkerMatrix> {
        if values.len() != genotypes.len() * markers.len() {
            return Err(CvError::validation(format!(
                "Marker matrix holds {} values, expected {} genotypes x {} markers",
                values.len(), genotypes.len(), markers.len()
            )));
        }

        let mut index = HashMap::with_capacity(genotypes.len());
        for (i, g) in genotypes.iter().enumerate() {
            if index.insert(g.clone(), i).is_some() {
                return Err(CvError::validation(format!("Genotype '{}' appears twice in the marker matrix", g)));
            }
        }

        let mut seen = BTreeSet::new();
        for m in &markers {
            if !seen.insert(m) {
                return Err(CvError::validation(format!("Marker '{}' appears twice in the marker matrix", m)));
            }
        }

        Ok(MarkerMatrix { markers, genotypes, values, index })
    }

    pub fn row(&self, genotype: &str) -> Option<&[f64]> {
        let n = self.markers.len();
        self.index.get(genotype).map(|&i| &self.values[i * n..(i + 1) * n])
    }

    pub fn marker_position(&self, marker: &str) -> Option<usize> {
        self.markers.iter().position(|m| m == marker)
    }

    pub fn marker_len(&self) -> usize {
        self.markers.len()
    }
}

/// Immutable, validated view of all MET records. No mutation after construction.
#[derive(Clone)]
pub struct TrialDataset {
    records: Vec<TrialRecord>,
    environments: Vec<Environment>,
    env_index: HashMap<String, usize>,
    covariate_names: Vec<String>,
    markers: Option<MarkerMatrix>,
    by_environment: Vec<Vec<usize>>,
    by_genotype: BTreeMap<String, Vec<usize>>,
    phenotyped: Vec<usize>,
}

impl TrialDataset {
    /// Validate and assemble a dataset.
    ///
    /// Fails with `CvError::Validation` when a record references an unknown environment,
    /// an IDenv is declared twice, location/year are given for some environments only,
    /// genotype x environment rows are duplicated without distinct replicate tags,
    /// marker rows are missing for a genotype or covariate vectors have the wrong length.
    pub fn new(
        records: Vec<TrialRecord>,
        environments: Vec<Environment>,
        markers: Option<MarkerMatrix>,
        covariate_names: Vec<String>,
    ) -> Result<TrialDataset> {
        let mut environments = environments;
        environments.sort_by(|a, b| a.id.cmp(&b.id));

        let mut env_index = HashMap::with_capacity(environments.len());
        for (i, env) in environments.iter().enumerate() {
            if env.id.is_empty() {
                return Err(CvError::validation("Environment with an empty IDenv"));
            }
            if env_index.insert(env.id.clone(), i).is_some() {
                return Err(CvError::validation(format!("Environment '{}' is declared twice", env.id)));
            }
            if let Some(cov) = &env.covariates {
                if cov.len() != covariate_names.len() {
                    return Err(CvError::validation(format!(
                        "Environment '{}' has {} covariates, expected {}",
                        env.id, cov.len(), covariate_names.len()
                    )));
                }
            }
        }

        let with_location = environments.iter().filter(|e| e.location.is_some()).count();
        if with_location != 0 && with_location != environments.len() {
            return Err(CvError::validation(format!(
                "Location is missing for {} of {} environments",
                environments.len() - with_location, environments.len()
            )));
        }
        let with_year = environments.iter().filter(|e| e.year.is_some()).count();
        if with_year != 0 && with_year != environments.len() {
            return Err(CvError::validation(format!(
                "Year is missing for {} of {} environments",
                environments.len() - with_year, environments.len()
            )));
        }

        let mut by_environment = vec![Vec::new(); environments.len()];
        let mut by_genotype: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut phenotyped = Vec::new();
        let mut keys: HashMap<(&str, &str), Vec<Option<u32>>> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            if record.genotype.is_empty() {
                return Err(CvError::validation(format!("Record #{} has an empty genotype identifier", i)));
            }
            let env = *env_index.get(&record.environment).ok_or_else(|| {
                CvError::validation(format!(
                    "Record #{} ({}) references unknown environment '{}'",
                    i, record.genotype, record.environment
                ))
            })?;

            let replicates = keys.entry((record.genotype.as_str(), record.environment.as_str())).or_default();
            if !replicates.is_empty()
                && (record.replicate.is_none() || replicates.contains(&None) || replicates.contains(&record.replicate))
            {
                return Err(CvError::validation(format!(
                    "Duplicate row for genotype '{}' in environment '{}' without a distinct replicate index",
                    record.genotype, record.environment
                )));
            }
            replicates.push(record.replicate);

            if let Some(y) = record.observed {
                if !y.is_finite() {
                    return Err(CvError::validation(format!("Record #{} has a non-finite observation", i)));
                }
                phenotyped.push(i);
            }

            by_environment[env].push(i);
            by_genotype.entry(record.genotype.clone()).or_default().push(i);
        }

        if let Some(markers) = &markers {
            let missing: Vec<&String> = by_genotype.keys().filter(|g| markers.row(g).is_none()).collect();
            if !missing.is_empty() {
                return Err(CvError::validation(format!(
                    "{} genotypes have no marker data (e.g. '{}')",
                    missing.len(), missing[0]
                )));
            }
        }

        for (env, idx) in environments.iter().zip(by_environment.iter()) {
            if idx.is_empty() {
                debug!("Environment {} has no trial records", env.id);
            }
        }

        Ok(TrialDataset {
            records,
            environments,
            env_index,
            covariate_names,
            markers,
            by_environment,
            by_genotype,
            phenotyped,
        })
    }

    /// Load the TSV inputs named in the data section of the parameters
    pub fn load(param: &param::Data) -> Result<TrialDataset> {
        info!("Loading phenotypes from {}...", param.phenotypes);
        let replicate_column = if param.replicate_column.is_empty() { None } else { Some(param.replicate_column.as_str()) };
        let records = load_phenotypes(&param.phenotypes, &param.trait_name, replicate_column)?;

        let mut environments = if param.environments.is_empty() {
            let ids: BTreeSet<&str> = records.iter().map(|r| r.environment.as_str()).collect();
            info!("No environment file: deriving {} environments from IDenv", ids.len());
            ids.into_iter().map(Environment::from_id).collect::<Result<Vec<_>>>()?
        } else {
            info!("Loading environments from {}...", param.environments);
            load_environments(&param.environments)?
        };

        let markers = if param.markers.is_empty() {
            None
        } else {
            info!("Loading markers from {}...", param.markers);
            Some(load_markers(&param.markers)?)
        };

        let covariate_names = if param.env_covariates.is_empty() {
            Vec::new()
        } else {
            info!("Loading environmental covariates from {}...", param.env_covariates);
            let (names, mut table) = load_env_covariates(&param.env_covariates)?;
            for env in environments.iter_mut() {
                env.covariates = table.remove(&env.id);
            }
            for id in table.keys() {
                warn!("Covariates given for environment {} which has no declaration", id);
            }
            names
        };

        TrialDataset::new(records, environments, markers, covariate_names)
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn record(&self, idx: usize) -> &TrialRecord {
        &self.records[idx]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Environment registry, ascending IDenv
    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn environment(&self, id: &str) -> Option<&Environment> {
        self.env_index.get(id).map(|&i| &self.environments[i])
    }

    pub fn environment_of(&self, record_idx: usize) -> &Environment {
        &self.environments[self.env_index[&self.records[record_idx].environment]]
    }

    pub fn records_by_environment(&self, id: &str) -> &[usize] {
        match self.env_index.get(id) {
            Some(&i) => &self.by_environment[i],
            None => &[],
        }
    }

    pub fn records_by_genotype(&self, genotype: &str) -> &[usize] {
        self.by_genotype.get(genotype).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Unique genotypes, ascending
    pub fn genotypes(&self) -> Vec<&str> {
        self.by_genotype.keys().map(|g| g.as_str()).collect()
    }

    /// Indices of records carrying an observation, ascending
    pub fn phenotyped(&self) -> &[usize] {
        &self.phenotyped
    }

    /// Indices of records without observation (prediction targets), ascending
    pub fn unphenotyped(&self) -> Vec<usize> {
        (0..self.records.len()).filter(|&i| self.records[i].observed.is_none()).collect()
    }

    pub fn markers(&self) -> Option<&MarkerMatrix> {
        self.markers.as_ref()
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn has_locations(&self) -> bool {
        !self.environments.is_empty() && self.environments.iter().all(|e| e.location.is_some())
    }

    pub fn has_years(&self) -> bool {
        !self.environments.is_empty() && self.environments.iter().all(|e| e.year.is_some())
    }

    /// Unique locations, ascending
    pub fn locations(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self.environments.iter().filter_map(|e| e.location.as_deref()).collect();
        set.into_iter().collect()
    }

    /// Unique years, ascending
    pub fn years(&self) -> Vec<i32> {
        let set: BTreeSet<i32> = self.environments.iter().filter_map(|e| e.year).collect();
        set.into_iter().collect()
    }
}

impl fmt::Display for TrialDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Records: {} ({} phenotyped)   Genotypes: {}   Environments: {}   Markers: {}   Covariates: {}",
            self.records.len(),
            self.phenotyped.len(),
            self.by_genotype.len(),
            self.environments.len(),
            self.markers.as_ref().map_or(0, |m| m.marker_len()),
            self.covariate_names.len()
        )?;

        for (env, idx) in self.environments.iter().zip(self.by_environment.iter()).take(20) {
            writeln!(
                f,
                "{:<20} location={:<12} year={:<6} records={}",
                env.id,
                env.location.as_deref().unwrap_or("-"),
                env.year.map_or("-".to_string(), |y| y.to_string()),
                idx.len()
            )?;
        }

        let genotypes = truncate_display(self.genotypes().join("\t"), 100);
        writeln!(f, "Genotypes: {}", genotypes)
    }
}

impl fmt::Debug for TrialDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

//-----------------------------------------------------------------------------
// TSV loaders
//-----------------------------------------------------------------------------

fn tsv_reader<P: AsRef<Path>>(path: P) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn column(headers: &csv::StringRecord, name: &str, path: &str) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        CvError::validation(format!("Column '{}' not found in {}", name, path))
    })
}

fn optional_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

/// Empty cells and NA/NaN load as missing values
pub fn parse_optional_f64(value: &str) -> Result<Option<f64>> {
    match value {
        "" | "NA" | "na" | "NaN" | "nan" => Ok(None),
        v => v.parse::<f64>().map(Some).map_err(|_| {
            CvError::validation(format!("'{}' is not a number", v))
        }),
    }
}

fn parse_f64(value: &str, context: &str) -> Result<f64> {
    parse_optional_f64(value)?.ok_or_else(|| {
        CvError::validation(format!("Missing numeric value in {}", context))
    })
}

/// Load phenotypes: columns `genotype`, `IDenv`, `<trait_name>` and optionally a replicate column
pub fn load_phenotypes(path: &str, trait_name: &str, replicate_column: Option<&str>) -> Result<Vec<TrialRecord>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let genotype_col = column(&headers, "genotype", path)?;
    let env_col = column(&headers, "IDenv", path)?;
    let trait_col = column(&headers, trait_name, path)?;
    let replicate_col = match replicate_column {
        Some(name) => Some(column(&headers, name, path)?),
        None => None,
    };

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or("");
        let observed = parse_optional_f64(field(trait_col))
            .map_err(|e| CvError::validation(format!("{} line {}: {}", path, line + 2, e)))?;
        let replicate = match replicate_col {
            Some(c) => Some(field(c).parse::<u32>().map_err(|_| {
                CvError::validation(format!("{} line {}: invalid replicate '{}'", path, line + 2, field(c)))
            })?),
            None => None,
        };
        records.push(TrialRecord {
            genotype: field(genotype_col).to_string(),
            environment: field(env_col).to_string(),
            replicate,
            observed,
        });
    }

    Ok(records)
}

/// Load the environment registry: `IDenv`, `location`, `year` and optional `longitude`, `latitude`, `elevation`
pub fn load_environments(path: &str) -> Result<Vec<Environment>> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let id_col = column(&headers, "IDenv", path)?;
    let location_col = optional_column(&headers, "location");
    let year_col = optional_column(&headers, "year");
    let lon_col = optional_column(&headers, "longitude");
    let lat_col = optional_column(&headers, "latitude");
    let elevation_col = optional_column(&headers, "elevation");

    let mut environments = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |c: Option<usize>| c.and_then(|i| row.get(i)).unwrap_or("");
        let id = field(Some(id_col)).to_string();

        let location = Some(field(location_col)).filter(|l| !l.is_empty() && *l != "NA").map(String::from);
        let year = match field(year_col) {
            "" | "NA" => None,
            y => Some(y.parse::<i32>().map_err(|_| {
                CvError::validation(format!("Environment '{}' has an invalid year '{}'", id, y))
            })?),
        };

        environments.push(Environment {
            location,
            year,
            longitude: parse_optional_f64(field(lon_col))?,
            latitude: parse_optional_f64(field(lat_col))?,
            elevation: parse_optional_f64(field(elevation_col))?,
            covariates: None,
            id,
        });
    }

    Ok(environments)
}

/// Load a genotype x marker table: first column is the genotype id, one column per marker
pub fn load_markers(path: &str) -> Result<MarkerMatrix> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let markers: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut genotypes = Vec::new();
    let mut values = Vec::new();
    for row in reader.records() {
        let row = row?;
        let genotype = row.get(0).unwrap_or("").to_string();
        if row.len() != markers.len() + 1 {
            return Err(CvError::validation(format!(
                "Genotype '{}' has {} marker values, expected {}",
                genotype, row.len().saturating_sub(1), markers.len()
            )));
        }
        for value in row.iter().skip(1) {
            values.push(parse_f64(value, &format!("markers of {}", genotype))?);
        }
        genotypes.push(genotype);
    }

    MarkerMatrix::new(genotypes, markers, values)
}

/// Load per-environment covariates: first column is IDenv, one column per covariate
pub fn load_env_covariates(path: &str) -> Result<(Vec<String>, HashMap<String, Vec<f64>>)> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let names: Vec<String> = headers.iter().skip(1).map(String::from).collect();

    let mut table = HashMap::new();
    for row in reader.records() {
        let row = row?;
        let id = row.get(0).unwrap_or("").to_string();
        let values = row
            .iter()
            .skip(1)
            .map(|v| parse_f64(v, &format!("covariates of {}", id)))
            .collect::<Result<Vec<f64>>>()?;
        if values.len() != names.len() {
            return Err(CvError::validation(format!(
                "Environment '{}' has {} covariates, expected {}", id, values.len(), names.len()
            )));
        }
        if table.insert(id.clone(), values).is_some() {
            return Err(CvError::validation(format!("Covariates given twice for environment '{}'", id)));
        }
    }

    Ok((names, table))
}
