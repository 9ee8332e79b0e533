// src/dataset.rs
//! CSV loading for differences, historical cases and valuation rules.
//!
//! Rows are deserialized straight into the typed record structs, so analysis never
//! meets a half-parsed row. Parse failures are a DataError that names the source and
//! the 1-based line number (header = line 1). Cases are validated here as well; a
//! difference row that parses but is inconsistent is kept and fails on its own at
//! analysis time.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::records::{DifferenceRecord, HistoricalCase, TrainingSet, ValuationRule};

pub fn load_differences(path: &Path) -> Result<Vec<DifferenceRecord>> {
    let file = open(path)?;
    differences_from_reader(file, &path.display().to_string())
}

pub fn load_cases(path: &Path) -> Result<Vec<HistoricalCase>> {
    let file = open(path)?;
    cases_from_reader(file, &path.display().to_string())
}

pub fn load_rules(path: &Path) -> Result<Vec<ValuationRule>> {
    let file = open(path)?;
    rules_from_reader(file, &path.display().to_string())
}

/// Load cases + rules. A missing rules file is tolerated (empty rule table).
pub fn load_training_set(cases_path: &Path, rules_path: &Path) -> Result<TrainingSet> {
    let cases = load_cases(cases_path)?;
    let rules = if rules_path.exists() {
        load_rules(rules_path)?
    } else {
        tracing::warn!(target: "dataset", path = %rules_path.display(), "rules file missing; using empty rule table");
        Vec::new()
    };
    Ok(TrainingSet::new(cases, rules))
}

pub fn differences_from_reader<R: Read>(rdr: R, source: &str) -> Result<Vec<DifferenceRecord>> {
    let rows: Vec<DifferenceRecord> = read_rows(rdr, source)?;
    info!(target: "dataset", source, rows = rows.len(), "loaded differences");
    Ok(rows)
}

pub fn cases_from_reader<R: Read>(rdr: R, source: &str) -> Result<Vec<HistoricalCase>> {
    let rows: Vec<HistoricalCase> = read_rows(rdr, source)?;
    for (i, c) in rows.iter().enumerate() {
        c.validate()
            .map_err(|e| at_line(source, i + 2, &e.to_string()))?;
    }
    info!(target: "dataset", source, rows = rows.len(), "loaded historical cases");
    Ok(rows)
}

pub fn rules_from_reader<R: Read>(rdr: R, source: &str) -> Result<Vec<ValuationRule>> {
    let rows: Vec<ValuationRule> = read_rows(rdr, source)?;
    info!(target: "dataset", source, rows = rows.len(), "loaded valuation rules");
    Ok(rows)
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| EngineError::data(path.display().to_string(), format!("cannot open: {e}")))
}

fn read_rows<R: Read, T: DeserializeOwned>(rdr: R, source: &str) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);

    let mut out = Vec::new();
    for (i, row) in reader.deserialize::<T>().enumerate() {
        let row = row.map_err(|e| {
            let line = e
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(i + 2);
            at_line(source, line, &e.to_string())
        })?;
        out.push(row);
    }
    Ok(out)
}

fn at_line(source: &str, line: usize, message: &str) -> EngineError {
    EngineError::data(format!("{source}:{line}"), message)
}
