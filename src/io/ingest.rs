//! CSV ingest for panel matrices.
//!
//! Every input is a headerless numeric CSV: one line per row, comma separated.
//!
//! Design goals:
//! - **Strict schema**: ragged rows or unparsable cells are errors that name the
//!   file, line and column
//! - **Deterministic behavior**: no reordering, no implicit fill
//! - **Separation of concerns**: no fitting logic here; shape checks across
//!   matrices happen in `PanelData::validate`

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;

use crate::domain::PanelData;
use crate::error::EstimationError;

/// File locations for one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelFiles {
    pub outcomes: PathBuf,
    pub treatment: PathBuf,
    pub unit_covariates: Option<PathBuf>,
    pub time_covariates: Option<PathBuf>,
    pub omega: Option<PathBuf>,
}

/// Load every matrix named in `files` into a panel.
pub fn load_panel(files: &PanelFiles) -> Result<PanelData, EstimationError> {
    let outcomes = read_matrix_csv(&files.outcomes)?;
    let treatment = read_matrix_csv(&files.treatment)?;
    if treatment.shape() != outcomes.shape() {
        return Err(EstimationError::shape(format!(
            "Treatment matrix is {}x{} but outcomes are {}x{}.",
            treatment.nrows(),
            treatment.ncols(),
            outcomes.nrows(),
            outcomes.ncols()
        )));
    }

    let mut panel = PanelData::from_binary_treatment(outcomes, &treatment)?;
    if let Some(path) = &files.unit_covariates {
        panel = panel.with_unit_covariates(read_matrix_csv(path)?);
    }
    if let Some(path) = &files.time_covariates {
        panel = panel.with_time_covariates(read_matrix_csv(path)?);
    }
    if let Some(path) = &files.omega {
        panel = panel.with_omega(read_matrix_csv(path)?);
    }

    log::info!(
        "loaded panel {}x{} from '{}' ({} treated cells)",
        panel.n_units(),
        panel.n_periods(),
        files.outcomes.display(),
        panel.n_treated()
    );
    Ok(panel)
}

/// Read a headerless numeric CSV file into a matrix.
pub fn read_matrix_csv(path: &Path) -> Result<DMatrix<f64>, EstimationError> {
    let file = File::open(path)
        .map_err(|e| EstimationError::io(format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_matrix(file, &path.display().to_string())
}

/// Read a headerless numeric CSV from any reader; `label` names the source in errors.
pub fn read_matrix<R: Read>(source: R, label: &str) -> Result<DMatrix<f64>, EstimationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut values = Vec::new();
    let mut ncols = None;
    let mut nrows = 0usize;

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 1;
        let record =
            result.map_err(|e| EstimationError::io(format!("Failed to read '{label}' line {line}: {e}")))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        match ncols {
            None => ncols = Some(record.len()),
            Some(expected) if expected != record.len() => {
                return Err(EstimationError::shape(format!(
                    "'{label}' line {line} has {} columns, expected {expected}.",
                    record.len()
                )));
            }
            Some(_) => {}
        }
        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| {
                EstimationError::input(format!(
                    "'{label}' line {line} column {}: '{field}' is not a number.",
                    col + 1
                ))
            })?;
            values.push(value);
        }
        nrows += 1;
    }

    let Some(ncols) = ncols else {
        return Err(EstimationError::shape(format!("'{label}' contains no rows.")));
    };
    Ok(DMatrix::from_row_slice(nrows, ncols, &values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_rows_in_order() {
        let m = read_matrix("1, 2, 3\n4,5,6\n".as_bytes(), "inline").unwrap();
        assert_eq!(m, DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn ragged_rows_are_shape_errors() {
        let err = read_matrix("1,2\n3\n".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, EstimationError::InputShape(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn bad_cells_name_their_position() {
        let err = read_matrix("1,2\n3,x\n".as_bytes(), "inline").unwrap_err();
        assert!(matches!(err, EstimationError::InvalidInput(_)));
        assert!(err.to_string().contains("line 2 column 2"));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(read_matrix("".as_bytes(), "inline").is_err());
    }

    #[test]
    fn load_panel_reads_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            let mut f = File::create(&path).unwrap();
            f.write_all(body.as_bytes()).unwrap();
            path
        };
        let files = PanelFiles {
            outcomes: write("y.csv", "1,2,3\n4,5,6\n"),
            treatment: write("w.csv", "0,0,1\n0,0,0\n"),
            unit_covariates: Some(write("x.csv", "0.5\n-0.5\n")),
            time_covariates: None,
            omega: None,
        };
        let panel = load_panel(&files).unwrap();
        assert_eq!(panel.n_treated(), 1);
        assert!(panel.treated[(0, 2)]);
        assert_eq!(panel.n_unit_covariates(), 1);

        let files = PanelFiles {
            treatment: write("w2.csv", "0,0\n0,0\n"),
            ..files
        };
        assert!(matches!(load_panel(&files), Err(EstimationError::InputShape(_))));
    }
}
