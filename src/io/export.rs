//! Export the completed matrix to CSV.
//!
//! The export mirrors the ingest format (headerless, one row per unit) so a
//! completed matrix can be read back with `read_matrix_csv`.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use nalgebra::DMatrix;

use crate::error::EstimationError;

/// Write a matrix as headerless CSV.
pub fn write_matrix_csv(path: &Path, matrix: &DMatrix<f64>) -> Result<(), EstimationError> {
    let file = File::create(path)
        .map_err(|e| EstimationError::io(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_matrix(file, matrix)
}

/// Write a matrix as headerless CSV to any writer, one line per row.
pub fn write_matrix<W: Write>(out: W, matrix: &DMatrix<f64>) -> Result<(), EstimationError> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    for row in matrix.row_iter() {
        wtr.write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| EstimationError::io(format!("Failed to write export CSV row: {e}")))?;
    }
    wtr.flush()
        .map_err(|e| EstimationError::io(format!("Failed to flush export CSV: {e}")))
}
