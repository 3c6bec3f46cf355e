//! Read/write estimation result JSON files.
//!
//! Result JSON is the portable record of a run:
//! - τ and the selected `(λ_L, λ_H)`
//! - the completed matrix and the fitted components
//! - solver diagnostics, warnings and the search summary
//!
//! The schema is defined by `domain::EstimationResult`.

use std::fs::File;
use std::path::Path;

use crate::domain::EstimationResult;
use crate::error::EstimationError;

/// Write a result JSON file.
pub fn write_result_json(path: &Path, result: &EstimationResult) -> Result<(), EstimationError> {
    let file = File::create(path)
        .map_err(|e| EstimationError::io(format!("Failed to create result JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, result)
        .map_err(|e| EstimationError::io(format!("Failed to write result JSON: {e}")))?;
    Ok(())
}

/// Read a result JSON file.
pub fn read_result_json(path: &Path) -> Result<EstimationResult, EstimationError> {
    let file = File::open(path)
        .map_err(|e| EstimationError::io(format!("Failed to open result JSON '{}': {e}", path.display())))?;
    let result: EstimationResult =
        serde_json::from_reader(file).map_err(|e| EstimationError::io(format!("Invalid result JSON: {e}")))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EstimatorConfig, PanelData};
    use crate::fit::estimate;
    use nalgebra::DMatrix;

    #[test]
    fn result_json_reloads() {
        let y = DMatrix::from_fn(6, 5, |i, t| (i as f64) * 0.5 + (t as f64) * 0.25 + ((i * t) % 3) as f64);
        let w = DMatrix::from_fn(6, 5, |i, t| i == 0 && t == 4);
        let config = EstimatorConfig {
            lambda_l: Some(0.5),
            lambda_h: Some(0.0),
            ..EstimatorConfig::default()
        };
        let result = estimate(&PanelData::new(y, w), &config).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        write_result_json(&path, &result).unwrap();
        let back = read_result_json(&path).unwrap();
        assert_eq!(back.lambdas, result.lambdas);
        assert_eq!(back.n_treated, 1);
        assert_eq!(back.completed.shape(), (6, 5));
        assert!((back.tau.unwrap() - result.tau.unwrap()).abs() < 1e-12);
    }
}
