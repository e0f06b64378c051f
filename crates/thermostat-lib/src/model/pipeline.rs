//! Feature preprocessing for the regression forest
//!
//! Per-column transform fitted on the training set: columns whose tokens
//! all parse as numbers pass through unchanged (with the training mean as
//! the fallback for unparsable predict-time tokens), everything else is
//! one-hot encoded with unseen categories mapping to all zeros, so a value
//! the model has never seen can never make prediction fail.

use crate::models::FeatureRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
enum FittedColumn {
    Numeric {
        name: String,
        /// Training mean, substituted for unparsable predict-time tokens.
        mean: f64,
    },
    Categorical {
        name: String,
        /// Sorted distinct training categories, one output column each.
        categories: Vec<String>,
    },
}

impl FittedColumn {
    fn width(&self) -> usize {
        match self {
            FittedColumn::Numeric { .. } => 1,
            FittedColumn::Categorical { categories, .. } => categories.len(),
        }
    }
}

/// Fitted per-column transform from raw tokens to the design-matrix row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    columns: Vec<FittedColumn>,
}

/// Width of the derived time features appended to every row.
const TIME_FEATURES: usize = 3;

impl Preprocessor {
    /// Fit column types and encodings from the training records.
    ///
    /// All records must share one schema; the caller (ModelManager) has
    /// already encoded them through a single engine.
    pub fn fit(records: &[FeatureRecord]) -> Self {
        let n_columns = records.first().map(|r| r.sensors.len()).unwrap_or(0);
        let columns = (0..n_columns)
            .map(|j| {
                let name = records[0].schema.columns()[j].clone();
                let tokens: Vec<&str> = records.iter().map(|r| r.sensors[j].as_str()).collect();
                fit_column(name, &tokens)
            })
            .collect();
        Self { columns }
    }

    /// Encode one record into a dense row for the forest.
    pub fn transform(&self, record: &FeatureRecord) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.output_width());
        for (column, token) in self.columns.iter().zip(record.sensors.iter()) {
            match column {
                FittedColumn::Numeric { mean, .. } => {
                    row.push(token.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(*mean));
                }
                FittedColumn::Categorical { categories, .. } => {
                    for category in categories {
                        row.push(if category == token { 1.0 } else { 0.0 });
                    }
                }
            }
        }
        row.push(record.time_sin);
        row.push(record.time_cos);
        row.push(record.day_of_week as f64);
        row
    }

    pub fn output_width(&self) -> usize {
        self.columns.iter().map(FittedColumn::width).sum::<usize>() + TIME_FEATURES
    }
}

fn fit_column(name: String, tokens: &[&str]) -> FittedColumn {
    let parsed: Vec<Option<f64>> = tokens
        .iter()
        .map(|t| t.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect();

    if parsed.iter().all(Option::is_some) {
        let mean = parsed.iter().flatten().sum::<f64>() / tokens.len().max(1) as f64;
        FittedColumn::Numeric { name, mean }
    } else {
        let mut categories: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        categories.sort();
        categories.dedup();
        FittedColumn::Categorical { name, categories }
    }
}
