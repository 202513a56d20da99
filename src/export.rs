//! CSV export of feature and training tables. Null cells are written empty.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::assemble::{FeatureRow, FeatureTable};
use crate::pipeline::TrainingTable;
use crate::schema::FeatureSchema;
use crate::targets::target_column;

const KEY_COLUMNS: [&str; 4] = ["customer_id", "event", "offer_id", "offer_code"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub fn write_feature_table<W: Write>(writer: W, table: &FeatureTable) -> Result<u64, ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(header(&table.schema, &[]))?;
    for row in &table.rows {
        out.write_record(record(&table.schema, row, &[]))?;
    }
    out.flush()?;
    Ok(table.rows.len() as u64)
}

pub fn write_training_table<W: Write>(
    writer: W,
    table: &TrainingTable,
) -> Result<u64, ExportError> {
    let targets: Vec<String> = table.horizons.iter().map(|h| target_column(*h)).collect();
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(header(&table.schema, &targets))?;
    for example in &table.examples {
        out.write_record(record(&table.schema, &example.features, &example.targets))?;
    }
    out.flush()?;
    Ok(table.examples.len() as u64)
}

pub fn write_training_table_file(path: &Path, table: &TrainingTable) -> Result<u64, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rows = write_training_table(File::create(path)?, table)?;
    info!(
        component = "export",
        event = "export.training_table.written",
        path = %path.display(),
        rows,
        columns = KEY_COLUMNS.len() + table.schema.len() + table.horizons.len()
    );
    Ok(rows)
}

fn header(schema: &FeatureSchema, targets: &[String]) -> Vec<String> {
    KEY_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(schema.names().map(str::to_string))
        .chain(targets.iter().cloned())
        .collect()
}

fn record(schema: &FeatureSchema, row: &FeatureRow, targets: &[Option<f64>]) -> Vec<String> {
    let keys = [
        row.event.customer_id.clone(),
        row.event.kind.as_str().to_string(),
        row.event.offer_id.clone().unwrap_or_default(),
        row.offer
            .as_ref()
            .map(|o| o.code.clone())
            .unwrap_or_default(),
    ];
    keys.into_iter()
        .chain(row.values(schema).into_iter().map(cell))
        .chain(targets.iter().copied().map(cell))
        .collect()
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
