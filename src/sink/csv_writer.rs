//! CSV summary sink
//!
//! One file per collection run under `<data_dir>/summaries/`, one row per
//! exchange per tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{SummaryRecord, SummarySink};
use crate::types::SummaryBatch;

pub struct CsvSink {
    path: PathBuf,
    writer: AsyncMutex<csv::Writer<fs::File>>,
}

impl CsvSink {
    pub fn new(data_dir: &str, run_id: Uuid) -> Result<Self> {
        let dir = PathBuf::from(data_dir).join("summaries");
        fs::create_dir_all(&dir).context("Failed to create summaries directory")?;

        let filename = format!(
            "summaries_{}_{}.csv",
            Utc::now().format("%Y-%m-%d"),
            run_id.simple()
        );
        let path = dir.join(filename);
        let writer = Self::create_writer(&path)?;

        Ok(Self {
            path,
            writer: AsyncMutex::new(writer),
        })
    }

    fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
        let needs_header = !path.exists() || fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_batch(&self, batch: &SummaryBatch) -> Result<usize> {
        let records = SummaryRecord::from_batch(batch);
        let mut writer = self.writer.lock().await;
        for record in &records {
            writer.serialize(record).context("Failed to serialize summary row")?;
        }
        writer.flush().context("Failed to flush summaries CSV")?;
        Ok(records.len())
    }
}

#[async_trait]
impl SummarySink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn publish(&self, batch: &SummaryBatch) {
        match self.write_batch(batch).await {
            Ok(rows) => debug!(tick = batch.tick, rows, path = %self.path.display(), "Summaries written"),
            Err(e) => warn!(tick = batch.tick, error = %e, "Failed to write summaries CSV"),
        }
    }
}
