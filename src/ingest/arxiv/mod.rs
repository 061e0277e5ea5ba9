#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::config::IngestConfig;

const PROGRESS_INTERVAL: u64 = 100_000;

/// One line of the arXiv metadata snapshot. Fields we do not store are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArxivRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub categories: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub update_date: Option<String>,
}

impl ArxivRecord {
    #[inline]
    pub fn parsed_update_date(&self) -> Option<NaiveDate> {
        self.update_date
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok())
    }

    #[inline]
    pub fn word_count(&self) -> usize {
        self.abstract_text.split_whitespace().count()
    }
}

/// Category and revision-date window applied while streaming the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFilter {
    category_prefix: String,
    date_from: NaiveDate,
    date_to: NaiveDate,
}

impl SnapshotFilter {
    #[inline]
    pub fn new(category_prefix: &str, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            category_prefix: category_prefix.to_lowercase(),
            date_from,
            date_to,
        }
    }

    #[inline]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(&config.category_prefix, config.date_from, config.date_to)
    }

    /// Category match is a case-insensitive substring test; the date window is inclusive
    #[inline]
    pub fn matches(&self, record: &ArxivRecord) -> bool {
        if !record
            .categories
            .to_lowercase()
            .contains(&self.category_prefix)
        {
            return false;
        }

        record
            .parsed_update_date()
            .is_some_and(|date| date >= self.date_from && date <= self.date_to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub lines: u64,
    pub kept: u64,
    pub malformed: u64,
}

/// Stream a snapshot file and keep the records passing `filter`
#[inline]
pub fn collect_snapshot(
    path: &Path,
    filter: &SnapshotFilter,
) -> Result<(Vec<ArxivRecord>, SnapshotSummary)> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open arXiv snapshot: {}", path.display()))?;

    info!("Reading arXiv snapshot from {}", path.display());
    collect_from_reader(BufReader::new(file), filter)
}

#[inline]
pub fn collect_from_reader<R: BufRead>(
    reader: R,
    filter: &SnapshotFilter,
) -> Result<(Vec<ArxivRecord>, SnapshotSummary)> {
    let mut records = Vec::new();
    let mut summary = SnapshotSummary::default();

    for line in reader.lines() {
        let line = line.context("Failed to read line from arXiv snapshot")?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        match serde_json::from_str::<ArxivRecord>(&line) {
            Ok(record) => {
                if filter.matches(&record) {
                    records.push(record);
                }
            }
            Err(e) => {
                summary.malformed += 1;
                debug!("Skipping malformed snapshot line {}: {}", summary.lines, e);
            }
        }

        if summary.lines % PROGRESS_INTERVAL == 0 {
            info!(
                "Processed {} papers... found {} matching so far",
                summary.lines,
                records.len()
            );
        }
    }

    summary.kept = records.len() as u64;
    info!(
        "Finished reading {} papers: {} matched, {} malformed",
        summary.lines, summary.kept, summary.malformed
    );

    Ok((records, summary))
}
