//! Pipeline driver.
//!
//! Runs the per-record enrichment pipeline across one or all tables:
//! find candidates, build the prompt, synthesize and persist the image,
//! publish it, write the URL back. Each stage can fail its record without
//! touching the rest of the batch; the run report collects every outcome
//! for the final summary.

use anyhow::Result;
use log::{error, info, warn};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{TABLES, TableDescriptor};
use crate::prompt::build_prompt;
use crate::store::RecordStore;

// ────────────────────────────────────────────────────────────────
// Component seams
// ────────────────────────────────────────────────────────────────

/// Produce an image for the prompt and leave it on the local filesystem.
/// `None` covers both provider exhaustion and a failed local save.
pub trait ImageGenerator {
    fn generate_to_file(&self, prompt: &str, filename: &str) -> Option<PathBuf>;
}

/// Push a local file to the remote host, returning the servable URL path.
pub trait Publisher {
    fn upload_file(&self, local_path: &Path, namespace: &str, filename: &str) -> Option<String>;
}

// ────────────────────────────────────────────────────────────────
// Outcomes
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ImageGenerationFailed,
    ServerUploadFailed,
    DbUpdateFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FailureReason::ImageGenerationFailed => "image_generation_failed",
            FailureReason::ServerUploadFailed => "server_upload_failed",
            FailureReason::DbUpdateFailed => "db_update_failed",
        };
        write!(f, "{reason}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TableStats {
    fn absorb(&mut self, other: TableStats) {
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone)]
pub struct SuccessOutcome {
    pub table: &'static str,
    pub record_id: i64,
    pub url_path: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct FailureOutcome {
    pub table: &'static str,
    pub record_id: i64,
    pub reason: FailureReason,
}

/// Everything the run did, for the operator-facing summary.
#[derive(Debug, Default)]
pub struct RunReport {
    pub successes: Vec<SuccessOutcome>,
    pub failures: Vec<FailureOutcome>,
    pub skipped: Vec<(&'static str, usize)>,
}

// ────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────

pub struct Pipeline<G, P> {
    pub store: RecordStore,
    pub imager: G,
    pub publisher: P,
    pub report: RunReport,
}

impl<G: ImageGenerator, P: Publisher> Pipeline<G, P> {
    pub fn new(store: RecordStore, imager: G, publisher: P) -> Self {
        Self {
            store,
            imager,
            publisher,
            report: RunReport::default(),
        }
    }

    /// Process one table end to end. Strictly sequential: each record's
    /// pipeline finishes (or fails) before the next record starts.
    pub fn process_table(
        &mut self,
        descriptor: &TableDescriptor,
        limit: Option<usize>,
        dry_run: bool,
    ) -> Result<TableStats> {
        info!("processing table {}", descriptor.table);

        let candidates = self.store.find_candidates(descriptor)?;
        if candidates.is_empty() {
            info!("no rows with empty image_url in {}", descriptor.table);
            return Ok(TableStats::default());
        }

        let total = candidates.len();
        info!("found {total} rows with empty image_url");

        let selected = limit.map_or(total, |limit| limit.min(total));
        let skipped = total - selected;

        if dry_run {
            println!("--- DRY RUN: {} ---", descriptor.table);
            for (index, record) in candidates[..selected].iter().enumerate() {
                let prompt = build_prompt(descriptor, record);
                println!("[{}/{selected}] row id {}", index + 1, record.id);
                println!("prompt: {prompt}");
            }
            if skipped > 0 {
                println!("{skipped} rows beyond the limit");
            }
            // Dry-run never claims success: everything found counts as
            // skipped.
            return Ok(TableStats {
                success: 0,
                failed: 0,
                skipped: total,
            });
        }

        let mut stats = TableStats {
            skipped,
            ..TableStats::default()
        };

        for (index, record) in candidates[..selected].iter().enumerate() {
            info!(
                "[{}/{selected}] processing {} id {}",
                index + 1,
                descriptor.table,
                record.id
            );

            let prompt = build_prompt(descriptor, record);
            let filename = format!("{}_{}", descriptor.table, record.id);

            let Some(local_path) = self.imager.generate_to_file(&prompt, &filename) else {
                self.fail(&mut stats, descriptor, record.id, FailureReason::ImageGenerationFailed);
                continue;
            };

            let Some(url_path) =
                self.publisher
                    .upload_file(&local_path, descriptor.table, &filename)
            else {
                self.fail(&mut stats, descriptor, record.id, FailureReason::ServerUploadFailed);
                continue;
            };

            if let Err(error) = self
                .store
                .update_image_url(descriptor, record.id, &url_path)
            {
                // The image already exists remotely; the row just does not
                // point at it. Flag it for manual reconciliation.
                error!(
                    "database update failed for {} id {} (remote file {} is orphaned): {error:#}",
                    descriptor.table, record.id, url_path
                );
                self.fail(&mut stats, descriptor, record.id, FailureReason::DbUpdateFailed);
                continue;
            }

            info!("database updated: {url_path}");
            stats.success += 1;
            self.report.successes.push(SuccessOutcome {
                table: descriptor.table,
                record_id: record.id,
                url_path,
                filename,
            });
        }

        if skipped > 0 {
            warn!("{skipped} rows skipped in {} due to limit", descriptor.table);
            self.report.skipped.push((descriptor.table, skipped));
        }

        Ok(stats)
    }

    /// Process every registered table, one table at a time.
    pub fn process_all_tables(
        &mut self,
        limit: Option<usize>,
        dry_run: bool,
    ) -> Result<TableStats> {
        let mut totals = TableStats::default();
        for descriptor in TABLES {
            totals.absorb(self.process_table(descriptor, limit, dry_run)?);
        }
        Ok(totals)
    }

    fn fail(
        &mut self,
        stats: &mut TableStats,
        descriptor: &TableDescriptor,
        record_id: i64,
        reason: FailureReason,
    ) {
        warn!("{} id {record_id}: {reason}", descriptor.table);
        stats.failed += 1;
        self.report.failures.push(FailureOutcome {
            table: descriptor.table,
            record_id,
            reason,
        });
    }

    /// Operator-facing summary: totals plus every success and failure.
    pub fn print_summary(&self, stats: &TableStats, dry_run: bool) {
        println!("==== SUMMARY ====");
        if dry_run {
            println!("mode: dry run (no images generated)");
        } else {
            println!("generated: {}", stats.success);
            println!("failed:    {}", stats.failed);
        }
        if stats.skipped > 0 {
            println!("skipped:   {}", stats.skipped);
        }

        if !dry_run && !self.report.successes.is_empty() {
            println!("--- successful generations ---");
            for outcome in &self.report.successes {
                println!(
                    "  {} - row {}: {}.png",
                    outcome.table, outcome.record_id, outcome.filename
                );
            }
        }

        if !dry_run && !self.report.failures.is_empty() {
            println!("--- failed generations ---");
            for outcome in &self.report.failures {
                println!(
                    "  {} - row {} ({})",
                    outcome.table, outcome.record_id, outcome.reason
                );
            }
        }
    }
}
