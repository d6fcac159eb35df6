//! Snapshot-guided export: one worker per archive, keys fetched in scan order.

use crate::cancel::CancelToken;
use crate::errlog::ErrorLog;
use crate::error::{ExportError, Result};
use crate::layout::{ArchiveId, OutputDir};
use crate::remote::{FetchError, Record, RecordFetcher};
use crate::scan::{Key, scan_archive};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MAX_THREADS: usize = 32;

#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Root of `<game>/<table>/<db>/<key>.tson`.
    pub out_root: PathBuf,
    pub error_log: PathBuf,
    /// Worker threads; 0 means one per archive.
    pub threads: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            out_root: PathBuf::from("exports"),
            error_log: PathBuf::from("exports").join("errors.log"),
            threads: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub archive: String,
    pub processed: u64,
    pub total: u64,
    pub current: Key,
}

/// Owned by exactly one archive worker.
#[derive(Clone, Debug)]
pub struct ProgressState {
    label: String,
    processed: u64,
    total: u64,
}

impl ProgressState {
    pub fn new(label: String, total: usize) -> Self {
        Self {
            label,
            processed: 0,
            total: total as u64,
        }
    }

    pub fn advance(&mut self, key: &str) -> ProgressEvent {
        self.processed += 1;
        ProgressEvent {
            archive: self.label.clone(),
            processed: self.processed,
            total: self.total,
            current: key.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub label: String,
    pub total: u64,
    pub written: u64,
    /// Already on disk (earlier run or a duplicate key in this one).
    pub resumed: u64,
    pub absent: u64,
    pub failed: u64,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct ArchiveOutcome {
    pub archive: PathBuf,
    pub result: Result<ArchiveReport>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ArchiveOutcome>,
}

impl RunSummary {
    /// Failed keys plus archives that could not be processed at all.
    pub fn error_count(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(r) => r.failed,
                Err(ExportError::Cancelled) => 0,
                Err(_) => 1,
            })
            .sum()
    }

    pub fn written(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|r| r.written)
            .sum()
    }
}

/// Every `*.zip` directly inside `dir`, sorted by name.
pub fn discover_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExportError::Config(format!(
            "archive directory not found: {}",
            dir.display()
        )));
    }
    let mut out = Vec::new();
    for e in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let e = e.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let is_zip = e
            .path()
            .extension()
            .is_some_and(|x| x.eq_ignore_ascii_case("zip"));
        if e.file_type().is_file() && is_zip {
            out.push(e.into_path());
        }
    }
    Ok(out)
}

pub fn canonical_bytes(record: &Record) -> Result<Vec<u8>> {
    // serde_json maps are ordered, so the output is stable per record
    serde_json::to_vec_pretty(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

pub struct ExportPipeline {
    fetcher: Arc<dyn RecordFetcher>,
    opts: ExportOptions,
    errors: ErrorLog,
    cancel: CancelToken,
    progress: Option<Sender<ProgressEvent>>,
}

impl ExportPipeline {
    pub fn new(
        fetcher: Arc<dyn RecordFetcher>,
        opts: ExportOptions,
        cancel: CancelToken,
    ) -> Result<Self> {
        let errors = ErrorLog::open(&opts.error_log)?;
        Ok(Self {
            fetcher,
            opts,
            errors,
            cancel,
            progress: None,
        })
    }

    pub fn with_progress(mut self, tx: Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Export every archive concurrently; returns once all workers finished.
    pub fn run(&self, archives: &[PathBuf]) -> Result<RunSummary> {
        if archives.is_empty() {
            return Ok(RunSummary::default());
        }
        let threads = match self.opts.threads {
            0 => archives.len().min(MAX_THREADS),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("bdx-export-{i}"))
            .build()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        info!(archives = archives.len(), threads, "export run started");

        let outcomes = pool.install(|| {
            archives
                .par_iter()
                .map(|p| ArchiveOutcome {
                    archive: p.clone(),
                    result: self.export_archive(p),
                })
                .collect::<Vec<_>>()
        });
        Ok(RunSummary { outcomes })
    }

    /// One archive, start to finish. Archive-level failures are also written
    /// to the error log; per-key failures never surface here.
    pub fn export_archive(&self, path: &Path) -> Result<ArchiveReport> {
        let res = self.export_archive_inner(path);
        if let Err(e) = &res {
            if !matches!(e, ExportError::Cancelled) {
                warn!(archive = %path.display(), error = %e, "archive skipped");
                let tag = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                self.record_failure(&tag, &e.to_string());
            }
        }
        res
    }

    fn export_archive_inner(&self, path: &Path) -> Result<ArchiveReport> {
        if self.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let id = ArchiveId::from_path(path)?;
        let out = OutputDir::create(&self.opts.out_root, &id)?;
        let keys = scan_archive(path)?;
        let mut done = out.existing_keys()?;

        let mut progress = ProgressState::new(id.label(), keys.len());
        let mut report = ArchiveReport {
            label: id.label(),
            total: keys.len() as u64,
            ..Default::default()
        };
        info!(archive = %report.label, keys = keys.len(), on_disk = done.len(), "archive started");

        for key in &keys {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.export_key(&id, &out, key, &mut done, &mut report);
            self.publish(progress.advance(key));
        }

        info!(
            archive = %report.label,
            written = report.written,
            resumed = report.resumed,
            absent = report.absent,
            failed = report.failed,
            "archive finished"
        );
        Ok(report)
    }

    fn export_key(
        &self,
        id: &ArchiveId,
        out: &OutputDir,
        key: &str,
        done: &mut HashSet<String>,
        report: &mut ArchiveReport,
    ) {
        if done.contains(key) {
            report.resumed += 1;
            return;
        }
        let tag = format!("{}:{}", id.table, key);
        // refuse keys that cannot be file names before spending a fetch on them
        if let Err(e) = out.record_path(key) {
            self.record_failure(&tag, &e.to_string());
            report.failed += 1;
            return;
        }

        match self.fetcher.fetch(&id.table, key) {
            Err(FetchError::NotFound) => {
                debug!(table = %id.table, key, "not in store any more");
                done.insert(key.to_string());
                report.absent += 1;
            }
            Err(FetchError::Transient(msg)) => {
                warn!(table = %id.table, key, error = %msg, "fetch failed");
                self.record_failure(&tag, &msg);
                report.failed += 1;
            }
            Ok(record) => match canonical_bytes(&record).and_then(|b| out.write_record(key, &b)) {
                Ok(_) => {
                    done.insert(key.to_string());
                    report.written += 1;
                }
                Err(e) => {
                    warn!(table = %id.table, key, error = %e, "write failed");
                    self.record_failure(&tag, &e.to_string());
                    report.failed += 1;
                }
            },
        }
    }

    fn record_failure(&self, source: &str, message: &str) {
        if let Err(e) = self.errors.append(source, message) {
            warn!(source, error = %e, "could not append to error log");
        }
    }

    fn publish(&self, ev: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // a gone receiver only means nobody renders progress
            let _ = tx.send(ev);
        }
    }
}
