//! Run report: recoverable problems accumulated during a crawl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Examples kept per diagnostic category
pub const MAX_EXAMPLES: usize = 10;

/// Count plus a bounded list of example messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLog {
    pub count: usize,
    pub examples: Vec<String>,
}

impl DiagnosticLog {
    pub fn record(&mut self, message: impl Into<String>) {
        self.count += 1;
        if self.examples.len() < MAX_EXAMPLES {
            self.examples.push(message.into());
        }
    }

    pub fn absorb(&mut self, other: DiagnosticLog) {
        self.count += other.count;
        for example in other.examples {
            if self.examples.len() >= MAX_EXAMPLES {
                break;
            }
            self.examples.push(example);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Summary of one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// True when the persisted index was loaded instead of crawling
    pub from_cache: bool,
    pub files_found: usize,
    pub files_classified: usize,
    pub series: usize,
    pub entries: usize,
    pub instances: usize,
    pub resolved_references: usize,
    /// Unreadable files and worker failures
    pub unreadable_files: DiagnosticLog,
    /// Files missing SeriesInstanceUID, Modality or SOPInstanceUID
    pub missing_fields: DiagnosticLog,
    /// Scalar disagreements between files of one series
    pub field_conflicts: DiagnosticLog,
    /// Reference lists that resolved to several series
    pub ambiguous_references: DiagnosticLog,
    /// References that resolved to nothing
    pub unresolved_references: DiagnosticLog,
}

impl CrawlReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            from_cache: false,
            files_found: 0,
            files_classified: 0,
            series: 0,
            entries: 0,
            instances: 0,
            resolved_references: 0,
            unreadable_files: DiagnosticLog::default(),
            missing_fields: DiagnosticLog::default(),
            field_conflicts: DiagnosticLog::default(),
            ambiguous_references: DiagnosticLog::default(),
            unresolved_references: DiagnosticLog::default(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Files excluded from the index
    pub fn files_failed(&self) -> usize {
        self.unreadable_files.count + self.missing_fields.count
    }
}

impl Default for CrawlReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CrawlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_cache {
            writeln!(f, "Loaded cached index")?;
        } else {
            writeln!(
                f,
                "Files: {} found, {} classified, {} failed",
                self.files_found,
                self.files_classified,
                self.files_failed()
            )?;
        }
        writeln!(
            f,
            "Index: {} series, {} entries, {} instances, {} references resolved",
            self.series, self.entries, self.instances, self.resolved_references
        )?;

        let sections = [
            ("Unreadable files", &self.unreadable_files),
            ("Missing identity fields", &self.missing_fields),
            ("Field conflicts", &self.field_conflicts),
            ("Ambiguous references", &self.ambiguous_references),
            ("Unresolved references", &self.unresolved_references),
        ];
        for (title, log) in sections {
            if log.is_empty() {
                continue;
            }
            writeln!(f, "{}: {}", title, log.count)?;
            for example in &log.examples {
                writeln!(f, "  - {}", example)?;
            }
        }
        Ok(())
    }
}
