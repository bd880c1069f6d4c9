//! Audit log and match report.
//!
//! Every order event is appended to the audit log as one timestamped line
//! and flushed straight away. When enabled, each trade also goes to a
//! separate match report. The writer runs on its own thread so file I/O
//! never happens on the engine thread.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use chrono::Local;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::command::OutputEvent;
use crate::config::Config;

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write audit line: {0}")]
    Write(#[from] std::io::Error),
}

pub struct AuditLog {
    log: File,
    match_report: Option<File>,
}

impl AuditLog {
    /// Open the files named in `config`, creating the log directory.
    pub fn open(config: &Config) -> Result<Self, AuditError> {
        fs::create_dir_all(&config.log_dir).map_err(|source| AuditError::Open {
            path: config.log_dir.clone(),
            source,
        })?;
        let match_report = config.match_report.then(|| config.match_report_path());
        Self::open_paths(&config.log_path(), match_report.as_deref())
    }

    /// Open (append) the audit log and, if given, the match report.
    pub fn open_paths(log: &Path, match_report: Option<&Path>) -> Result<Self, AuditError> {
        Ok(Self {
            log: append(log)?,
            match_report: match_report.map(append).transpose()?,
        })
    }

    /// Append `<timestamp>:<line>`.
    pub fn write(&mut self, line: &str) -> Result<(), AuditError> {
        writeln!(self.log, "{}:{}", timestamp(), line)?;
        self.log.flush()?;
        Ok(())
    }

    /// Append `<timestamp>,<line>` to the match report, if enabled.
    pub fn write_match(&mut self, line: &str) -> Result<(), AuditError> {
        if let Some(report) = self.match_report.as_mut() {
            writeln!(report, "{},{}", timestamp(), line)?;
            report.flush()?;
        }
        Ok(())
    }

    /// Log one engine event. Market data events are not audited.
    pub fn record(&mut self, event: &OutputEvent) -> Result<(), AuditError> {
        if let Some(line) = event.audit_line() {
            self.write(&line)?;
        }
        if let OutputEvent::Trade(trade) = event {
            self.write_match(&trade.details())?;
        }
        Ok(())
    }
}

/// Drain `events` into `log` on a dedicated thread until every sender is gone.
pub fn spawn_writer(
    mut log: AuditLog,
    mut events: UnboundedReceiver<OutputEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("audit-writer".into())
        .spawn(move || {
            while let Some(event) = events.blocking_recv() {
                if let Err(e) = log.record(&event) {
                    warn!(error = %e, "audit write failed");
                }
            }
            info!("audit writer stopped");
        })
}

fn append(path: &Path) -> Result<File, AuditError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AuditError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}
