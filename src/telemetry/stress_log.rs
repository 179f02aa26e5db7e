//! CSV log of stress states for games that consume it by file.
//!
//! Format: a `Timestamp,State,Stress,Confidence` header followed by one row
//! per published setting, e.g.
//! `2026-03-14 09:26:53,MODERATE,0.512,0.900`.

use crate::core::stress::StressLevel;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const STRESS_LOG_HEADER: &str = "Timestamp,State,Stress,Confidence";
pub const STRESS_LOG_FILE: &str = "stress_log.csv";

/// Append-only writer for the stress log.
#[derive(Debug)]
pub struct StressLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: u64,
}

impl StressLog {
    /// Open (or create) the log, writing the header to new files.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "{STRESS_LOG_HEADER}")?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended by this writer.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn append(
        &mut self,
        at: DateTime<Local>,
        level: StressLevel,
        stress: f64,
        confidence: f64,
    ) -> std::io::Result<()> {
        writeln!(
            self.writer,
            "{},{},{:.3},{:.3}",
            at.format("%Y-%m-%d %H:%M:%S"),
            level,
            stress,
            confidence
        )?;
        self.rows += 1;
        // The game polls this file; flush every row.
        self.writer.flush()
    }
}
