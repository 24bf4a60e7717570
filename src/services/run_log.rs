//! Append-only protocol log.
//!
//! Every milestone of a reboot attempt is written to a plain text file with a
//! timestamp prefix, so a failed attempt can be diagnosed after the fact
//! without turning up the process log level.

use chrono::{SecondsFormat, Utc};
use log::{error, info};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct RunLog {
    path: Option<PathBuf>,
}

impl RunLog {
    /// Log appending to `path`; the parent directory is created on demand
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Log that only mirrors lines to the process log
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a timestamped line, logging errors instead of propagating them.
    ///
    /// The append is synchronous so lines keep their order even when written
    /// under the orchestrator's locks. Each call is one small `O_APPEND` write.
    pub fn write(&self, line: &str) {
        info!("{line}");

        if let Err(e) = self.append(line) {
            error!("failed to write run log: {e}");
        }
    }

    /// View of this log prefixing every line with an attempt id
    pub fn attempt(&self, id: impl Into<String>) -> AttemptLog {
        AttemptLog {
            run_log: self.clone(),
            id: id.into(),
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{stamp} {line}")
    }
}

#[derive(Clone, Debug)]
pub struct AttemptLog {
    run_log: RunLog,
    id: String,
}

impl AttemptLog {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn write(&self, line: &str) {
        self.run_log.write(&format!("[{}] {line}", self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_timestamped_lines() {
        let dir = TempDir::new().expect("failed to create temp directory");
        let log = RunLog::new(dir.path().join("logs").join("run.log"));

        log.write("START (debug=false)");
        log.write("loginKey=123");

        let contents = fs::read_to_string(log.path().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" START (debug=false)"));
        assert!(lines[1].ends_with(" loginKey=123"));

        let stamp = lines[0].split(' ').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn attempt_lines_carry_id() {
        let dir = TempDir::new().expect("failed to create temp directory");
        let log = RunLog::new(dir.path().join("run.log"));

        log.attempt("1a2b3c4d").write("ROUTER_DOWN at i=2");

        let contents = fs::read_to_string(log.path().unwrap()).unwrap();
        assert!(contents.trim_end().ends_with(" [1a2b3c4d] ROUTER_DOWN at i=2"));
    }

    #[test]
    fn disabled_log_has_no_file() {
        let log = RunLog::disabled();
        log.write("ignored");
        assert!(log.path().is_none());
    }
}
