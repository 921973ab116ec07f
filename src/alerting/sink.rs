//! Default alert observer: stdout always, `alerting/log.log` when enabled.

use super::{Alert, Observer};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Writes `ALERT: <message>. Source: <source>` to stdout and, if logging is
/// enabled, appends the same line with an ISO-8601 timestamp to
/// `alerting/log.log`.
pub struct AlertSink {
    file: Option<Mutex<File>>,
}

impl AlertSink {
    /// `logging_enabled = false` matches `--no-logging`: stdout only.
    pub fn new(logging_enabled: bool) -> anyhow::Result<Self> {
        Self::with_base_dir(logging_enabled, PathBuf::from("."))
    }

    /// Same as [`Self::new`] but rooted at an explicit directory instead of
    /// the process's current working directory — used by tests so they
    /// don't race on `std::env::set_current_dir`.
    pub fn with_base_dir(logging_enabled: bool, base: PathBuf) -> anyhow::Result<Self> {
        let file = if logging_enabled {
            let dir = base.join("alerting");
            fs::create_dir_all(&dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("log.log"))?;
            Some(Mutex::new(file))
        } else {
            None
        };
        Ok(Self { file })
    }
}

impl Observer for AlertSink {
    fn update(&self, alert: &Alert) {
        let line = format!("ALERT: {}. Source: {}", alert.message, alert.source);
        println!("{line}");
        if let Some(file) = &self.file {
            let stamped = format!("{} {line}\n", Utc::now().to_rfc3339());
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(stamped.as_bytes());
            }
        }
    }
}
