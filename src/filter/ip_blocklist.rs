//! IP blocklist filter plug-in.
//!
//! Grounded on
//! `original_source/stages/filter/plugins/filterPluginDetectBotIP.py`: a
//! process-wide singleton refreshes a remote CSV on a background thread at
//! a configurable interval and rejects requests whose source address
//! appears in the latest snapshot. Lookups never take a lock — they read
//! through an `arc_swap::ArcSwap` pointer, matching the teacher's own use
//! of `arc-swap` for hot-reloaded config snapshots.

use super::FilterPlugin;
use crate::error::PluginError;
use crate::message::HttpMessage;
use arc_swap::ArcSwap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub struct IpBlocklistFilterPlugin {
    snapshot: Arc<ArcSwap<Vec<IpAddr>>>,
}

impl IpBlocklistFilterPlugin {
    /// Spawns the background refresh thread immediately; the first
    /// snapshot is empty until the first successful fetch completes.
    pub fn spawn(source_url: String, refresh_interval: Duration) -> Self {
        let snapshot = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let worker_snapshot = snapshot.clone();
        std::thread::Builder::new()
            .name("ip-blocklist-refresh".into())
            .spawn(move || refresh_loop(source_url, refresh_interval, worker_snapshot))
            .expect("failed to spawn ip-blocklist refresh thread");
        Self { snapshot }
    }

    /// For tests: a fixed, never-refreshed snapshot.
    pub fn with_static_list(addresses: Vec<IpAddr>) -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(addresses)),
        }
    }
}

impl FilterPlugin for IpBlocklistFilterPlugin {
    fn name(&self) -> &str {
        "IP Blocklist Filter Plugin"
    }

    fn filter_request(&self, message: &HttpMessage) -> Result<Option<(String, String)>, PluginError> {
        let Ok(addr) = message.source_address.parse::<IpAddr>() else {
            return Ok(None);
        };
        let blocked = self.snapshot.load();
        if blocked.contains(&addr) {
            Ok(Some((
                format!("Source address {addr} is on the IP blocklist"),
                self.name().to_string(),
            )))
        } else {
            Ok(None)
        }
    }
}

fn refresh_loop(source_url: String, interval: Duration, snapshot: Arc<ArcSwap<Vec<IpAddr>>>) {
    loop {
        match fetch_blocklist(&source_url) {
            Ok(addresses) => {
                tracing::info!(count = addresses.len(), "refreshed IP blocklist");
                snapshot.store(Arc::new(addresses));
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to refresh IP blocklist, keeping previous snapshot");
            }
        }
        std::thread::sleep(interval);
    }
}

fn fetch_blocklist(source_url: &str) -> anyhow::Result<Vec<IpAddr>> {
    let body = reqwest::blocking::get(source_url)?.text()?;
    Ok(parse_feodotracker_csv(&body))
}

/// The feodotracker aggressive CSV is `# comment` lines plus
/// `ip_address,port,...` data rows; only the first column is used.
fn parse_feodotracker_csv(body: &str) -> Vec<IpAddr> {
    body.lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .filter_map(|line| line.split(',').next())
        .filter_map(|field| field.trim().parse().ok())
        .collect()
}
