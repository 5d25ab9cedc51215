use crate::config::load_config;
use crate::pipeline::{RunContext, RunOptions, run};
use crate::store::load_state;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub config_path: PathBuf,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub first_run_fixtures: usize,
    pub first_run_created: usize,
    pub first_run_new_phases: usize,
    pub first_run_notifications: usize,
    pub second_run_created: usize,
    pub second_run_updated: usize,
    pub second_run_new_phases: usize,
    pub second_run_phases_updated: usize,
    pub second_run_notifications: usize,
    pub second_run_store_writes: u64,
    pub total_fixtures: usize,
    pub total_phases: usize,
    pub outbox_files: usize,
}

/// Runs the scrape twice against a wiped state file and outbox. A healthy
/// setup creates everything on the first pass and writes nothing on the second.
pub fn run_harness(options: &HarnessOptions) -> Result<HarnessReport> {
    let loaded = load_config(&options.config_path)?;
    let state_path = loaded.resolve(&loaded.config.store.state_path)?;
    let outbox_dir = loaded.resolve(&loaded.config.notify.outbox_dir)?;

    if outbox_dir.exists() {
        std::fs::remove_dir_all(&outbox_dir)?;
    }
    if state_path.exists() {
        std::fs::remove_file(&state_path)?;
    }

    // A fresh context per pass so the second run reloads state from disk.
    let first = run(&RunContext::from_config(&loaded)?, &RunOptions::new(options.now))?;
    let second = run(&RunContext::from_config(&loaded)?, &RunOptions::new(options.now))?;

    let state = load_state(&state_path)?;

    let mut outbox_files = 0usize;
    if outbox_dir.exists() {
        for entry in WalkDir::new(&outbox_dir) {
            if entry?.file_type().is_file() {
                outbox_files += 1;
            }
        }
    }

    let report = HarnessReport {
        first_run_fixtures: first.fixtures_discovered,
        first_run_created: first.fixtures_created,
        first_run_new_phases: first.new_phases,
        first_run_notifications: first.notifications_sent,
        second_run_created: second.fixtures_created,
        second_run_updated: second.fixtures_updated,
        second_run_new_phases: second.new_phases,
        second_run_phases_updated: second.phases_updated,
        second_run_notifications: second.notifications_sent,
        second_run_store_writes: second.store_writes,
        total_fixtures: state.fixtures.len(),
        total_phases: state.phases.values().map(|phases| phases.len()).sum(),
        outbox_files,
    };
    info!(
        second_run_writes = report.second_run_store_writes,
        outbox_files = report.outbox_files,
        "harness complete"
    );
    Ok(report)
}
