mod common;

use anyhow::Result;
use awaywatch::config::load_config;
use awaywatch::harness::{HarnessOptions, run_harness};
use awaywatch::notify::SalesPhaseNotice;
use awaywatch::pipeline::{RunContext, RunOptions, run};
use chrono_tz::Europe::London;
use common::{BOURNEMOUTH_URL, run_now, setup_fixture_env};
use std::fs;

#[test]
fn harness_reports_stability_metrics() -> Result<()> {
    let env = setup_fixture_env()?;

    let report = run_harness(&HarnessOptions {
        config_path: env.config_path.clone(),
        now: run_now(),
    })?;

    assert_eq!(report.first_run_fixtures, 2);
    assert_eq!(report.first_run_created, 2);
    assert_eq!(report.first_run_new_phases, 3);
    assert_eq!(report.first_run_notifications, 3);
    assert_eq!(report.second_run_created, 0);
    assert_eq!(report.second_run_updated, 0);
    assert_eq!(report.second_run_new_phases, 0);
    assert_eq!(report.second_run_phases_updated, 0);
    assert_eq!(report.second_run_notifications, 0);
    assert_eq!(report.second_run_store_writes, 0);
    assert_eq!(report.total_fixtures, 2);
    assert_eq!(report.total_phases, 3);
    // One mail and one sms per phase for the single recipient.
    assert_eq!(report.outbox_files, 6);

    Ok(())
}

#[test]
fn harness_starts_from_a_clean_slate() -> Result<()> {
    let env = setup_fixture_env()?;
    let options = HarnessOptions {
        config_path: env.config_path.clone(),
        now: run_now(),
    };

    run_harness(&options)?;
    fs::write(env.outbox_dir.join("stale.txt"), "left over")?;
    let report = run_harness(&options)?;

    assert_eq!(report.first_run_created, 2);
    assert_eq!(report.outbox_files, 6);
    Ok(())
}

#[test]
fn sms_text_carries_the_essentials() -> Result<()> {
    let env = setup_fixture_env()?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;
    run(&ctx, &RunOptions::new(run_now()))?;

    let fixture = ctx.store.fixture(BOURNEMOUTH_URL)?.expect("fixture stored");
    let phase = ctx
        .store
        .phases(fixture.id)?
        .into_iter()
        .find(|phase| phase.sales_phase == "Members Phase 1")
        .expect("phase stored");

    let notice = SalesPhaseNotice::new(&fixture, &phase, London);
    let text = notice.sms_text();
    assert!(text.starts_with("New Away Ticket Sales Phase: Bournemouth - Members Phase 1"));
    assert!(text.contains("Sales Start: Wednesday, 30 July 2025 at 14:30"));
    assert!(text.contains("Who Can Buy: Platinum & Gold Members"));
    assert!(text.contains("Points Required: 5"));
    assert!(text.ends_with("Hurry, away tickets sell out quickly!"));
    Ok(())
}
