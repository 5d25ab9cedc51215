mod common;

use anyhow::Result;
use awaywatch::config::{Recipient, load_config};
use awaywatch::error::{FetchError, NotificationError};
use awaywatch::fetch::{FileFetcher, PageSource, page_source_from_config};
use awaywatch::notify::{Channel, Dispatcher, SalesPhaseNotice};
use awaywatch::pipeline::{CancelToken, RunContext, RunOptions, run};
use chrono_tz::Europe::London;
use common::{BOURNEMOUTH_URL, BRENTFORD_URL, outbox_messages, run_now, setup_fixture_env};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn first_run_stores_phases_and_notifies() -> Result<()> {
    let env = setup_fixture_env()?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;

    let report = run(&ctx, &RunOptions::new(run_now()))?;

    assert_eq!(report.fixtures_discovered, 2);
    assert_eq!(report.fixtures_created, 2);
    assert_eq!(report.detail_pages_fetched, 2);
    assert_eq!(report.new_phases, 3);
    assert_eq!(report.notifications_sent, 3);
    assert_eq!(report.fixtures_failed, 0);

    let bournemouth = ctx
        .store
        .fixture(BOURNEMOUTH_URL)?
        .expect("bournemouth must be stored");
    assert_eq!(bournemouth.team, "Bournemouth");
    assert_eq!(bournemouth.season, "2025-26");
    let phases = ctx.store.phases(bournemouth.id)?;
    assert_eq!(phases.len(), 2);
    assert!(phases.iter().all(|phase| phase.notified));

    // Brentford's detail page has no table, so the listing hint is used.
    let brentford = ctx
        .store
        .fixture(BRENTFORD_URL)?
        .expect("brentford must be stored");
    let phases = ctx.store.phases(brentford.id)?;
    assert_eq!(phases.len(), 1);
    assert_eq!(phases[0].sales_phase, "Platinum & Gold Members");

    let mail = outbox_messages(&env.outbox_dir.join("mail"))?;
    let sms = outbox_messages(&env.outbox_dir.join("sms"))?;
    assert_eq!(mail.len(), 3);
    assert_eq!(sms.len(), 3);

    let away_scheme = mail
        .iter()
        .find(|message| message.contains("Sales Phase: Away Scheme"))
        .expect("away scheme mail must exist");
    assert!(
        away_scheme.contains("Subject: New Away Ticket Sales Phase: Bournemouth - Away Scheme")
    );
    assert!(away_scheme.contains("Match Date: Sunday, 10 August 2025 - 4:30 PM"));
    assert!(away_scheme.contains("Sales Start: Monday, 28 July 2025 at 9:00"));
    assert!(away_scheme.contains(BOURNEMOUTH_URL));
    assert!(away_scheme.contains("To: Away Member <away@example.com>"));
    Ok(())
}

#[test]
fn second_run_changes_nothing() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;

    run(&RunContext::from_config(&loaded)?, &RunOptions::new(run_now()))?;
    let second = run(&RunContext::from_config(&loaded)?, &RunOptions::new(run_now()))?;

    assert_eq!(second.fixtures_discovered, 2);
    assert_eq!(second.fixtures_created, 0);
    assert_eq!(second.fixtures_updated, 0);
    assert_eq!(second.fixtures_unchanged, 2);
    assert_eq!(second.new_phases, 0);
    assert_eq!(second.phases_updated, 0);
    assert_eq!(second.notifications_sent, 0);
    assert_eq!(second.store_writes, 0);
    Ok(())
}

#[test]
fn force_resends_known_phases() -> Result<()> {
    let env = setup_fixture_env()?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;
    run(&ctx, &RunOptions::new(run_now()))?;

    let forced = run(
        &ctx,
        &RunOptions {
            force_notify: true,
            ..RunOptions::new(run_now())
        },
    )?;

    assert_eq!(forced.new_phases, 0);
    assert_eq!(forced.notifications_sent, 3);
    assert_eq!(forced.store_writes, 0);
    Ok(())
}

#[test]
fn updated_phase_is_not_renotified() -> Result<()> {
    let env = setup_fixture_env()?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;
    run(&ctx, &RunOptions::new(run_now()))?;

    let page = env.pages_dir.join("bournemouth.html");
    let markup = fs::read_to_string(&page)?.replace("9:00 am", "10:00 am");
    fs::write(&page, markup)?;

    let report = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(report.phases_updated, 1);
    assert_eq!(report.new_phases, 0);
    assert_eq!(report.notifications_sent, 0);

    let fixture = ctx.store.fixture(BOURNEMOUTH_URL)?.expect("fixture stored");
    let phase = ctx
        .store
        .phases(fixture.id)?
        .into_iter()
        .find(|phase| phase.sales_phase == "Away Scheme")
        .expect("phase stored");
    assert_eq!(phase.sale_time.as_deref(), Some("10:00"));
    Ok(())
}

#[test]
fn failed_delivery_is_retried_next_run() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;
    let mut ctx = RunContext::from_config(&loaded)?;
    let broken: Vec<Box<dyn Channel>> = vec![Box::new(BrokenChannel)];
    ctx.dispatcher = Dispatcher::new(loaded.config.notify.clone(), London, broken);

    let failed = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(failed.new_phases, 3);
    assert_eq!(failed.notification_failures, 3);
    assert_eq!(failed.notifications_sent, 0);

    let fixture = ctx.store.fixture(BOURNEMOUTH_URL)?.expect("fixture stored");
    assert!(ctx.store.phases(fixture.id)?.iter().all(|phase| !phase.notified));

    let recorded = Arc::new(Mutex::new(Vec::new()));
    let recording: Vec<Box<dyn Channel>> = vec![Box::new(RecordingChannel(recorded.clone()))];
    ctx.dispatcher = Dispatcher::new(loaded.config.notify.clone(), London, recording);

    let retried = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(retried.new_phases, 0);
    assert_eq!(retried.notifications_sent, 3);
    assert_eq!(recorded.lock().unwrap().len(), 3);

    let settled = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(settled.notifications_sent, 0);
    assert_eq!(recorded.lock().unwrap().len(), 3);
    Ok(())
}

#[test]
fn disabled_notifications_mark_without_sending() -> Result<()> {
    let env = setup_fixture_env()?;
    let mut loaded = load_config(&env.config_path)?;
    loaded.config.notify.enabled = false;
    let ctx = RunContext::from_config(&loaded)?;

    let report = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(report.notifications_suppressed, 3);
    assert_eq!(report.notifications_sent, 0);
    assert!(!env.outbox_dir.exists());

    let again = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(again.notifications_suppressed, 0);
    Ok(())
}

#[test]
fn detail_failure_only_skips_that_fixture() -> Result<()> {
    let env = setup_fixture_env()?;
    fs::remove_file(env.pages_dir.join("bournemouth.html"))?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;

    let report = run(&ctx, &RunOptions::new(run_now()))?;

    assert_eq!(report.fixtures_created, 2);
    assert_eq!(report.detail_fetch_failures, 1);
    assert_eq!(report.detail_pages_fetched, 1);
    assert_eq!(report.new_phases, 1);
    assert_eq!(report.notifications_sent, 1);
    Ok(())
}

#[test]
fn failed_detail_fetch_still_seeds_listing_hints() -> Result<()> {
    let env = setup_fixture_env()?;
    fs::remove_file(env.pages_dir.join("brentford.html"))?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;

    let report = run(&ctx, &RunOptions::new(run_now()))?;

    assert_eq!(report.detail_fetch_failures, 1);
    assert_eq!(report.new_phases, 3);
    assert_eq!(report.notifications_sent, 3);

    let brentford = ctx.store.fixture(BRENTFORD_URL)?.expect("fixture stored");
    let phases = ctx.store.phases(brentford.id)?;
    assert_eq!(phases.len(), 1);
    assert_eq!(phases[0].sales_phase, "Platinum & Gold Members");
    assert!(phases[0].notified);
    Ok(())
}

#[test]
fn duplicate_listing_cards_notify_once() -> Result<()> {
    let env = setup_fixture_env()?;
    let listing = env.pages_dir.join("listing.html");
    let markup = fs::read_to_string(&listing)?;
    let start = markup
        .find(r#"<article class="ticket-card ticket-card--away">"#)
        .expect("away card present");
    let end = start + markup[start..].find("</article>").expect("card closes") + "</article>".len();
    let doubled = format!("{}{}", &markup[..end], &markup[start..]);
    fs::write(&listing, doubled)?;

    let mut loaded = load_config(&env.config_path)?;
    loaded.config.politeness.concurrency = 3;
    let mut ctx = RunContext::from_config(&loaded)?;
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let slow: Vec<Box<dyn Channel>> = vec![Box::new(SlowRecordingChannel(recorded.clone()))];
    ctx.dispatcher = Dispatcher::new(loaded.config.notify.clone(), London, slow);

    let report = run(&ctx, &RunOptions::new(run_now()))?;

    assert_eq!(report.fixtures_discovered, 2);
    assert_eq!(report.detail_pages_fetched, 2);
    assert_eq!(report.new_phases, 3);
    assert_eq!(report.notifications_sent, 3);

    let subjects = recorded.lock().unwrap().clone();
    assert_eq!(subjects.len(), 3);
    let away_scheme = subjects
        .iter()
        .filter(|subject| subject.ends_with("Bournemouth - Away Scheme"))
        .count();
    assert_eq!(away_scheme, 1);
    Ok(())
}

#[test]
fn listing_failure_fails_the_run() -> Result<()> {
    let env = setup_fixture_env()?;
    fs::remove_file(env.pages_dir.join("listing.html"))?;
    let ctx = RunContext::from_config(&load_config(&env.config_path)?)?;

    let result = run(&ctx, &RunOptions::new(run_now()));

    assert!(result.is_err());
    assert_eq!(ctx.store.write_count(), 0);
    Ok(())
}

#[test]
fn cancelled_run_skips_unstarted_fixtures() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;
    let mut ctx = RunContext::from_config(&loaded)?;
    let options = RunOptions::new(run_now());
    ctx.source = Box::new(CancelAfterFirstFetch {
        inner: page_source_from_config(&loaded)?,
        cancel: options.cancel.clone(),
    });

    let report = run(&ctx, &options)?;

    assert_eq!(report.fixtures_discovered, 2);
    assert_eq!(report.fixtures_skipped, 2);
    assert_eq!(report.fixtures_created, 0);
    assert_eq!(report.store_writes, 0);
    Ok(())
}

#[test]
fn unmapped_pages_are_reported_per_fixture() -> Result<()> {
    let env = setup_fixture_env()?;
    let loaded = load_config(&env.config_path)?;
    let mut ctx = RunContext::from_config(&loaded)?;
    let mut files = loaded.config.fetch.files.clone();
    files.retain(|url, _| url != BRENTFORD_URL);
    let files = files
        .into_iter()
        .map(|(url, path)| Ok((url, loaded.resolve(&path)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    ctx.source = Box::new(FileFetcher::new(files));

    let report = run(&ctx, &RunOptions::new(run_now()))?;
    assert_eq!(report.detail_fetch_failures, 1);
    // Brentford's listing hint still seeds its phase.
    assert_eq!(report.new_phases, 3);
    Ok(())
}

struct BrokenChannel;

impl Channel for BrokenChannel {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn deliver(
        &self,
        _notice: &SalesPhaseNotice,
        _recipients: &[Recipient],
    ) -> Result<usize, NotificationError> {
        Err(NotificationError::Delivery {
            channel: "mail",
            source: io::Error::other("relay refused"),
        })
    }
}

struct RecordingChannel(Arc<Mutex<Vec<String>>>);

impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn deliver(
        &self,
        notice: &SalesPhaseNotice,
        recipients: &[Recipient],
    ) -> Result<usize, NotificationError> {
        self.0.lock().unwrap().push(notice.subject());
        Ok(recipients.len())
    }
}

struct SlowRecordingChannel(Arc<Mutex<Vec<String>>>);

impl Channel for SlowRecordingChannel {
    fn name(&self) -> &'static str {
        "mail"
    }

    fn deliver(
        &self,
        notice: &SalesPhaseNotice,
        recipients: &[Recipient],
    ) -> Result<usize, NotificationError> {
        std::thread::sleep(Duration::from_millis(100));
        self.0.lock().unwrap().push(notice.subject());
        Ok(recipients.len())
    }
}

struct CancelAfterFirstFetch {
    inner: Box<dyn PageSource>,
    cancel: CancelToken,
}

impl PageSource for CancelAfterFirstFetch {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let body = self.inner.fetch(url);
        self.cancel.cancel();
        body
    }
}
