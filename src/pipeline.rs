use crate::config::{AppConfig, LoadedConfig};
use crate::error::{FetchError, ParseError, StoreError};
use crate::fetch::{PageSource, page_source_from_config};
use crate::listing::{ListingContext, ListingPage};
use crate::model::{CandidateFixture, Fixture, PhaseFields, RunReport};
use crate::notify::{Dispatcher, NotifiedOutcome};
use crate::phases::{extract_phases, phases_from_hints};
use crate::store::{JsonStore, Store};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything a run talks to. Built once per run from config, or by hand in
/// tests.
pub struct RunContext {
    pub config: AppConfig,
    pub source: Box<dyn PageSource>,
    pub store: Box<dyn Store>,
    pub dispatcher: Dispatcher,
}

impl RunContext {
    pub fn from_config(loaded: &LoadedConfig) -> Result<Self> {
        let state_path = loaded.resolve(&loaded.config.store.state_path)?;
        let store = JsonStore::open(&state_path)
            .with_context(|| format!("failed to open state {}", state_path.display()))?;
        Ok(Self {
            config: loaded.config.clone(),
            source: page_source_from_config(loaded)?,
            store: Box::new(store),
            dispatcher: Dispatcher::from_config(loaded)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Send notices for phases that were already notified.
    pub force_notify: bool,
    pub now: DateTime<Utc>,
    pub cancel: CancelToken,
}

impl RunOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            force_notify: false,
            now,
            cancel: CancelToken::default(),
        }
    }
}

/// Shared stop flag. Fixtures not yet started when it trips are skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spaces outbound requests at least `min_interval` apart across all workers.
#[derive(Debug)]
pub struct RequestGate {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Blocks until the caller's reserved slot comes up.
    pub fn wait(&self) {
        let delay = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot - now
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStage {
    FetchListing,
    ExtractFixtures,
    ProcessFixtures,
    Done,
}

/// Stop conditions shared by every worker.
#[derive(Debug, Clone)]
struct RunGuard {
    deadline: Instant,
    cancel: CancelToken,
}

impl RunGuard {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixtureStatus {
    Created,
    Updated,
    Unchanged,
}

/// What processing one fixture amounted to. Folded into a [`RunReport`].
#[derive(Debug, Clone, Default)]
struct FixtureOutcome {
    status: Option<FixtureStatus>,
    skipped: bool,
    failed: bool,
    detail_fetched: bool,
    detail_failed: bool,
    phases_seen: usize,
    new_phases: usize,
    phases_updated: usize,
    sent: usize,
    suppressed: usize,
    notify_failed: usize,
}

impl FixtureOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    fn fold_into(&self, report: &mut RunReport) {
        match self.status {
            Some(FixtureStatus::Created) => report.fixtures_created += 1,
            Some(FixtureStatus::Updated) => report.fixtures_updated += 1,
            Some(FixtureStatus::Unchanged) => report.fixtures_unchanged += 1,
            None => {}
        }
        report.fixtures_skipped += usize::from(self.skipped);
        report.fixtures_failed += usize::from(self.failed);
        report.detail_pages_fetched += usize::from(self.detail_fetched);
        report.detail_fetch_failures += usize::from(self.detail_failed);
        report.phases_seen += self.phases_seen;
        report.new_phases += self.new_phases;
        report.phases_updated += self.phases_updated;
        report.notifications_sent += self.sent;
        report.notifications_suppressed += self.suppressed;
        report.notification_failures += self.notify_failed;
    }
}

/// One scrape: listing, then every away fixture's detail page on a small
/// worker pool, reconciling with the store and notifying on new phases.
///
/// Only a listing failure fails the run. Anything going wrong with a single
/// fixture is logged, counted and does not affect the others.
pub fn run(ctx: &RunContext, options: &RunOptions) -> Result<RunReport> {
    let config = &ctx.config;
    let tz = config.site.timezone()?;
    let guard = RunGuard {
        deadline: Instant::now() + Duration::from_secs(config.politeness.run_deadline_secs),
        cancel: options.cancel.clone(),
    };
    let gate = RequestGate::new(Duration::from_millis(config.politeness.min_delay_ms));
    let writes_before = ctx.store.write_count();

    let listing_url = config.listing_url()?;
    debug!(stage = ?RunStage::FetchListing, url = %listing_url, "run stage");
    let markup = fetch_with_retries(ctx.source.as_ref(), &gate, &guard, config, &listing_url)
        .with_context(|| format!("listing fetch failed for {listing_url}"))?;

    debug!(stage = ?RunStage::ExtractFixtures, url = %listing_url, "run stage");
    let candidates = {
        let page = ListingPage::parse(&markup);
        if page.card_count() == 0 {
            warn!(url = %listing_url, error = %ParseError::NoFixtureCards, "listing yielded nothing");
        }
        let listing_ctx = ListingContext {
            base_url: config.site.base_url.clone(),
            now: options.now,
            tz,
        };
        let mut seen = HashSet::new();
        page.fixtures(&listing_ctx)
            .filter(|candidate| {
                let first = seen.insert(candidate.ticket_url.clone());
                if !first {
                    debug!(url = %candidate.ticket_url, "duplicate listing card ignored");
                }
                first
            })
            .collect::<Vec<_>>()
    };
    info!(url = %listing_url, fixtures = candidates.len(), "away fixtures discovered");

    let mut report = RunReport {
        fixtures_discovered: candidates.len(),
        ..RunReport::default()
    };

    debug!(stage = ?RunStage::ProcessFixtures, fixtures = candidates.len(), "run stage");
    let today = options.now.with_timezone(&tz).date_naive();
    let workers = config.politeness.concurrency.clamp(1, candidates.len().max(1));
    let queue = Mutex::new(VecDeque::from(candidates));
    let worker = Worker {
        ctx,
        options,
        gate: &gate,
        guard: &guard,
        today,
    };

    let outcomes = std::thread::scope(|scope| {
        let handles = (0..workers)
            .map(|_| scope.spawn(|| worker.drain(&queue)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow!("fixture worker panicked"))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    for outcome in outcomes.iter().flatten() {
        outcome.fold_into(&mut report);
    }
    report.store_writes = ctx.store.write_count().saturating_sub(writes_before);

    debug!(stage = ?RunStage::Done, "run stage");
    info!(
        fixtures = report.fixtures_discovered,
        created = report.fixtures_created,
        updated = report.fixtures_updated,
        failed = report.fixtures_failed,
        skipped = report.fixtures_skipped,
        new_phases = report.new_phases,
        notified = report.notifications_sent,
        notify_failures = report.notification_failures,
        writes = report.store_writes,
        "run summary"
    );
    Ok(report)
}

struct Worker<'a> {
    ctx: &'a RunContext,
    options: &'a RunOptions,
    gate: &'a RequestGate,
    guard: &'a RunGuard,
    today: NaiveDate,
}

impl Worker<'_> {
    fn drain(&self, queue: &Mutex<VecDeque<CandidateFixture>>) -> Vec<FixtureOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(candidate) = next else {
                break;
            };

            if self.guard.should_stop() {
                warn!(url = %candidate.ticket_url, "run deadline reached or cancelled; skipping fixture");
                outcomes.push(FixtureOutcome::skipped());
                continue;
            }
            outcomes.push(self.process(candidate));
        }
        outcomes
    }

    fn process(&self, candidate: CandidateFixture) -> FixtureOutcome {
        let ctx = self.ctx;
        let now = self.options.now;
        let mut outcome = FixtureOutcome::default();

        let upsert = match ctx.store.upsert_fixture(candidate.fields(), now) {
            Ok(upsert) => upsert,
            Err(err) => {
                error!(url = %candidate.ticket_url, error = %err, "failed to store fixture");
                outcome.failed = true;
                return outcome;
            }
        };
        outcome.status = Some(match (upsert.created, upsert.changed) {
            (true, _) => {
                info!(team = %upsert.fixture.team, url = %upsert.fixture.ticket_url, "new away fixture");
                FixtureStatus::Created
            }
            (false, true) => {
                info!(team = %upsert.fixture.team, url = %upsert.fixture.ticket_url, "away fixture updated");
                FixtureStatus::Updated
            }
            (false, false) => FixtureStatus::Unchanged,
        });
        let fixture = upsert.fixture;

        let markup = match fetch_with_retries(
            ctx.source.as_ref(),
            self.gate,
            self.guard,
            &ctx.config,
            &fixture.ticket_url,
        ) {
            Ok(markup) => {
                outcome.detail_fetched = true;
                Some(markup)
            }
            Err(err) => {
                warn!(url = %fixture.ticket_url, error = %err, "detail fetch failed");
                outcome.detail_failed = true;
                None
            }
        };

        let mut phases = markup
            .map(|markup| extract_phases(&markup, self.today).phases)
            .unwrap_or_default();
        if phases.is_empty() && !candidate.phase_hints.is_empty() {
            info!(
                url = %fixture.ticket_url,
                hints = candidate.phase_hints.len(),
                "no phases from detail page; using listing hints"
            );
            phases = phases_from_hints(&candidate.phase_hints, self.today);
        }
        outcome.phases_seen = phases.len();

        for phase in phases {
            if let Err(err) = self.reconcile_phase(&fixture, phase.fields(), &mut outcome) {
                error!(
                    url = %fixture.ticket_url,
                    phase = %phase.name,
                    error = %err,
                    "failed to store sales phase"
                );
                outcome.failed = true;
                break;
            }
        }
        outcome
    }

    fn reconcile_phase(
        &self,
        fixture: &Fixture,
        fields: PhaseFields,
        outcome: &mut FixtureOutcome,
    ) -> Result<(), StoreError> {
        let now = self.options.now;
        let upsert = self.ctx.store.upsert_phase(fixture.id, fields, now)?;
        if upsert.is_new {
            info!(
                team = %fixture.team,
                phase = %upsert.phase.sales_phase,
                "new sales phase"
            );
            outcome.new_phases += 1;
        } else if upsert.changed {
            outcome.phases_updated += 1;
        }

        match self.ctx.dispatcher.maybe_notify(
            self.ctx.store.as_ref(),
            fixture,
            &upsert,
            self.options.force_notify,
            now,
        )? {
            NotifiedOutcome::Sent => outcome.sent += 1,
            NotifiedOutcome::Suppressed => outcome.suppressed += 1,
            NotifiedOutcome::Failed => outcome.notify_failed += 1,
            NotifiedOutcome::Skipped => {}
        }
        Ok(())
    }
}

/// Fetches through the gate, retrying transient failures with a fixed backoff.
/// `fetch.retry_attempts` counts every attempt, the first one included.
fn fetch_with_retries(
    source: &dyn PageSource,
    gate: &RequestGate,
    guard: &RunGuard,
    config: &AppConfig,
    url: &str,
) -> Result<String, FetchError> {
    let attempts = config.fetch.retry_attempts.max(1);
    let backoff = Duration::from_millis(config.fetch.retry_backoff_ms);

    for attempt in 1..=attempts {
        if guard.should_stop() {
            return Err(FetchError::Aborted {
                url: url.to_string(),
            });
        }
        gate.wait();

        match source.fetch(url) {
            Ok(body) => return Ok(body),
            Err(err) if attempt < attempts && err.is_retryable() => {
                warn!(%url, attempt, error = %err, "request failed; retrying");
                std::thread::sleep(backoff);
            }
            Err(err) => return Err(err),
        }
    }

    Err(FetchError::Aborted {
        url: url.to_string(),
    })
}
