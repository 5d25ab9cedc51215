use crate::config::{LoadedConfig, NotifyConfig, Recipient};
use crate::error::{NotificationError, StoreError};
use crate::model::{Fixture, TicketSalesPhase};
use crate::store::{PhaseUpsert, Store};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifiedOutcome {
    /// Delivered on every channel and marked notified.
    Sent,
    /// Notifications are switched off; the phase is marked without sending.
    Suppressed,
    /// Nothing to do for this phase.
    Skipped,
    /// At least one channel failed; the phase stays unnotified for the next run.
    Failed,
}

/// Everything a subscriber is told about a newly released sales phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesPhaseNotice {
    pub fixture_id: u64,
    pub team: String,
    pub sales_phase: String,
    pub match_date: DateTime<Tz>,
    pub who_can_buy: Option<String>,
    pub points_required: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub sale_time: Option<String>,
    pub url: String,
}

impl SalesPhaseNotice {
    pub fn new(fixture: &Fixture, phase: &TicketSalesPhase, tz: Tz) -> Self {
        Self {
            fixture_id: fixture.id,
            team: fixture.team.clone(),
            sales_phase: phase.sales_phase.clone(),
            match_date: fixture.date.with_timezone(&tz),
            who_can_buy: phase.who_can_buy.clone(),
            points_required: phase.points_required.clone(),
            sale_date: phase.sale_date,
            sale_time: phase.sale_time.clone(),
            url: fixture.ticket_url.clone(),
        }
    }

    pub fn subject(&self) -> String {
        format!(
            "New Away Ticket Sales Phase: {} - {}",
            self.team, self.sales_phase
        )
    }

    fn match_date_text(&self) -> String {
        self.match_date.format("%A, %-d %B %Y - %-I:%M %p").to_string()
    }

    fn sale_start_text(&self) -> String {
        match (self.sale_date, &self.sale_time) {
            (Some(date), Some(time)) => format!("{} at {time}", date.format("%A, %-d %B %Y")),
            (Some(date), None) => date.format("%A, %-d %B %Y").to_string(),
            (None, _) => "Unknown".to_string(),
        }
    }

    /// Rich rendering for mail-like channels.
    pub fn email_body(&self) -> String {
        let mut lines = vec![
            format!(
                "A new ticket sales phase is now available for the away match against {}.",
                self.team
            ),
            format!("Match Date: {}", self.match_date_text()),
            format!("Sales Phase: {}", self.sales_phase),
        ];
        if let Some(who) = &self.who_can_buy {
            lines.push(format!("Who Can Buy: {who}"));
        }
        if let Some(points) = &self.points_required {
            lines.push(format!("Points Required: {points}"));
        }
        lines.push(format!("Sales Start: {}", self.sale_start_text()));
        lines.push(format!("View Ticket Information: {}", self.url));
        lines.push("Hurry, away tickets sell out quickly!".to_string());
        lines.join("\n")
    }

    /// Plain rendering for SMS-like channels.
    pub fn sms_text(&self) -> String {
        let mut text = format!("{}\n", self.subject());
        text.push_str(&format!("Match Date: {}\n", self.match_date_text()));
        text.push_str(&format!("Sales Start: {}\n", self.sale_start_text()));
        if let Some(who) = &self.who_can_buy {
            text.push_str(&format!("Who Can Buy: {who}\n"));
        }
        if let Some(points) = &self.points_required {
            text.push_str(&format!("Points Required: {points}\n"));
        }
        text.push_str("Hurry, away tickets sell out quickly!");
        text
    }
}

/// A delivery collaborator. Returns how many recipients were reached.
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(
        &self,
        notice: &SalesPhaseNotice,
        recipients: &[Recipient],
    ) -> Result<usize, NotificationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxKind {
    Mail,
    Sms,
}

/// Drops rendered messages into a directory for an external sender to pick up.
#[derive(Debug, Clone)]
pub struct OutboxChannel {
    kind: OutboxKind,
    dir: PathBuf,
}

impl OutboxChannel {
    pub fn new(kind: OutboxKind, dir: PathBuf) -> Self {
        Self { kind, dir }
    }

    fn message_path(&self, notice: &SalesPhaseNotice, recipient: &Recipient) -> PathBuf {
        let ext = match self.kind {
            OutboxKind::Mail => "eml",
            OutboxKind::Sms => "txt",
        };
        self.dir.join(self.name()).join(format!(
            "{}-{}-{}.{ext}",
            notice.fixture_id,
            slug(&notice.sales_phase),
            slug(&recipient.name)
        ))
    }
}

impl Channel for OutboxChannel {
    fn name(&self) -> &'static str {
        match self.kind {
            OutboxKind::Mail => "mail",
            OutboxKind::Sms => "sms",
        }
    }

    fn deliver(
        &self,
        notice: &SalesPhaseNotice,
        recipients: &[Recipient],
    ) -> Result<usize, NotificationError> {
        let channel = self.name();
        let io_err = |source| NotificationError::Delivery { channel, source };
        std::fs::create_dir_all(self.dir.join(channel)).map_err(io_err)?;

        let mut delivered = 0usize;
        for recipient in recipients {
            let content = match (self.kind, &recipient.email, &recipient.phone) {
                (OutboxKind::Mail, Some(email), _) => format!(
                    "To: {} <{email}>\nSubject: {}\n\n{}\n",
                    recipient.name,
                    notice.subject(),
                    notice.email_body()
                ),
                (OutboxKind::Sms, _, Some(phone)) => {
                    format!("To: {phone}\n\n{}\n", notice.sms_text())
                }
                _ => continue,
            };
            std::fs::write(self.message_path(notice, recipient), content).map_err(io_err)?;
            delivered += 1;
        }
        Ok(delivered)
    }
}

pub struct Dispatcher {
    config: NotifyConfig,
    channels: Vec<Box<dyn Channel>>,
    tz: Tz,
}

impl Dispatcher {
    pub fn new(config: NotifyConfig, tz: Tz, channels: Vec<Box<dyn Channel>>) -> Self {
        Self {
            config,
            channels,
            tz,
        }
    }

    /// Builds outbox channels for every channel named in `[notify]`.
    pub fn from_config(loaded: &LoadedConfig) -> Result<Self> {
        let notify = &loaded.config.notify;
        let outbox = loaded.resolve(&notify.outbox_dir)?;
        let channels = notify
            .channels
            .iter()
            .filter_map(|name| match name.as_str() {
                "mail" => Some(OutboxKind::Mail),
                "sms" => Some(OutboxKind::Sms),
                _ => None,
            })
            .map(|kind| Box::new(OutboxChannel::new(kind, outbox.clone())) as Box<dyn Channel>)
            .collect();
        Ok(Self::new(
            notify.clone(),
            loaded.config.site.timezone()?,
            channels,
        ))
    }

    /// Sends a notice for a phase that has not been notified yet, or for any
    /// observed phase when `force` is set.
    ///
    /// Sending is gated on a store claim so concurrent workers never deliver
    /// the same phase twice. The phase is marked notified only after every
    /// channel confirmed delivery, so a failed send is retried on the next run.
    pub fn maybe_notify(
        &self,
        store: &dyn Store,
        fixture: &Fixture,
        upsert: &PhaseUpsert,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<NotifiedOutcome, StoreError> {
        let phase = &upsert.phase;
        if phase.notified && !force {
            return Ok(NotifiedOutcome::Skipped);
        }
        if !store.claim_notification(fixture.id, &phase.sales_phase, force)? {
            debug!(
                team = %fixture.team,
                phase = %phase.sales_phase,
                "notification already claimed or sent"
            );
            return Ok(NotifiedOutcome::Skipped);
        }

        let outcome = self.notify_claimed(store, fixture, upsert, now);
        if !matches!(
            outcome,
            Ok(NotifiedOutcome::Sent | NotifiedOutcome::Suppressed)
        ) {
            store.release_notification(fixture.id, &phase.sales_phase)?;
        }
        outcome
    }

    fn notify_claimed(
        &self,
        store: &dyn Store,
        fixture: &Fixture,
        upsert: &PhaseUpsert,
        now: DateTime<Utc>,
    ) -> Result<NotifiedOutcome, StoreError> {
        let phase = &upsert.phase;
        if !upsert.is_new && !phase.notified {
            info!(
                team = %fixture.team,
                phase = %phase.sales_phase,
                "retrying notification for previously unnotified phase"
            );
        }

        if !self.config.enabled {
            info!(
                team = %fixture.team,
                phase = %phase.sales_phase,
                "notifications disabled; marking phase without sending"
            );
            store.mark_notified(fixture.id, &phase.sales_phase, now)?;
            return Ok(NotifiedOutcome::Suppressed);
        }

        if self.config.recipients.is_empty() {
            warn!(phase = %phase.sales_phase, "no recipients configured");
        }

        let notice = SalesPhaseNotice::new(fixture, phase, self.tz);
        let mut failed = false;
        for channel in &self.channels {
            match channel.deliver(&notice, &self.config.recipients) {
                Ok(delivered) => info!(
                    channel = channel.name(),
                    team = %fixture.team,
                    phase = %phase.sales_phase,
                    delivered,
                    "notification delivered"
                ),
                Err(err) => {
                    error!(
                        channel = channel.name(),
                        url = %fixture.ticket_url,
                        phase = %phase.sales_phase,
                        error = %err,
                        "notification delivery failed"
                    );
                    failed = true;
                }
            }
        }

        if failed {
            return Ok(NotifiedOutcome::Failed);
        }

        store.mark_notified(fixture.id, &phase.sales_phase, now)?;
        Ok(NotifiedOutcome::Sent)
    }
}

fn slug(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
