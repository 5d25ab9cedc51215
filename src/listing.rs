use crate::config::absolutize;
use crate::datetime::{derive_season, extract_kickoff_time, parse_fixture_datetime};
use crate::html::{first_text, selector};
use crate::model::{CandidateFixture, PhaseHint};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

static AWAY_CARD: LazyLock<Selector> =
    LazyLock::new(|| selector("article.ticket-card.ticket-card--away"));
static DATE: LazyLock<Selector> = LazyLock::new(|| selector(".event-info-alt__date"));
static KICKOFF: LazyLock<Selector> = LazyLock::new(|| selector(".event-info-alt__kickoff"));
static COMPETITION: LazyLock<Selector> = LazyLock::new(|| selector(".event-info-alt__extra"));
static VENUE: LazyLock<Selector> = LazyLock::new(|| selector(".event-info-alt__venue"));
static OPPONENT: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-card__opponent a"));
static OPPONENT_FALLBACK: LazyLock<Selector> =
    LazyLock::new(|| selector(".ticket-card__opponent"));
static CTA_LINK: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-card__ctas a[href]"));
static ANY_LINK: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static HINT_ITEM: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-list__item"));
static HINT_TEXT: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-list__item-text"));
static HINT_DATE: LazyLock<Selector> = LazyLock::new(|| selector(".ticket-list__item-date"));

const TICKET_PATH_PREFIX: &str = "/tickets/";

/// What a listing needs besides its markup to produce candidates.
#[derive(Debug, Clone)]
pub struct ListingContext {
    pub base_url: String,
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

/// A parsed fixtures listing page.
pub struct ListingPage {
    html: Html,
}

impl ListingPage {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }

    pub fn card_count(&self) -> usize {
        self.html.select(&AWAY_CARD).count()
    }

    /// Away fixtures in page order. Cards without a usable ticket link are
    /// dropped with a warning. Calling this again starts over.
    pub fn fixtures<'a>(
        &'a self,
        ctx: &'a ListingContext,
    ) -> impl Iterator<Item = CandidateFixture> + 'a {
        self.html
            .select(&AWAY_CARD)
            .filter_map(move |card| candidate_from_card(card, ctx))
    }
}

fn candidate_from_card(card: ElementRef<'_>, ctx: &ListingContext) -> Option<CandidateFixture> {
    let team = first_text(card, &OPPONENT)
        .or_else(|| first_text(card, &OPPONENT_FALLBACK))
        .unwrap_or_else(|| "Unknown".to_string());

    let Some(ticket_url) = ticket_url(card, &ctx.base_url) else {
        warn!(team = %team, "away card has no ticket link; dropping");
        return None;
    };

    let date_text = first_text(card, &DATE).unwrap_or_default();
    let kickoff = first_text(card, &KICKOFF).and_then(|text| extract_kickoff_time(&text));
    let resolved = parse_fixture_datetime(
        &date_text,
        kickoff.as_deref(),
        Some(&ticket_url),
        ctx.now,
        ctx.tz,
    );
    let season = derive_season(&resolved.at.with_timezone(&ctx.tz));

    let phase_hints = card
        .select(&HINT_ITEM)
        .filter_map(|item| {
            Some(PhaseHint {
                name: first_text(item, &HINT_TEXT)?,
                date_text: first_text(item, &HINT_DATE)?,
            })
        })
        .collect::<Vec<_>>();

    debug!(
        team = %team,
        url = %ticket_url,
        date_source = ?resolved.source,
        hints = phase_hints.len(),
        "away fixture listed"
    );

    Some(CandidateFixture {
        ticket_url,
        team,
        competition: first_text(card, &COMPETITION),
        venue: first_text(card, &VENUE),
        date: resolved.at,
        date_approximate: resolved.is_approximate(),
        season,
        is_away: true,
        phase_hints,
    })
}

/// Prefers a ticket link in the call-to-action area, then any ticket link on
/// the card. Relative links are resolved against `base_url`.
fn ticket_url(card: ElementRef<'_>, base_url: &str) -> Option<String> {
    let href = first_ticket_href(card, &CTA_LINK).or_else(|| first_ticket_href(card, &ANY_LINK))?;
    match absolutize(base_url, &href) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(href = %href, error = %err, "could not resolve ticket link");
            None
        }
    }
}

fn first_ticket_href(card: ElementRef<'_>, links: &Selector) -> Option<String> {
    card.select(links)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .find(|href| is_ticket_path(href))
        .map(ToString::to_string)
}

fn is_ticket_path(href: &str) -> bool {
    if href.starts_with(TICKET_PATH_PREFIX) {
        return true;
    }
    Url::parse(href)
        .map(|url| url.path().starts_with(TICKET_PATH_PREFIX))
        .unwrap_or(false)
}
