use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type FixtureId = u64;

/// A listed away match, before it has been reconciled with stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFixture {
    pub ticket_url: String,
    pub team: String,
    pub competition: Option<String>,
    pub venue: Option<String>,
    pub date: DateTime<Utc>,
    pub date_approximate: bool,
    pub season: String,
    pub is_away: bool,
    pub phase_hints: Vec<PhaseHint>,
}

impl CandidateFixture {
    pub fn fields(&self) -> FixtureFields {
        FixtureFields {
            ticket_url: self.ticket_url.clone(),
            team: self.team.clone(),
            competition: self.competition.clone(),
            venue: self.venue.clone(),
            date: self.date,
            date_approximate: self.date_approximate,
            season: self.season.clone(),
            is_away: self.is_away,
        }
    }
}

/// A sales phase name and its free-text date as shown on a listing card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseHint {
    pub name: String,
    pub date_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePhase {
    pub name: String,
    pub who_can_buy: Option<String>,
    pub points_required: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub sale_time: Option<String>,
}

impl CandidatePhase {
    pub fn fields(&self) -> PhaseFields {
        PhaseFields {
            sales_phase: self.name.clone(),
            who_can_buy: self.who_can_buy.clone(),
            points_required: self.points_required.clone(),
            sale_date: self.sale_date,
            sale_time: self.sale_time.clone(),
        }
    }
}

/// Everything a fixture upsert writes, keyed by `ticket_url`.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureFields {
    pub ticket_url: String,
    pub team: String,
    pub competition: Option<String>,
    pub venue: Option<String>,
    pub date: DateTime<Utc>,
    pub date_approximate: bool,
    pub season: String,
    pub is_away: bool,
}

/// Everything a phase upsert writes, keyed by `(fixture_id, sales_phase)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFields {
    pub sales_phase: String,
    pub who_can_buy: Option<String>,
    pub points_required: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub sale_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fixture {
    pub id: FixtureId,
    pub ticket_url: String,
    pub team: String,
    pub competition: Option<String>,
    pub venue: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub date_approximate: bool,
    pub is_away: bool,
    pub season: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Fixture {
    /// Applies `fields` in place and reports whether anything differed.
    ///
    /// An approximate incoming date never replaces a stored one; otherwise a
    /// page whose date text stops parsing would rewrite the fixture on every
    /// run with a new "now".
    pub fn merge(&mut self, fields: FixtureFields, now: DateTime<Utc>) -> bool {
        let (date, date_approximate, season) = if fields.date_approximate {
            (self.date, self.date_approximate, self.season.clone())
        } else {
            (fields.date, false, fields.season)
        };

        let changed = self.team != fields.team
            || self.competition != fields.competition
            || self.venue != fields.venue
            || self.date != date
            || self.date_approximate != date_approximate
            || self.season != season
            || self.is_away != fields.is_away;

        if changed {
            self.team = fields.team;
            self.competition = fields.competition;
            self.venue = fields.venue;
            self.date = date;
            self.date_approximate = date_approximate;
            self.season = season;
            self.is_away = fields.is_away;
            self.last_modified = now;
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketSalesPhase {
    pub fixture_id: FixtureId,
    pub sales_phase: String,
    pub who_can_buy: Option<String>,
    pub points_required: Option<String>,
    pub sale_date: Option<NaiveDate>,
    pub sale_time: Option<String>,
    #[serde(default)]
    pub notified: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl TicketSalesPhase {
    pub fn merge(&mut self, fields: PhaseFields, now: DateTime<Utc>) -> bool {
        let changed = self.who_can_buy != fields.who_can_buy
            || self.points_required != fields.points_required
            || self.sale_date != fields.sale_date
            || self.sale_time != fields.sale_time;

        if changed {
            self.who_can_buy = fields.who_can_buy;
            self.points_required = fields.points_required;
            self.sale_date = fields.sale_date;
            self.sale_time = fields.sale_time;
            self.last_modified = now;
        }
        changed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub schema_version: u32,
    pub next_fixture_id: FixtureId,
    /// Keyed by ticket url.
    pub fixtures: BTreeMap<String, Fixture>,
    /// Keyed by fixture id, then sales phase name.
    pub phases: BTreeMap<FixtureId, BTreeMap<String, TicketSalesPhase>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            schema_version: 1,
            next_fixture_id: 1,
            fixtures: BTreeMap::new(),
            phases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub fixtures_discovered: usize,
    pub fixtures_created: usize,
    pub fixtures_updated: usize,
    pub fixtures_unchanged: usize,
    pub fixtures_failed: usize,
    pub fixtures_skipped: usize,
    pub detail_pages_fetched: usize,
    pub detail_fetch_failures: usize,
    pub phases_seen: usize,
    pub new_phases: usize,
    pub phases_updated: usize,
    pub notifications_sent: usize,
    pub notifications_suppressed: usize,
    pub notification_failures: usize,
    pub store_writes: u64,
}
