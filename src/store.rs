use crate::error::StoreError;
use crate::model::{Fixture, FixtureFields, FixtureId, PhaseFields, State, TicketSalesPhase};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureUpsert {
    pub fixture: Fixture,
    pub created: bool,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseUpsert {
    pub phase: TicketSalesPhase,
    pub is_new: bool,
    pub changed: bool,
}

/// Key-addressable persistence for fixtures and their sales phases.
///
/// Every upsert is atomic per natural key: two callers racing on the same key
/// never both see `is_new`. A write only happens when a field differs.
pub trait Store: Send + Sync {
    fn upsert_fixture(
        &self,
        fields: FixtureFields,
        now: DateTime<Utc>,
    ) -> Result<FixtureUpsert, StoreError>;

    fn upsert_phase(
        &self,
        fixture_id: FixtureId,
        fields: PhaseFields,
        now: DateTime<Utc>,
    ) -> Result<PhaseUpsert, StoreError>;

    /// Reserves the right to notify a phase. At most one caller holds the
    /// claim at a time, and an already notified phase is only claimable with
    /// `force`. The claim ends with `mark_notified` or `release_notification`.
    fn claim_notification(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
        force: bool,
    ) -> Result<bool, StoreError>;

    fn release_notification(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
    ) -> Result<(), StoreError>;

    fn mark_notified(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
        now: DateTime<Utc>,
    ) -> Result<TicketSalesPhase, StoreError>;

    fn fixture(&self, ticket_url: &str) -> Result<Option<Fixture>, StoreError>;

    fn phases(&self, fixture_id: FixtureId) -> Result<Vec<TicketSalesPhase>, StoreError>;

    /// Removes a fixture together with all of its phases.
    fn delete_fixture(&self, fixture_id: FixtureId) -> Result<bool, StoreError>;

    /// Number of committed writes since the store was opened.
    fn write_count(&self) -> u64;
}

/// A [`Store`] backed by a single JSON state file.
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    state: Mutex<State>,
    /// In-flight notifications. Never persisted.
    claims: Mutex<HashSet<(FixtureId, String)>>,
    writes: AtomicU64,
}

impl JsonStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let state = load_state(path)?;
        debug!(
            state = %path.display(),
            fixtures = state.fixtures.len(),
            "state loaded"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
            claims: Mutex::default(),
            writes: AtomicU64::new(0),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State::default()),
            claims: Mutex::default(),
            writes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Result<State, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Always taken after `state` when both are held.
    fn lock_claims(&self) -> Result<MutexGuard<'_, HashSet<(FixtureId, String)>>, StoreError> {
        self.claims.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Persists while the caller still holds the lock, so the file never
    /// reflects a half-applied upsert.
    fn commit(&self, state: &State) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            save_state(path, state)?;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Store for JsonStore {
    fn upsert_fixture(
        &self,
        fields: FixtureFields,
        now: DateTime<Utc>,
    ) -> Result<FixtureUpsert, StoreError> {
        let mut state = self.lock()?;

        if let Some(existing) = state.fixtures.get(&fields.ticket_url) {
            let mut merged = existing.clone();
            if !merged.merge(fields, now) {
                return Ok(FixtureUpsert {
                    fixture: merged,
                    created: false,
                    changed: false,
                });
            }

            let previous = state.fixtures.insert(merged.ticket_url.clone(), merged.clone());
            if let Err(err) = self.commit(&state) {
                if let Some(previous) = previous {
                    state.fixtures.insert(previous.ticket_url.clone(), previous);
                }
                return Err(err);
            }
            return Ok(FixtureUpsert {
                fixture: merged,
                created: false,
                changed: true,
            });
        }

        let id = state.next_fixture_id;
        let fixture = Fixture {
            id,
            ticket_url: fields.ticket_url,
            team: fields.team,
            competition: fields.competition,
            venue: fields.venue,
            date: fields.date,
            date_approximate: fields.date_approximate,
            is_away: fields.is_away,
            season: fields.season,
            created_at: now,
            last_modified: now,
        };
        state.next_fixture_id += 1;
        state.fixtures.insert(fixture.ticket_url.clone(), fixture.clone());

        if let Err(err) = self.commit(&state) {
            state.fixtures.remove(&fixture.ticket_url);
            state.next_fixture_id = id;
            return Err(err);
        }

        Ok(FixtureUpsert {
            fixture,
            created: true,
            changed: true,
        })
    }

    fn upsert_phase(
        &self,
        fixture_id: FixtureId,
        fields: PhaseFields,
        now: DateTime<Utc>,
    ) -> Result<PhaseUpsert, StoreError> {
        let mut state = self.lock()?;
        if !state.fixtures.values().any(|f| f.id == fixture_id) {
            return Err(StoreError::UnknownFixture(fixture_id));
        }

        let existing = state
            .phases
            .get(&fixture_id)
            .and_then(|phases| phases.get(&fields.sales_phase))
            .cloned();

        let (phase, is_new) = match existing {
            Some(mut merged) => {
                if !merged.merge(fields, now) {
                    return Ok(PhaseUpsert {
                        phase: merged,
                        is_new: false,
                        changed: false,
                    });
                }
                (merged, false)
            }
            None => (
                TicketSalesPhase {
                    fixture_id,
                    sales_phase: fields.sales_phase,
                    who_can_buy: fields.who_can_buy,
                    points_required: fields.points_required,
                    sale_date: fields.sale_date,
                    sale_time: fields.sale_time,
                    notified: false,
                    created_at: now,
                    last_modified: now,
                },
                true,
            ),
        };

        let previous = state
            .phases
            .entry(fixture_id)
            .or_default()
            .insert(phase.sales_phase.clone(), phase.clone());

        if let Err(err) = self.commit(&state) {
            restore_phase(&mut state, &phase, previous);
            return Err(err);
        }

        Ok(PhaseUpsert {
            phase,
            is_new,
            changed: true,
        })
    }

    fn claim_notification(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
        force: bool,
    ) -> Result<bool, StoreError> {
        let state = self.lock()?;
        let phase = state
            .phases
            .get(&fixture_id)
            .and_then(|phases| phases.get(sales_phase))
            .ok_or_else(|| StoreError::UnknownPhase {
                fixture_id,
                name: sales_phase.to_string(),
            })?;
        if phase.notified && !force {
            return Ok(false);
        }
        Ok(self
            .lock_claims()?
            .insert((fixture_id, sales_phase.to_string())))
    }

    fn release_notification(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
    ) -> Result<(), StoreError> {
        self.lock_claims()?
            .remove(&(fixture_id, sales_phase.to_string()));
        Ok(())
    }

    fn mark_notified(
        &self,
        fixture_id: FixtureId,
        sales_phase: &str,
        now: DateTime<Utc>,
    ) -> Result<TicketSalesPhase, StoreError> {
        let mut state = self.lock()?;
        self.lock_claims()?
            .remove(&(fixture_id, sales_phase.to_string()));
        let phase = state
            .phases
            .get_mut(&fixture_id)
            .and_then(|phases| phases.get_mut(sales_phase))
            .ok_or_else(|| StoreError::UnknownPhase {
                fixture_id,
                name: sales_phase.to_string(),
            })?;

        if phase.notified {
            return Ok(phase.clone());
        }

        let previous = phase.clone();
        phase.notified = true;
        phase.last_modified = now;
        let marked = phase.clone();

        if let Err(err) = self.commit(&state) {
            restore_phase(&mut state, &marked, Some(previous));
            return Err(err);
        }
        Ok(marked)
    }

    fn fixture(&self, ticket_url: &str) -> Result<Option<Fixture>, StoreError> {
        Ok(self.lock()?.fixtures.get(ticket_url).cloned())
    }

    fn phases(&self, fixture_id: FixtureId) -> Result<Vec<TicketSalesPhase>, StoreError> {
        Ok(self
            .lock()?
            .phases
            .get(&fixture_id)
            .map(|phases| phases.values().cloned().collect())
            .unwrap_or_default())
    }

    fn delete_fixture(&self, fixture_id: FixtureId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(url) = state
            .fixtures
            .values()
            .find(|f| f.id == fixture_id)
            .map(|f| f.ticket_url.clone())
        else {
            return Ok(false);
        };

        let removed_fixture = state.fixtures.remove(&url);
        let removed_phases = state.phases.remove(&fixture_id);

        if let Err(err) = self.commit(&state) {
            if let Some(fixture) = removed_fixture {
                state.fixtures.insert(url, fixture);
            }
            if let Some(phases) = removed_phases {
                state.phases.insert(fixture_id, phases);
            }
            return Err(err);
        }
        Ok(true)
    }

    fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

fn restore_phase(
    state: &mut State,
    phase: &TicketSalesPhase,
    previous: Option<TicketSalesPhase>,
) {
    let Some(phases) = state.phases.get_mut(&phase.fixture_id) else {
        return;
    };
    match previous {
        Some(previous) => {
            phases.insert(previous.sales_phase.clone(), previous);
        }
        None => {
            phases.remove(&phase.sales_phase);
        }
    }
}

pub fn load_state(path: &Path) -> Result<State, StoreError> {
    if !path.exists() {
        return Ok(State::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes through a sibling temp file and a rename so readers never see a
/// truncated state file.
pub fn save_state(path: &Path, state: &State) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let serialized = serde_json::to_string_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}
