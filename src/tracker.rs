use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::engine;
use crate::error::{Result, TrackerError};
use crate::models::{
    validate_scope, EntryKey, MoveFailure, MoveReport, Movement, ReviewEntry, SheetSummary, Stage,
    StageBoard, StageListing, StageSummary,
};
use crate::store::EntryStore;

// Conditional writes retried after a version conflict, per entry per pass
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Entry point for every tracker operation.
///
/// Reads never move stages. Call [`Tracker::auto_move_stages`] first when
/// up-to-date stages matter.
pub struct Tracker<S, C> {
    store: S,
    clock: C,
}

impl<S: EntryStore, C: Clock> Tracker<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn add_solved(&self, user_id: &str, sheet_group: &str, item_id: &str) -> Result<ReviewEntry> {
        let key = EntryKey::new(user_id, sheet_group, item_id)?;
        if let Some(existing) = self.store.get(&key)? {
            debug!(key = %key, stage = %existing.stage, "entry already tracked");
            return Ok(existing);
        }

        let (entry, created) = self
            .store
            .insert_if_absent(&ReviewEntry::new(key, self.clock.now()))?;
        if created {
            info!(key = %entry.key, "tracking new entry");
        }
        Ok(entry)
    }

    pub fn set_confirmed(
        &self,
        user_id: &str,
        sheet_group: &str,
        item_id: &str,
        confirmed: bool,
    ) -> Result<ReviewEntry> {
        let key = EntryKey::new(user_id, sheet_group, item_id)?;
        let entry = self
            .store
            .set_confirmed(&key, confirmed)?
            .ok_or_else(|| TrackerError::not_found(&key))?;
        debug!(key = %key, confirmed, stage = %entry.stage, "confirmation updated");
        Ok(entry)
    }

    /// One evaluation pass over every pending entry in scope.
    ///
    /// Each entry hops at most once. A write failure on one entry lands in
    /// `failures` and the pass carries on with the rest.
    pub fn auto_move_stages(&self, user_id: &str, sheet_group: &str) -> Result<MoveReport> {
        validate_scope(user_id, sheet_group)?;
        let (user_id, sheet_group) = (user_id.trim(), sheet_group.trim());
        let now = self.clock.now();

        let pending = self.store.list_pending(user_id, sheet_group)?;
        let mut movements = Vec::new();
        let mut failures = Vec::new();

        for entry in pending {
            match self.advance(entry.clone(), now) {
                Ok(Some(movement)) => movements.push(movement),
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "failed to advance entry");
                    failures.push(MoveFailure::new(entry.item_id(), &e));
                }
            }
        }

        let summary = StageSummary::from_entries(&self.store.list(user_id, sheet_group)?);
        info!(
            user = user_id,
            sheet = sheet_group,
            moved = movements.len(),
            failed = failures.len(),
            "stage pass complete"
        );

        Ok(MoveReport {
            movements,
            summary,
            failures,
        })
    }

    /// Evaluate a single entry. Completed entries cannot be moved.
    pub fn move_item(&self, user_id: &str, sheet_group: &str, item_id: &str) -> Result<Option<Movement>> {
        let key = EntryKey::new(user_id, sheet_group, item_id)?;
        let entry = self
            .store
            .get(&key)?
            .ok_or_else(|| TrackerError::not_found(&key))?;
        if entry.stage.is_terminal() {
            return Err(TrackerError::Conflict(format!(
                "{} is already {}",
                key,
                Stage::Completed
            )));
        }
        self.advance(entry, self.clock.now())
    }

    // Evaluate against the freshest persisted state. A lost race re-reads
    // the entry and decides again, so a concurrent advance shows up as zero
    // dwell in the new stage rather than a second hop.
    fn advance(&self, mut current: ReviewEntry, now: DateTime<Utc>) -> Result<Option<Movement>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(transition) = engine::step(&current, now) else {
                debug!(key = %current.key, stage = %current.stage, "no transition due");
                return Ok(None);
            };

            if self.store.update_if_version(&transition.entry, current.version)? {
                let m = &transition.movement;
                info!(
                    key = %current.key,
                    from = %m.from,
                    to = %m.to,
                    reason = m.reason.as_str(),
                    "stage advanced"
                );
                return Ok(Some(transition.movement));
            }

            warn!(key = %current.key, attempt, "version conflict, re-reading entry");
            match self.store.get(&current.key)? {
                Some(fresh) => current = fresh,
                None => {
                    debug!(key = %current.key, "entry removed mid-pass");
                    return Ok(None);
                }
            }
        }

        Err(TrackerError::Conflict(format!(
            "{} still contended after {} attempts",
            current.key, MAX_WRITE_ATTEMPTS
        )))
    }

    pub fn get_all(&self, user_id: &str, sheet_group: &str) -> Result<StageBoard> {
        validate_scope(user_id, sheet_group)?;
        let entries = self.store.list(user_id.trim(), sheet_group.trim())?;
        Ok(StageBoard::from_entries(entries))
    }

    pub fn get_stage(&self, user_id: &str, sheet_group: &str, stage: Stage) -> Result<StageListing> {
        validate_scope(user_id, sheet_group)?;
        let entries: Vec<ReviewEntry> = self
            .store
            .list(user_id.trim(), sheet_group.trim())?
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect();
        Ok(StageListing {
            stage,
            count: entries.len(),
            entries,
        })
    }

    pub fn get_entry(&self, user_id: &str, sheet_group: &str, item_id: &str) -> Result<ReviewEntry> {
        let key = EntryKey::new(user_id, sheet_group, item_id)?;
        self.store
            .get(&key)?
            .ok_or_else(|| TrackerError::not_found(&key))
    }

    pub fn sheets(&self, user_id: &str) -> Result<Vec<SheetSummary>> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(TrackerError::invalid("user id must not be empty"));
        }

        self.store
            .sheet_groups(user_id)?
            .into_iter()
            .map(|sheet_group| -> Result<SheetSummary> {
                let summary = StageSummary::from_entries(&self.store.list(user_id, &sheet_group)?);
                Ok(SheetSummary {
                    total: summary.total(),
                    sheet_group,
                    summary,
                })
            })
            .collect()
    }

    pub fn remove(&self, user_id: &str, sheet_group: &str, item_id: &str) -> Result<()> {
        let key = EntryKey::new(user_id, sheet_group, item_id)?;
        if !self.store.remove(&key)? {
            return Err(TrackerError::not_found(&key));
        }
        info!(key = %key, "entry removed");
        Ok(())
    }
}
