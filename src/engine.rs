//! Stage transition rules.
//!
//! Everything here is pure: a decision depends only on the entry and the
//! instant passed in. Persistence and retries live in [`crate::tracker`].

use chrono::{DateTime, Duration, Utc};

use crate::models::{MoveReason, Movement, ReviewEntry, Stage};

/// Rules for leaving one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    pub stage: Stage,
    pub next: Stage,
    /// Days the entry must sit in `stage` before any advance is considered.
    pub min_dwell_days: i64,
    /// Days after which the entry advances even without confirmation.
    pub force_dwell_days: Option<i64>,
    pub requires_confirmation: bool,
}

impl StagePolicy {
    pub fn min_dwell(&self) -> Duration {
        Duration::days(self.min_dwell_days)
    }

    pub fn force_dwell(&self) -> Option<Duration> {
        self.force_dwell_days.map(Duration::days)
    }
}

pub const POLICY: [StagePolicy; 6] = [
    StagePolicy {
        stage: Stage::Today,
        next: Stage::Tomorrow,
        min_dwell_days: 1,
        force_dwell_days: None,
        requires_confirmation: false,
    },
    StagePolicy {
        stage: Stage::Tomorrow,
        next: Stage::Day3,
        min_dwell_days: 2,
        force_dwell_days: None,
        requires_confirmation: true,
    },
    StagePolicy {
        stage: Stage::Day3,
        next: Stage::Week1,
        min_dwell_days: 4,
        force_dwell_days: Some(7),
        requires_confirmation: true,
    },
    StagePolicy {
        stage: Stage::Week1,
        next: Stage::Week2,
        min_dwell_days: 7,
        force_dwell_days: None,
        requires_confirmation: true,
    },
    StagePolicy {
        stage: Stage::Week2,
        next: Stage::Month1,
        min_dwell_days: 14,
        force_dwell_days: None,
        requires_confirmation: true,
    },
    StagePolicy {
        stage: Stage::Month1,
        next: Stage::Completed,
        min_dwell_days: 30,
        force_dwell_days: None,
        requires_confirmation: true,
    },
];

/// Policy for leaving `stage`; `None` for the terminal stage.
pub fn policy_for(stage: Stage) -> Option<&'static StagePolicy> {
    POLICY.iter().find(|p| p.stage == stage)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    Terminal,
    TooEarly,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Advance { to: Stage, reason: MoveReason },
    Hold(HoldReason),
}

pub fn evaluate(entry: &ReviewEntry, now: DateTime<Utc>) -> Decision {
    let Some(policy) = policy_for(entry.stage) else {
        return Decision::Hold(HoldReason::Terminal);
    };

    let dwell = now - entry.stage_entered_at;
    if dwell < policy.min_dwell() {
        return Decision::Hold(HoldReason::TooEarly);
    }

    if let Some(force) = policy.force_dwell() {
        if dwell >= force {
            return Decision::Advance {
                to: policy.next,
                reason: MoveReason::Forced,
            };
        }
    }

    if !policy.requires_confirmation {
        Decision::Advance {
            to: policy.next,
            reason: MoveReason::Rollover,
        }
    } else if entry.confirmed {
        Decision::Advance {
            to: policy.next,
            reason: MoveReason::Confirmed,
        }
    } else {
        Decision::Hold(HoldReason::AwaitingConfirmation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub entry: ReviewEntry,
    pub movement: Movement,
}

/// Evaluate and, if due, produce the advanced entry. At most one stage hop.
///
/// The returned entry carries `version + 1` so the caller can write it
/// conditionally against the version it read.
pub fn step(entry: &ReviewEntry, now: DateTime<Utc>) -> Option<Transition> {
    let Decision::Advance { to, reason } = evaluate(entry, now) else {
        return None;
    };

    let mut next = entry.clone();
    next.stage = to;
    next.stage_entered_at = now;
    next.confirmed = false;
    next.review_count += 1;
    next.version += 1;

    Some(Transition {
        movement: Movement {
            item_id: entry.key.item_id.clone(),
            from: entry.stage,
            to,
            reason,
        },
        entry: next,
    })
}

/// Earliest instant the entry may advance, given confirmation where needed.
pub fn eligible_at(entry: &ReviewEntry) -> Option<DateTime<Utc>> {
    policy_for(entry.stage).map(|p| entry.stage_entered_at + p.min_dwell())
}

/// Instant the force rule advances the entry regardless of confirmation.
pub fn forced_at(entry: &ReviewEntry) -> Option<DateTime<Utc>> {
    policy_for(entry.stage)
        .and_then(StagePolicy::force_dwell)
        .map(|d| entry.stage_entered_at + d)
}
