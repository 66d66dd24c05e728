use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, TrackerError};

// Review ladder, in schedule order. Derived Ord follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Today,
    Tomorrow,
    Day3,
    Week1,
    Week2,
    Month1,
    Completed,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Today,
        Stage::Tomorrow,
        Stage::Day3,
        Stage::Week1,
        Stage::Week2,
        Stage::Month1,
        Stage::Completed,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Today => "today",
            Stage::Tomorrow => "tomorrow",
            Stage::Day3 => "day3",
            Stage::Week1 => "week1",
            Stage::Week2 => "week2",
            Stage::Month1 => "month1",
            Stage::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Today => "TODAY",
            Stage::Tomorrow => "TOMORROW",
            Stage::Day3 => "DAY3",
            Stage::Week1 => "WEEK1",
            Stage::Week2 => "WEEK2",
            Stage::Month1 => "MONTH1",
            Stage::Completed => "COMPLETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "today" | "0" => Some(Stage::Today),
            "tomorrow" | "1d" => Some(Stage::Tomorrow),
            "day3" | "day_3" | "3d" => Some(Stage::Day3),
            "week1" | "week_1" | "1w" => Some(Stage::Week1),
            "week2" | "week_2" | "2w" => Some(Stage::Week2),
            "month1" | "month_1" | "1m" => Some(Stage::Month1),
            "completed" | "done" => Some(Stage::Completed),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s).ok_or_else(|| {
            TrackerError::invalid(format!(
                "unknown stage '{}'. Use: today, tomorrow, day3, week1, week2, month1, completed",
                s
            ))
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Identity of a review entry: one per (user, sheet, item)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub user_id: String,
    pub sheet_group: String,
    pub item_id: String,
}

impl EntryKey {
    pub fn new(user_id: &str, sheet_group: &str, item_id: &str) -> Result<Self> {
        validate_scope(user_id, sheet_group)?;
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(TrackerError::invalid("item id must not be empty"));
        }
        Ok(Self {
            user_id: user_id.trim().to_string(),
            sheet_group: sheet_group.trim().to_string(),
            item_id: item_id.to_string(),
        })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.sheet_group, self.item_id)
    }
}

pub fn validate_scope(user_id: &str, sheet_group: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(TrackerError::invalid("user id must not be empty"));
    }
    if sheet_group.trim().is_empty() {
        return Err(TrackerError::invalid("sheet group must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEntry {
    #[serde(flatten)]
    pub key: EntryKey,
    pub stage: Stage,
    pub stage_entered_at: DateTime<Utc>,
    pub confirmed: bool,
    pub review_count: u32,
    pub created_at: DateTime<Utc>,
    // Bumped by every persisted write; conditional updates compare against it
    pub version: i64,
}

impl ReviewEntry {
    pub fn new(key: EntryKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            stage: Stage::Today,
            stage_entered_at: now,
            confirmed: false,
            review_count: 0,
            created_at: now,
            version: 0,
        }
    }

    pub fn item_id(&self) -> &str {
        &self.key.item_id
    }
}

// Why an entry moved forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveReason {
    // Calendar rollover on a stage with no confirmation gate
    Rollover,
    Confirmed,
    // Force rule: dwell passed the stage's cap without confirmation
    Forced,
}

impl MoveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveReason::Rollover => "rollover",
            MoveReason::Confirmed => "confirmed",
            MoveReason::Forced => "forced",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub item_id: String,
    pub from: Stage,
    pub to: Stage,
    pub reason: MoveReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveFailure {
    pub item_id: String,
    pub code: String,
    pub error: String,
}

impl MoveFailure {
    pub fn new(item_id: &str, err: &TrackerError) -> Self {
        let kind: ErrorKind = err.kind();
        Self {
            item_id: item_id.to_string(),
            code: kind.code().to_string(),
            error: err.to_string(),
        }
    }
}

// Entry counts per stage; every stage is present, empty ones count zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageSummary {
    counts: BTreeMap<Stage, usize>,
}

impl Default for StageSummary {
    fn default() -> Self {
        Self {
            counts: Stage::ALL.iter().map(|s| (*s, 0)).collect(),
        }
    }
}

impl StageSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ReviewEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            *summary.counts.entry(entry.stage).or_insert(0) += 1;
        }
        summary
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.counts.get(&stage).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, usize)> + '_ {
        self.counts.iter().map(|(s, c)| (*s, *c))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveReport {
    pub movements: Vec<Movement>,
    pub summary: StageSummary,
    pub failures: Vec<MoveFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBoard {
    pub by_stage: BTreeMap<Stage, Vec<ReviewEntry>>,
    pub summary: StageSummary,
}

impl StageBoard {
    pub fn from_entries(entries: Vec<ReviewEntry>) -> Self {
        let summary = StageSummary::from_entries(&entries);
        let mut by_stage: BTreeMap<Stage, Vec<ReviewEntry>> =
            Stage::ALL.iter().map(|s| (*s, Vec::new())).collect();
        for entry in entries {
            by_stage.entry(entry.stage).or_default().push(entry);
        }
        Self { by_stage, summary }
    }

    pub fn entries(&self, stage: Stage) -> &[ReviewEntry] {
        self.by_stage.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageListing {
    pub stage: Stage,
    pub entries: Vec<ReviewEntry>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetSummary {
    pub sheet_group: String,
    pub total: usize,
    pub summary: StageSummary,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            code: None,
        }
    }

    pub fn tracker_err(err: &TrackerError) -> Self {
        Self {
            code: Some(err.kind().code()),
            ..Self::err(err.to_string())
        }
    }
}
