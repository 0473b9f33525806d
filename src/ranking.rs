use crate::models::Room;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Every skipped room that ranked equal to or better than the chosen one.
const SKIPPED_BETTER_PENALTY: u64 = 5;
/// Rooms that were already ranked worse than the chosen one.
const SKIPPED_WORSE_PENALTY: u64 = 1;
/// Subtracted from every room touched by an update when a score would overflow.
const NORMALIZE_STEP: u64 = 1000;

/// Per-room preference scores; lower is more preferred, a missing entry is 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rankings {
    scores: HashMap<Room, u64>,
}

impl Rankings {
    pub fn score(&self, room: &Room) -> u64 {
        self.scores.get(room).copied().unwrap_or(0)
    }

    /// Sorts by score ascending with a `(provider, id)` tie-break, so the
    /// order is total and reproducible even when scores collide.
    pub fn sort(&self, rooms: &mut [Room]) {
        rooms.sort_by(|a, b| {
            self.score(a)
                .cmp(&self.score(b))
                .then_with(|| a.provider.cmp(&b.provider))
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// Records a booking decision: every pool room that was passed over gets
    /// penalized, heavier when it was ranked at least as well as the selected
    /// room. The selected room's own score never moves.
    pub fn update(&mut self, selected: &Room, pool: &[Room]) {
        for room in pool {
            if room == selected {
                continue;
            }
            let penalty = if self.score(room) > self.score(selected) {
                SKIPPED_WORSE_PENALTY
            } else {
                SKIPPED_BETTER_PENALTY
            };
            if self.score(room) > u64::MAX - penalty {
                self.normalize(selected, pool);
            }
            *self.scores.entry(room.clone()).or_insert(0) += penalty;
        }
    }

    /// Pulls every room touched by the current update back towards zero.
    /// Scoped to this call's rooms; untouched rooms never decay.
    fn normalize(&mut self, selected: &Room, pool: &[Room]) {
        for room in pool.iter().chain(std::iter::once(selected)) {
            if let Some(score) = self.scores.get_mut(room) {
                *score = score.saturating_sub(NORMALIZE_STEP);
            }
        }
    }

    fn from_entries(entries: Vec<RankingEntry>) -> Self {
        Self {
            scores: entries.into_iter().map(|e| (e.room, e.score)).collect(),
        }
    }

    fn to_entries(&self) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = self
            .scores
            .iter()
            .map(|(room, score)| RankingEntry {
                room: room.clone(),
                score: *score,
            })
            .collect();
        entries.sort_by(|a, b| (&a.room.provider, &a.room.id).cmp(&(&b.room.provider, &b.room.id)));
        entries
    }
}

/// On-disk shape: a flat list of room/score pairs.
#[derive(Debug, Serialize, Deserialize)]
struct RankingEntry {
    room: Room,
    score: u64,
}

/// Loads rankings once and rewrites the whole file after each booking
/// decision. Process-local; concurrent writers are out of scope.
pub trait RankingStore {
    fn load(&self) -> Result<Rankings>;
    fn save(&self, rankings: &Rankings) -> Result<()>;
}

pub struct FileRankingStore {
    path: PathBuf,
}

impl FileRankingStore {
    /// Creates the parent directory and an empty rankings file on first use.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating rankings directory {}", parent.display()))?;
        }
        if !path.exists() {
            std::fs::write(&path, "[]")
                .with_context(|| format!("creating rankings file {}", path.display()))?;
        }
        Ok(Self { path })
    }
}

impl RankingStore for FileRankingStore {
    fn load(&self) -> Result<Rankings> {
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading rankings from {}", self.path.display()))?;
        let entries: Vec<RankingEntry> =
            serde_json::from_str(&data).context("rankings file is not a valid ranking list")?;
        Ok(Rankings::from_entries(entries))
    }

    fn save(&self, rankings: &Rankings) -> Result<()> {
        let data = serde_json::to_string_pretty(&rankings.to_entries())?;
        std::fs::write(&self.path, data)
            .with_context(|| format!("writing rankings to {}", self.path.display()))?;
        Ok(())
    }
}
