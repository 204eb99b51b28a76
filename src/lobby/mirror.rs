//! Reconciliation engine for the client-side game list
//!
//! The mirror is the client's copy of the server's game list as of the last
//! applied message. All three update shapes funnel into two merge paths:
//!
//! - Full snapshots are normalized to an update+delete diff (every listed
//!   game as an update, every unlisted mirrored game as a delete), so
//!   snapshots and diffs share one shallow-merge algorithm. Entries are
//!   validated one at a time; entries without a `gameid` are skipped.
//! - Patch streams fold per-game diff-op sequences over the previous record.
//!
//! Deletes always run after updates. A record that fails to merge or patch
//! is dropped from the mirror instead of poisoning it, and the outcome asks
//! for a resync. Derived views (filtered, ordered) are computed on demand.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::lobby::game::{normalize_record, Game, GameId};
use crate::lobby::ordering;
use crate::lobby::viewer::Viewer;
use crate::lobby::visibility;
use crate::net::patch::{self, DiffOp, PatchError};
use crate::net::protocol::{GameDiff, MirrorUpdate, PatchStream};

/// Why a single game could not be reconciled
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Patch failed for {gameid}: {source}")]
    Patch {
        gameid: GameId,
        #[source]
        source: PatchError,
    },
    #[error("Malformed record for {gameid}: {reason}")]
    MalformedRecord { gameid: GameId, reason: String },
}

impl ReconcileError {
    pub fn gameid(&self) -> &str {
        match self {
            ReconcileError::Patch { gameid, .. } | ReconcileError::MalformedRecord { gameid, .. } => {
                gameid
            }
        }
    }
}

/// Result of applying one update
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Games inserted or modified
    pub updated: usize,
    /// Games removed by delete directive or snapshot omission
    pub deleted: usize,
    /// Games dropped because their update was malformed
    pub dropped: Vec<ReconcileError>,
    /// Patch stream skipped because its sequence number was already seen
    pub stale: bool,
    /// A resync request should be issued now
    pub resync_needed: bool,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        self.updated > 0 || self.deleted > 0 || !self.dropped.is_empty()
    }
}

/// Client-local mirror of the server's game list
#[derive(Debug, Default, Clone)]
pub struct Mirror {
    games: BTreeMap<GameId, Game>,
    /// Last applied patch stream sequence number
    last_seq: Option<u64>,
    /// A resync was requested and no snapshot has arrived since
    resync_pending: bool,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update message
    pub fn apply(&mut self, update: MirrorUpdate) -> ApplyOutcome {
        match update {
            MirrorUpdate::Snapshot(games) => self.apply_snapshot(games),
            MirrorUpdate::Diff(diff) => self.apply_diff(diff),
            MirrorUpdate::PatchStream(stream) => self.apply_patch_stream(stream),
        }
    }

    fn apply_snapshot(&mut self, entries: Vec<Value>) -> ApplyOutcome {
        let mut update = BTreeMap::new();
        let mut dropped = Vec::new();

        for entry in entries {
            let Some(gameid) = entry.get("gameid").and_then(Value::as_str).map(str::to_string) else {
                warn!("Skipping snapshot entry without a gameid");
                continue;
            };
            match snapshot_record(&gameid, entry) {
                Ok(record) => {
                    update.insert(gameid, record);
                }
                Err(err) => dropped.push(err),
            }
        }

        let delete = self
            .games
            .keys()
            .filter(|id| !update.contains_key(*id))
            .filter(|id| !dropped.iter().any(|err| err.gameid() == id.as_str()))
            .cloned()
            .collect();

        // A snapshot re-establishes convergence
        self.last_seq = None;
        self.resync_pending = false;

        let mut outcome = self.apply_diff(GameDiff { update, delete });
        for err in dropped {
            self.drop_game(&mut outcome, err);
        }
        outcome
    }

    fn apply_diff(&mut self, diff: GameDiff) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for (gameid, partial) in diff.update {
            match self.merge_record(&gameid, partial) {
                Ok(game) => {
                    self.games.insert(gameid, game);
                    outcome.updated += 1;
                }
                Err(err) => self.drop_game(&mut outcome, err),
            }
        }

        self.remove_all(&diff.delete, &mut outcome);
        outcome
    }

    fn apply_patch_stream(&mut self, stream: PatchStream) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        if let Some(seq) = stream.seq {
            match self.last_seq {
                Some(last) if seq <= last => {
                    debug!(seq, last, "Skipping stale patch stream");
                    outcome.stale = true;
                    return outcome;
                }
                Some(last) if seq > last + 1 => {
                    warn!(seq, last, "Patch stream gap detected");
                    self.request_resync(&mut outcome);
                }
                _ => {}
            }
            self.last_seq = Some(seq);
        }

        for (gameid, ops) in stream.update {
            match self.patch_record(&gameid, &ops) {
                Ok(game) => {
                    self.games.insert(gameid, game);
                    outcome.updated += 1;
                }
                Err(err) => self.drop_game(&mut outcome, err),
            }
        }

        self.remove_all(&stream.delete, &mut outcome);
        outcome
    }

    /// Shallow-merge `partial` over the existing record (or an empty one)
    fn merge_record(&self, gameid: &str, partial: Map<String, Value>) -> Result<Game, ReconcileError> {
        let mut record = self.base_record(gameid)?;
        for (key, value) in partial {
            record.insert(key, value);
        }
        self.finish_record(gameid, record)
    }

    /// Fold `ops` over the existing record (or an empty one)
    fn patch_record(&self, gameid: &str, ops: &[DiffOp]) -> Result<Game, ReconcileError> {
        let base = Value::Object(self.base_record(gameid)?);
        let patched = patch::apply_all(base, ops).map_err(|source| ReconcileError::Patch {
            gameid: gameid.to_string(),
            source,
        })?;
        match patched {
            Value::Object(record) => self.finish_record(gameid, record),
            other => Err(ReconcileError::MalformedRecord {
                gameid: gameid.to_string(),
                reason: format!("patched record is not an object: {}", other),
            }),
        }
    }

    /// Reference tree for merging: the existing record with its collections
    /// guaranteed present, or an empty object for a new game
    fn base_record(&self, gameid: &str) -> Result<Map<String, Value>, ReconcileError> {
        let mut record = match self.games.get(gameid) {
            Some(existing) => existing.to_record().map_err(|e| malformed(gameid, e))?,
            None => Map::new(),
        };
        normalize_record(&mut record);
        Ok(record)
    }

    /// Validate a merged record and hold the immutable fields to the
    /// previous values
    fn finish_record(&self, gameid: &str, record: Map<String, Value>) -> Result<Game, ReconcileError> {
        let mut game = Game::from_record(gameid, record).map_err(|e| malformed(gameid, e))?;

        if let Some(previous) = self.games.get(gameid) {
            if game.room != previous.room || game.date != previous.date {
                debug!(gameid = %gameid, "Ignoring change to immutable game fields");
                game.room = previous.room.clone();
                game.date = previous.date;
            }
            // started is set once and never reverts
            game.started |= previous.started;
        }

        Ok(game)
    }

    fn remove_all(&mut self, ids: &[GameId], outcome: &mut ApplyOutcome) {
        for gameid in ids {
            if self.games.remove(gameid).is_some() {
                outcome.deleted += 1;
            }
        }
    }

    fn drop_game(&mut self, outcome: &mut ApplyOutcome, err: ReconcileError) {
        warn!(gameid = %err.gameid(), error = %err, "Dropping game from mirror");
        self.games.remove(err.gameid());
        outcome.dropped.push(err);
        self.request_resync(outcome);
    }

    fn request_resync(&mut self, outcome: &mut ApplyOutcome) {
        if !self.resync_pending {
            self.resync_pending = true;
            outcome.resync_needed = true;
        }
    }

    pub fn get(&self, gameid: &str) -> Option<&Game> {
        self.games.get(gameid)
    }

    pub fn contains(&self, gameid: &str) -> bool {
        self.games.contains_key(gameid)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    /// All games in `gameid` order
    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Games visible to `viewer`, in display order
    pub fn view(&self, viewer: &Viewer) -> Vec<&Game> {
        ordering::order(viewer, visibility::visible(viewer, self.games.values()))
    }
}

/// Validate one snapshot entry and turn it into a full merge record, with
/// unset optional fields written as explicit nulls
fn snapshot_record(gameid: &str, entry: Value) -> Result<Map<String, Value>, ReconcileError> {
    let Value::Object(record) = entry else {
        return Err(ReconcileError::MalformedRecord {
            gameid: gameid.to_string(),
            reason: "entry is not an object".to_string(),
        });
    };
    Game::from_record(gameid, record)
        .and_then(|game| game.to_full_record())
        .map_err(|e| malformed(gameid, e))
}

fn malformed(gameid: &str, e: serde_json::Error) -> ReconcileError {
    ReconcileError::MalformedRecord {
        gameid: gameid.to_string(),
        reason: e.to_string(),
    }
}
