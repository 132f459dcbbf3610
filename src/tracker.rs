//! # Modification Tracker
//!
//! A strictly linear undo/redo history for one open document.
//!
//! ```text
//!            checkpoint_index (last save)
//!                   │
//!                   ▼
//!  timeline:  [e1] [e2] [e3] [e4]        future_stack: [e6] [e5] ◄─ top
//!             └─committed─┘ └uncommitted┘
//! ```
//!
//! - [`ModificationTracker::record`] appends and clears the future stack
//!   (a new edit after undo discards the old branch; there is no tree).
//! - [`ModificationTracker::step_back`] / [`ModificationTracker::step_forward`]
//!   move one entry between the two stacks and hand it to the caller. The
//!   tracker does no I/O; the caller runs the inverse or forward operation.
//! - The timeline is capped at `max_entries`. Trimming drops the oldest
//!   entries and shifts the checkpoint down, floored at 0. Entries older than
//!   the save point are already on disk, so forgetting them loses nothing.
//!
//! ## Invariants
//!
//! - `0 <= checkpoint_index <= timeline.len()`
//! - `timeline.len() <= max_entries`
//! - the file on disk equals `timeline[..checkpoint_index]` followed by
//!   `saved_tail`
//!
//! ## Undoing Past the Save Point
//!
//! Undo can move the timeline below the checkpoint. The checkpoint is clamped
//! to the timeline length and the undone entries go into `saved_tail`: they
//! are still applied on disk but no longer in memory. Redoing them walks the
//! checkpoint back up. A revert reapplies the tail so memory matches disk
//! again, and a hot-exit restore undoes the tail against the file before
//! replaying the uncommitted entries.
//!
//! ## Hot-Exit Backups
//!
//! [`ModificationTracker::serialize`] writes
//! `{ "timeline": [...], "checkpointIndex": n }` as UTF-8 JSON, plus
//! `"savedTail"` when it is not empty. Binary cells inside entries use the
//! tagged base64 form from [`crate::types`], so a blob comes back as a blob.
//! On reopen only the entries after the checkpoint are replayed.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::modification::ModificationEntry;

/// Default cap on remembered modifications.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Persisted form of a tracker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackerBackup {
    timeline: Vec<ModificationEntry>,
    checkpoint_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    saved_tail: Vec<ModificationEntry>,
}

/// Undo/redo timeline with a save checkpoint.
#[derive(Debug, Clone)]
pub struct ModificationTracker {
    timeline: Vec<ModificationEntry>,
    future_stack: Vec<ModificationEntry>,
    checkpoint_index: usize,
    max_entries: usize,

    /// Entries on disk beyond `timeline[..checkpoint_index]`, oldest first.
    saved_tail: Vec<ModificationEntry>,
}

impl Default for ModificationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ModificationTracker {
    /// Creates an empty tracker. A capacity of 0 is treated as 1.
    pub fn new(max_entries: usize) -> Self {
        Self {
            timeline: Vec::new(),
            future_stack: Vec::new(),
            checkpoint_index: 0,
            max_entries: max_entries.max(1),
            saved_tail: Vec::new(),
        }
    }

    // =========================================================================
    // Recording and Stepping
    // =========================================================================

    /// Appends an entry, discards redo history and enforces the capacity.
    pub fn record(&mut self, entry: ModificationEntry) {
        self.timeline.push(entry);
        self.future_stack.clear();
        self.trim();
    }

    fn trim(&mut self) {
        if self.timeline.len() > self.max_entries {
            let excess = self.timeline.len() - self.max_entries;
            self.timeline.drain(..excess);
            self.checkpoint_index = self.checkpoint_index.saturating_sub(excess);
        }
    }

    /// The entry [`step_back`](Self::step_back) would return.
    pub fn peek_back(&self) -> Option<&ModificationEntry> {
        self.timeline.last()
    }

    /// The entry [`step_forward`](Self::step_forward) would return.
    pub fn peek_forward(&self) -> Option<&ModificationEntry> {
        self.future_stack.last()
    }

    /// Moves the newest entry to the redo stack and returns it.
    pub fn step_back(&mut self) -> Option<ModificationEntry> {
        let entry = self.timeline.pop()?;
        if self.checkpoint_index > self.timeline.len() {
            self.checkpoint_index = self.timeline.len();
            self.saved_tail.insert(0, entry.clone());
        }
        self.future_stack.push(entry.clone());
        Some(entry)
    }

    /// Moves the top of the redo stack back onto the timeline and returns it.
    pub fn step_forward(&mut self) -> Option<ModificationEntry> {
        let entry = self.future_stack.pop()?;
        if self.timeline.len() == self.checkpoint_index && self.saved_tail.first() == Some(&entry) {
            self.saved_tail.remove(0);
            self.checkpoint_index += 1;
        }
        self.timeline.push(entry.clone());
        Some(entry)
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// True if the timeline differs from what was last saved.
    pub fn has_uncommitted_changes(&self) -> bool {
        self.timeline.len() != self.checkpoint_index || !self.saved_tail.is_empty()
    }

    /// Marks the current position as saved.
    pub fn create_checkpoint(&mut self) {
        self.checkpoint_index = self.timeline.len();
        self.saved_tail.clear();
    }

    /// Entries recorded since the last save, oldest first.
    pub fn uncommitted_entries(&self) -> &[ModificationEntry] {
        &self.timeline[self.checkpoint_index..]
    }

    /// Entries that are saved on disk but undone in memory, oldest first.
    pub fn saved_tail(&self) -> &[ModificationEntry] {
        &self.saved_tail
    }

    /// Makes the timeline match the saved file again.
    ///
    /// Used on revert: the document reloads from disk. Entries after the
    /// checkpoint move to the redo stack in their original order, so the
    /// discarded edits stay redoable. Entries in the saved tail are put back
    /// on the timeline. If the saved tail was reached through a different
    /// branch, the discarded branch cannot be redone on the saved state and is
    /// dropped. Returns how many entries moved off the timeline.
    pub fn rollback_to_checkpoint(&mut self) -> usize {
        let undone = self.timeline.split_off(self.checkpoint_index);
        let count = undone.len();

        if self.saved_tail.is_empty() {
            self.future_stack.extend(undone.into_iter().rev());
        } else {
            for entry in std::mem::take(&mut self.saved_tail) {
                if self.future_stack.last() == Some(&entry) {
                    self.future_stack.pop();
                } else {
                    self.future_stack.clear();
                }
                self.timeline.push(entry);
            }
            if count > 0 {
                self.future_stack.clear();
            }
            self.checkpoint_index = self.timeline.len();
            self.trim();
        }

        count
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn timeline(&self) -> &[ModificationEntry] {
        &self.timeline
    }

    pub fn checkpoint_index(&self) -> usize {
        self.checkpoint_index
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn can_undo(&self) -> bool {
        !self.timeline.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future_stack.is_empty()
    }

    // =========================================================================
    // Backup Codec
    // =========================================================================

    /// Encodes the timeline and checkpoint for hot-exit backup.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let backup = TrackerBackup {
            timeline: self.timeline.clone(),
            checkpoint_index: self.checkpoint_index,
            saved_tail: self.saved_tail.clone(),
        };
        Ok(serde_json::to_vec(&backup)?)
    }

    /// Decodes a backup produced by [`serialize`](Self::serialize).
    ///
    /// The redo stack is not part of a backup and starts empty.
    pub fn deserialize(bytes: &[u8], max_entries: usize) -> Result<Self> {
        let backup: TrackerBackup = serde_json::from_slice(bytes)
            .map_err(|e| Error::Backup(format!("undecodable modification history: {e}")))?;

        if backup.checkpoint_index > backup.timeline.len() {
            return Err(Error::Backup(format!(
                "checkpoint index {} beyond timeline length {}",
                backup.checkpoint_index,
                backup.timeline.len()
            )));
        }

        let mut tracker = Self::new(max_entries);
        tracker.timeline = backup.timeline;
        tracker.checkpoint_index = backup.checkpoint_index;
        tracker.saved_tail = backup.saved_tail;
        tracker.trim();
        Ok(tracker)
    }
}

// =============================================================================
// Tests
// =============================================================================
