//! Cleanup stack.
//!
//! A cleanup is an action registered once and emitted on every edge that
//! leaves its scope: normal fallthrough when the scope is popped, and early
//! `return`/`throw` edges, which emit every active cleanup without popping.
//! Cleanups run in LIFO order.

use crate::compiler::ir::ValueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupHandle(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    DestroyValue(ValueId),
    EndBorrow(ValueId),
    /// Hop back to `ValueId` when the scope ends.
    HopToExecutor(ValueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupState {
    Active,
    /// Forwarded or otherwise disabled; never emitted.
    Dead,
}

#[derive(Debug, Clone, Copy)]
struct CleanupRecord {
    cleanup: Cleanup,
    state: CleanupState,
}

/// Kind of edge a cleanup is emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Fallthrough,
    Return,
    Throw,
}

/// Stack depth captured when a scope is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CleanupDepth(usize);

#[derive(Debug, Default)]
pub struct CleanupStack {
    records: Vec<CleanupRecord>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cleanup: Cleanup) -> CleanupHandle {
        self.records.push(CleanupRecord {
            cleanup,
            state: CleanupState::Active,
        });
        CleanupHandle(self.records.len() - 1)
    }

    pub fn top(&self) -> Option<CleanupHandle> {
        self.records.len().checked_sub(1).map(CleanupHandle)
    }

    pub fn depth(&self) -> CleanupDepth {
        CleanupDepth(self.records.len())
    }

    pub fn get(&self, handle: CleanupHandle) -> Option<Cleanup> {
        self.records.get(handle.0).map(|r| r.cleanup)
    }

    pub fn is_active(&self, handle: CleanupHandle) -> bool {
        self.records
            .get(handle.0)
            .is_some_and(|r| r.state == CleanupState::Active)
    }

    /// Disable a cleanup whose obligation has been handed elsewhere.
    pub fn forward(&mut self, handle: CleanupHandle) {
        if let Some(record) = self.records.get_mut(handle.0) {
            record.state = CleanupState::Dead;
        }
    }

    /// Active cleanups above `depth`, innermost first.
    pub fn active_above(&self, depth: CleanupDepth) -> Vec<Cleanup> {
        self.records[depth.0.min(self.records.len())..]
            .iter()
            .rev()
            .filter(|r| r.state == CleanupState::Active)
            .map(|r| r.cleanup)
            .collect()
    }

    /// Drop every record above `depth`.
    pub fn truncate(&mut self, depth: CleanupDepth) {
        self.records.truncate(depth.0);
    }
}
