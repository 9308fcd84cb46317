/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scratch state for one simulation run.
//!
//! A job is in at most one of a project's `active` list or `pending` queue.
//! The [`GlobalSimStatus`] active list is always the union of every
//! project's active list.

use std::collections::VecDeque;

use crate::work::JobId;

// ── ProjectSimStatus ──────────────────────────────────────────────────────────

/// Per-project simulation state: which jobs hold a simulated CPU slot and
/// which are waiting, plus the counters the run accumulates.
#[derive(Debug, Clone, Default)]
pub struct ProjectSimStatus {
    active: Vec<JobId>,
    pending: VecDeque<JobId>,

    /// Fraction of one CPU each active job of this project receives.
    /// Zero while the project has no active jobs.
    pub proc_rate: f64,
    pub deadlines_missed: u32,
    pub cpu_shortfall: f64,
}

impl ProjectSimStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets all state for a fresh run.
    pub fn clear(&mut self) {
        self.active.clear();
        self.pending.clear();
        self.proc_rate = 0.0;
        self.deadlines_missed = 0;
        self.cpu_shortfall = 0.0;
    }

    pub fn activate(&mut self, job: JobId) {
        self.active.push(job);
    }

    pub fn add_pending(&mut self, job: JobId) {
        self.pending.push_back(job);
    }

    /// `true` while the project holds fewer than `ncpus` slots.
    pub fn can_run(&self, ncpus: usize) -> bool {
        self.active.len() < ncpus
    }

    /// Pops the oldest pending job.
    pub fn get_pending(&mut self) -> Option<JobId> {
        self.pending.pop_front()
    }

    /// Removes `job` from the active list.  Not found is a no-op.
    pub fn remove_active(&mut self, job: JobId) {
        if let Some(pos) = self.active.iter().position(|&j| j == job) {
            self.active.remove(pos);
        }
    }

    pub fn none_active(&self) -> bool {
        self.active.is_empty()
    }

    pub fn cpus_used(&self) -> usize {
        self.active.len()
    }

    pub fn active(&self) -> &[JobId] {
        &self.active
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// ── GlobalSimStatus ───────────────────────────────────────────────────────────

/// Jobs holding a simulated CPU slot across all projects, in activation
/// order.  The order is what makes tie-breaking deterministic.
#[derive(Debug, Clone, Default)]
pub struct GlobalSimStatus {
    active: Vec<JobId>,
}

impl GlobalSimStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, job: JobId) {
        self.active.push(job);
    }

    /// Removes `job`, preserving the order of the remaining jobs.
    pub fn remove_active(&mut self, job: JobId) {
        if let Some(pos) = self.active.iter().position(|&j| j == job) {
            self.active.remove(pos);
        }
    }

    pub fn active(&self) -> &[JobId] {
        &self.active
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
