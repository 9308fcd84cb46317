/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Observation hooks for the round-robin simulation.
//!
//! The engine performs no I/O.  Everything worth logging is reported through
//! [`SimObserver`] at fixed points of the run; [`TracingObserver`] turns
//! those calls into `tracing` events.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::status::{GlobalSimStatus, ProjectSimStatus};
use super::{SimOutcome, SimParams};
use crate::work::{Job, Project, ProjectId};

/// Read-only view of the simulation state between two events.
#[derive(Clone, Copy)]
pub struct StepView<'a> {
    pub sim_now: f64,
    pub global: &'a GlobalSimStatus,
    pub projects: &'a BTreeMap<ProjectId, ProjectSimStatus>,
}

impl StepView<'_> {
    /// Sum of every project's active count.
    pub fn project_active_total(&self) -> usize {
        self.projects.values().map(|s| s.cpus_used()).sum()
    }

    /// Largest active count of any single project.
    pub fn max_project_active(&self) -> usize {
        self.projects
            .values()
            .map(|s| s.cpus_used())
            .max()
            .unwrap_or(0)
    }
}

/// Shortfall accrued during one simulated interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShortfallStep {
    /// Idle-CPU seconds added to the global shortfall.
    pub global_added: f64,
    /// CPU seconds added to the finishing job's project.
    pub project_added: f64,
    /// Global shortfall after this step.
    pub global_total: f64,
    /// Project shortfall after this step.
    pub project_total: f64,
}

/// Hook points of a simulation run.  Every method defaults to a no-op.
pub trait SimObserver {
    fn on_start(&mut self, _params: &SimParams, _rrs: f64, _trs: f64) {}

    /// Called before each event is selected.
    fn on_step(&mut self, _view: StepView<'_>) {}

    fn on_job_finish(&mut self, _job: &Job, _project: &Project, _finish_delay: f64, _sim_now: f64) {}

    /// `by` is how many seconds past the pessimistic deadline the job ends.
    fn on_deadline_miss(&mut self, _job: &Job, _project: &Project, _by: f64) {}

    /// A projected miss was not counted because the running instance does
    /// not fit in the allowed RAM.
    fn on_miss_suppressed(&mut self, _job: &Job, _project: &Project, _working_set: f64) {}

    /// `project` ran out of active jobs; `rrs` is the remaining share.
    fn on_project_done(&mut self, _project: &Project, _rrs: f64) {}

    fn on_shortfall_step(&mut self, _project: &Project, _step: ShortfallStep) {}

    /// A job's miss flag differs from the previous run.
    fn on_miss_state_changed(&mut self, _job: &Job, _project: &Project, _misses: bool) {}

    fn on_end(&mut self, _outcome: &SimOutcome) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SimObserver for NullObserver {}

/// Emits `tracing` events.
///
/// Per-event detail is only emitted when `verbose` is set (the
/// `rr_simulation` log flag).  Miss-state changes are always logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver {
    verbose: bool,
}

impl TracingObserver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl SimObserver for TracingObserver {
    fn on_start(&mut self, params: &SimParams, rrs: f64, trs: f64) {
        if self.verbose {
            debug!(
                work_buf_total = params.work_buffer_seconds,
                rrs,
                trs,
                ncpus = params.ncpus,
                "[rr_sim] start"
            );
        }
    }

    fn on_job_finish(&mut self, job: &Job, project: &Project, finish_delay: f64, sim_now: f64) {
        if self.verbose {
            debug!(
                project = %project.name,
                job = %job.name,
                finish_delay,
                sim_now,
                "[rr_sim] job finishes"
            );
        }
    }

    fn on_deadline_miss(&mut self, job: &Job, project: &Project, by: f64) {
        if self.verbose {
            debug!(
                project = %project.name,
                job = %job.name,
                by,
                "[rr_sim] misses deadline"
            );
        }
    }

    fn on_miss_suppressed(&mut self, job: &Job, project: &Project, working_set: f64) {
        if self.verbose {
            debug!(
                project = %project.name,
                job = %job.name,
                working_set,
                "[rr_sim] misses deadline but too large to run"
            );
        }
    }

    fn on_project_done(&mut self, project: &Project, rrs: f64) {
        if self.verbose {
            debug!(project = %project.name, rrs, "[rr_sim] project out of work");
        }
    }

    fn on_shortfall_step(&mut self, project: &Project, step: ShortfallStep) {
        if self.verbose {
            debug!(
                project = %project.name,
                global_added = step.global_added,
                project_added = step.project_added,
                global_total = step.global_total,
                project_total = step.project_total,
                "[rr_sim] shortfall"
            );
        }
    }

    fn on_miss_state_changed(&mut self, job: &Job, project: &Project, misses: bool) {
        if misses {
            info!(project = %project.name, job = %job.name, "Result projected to miss deadline");
        } else {
            info!(
                project = %project.name,
                job = %job.name,
                "Result projected to meet deadline"
            );
        }
    }

    fn on_end(&mut self, outcome: &SimOutcome) {
        if self.verbose {
            debug!(
                cpu_shortfall = outcome.cpu_shortfall,
                end_time = outcome.end_time,
                missed = outcome.missed_jobs().count(),
                "[rr_sim] done"
            );
        }
    }
}
