//! Round-robin CPU-time simulation and deadline-miss projection.
//!
//! [`RrSimulator`] projects, without running anything, which of the
//! currently queued jobs will miss their deadlines and how much CPU time
//! will go unused ("shortfall") before the work buffer runs dry.  The
//! scheduler runs it once per scheduling pass and hands the
//! [`SimOutcome`] to the CPU scheduler and the work-fetch policy.
//!
//! # Model
//! Weighted round-robin is approximated continuously: every project with
//! runnable work gets a CPU rate proportional to its resource share, spread
//! over at most `ncpus` of its own jobs.  The simulation is discrete-event;
//! each event is "the next active job finishes".
//!
//! | Topic | Approach |
//! |---|---|
//! | Scratch state | Fresh `SimContext` per run; the [`Workload`] is read-only |
//! | Job identity | Stable [`JobId`] indices; active/pending sets hold ids |
//! | Tie-breaking | First job in activation order wins; runs are deterministic |
//! | Tracing | [`SimObserver`] hook; the engine itself does no I/O |
//!
//! # Example
//! ```rust,ignore
//! let sim = RrSimulator::new(SimParams::from_config(&config, now));
//! let outcome = sim.run(&workload, &NoActiveTasks, &mut TracingObserver::new(true))?;
//! outcome.apply(&mut workload);
//! ```

pub mod error;
pub mod observer;
pub mod status;

pub use error::SimError;
pub use observer::{NullObserver, ShortfallStep, SimObserver, StepView, TracingObserver};
pub use status::{GlobalSimStatus, ProjectSimStatus};

use std::collections::BTreeMap;

use crate::config::ClientConfig;
use crate::work::{ActiveTaskLookup, JobId, ProjectId, Workload};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Only this fraction of the time left before a deadline is assumed usable.
///
/// A job is projected to miss when it would finish after
/// `now + (deadline - now) * DEADLINE_PESSIMISM_FACTOR`.
pub const DEADLINE_PESSIMISM_FACTOR: f64 = 0.9;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Inputs of one simulation run besides the workload itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Current wall-clock time (seconds since the Unix epoch).
    pub now: f64,
    /// CPUs available for computation.
    pub ncpus: usize,
    /// Look-ahead horizon in seconds.
    pub work_buffer_seconds: f64,
    /// Usable fraction of each CPU, in `(0, 1]`.
    pub overall_cpu_fraction: f64,
    /// RAM jobs may occupy; larger running jobs do not count as misses.
    pub available_ram_bytes: f64,
}

impl SimParams {
    pub fn from_config(config: &ClientConfig, now: f64) -> Self {
        Self {
            now,
            ncpus: config.host.ncpus,
            work_buffer_seconds: config.work_buf_total(),
            overall_cpu_fraction: config.overall_cpu_frac(),
            available_ram_bytes: config.available_ram(),
        }
    }

    fn validate(&self) -> Result<(), SimError> {
        if self.ncpus == 0 {
            return Err(SimError::NoCpus);
        }
        let frac = self.overall_cpu_fraction;
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(SimError::InvalidCpuFraction(frac));
        }
        let horizon = self.work_buffer_seconds;
        if !(horizon >= 0.0 && horizon.is_finite()) {
            return Err(SimError::NegativeHorizon(horizon));
        }
        Ok(())
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Per-job result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JobSimResult {
    pub misses_deadline: bool,
    /// The flag stored by the previous run.
    pub previous_misses_deadline: bool,
    /// Simulated completion time; `None` if the job was not simulated.
    pub finish_time: Option<f64>,
}

/// Per-project result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectSimResult {
    pub deadlines_missed: u32,
    /// Fraction of one CPU each of the project's jobs receives right now.
    pub proc_rate: f64,
    /// CPU seconds this project should have received over the horizon but
    /// had no work for.
    pub cpu_shortfall: f64,
}

/// Everything a simulation run produces.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimOutcome {
    /// One entry for every job in the workload.
    pub jobs: BTreeMap<JobId, JobSimResult>,
    /// One entry for every CPU-intensive project.
    pub projects: BTreeMap<ProjectId, ProjectSimResult>,
    /// Idle CPU seconds before the horizon, over all CPUs.
    pub cpu_shortfall: f64,
    /// Simulated time at which the last job finished (`now` if none ran).
    pub end_time: f64,
}

impl SimOutcome {
    pub fn job(&self, id: JobId) -> Option<&JobSimResult> {
        self.jobs.get(&id)
    }

    pub fn project(&self, id: ProjectId) -> Option<&ProjectSimResult> {
        self.projects.get(&id)
    }

    /// Jobs projected to miss their deadline, in workload order.
    pub fn missed_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs
            .iter()
            .filter(|(_, r)| r.misses_deadline)
            .map(|(&id, _)| id)
    }

    /// Stores each job's miss flag so the next run can report changes.
    pub fn apply(&self, workload: &mut Workload) {
        for (&id, result) in &self.jobs {
            if let Some(job) = workload.job_mut(id) {
                job.misses_deadline = result.misses_deadline;
            }
        }
    }
}

// ── Per-run scratch state ─────────────────────────────────────────────────────

/// Simulation state for one run; dropped when the run ends.
struct SimContext {
    ncpus: usize,
    cpu_frac: f64,
    global: GlobalSimStatus,
    /// CPU-intensive projects only.
    projects: BTreeMap<ProjectId, ProjectSimStatus>,
    /// Remaining CPU seconds of every simulated job.
    cpu_left: BTreeMap<JobId, f64>,
}

impl SimContext {
    fn new(ncpus: usize, cpu_frac: f64) -> Self {
        Self {
            ncpus,
            cpu_frac,
            global: GlobalSimStatus::new(),
            projects: BTreeMap::new(),
            cpu_left: BTreeMap::new(),
        }
    }

    /// Sum of the resource shares of projects that currently have an active
    /// job.
    fn active_share(&self, workload: &Workload) -> f64 {
        self.projects
            .iter()
            .filter(|(_, s)| !s.none_active())
            .map(|(&pid, _)| workload[pid].resource_share)
            .sum()
    }

    /// Recomputes every project's `proc_rate` against `rrs`.
    fn set_proc_rates(&mut self, workload: &Workload, rrs: f64) {
        for (&pid, status) in self.projects.iter_mut() {
            let nactive = status.cpus_used();
            if nactive == 0 {
                status.proc_rate = 0.0;
                continue;
            }
            let mut x = if rrs > 0.0 {
                workload[pid].resource_share / rrs
            } else {
                1.0
            };
            // Too few jobs to use the whole share: each job runs faster.
            if nactive < self.ncpus {
                x *= self.ncpus as f64 / nactive as f64;
            }
            status.proc_rate = x.min(1.0) * self.cpu_frac;
        }
    }

    fn proc_rate(&self, pid: ProjectId) -> f64 {
        self.projects.get(&pid).map_or(0.0, |s| s.proc_rate)
    }

    /// Time until `job` finishes at its project's current rate.
    fn finish_delay(&self, workload: &Workload, job: JobId) -> f64 {
        let pid = workload[job].project;
        let rate = self.proc_rate(pid);
        debug_assert!(
            rate > 0.0 || workload[pid].resource_share == 0.0,
            "active project '{}' has zero proc_rate",
            workload[pid].name
        );
        let left = self.cpu_left.get(&job).copied().unwrap_or(0.0);
        if rate > 0.0 {
            left / rate
        } else {
            f64::INFINITY
        }
    }

    /// The active job that finishes first.  Exact ties go to the job
    /// activated earliest.
    fn next_to_finish(&self, workload: &Workload) -> Option<(JobId, f64)> {
        let mut best: Option<(JobId, f64)> = None;
        for &job in self.global.active() {
            let delay = self.finish_delay(workload, job);
            match best {
                Some((_, d)) if delay >= d => {}
                _ => best = Some((job, delay)),
            }
        }
        best
    }

    /// Removes a finished job and advances every other active job by
    /// `delay` seconds at its project's current rate.
    fn retire(&mut self, workload: &Workload, job: JobId, delay: f64) {
        let pid = workload[job].project;
        self.global.remove_active(job);
        if let Some(status) = self.projects.get_mut(&pid) {
            status.remove_active(job);
        }
        self.cpu_left.remove(&job);

        for &other in self.global.active() {
            let rate = self
                .projects
                .get(&workload[other].project)
                .map_or(0.0, |s| s.proc_rate);
            if rate > 0.0 {
                if let Some(left) = self.cpu_left.get_mut(&other) {
                    *left = (*left - rate * delay).max(0.0);
                }
            }
        }
    }

    /// Moves pending jobs of `pid` into free slots, oldest first.
    fn promote_pending(&mut self, pid: ProjectId) {
        let Some(status) = self.projects.get_mut(&pid) else {
            return;
        };
        while status.can_run(self.ncpus) {
            let Some(next) = status.get_pending() else {
                break;
            };
            status.activate(next);
            self.global.activate(next);
        }
    }

    fn check_invariants(&self) {
        debug_assert!(self.global.len() <= self.ncpus * self.projects.len().max(1));
        debug_assert_eq!(
            self.projects.values().map(|s| s.cpus_used()).sum::<usize>(),
            self.global.len(),
            "project active sets must partition the global active set"
        );
        debug_assert!(
            self.projects.values().all(|s| s.cpus_used() <= self.ncpus),
            "a project holds more slots than there are CPUs"
        );
    }
}

// ── RrSimulator ───────────────────────────────────────────────────────────────

/// The round-robin simulator.  Stateless apart from its parameters; every
/// call to [`run`](Self::run) starts from scratch.
#[derive(Debug, Clone)]
pub struct RrSimulator {
    params: SimParams,
}

impl RrSimulator {
    pub fn new(params: SimParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// Simulates `workload` and returns the projected misses and shortfalls.
    ///
    /// # Errors
    /// Returns a [`SimError`] if the parameters or the workload are invalid.
    /// Validation happens before anything is simulated.
    pub fn run<L, O>(
        &self,
        workload: &Workload,
        lookup: &L,
        observer: &mut O,
    ) -> Result<SimOutcome, SimError>
    where
        L: ActiveTaskLookup + ?Sized,
        O: SimObserver + ?Sized,
    {
        let params = &self.params;
        params.validate()?;
        Self::validate_workload(workload)?;

        let ncpus = params.ncpus;
        let mut ctx = SimContext::new(ncpus, params.overall_cpu_fraction);
        let mut outcome = SimOutcome::default();

        for (pid, project) in workload.projects() {
            if project.is_cpu_intensive() {
                ctx.projects.insert(pid, ProjectSimStatus::new());
            }
        }

        // ── Selection ─────────────────────────────────────────────────────────
        for (jid, job) in workload.jobs() {
            outcome.jobs.insert(
                jid,
                JobSimResult {
                    misses_deadline: false,
                    previous_misses_deadline: job.misses_deadline,
                    finish_time: None,
                },
            );

            if !job.is_nearly_runnable() || job.has_stalled_download() {
                continue;
            }
            let Some(status) = ctx.projects.get_mut(&job.project) else {
                continue; // non-CPU-intensive project
            };
            ctx.cpu_left.insert(jid, job.remaining_cpu_seconds());
            if status.can_run(ncpus) {
                status.activate(jid);
                ctx.global.activate(jid);
            } else {
                status.add_pending(jid);
            }
        }

        let trs: f64 = ctx
            .projects
            .keys()
            .map(|&pid| workload[pid].resource_share)
            .sum();
        let rrs = ctx.active_share(workload);
        observer.on_start(params, rrs, trs);

        // ── Initial rates and zero-job shortfall ──────────────────────────────
        ctx.set_proc_rates(workload, rrs);
        let initial_rates: BTreeMap<ProjectId, f64> = ctx
            .projects
            .iter()
            .map(|(&pid, s)| (pid, s.proc_rate))
            .collect();

        for (&pid, status) in ctx.projects.iter_mut() {
            if status.none_active() {
                let rsf = Self::share_fraction(workload[pid].resource_share, trs);
                status.cpu_shortfall = params.work_buffer_seconds
                    * params.overall_cpu_fraction
                    * ncpus as f64
                    * rsf;
            }
        }

        // ── Event loop ────────────────────────────────────────────────────────
        let buf_end = params.now + params.work_buffer_seconds;
        let mut sim_now = params.now;
        let mut cpu_shortfall = 0.0;

        loop {
            ctx.check_invariants();
            observer.on_step(StepView {
                sim_now,
                global: &ctx.global,
                projects: &ctx.projects,
            });

            let Some((best, delay)) = ctx.next_to_finish(workload) else {
                break;
            };
            let job = &workload[best];
            let pid = job.project;
            let project = &workload[pid];
            observer.on_job_finish(job, project, delay, sim_now);

            // Deadline check
            let diff = sim_now + delay
                - ((job.deadline - params.now) * DEADLINE_PESSIMISM_FACTOR + params.now);
            if diff > 0.0 {
                match lookup.working_set_bytes(best) {
                    Some(ws) if ws > params.available_ram_bytes => {
                        observer.on_miss_suppressed(job, project, ws);
                    }
                    _ => {
                        if let Some(result) = outcome.jobs.get_mut(&best) {
                            result.misses_deadline = true;
                        }
                        if let Some(status) = ctx.projects.get_mut(&pid) {
                            status.deadlines_missed += 1;
                        }
                        observer.on_deadline_miss(job, project, diff);
                    }
                }
            }

            let last_active_size = ctx.global.len();
            let last_proj_active_size = ctx.projects.get(&pid).map_or(0, |s| s.cpus_used());

            ctx.retire(workload, best, delay);
            ctx.promote_pending(pid);

            let project_done = ctx.projects.get(&pid).map_or(true, |s| s.none_active());
            if project_done {
                let rrs = ctx.active_share(workload);
                observer.on_project_done(project, rrs);
                ctx.set_proc_rates(workload, rrs);
            }

            // Shortfall accounting, only inside the horizon
            if sim_now < buf_end {
                let end_time = (sim_now + delay).min(buf_end);
                let d_time = end_time - sim_now;

                let nidle = ncpus.saturating_sub(last_active_size) as f64;
                let global_added = d_time * nidle;
                cpu_shortfall += global_added;

                let rsf = Self::share_fraction(project.resource_share, trs);
                let proj_cpu_share = ncpus as f64 * rsf;
                let mut project_added = 0.0;
                if (last_proj_active_size as f64) < proj_cpu_share {
                    project_added += d_time * (proj_cpu_share - last_proj_active_size as f64);
                }
                // Out of work before the horizon: the rest of its share is lost.
                if end_time < buf_end && project_done {
                    project_added += (buf_end - end_time) * proj_cpu_share;
                }

                if let Some(status) = ctx.projects.get_mut(&pid) {
                    status.cpu_shortfall += project_added;
                    observer.on_shortfall_step(
                        project,
                        ShortfallStep {
                            global_added,
                            project_added,
                            global_total: cpu_shortfall,
                            project_total: status.cpu_shortfall,
                        },
                    );
                }
            }

            sim_now += delay;
            if let Some(result) = outcome.jobs.get_mut(&best) {
                result.finish_time = Some(sim_now);
            }
        }

        if sim_now < buf_end {
            cpu_shortfall += (buf_end - sim_now) * ncpus as f64;
        }

        // ── Results ───────────────────────────────────────────────────────────
        outcome.projects = ctx
            .projects
            .iter()
            .map(|(&pid, s)| {
                (
                    pid,
                    ProjectSimResult {
                        deadlines_missed: s.deadlines_missed,
                        proc_rate: initial_rates.get(&pid).copied().unwrap_or(0.0),
                        cpu_shortfall: s.cpu_shortfall,
                    },
                )
            })
            .collect();
        outcome.cpu_shortfall = cpu_shortfall;
        outcome.end_time = sim_now;

        for (&jid, result) in &outcome.jobs {
            if result.finish_time.is_some()
                && result.misses_deadline != result.previous_misses_deadline
            {
                let job = &workload[jid];
                observer.on_miss_state_changed(job, &workload[job.project], result.misses_deadline);
            }
        }
        observer.on_end(&outcome);

        Ok(outcome)
    }

    /// A project's fraction of the total share; every project counts fully
    /// when no project has a share.
    fn share_fraction(share: f64, total: f64) -> f64 {
        if total > 0.0 {
            share / total
        } else {
            1.0
        }
    }

    fn validate_workload(workload: &Workload) -> Result<(), SimError> {
        for (_, project) in workload.projects() {
            if !(project.resource_share >= 0.0) {
                return Err(SimError::NegativeResourceShare {
                    project: project.name.clone(),
                });
            }
        }
        for (jid, job) in workload.jobs() {
            if workload.project(job.project).is_none() {
                return Err(SimError::UnknownProject {
                    job: jid,
                    project: job.project,
                });
            }
            if !(job.estimated_cpu_seconds >= 0.0)
                || !job.estimated_cpu_seconds.is_finite()
                || !job.remaining_cpu_seconds().is_finite()
            {
                return Err(SimError::NegativeRemaining {
                    job: jid,
                    value: job.estimated_cpu_seconds,
                });
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
