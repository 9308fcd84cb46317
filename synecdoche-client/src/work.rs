/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Read-only view of the projects and jobs known to the client.
//!
//! The round-robin simulation never owns or mutates these values while it
//! runs; it reads a [`Workload`] and produces a separate
//! [`SimOutcome`](crate::rr_sim::SimOutcome).  The only write-back is
//! [`SimOutcome::apply`](crate::rr_sim::SimOutcome::apply), which stores each
//! job's miss flag so the next run can detect changes.
//!
//! ```text
//! Workload ──(read)──► RrSimulator ──► SimOutcome ──(apply)──► Workload
//! ```
//!
//! # Identity
//! Projects and jobs live in index-stable arenas.  [`ProjectId`] and
//! [`JobId`] are plain indices, so simulation scratch state can refer to jobs
//! without borrowing them.
//!
//! The YAML layout accepted by [`Workload::load_from_file`]:
//! ```yaml
//! projects:
//!   - name: "einstein"
//!     resource_share: 100
//! jobs:
//!   - name: "wu_1"
//!     project: "einstein"
//!     state: running
//!     estimated_cpu_seconds: 3600
//!     deadline: 1700086400
//!     working_set_bytes: 2.5e8   # optional, running instances only
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Index of a [`Project`] inside its [`Workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub usize);

/// Index of a [`Job`] inside its [`Workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

// ── Job state ─────────────────────────────────────────────────────────────────

/// Lifecycle state of a job as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Input files are still being fetched.
    Downloading,
    /// All input present, waiting for a CPU.
    #[default]
    Ready,
    /// Currently executing.
    Running,
    /// Suspended by the user.
    Suspended,
    /// Computation finished, output being uploaded.
    Uploading,
    /// Fully reported.
    Done,
}

impl JobState {
    /// `true` for jobs that are running, runnable, or will be runnable as
    /// soon as their download completes.
    pub fn is_nearly_runnable(self) -> bool {
        matches!(
            self,
            JobState::Downloading | JobState::Ready | JobState::Running
        )
    }
}

// ── Project ───────────────────────────────────────────────────────────────────

/// A project the client is attached to.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,

    /// Non-negative fair-share weight.
    pub resource_share: f64,

    /// Projects whose applications use negligible CPU (e.g. network
    /// monitors) are excluded from CPU scheduling.
    pub non_cpu_intensive: bool,
}

impl Project {
    pub fn new(name: impl Into<String>, resource_share: f64) -> Self {
        Self {
            name: name.into(),
            resource_share,
            non_cpu_intensive: false,
        }
    }

    pub fn is_cpu_intensive(&self) -> bool {
        !self.non_cpu_intensive
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

/// One unit of work downloaded from a project.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub project: ProjectId,
    pub state: JobState,

    /// Server-provided estimate of total CPU time, in seconds.
    pub estimated_cpu_seconds: f64,

    /// CPU time already consumed by a running or preempted instance.
    pub cpu_time_so_far: f64,

    /// Progress reported by the application, in `[0, 1]`.
    pub fraction_done: f64,

    /// Absolute report deadline (seconds since the Unix epoch).
    pub deadline: f64,

    /// Always 1 in the simulation; kept for the scheduler proper.
    pub cpus_required: u32,

    /// A required input file has stopped making download progress.
    pub download_stalled: bool,

    /// Miss flag stored by the previous simulation run.
    pub misses_deadline: bool,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        project: ProjectId,
        estimated_cpu_seconds: f64,
        deadline: f64,
    ) -> Self {
        Self {
            name: name.into(),
            project,
            state: JobState::Ready,
            estimated_cpu_seconds,
            cpu_time_so_far: 0.0,
            fraction_done: 0.0,
            deadline,
            cpus_required: 1,
            download_stalled: false,
            misses_deadline: false,
        }
    }

    pub fn is_nearly_runnable(&self) -> bool {
        self.state.is_nearly_runnable()
    }

    pub fn has_stalled_download(&self) -> bool {
        self.download_stalled
    }

    /// Estimated CPU seconds still needed to complete this job.
    ///
    /// Once the application reports progress, the static estimate is blended
    /// with the extrapolation `cpu_time_so_far / fraction_done`, trusting the
    /// extrapolation more as the job nears completion.  Never negative.
    pub fn remaining_cpu_seconds(&self) -> f64 {
        let total = if self.fraction_done > 0.0 && self.cpu_time_so_far > 0.0 {
            let done = self.fraction_done.min(1.0);
            let extrapolated = self.cpu_time_so_far / done;
            done * extrapolated + (1.0 - done) * self.estimated_cpu_seconds
        } else {
            self.estimated_cpu_seconds
        };
        (total - self.cpu_time_so_far).max(0.0)
    }
}

// ── Active-task lookup ────────────────────────────────────────────────────────

/// Access to the processes currently executing jobs.
///
/// Only used to suppress deadline-miss flags for jobs whose running instance
/// is already too large to fit in the RAM the user allows.
pub trait ActiveTaskLookup {
    /// Smoothed working-set size of the running instance of `job`, or
    /// `None` if the job has no running instance.
    fn working_set_bytes(&self, job: JobId) -> Option<f64>;
}

/// Lookup for hosts with nothing running (and for tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActiveTasks;

impl ActiveTaskLookup for NoActiveTasks {
    fn working_set_bytes(&self, _job: JobId) -> Option<f64> {
        None
    }
}

/// Working sets recorded in the workload itself, as a standalone client
/// reads them from its state file.
impl ActiveTaskLookup for Workload {
    fn working_set_bytes(&self, job: JobId) -> Option<f64> {
        self.working_sets.get(&job).copied()
    }
}

impl ActiveTaskLookup for HashMap<JobId, f64> {
    fn working_set_bytes(&self, job: JobId) -> Option<f64> {
        self.get(&job).copied()
    }
}

// ── Workload ──────────────────────────────────────────────────────────────────

/// All projects and jobs known to the client, in arrival order.
///
/// Arrival order matters: the simulation breaks exact ties by taking the
/// first job in this list.
#[derive(Debug, Clone, Default)]
pub struct Workload {
    projects: Vec<Project>,
    jobs: Vec<Job>,
    /// Last measured working set of each running instance.
    working_sets: HashMap<JobId, f64>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, project: Project) -> ProjectId {
        self.projects.push(project);
        ProjectId(self.projects.len() - 1)
    }

    pub fn add_job(&mut self, job: Job) -> JobId {
        self.jobs.push(job);
        JobId(self.jobs.len() - 1)
    }

    /// Records the working set of the running instance of `job`.
    pub fn set_working_set(&mut self, job: JobId, bytes: f64) {
        self.working_sets.insert(job, bytes);
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id.0)
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.0)
    }

    pub fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id.0)
    }

    pub fn projects(&self) -> impl Iterator<Item = (ProjectId, &Project)> {
        self.projects
            .iter()
            .enumerate()
            .map(|(i, p)| (ProjectId(i), p))
    }

    pub fn jobs(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter().enumerate().map(|(i, j)| (JobId(i), j))
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn find_project(&self, name: &str) -> Option<ProjectId> {
        self.projects
            .iter()
            .position(|p| p.name == name)
            .map(ProjectId)
    }

    /// Parses a workload description from `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is invalid, or a
    /// job names a project that is not declared.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading workload from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open workload file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid workload file: {}", path.display()))
    }

    /// Parses a workload description from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: WorkloadFile = serde_yaml::from_str(content).context("Failed to parse YAML")?;

        let mut workload = Workload::new();
        for entry in file.projects {
            workload.add_project(Project {
                name: entry.name,
                resource_share: entry.resource_share,
                non_cpu_intensive: entry.non_cpu_intensive,
            });
        }

        for entry in file.jobs {
            let Some(project) = workload.find_project(&entry.project) else {
                bail!(
                    "job '{}' refers to unknown project '{}'",
                    entry.name,
                    entry.project
                );
            };
            debug!(
                "  Job: {} | project: {} | est: {:.0}s | deadline: {:.0}",
                entry.name, entry.project, entry.estimated_cpu_seconds, entry.deadline
            );
            let id = workload.add_job(Job {
                name: entry.name,
                project,
                state: entry.state,
                estimated_cpu_seconds: entry.estimated_cpu_seconds,
                cpu_time_so_far: entry.cpu_time_so_far,
                fraction_done: entry.fraction_done,
                deadline: entry.deadline,
                cpus_required: 1,
                download_stalled: entry.download_stalled,
                misses_deadline: false,
            });
            match entry.working_set_bytes {
                Some(bytes) if entry.state == JobState::Running => {
                    workload.set_working_set(id, bytes);
                }
                Some(_) => warn!(
                    "ignoring working_set_bytes of job '{}': it is not running",
                    workload[id].name
                ),
                None => {}
            }
        }

        info!(
            projects = workload.project_count(),
            jobs = workload.job_count(),
            "Workload loaded"
        );
        Ok(workload)
    }
}

/// Panics on an id from another workload, like slice indexing.
impl std::ops::Index<ProjectId> for Workload {
    type Output = Project;

    fn index(&self, id: ProjectId) -> &Project {
        &self.projects[id.0]
    }
}

impl std::ops::Index<JobId> for Workload {
    type Output = Job;

    fn index(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }
}

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WorkloadFile {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
    #[serde(default = "default_resource_share")]
    resource_share: f64,
    #[serde(default)]
    non_cpu_intensive: bool,
}

fn default_resource_share() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    name: String,
    project: String,
    #[serde(default)]
    state: JobState,
    estimated_cpu_seconds: f64,
    #[serde(default)]
    cpu_time_so_far: f64,
    #[serde(default)]
    fraction_done: f64,
    deadline: f64,
    #[serde(default)]
    download_stalled: bool,
    #[serde(default)]
    working_set_bytes: Option<f64>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── JobState ──────────────────────────────────────────────────────────────

    #[test]
    fn nearly_runnable_states() {
        assert!(JobState::Downloading.is_nearly_runnable());
        assert!(JobState::Ready.is_nearly_runnable());
        assert!(JobState::Running.is_nearly_runnable());
        assert!(!JobState::Suspended.is_nearly_runnable());
        assert!(!JobState::Uploading.is_nearly_runnable());
        assert!(!JobState::Done.is_nearly_runnable());
    }

    // ── Job::remaining_cpu_seconds ────────────────────────────────────────────

    #[test]
    fn remaining_without_progress_is_estimate() {
        let job = Job::new("j", ProjectId(0), 100.0, 0.0);
        assert_eq!(job.remaining_cpu_seconds(), 100.0);
    }

    #[test]
    fn remaining_blends_estimate_with_progress() {
        let mut job = Job::new("j", ProjectId(0), 100.0, 0.0);
        job.cpu_time_so_far = 50.0;
        job.fraction_done = 0.25;
        // extrapolated total 200, blended 0.25*200 + 0.75*100 = 125
        assert!((job.remaining_cpu_seconds() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn remaining_is_never_negative() {
        let mut job = Job::new("j", ProjectId(0), 10.0, 0.0);
        job.cpu_time_so_far = 50.0;
        assert_eq!(job.remaining_cpu_seconds(), 0.0);
    }

    // ── ActiveTaskLookup ──────────────────────────────────────────────────────

    #[test]
    fn hashmap_lookup_finds_running_instance() {
        let mut map = HashMap::new();
        map.insert(JobId(3), 1.5e9);
        assert_eq!(map.working_set_bytes(JobId(3)), Some(1.5e9));
        assert_eq!(map.working_set_bytes(JobId(4)), None);
        assert_eq!(NoActiveTasks.working_set_bytes(JobId(3)), None);
    }

    // ── Workload ──────────────────────────────────────────────────────────────

    #[test]
    fn ids_follow_insertion_order() {
        let mut w = Workload::new();
        let p = w.add_project(Project::new("p", 1.0));
        let a = w.add_job(Job::new("a", p, 1.0, 0.0));
        let b = w.add_job(Job::new("b", p, 1.0, 0.0));
        assert_eq!(a, JobId(0));
        assert_eq!(b, JobId(1));
        let names: Vec<_> = w.jobs().map(|(_, j)| j.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(w.find_project("p"), Some(p));
        assert_eq!(w.find_project("q"), None);
    }

    #[test]
    fn yaml_workload_parses() {
        let yaml = r#"
projects:
  - name: "alpha"
    resource_share: 50
  - name: "monitor"
    non_cpu_intensive: true
jobs:
  - name: "a1"
    project: "alpha"
    state: running
    estimated_cpu_seconds: 3600
    cpu_time_so_far: 600
    fraction_done: 0.2
    deadline: 1000000
  - name: "m1"
    project: "monitor"
    estimated_cpu_seconds: 10
    deadline: 2000000
    download_stalled: true
"#;
        let w = Workload::from_yaml(yaml).unwrap();
        assert_eq!(w.project_count(), 2);
        assert_eq!(w.job_count(), 2);

        let alpha = w.project(ProjectId(0)).unwrap();
        assert_eq!(alpha.resource_share, 50.0);
        let monitor = w.project(ProjectId(1)).unwrap();
        assert_eq!(monitor.resource_share, 100.0); // default
        assert!(!monitor.is_cpu_intensive());

        let a1 = w.job(JobId(0)).unwrap();
        assert_eq!(a1.state, JobState::Running);
        assert_eq!(a1.project, ProjectId(0));
        let m1 = w.job(JobId(1)).unwrap();
        assert_eq!(m1.state, JobState::Ready); // default
        assert!(m1.has_stalled_download());
    }

    #[test]
    fn yaml_job_with_unknown_project_is_rejected() {
        let yaml = r#"
projects: []
jobs:
  - name: "orphan"
    project: "nowhere"
    estimated_cpu_seconds: 1
    deadline: 1
"#;
        assert!(Workload::from_yaml(yaml).is_err());
    }

    #[test]
    fn yaml_working_set_is_kept_for_running_jobs_only() {
        let yaml = r#"
projects:
  - name: "p"
jobs:
  - name: "running"
    project: "p"
    state: running
    estimated_cpu_seconds: 10
    deadline: 100
    working_set_bytes: 2.0e9
  - name: "queued"
    project: "p"
    estimated_cpu_seconds: 10
    deadline: 100
    working_set_bytes: 3.0e9
"#;
        let w = Workload::from_yaml(yaml).unwrap();
        assert_eq!(w.working_set_bytes(JobId(0)), Some(2.0e9));
        assert_eq!(w.working_set_bytes(JobId(1)), None);
    }

    #[test]
    fn missing_workload_file_returns_error() {
        assert!(Workload::load_from_file(Path::new("/nonexistent/workload.yaml")).is_err());
    }
}
