/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end round-robin simulation scenarios.

use std::collections::HashMap;

use synecdoche_client::rr_sim::{
    NullObserver, RrSimulator, SimObserver, SimOutcome, SimParams, StepView,
};
use synecdoche_client::work::{Job, JobId, NoActiveTasks, Project, Workload};

const NOW: f64 = 1_700_000_000.0;
const EPS: f64 = 1e-9;

fn params(ncpus: usize, horizon: f64, cpu_frac: f64) -> SimParams {
    SimParams {
        now: NOW,
        ncpus,
        work_buffer_seconds: horizon,
        overall_cpu_fraction: cpu_frac,
        available_ram_bytes: 4e9,
    }
}

fn run(workload: &Workload, p: SimParams) -> SimOutcome {
    RrSimulator::new(p)
        .run(workload, &NoActiveTasks, &mut NullObserver)
        .unwrap()
}

fn far() -> f64 {
    NOW + 1e9
}

// ── Scenario 1: single job ────────────────────────────────────────────────────

#[test]
fn single_job_runs_at_cpu_fraction() {
    let mut w = Workload::new();
    let p = w.add_project(Project::new("solo", 100.0));
    let j = w.add_job(Job::new("solo_1", p, 10.0, far()));

    let out = run(&w, params(1, 100.0, 0.5));

    assert!((out.project(p).unwrap().proc_rate - 0.5).abs() < EPS);
    let finish = out.job(j).unwrap().finish_time.unwrap();
    assert!((finish - (NOW + 20.0)).abs() < EPS);
    // Idle from t=20 to the horizon at t=100.
    assert!((out.cpu_shortfall - 80.0).abs() < EPS);
    assert!((out.project(p).unwrap().cpu_shortfall - 80.0).abs() < EPS);
}

#[test]
fn single_job_longer_than_horizon_has_no_shortfall() {
    let mut w = Workload::new();
    let p = w.add_project(Project::new("solo", 100.0));
    w.add_job(Job::new("solo_1", p, 10.0, far()));

    let out = run(&w, params(1, 10.0, 0.5));

    assert_eq!(out.cpu_shortfall, 0.0);
    assert_eq!(out.project(p).unwrap().cpu_shortfall, 0.0);
}

// ── Scenario 2: two equal projects on two CPUs ────────────────────────────────

#[test]
fn equal_projects_finish_together() {
    let mut w = Workload::new();
    let a = w.add_project(Project::new("a", 1.0));
    let b = w.add_project(Project::new("b", 1.0));
    let ja = w.add_job(Job::new("a_1", a, 20.0, far()));
    let jb = w.add_job(Job::new("b_1", b, 20.0, far()));

    let out = run(&w, params(2, 20.0, 1.0));

    assert!((out.project(a).unwrap().proc_rate - 1.0).abs() < EPS);
    assert!((out.project(b).unwrap().proc_rate - 1.0).abs() < EPS);
    let fa = out.job(ja).unwrap().finish_time.unwrap();
    let fb = out.job(jb).unwrap().finish_time.unwrap();
    assert!((fa - (NOW + 20.0)).abs() < EPS);
    assert!((fb - fa).abs() < EPS);
    assert!(out.cpu_shortfall.abs() < EPS);
}

// ── Scenario 3: project without work ──────────────────────────────────────────

#[test]
fn idle_project_gets_up_front_shortfall() {
    let mut w = Workload::new();
    let idle = w.add_project(Project::new("idle", 0.5));
    let busy = w.add_project(Project::new("busy", 0.5));
    w.add_job(Job::new("busy_1", busy, 1e6, far()));
    w.add_job(Job::new("busy_2", busy, 1e6, far()));

    let out = run(&w, params(2, 100.0, 1.0));

    assert!((out.project(idle).unwrap().cpu_shortfall - 100.0).abs() < EPS);
    assert_eq!(out.project(idle).unwrap().deadlines_missed, 0);
}

// ── Scenario 4: late job ──────────────────────────────────────────────────────

#[test]
fn late_job_counts_one_miss() {
    let mut w = Workload::new();
    let p = w.add_project(Project::new("p", 100.0));
    let late = w.add_job(Job::new("late", p, 100.0, NOW + 50.0));
    let fine = w.add_job(Job::new("fine", p, 10.0, far()));

    let out = run(&w, params(2, 0.0, 1.0));

    assert!(out.job(late).unwrap().misses_deadline);
    assert!(!out.job(fine).unwrap().misses_deadline);
    assert_eq!(out.project(p).unwrap().deadlines_missed, 1);
    assert_eq!(out.missed_jobs().collect::<Vec<_>>(), vec![late]);
}

#[test]
fn oversized_working_set_suppresses_miss() {
    let mut w = Workload::new();
    let p = w.add_project(Project::new("p", 100.0));
    let late = w.add_job(Job::new("late", p, 100.0, NOW + 50.0));

    let mut p_ram = params(1, 0.0, 1.0);
    p_ram.available_ram_bytes = 1e9;
    let lookup: HashMap<JobId, f64> = [(late, 2e9)].into_iter().collect();
    let out = RrSimulator::new(p_ram)
        .run(&w, &lookup, &mut NullObserver)
        .unwrap();

    assert!(!out.job(late).unwrap().misses_deadline);
    assert_eq!(out.project(p).unwrap().deadlines_missed, 0);
}

#[test]
fn working_set_from_workload_file_suppresses_miss() {
    let yaml = format!(
        r#"
projects:
  - name: "p"
jobs:
  - name: "late"
    project: "p"
    state: running
    estimated_cpu_seconds: 100
    deadline: {deadline}
    working_set_bytes: 2.0e9
"#,
        deadline = NOW + 50.0
    );
    let w = Workload::from_yaml(&yaml).unwrap();
    let late = w.jobs().next().unwrap().0;

    let mut p_ram = params(1, 0.0, 1.0);
    p_ram.available_ram_bytes = 1e9;
    let out = RrSimulator::new(p_ram)
        .run(&w, &w, &mut NullObserver)
        .unwrap();
    assert!(!out.job(late).unwrap().misses_deadline);

    // Enough RAM: the same job is flagged.
    p_ram.available_ram_bytes = 4e9;
    let out = RrSimulator::new(p_ram).run(&w, &w, &mut NullObserver).unwrap();
    assert!(out.job(late).unwrap().misses_deadline);
}

// ── Shortfall accounting ──────────────────────────────────────────────────────

#[test]
fn lone_job_on_two_cpus_leaves_one_idle() {
    // One CPU idle for the 10 s the job runs, both idle for the remaining 90 s.
    let mut w = Workload::new();
    let p = w.add_project(Project::new("solo", 100.0));
    w.add_job(Job::new("solo_1", p, 10.0, far()));

    let out = run(&w, params(2, 100.0, 1.0));

    assert!((out.cpu_shortfall - 190.0).abs() < EPS, "{}", out.cpu_shortfall);
    // Under its 2-CPU share by one while running (10), then out of work
    // for 90 s at a 2-CPU share (180).
    assert!((out.project(p).unwrap().cpu_shortfall - 190.0).abs() < EPS);
}

#[test]
fn project_running_dry_early_is_charged_its_share() {
    // Shares 3:1 on two CPUs: fair shares of 1.5 and 0.5 CPUs.
    let mut w = Workload::new();
    let big = w.add_project(Project::new("big", 3.0));
    let small = w.add_project(Project::new("small", 1.0));
    w.add_job(Job::new("big_1", big, 10.0, far()));
    let long = w.add_job(Job::new("small_1", small, 1000.0, far()));

    let out = run(&w, params(2, 100.0, 1.0));

    assert!((out.project(big).unwrap().proc_rate - 1.0).abs() < EPS);
    assert!((out.project(small).unwrap().proc_rate - 0.5).abs() < EPS);

    // big: 0.5 CPU short for 10 s, then 1.5 CPUs for the remaining 90 s.
    assert!((out.project(big).unwrap().cpu_shortfall - 140.0).abs() < EPS);
    // small never ran below its half-CPU share.
    assert_eq!(out.project(small).unwrap().cpu_shortfall, 0.0);
    // Both CPUs busy for 10 s, then one idle until the horizon.
    assert!((out.cpu_shortfall - 90.0).abs() < EPS, "{}", out.cpu_shortfall);

    // small ran at 0.5 for 10 s, then alone at full rate.
    let finish = out.job(long).unwrap().finish_time.unwrap();
    assert!((finish - (NOW + 1005.0)).abs() < EPS);
}

// ── Properties ────────────────────────────────────────────────────────────────

/// Checks the slot invariants at every simulation step.
#[derive(Default)]
struct InvariantChecker {
    ncpus: usize,
    steps: usize,
    last_now: f64,
}

impl SimObserver for InvariantChecker {
    fn on_step(&mut self, view: StepView<'_>) {
        assert_eq!(
            view.global.len(),
            view.project_active_total(),
            "global active set must equal the union of project sets"
        );
        assert!(view.max_project_active() <= self.ncpus);
        assert!(view.sim_now >= self.last_now, "time must not go backwards");
        self.last_now = view.sim_now;
        self.steps += 1;
    }
}

fn mixed_workload() -> Workload {
    let mut w = Workload::new();
    let shares = [("alpha", 300.0), ("beta", 100.0), ("gamma", 50.0), ("delta", 0.0)];
    for (k, (name, share)) in shares.iter().enumerate() {
        let p = w.add_project(Project::new(*name, *share));
        for i in 0..(k + 2) {
            let est = 500.0 + 731.0 * ((i * 7 + k * 3) % 11) as f64;
            let deadline = NOW + 1_000.0 + 997.0 * ((i + k) % 5) as f64;
            w.add_job(Job::new(format!("{name}_{i}"), p, est, deadline));
        }
    }
    w
}

#[test]
fn slot_invariants_hold_at_every_step() {
    let w = mixed_workload();
    let mut checker = InvariantChecker {
        ncpus: 3,
        last_now: NOW,
        ..Default::default()
    };
    RrSimulator::new(params(3, 20_000.0, 0.9))
        .run(&w, &NoActiveTasks, &mut checker)
        .unwrap();
    assert!(checker.steps > 1);
}

#[test]
fn runs_are_deterministic() {
    let w = mixed_workload();
    let a = run(&w, params(4, 5_000.0, 1.0));
    let b = run(&w, params(4, 5_000.0, 1.0));
    assert_eq!(a, b);
}

#[test]
fn shortfalls_are_never_negative() {
    let w = mixed_workload();
    for ncpus in 1..=6 {
        let out = run(&w, params(ncpus, 8_000.0, 0.75));
        assert!(out.cpu_shortfall >= 0.0);
        assert!(out.projects.values().all(|p| p.cpu_shortfall >= 0.0));
        assert!(out.end_time >= NOW);
    }
}

#[test]
fn yaml_workload_simulates() {
    let yaml = format!(
        r#"
projects:
  - name: "einstein"
    resource_share: 100
  - name: "rosetta"
    resource_share: 100
jobs:
  - name: "e_1"
    project: "einstein"
    state: running
    estimated_cpu_seconds: 3600
    deadline: {late}
  - name: "r_1"
    project: "rosetta"
    estimated_cpu_seconds: 600
    deadline: {far}
"#,
        late = NOW + 1_000.0,
        far = far()
    );
    let w = Workload::from_yaml(&yaml).unwrap();
    let out = run(&w, params(1, 0.0, 1.0));

    let e = w.find_project("einstein").unwrap();
    let r = w.find_project("rosetta").unwrap();
    assert_eq!(out.project(e).unwrap().deadlines_missed, 1);
    assert_eq!(out.project(r).unwrap().deadlines_missed, 0);
}
