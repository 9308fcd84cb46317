/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Request dispatch seam between the connection set and the client core.
//!
//! The connection set owns framing and authentication; everything after that
//! is delegated to a [`RequestHandler`].  A handler either answers at once or
//! hands back a [`PendingOperation`] which the connection set polls on each
//! cycle until it produces the reply body.

use std::fmt::Write as _;
use std::net::SocketAddr;

use tracing::info;

use crate::rr_sim::SimOutcome;
use crate::work::Workload;

use super::wire::xml_escape;

/// Per-connection facts a handler may need.
#[derive(Debug, Clone, Copy)]
pub struct RpcContext {
    pub peer: SocketAddr,
    /// Connected from the loopback interface.
    pub is_local: bool,
}

/// A reply that is not available yet (e.g. waiting on a network transfer).
pub trait PendingOperation {
    /// Returns the reply body once the operation is complete.
    fn poll(&mut self) -> Option<String>;
}

pub enum Reply {
    Now(String),
    Deferred(Box<dyn PendingOperation>),
}

impl Reply {
    pub fn error(message: &str) -> Self {
        Reply::Now(format!("<error>{}</error>\n", xml_escape(message)))
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Now(body) => f.debug_tuple("Now").field(body).finish(),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Handles authenticated requests.
///
/// `op` is the request's operation tag (`"get_cc_status"`); `request` is the
/// whole message for handlers that need arguments.
pub trait RequestHandler {
    fn handle(&mut self, op: &str, request: &str, ctx: &RpcContext) -> Reply;
}

// ── Core handler ──────────────────────────────────────────────────────────────

/// Per-project view of the latest simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub name: String,
    pub proc_rate: f64,
    pub cpu_shortfall: f64,
    pub deadlines_missed: u32,
}

/// Snapshot of a simulation run, detached from the workload it ran on.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSummary {
    pub computed_at: f64,
    pub cpu_shortfall: f64,
    pub projects: Vec<ProjectSummary>,
    pub missed_jobs: Vec<String>,
}

impl SimSummary {
    pub fn new(workload: &Workload, outcome: &SimOutcome, computed_at: f64) -> Self {
        let projects = workload
            .projects()
            .filter_map(|(id, p)| {
                outcome.project(id).map(|r| ProjectSummary {
                    name: p.name.clone(),
                    proc_rate: r.proc_rate,
                    cpu_shortfall: r.cpu_shortfall,
                    deadlines_missed: r.deadlines_missed,
                })
            })
            .collect();
        let missed_jobs = outcome
            .missed_jobs()
            .filter_map(|id| workload.job(id).map(|j| j.name.clone()))
            .collect();
        Self {
            computed_at,
            cpu_shortfall: outcome.cpu_shortfall,
            projects,
            missed_jobs,
        }
    }

    pub fn deadlines_missed(&self) -> u32 {
        self.projects.iter().map(|p| p.deadlines_missed).sum()
    }

    fn to_xml(&self) -> String {
        let mut out = String::from("<rr_sim>\n");
        let _ = writeln!(out, "    <computed_at>{:.3}</computed_at>", self.computed_at);
        let _ = writeln!(out, "    <cpu_shortfall>{:.3}</cpu_shortfall>", self.cpu_shortfall);
        for p in &self.projects {
            out.push_str("    <project>\n");
            let _ = writeln!(out, "        <name>{}</name>", xml_escape(&p.name));
            let _ = writeln!(out, "        <proc_rate>{:.6}</proc_rate>", p.proc_rate);
            let _ = writeln!(out, "        <cpu_shortfall>{:.3}</cpu_shortfall>", p.cpu_shortfall);
            let _ = writeln!(
                out,
                "        <deadlines_missed>{}</deadlines_missed>",
                p.deadlines_missed
            );
            out.push_str("    </project>\n");
        }
        for name in &self.missed_jobs {
            let _ = writeln!(out, "    <missed_job>{}</missed_job>", xml_escape(name));
        }
        out.push_str("</rr_sim>\n");
        out
    }
}

/// Built-in handler serving client status and simulation results.
#[derive(Debug, Default)]
pub struct CoreRequestHandler {
    ncpus: usize,
    summary: Option<SimSummary>,
    quit_requested: bool,
}

impl CoreRequestHandler {
    pub fn new(ncpus: usize) -> Self {
        Self {
            ncpus,
            ..Self::default()
        }
    }

    /// Replaces the published simulation results.
    pub fn publish(&mut self, summary: SimSummary) {
        self.summary = Some(summary);
    }

    pub fn summary(&self) -> Option<&SimSummary> {
        self.summary.as_ref()
    }

    /// A local client asked the daemon to exit.
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    fn server_version() -> String {
        format!(
            "<server_version>\n    <major>{}</major>\n    <minor>{}</minor>\n    <release>{}</release>\n</server_version>\n",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR"),
            env!("CARGO_PKG_VERSION_PATCH"),
        )
    }

    fn cc_status(&self) -> String {
        let (valid, missed) = match &self.summary {
            Some(s) => (1, s.deadlines_missed()),
            None => (0, 0),
        };
        format!(
            "<cc_status>\n    <ncpus>{}</ncpus>\n    <rr_sim_valid>{valid}</rr_sim_valid>\n    <deadlines_missed>{missed}</deadlines_missed>\n</cc_status>\n",
            self.ncpus
        )
    }
}

impl RequestHandler for CoreRequestHandler {
    fn handle(&mut self, op: &str, _request: &str, ctx: &RpcContext) -> Reply {
        match op {
            "exchange_versions" => Reply::Now(Self::server_version()),
            "get_cc_status" => Reply::Now(self.cc_status()),
            "get_rr_sim" => match &self.summary {
                Some(s) => Reply::Now(s.to_xml()),
                None => Reply::error("no simulation results yet"),
            },
            "quit" if ctx.is_local => {
                info!(peer = %ctx.peer, "quit requested over GUI RPC");
                self.quit_requested = true;
                Reply::Now("<success/>\n".to_string())
            }
            "quit" => Reply::error("operation requires a local connection"),
            _ => Reply::error("unrecognized op"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr_sim::{JobSimResult, ProjectSimResult};
    use crate::work::{Job, Project};

    fn ctx(is_local: bool) -> RpcContext {
        RpcContext {
            peer: "127.0.0.1:5000".parse().unwrap(),
            is_local,
        }
    }

    fn body(reply: Reply) -> String {
        match reply {
            Reply::Now(b) => b,
            Reply::Deferred(_) => panic!("expected immediate reply"),
        }
    }

    fn sample_summary() -> SimSummary {
        let mut w = Workload::new();
        let a = w.add_project(Project::new("alpha & co", 100.0));
        let j = w.add_job(Job::new("a_1", a, 10.0, 5.0));

        let mut outcome = SimOutcome::default();
        outcome.cpu_shortfall = 42.0;
        outcome.projects.insert(
            a,
            ProjectSimResult {
                deadlines_missed: 1,
                proc_rate: 1.0,
                cpu_shortfall: 42.0,
            },
        );
        outcome.jobs.insert(
            j,
            JobSimResult {
                misses_deadline: true,
                previous_misses_deadline: false,
                finish_time: Some(10.0),
            },
        );
        SimSummary::new(&w, &outcome, 0.0)
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut h = CoreRequestHandler::new(2);
        assert_eq!(
            body(h.handle("frobnicate", "", &ctx(true))),
            "<error>unrecognized op</error>\n"
        );
    }

    #[test]
    fn cc_status_reflects_published_results() {
        let mut h = CoreRequestHandler::new(4);
        let before = body(h.handle("get_cc_status", "", &ctx(true)));
        assert!(before.contains("<ncpus>4</ncpus>"));
        assert!(before.contains("<rr_sim_valid>0</rr_sim_valid>"));

        h.publish(sample_summary());
        let after = body(h.handle("get_cc_status", "", &ctx(true)));
        assert!(after.contains("<rr_sim_valid>1</rr_sim_valid>"));
        assert!(after.contains("<deadlines_missed>1</deadlines_missed>"));
    }

    #[test]
    fn rr_sim_reply_lists_projects_and_missed_jobs() {
        let mut h = CoreRequestHandler::new(1);
        assert!(body(h.handle("get_rr_sim", "", &ctx(true))).starts_with("<error>"));

        h.publish(sample_summary());
        let xml = body(h.handle("get_rr_sim", "", &ctx(false)));
        assert!(xml.contains("<name>alpha &amp; co</name>"));
        assert!(xml.contains("<missed_job>a_1</missed_job>"));
        assert!(xml.contains("<cpu_shortfall>42.000</cpu_shortfall>"));
    }

    #[test]
    fn quit_is_local_only() {
        let mut h = CoreRequestHandler::new(1);
        assert!(body(h.handle("quit", "", &ctx(false))).starts_with("<error>"));
        assert!(!h.quit_requested());
        assert_eq!(body(h.handle("quit", "", &ctx(true))), "<success/>\n");
        assert!(h.quit_requested());
    }

    #[test]
    fn version_reply_names_all_parts() {
        let mut h = CoreRequestHandler::new(1);
        let v = body(h.handle("exchange_versions", "", &ctx(true)));
        assert!(v.contains("<major>") && v.contains("<minor>") && v.contains("<release>"));
    }
}
