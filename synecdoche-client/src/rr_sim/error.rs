/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Input validation errors for the round-robin simulation.
//!
//! The simulation itself cannot fail once it starts; every variant here is
//! detected by [`RrSimulator::run()`](super::RrSimulator::run) before the
//! first simulated event, so a rejected run never leaves partial results.

use thiserror::Error;

use crate::work::{JobId, ProjectId};

/// Reasons a simulation run is refused.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    /// The host reported no usable CPUs.
    #[error("ncpus must be at least 1")]
    NoCpus,

    /// `overall_cpu_fraction` is outside `(0, 1]` or not a number.
    #[error("overall CPU fraction {0} is outside (0, 1]")]
    InvalidCpuFraction(f64),

    /// The look-ahead horizon is negative or not a number.
    #[error("work buffer horizon {0}s is negative")]
    NegativeHorizon(f64),

    /// A job points at a project that does not exist in the workload.
    #[error("{job} refers to unknown project #{}", .project.0)]
    UnknownProject { job: JobId, project: ProjectId },

    /// A job's CPU estimate is negative or not a finite number.
    #[error("{job} has negative or non-finite remaining CPU time {value}")]
    NegativeRemaining { job: JobId, value: f64 },

    /// A project carries a negative (or NaN) resource share.
    #[error("project '{project}' has a negative resource share")]
    NegativeResourceShare { project: String },
}
