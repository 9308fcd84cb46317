/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Synecdoche core client – deadline simulation and GUI RPC server
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/         – YAML client configuration and preferences
//! ├── work            – projects, jobs and the workload arena
//! ├── rr_sim/         – round-robin CPU simulation, deadline-miss projection
//! └── gui_rpc/        – GUI RPC listener, connections, auth, dispatch
//! ```

pub mod config;
pub mod gui_rpc;
pub mod rr_sim;
pub mod work;
