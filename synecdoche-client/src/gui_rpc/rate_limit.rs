/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Windowed log suppression for repeated warnings.

use std::time::{Duration, Instant};

/// Default suppression window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Outcome of [`RateLimitedLog::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDecision {
    /// Log this occurrence.  `suppressed` occurrences from the previous
    /// window went unlogged and should be summarised first.
    Emit { suppressed: u32 },
    /// Inside an open window; stay quiet.
    Suppress,
}

/// Emits the first occurrence in each window and counts the rest.
///
/// Time is passed in by the caller so the limiter can be driven from tests.
#[derive(Debug, Clone)]
pub struct RateLimitedLog {
    window: Duration,
    window_start: Option<Instant>,
    suppressed: u32,
}

impl RateLimitedLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            suppressed: 0,
        }
    }

    pub fn record(&mut self, now: Instant) -> LogDecision {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < self.window => {
                self.suppressed += 1;
                LogDecision::Suppress
            }
            _ => {
                let suppressed = std::mem::take(&mut self.suppressed);
                self.window_start = Some(now);
                LogDecision::Emit { suppressed }
            }
        }
    }

    /// Closes an expired window.  Returns the number of occurrences it
    /// suppressed, if any, so the caller can log a summary.
    pub fn expire(&mut self, now: Instant) -> Option<u32> {
        let start = self.window_start?;
        if now.saturating_duration_since(start) < self.window {
            return None;
        }
        self.window_start = None;
        match std::mem::take(&mut self.suppressed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
