// /////////////////////////////////////////////////////////////////////////////
// Hybrid Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Initialization
//!
//! Structured logging for the whole binary via `tracing`. Verbosity is
//! driven by repeated `-v` flags and can always be overridden with
//! `RUST_LOG`. Trace markers emitted by the dispatcher (`stage_start`,
//! `stage_end`, admission waits) surface at `trace` level, so `-vvv`
//! yields a per-frame execution trace without a separate trace writer.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global subscriber. `verbosity` is the `-v` count:
/// 0 = info, 1 = debug, 2+ = trace.
///
/// Calling this twice is a no-op (the second registration fails quietly),
/// which keeps tests that share a process harmless.
pub fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_initialization_is_harmless() {
        init_logging(0);
        init_logging(2);
    }
}
