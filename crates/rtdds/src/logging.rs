// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Function-entry trace instrumentation.
//!
//! All operational logging goes through the `log` crate facade directly
//! (`log::debug!`, `log::warn!`, ...). The only macro carried here is
//! `trace_fn!`, used for call stack instrumentation in hot discovery paths.
//! It compiles to nothing unless the `trace` cargo feature is enabled.

/// Function entry trace marker.
///
/// Logs `[ENTER:FNC] function_name` at trace level.
/// Only active when the `trace` feature is enabled.
///
/// # Example
/// ```ignore
/// fn parse_participant_data(bytes: &[u8]) -> Result<Data> {
///     trace_fn!("parse_participant_data");
///     // ...
/// }
/// ```
#[macro_export]
#[cfg(feature = "trace")]
macro_rules! trace_fn {
    ($fn_name:expr) => {
        log::trace!("[ENTER:FNC] {}", $fn_name);
    };
}

/// No-op trace macro (when trace feature disabled).
#[macro_export]
#[cfg(not(feature = "trace"))]
macro_rules! trace_fn {
    ($fn_name:expr) => {};
}
