// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared human-readable formatting for virtual time spans.

use crate::time::SimTime;
use std::time::Duration;

/// Format a virtual-time span as a short human-readable duration:
/// `"5s"`, `"2m"`, `"1h30m"`, `"3d"`.
///
/// For the hours range, minutes are included when non-zero (e.g. `"1h"` vs
/// `"1h5m"`). Sub-second spans render as milliseconds.
pub fn format_elapsed(span: Duration) -> String {
    let secs = span.as_secs();
    if secs == 0 && span.subsec_millis() > 0 {
        return format!("{}ms", span.subsec_millis());
    }
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h{}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        format!("{}d", secs / 86400)
    }
}

/// Format the span between two simulation time stamps.
///
/// Convenience wrapper around [`format_elapsed`]; saturates when `end`
/// precedes `start`.
pub fn format_elapsed_ms(start: SimTime, end: SimTime) -> String {
    format_elapsed(end.since(start))
}

#[cfg(test)]
#[path = "time_fmt_tests.rs"]
mod tests;
