//! Countdown helpers for message badges and typing indicators.
//!
//! Everything here is a pure function of `now` and a stored timestamp, so
//! clients recompute the state on every render tick instead of keeping timer
//! objects around. The server's edit-window check uses [`can_edit`] too.

use chrono::{DateTime, Duration, Utc};

use crate::constants::{DELETE_GRACE_SECS, EDIT_WINDOW_SECS, TYPING_DEBOUNCE_MS, TYPING_EXPIRY_MS};

pub fn edit_window() -> Duration {
    Duration::seconds(EDIT_WINDOW_SECS)
}

pub fn delete_grace() -> Duration {
    Duration::seconds(DELETE_GRACE_SECS)
}

fn remaining(now: DateTime<Utc>, since: DateTime<Utc>, window: Duration) -> Duration {
    let left = window - (now - since);
    if left > Duration::zero() {
        left
    } else {
        Duration::zero()
    }
}

/// Time left in the edit window of a message created at `created_at`.
pub fn edit_time_remaining(now: DateTime<Utc>, created_at: DateTime<Utc>) -> Duration {
    remaining(now, created_at, edit_window())
}

/// Whether a message created at `created_at` may still be edited at `now`.
pub fn can_edit(now: DateTime<Utc>, created_at: DateTime<Utc>) -> bool {
    now - created_at < edit_window()
}

/// Time left on the "just sent, delete with undo" badge.
pub fn delete_time_remaining(now: DateTime<Utc>, created_at: DateTime<Utc>) -> Duration {
    remaining(now, created_at, delete_grace())
}

pub fn can_delete_badge(now: DateTime<Utc>, created_at: DateTime<Utc>) -> bool {
    now - created_at < delete_grace()
}

/// A received typing signal is shown until it is this old.
pub fn typing_is_active(now: DateTime<Utc>, last_signal: DateTime<Utc>) -> bool {
    now - last_signal < Duration::milliseconds(TYPING_EXPIRY_MS)
}

/// Debounce for the emitting side. `None` means nothing was sent yet.
pub fn typing_should_send(now: DateTime<Utc>, last_sent: Option<DateTime<Utc>>) -> bool {
    match last_sent {
        Some(at) => now - at >= Duration::milliseconds(TYPING_DEBOUNCE_MS),
        None => true,
    }
}
