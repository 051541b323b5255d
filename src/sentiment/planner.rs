//! Subscription window planning.
//!
//! The first request after (re)subscribing backfills the whole lookback range;
//! every later request starts exactly where the previous one ended, so the feed
//! is queried forward without gaps or overlap.

use crate::sentiment::types::{LookbackRange, SubscriptionWindow};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub fn initial_window(
    now: DateTime<Utc>,
    lookback: LookbackRange,
    instruments: &BTreeSet<String>,
) -> SubscriptionWindow {
    SubscriptionWindow {
        start: now - lookback.duration(),
        end: now,
        instruments: instruments.clone(),
    }
}

/// `None` when there is nothing to request: no instruments, no prior window,
/// or no time elapsed since it ended.
pub fn rolling_window(
    last_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    instruments: &BTreeSet<String>,
) -> Option<SubscriptionWindow> {
    if instruments.is_empty() {
        return None;
    }
    let start = last_end?;
    if now <= start {
        return None;
    }

    Some(SubscriptionWindow {
        start,
        end: now,
        instruments: instruments.clone(),
    })
}
