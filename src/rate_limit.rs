// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sliding-window submission rate limiter.
//!
//! Keeps a bounded queue of accepted timestamps; a submission is allowed
//! while fewer than `limit` acceptances fall inside the trailing minute.
//! Rejected submissions are dropped by the caller, never queued for
//! retry.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use report_queue::RateLimiter;
//!
//! let limiter = RateLimiter::per_minute(2).unwrap();
//! let t0 = Instant::now();
//!
//! assert!(limiter.allow(t0));
//! assert!(limiter.allow(t0 + Duration::from_secs(1)));
//! assert!(!limiter.allow(t0 + Duration::from_secs(2)));
//! assert!(limiter.allow(t0 + Duration::from_secs(61)));
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use parking_lot::Mutex;

use crate::error::QueueError;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding one-minute window limiter. A limit of 0 disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    accepted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` submissions per sliding minute.
    ///
    /// A limit at the counter's overflow boundary is a configuration
    /// error here, never a call-time failure.
    pub fn per_minute(limit: u32) -> Result<Self, QueueError> {
        if limit == u32::MAX {
            return Err(QueueError::Configuration(format!(
                "rate limit of {} is at the counter overflow boundary",
                u32::MAX
            )));
        }
        Ok(Self {
            limit,
            accepted: Mutex::new(VecDeque::new()),
        })
    }

    /// Whether a submission at `now` may proceed. Accepted timestamps are
    /// recorded; rejected ones are not.
    pub fn allow(&self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }

        let mut accepted = self.accepted.lock();
        while let Some(&front) = accepted.front() {
            if now.saturating_duration_since(front) >= WINDOW {
                accepted.pop_front();
            } else {
                break;
            }
        }

        if (accepted.len() as u32) < self.limit {
            accepted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of acceptances currently inside the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        self.accepted.lock().len()
    }
}
