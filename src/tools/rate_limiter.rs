//! Sliding-window rate limiter for destructive and modifying tools (§4.D).
//!
//! Grounded on `utils/rate_limiter.py`: one FIFO timestamp queue per
//! [`OperationType`], trimmed to the trailing hour on every check.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Deletion,
    Modification,
}

/// Maps a tool name to the bucket its executions count against. Tools not
/// listed here (mostly read-only tools) are never rate-limited.
pub fn operation_type(tool_name: &str) -> Option<OperationType> {
    match tool_name {
        "delete_automation" | "delete_script" | "delete_scene" | "delete_helper" | "forget_memory" => {
            Some(OperationType::Deletion)
        }
        "create_automation" | "update_automation" | "create_script" | "update_script" | "create_scene"
        | "update_scene" | "create_helper" | "store_memory" | "call_service" => Some(OperationType::Modification),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub deletions_used: usize,
    pub deletions_limit: usize,
    pub modifications_used: usize,
    pub modifications_limit: usize,
}

struct Buckets {
    deletions: VecDeque<Instant>,
    modifications: VecDeque<Instant>,
}

pub struct RateLimiter {
    deletions_per_hour: usize,
    modifications_per_hour: usize,
    window: Duration,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(deletions_per_hour: usize, modifications_per_hour: usize) -> Self {
        Self {
            deletions_per_hour,
            modifications_per_hour,
            window: Duration::from_secs(3600),
            buckets: Mutex::new(Buckets {
                deletions: VecDeque::new(),
                modifications: VecDeque::new(),
            }),
        }
    }

    fn cleanup(&self, times: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = times.front() {
            if now.duration_since(front) >= self.window {
                times.pop_front();
            } else {
                break;
            }
        }
    }

    /// `(allowed, message)`. `message` explains the denial when `!allowed`.
    pub fn check_allowed(&self, op: OperationType) -> (bool, String) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        match op {
            OperationType::Deletion => {
                self.cleanup(&mut buckets.deletions, now);
                let count = buckets.deletions.len();
                if count >= self.deletions_per_hour {
                    return (
                        false,
                        format!(
                            "Rate limit exceeded: {count}/{} deletions in the last hour. Please wait before deleting more items.",
                            self.deletions_per_hour
                        ),
                    );
                }
            }
            OperationType::Modification => {
                self.cleanup(&mut buckets.modifications, now);
                let count = buckets.modifications.len();
                if count >= self.modifications_per_hour {
                    return (
                        false,
                        format!(
                            "Rate limit exceeded: {count}/{} modifications in the last hour. Please wait before making more changes.",
                            self.modifications_per_hour
                        ),
                    );
                }
            }
        }
        (true, String::new())
    }

    pub fn record_operation(&self, op: OperationType) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        match op {
            OperationType::Deletion => buckets.deletions.push_back(now),
            OperationType::Modification => buckets.modifications.push_back(now),
        }
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        self.cleanup(&mut buckets.deletions, now);
        self.cleanup(&mut buckets.modifications, now);
        RateLimitStatus {
            deletions_used: buckets.deletions.len(),
            deletions_limit: self.deletions_per_hour,
            modifications_used: buckets.modifications.len(),
            modifications_limit: self.modifications_per_hour,
        }
    }

    pub fn reset(&self) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.deletions.clear();
        buckets.modifications.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(2, 20);
        for _ in 0..2 {
            let (allowed, _) = limiter.check_allowed(OperationType::Deletion);
            assert!(allowed);
            limiter.record_operation(OperationType::Deletion);
        }
        let (allowed, msg) = limiter.check_allowed(OperationType::Deletion);
        assert!(!allowed);
        assert!(msg.contains("Rate limit exceeded"));
    }

    #[test]
    fn buckets_are_independent() {
        let limiter = RateLimiter::new(1, 1);
        limiter.record_operation(OperationType::Deletion);
        let (allowed, _) = limiter.check_allowed(OperationType::Modification);
        assert!(allowed);
    }

    #[test]
    fn status_reports_usage_and_limits() {
        let limiter = RateLimiter::new(5, 20);
        limiter.record_operation(OperationType::Deletion);
        let status = limiter.status();
        assert_eq!(status.deletions_used, 1);
        assert_eq!(status.deletions_limit, 5);
        assert_eq!(status.modifications_limit, 20);
    }

    #[test]
    fn reset_clears_all_buckets() {
        let limiter = RateLimiter::new(1, 1);
        limiter.record_operation(OperationType::Deletion);
        limiter.reset();
        let status = limiter.status();
        assert_eq!(status.deletions_used, 0);
    }

    #[test]
    fn lookup_table_covers_known_tools() {
        assert_eq!(operation_type("delete_automation"), Some(OperationType::Deletion));
        assert_eq!(operation_type("call_service"), Some(OperationType::Modification));
        assert_eq!(operation_type("get_entities"), None);
    }
}
