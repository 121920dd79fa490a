#[cfg(test)]
mod tests {
    use quorum_core::{ErrorKind, FailureRecord};
    use quorum_failure::*;

    // ── Retry policy ───────────────────────────────────────────

    mod policy {
        use super::*;
        use std::time::Duration;

        #[test]
        fn test_presets() {
            let d = RetryPolicy::default();
            assert_eq!((d.max_retries, d.retry_delay_ms), (3, 1000));
            assert_eq!(d.max_retry_delay_ms, 30_000);
            assert!(!d.enable_failover);

            let a = RetryPolicy::aggressive();
            assert_eq!((a.max_retries, a.retry_delay_ms), (5, 500));
            assert!(a.enable_failover);

            let c = RetryPolicy::conservative();
            assert_eq!((c.max_retries, c.retry_delay_ms), (1, 2000));
        }

        #[test]
        fn test_backoff_doubles_and_caps() {
            let p = RetryPolicy {
                retry_delay_ms: 1000,
                backoff_multiplier: 2.0,
                max_retry_delay_ms: 3000,
                ..Default::default()
            };
            assert_eq!(p.delay_for(0), Duration::from_millis(1000));
            assert_eq!(p.delay_for(1), Duration::from_millis(2000));
            assert_eq!(p.delay_for(2), Duration::from_millis(3000)); // capped
            assert_eq!(p.delay_for(10), Duration::from_millis(3000));
        }

        #[test]
        fn test_retryable_kinds() {
            for kind in [
                ErrorKind::Timeout,
                ErrorKind::Connection,
                ErrorKind::Unavailable,
                ErrorKind::Overload,
            ] {
                assert!(RetryPolicy::is_retryable(kind), "{kind} should retry");
            }
            for kind in [
                ErrorKind::InvalidRequest,
                ErrorKind::Authentication,
                ErrorKind::AgentNotFound,
                ErrorKind::InternalError,
            ] {
                assert!(!RetryPolicy::is_retryable(kind), "{kind} should fail fast");
            }
        }
    }

    // ── Circuit breaker ────────────────────────────────────────

    mod breaker {
        use super::*;

        #[test]
        fn test_opens_after_threshold_and_recovers() {
            // The S2 scenario: threshold 3, open timeout 100ms, success threshold 2.
            let cb = CircuitBreaker::new(3, 100, 2);
            assert_eq!(cb.state(), BreakerState::Closed);
            assert!(cb.allow_request());

            cb.record_failure();
            cb.record_failure();
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Open);
            assert!(!cb.allow_request());

            std::thread::sleep(std::time::Duration::from_millis(110));
            assert!(cb.allow_request());
            assert_eq!(cb.state(), BreakerState::HalfOpen);

            cb.record_success();
            cb.record_success();
            assert_eq!(cb.state(), BreakerState::Closed);
            assert_eq!(cb.stats().failure_count, 0);
        }

        #[test]
        fn test_closed_success_resets_failures() {
            let cb = CircuitBreaker::new(3, 100, 2);
            cb.record_failure();
            cb.record_failure();
            cb.record_success();
            cb.record_failure();
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Closed);
        }

        #[test]
        fn test_half_open_failure_reopens() {
            let cb = CircuitBreaker::new(1, 50, 2);
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Open);
            std::thread::sleep(std::time::Duration::from_millis(60));
            assert!(cb.allow_request());
            assert_eq!(cb.state(), BreakerState::HalfOpen);
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Open);
            assert!(!cb.allow_request());
        }

        #[test]
        fn test_half_open_allows_requests() {
            let cb = CircuitBreaker::new(1, 50, 2);
            cb.record_failure();
            std::thread::sleep(std::time::Duration::from_millis(60));
            assert!(cb.allow_request());
            // Still half-open after one success (threshold is 2).
            cb.record_success();
            assert_eq!(cb.state(), BreakerState::HalfOpen);
            assert!(cb.allow_request());
        }

        #[test]
        fn test_reset() {
            let cb = CircuitBreaker::new(1, 60_000, 2);
            cb.record_failure();
            assert_eq!(cb.state(), BreakerState::Open);
            cb.reset();
            assert_eq!(cb.state(), BreakerState::Closed);
            assert!(cb.allow_request());
        }
    }

    // ── Dead-letter queue ──────────────────────────────────────

    mod dlq {
        use super::*;

        fn record(agent: &str) -> FailureRecord {
            FailureRecord::new(agent, ErrorKind::Timeout, "slow")
        }

        #[test]
        fn test_push_and_list_fifo() {
            let dlq = DeadLetterQueue::new(10);
            dlq.push("m1", "p1", record("a"));
            dlq.push("m2", "p2", record("a"));
            let letters = dlq.list(0);
            assert_eq!(letters.len(), 2);
            assert_eq!(letters[0].message_id, "m1");
            assert_eq!(letters[1].message_id, "m2");
        }

        #[test]
        fn test_overflow_evicts_oldest() {
            let dlq = DeadLetterQueue::new(3);
            for i in 0..5 {
                dlq.push(format!("m{i}"), "p", record("a"));
            }
            let letters = dlq.list(0);
            assert_eq!(letters.len(), 3);
            assert_eq!(letters[0].message_id, "m2");
        }

        #[test]
        fn test_remove_and_clear() {
            let dlq = DeadLetterQueue::new(10);
            dlq.push("m1", "p", record("a"));
            dlq.push("m2", "p", record("a"));
            assert!(dlq.remove("m1"));
            assert!(!dlq.remove("m1"));
            assert_eq!(dlq.len(), 1);
            dlq.clear();
            assert!(dlq.is_empty());
        }

        #[test]
        fn test_list_limit() {
            let dlq = DeadLetterQueue::new(10);
            for i in 0..5 {
                dlq.push(format!("m{i}"), "p", record("a"));
            }
            assert_eq!(dlq.list(2).len(), 2);
        }
    }

    // ── Failure manager ────────────────────────────────────────

    mod manager {
        use super::*;

        struct TimeoutHandler;
        impl FailureHandler for TimeoutHandler {
            fn can_handle(&self, kind: ErrorKind) -> bool {
                kind == ErrorKind::Timeout
            }
            fn handle(&self, _record: &FailureRecord) -> bool {
                true
            }
        }

        #[test]
        fn test_history_bounded_and_newest_first() {
            let mgr = FailureManager::new();
            for i in 0..120 {
                mgr.record_failure(FailureRecord::new(
                    "agent-1",
                    ErrorKind::Connection,
                    format!("failure {i}"),
                ));
            }
            let history = mgr.history("agent-1", 0);
            assert_eq!(history.len(), 100);
            assert_eq!(history[0].error_message, "failure 119");
            assert_eq!(mgr.history("agent-1", 5).len(), 5);
            assert!(mgr.history("other", 0).is_empty());
        }

        #[test]
        fn test_record_failure_updates_breaker() {
            let mgr = FailureManager::new();
            for _ in 0..5 {
                mgr.record_failure(FailureRecord::new("a", ErrorKind::Unavailable, "down"));
            }
            assert_eq!(mgr.breaker("a").state(), BreakerState::Open);
            // A different agent's breaker is untouched.
            assert_eq!(mgr.breaker("b").state(), BreakerState::Closed);
        }

        #[test]
        fn test_handle_failure_dispatch() {
            let mgr = FailureManager::new();
            mgr.add_handler(Box::new(TimeoutHandler));

            let mut timeout = FailureRecord::new("a", ErrorKind::Timeout, "slow");
            assert!(mgr.handle_failure(&mut timeout));
            assert!(timeout.recovered);

            let mut auth = FailureRecord::new("a", ErrorKind::Authentication, "denied");
            assert!(!mgr.handle_failure(&mut auth));
            assert!(!auth.recovered);
        }

        #[test]
        fn test_last_failure() {
            let mgr = FailureManager::new();
            assert!(mgr.last_failure("a").is_none());
            mgr.record_failure(FailureRecord::new("a", ErrorKind::Timeout, "first"));
            mgr.record_failure(FailureRecord::new("a", ErrorKind::Timeout, "second"));
            assert_eq!(mgr.last_failure("a").unwrap().error_message, "second");
        }

        #[test]
        fn test_stats() {
            let mgr = FailureManager::new();
            mgr.record_failure(FailureRecord::new("a", ErrorKind::Timeout, "t"));
            mgr.record_failure(FailureRecord::new("a", ErrorKind::Connection, "c"));
            mgr.record_failure(FailureRecord::new("b", ErrorKind::Timeout, "t"));
            mgr.dead_letters()
                .push("m1", "payload", FailureRecord::new("a", ErrorKind::Timeout, "t"));

            let stats = mgr.stats();
            assert_eq!(stats.total_failures, 3);
            assert_eq!(stats.failures_by_agent["a"], 2);
            assert_eq!(stats.failures_by_kind["timeout"], 2);
            assert_eq!(stats.dead_letters, 1);
        }

        #[test]
        fn test_clear_history() {
            let mgr = FailureManager::new();
            mgr.record_failure(FailureRecord::new("a", ErrorKind::Timeout, "t"));
            mgr.clear_history();
            assert!(mgr.history("a", 0).is_empty());
            assert_eq!(mgr.stats().total_failures, 0);
        }
    }
}
