#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quorum_core::{Envelope, MessageKind, QuorumError};
    use quorum_runtime::{
        Agent, DocCoordinator, LifecycleState, Mailbox, MessageBus, RestartStrategy,
        Supervisor, SupervisorConfig,
    };

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    fn msg(from: &str, to: &str, kind: MessageKind) -> Envelope {
        Envelope::new(from, to, kind)
    }

    // ── Mailbox ────────────────────────────────────────────────

    mod mailbox {
        use super::*;

        #[tokio::test]
        async fn test_fifo_per_sender() {
            let mb = Mailbox::new(100);
            for i in 0..5 {
                let m = msg("a", "b", MessageKind::Notification)
                    .with_payload(serde_json::json!(i));
                assert!(mb.push(m));
            }
            for i in 0..5 {
                let m = mb.pop(Duration::ZERO).await.unwrap();
                assert_eq!(m.payload, serde_json::json!(i));
            }
            assert!(mb.is_empty());
        }

        #[tokio::test]
        async fn test_push_full_returns_false_without_mutation() {
            let mb = Mailbox::new(2);
            assert!(mb.push(msg("a", "b", MessageKind::Notification)));
            assert!(mb.push(msg("a", "b", MessageKind::Notification)));
            assert!(!mb.push(msg("a", "b", MessageKind::Notification)));
            assert_eq!(mb.len(), 2);
        }

        #[tokio::test]
        async fn test_pop_zero_timeout_nonblocking() {
            let mb = Mailbox::new(10);
            assert!(mb.pop(Duration::ZERO).await.is_none());
        }

        #[tokio::test]
        async fn test_pop_waits_for_push() {
            let mb = Arc::new(Mailbox::new(10));
            let pusher = Arc::clone(&mb);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                pusher.push(msg("a", "b", MessageKind::Notification));
            });
            let start = std::time::Instant::now();
            let popped = mb.pop(Duration::from_millis(500)).await;
            assert!(popped.is_some());
            assert!(start.elapsed() < Duration::from_millis(400));
        }

        #[tokio::test]
        async fn test_pop_times_out() {
            let mb = Mailbox::new(10);
            let start = std::time::Instant::now();
            assert!(mb.pop(Duration::from_millis(50)).await.is_none());
            assert!(start.elapsed() >= Duration::from_millis(50));
        }

        #[tokio::test]
        async fn test_close_drains_and_rejects() {
            let mb = Mailbox::new(10);
            mb.push(msg("a", "b", MessageKind::Notification));
            mb.close();
            assert!(mb.pop(Duration::from_millis(50)).await.is_none());
            assert!(!mb.push(msg("a", "b", MessageKind::Notification)));
            assert!(mb.is_closed());
        }

        #[tokio::test]
        async fn test_close_wakes_waiter() {
            let mb = Arc::new(Mailbox::new(10));
            let closer = Arc::clone(&mb);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                closer.close();
            });
            let start = std::time::Instant::now();
            assert!(mb.pop(Duration::from_secs(5)).await.is_none());
            assert!(start.elapsed() < Duration::from_millis(500));
        }
    }

    // ── Message bus ────────────────────────────────────────────

    mod bus {
        use super::*;

        #[tokio::test]
        async fn test_deliver_routes_by_target() {
            let bus = MessageBus::new();
            let mb_a = Arc::new(Mailbox::new(10));
            let mb_b = Arc::new(Mailbox::new(10));
            bus.attach("a", Arc::clone(&mb_a));
            bus.attach("b", Arc::clone(&mb_b));

            assert!(bus.deliver(msg("x", "b", MessageKind::Notification)));
            assert_eq!(mb_b.len(), 1);
            assert_eq!(mb_a.len(), 0);
            assert!(!bus.deliver(msg("x", "nobody", MessageKind::Notification)));
        }

        #[tokio::test]
        async fn test_broadcast_rewrites_target_and_survives_full_mailboxes() {
            let bus = MessageBus::new();
            let full = Arc::new(Mailbox::new(1));
            full.push(msg("x", "a", MessageKind::Notification));
            let ok = Arc::new(Mailbox::new(10));
            bus.attach("a", Arc::clone(&full));
            bus.attach("b", Arc::clone(&ok));

            let delivered = bus.broadcast(
                &msg("x", "", MessageKind::Broadcast),
                &["a".to_string(), "b".to_string()],
            );
            assert_eq!(delivered, 1);
            let received = ok.pop(Duration::ZERO).await.unwrap();
            assert_eq!(received.to, "b");
        }

        #[tokio::test]
        async fn test_empty_to_fans_out_except_sender() {
            let bus = MessageBus::new();
            let mb_a = Arc::new(Mailbox::new(10));
            let mb_b = Arc::new(Mailbox::new(10));
            bus.attach("a", Arc::clone(&mb_a));
            bus.attach("b", Arc::clone(&mb_b));

            assert!(bus.deliver(msg("a", "", MessageKind::Broadcast)));
            assert_eq!(mb_a.len(), 0);
            assert_eq!(mb_b.len(), 1);
        }

        #[tokio::test]
        async fn test_detach_closes() {
            let bus = MessageBus::new();
            let mb = Arc::new(Mailbox::new(10));
            bus.attach("a", Arc::clone(&mb));
            assert!(bus.detach("a"));
            assert!(mb.is_closed());
            assert!(!bus.detach("a"));
        }
    }

    // ── Agent actor ────────────────────────────────────────────

    mod agent {
        use super::*;

        #[tokio::test]
        async fn test_lifecycle_start_stop() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], Arc::clone(&bus), None);
            assert_eq!(agent.lifecycle(), LifecycleState::Created);

            agent.start();
            settle().await;
            assert_eq!(agent.lifecycle(), LifecycleState::Running);

            agent.stop();
            agent.join().await;
            assert_eq!(agent.lifecycle(), LifecycleState::Stopped);
        }

        #[tokio::test]
        async fn test_start_twice_is_noop() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], bus, None);
            agent.start();
            settle().await;
            agent.start();
            assert_eq!(agent.start_count(), 1);
            agent.stop();
            agent.join().await;
        }

        #[tokio::test]
        async fn test_heartbeat_gets_ack() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], Arc::clone(&bus), None);
            bus.attach(&agent.id(), agent.mailbox());
            let probe = Arc::new(Mailbox::new(10));
            bus.attach("probe", Arc::clone(&probe));
            agent.start();
            settle().await;

            let hb = msg("probe", &agent.id(), MessageKind::Heartbeat);
            let hb_id = hb.message_id.clone();
            assert!(bus.deliver(hb));

            let ack = probe.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(ack.kind, MessageKind::HeartbeatAck);
            assert_eq!(ack.from, agent.id());
            assert_eq!(ack.correlation_id, hb_id);

            agent.stop();
            agent.join().await;
        }

        #[tokio::test]
        async fn test_shutdown_message_stops_agent() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], Arc::clone(&bus), None);
            bus.attach(&agent.id(), agent.mailbox());
            agent.start();
            settle().await;

            bus.deliver(msg("x", &agent.id(), MessageKind::Shutdown));
            agent.join().await;
            assert_eq!(agent.lifecycle(), LifecycleState::Stopped);
        }

        #[tokio::test]
        async fn test_handler_error_notifies_supervisor_and_breaker() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], Arc::clone(&bus), None);
            bus.attach(&agent.id(), agent.mailbox());
            let sup_mb = Arc::new(Mailbox::new(10));
            bus.attach("sup", Arc::clone(&sup_mb));
            agent.set_supervisor(Some("sup".to_string()));
            agent.register_handler(
                MessageKind::Notification,
                Arc::new(|_, _| Err(QuorumError::Handler("boom".into()))),
            );
            agent.start();
            settle().await;

            bus.deliver(msg("x", &agent.id(), MessageKind::Notification));
            let notice = sup_mb.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(notice.kind, MessageKind::Error);
            assert_eq!(notice.from, agent.id());
            assert!(agent.breaker().stats().failure_count >= 1);

            agent.stop();
            agent.join().await;
        }

        #[tokio::test]
        async fn test_custom_handler_dispatch() {
            let bus = Arc::new(MessageBus::new());
            let agent = Agent::local("worker", "", vec![], Arc::clone(&bus), None);
            bus.attach(&agent.id(), agent.mailbox());
            let probe = Arc::new(Mailbox::new(10));
            bus.attach("probe", Arc::clone(&probe));
            agent.register_handler(
                MessageKind::DocUpdate,
                Arc::new(|agent, msg| {
                    agent.send_to(&msg.from, MessageKind::Notification, serde_json::json!("seen"));
                    Ok(())
                }),
            );
            agent.start();
            settle().await;

            bus.deliver(msg("probe", &agent.id(), MessageKind::DocUpdate));
            let reply = probe.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(reply.kind, MessageKind::Notification);
            assert_eq!(reply.payload, serde_json::json!("seen"));

            agent.stop();
            agent.join().await;
        }
    }

    // ── Supervisor ─────────────────────────────────────────────

    mod supervisor {
        use super::*;

        fn config() -> SupervisorConfig {
            SupervisorConfig {
                strategy: RestartStrategy::OneForOne,
                max_restarts: 3,
                restart_window_ms: 60_000,
                // Keep the monitor quiet during these tests.
                health_check_interval_ms: 60_000,
            }
        }

        fn child(bus: &Arc<MessageBus>, name: &str) -> Arc<Agent> {
            Agent::local(name, "", vec![], Arc::clone(bus), None)
        }

        #[tokio::test]
        async fn test_one_for_one_restart() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new("sup", Arc::clone(&bus), config());
            let w1 = child(&bus, "w1");
            let w2 = child(&bus, "w2");
            sup.add_child(Arc::clone(&w1));
            sup.add_child(Arc::clone(&w2));
            sup.start();
            settle().await;
            assert_eq!(w1.lifecycle(), LifecycleState::Running);

            sup.handle_child_failure(&w1.id()).await;
            settle().await;
            assert_eq!(w1.lifecycle(), LifecycleState::Running);
            assert_eq!(w1.start_count(), 2);
            assert_eq!(w2.start_count(), 1, "w2 must not be restarted");

            sup.stop().await;
        }

        #[tokio::test]
        async fn test_restart_window_exhaustion_leaves_child_failed() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new("sup2", Arc::clone(&bus), config());
            let w1 = child(&bus, "w1");
            let w2 = child(&bus, "w2");
            sup.add_child(Arc::clone(&w1));
            sup.add_child(Arc::clone(&w2));
            sup.start();
            settle().await;

            for _ in 0..3 {
                sup.handle_child_failure(&w1.id()).await;
            }
            settle().await;
            assert_eq!(w1.lifecycle(), LifecycleState::Running);

            // Fourth failure inside the window exceeds max_restarts = 3.
            sup.handle_child_failure(&w1.id()).await;
            assert_eq!(w1.lifecycle(), LifecycleState::Failed);
            assert_eq!(w2.lifecycle(), LifecycleState::Running);

            sup.stop().await;
        }

        #[tokio::test]
        async fn test_rest_for_one_restarts_later_siblings() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new(
                "sup3",
                Arc::clone(&bus),
                SupervisorConfig {
                    strategy: RestartStrategy::RestForOne,
                    ..config()
                },
            );
            let w1 = child(&bus, "w1");
            let w2 = child(&bus, "w2");
            let w3 = child(&bus, "w3");
            sup.add_child(Arc::clone(&w1));
            sup.add_child(Arc::clone(&w2));
            sup.add_child(Arc::clone(&w3));
            sup.start();
            settle().await;

            sup.handle_child_failure(&w2.id()).await;
            settle().await;
            assert_eq!(w1.start_count(), 1);
            assert_eq!(w2.start_count(), 2);
            assert_eq!(w3.start_count(), 2);

            sup.stop().await;
        }

        #[tokio::test]
        async fn test_one_for_all_restarts_everyone() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new(
                "sup4",
                Arc::clone(&bus),
                SupervisorConfig {
                    strategy: RestartStrategy::OneForAll,
                    ..config()
                },
            );
            let w1 = child(&bus, "w1");
            let w2 = child(&bus, "w2");
            sup.add_child(Arc::clone(&w1));
            sup.add_child(Arc::clone(&w2));
            sup.start();
            settle().await;

            sup.handle_child_failure(&w1.id()).await;
            settle().await;
            assert_eq!(w1.start_count(), 2);
            assert_eq!(w2.start_count(), 2);

            sup.stop().await;
        }

        #[tokio::test]
        async fn test_error_envelope_triggers_restart() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new("sup5", Arc::clone(&bus), config());
            let w1 = child(&bus, "w1");
            sup.add_child(Arc::clone(&w1));
            sup.start();
            settle().await;

            bus.deliver(msg(&w1.id(), "sup5", MessageKind::Error));
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert_eq!(w1.start_count(), 2);
            assert_eq!(w1.lifecycle(), LifecycleState::Running);

            sup.stop().await;
        }

        #[tokio::test]
        async fn test_stop_stops_children() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new("sup6", Arc::clone(&bus), config());
            let w1 = child(&bus, "w1");
            sup.add_child(Arc::clone(&w1));
            sup.start();
            settle().await;

            sup.stop().await;
            assert_eq!(w1.lifecycle(), LifecycleState::Stopped);
        }

        #[tokio::test]
        async fn test_add_child_to_running_supervisor_starts_it() {
            let bus = Arc::new(MessageBus::new());
            let sup = Supervisor::new("sup7", Arc::clone(&bus), config());
            sup.start();
            settle().await;

            let late = child(&bus, "late");
            sup.add_child(Arc::clone(&late));
            settle().await;
            assert_eq!(late.lifecycle(), LifecycleState::Running);

            sup.stop().await;
        }
    }

    // ── Document coordinator ───────────────────────────────────

    mod coordinator {
        use super::*;

        #[tokio::test]
        async fn test_lock_grant_and_deny() {
            let bus = Arc::new(MessageBus::new());
            let coord = DocCoordinator::new("coordinator", Arc::clone(&bus), 4);
            assert_eq!(coord.section_count(), 4);

            assert!(coord.try_lock_section("writer-1", 0));
            assert!(!coord.try_lock_section("writer-2", 0), "already locked");
            assert!(coord.try_lock_section("writer-2", 1));
            assert_eq!(coord.locked_by(0).unwrap(), "writer-1");
            assert_eq!(coord.locks_of("writer-1"), vec![0]);

            assert!(coord.release_section("writer-1", 0));
            assert!(!coord.release_section("writer-1", 0), "no longer held");
            assert!(coord.try_lock_section("writer-2", 0));
            assert!(!coord.try_lock_section("writer-1", 99), "out of range");
        }

        #[tokio::test]
        async fn test_lock_protocol_over_the_bus() {
            let bus = Arc::new(MessageBus::new());
            let coord = DocCoordinator::new("coordinator", Arc::clone(&bus), 2);
            let agent = coord.agent();
            bus.attach(&agent.id(), agent.mailbox());
            let writer = Arc::new(Mailbox::new(10));
            bus.attach("writer", Arc::clone(&writer));
            agent.start();
            settle().await;

            let request = Envelope::new("writer", agent.id(), MessageKind::LockRequest)
                .with_payload(serde_json::json!({ "section": 1 }));
            bus.deliver(request);
            let reply = writer.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(reply.kind, MessageKind::LockAcquired);
            assert_eq!(coord.locked_by(1).unwrap(), "writer");

            // A second requester is denied.
            let rival = Arc::new(Mailbox::new(10));
            bus.attach("rival", Arc::clone(&rival));
            let request = Envelope::new("rival", agent.id(), MessageKind::LockRequest)
                .with_payload(serde_json::json!({ "section": 1 }));
            bus.deliver(request);
            let reply = rival.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(reply.kind, MessageKind::LockDenied);

            agent.stop();
            agent.join().await;
        }

        #[tokio::test]
        async fn test_edit_requires_lock_and_broadcasts_update() {
            let bus = Arc::new(MessageBus::new());
            let coord = DocCoordinator::new("coordinator", Arc::clone(&bus), 2);
            let agent = coord.agent();
            bus.attach(&agent.id(), agent.mailbox());
            let writer = Arc::new(Mailbox::new(10));
            let observer = Arc::new(Mailbox::new(10));
            bus.attach("writer", Arc::clone(&writer));
            bus.attach("observer", Arc::clone(&observer));
            agent.start();
            settle().await;

            // Edit without the lock: dropped.
            let edit = Envelope::new("writer", agent.id(), MessageKind::DocEdit)
                .with_payload(serde_json::json!({ "section": 0, "content": "sneaky" }));
            bus.deliver(edit);
            settle().await;
            assert_eq!(coord.snapshot()[0], "");

            assert!(coord.try_lock_section("writer", 0));
            let edit = Envelope::new("writer", agent.id(), MessageKind::DocEdit)
                .with_payload(serde_json::json!({ "section": 0, "content": "chapter one" }));
            bus.deliver(edit);

            let update = observer.pop(Duration::from_secs(2)).await.unwrap();
            assert_eq!(update.kind, MessageKind::DocUpdate);
            assert_eq!(update.payload["section"], 0);
            assert_eq!(coord.snapshot()[0], "chapter one");

            // Release over the bus, then the rival can lock.
            let release = Envelope::new("writer", agent.id(), MessageKind::LockRelease)
                .with_payload(serde_json::json!({ "section": 0 }));
            bus.deliver(release);
            settle().await;
            assert!(coord.locked_by(0).is_none());

            agent.stop();
            agent.join().await;
        }
    }
}
