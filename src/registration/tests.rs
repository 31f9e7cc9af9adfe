//! Registration Module Tests
//!
//! Validates record creation, heartbeat emission and teardown of registrations.
//!
//! ## Test Scopes
//! - **Cycle Task**: immediate first run, interval measured from handler completion, shutdown.
//! - **Register**: weight-many records, precondition checks, sync announcement.
//! - **Heartbeats**: periodic tokens, liveness notifications, resync-triggered early tokens.
//! - **Stop**: one-time stop signal, record removal, isolation between services.
//! - **Termination**: SIGINT/SIGTERM go through the same one-time stop.

#[cfg(test)]
mod tests {
    use crate::registration::cycle::cycle_task;
    use crate::registration::engine::RegistrationEngine;
    use crate::registration::types::RegistrationConfig;
    use crate::registry::store::{InMemoryRegistry, Registry};
    use crate::transport::memory::InMemoryTransport;
    use crate::transport::types::{Transport, heartbeat_topic, resync_topic};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::Instant;

    fn engine() -> (Arc<InMemoryRegistry>, Arc<InMemoryTransport>, RegistrationEngine) {
        engine_with(RegistrationConfig {
            deregister_on_interrupt: false,
            exit_on_interrupt: false,
        })
    }

    fn engine_with(
        config: RegistrationConfig,
    ) -> (Arc<InMemoryRegistry>, Arc<InMemoryTransport>, RegistrationEngine) {
        let registry = InMemoryRegistry::new();
        let transport = InMemoryTransport::new();
        let engine = RegistrationEngine::new(registry.clone(), transport.clone(), config);
        (registry, transport, engine)
    }

    /// Default config, except that the test process must survive the signal.
    fn hooked_engine() -> (Arc<InMemoryRegistry>, Arc<InMemoryTransport>, RegistrationEngine) {
        engine_with(RegistrationConfig {
            exit_on_interrupt: false,
            ..RegistrationConfig::default()
        })
    }

    #[cfg(unix)]
    fn raise(signal: &str) {
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -{} {}", signal, std::process::id()))
            .status()
            .unwrap();
        assert!(status.success());
    }

    // ============================================================
    // CYCLE TASK TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_cycle_task_runs_immediately_then_per_interval() {
        // ARRANGE: handler that takes 300ms, interval of 1s
        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let origin = Instant::now();

        let task = tokio::spawn(cycle_task(
            Duration::from_secs(1),
            move || {
                let started_tx = started_tx.clone();
                async move {
                    let _ = started_tx.send(Instant::now());
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
            },
            shutdown_rx,
        ));

        // ACT: collect three invocation start times
        let mut starts = Vec::new();
        for _ in 0..3 {
            starts.push(started_rx.recv().await.unwrap());
        }
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        // ASSERT: first run at time 0, then interval counted from completion
        assert!(starts[0] - origin < Duration::from_millis(10));
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1300), "gap was {:?}", gap);
            assert!(gap < Duration::from_millis(1350), "gap was {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_task_stops_on_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = {
            let calls = calls.clone();
            tokio::spawn(cycle_task(
                Duration::from_secs(1),
                move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                    }
                },
                shutdown_rx,
            ))
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        let after_stop = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(after_stop, 3, "t=0, t=1s, t=2s");
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    // ============================================================
    // REGISTER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_register_creates_weight_records() {
        for weight in 1..=5 {
            let (registry, _transport, engine) = engine();

            let registration = engine
                .register("svc", "10.0.0.1:9000", weight, Duration::from_secs(2))
                .await
                .unwrap();

            let records = registry.records_for("svc");
            assert_eq!(records.len(), weight);
            assert!(records.values().all(|r| r.address == "10.0.0.1:9000"));
            assert_eq!(registration.records().len(), weight);

            registration.stop();
            registration.stopped().await;
        }
    }

    #[tokio::test]
    async fn test_register_rejects_zero_weight_and_interval() {
        let (registry, _transport, engine) = engine();

        assert!(
            engine
                .register("svc", "10.0.0.1:9000", 0, Duration::from_secs(2))
                .await
                .is_err()
        );
        assert!(
            engine
                .register("svc", "10.0.0.1:9000", 1, Duration::ZERO)
                .await
                .is_err()
        );
        assert!(registry.records_for("svc").is_empty());
    }

    #[tokio::test]
    async fn test_register_broadcasts_sync_announcement() {
        let (registry, _transport, engine) = engine();
        let mut announcements = registry.subscribe_sync();

        let registration = engine
            .register("svc", "10.0.0.1:9000", 2, Duration::from_secs(2))
            .await
            .unwrap();

        let message = announcements.recv().await.unwrap();
        assert!(message.contains("svc"));
        assert!(message.contains("10.0.0.1:9000"));
        assert!(message.contains("weight=2"));
        assert!(message.contains("2s"));

        registration.stop();
    }

    // ============================================================
    // HEARTBEAT TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_tokens_carry_interval() {
        let (_registry, transport, engine) = engine();
        let mut heartbeats = transport.channel(&heartbeat_topic("svc", "10.0.0.1:9000"));

        let registration = engine
            .register("svc", "10.0.0.1:9000", 1, Duration::from_secs(2))
            .await
            .unwrap();

        for _ in 0..3 {
            let token = heartbeats.next(Some(Duration::from_secs(3))).await;
            assert_eq!(token.as_deref(), Some("2s"));
        }

        registration.stop();
        registration.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_notifies_liveness_channel() {
        let (_registry, transport, engine) = engine();
        let mut liveness = transport.channel("svc");

        let registration = engine
            .register("svc", "10.0.0.1:9000", 1, Duration::from_secs(2))
            .await
            .unwrap();

        let announced = liveness.next(Some(Duration::from_secs(3))).await;
        assert_eq!(announced.as_deref(), Some("10.0.0.1:9000"));

        registration.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_request_triggers_early_heartbeat() {
        // ARRANGE: long interval so only a resync can produce the second token
        let (_registry, transport, engine) = engine();
        let mut heartbeats = transport.channel(&heartbeat_topic("svc", "10.0.0.1:9000"));

        let registration = engine
            .register("svc", "10.0.0.1:9000", 1, Duration::from_secs(60))
            .await
            .unwrap();
        let first = heartbeats.next(Some(Duration::from_secs(1))).await;
        assert_eq!(first.as_deref(), Some("1m0s"));

        // ACT
        transport
            .notify(&resync_topic("svc", "10.0.0.1:9000"), "10.9.9.9")
            .await
            .unwrap();

        // ASSERT
        let early = heartbeats.next(Some(Duration::from_secs(1))).await;
        assert_eq!(early.as_deref(), Some("1m0s"));

        registration.stop();
        registration.stopped().await;
    }

    // ============================================================
    // STOP TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_stop_removes_records_and_silences_heartbeats() {
        let (registry, transport, engine) = engine();
        let registration = engine
            .register("svc", "10.0.0.1:9000", 3, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(registration.stop());
        registration.stopped().await;
        let mut heartbeats = transport.channel(&heartbeat_topic("svc", "10.0.0.1:9000"));

        assert!(registration.is_stopped());
        assert!(registry.records_for("svc").is_empty());
        assert!(registry.store().is_empty());
        assert!(heartbeats.next(Some(Duration::from_secs(5))).await.is_none());
    }

    #[tokio::test]
    async fn test_second_stop_is_a_noop() {
        let (_registry, _transport, engine) = engine();
        let registration = engine
            .register("svc", "10.0.0.1:9000", 1, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(registration.stop());
        assert!(!registration.stop());
        registration.stopped().await;
        assert!(!registration.stop());
    }

    #[tokio::test]
    async fn test_dropping_handle_deregisters() {
        let (registry, _transport, engine) = engine();
        let registration = engine
            .register("svc", "10.0.0.1:9000", 2, Duration::from_secs(1))
            .await
            .unwrap();

        drop(registration);

        for _ in 0..100 {
            if registry.records_for("svc").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.records_for("svc").is_empty());
    }

    #[tokio::test]
    async fn test_stopping_one_service_leaves_others() {
        let (registry, _transport, engine) = engine();
        let alpha = engine
            .register("alpha", "10.0.0.1:1", 2, Duration::from_secs(1))
            .await
            .unwrap();
        let beta = engine
            .register("beta", "10.0.0.2:2", 3, Duration::from_secs(1))
            .await
            .unwrap();

        alpha.stop();
        alpha.stopped().await;

        assert!(registry.records_for("alpha").is_empty());
        assert_eq!(registry.records_for("beta").len(), 3);

        beta.stop();
        beta.stopped().await;
    }

    #[tokio::test]
    async fn test_dropping_handle_deregisters_with_interrupt_hook() {
        let (registry, _transport, engine) = hooked_engine();
        let registration = engine
            .register("svc", "10.0.0.1:9000", 2, Duration::from_secs(1))
            .await
            .unwrap();

        drop(registration);

        for _ in 0..100 {
            if registry.records_for("svc").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.records_for("svc").is_empty());
    }

    // ============================================================
    // TERMINATION TESTS
    // ============================================================

    #[cfg(unix)]
    #[tokio::test]
    async fn test_termination_signals_stop_registration() {
        assert!(RegistrationConfig::default().deregister_on_interrupt);

        for signal in ["TERM", "INT"] {
            // ARRANGE: fast heartbeats so a surviving ticker would be noticed
            let (registry, transport, engine) = hooked_engine();
            let registration = engine
                .register("svc", "10.0.0.1:9000", 2, Duration::from_millis(100))
                .await
                .unwrap();
            assert_eq!(registry.records_for("svc").len(), 2);

            // ACT
            raise(signal);
            tokio::time::timeout(Duration::from_secs(5), registration.stopped())
                .await
                .unwrap_or_else(|_| panic!("SIG{} did not stop the registration", signal));

            // ASSERT: fully torn down, and the signal consumed the one-time stop
            assert!(registration.is_stopped());
            assert!(!registration.stop());
            assert!(registry.records_for("svc").is_empty());
            assert!(registry.store().is_empty());

            let mut liveness = transport.channel("svc");
            let mut heartbeats = transport.channel(&heartbeat_topic("svc", "10.0.0.1:9000"));
            assert!(liveness.next(Some(Duration::from_millis(400))).await.is_none());
            assert!(heartbeats.next(Some(Duration::from_millis(100))).await.is_none());
        }
    }
}
