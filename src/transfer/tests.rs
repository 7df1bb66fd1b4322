//! Transfer Module Tests
//!
//! ## Test Scopes
//! - **Identity**: both directions derive the same transfer id.
//! - **Registry**: idempotent arrival, completion rules, terminal-result
//!   immutability, arrival waits (including racing arrivals) and cleanup,
//!   which spares active transfers and survives concurrent writers.
//! - **Service**: direction validation, placeholders, long-poll deadline and the
//!   full send -> ingest -> receive flow through a loopback peer.
//! - **HTTP**: status codes of the ingest routes, served on an ephemeral port.

#[cfg(test)]
mod tests {
    use crate::catalog::{MemoryCatalog, Node, StoreInfo};
    use crate::error::DataPlaneError;
    use crate::storage::{KeyRange, KvService, KvSettings, LocalShardClient, Operand, ShardStore};
    use crate::error::ErrorResponse;
    use crate::transfer::protocol::IngestResponse;
    use crate::transfer::{
        Party, RecvRegistry, SendTasks, TransferId, TransferJob, TransferMeta, TransferService, TransferSettings,
        TransferStatus, TransferType,
    };
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    fn meta(transfer_type: TransferType) -> TransferMeta {
        TransferMeta {
            job_id: "j1".to_string(),
            tag: "x".to_string(),
            src: Party::new("guest", "9999"),
            dst: Party::new("host", "9999"),
            transfer_type,
            status: TransferStatus::Unknown,
            data: None,
        }
    }

    fn new_registry() -> (RecvRegistry, mpsc::UnboundedReceiver<TransferJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RecvRegistry::new(64, tx, Arc::new(Notify::new())), rx)
    }

    fn fast_settings() -> TransferSettings {
        TransferSettings {
            broker_capacity: 64,
            broker_wait: Duration::from_millis(20),
            batch_size: 8,
            arrival_timeout: Duration::from_secs(5),
            status_poll_interval: Duration::from_millis(50),
            status_deadline: Duration::from_secs(10),
            finished_retention: Duration::from_secs(3600),
            janitor_interval: Duration::from_secs(60),
        }
    }

    fn kv() -> Arc<KvService> {
        let catalog = Arc::new(MemoryCatalog::with_nodes([
            Node::new(1, "127.0.0.1:9101".parse().unwrap()),
            Node::new(2, "127.0.0.1:9102".parse().unwrap()),
        ]));
        let shards = Arc::new(ShardStore::new());
        Arc::new(KvService::new(
            catalog,
            Arc::new(LocalShardClient::new(shards)),
            KvSettings {
                broker_wait: Duration::from_millis(20),
                page_size: 16,
                ..KvSettings::default()
            },
        ))
    }

    fn service(settings: TransferSettings) -> (Arc<KvService>, Arc<TransferService>) {
        let kv = kv();
        let service = TransferService::start(kv.clone(), "9999", HashMap::new(), settings);
        (kv, service)
    }

    fn records(n: usize) -> Vec<Operand> {
        (0..n)
            .map(|i| Operand::new(format!("row_{:03}", i), format!("payload_{}", i)))
            .collect()
    }

    // ============================================================
    // IDENTITY
    // ============================================================

    #[test]
    fn test_transfer_id_ignores_direction_and_status() {
        let send = meta(TransferType::Send);
        let recv = meta(TransferType::Recv).with_status(TransferStatus::Complete);

        assert_eq!(send.transfer_id(), recv.transfer_id());
        assert_eq!(send.transfer_id().0, "j1:x:guest/9999:host/9999");
    }

    #[test]
    fn test_unknown_direction_deserializes_as_unspecified() {
        let parsed: TransferMeta = serde_json::from_str(
            r#"{"job_id":"j","tag":"t","src":{"role":"a","party_id":"1"},
                "dst":{"role":"b","party_id":"2"},"type":"SIDEWAYS"}"#,
        )
        .unwrap();

        assert_eq!(parsed.transfer_type, TransferType::Unspecified);
        assert_eq!(parsed.status, TransferStatus::Unknown);
    }

    // ============================================================
    // REGISTRY
    // ============================================================

    #[tokio::test]
    async fn test_mark_arrived_is_idempotent() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Send);

        assert!(registry.mark_arrived(&m));
        let broker = registry.get_broker(&m.transfer_id()).unwrap();
        assert!(!registry.mark_arrived(&m), "Duplicate delivery must be a no-op");

        assert_eq!(registry.broker_count(), 1);
        assert!(Arc::ptr_eq(&broker, &registry.create_if_absent(&m.transfer_id())));
    }

    #[tokio::test]
    async fn test_mark_complete_requires_arrival() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Send);

        assert!(!registry.mark_complete(&m).unwrap());

        registry.mark_arrived(&m);
        assert!(registry.mark_complete(&m).unwrap());
        assert!(registry.get_broker(&m.transfer_id()).unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_push_without_broker_is_illegal_state() {
        let (registry, _jobs) = new_registry();

        let result = registry.push(&meta(TransferType::Send), records(1)).await;

        assert!(matches!(result, Err(DataPlaneError::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_finished_result_is_immutable() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Recv);

        assert!(registry.set_finished(&m, TransferStatus::Complete));
        assert!(!registry.set_finished(&m, TransferStatus::Error));

        let cached = registry.get_finished(&m.transfer_id()).unwrap();
        assert_eq!(cached.status, TransferStatus::Complete);
    }

    #[tokio::test]
    async fn test_create_task_posts_one_job() {
        let (registry, mut jobs) = new_registry();
        let m = meta(TransferType::Recv);

        assert!(registry.create_task(&m));
        assert!(!registry.create_task(&m));

        assert!(matches!(jobs.try_recv(), Ok(TransferJob::Recv(_))));
        assert!(jobs.try_recv().is_err(), "Second registration must not post a job");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_arrival_times_out_with_none() {
        let (registry, _jobs) = new_registry();

        let arrived = registry
            .wait_for_arrival(&meta(TransferType::Recv).transfer_id(), Duration::from_secs(30))
            .await;

        assert!(arrived.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_arrival_is_never_missed() {
        for round in 0..200 {
            let (registry, _jobs) = new_registry();
            let registry = Arc::new(registry);
            let m = meta(TransferType::Send);
            let id = m.transfer_id();

            let waiter = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.wait_for_arrival(&id, Duration::from_secs(5)).await })
            };
            let arriver = {
                let registry = registry.clone();
                let yields = rand::random::<u8>() % 4;
                tokio::spawn(async move {
                    for _ in 0..yields {
                        tokio::task::yield_now().await;
                    }
                    registry.mark_arrived(&m)
                })
            };

            assert!(arriver.await.unwrap());
            let seen = waiter.await.unwrap();
            assert!(seen.is_some(), "Round {}: waiter missed the arrival", round);
        }
    }

    #[tokio::test]
    async fn test_remove_releases_entry_but_keeps_result() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Recv);
        let id = m.transfer_id();
        registry.mark_arrived(&m);
        registry.set_finished(&m, TransferStatus::Complete);

        registry.remove(&TransferId("  ".to_string()));
        assert_eq!(registry.broker_count(), 1, "Blank id must not remove anything");

        registry.remove(&id);
        assert_eq!(registry.broker_count(), 0);
        assert!(registry.get_finished(&id).is_some());
        // After removal the same id may arrive again.
        assert!(registry.mark_arrived(&m));
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_entries() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Recv);
        registry.mark_arrived(&m);
        registry.set_finished(&m, TransferStatus::Error);
        let broker = registry.get_broker(&m.transfer_id()).unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = registry.sweep(Duration::ZERO);

        assert_eq!(evicted, 2);
        assert!(registry.get_finished(&m.transfer_id()).is_none());
        assert_eq!(registry.broker_count(), 0);
        assert!(broker.has_error(), "Abandoned broker should release its consumer");
    }

    #[tokio::test]
    async fn test_sweep_keeps_broker_that_is_still_receiving() {
        // ARRANGE: transfer older than the retention, but pushing
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Send);
        registry.mark_arrived(&m);
        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.push(&m, records(1)).await.unwrap();

        // ACT
        let evicted = registry.sweep(Duration::from_millis(30));

        // ASSERT: recent activity keeps it alive
        assert_eq!(evicted, 0);
        let broker = registry.get_broker(&m.transfer_id()).unwrap();
        assert!(!broker.has_error());
        assert_eq!(registry.push(&m, records(2)).await.unwrap(), 2);

        // Once it goes quiet it is abandoned.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.sweep(Duration::from_millis(30)), 1);
        assert!(broker.has_error());
        assert!(registry.get_broker(&m.transfer_id()).is_none());
    }

    #[tokio::test]
    async fn test_sweep_releases_broker_of_finished_transfer() {
        let (registry, _jobs) = new_registry();
        let m = meta(TransferType::Recv);
        registry.mark_arrived(&m);
        registry.set_finished(&m, TransferStatus::Complete);

        let evicted = registry.sweep(Duration::from_secs(3600));

        assert_eq!(evicted, 1, "Only the broker goes; the result is still fresh");
        assert_eq!(registry.broker_count(), 0);
        assert_eq!(
            registry.get_finished(&m.transfer_id()).unwrap().status,
            TransferStatus::Complete
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_counts_evictions_while_results_land() {
        // ARRANGE: a writer keeps finishing transfers during sweeps
        let (registry, _jobs) = new_registry();
        let registry = Arc::new(registry);
        let total = 2000;

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..total {
                    let mut m = meta(TransferType::Recv);
                    m.tag = format!("t{}", i);
                    registry.set_finished(&m, TransferStatus::Complete);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        // ACT
        let mut evicted = 0;
        while !writer.is_finished() {
            evicted += registry.sweep(Duration::ZERO);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        evicted += registry.sweep(Duration::ZERO);

        // ASSERT: every result counted exactly once
        assert_eq!(evicted, total);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_send_task_sweep_counts_evictions_while_tasks_land() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tasks = Arc::new(SendTasks::new(tx, Arc::new(Notify::new())));
        let total = 2000;

        let writer = {
            let tasks = tasks.clone();
            tokio::spawn(async move {
                for i in 0..total {
                    let mut m = meta(TransferType::Send);
                    m.tag = format!("t{}", i);
                    tasks.get_or_create(&m);
                    tasks.update_status(&m.transfer_id(), TransferStatus::Complete);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let mut evicted = 0;
        while !writer.is_finished() {
            evicted += tasks.sweep(Duration::ZERO);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        evicted += tasks.sweep(Duration::ZERO);

        assert_eq!(evicted, total);
        assert!(tasks.is_empty());
    }

    // ============================================================
    // SERVICE
    // ============================================================

    #[tokio::test]
    async fn test_check_status_now_rejects_unspecified_direction() {
        let (_kv, service) = service(fast_settings());

        let result = service.check_status_now(&meta(TransferType::Unspecified));

        assert!(matches!(result, Err(DataPlaneError::InvalidArgument(_))));
        assert!(matches!(
            service.check_status(&meta(TransferType::Unspecified)).await,
            Err(DataPlaneError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_status_without_task_echoes_request() {
        let (_kv, service) = service(fast_settings());
        let send = meta(TransferType::Send);
        let recv = meta(TransferType::Recv);

        assert_eq!(service.check_status_now(&send).unwrap(), send);
        assert_eq!(service.check_status_now(&recv).unwrap(), recv);
        // No send task: the long poll has nothing to wait for.
        assert_eq!(service.check_status(&send).await.unwrap(), send);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_returns_placeholder_at_deadline() {
        let (_kv, service) = service(TransferSettings {
            status_deadline: Duration::from_secs(300),
            status_poll_interval: Duration::from_millis(500),
            ..fast_settings()
        });
        let recv = meta(TransferType::Recv);
        let started = tokio::time::Instant::now();

        let result = service.check_status(&recv).await.unwrap();

        assert_eq!(result.status, TransferStatus::Unknown);
        assert!(started.elapsed() >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_without_sender_finishes_as_error() {
        let (_kv, service) = service(TransferSettings {
            arrival_timeout: Duration::from_secs(2),
            ..fast_settings()
        });
        let recv = meta(TransferType::Recv);

        let placeholder = service.recv(&recv);
        assert_eq!(placeholder, recv);

        let result = service.check_status(&recv).await.unwrap();
        assert_eq!(result.status, TransferStatus::Error);
        assert_eq!(service.recv(&recv).status, TransferStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ingest_path_completes_receive() {
        // ARRANGE: receiver registers before any data exists
        let (kv, service) = service(fast_settings());
        let mut recv = meta(TransferType::Recv);
        recv.data = Some(StoreInfo::new("inbox", "x"));

        let placeholder = service.recv(&recv);
        assert_eq!(placeholder, recv, "Fresh recv must echo the request");

        // ACT: sender's ingest calls
        let send = meta(TransferType::Send);
        assert!(service.ingest_start(&send));
        assert!(!service.ingest_start(&send), "Retried start is ignored");
        assert_eq!(service.ingest_push(&send, records(25)).await.unwrap(), 25);
        assert!(service.ingest_end(&send).unwrap());

        // ASSERT
        let result = service.check_status(&recv).await.unwrap();
        assert_eq!(result.status, TransferStatus::Complete);
        assert_eq!(
            service.check_status_now(&recv).unwrap().status,
            TransferStatus::Complete
        );
        assert_eq!(kv.count(&StoreInfo::new("inbox", "x")).await.unwrap(), 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_and_recv_move_a_table_end_to_end() {
        // ARRANGE: source table on the sending side
        let (kv, service) = service(fast_settings());
        let source = StoreInfo::new("outbox", "features");
        let target = StoreInfo::new("inbox", "features");
        kv.create_if_absent(&source, Some(3), None).await.unwrap();
        kv.put_all(&source, records(100)).await.unwrap();

        let mut send = meta(TransferType::Send);
        send.data = Some(source.clone());
        let mut recv = meta(TransferType::Recv);
        recv.data = Some(target.clone());

        // ACT
        let submitted = service.send(&send);
        assert_eq!(submitted, send);
        service.recv(&recv);

        let received = service.check_status(&recv).await.unwrap();
        let sent = service.check_status(&send).await.unwrap();

        // ASSERT
        assert_eq!(received.status, TransferStatus::Complete);
        assert_eq!(sent.status, TransferStatus::Complete);
        assert_eq!(kv.count(&target).await.unwrap(), 100);

        let mut copied = Vec::new();
        kv.iterate(&target, KeyRange::all())
            .await
            .unwrap()
            .consume(Duration::from_millis(20), |batch| {
                copied.extend(batch);
                async { Ok(()) }
            })
            .await
            .unwrap();
        copied.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(copied, records(100));

        // Resubmitting returns the existing task instead of sending twice.
        assert_eq!(service.send(&send).status, TransferStatus::Complete);
        assert_eq!(service.send_tasks().len(), 1);
    }

    // ============================================================
    // HTTP
    // ============================================================

    async fn serve(service: Arc<TransferService>) -> String {
        let app = crate::transfer::handlers::routes().layer(axum::extract::Extension(service));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_ingest_end_before_start_is_conflict() {
        let (_kv, service) = service(fast_settings());
        let base = serve(service.clone()).await;
        let client = reqwest::Client::new();
        let send = meta(TransferType::Send);

        let early = client
            .post(format!("{}/internal/transfer/end", base))
            .json(&send)
            .send()
            .await
            .unwrap();
        assert_eq!(early.status(), reqwest::StatusCode::CONFLICT);
        assert!(!early.json::<IngestResponse>().await.unwrap().accepted);

        let start = client
            .post(format!("{}/internal/transfer/start", base))
            .json(&send)
            .send()
            .await
            .unwrap();
        assert!(start.json::<IngestResponse>().await.unwrap().accepted);

        let end = client
            .post(format!("{}/internal/transfer/end", base))
            .json(&send)
            .send()
            .await
            .unwrap();
        assert_eq!(end.status(), reqwest::StatusCode::OK);
        assert!(end.json::<IngestResponse>().await.unwrap().accepted);
    }

    #[tokio::test]
    async fn test_push_before_start_returns_error_body() {
        let (_kv, service) = service(fast_settings());
        let base = serve(service).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/internal/transfer/push", base))
            .json(&serde_json::json!({ "meta": meta(TransferType::Send), "records": records(2) }))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
        let error: ErrorResponse = resp.json().await.unwrap();
        assert!(error.error.starts_with("illegal state"), "{}", error.error);
    }

    #[tokio::test]
    async fn test_check_status_now_with_unspecified_direction_is_bad_request() {
        let (_kv, service) = service(fast_settings());
        let base = serve(service).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/transfer/check_status_now", base))
            .json(&meta(TransferType::Unspecified))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let error: ErrorResponse = resp.json().await.unwrap();
        assert!(error.error.starts_with("invalid argument"), "{}", error.error);
    }
}
