//! End-to-end measurement session tests
//!
//! These tests drive complete sessions through scripted providers and
//! verify the observable contract: fallback accounting, estimation flags,
//! progress ordering, persistence retry and cancellation salvage.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{FlakyStore, Script, ScriptedProvider, chain, deps, simple_chains, subject};
use netgauge_core::provider::{ESTIMATOR_NAME, HeuristicEstimator};
use netgauge_core::{
    JsonFileStore, MeasurementSession, MemoryResultStore, Phase, PhaseChains, ProgressEvent,
    ProgressKind, ResultStore, SessionError,
};

async fn drain(mut sub: netgauge_core::ProgressSubscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.recv().await {
        events.push(event);
    }
    events
}

// ==================== Fallback Tests ====================

#[tokio::test]
async fn third_download_provider_settles_after_two_failures() {
    let third = ScriptedProvider::new("third", Phase::Download, Script::Samples(vec![60.0]));
    let third_calls = third.calls();
    let chains = PhaseChains {
        latency: chain(
            Phase::Latency,
            vec![ScriptedProvider::new("rtt", Phase::Latency, Script::Samples(vec![20.0]))],
        ),
        download: chain(
            Phase::Download,
            vec![
                ScriptedProvider::new("first", Phase::Download, Script::Fail),
                ScriptedProvider::new("second", Phase::Download, Script::Fail),
                third,
            ],
        ),
        upload: chain(
            Phase::Upload,
            vec![ScriptedProvider::new("up", Phase::Upload, Script::Samples(vec![20.0]))],
        ),
    };

    let report = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())))
        .start()
        .await
        .unwrap();

    let download_failures: Vec<_> = report
        .attempted_providers
        .iter()
        .filter(|a| a.phase == Phase::Download && a.is_failure())
        .map(|a| a.provider.as_str())
        .collect();
    assert_eq!(download_failures, vec!["first", "second"]);
    assert_eq!(report.failed_attempts(), 2);
    assert_eq!(report.result.download_mbps, 60.0);
    assert_eq!(third_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_provider_samples_do_not_leak_into_result() {
    let chains = PhaseChains {
        latency: chain(
            Phase::Latency,
            vec![ScriptedProvider::new("rtt", Phase::Latency, Script::Samples(vec![20.0]))],
        ),
        download: chain(
            Phase::Download,
            vec![
                // settles below the 1 Mbps threshold
                ScriptedProvider::new("trickle", Phase::Download, Script::Samples(vec![0.3])),
                ScriptedProvider::new("solid", Phase::Download, Script::Samples(vec![45.0])),
            ],
        ),
        upload: chain(
            Phase::Upload,
            vec![ScriptedProvider::new("up", Phase::Upload, Script::Samples(vec![9.0]))],
        ),
    };

    let report = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())))
        .start()
        .await
        .unwrap();

    assert_eq!(report.result.download_mbps, 45.0);
    assert_eq!(report.result.download_sample_count, 1);
}

#[tokio::test]
async fn same_named_providers_keep_their_samples_apart() {
    let chains = PhaseChains {
        latency: chain(
            Phase::Latency,
            vec![ScriptedProvider::new("rtt", Phase::Latency, Script::Samples(vec![20.0]))],
        ),
        download: chain(
            Phase::Download,
            vec![
                ScriptedProvider::new("cdn", Phase::Download, Script::Samples(vec![0.3, 0.4])),
                ScriptedProvider::new("cdn", Phase::Download, Script::Samples(vec![45.0])),
            ],
        ),
        upload: chain(
            Phase::Upload,
            vec![ScriptedProvider::new("up", Phase::Upload, Script::Samples(vec![9.0]))],
        ),
    };

    let report = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())))
        .start()
        .await
        .unwrap();

    assert_eq!(report.result.download_mbps, 45.0);
    assert_eq!(report.result.download_sample_count, 1);
    assert_eq!(report.failed_attempts(), 1);
}

#[tokio::test]
async fn measured_provider_named_like_the_estimator_is_not_reported_as_settled() {
    let mut chains = simple_chains(
        Script::Samples(vec![12.0]),
        Script::Samples(vec![40.0]),
        Script::Fail,
    );
    chains.upload = chain(
        Phase::Upload,
        vec![ScriptedProvider::new(ESTIMATOR_NAME, Phase::Upload, Script::Samples(vec![0.3]))],
    );
    chains.upload.push(Arc::new(HeuristicEstimator::new()));

    let report = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())))
        .start()
        .await
        .unwrap();

    assert_eq!(report.result.upload_mbps, 4.0);
    assert!(report.result.is_upload_estimated);
    assert_eq!(report.result.upload_sample_count, 0);
}

#[tokio::test]
async fn estimator_stands_in_for_failed_upload() {
    let mut chains = simple_chains(
        Script::Samples(vec![12.0]),
        Script::Samples(vec![40.0]),
        Script::Fail,
    );
    chains.upload.push(Arc::new(HeuristicEstimator::new()));

    let report = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())))
        .start()
        .await
        .unwrap();

    assert!(report.result.is_upload_estimated);
    assert_eq!(report.result.upload_mbps, 4.0);
    assert_eq!(report.result.upload_sample_count, 0);
    assert!(!report.result.is_latency_estimated);
}

#[tokio::test]
async fn total_download_failure_is_the_only_fatal_phase() {
    let chains = simple_chains(Script::Fail, Script::Fail, Script::Samples(vec![10.0]));
    let store = Arc::new(MemoryResultStore::new());
    let session = MeasurementSession::new(subject(), deps(chains, store.clone()));
    let progress = session.subscribe();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::NoSamplesCollected { phase: Phase::Download }));
    assert!(store.is_empty().await);

    let events = drain(progress).await;
    let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].kind, ProgressKind::Error);
    assert!(terminal[0].message.contains("download"));
}

// ==================== Progress Tests ====================

#[tokio::test]
async fn every_consumer_sees_non_decreasing_percent() {
    let chains = simple_chains(
        Script::Samples(vec![30.0, 20.0, 25.0]),
        Script::Samples(vec![10.0, 50.0, 30.0, 70.0]),
        Script::Samples(vec![5.0, 8.0]),
    );
    let session = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())));
    let first = session.subscribe();
    let second = session.subscribe();

    let consumer_a = tokio::spawn(drain(first));
    let consumer_b = tokio::spawn(drain(second));
    session.start().await.unwrap();

    for events in [consumer_a.await.unwrap(), consumer_b.await.unwrap()] {
        assert!(!events.is_empty());
        assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));

        let last = events.last().unwrap();
        assert_eq!(last.kind, ProgressKind::Completed);
        assert_eq!(last.percent, 100);
        let data = last.data.as_ref().unwrap();
        assert_eq!(data["result"]["downloadMbps"], 70.0);
        assert_eq!(data["persisted"], true);
    }
}

#[tokio::test]
async fn download_progress_carries_current_rate() {
    let chains = simple_chains(
        Script::Samples(vec![20.0]),
        Script::Samples(vec![33.0]),
        Script::Samples(vec![11.0]),
    );
    let session = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())));
    let progress = tokio::spawn(drain(session.subscribe()));
    session.start().await.unwrap();

    let events = progress.await.unwrap();
    let download: Vec<_> = events
        .iter()
        .filter(|e| e.kind == ProgressKind::Download)
        .collect();
    assert!(download.iter().any(|e| e.current_rate_mbps == Some(33.0)));
    assert!(download.iter().all(|e| (20..=60).contains(&e.percent)));
}

// ==================== Persistence Tests ====================

#[tokio::test]
async fn retried_save_after_transient_failure_stores_one_record() {
    let store = Arc::new(FlakyStore::new(1));
    let chains = simple_chains(
        Script::Samples(vec![20.0]),
        Script::Samples(vec![40.0]),
        Script::Samples(vec![10.0]),
    );

    let report = MeasurementSession::new(subject(), deps(chains, store.clone()))
        .start()
        .await
        .unwrap();

    assert!(report.persisted);
    assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    assert_eq!(store.reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.len().await, 1);
    assert!(store.get(report.test_id).await.unwrap().is_some());
}

#[tokio::test]
async fn persistent_store_failure_is_reported_not_raised() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let chains = simple_chains(
        Script::Samples(vec![20.0]),
        Script::Samples(vec![40.0]),
        Script::Samples(vec![10.0]),
    );

    let report = MeasurementSession::new(subject(), deps(chains, store.clone()))
        .start()
        .await
        .unwrap();

    assert!(!report.persisted);
    assert!(report.stored_id.is_none());
    assert_eq!(store.saves.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn json_file_store_round_trips_a_session() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::open(temp.path()).await.unwrap());
    let chains = simple_chains(
        Script::Samples(vec![20.0]),
        Script::Samples(vec![40.0]),
        Script::Samples(vec![10.0]),
    );

    let report = MeasurementSession::new(subject(), deps(chains, store.clone()))
        .start()
        .await
        .unwrap();

    let stored = store.get(report.test_id).await.unwrap().unwrap();
    assert_eq!(stored.result, report.result);
    assert_eq!(stored.subject, report.subject);
    assert_eq!(store.list(Some("subject-7")).await.unwrap().len(), 1);
}

// ==================== Cancellation Tests ====================

#[tokio::test]
async fn cancel_mid_download_salvages_partial_result() {
    let chains = simple_chains(
        Script::Samples(vec![18.0]),
        Script::StallAfter(vec![25.0, 35.0]),
        Script::Samples(vec![10.0]),
    );
    let session = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())));
    let handle = session.cancel_handle();
    let mut progress = session.subscribe();

    let run = tokio::spawn(session.start());

    // cancel once the download has reported a rate
    while let Some(event) = progress.recv().await {
        if event.kind == ProgressKind::Download && event.current_rate_mbps.is_some() {
            handle.cancel();
            break;
        }
    }

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert!(report.result.is_upload_estimated);
    assert!(!report.result.is_latency_estimated);
    assert_eq!(report.result.download_mbps, 35.0);
    assert_eq!(report.result.upload_mbps, 3.5);
    assert!(report.persisted);
}

#[tokio::test]
async fn cancel_during_latency_fails_with_cancelled() {
    let chains = simple_chains(
        Script::StallAfter(vec![15.0]),
        Script::Samples(vec![40.0]),
        Script::Samples(vec![10.0]),
    );
    let session = MeasurementSession::new(subject(), deps(chains, Arc::new(MemoryResultStore::new())));
    let handle = session.cancel_handle();
    let mut progress = session.subscribe();
    let run = tokio::spawn(session.start());

    while let Some(event) = progress.recv().await {
        if event.phase == "latency" {
            handle.cancel();
            break;
        }
    }

    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { during } if during == "latency"));
}
