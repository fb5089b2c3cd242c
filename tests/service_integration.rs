//! Integration tests for the embedding service lifecycle and batching.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{expected_vector, texts, CountingLoader, Harness, HashEmbedder, FAIL_MARKER, TEST_DIM};
use vectorizer::embeddings::{
    cosine_similarity, global, install_global, HealthStatus, ServiceState, PROBE_TEXT,
};
use vectorizer::EmbeddingError;

/// Concurrent first callers share a single model load.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_loads_once() {
    let loader = CountingLoader::new(Arc::new(HashEmbedder::default()))
        .slow(Duration::from_millis(200));
    let harness = Harness::with_loader(8, loader);

    let calls = (0..16).map(|_| {
        let service = harness.service.clone();
        tokio::spawn(async move { service.initialize().await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert!(result.unwrap().is_ok());
    }
    assert_eq!(harness.loads(), 1);
    assert_eq!(harness.service.state(), ServiceState::Ready);

    harness.service.initialize().await.unwrap();
    assert_eq!(harness.loads(), 1);
}

/// Every waiter of a failed attempt sees the failure; the next call retries.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_initialize_is_shared_then_retried() {
    let loader = CountingLoader::new(Arc::new(HashEmbedder::default()))
        .failing(1)
        .slow(Duration::from_millis(200));
    let harness = Harness::with_loader(8, loader);

    let calls = (0..8).map(|_| {
        let service = harness.service.clone();
        tokio::spawn(async move { service.initialize().await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, EmbeddingError::Initialization(_)));
        assert!(err.to_string().contains("model host unreachable"));
    }
    assert_eq!(harness.loads(), 1);
    assert_eq!(harness.service.state(), ServiceState::Uninitialized);

    harness.service.initialize().await.unwrap();
    assert_eq!(harness.loads(), 2);
    assert!(harness.service.is_initialized());
}

/// A load whose every waiter gave up keeps going for the next caller.
#[tokio::test]
async fn test_abandoned_initialize_is_resumed_not_restarted() {
    let loader = CountingLoader::new(Arc::new(HashEmbedder::default()))
        .slow(Duration::from_millis(200));
    let harness = Harness::with_loader(4, loader);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), harness.service.initialize()).await;
    assert!(abandoned.is_err());
    assert_eq!(harness.service.state(), ServiceState::Initializing);

    harness.service.initialize().await.unwrap();
    assert_eq!(harness.loads(), 1);
    assert_eq!(harness.service.state(), ServiceState::Ready);
}

/// Callers retrying straight after a shared failure start exactly one new
/// load, however their settling interleaves.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retry_after_failure_loads_once_more() {
    let loader = CountingLoader::new(Arc::new(HashEmbedder::default()))
        .failing(1)
        .slow(Duration::from_millis(100));
    let harness = Harness::with_loader(4, loader);

    let calls = (0..12).map(|_| {
        let service = harness.service.clone();
        tokio::spawn(async move {
            if service.initialize().await.is_ok() {
                return Ok(());
            }
            service.initialize().await
        })
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(harness.loads(), 2);
    assert_eq!(harness.service.state(), ServiceState::Ready);
}

/// Output order matches input order whatever the batch size.
#[tokio::test]
async fn test_order_preserved_across_batch_sizes() {
    let input = texts(8);

    for batch_size in [3, 8, 20] {
        let harness = Harness::new(batch_size);
        let output = harness.service.embed_many(input.clone()).await.unwrap();

        assert_eq!(output.len(), input.len(), "batch_size {batch_size}");
        for (text, embedding) in input.iter().zip(&output) {
            assert_eq!(embedding, &expected_vector(text), "batch_size {batch_size}");
        }
    }
}

/// Inference never runs more than `batch_size` texts at once.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parallelism_bounded_by_batch_size() {
    let embedder = Arc::new(HashEmbedder::with_delay(Duration::from_millis(10)));
    let harness = Harness::with_loader(3, CountingLoader::new(Arc::clone(&embedder)));

    let output = harness.service.embed_many(texts(10)).await.unwrap();

    assert_eq!(output.len(), 10);
    assert_eq!(embedder.calls(), 10);
    assert!(embedder.max_in_flight() <= 3);
}

/// Callers beyond the worker queue wait without stalling other tasks on
/// the same runtime thread.
#[tokio::test(flavor = "current_thread")]
async fn test_saturated_pool_keeps_runtime_responsive() {
    let embedder = Arc::new(HashEmbedder::with_delay(Duration::from_millis(5)));
    let harness = Harness::with_loader(1, CountingLoader::new(Arc::clone(&embedder)));
    harness.service.initialize().await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let heartbeat = {
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut worst = Duration::ZERO;
            let mut last = Instant::now();
            while !done.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let now = Instant::now();
                worst = worst.max(now - last);
                last = now;
            }
            worst
        })
    };

    let calls = (0..400).map(|i| {
        let service = harness.service.clone();
        async move { service.embed_one(format!("text {i}")).await }
    });
    let results = futures::future::join_all(calls).await;
    done.store(true, Ordering::SeqCst);
    let worst = heartbeat.await.unwrap();

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(embedder.calls(), 400);
    assert!(
        worst < Duration::from_millis(250),
        "runtime stalled for {worst:?}"
    );
}

#[tokio::test]
async fn test_embeddings_are_unit_length() {
    let harness = Harness::new(8);
    let output = harness.service.embed_many(texts(5)).await.unwrap();

    for embedding in output {
        assert_eq!(embedding.len(), TEST_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }
}

#[tokio::test]
async fn test_empty_list_rejected() {
    let harness = Harness::new(8);

    let err = harness.service.embed_many(Vec::new()).await.unwrap_err();
    assert!(matches!(err, EmbeddingError::InvalidInput(_)));

    let err = harness
        .service
        .embed_documents(Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    assert_eq!(harness.loads(), 0);
}

/// A lone empty string is a one-element request, not an empty one.
#[tokio::test]
async fn test_single_empty_string_is_embedded() {
    let harness = Harness::new(8);

    let output = harness.service.embed_documents("").await.unwrap();
    assert_eq!(output.len(), 1);
    assert_eq!(output[0], expected_vector(""));
}

#[tokio::test]
async fn test_embed_one_matches_embed_many() {
    let harness = Harness::new(8);

    let one = harness.service.embed_one("the cat sat").await.unwrap();
    let many = harness
        .service
        .embed_many(vec!["the cat sat".to_string()])
        .await
        .unwrap();
    assert_eq!(vec![one], many);
}

/// A failing text aborts the whole call and is named in the error.
#[tokio::test]
async fn test_generation_failure_names_text() {
    let harness = Harness::new(4);
    let mut input = texts(6);
    input[5] = format!("{FAIL_MARKER} on purpose");

    let err = harness.service.embed_many(input).await.unwrap_err();
    match err {
        EmbeddingError::Generation { index, text, reason } => {
            assert_eq!(index, 5);
            assert_eq!(text, "FAIL on purpose");
            assert!(reason.contains("cannot embed"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = harness
        .service
        .embed_one(format!("{FAIL_MARKER}!"))
        .await
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::Generation { index: 0, .. }));
}

/// The dimension probe runs once no matter how often it is asked for.
#[tokio::test]
async fn test_dimension_probed_once() {
    let harness = Harness::new(8);

    for _ in 0..5 {
        assert_eq!(harness.service.embedding_dimension().await.unwrap(), TEST_DIM);
    }
    assert_eq!(harness.embedder.calls(), 1);
    assert_eq!(harness.service.cached_dimension(), Some(TEST_DIM));
    assert_eq!(harness.loads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dimension_requests_probe_once() {
    let harness = Harness::new(8);

    let calls = (0..10).map(|_| {
        let service = harness.service.clone();
        tokio::spawn(async move { service.embedding_dimension().await })
    });
    for result in futures::future::join_all(calls).await {
        assert_eq!(result.unwrap().unwrap(), TEST_DIM);
    }
    assert_eq!(harness.embedder.calls(), 1);
}

#[tokio::test]
async fn test_probe_uses_fixed_text() {
    let harness = Harness::new(8);
    harness.service.embedding_dimension().await.unwrap();

    let probe = harness.service.embed_one(PROBE_TEXT).await.unwrap();
    assert_eq!(probe, expected_vector(PROBE_TEXT));
}

#[tokio::test]
async fn test_health_check_healthy() {
    let harness = Harness::new(8);

    let report = harness.service.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.model.as_deref(), Some("test/hash-model"));
    assert_eq!(report.dimension, Some(TEST_DIM));
    assert!(report.initialized);
    assert!(report.error.is_none());
}

/// Health reporting swallows load failures.
#[tokio::test]
async fn test_health_check_unhealthy_when_load_fails() {
    let loader = CountingLoader::new(Arc::new(HashEmbedder::default())).failing(usize::MAX);
    let harness = Harness::with_loader(8, loader);

    let report = harness.service.health_check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(!report.initialized);
    assert!(!report.error.as_deref().unwrap_or_default().is_empty());

    let info = harness.service.service_info().await;
    assert_eq!(info.status, HealthStatus::Error);
    assert_eq!(info.model, "test/hash-model");
    assert!(info.error.is_some());
}

#[tokio::test]
async fn test_service_info_healthy() {
    let harness = Harness::new(8);

    let info = harness.service.service_info().await;
    assert_eq!(info.name, "vectorizer");
    assert_eq!(info.status, HealthStatus::Healthy);
    assert_eq!(info.dimension, Some(TEST_DIM));
    assert_eq!(info.execution, "local");
}

#[tokio::test]
async fn test_identical_texts_are_most_similar() {
    let harness = Harness::new(8);
    let output = harness
        .service
        .embed_documents(vec!["same text", "same text", "other text"])
        .await
        .unwrap();

    assert!((cosine_similarity(&output[0], &output[1]) - 1.0).abs() < 1e-5);
    assert!(cosine_similarity(&output[0], &output[2]) < 0.999);
}

#[test]
fn test_global_installs_once() {
    let first = Harness::new(8).service;
    let installed = install_global(first).unwrap();
    assert_eq!(installed.model_id(), "test/hash-model");
    assert!(global().is_some());

    let second = Harness::new(8).service;
    assert!(install_global(second).is_err());
}
