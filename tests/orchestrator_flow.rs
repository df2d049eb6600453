//! End-to-end request path: cache miss/hit, single-flight, failures, streaming.

mod common;

use ai_lib_orchestrator::routing::ComplexityTier;
use ai_lib_orchestrator::{BackendId, Error, GenerationRequest, StreamEvent, TierKind};
use common::{harness, FakeSearch, HarnessBuilder, ScriptedBackend};
use futures::future::join_all;
use futures::StreamExt;
use std::time::{Duration, Instant};

#[tokio::test]
async fn miss_then_hit_invokes_backend_once() {
    let h = harness(ScriptedBackend::local(&["SYN, ", "SYN-ACK, ", "ACK"]));
    let req = GenerationRequest::chat("explain TCP handshake");

    let first = h.orchestrator.handle(req.clone()).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.content(), "SYN, SYN-ACK, ACK");
    assert_eq!(first.route.as_ref().map(|r| r.backend), Some(BackendId::Local));
    assert_eq!(h.local.calls(), 1);

    let second = h.orchestrator.handle(req).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.cache_tier, Some(TierKind::Memory));
    assert!(second.route.is_none());
    assert_eq!(second.response, first.response);
    assert_eq!(h.local.calls(), 1);

    let stats = h.orchestrator.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits.memory, 1);
    assert_eq!(stats.generations.local, 1);
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_generation() {
    let h = harness(ScriptedBackend::local(&["shared answer"]).with_delay(Duration::from_millis(200)));
    let req = GenerationRequest::chat("explain TCP handshake");

    let results = join_all((0..10).map(|_| h.orchestrator.handle(req.clone()))).await;

    assert_eq!(h.local.calls(), 1);
    for r in results {
        assert_eq!(r.unwrap().content(), "shared answer");
    }
    assert!(h.orchestrator.stats().coalesced >= 1);
}

#[tokio::test]
async fn distinct_parameters_do_not_coalesce() {
    let h = harness(ScriptedBackend::local(&["answer"]));
    let base = GenerationRequest::chat("explain TCP handshake");

    h.orchestrator.handle(base.clone()).await.unwrap();
    h.orchestrator
        .handle(base.clone().with_temperature(0.1))
        .await
        .unwrap();
    h.orchestrator.handle(base.with_max_tokens(64)).await.unwrap();

    assert_eq!(h.local.calls(), 3);
}

#[tokio::test]
async fn failed_generation_is_not_cached_and_retries() {
    let h = harness(
        ScriptedBackend::local(&["second time lucky"])
            .failing(1, || Error::GenerationFailed("model returned nothing".into())),
    );
    let req = GenerationRequest::chat("explain TCP handshake");

    let err = h.orchestrator.handle(req.clone()).await.unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(_)));
    assert_eq!(err.status_code(), 500);
    assert_eq!(h.orchestrator.cache().memory().len_sync(), 0);

    let ok = h.orchestrator.handle(req.clone()).await.unwrap();
    assert!(!ok.cache_hit);
    assert_eq!(h.local.calls(), 2);

    let hit = h.orchestrator.handle(req).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(h.orchestrator.stats().generation_failures.local, 1);
}

#[tokio::test]
async fn flight_failure_reaches_every_waiter() {
    let h = harness(
        ScriptedBackend::local(&["unused"])
            .with_delay(Duration::from_millis(150))
            .failing(1, || Error::GenerationFailed("boom".into())),
    );
    let req = GenerationRequest::chat("explain TCP handshake");

    let results = join_all((0..5).map(|_| h.orchestrator.handle(req.clone()))).await;

    assert_eq!(h.local.calls(), 1);
    for r in results {
        let e = r.unwrap_err();
        assert_eq!(e.code(), "E3001");
        assert!(e.to_string().contains("boom"));
    }
}

#[tokio::test]
async fn bypass_skips_cache_in_both_directions() {
    let h = harness(ScriptedBackend::local(&["fresh"]));
    let req = GenerationRequest::chat("explain TCP handshake");

    h.orchestrator.handle(req.clone()).await.unwrap();
    let bypassed = h
        .orchestrator
        .handle(req.clone().bypass_cache(true))
        .await
        .unwrap();
    assert!(!bypassed.cache_hit);
    assert_eq!(h.local.calls(), 2);

    let other = GenerationRequest::chat("describe UDP").bypass_cache(true);
    h.orchestrator.handle(other.clone()).await.unwrap();
    h.orchestrator.handle(other.bypass_cache(false)).await.unwrap();
    assert_eq!(h.local.calls(), 4);
}

#[tokio::test]
async fn blank_prompt_is_rejected_before_generation() {
    let h = harness(ScriptedBackend::local(&["never"]));
    let err = h
        .orchestrator
        .handle(GenerationRequest::chat("   \n"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { .. }));
    assert_eq!(err.status_code(), 400);
    assert_eq!(h.local.calls(), 0);

    assert!(h
        .orchestrator
        .handle_stream(GenerationRequest::chat(""))
        .await
        .is_err());
}

#[tokio::test]
async fn streamed_generation_is_cached_as_a_whole() {
    let h = harness(ScriptedBackend::local(&["one ", "two ", "three"]));
    let req = GenerationRequest::chat("explain TCP handshake");

    let events: Vec<StreamEvent> = h
        .orchestrator
        .handle_stream(req.clone())
        .await
        .unwrap()
        .collect()
        .await;
    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Delta { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["one ", "two ", "three"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Done { cache_hit: false, backend: BackendId::Local, .. })
    ));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let replayed: Vec<StreamEvent> = h
        .orchestrator
        .handle_stream(req.clone())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        replayed,
        vec![
            StreamEvent::Delta {
                content: "one two three".into()
            },
            StreamEvent::Done {
                cache_hit: true,
                cache_tier: Some(TierKind::Memory),
                backend: BackendId::Local,
                model: "llama3.2".into(),
            },
        ]
    );

    let plain = h.orchestrator.handle(req).await.unwrap();
    assert!(plain.cache_hit);
    assert_eq!(plain.content(), "one two three");
    assert_eq!(h.local.calls(), 1);
}

#[tokio::test]
async fn broken_stream_ends_with_error_and_is_not_cached() {
    let h = harness(ScriptedBackend::local(&["partial "]).breaking_stream());
    let req = GenerationRequest::chat("explain TCP handshake");

    let events: Vec<StreamEvent> = h
        .orchestrator
        .handle_stream(req.clone())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        events.first(),
        Some(&StreamEvent::Delta {
            content: "partial ".into()
        })
    );
    assert!(matches!(events.last(), Some(StreamEvent::Error { code, .. }) if code == "E3001"));

    assert!(h.orchestrator.handle(req).await.is_err());
    assert_eq!(h.local.calls(), 2);
}

#[tokio::test]
async fn dropped_stream_consumer_does_not_cancel_generation() {
    let h = harness(
        ScriptedBackend::local(&["late ", "answer"]).with_delay(Duration::from_millis(100)),
    );
    let req = GenerationRequest::chat("explain TCP handshake");

    let stream = h.orchestrator.handle_stream(req.clone()).await.unwrap();
    drop(stream);

    let mut cached = false;
    for _ in 0..100 {
        if h.orchestrator.cache().memory().len_sync() == 1 {
            cached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cached, "generation should finish and populate the cache");

    let hit = h.orchestrator.handle(req).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(hit.content(), "late answer");
    assert_eq!(h.local.calls(), 1);
}

#[tokio::test]
async fn generation_timeout_surfaces_as_timeout() {
    let h = HarnessBuilder::new(
        ScriptedBackend::local(&["too slow"]).with_delay(Duration::from_secs(3)),
    )
    .config(|c| c.generation.timeout_secs = 1)
    .build();

    let err = h
        .orchestrator
        .handle(GenerationRequest::chat("explain TCP handshake"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(err.status_code(), 504);
}

#[tokio::test]
async fn medium_requests_are_enriched_and_low_ones_are_not() {
    let h = harness(ScriptedBackend::local(&["ok"]));

    let low = h
        .orchestrator
        .handle(GenerationRequest::chat("What is 2+2?"))
        .await
        .unwrap();
    assert_eq!(low.response.complexity, ComplexityTier::Low);
    assert!(!low.response.enriched);
    assert_eq!(h.search.calls(), 0);

    let medium = h
        .orchestrator
        .handle(GenerationRequest::chat(
            "Compare the trade-offs of TCP and QUIC and explain why one is faster",
        ))
        .await
        .unwrap();
    assert_eq!(medium.response.complexity, ComplexityTier::Medium);
    assert!(medium.response.enriched);
    assert_eq!(h.search.calls(), 1);
    let prompts = h.local.prompts();
    assert!(prompts[1].contains("Additional context"));
    assert!(prompts[1].contains("https://example.org/tcp"));
}

const MEDIUM_PROMPT: &str = "Compare the trade-offs of TCP and QUIC and explain why one is faster";

#[tokio::test]
async fn failing_search_only_costs_the_enrichment() {
    let h = HarnessBuilder::new(ScriptedBackend::local(&["plain answer"]))
        .search(FakeSearch::failing())
        .build();

    let res = h
        .orchestrator
        .handle(GenerationRequest::chat(MEDIUM_PROMPT))
        .await
        .unwrap();
    assert_eq!(res.response.complexity, ComplexityTier::Medium);
    assert_eq!(res.response.backend, BackendId::Local);
    assert!(!res.response.enriched);
    assert_eq!(res.content(), "plain answer");
    assert_eq!(h.search.calls(), 1);
    assert_eq!(h.local.prompts(), vec![MEDIUM_PROMPT.to_string()]);
}

#[tokio::test]
async fn stalled_search_is_cut_off_at_its_timeout() {
    let h = HarnessBuilder::new(ScriptedBackend::local(&["plain answer"]))
        .search(FakeSearch::stalled(Duration::from_secs(10)))
        .config(|c| c.search.timeout_ms = 100)
        .build();

    let started = Instant::now();
    let res = tokio::time::timeout(
        Duration::from_secs(3),
        h.orchestrator.handle(GenerationRequest::chat(MEDIUM_PROMPT)),
    )
    .await
    .expect("request finished despite the hung search")
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!res.response.enriched);
    assert_eq!(res.response.complexity, ComplexityTier::Medium);
    assert!(!h.local.prompts()[0].contains("Additional context"));
}

#[tokio::test]
async fn invalidated_key_is_generated_again() {
    let h = harness(ScriptedBackend::local(&["v1"]));
    let req = GenerationRequest::chat("explain TCP handshake");

    h.orchestrator.handle(req.clone()).await.unwrap();
    let key = h.orchestrator.key_for(&req).unwrap();
    assert!(h.orchestrator.invalidate(&key).await.unwrap());

    let again = h.orchestrator.handle(req).await.unwrap();
    assert!(!again.cache_hit);
    assert_eq!(h.local.calls(), 2);
}
