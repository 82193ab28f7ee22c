//! Integration tests for the terminal-transition race.
//!
//! Complete, error, and stop all race by removing the session from the
//! registry; whichever caller wins runs finalization exactly once. These
//! tests drive the race hard and check the invariants hold: one span end
//! per session, no double cleanup, and token totals flushed exactly once.

mod common;

use flowline::engine::Usage;
use flowline::session::EventSink;

use common::{Script, chunk, drain_events, harness, request, wait_until};

#[tokio::test]
async fn stop_racing_completion_finalizes_once() {
    for round in 0..20 {
        let h = harness();
        let session_id = format!("race-{round}");

        // Enough chunks to keep the stream busy while stop lands.
        let items = (0..50).map(|i| chunk("Planner", &format!("c{i} "))).collect();
        h.engine.push_script(Script::Items(items));

        let (sink, rx) = EventSink::channel(256);
        h.orchestrator
            .start_or_resume(request(&session_id, "q"), sink)
            .await
            .unwrap();

        let stopper = {
            let orchestrator = h.orchestrator.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                orchestrator.stop(&session_id);
            })
        };

        drain_events(rx).await;
        stopper.await.unwrap();
        h.orchestrator.shutdown().await;

        assert!(!h.orchestrator.registry().contains(&session_id));
        // Exactly one of {stop, complete} won and ended the span.
        assert_eq!(h.backend.ended.lock().unwrap().len(), 1, "round {round}");
    }
}

#[tokio::test]
async fn concurrent_stops_finalize_once() {
    let h = harness();
    h.engine
        .push_script(Script::ItemsThenHang(vec![chunk("Planner", "hello")]));

    let (sink, rx) = EventSink::channel(16);
    h.orchestrator
        .start_or_resume(request("dup", "q"), sink)
        .await
        .unwrap();
    wait_until(|| h.orchestrator.registry().contains("dup")).await;

    let stoppers: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.stop("dup") })
        })
        .collect();
    for stopper in stoppers {
        stopper.await.unwrap();
    }

    drain_events(rx).await;
    h.orchestrator.shutdown().await;

    assert!(!h.orchestrator.registry().contains("dup"));
    assert_eq!(h.backend.ended.lock().unwrap().len(), 1);

    // Stopping again after the race settles changes nothing.
    h.orchestrator.stop("dup");
    assert_eq!(h.backend.ended.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn token_totals_flush_with_the_winning_finalize() {
    let h = harness();
    h.engine
        .push_script(Script::ItemsThenHang(vec![chunk("Planner", "working")]));

    let (sink, rx) = EventSink::channel(16);
    h.orchestrator
        .start_or_resume(request("tok", "q"), sink)
        .await
        .unwrap();
    wait_until(|| h.orchestrator.registry().contains("tok")).await;

    h.reporter.accumulate_tokens(
        "tok",
        Usage {
            prompt_tokens: 11,
            completion_tokens: 7,
        },
    );

    h.orchestrator.stop("tok");
    drain_events(rx).await;
    h.orchestrator.shutdown().await;

    let ended = h.backend.ended.lock().unwrap();
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].1.tokens.prompt, 11);
    assert_eq!(ended[0].1.tokens.completion, 7);
    drop(ended);

    // Late usage reports after the flush are dropped, not re-accumulated.
    h.reporter.accumulate_tokens(
        "tok",
        Usage {
            prompt_tokens: 100,
            completion_tokens: 100,
        },
    );
    assert_eq!(h.backend.ended.lock().unwrap().len(), 1);
}
