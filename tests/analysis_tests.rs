// Integration tests for the analyzers: question detection, answer
// generation with retries, summary windowing, and on-demand generators.

mod common;

use common::{final_segment, MockLlm};
use lectern::analysis::{
    spawn_answer_generator, spawn_on_demand_generator, spawn_question_detector, spawn_summarizer,
    RequestKind, SummarizerCommand,
};
use lectern::config::AnalysisConfig;
use lectern::{Event, EventBus, QuestionEvent, QuestionKind, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

fn fast_config() -> AnalysisConfig {
    AnalysisConfig {
        answer_retry_base_ms: 1,
        ..AnalysisConfig::default()
    }
}

async fn recv_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus closed")
}

async fn settle() {
    // Give spawned analyzer tasks a moment to subscribe.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn assert_silent(rx: &mut broadcast::Receiver<Event>) {
    let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(result.is_err(), "expected no event, got: {result:?}");
}

#[tokio::test]
async fn test_question_detected_and_answered() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_ok(
        r#"{"is_question": true, "question_text": "What is the capital of France?", "kind": "direct", "confidence": 0.95}"#,
    );
    llm.push_ok("Paris.");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_question_detector(bus.clone(), llm.clone(), fast_config(), shutdown_rx.clone());
    spawn_answer_generator(
        bus.clone(),
        llm.clone(),
        String::new(),
        fast_config(),
        shutdown_rx,
    );

    let mut questions = bus.subscribe(Topic::QuestionDetected);
    let mut answers = bus.subscribe(Topic::AnswerGenerated);
    settle().await;

    bus.publish(Event::Transcript(final_segment(
        "s1",
        0,
        2000,
        "What is the capital of France?",
    )));

    let question = match recv_event(&mut questions).await {
        Event::Question(q) => q,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(question.question_text, "What is the capital of France?");
    assert_eq!(question.kind, QuestionKind::Direct);
    assert!(question.confidence > 0.9);
    assert_eq!(question.segment_ids, vec!["s1"]);

    let answer = match recv_event(&mut answers).await {
        Event::Answer(a) => a,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(answer.question_event_id, question.id);
    assert_eq!(answer.answer_text, "Paris.");

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_duplicate_final_delivery_detects_once() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_ok(
        r#"{"is_question": true, "question_text": "Why does this matter?", "kind": "direct", "confidence": 0.9}"#,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_question_detector(bus.clone(), llm.clone(), fast_config(), shutdown_rx);

    let mut questions = bus.subscribe(Topic::QuestionDetected);
    settle().await;

    let segment = final_segment("s1", 0, 2000, "Why does this matter?");
    bus.publish(Event::Transcript(segment.clone()));
    bus.publish(Event::Transcript(segment));

    match recv_event(&mut questions).await {
        Event::Question(q) => assert_eq!(q.question_text, "Why does this matter?"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_silent(&mut questions).await;
    assert_eq!(llm.call_count(), 1, "duplicate id must not re-trigger the model");

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_low_confidence_detection_is_discarded() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_ok(
        r#"{"is_question": true, "question_text": "Hmm?", "kind": "implicit", "confidence": 0.4}"#,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_question_detector(bus.clone(), llm.clone(), fast_config(), shutdown_rx);

    let mut questions = bus.subscribe(Topic::QuestionDetected);
    settle().await;
    bus.publish(Event::Transcript(final_segment("s1", 0, 1000, "Hmm?")));

    assert_silent(&mut questions).await;
    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_answer_retries_until_success() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_err("rate limited");
    llm.push_err("rate limited");
    llm.push_ok("Paris.");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_answer_generator(bus.clone(), llm.clone(), String::new(), fast_config(), shutdown_rx);

    let mut answers = bus.subscribe(Topic::AnswerGenerated);
    settle().await;

    let question = QuestionEvent {
        id: "q1".to_string(),
        segment_ids: vec!["s1".to_string()],
        question_text: "What is the capital of France?".to_string(),
        detected_at: chrono::Utc::now(),
        confidence: 0.9,
        kind: QuestionKind::Direct,
    };
    bus.publish(Event::Question(question));

    let answer = match recv_event(&mut answers).await {
        Event::Answer(a) => a,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(answer.question_event_id, "q1");
    assert_eq!(answer.answer_text, "Paris.");
    assert_eq!(llm.call_count(), 3);

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_answer_falls_back_after_exhausted_retries() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    let config = AnalysisConfig {
        answer_retries: 2,
        answer_retry_base_ms: 1,
        ..AnalysisConfig::default()
    };
    llm.push_err("model down");
    llm.push_err("model down");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_answer_generator(bus.clone(), llm.clone(), String::new(), config, shutdown_rx);

    let mut answers = bus.subscribe(Topic::AnswerGenerated);
    let mut errors = bus.subscribe(Topic::AnalysisError);
    settle().await;

    bus.publish(Event::Question(QuestionEvent {
        id: "q1".to_string(),
        segment_ids: vec![],
        question_text: "Unanswerable?".to_string(),
        detected_at: chrono::Utc::now(),
        confidence: 0.9,
        kind: QuestionKind::Direct,
    }));

    let answer = match recv_event(&mut answers).await {
        Event::Answer(a) => a,
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(answer.answer_text, "answer unavailable");
    assert_eq!(llm.call_count(), 2);

    match recv_event(&mut errors).await {
        Event::AnalysisError(e) => assert_eq!(e.analyzer, "answer-generator"),
        other => panic!("unexpected event: {other:?}"),
    }

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_summary_windows_stitch_without_gaps() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    let config = AnalysisConfig {
        summary_interval_secs: 10,
        ..AnalysisConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (commands_tx, commands_rx) = mpsc::channel(8);
    let task = spawn_summarizer(
        bus.clone(),
        llm.clone(),
        String::new(),
        config,
        commands_rx,
        shutdown_rx,
    );

    let mut summaries = bus.subscribe(Topic::SummaryGenerated);
    settle().await;

    for (id, start, end, text) in [
        ("s1", 0u64, 4000u64, "alpha"),
        ("s2", 4000, 9000, "beta"),
        ("s3", 12000, 18000, "gamma"),
        ("s4", 21000, 25000, "delta"),
    ] {
        bus.publish(Event::Transcript(final_segment(id, start, end, text)));
    }
    // Let the summarizer observe the segments before the tick arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;
    commands_tx.send(SummarizerCommand::Tick).await.unwrap();

    let mut windows = Vec::new();
    for _ in 0..2 {
        match recv_event(&mut summaries).await {
            Event::Summary(s) => windows.push((s.window_start_ms, s.window_end_ms)),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(windows, vec![(0, 10000), (10000, 20000)]);

    // Shutdown flushes the residual partial window.
    let _ = shutdown_tx.send(true);
    match recv_event(&mut summaries).await {
        Event::Summary(s) => {
            assert_eq!((s.window_start_ms, s.window_end_ms), (20000, 25000));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flush_covers_segments_still_queued() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    let config = AnalysisConfig {
        summary_interval_secs: 10,
        ..AnalysisConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_commands_tx, commands_rx) = mpsc::channel(8);
    let task = spawn_summarizer(
        bus.clone(),
        llm.clone(),
        String::new(),
        config,
        commands_rx,
        shutdown_rx,
    );

    let mut summaries = bus.subscribe(Topic::SummaryGenerated);

    // Publish a backlog and signal shutdown immediately, so the segments
    // are still queued in the summarizer's subscription when it stops.
    for i in 0..20u64 {
        bus.publish(Event::Transcript(final_segment(
            &format!("s{i}"),
            i * 1000,
            (i + 1) * 1000,
            "line",
        )));
    }
    let _ = shutdown_tx.send(true);
    task.await.unwrap();

    let mut max_end = 0;
    while let Ok(event) = summaries.try_recv() {
        if let Event::Summary(s) = event {
            max_end = max_end.max(s.window_end_ms);
        }
    }
    assert_eq!(max_end, 20000, "flush must cover up to the last segment");
}

#[tokio::test]
async fn test_empty_window_is_still_covered() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    let config = AnalysisConfig {
        summary_interval_secs: 10,
        ..AnalysisConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (commands_tx, commands_rx) = mpsc::channel(8);
    spawn_summarizer(
        bus.clone(),
        llm.clone(),
        String::new(),
        config,
        commands_rx,
        shutdown_rx,
    );

    let mut summaries = bus.subscribe(Topic::SummaryGenerated);
    settle().await;

    // A long silence leaves the second window with no segments.
    bus.publish(Event::Transcript(final_segment("s1", 0, 2000, "intro")));
    bus.publish(Event::Transcript(final_segment("s2", 24000, 26000, "outro")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    commands_tx.send(SummarizerCommand::Tick).await.unwrap();

    let mut texts = Vec::new();
    for _ in 0..2 {
        match recv_event(&mut summaries).await {
            Event::Summary(s) => texts.push(s.text),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(texts[1], "(no speech in this window)");
    assert_eq!(llm.call_count(), 1, "empty windows must not call the model");

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_summary_survives_model_failure() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_err("model down");
    let config = AnalysisConfig {
        summary_interval_secs: 10,
        ..AnalysisConfig::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (commands_tx, commands_rx) = mpsc::channel(8);
    spawn_summarizer(
        bus.clone(),
        llm.clone(),
        String::new(),
        config,
        commands_rx,
        shutdown_rx,
    );

    let mut summaries = bus.subscribe(Topic::SummaryGenerated);
    settle().await;

    bus.publish(Event::Transcript(final_segment("s1", 0, 11000, "talk")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    commands_tx.send(SummarizerCommand::Tick).await.unwrap();

    // The window is still emitted with a placeholder so stitching holds.
    match recv_event(&mut summaries).await {
        Event::Summary(s) => {
            assert_eq!((s.window_start_ms, s.window_end_ms), (0, 10000));
            assert_eq!(s.text, "summary unavailable");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn test_on_demand_suggestion() {
    let bus = Arc::new(EventBus::default());
    let llm = MockLlm::new();
    llm.push_ok("Try a worked example on the board.");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (triggers_tx, triggers_rx) = mpsc::channel(8);
    spawn_on_demand_generator(
        RequestKind::Suggestion,
        bus.clone(),
        llm.clone(),
        String::new(),
        fast_config(),
        triggers_rx,
        shutdown_rx,
    );

    let mut suggestions = bus.subscribe(Topic::SuggestionGenerated);
    settle().await;

    bus.publish(Event::Transcript(final_segment(
        "s1",
        0,
        5000,
        "Today we cover integration by parts.",
    )));
    tokio::time::sleep(Duration::from_millis(100)).await;
    triggers_tx.send(()).await.unwrap();

    match recv_event(&mut suggestions).await {
        Event::Suggestion(s) => assert_eq!(s.text, "Try a worked example on the board."),
        other => panic!("unexpected event: {other:?}"),
    }

    let _ = shutdown_tx.send(true);
}
