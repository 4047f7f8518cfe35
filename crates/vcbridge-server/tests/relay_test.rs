mod common;

use common::*;
use std::time::Duration;
use vcbridge_server::config::RelayConfig;
use vcbridge_server::relay::{RelayDebouncer, RelayFilter};

fn relay_config(debounce_ms: u64) -> RelayConfig {
    RelayConfig {
        enabled: true,
        author_ids: vec!["relay-bot".to_string()],
        ignore_filler: true,
        debounce_ms,
        max_message_len: 1900,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[test]
fn filter_checks_channel_author_and_content() {
    let filter = RelayFilter::new("src".into(), "dst".into(), &relay_config(0));

    assert_eq!(
        filter.accept(&message("src", "relay-bot", "  hello\n there ")),
        Some("hello there".to_string())
    );
    assert_eq!(filter.accept(&message("other", "relay-bot", "hello")), None);
    assert_eq!(filter.accept(&message("src", "someone", "hello")), None);
    assert_eq!(filter.accept(&message("src", "relay-bot", "   ")), None);
    assert_eq!(filter.accept(&message("src", "relay-bot", "umm uh")), None);
}

#[test]
fn filter_refuses_everything_without_authors() {
    let config = RelayConfig {
        author_ids: Vec::new(),
        ..relay_config(0)
    };
    let filter = RelayFilter::new("src".into(), "dst".into(), &config);
    assert_eq!(filter.accept(&message("src", "anyone", "hello")), None);
}

#[test]
fn filter_refuses_relaying_into_the_source() {
    let filter = RelayFilter::new("src".into(), "src".into(), &relay_config(0));
    assert_eq!(filter.accept(&message("src", "relay-bot", "hello")), None);
}

#[tokio::test(start_paused = true)]
async fn burst_becomes_one_message_after_quiet_period() {
    let platform = MockPlatform::new();
    let (relay, _worker) = RelayDebouncer::spawn(platform.clone(), "dst".into(), &relay_config(5000));

    relay.push("first".into());
    tokio::time::sleep(Duration::from_secs(1)).await;
    relay.push("second".into());
    tokio::time::sleep(Duration::from_secs(3)).await;
    relay.push("third".into());

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(platform.sent().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(
        platform.sent(),
        vec![("dst".to_string(), "first second third".to_string())]
    );

    relay.push("later".into());
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(platform.sent().len(), 2);
    assert_eq!(platform.sent()[1].1, "later");
}

#[tokio::test(start_paused = true)]
async fn zero_debounce_sends_immediately() {
    let platform = MockPlatform::new();
    let (relay, _worker) = RelayDebouncer::spawn(platform.clone(), "dst".into(), &relay_config(0));

    relay.push("one".into());
    settle().await;
    relay.push("two".into());
    settle().await;
    assert_eq!(
        platform.sent(),
        vec![
            ("dst".to_string(), "one".to_string()),
            ("dst".to_string(), "two".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn long_payload_is_split_at_the_limit() {
    let platform = MockPlatform::new();
    let (relay, _worker) = RelayDebouncer::spawn(platform.clone(), "dst".into(), &relay_config(1000));

    relay.push("x".repeat(1500));
    relay.push("y".repeat(1500));
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    let sent = platform.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1.chars().count(), 1900);
    assert_eq!(sent[1].1.chars().count(), 1101);
}

#[tokio::test(start_paused = true)]
async fn filler_only_burst_is_dropped() {
    let platform = MockPlatform::new();
    let (relay, _worker) = RelayDebouncer::spawn(platform.clone(), "dst".into(), &relay_config(1000));

    relay.push("um".into());
    relay.push("hmm".into());
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert!(platform.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_flushes_pending_text() {
    let platform = MockPlatform::new();
    let (relay, worker) = RelayDebouncer::spawn(platform.clone(), "dst".into(), &relay_config(60_000));

    relay.push("pending".into());
    drop(relay);
    worker.await.unwrap();
    assert_eq!(
        platform.sent(),
        vec![("dst".to_string(), "pending".to_string())]
    );
}
