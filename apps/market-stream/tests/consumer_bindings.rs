//! Consumer Binding Integration Tests
//!
//! Several consumers share one client over the in-memory feed: shared
//! symbols, teardown, delivery filtering, the latest-value store and soft
//! errors.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use market_stream::{
    AssetClass, BindingError, ConnectionState, EndpointSettings, FeedConnector, MarketStream,
    NORMAL_CLOSURE, PriceUpdate, StreamConfig, StreamError,
};

use common::{MockConnector, MockRemote, WAIT, frame_symbols, next_remote, price_frame};

const GENERIC_URL: &str = "wss://feed.test/all";
const CRYPTO_URL: &str = "wss://feed.test/crypto";

fn config(endpoints: EndpointSettings) -> StreamConfig {
    let mut config = StreamConfig::new(endpoints).unwrap();
    config.websocket.heartbeat_interval = None;
    config
}

fn client(config: &StreamConfig) -> (MarketStream, Arc<MockConnector>, mpsc::UnboundedReceiver<MockRemote>) {
    let (connector, remotes) = MockConnector::new();
    let stream = MarketStream::new(config, Arc::clone(&connector) as Arc<dyn FeedConnector>);
    (stream, connector, remotes)
}

/// Client on a single generic endpoint, connected.
async fn connected_client() -> (MarketStream, Arc<MockConnector>, MockRemote) {
    let (stream, connector, mut remotes) = client(&config(EndpointSettings::generic(GENERIC_URL)));
    let remote = next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Connected).await;
    (stream, connector, remote)
}

async fn wait_for_state(stream: &MarketStream, asset_class: AssetClass, state: ConnectionState) {
    let mut changes = stream.state_changes(asset_class);
    timeout(WAIT, changes.wait_for(|current| *current == state))
        .await
        .expect("timed out waiting for state")
        .expect("session stopped");
}

async fn next_update(updates: &mut broadcast::Receiver<Arc<PriceUpdate>>) -> Arc<PriceUpdate> {
    timeout(WAIT, updates.recv())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

async fn next_error(errors: &mut broadcast::Receiver<StreamError>) -> StreamError {
    timeout(WAIT, errors.recv())
        .await
        .expect("timed out waiting for error")
        .expect("error channel closed")
}

// =============================================================================
// Shared Symbols
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shared_symbol_survives_one_consumer_leaving() {
    let (stream, _connector, mut remote) = connected_client().await;
    let a = stream.bind("a");
    let b = stream.bind("b");

    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT", "ETHUSDT"]));
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT", "ETHUSDT"]);

    assert_ok!(b.subscribe(AssetClass::Crypto, ["btcusdt", "SOLUSDT"]));
    let frame = remote.next_frame().await;
    assert_eq!(frame_symbols(&frame), vec!["SOLUSDT"]);

    // BTCUSDT is still held by b: nothing goes upstream.
    assert_ok!(a.unsubscribe(AssetClass::Crypto, ["BTCUSDT"]));
    assert_ok!(a.unsubscribe(AssetClass::Crypto, ["ETHUSDT"]));
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "unsubscribe");
    assert_eq!(frame_symbols(&frame), vec!["ETHUSDT"]);

    assert!(stream.desired_subscriptions().contains(AssetClass::Crypto, "BTCUSDT"));
    assert!(!stream.desired_subscriptions().contains(AssetClass::Crypto, "ETHUSDT"));

    let mut updates = stream.updates();
    remote.push_json(&price_frame("crypto", "BTCUSDT", "64250.12", 1_718_035_200_000));
    remote.push_json(&price_frame("crypto", "ETHUSDT", "3500.5", 1_718_035_200_000));
    next_update(&mut updates).await;
    next_update(&mut updates).await;

    assert_eq!(stream.get("BTCUSDT").unwrap().price, dec!(64250.12));
    assert_eq!(stream.get("ETHUSDT").unwrap().price, dec!(3500.5));
}

#[tokio::test(start_paused = true)]
async fn test_set_symbols_sends_only_the_difference() {
    let (stream, _connector, mut remote) = connected_client().await;
    let a = stream.bind("a");

    assert_ok!(a.set_symbols(AssetClass::Crypto, ["BTCUSDT", "ETHUSDT"]));
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT", "ETHUSDT"]);

    assert_ok!(a.set_symbols(AssetClass::Crypto, ["ETHUSDT", "SOLUSDT"]));
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "unsubscribe");
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT"]);
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    assert_eq!(frame_symbols(&frame), vec!["SOLUSDT"]);

    assert_eq!(a.symbols(AssetClass::Crypto), vec!["ETHUSDT", "SOLUSDT"]);
    assert_eq!(a.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_union_of_consumers() {
    let (stream, _connector, mut remotes) = client(&config(EndpointSettings::generic(GENERIC_URL)));
    let mut first = next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Connected).await;

    let a = stream.bind("a");
    let b = stream.bind("b");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT", "SOLUSDT"]));
    assert_ok!(b.subscribe(AssetClass::Crypto, ["ETHUSDT", "BTCUSDT"]));
    first.next_frame().await;
    first.next_frame().await;

    first.sever();

    let mut second = next_remote(&mut remotes).await;
    let frame = second.next_frame().await;
    assert_eq!(frame["action"], "subscribe");
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_made_while_disconnected_apply_on_connect() {
    let mut settings = config(EndpointSettings::generic(GENERIC_URL));
    settings.auto_connect = false;
    let (stream, connector, mut remotes) = client(&settings);

    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Equity, ["AAPL"]));
    assert_ok!(a.subscribe(AssetClass::Forex, ["EURUSD"]));
    assert!(!a.is_connected());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 0);

    assert_ok!(stream.connect());
    let mut remote = next_remote(&mut remotes).await;

    let mut frames = vec![remote.next_frame().await, remote.next_frame().await];
    frames.sort_by_key(|frame| frame["assetClass"].as_str().unwrap().to_string());
    assert_eq!(frames[0]["assetClass"], "equity");
    assert_eq!(frame_symbols(&frames[0]), vec!["AAPL"]);
    assert_eq!(frames[1]["assetClass"], "forex");
    assert_eq!(frame_symbols(&frames[1]), vec!["EURUSD"]);

    wait_for_state(&stream, AssetClass::Equity, ConnectionState::Connected).await;
    assert!(a.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_keeps_subscriptions_for_next_connect() {
    let (stream, connector, mut remotes) = client(&config(EndpointSettings::generic(GENERIC_URL)));
    let mut first = next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Connected).await;

    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
    first.next_frame().await;

    assert_ok!(stream.disconnect());
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Disconnected).await;
    assert_eq!(first.client_close_code(), Some(NORMAL_CLOSURE));

    assert_ok!(a.subscribe(AssetClass::Crypto, ["ETHUSDT"]));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);

    assert_ok!(stream.connect());
    let mut second = next_remote(&mut remotes).await;
    let frame = second.next_frame().await;
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT", "ETHUSDT"]);
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_class_endpoint_takes_precedence_over_generic() {
    let endpoints = EndpointSettings::generic(GENERIC_URL).with_class(AssetClass::Crypto, CRYPTO_URL);
    let (stream, connector, mut remotes) = client(&config(endpoints));

    let mut first = next_remote(&mut remotes).await;
    let mut second = next_remote(&mut remotes).await;
    if first.endpoint != CRYPTO_URL {
        std::mem::swap(&mut first, &mut second);
    }
    let (mut crypto, mut generic) = (first, second);
    assert_eq!(crypto.endpoint, CRYPTO_URL);
    assert_eq!(generic.endpoint, GENERIC_URL);
    assert_eq!(connector.attempts(), 2);

    assert_eq!(stream.endpoint_for(AssetClass::Crypto), Some(CRYPTO_URL));
    assert_eq!(stream.endpoint_for(AssetClass::Equity), Some(GENERIC_URL));
    assert_eq!(stream.endpoint_for(AssetClass::Forex), Some(GENERIC_URL));

    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
    assert_ok!(a.subscribe(AssetClass::Equity, ["AAPL"]));

    let frame = crypto.next_frame().await;
    assert_eq!(frame["assetClass"], "crypto");
    let frame = generic.next_frame().await;
    assert_eq!(frame["assetClass"], "equity");
    assert_eq!(frame_symbols(&frame), vec!["AAPL"]);
}

#[tokio::test(start_paused = true)]
async fn test_unrouted_asset_class_is_rejected() {
    let endpoints = EndpointSettings::default().with_class(AssetClass::Crypto, CRYPTO_URL);
    let (stream, _connector, _remotes) = client(&config(endpoints));
    let a = stream.bind("a");

    let err = assert_err!(a.subscribe(AssetClass::Equity, ["AAPL"]));
    assert!(matches!(err, BindingError::UnroutedAssetClass(AssetClass::Equity)));
    assert!(a.symbols(AssetClass::Equity).is_empty());

    assert_eq!(stream.endpoint_for(AssetClass::Equity), None);
    assert_eq!(stream.connection_state(AssetClass::Equity), ConnectionState::Disconnected);
    assert_eq!(*stream.state_changes(AssetClass::Equity).borrow(), ConnectionState::Disconnected);
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_detach_is_idempotent_and_drop_releases_symbols() {
    let (stream, _connector, mut remote) = connected_client().await;
    let a = stream.bind("a");
    let b = stream.bind("b");

    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
    assert_ok!(b.subscribe(AssetClass::Crypto, ["BTCUSDT", "ETHUSDT"]));
    remote.next_frame().await;
    remote.next_frame().await;

    a.detach();
    a.detach();
    assert!(a.is_detached());
    assert!(a.symbols(AssetClass::Crypto).is_empty());
    assert!(matches!(
        a.subscribe(AssetClass::Crypto, ["SOLUSDT"]),
        Err(BindingError::Detached)
    ));
    assert!(matches!(a.on_update(|_| {}), Err(BindingError::Detached)));

    // First frame after a's detach is b's release: a sent nothing.
    drop(b);
    let frame = remote.next_frame().await;
    assert_eq!(frame["action"], "unsubscribe");
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT", "ETHUSDT"]);
    assert!(stream.desired_subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_detach_removes_callbacks() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    let b = stream.bind("b");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
    assert_ok!(b.subscribe(AssetClass::Crypto, ["BTCUSDT"]));

    let seen = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&seen);
    assert_ok!(a.on_update(move |_| *counter.lock() += 1));

    a.detach();

    let mut updates = stream.updates();
    remote.push_json(&price_frame("crypto", "BTCUSDT", "1", 1_718_035_200_000));
    next_update(&mut updates).await;
    assert_eq!(*seen.lock(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detach_racing_other_calls_leaves_nothing_behind() {
    let (stream, _connector, mut remotes) = client(&config(EndpointSettings::generic(GENERIC_URL)));
    let remote = next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Connected).await;

    let busy = Arc::new(stream.bind("busy"));
    let stray_calls = Arc::new(AtomicUsize::new(0));

    for i in 0..2_000 {
        let racer = Arc::new(stream.bind(format!("racer-{i}")));
        let barrier = Arc::new(Barrier::new(3));

        let subscriber = {
            let racer = Arc::clone(&racer);
            let barrier = Arc::clone(&barrier);
            let stray_calls = Arc::clone(&stray_calls);
            std::thread::spawn(move || {
                barrier.wait();
                let _ = racer.subscribe(AssetClass::Crypto, [format!("S{i}")]);
                let _ = racer.on_error(move |_| {
                    stray_calls.fetch_add(1, Ordering::SeqCst);
                });
            })
        };
        let contender = {
            let busy = Arc::clone(&busy);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let symbols = if i % 2 == 0 { ["X", "Y"] } else { ["X", "Z"] };
                busy.set_symbols(AssetClass::Crypto, symbols).unwrap();
            })
        };

        barrier.wait();
        racer.detach();
        subscriber.join().unwrap();
        contender.join().unwrap();

        let desired = stream.desired_subscriptions();
        assert!(
            !desired.contains(AssetClass::Crypto, &format!("S{i}")),
            "iteration {i} left a detached symbol behind: {desired:?}"
        );
    }

    assert_eq!(
        stream.desired_subscriptions().symbols(AssetClass::Crypto),
        busy.symbols(AssetClass::Crypto)
    );

    // No detached racer may still hold an error callback.
    let mut errors = stream.errors();
    remote.push(r#"{"type":"error","message":"after the race"}"#);
    next_error(&mut errors).await;
    assert_eq!(stray_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_callbacks_only_see_own_symbols() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    let b = stream.bind("b");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));
    assert_ok!(b.subscribe(AssetClass::Crypto, ["ETHUSDT"]));

    let seen_a = Arc::new(Mutex::new(Vec::new()));
    let seen_b = Arc::new(Mutex::new(Vec::new()));
    let sink_a = Arc::clone(&seen_a);
    let sink_b = Arc::clone(&seen_b);
    assert_ok!(a.on_update(move |update| sink_a.lock().push(update.symbol.clone())));
    assert_ok!(b.on_update(move |update| sink_b.lock().push(update.symbol.clone())));

    let mut updates = stream.updates();
    remote.push_json(&price_frame("crypto", "BTCUSDT", "64250", 1_718_035_200_000));
    remote.push_json(&price_frame("crypto", "ETHUSDT", "3500", 1_718_035_200_000));
    remote.push_json(&price_frame("crypto", "SOLUSDT", "150", 1_718_035_200_000));
    for _ in 0..3 {
        next_update(&mut updates).await;
    }

    assert_eq!(*seen_a.lock(), vec!["BTCUSDT"]);
    assert_eq!(*seen_b.lock(), vec!["ETHUSDT"]);

    // Unwatched symbols still reach the store.
    assert_eq!(stream.get("SOLUSDT").unwrap().price, dec!(150));
}

#[tokio::test(start_paused = true)]
async fn test_removed_callback_stops_firing() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    let b = stream.bind("b");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));

    let seen = Arc::new(Mutex::new(0_usize));
    let counter = Arc::clone(&seen);
    let handle = assert_ok!(a.on_update(move |_| *counter.lock() += 1));

    assert!(!b.remove_callback(handle));
    assert!(a.remove_callback(handle));
    assert!(!a.remove_callback(handle));

    let mut updates = stream.updates();
    remote.push_json(&price_frame("crypto", "BTCUSDT", "1", 1_718_035_200_000));
    next_update(&mut updates).await;
    assert_eq!(*seen.lock(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_stream_filters_and_ends_on_detach() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));

    let mut updates = a.updates();
    remote.push_json(&price_frame("crypto", "ETHUSDT", "3500", 1_718_035_200_000));
    remote.push_json(&price_frame("crypto", "BTCUSDT", "64250", 1_718_035_200_000));

    let update = timeout(WAIT, updates.next()).await.unwrap().unwrap();
    assert_eq!(update.symbol, "BTCUSDT");
    assert_eq!(update.display_symbol, "BTC/USDT");

    a.detach();
    assert!(timeout(WAIT, updates.next()).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_update_stream_follows_later_subscriptions() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    let mut updates = a.updates();

    assert_ok!(a.subscribe(AssetClass::Equity, ["AAPL"]));
    remote.push_json(&price_frame("stock", "AAPL", "187.25", 1_718_035_200_000));

    let update = timeout(WAIT, updates.next()).await.unwrap().unwrap();
    assert_eq!(update.asset_class, AssetClass::Equity);
    assert_eq!(update.price, dec!(187.25));
}

// =============================================================================
// Latest-Value Store
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_get_many_omits_unseen_symbols() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Equity, ["AAPL", "MSFT"]));

    let mut updates = stream.updates();
    remote.push_json(&price_frame("equity", "AAPL", "187.25", 1_718_035_200_000));
    next_update(&mut updates).await;

    let found = a.latest_many(&["AAPL", "MSFT"]);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].symbol, "AAPL");
    assert!(stream.get("MSFT").is_none());
    assert_eq!(stream.get_many(&["msft", "aapl"]).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_latest_value_is_last_received() {
    let (stream, _connector, remote) = connected_client().await;

    let mut updates = stream.updates();
    remote.push_json(&price_frame("forex", "EURUSD", "1.0850", 1_718_035_200_000));
    remote.push_json(&price_frame("forex", "EURUSD", "1.0855", 1_718_035_201_000));
    next_update(&mut updates).await;
    next_update(&mut updates).await;

    let latest = stream.get("eurusd").unwrap();
    assert_eq!(latest.price, dec!(1.0855));
    assert_eq!(latest.timestamp.timestamp_millis(), 1_718_035_201_000);
    assert_eq!(latest.display_symbol, "EUR/USD");
    assert_eq!(stream.store().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_garbage_frames_do_not_stop_delivery() {
    let (stream, _connector, remote) = connected_client().await;

    let mut updates = stream.updates();
    remote.push("not json at all");
    remote.push(r#"{"type":"mystery"}"#);
    remote.push(r#"{"type":"price","symbol":"AAPL"}"#);
    remote.push_json(&price_frame("equity", "AAPL", "187.25", 1_718_035_200_000));

    let update = next_update(&mut updates).await;
    assert_eq!(update.symbol, "AAPL");
    assert_eq!(stream.store().len(), 1);
}

// =============================================================================
// Soft Errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_feed_error_is_reported_and_stream_continues() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Equity, ["AAPL"]));

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    assert_ok!(a.on_error(move |error| sink.lock().push(error.clone())));

    let mut errors = stream.errors();
    let mut updates = stream.updates();
    remote.push(r#"{"type":"error","code":404,"message":"unknown symbol FOO"}"#);
    remote.push_json(&price_frame("equity", "AAPL", "187.25", 1_718_035_200_000));

    let error = next_error(&mut errors).await;
    assert_eq!(
        error,
        StreamError::Application {
            code: Some(404),
            message: "unknown symbol FOO".to_string(),
        }
    );
    assert!(!error.is_terminal());
    assert_eq!(reported.lock().as_slice(), &[error]);

    next_update(&mut updates).await;
    assert!(!a.is_detached());
    assert_eq!(stream.connection_state(AssetClass::Equity), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_softly_and_manual_connect_recovers() {
    let (connector, mut remotes) = MockConnector::new();
    connector.refuse_next(6);
    let stream = MarketStream::new(
        &config(EndpointSettings::generic(GENERIC_URL)),
        Arc::clone(&connector) as Arc<dyn FeedConnector>,
    );
    let mut errors = stream.errors();
    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));

    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    assert_ok!(a.on_connection_state(move |asset_class, state| {
        if asset_class == AssetClass::Crypto {
            sink.lock().push(state);
        }
    }));

    let terminal = loop {
        let error = next_error(&mut errors).await;
        if error.is_terminal() {
            break error;
        }
        assert!(matches!(error, StreamError::Transport { .. }));
    };
    assert_eq!(
        terminal,
        StreamError::ReconnectExhausted {
            endpoint: GENERIC_URL.to_string(),
            attempts: 5,
        }
    );
    assert_eq!(connector.attempts(), 6);
    assert_eq!(stream.connection_state(AssetClass::Crypto), ConnectionState::Failed);
    assert_eq!(states.lock().last(), Some(&ConnectionState::Failed));
    assert!(!a.is_detached());
    assert!(!a.is_connected());

    assert_ok!(stream.connect());
    let mut remote = next_remote(&mut remotes).await;
    let frame = remote.next_frame().await;
    assert_eq!(frame_symbols(&frame), vec!["BTCUSDT"]);
    wait_for_state(&stream, AssetClass::Crypto, ConnectionState::Connected).await;
    assert!(a.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_reported_then_recovered() {
    let (stream, _connector, mut remotes) = client(&config(EndpointSettings::generic(GENERIC_URL)));
    let first = next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Forex, ConnectionState::Connected).await;

    let mut errors = stream.errors();
    first.close(1011);

    let error = next_error(&mut errors).await;
    assert!(matches!(
        &error,
        StreamError::Transport { endpoint, message } if endpoint == GENERIC_URL && message.contains("1011")
    ));

    next_remote(&mut remotes).await;
    wait_for_state(&stream, AssetClass::Forex, ConnectionState::Connected).await;
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_sessions_and_keeps_snapshot() {
    let (stream, _connector, remote) = connected_client().await;
    let a = stream.bind("a");
    assert_ok!(a.subscribe(AssetClass::Crypto, ["BTCUSDT"]));

    let mut updates = stream.updates();
    remote.push_json(&price_frame("crypto", "BTCUSDT", "64250", 1_718_035_200_000));
    next_update(&mut updates).await;

    timeout(WAIT, stream.shutdown()).await.unwrap();

    assert_eq!(remote.client_close_code(), Some(NORMAL_CLOSURE));
    assert_eq!(stream.connection_state(AssetClass::Crypto), ConnectionState::Disconnected);
    assert!(matches!(
        a.subscribe(AssetClass::Crypto, ["ETHUSDT"]),
        Err(BindingError::Session(_))
    ));
    assert!(matches!(
        a.unsubscribe(AssetClass::Crypto, ["BTCUSDT"]),
        Err(BindingError::Session(_))
    ));
    // Rejected requests leave the ledger untouched.
    assert_eq!(a.symbols(AssetClass::Crypto), vec!["BTCUSDT"]);
    assert!(!stream.desired_subscriptions().contains(AssetClass::Crypto, "ETHUSDT"));
    assert!(stream.desired_subscriptions().contains(AssetClass::Crypto, "BTCUSDT"));
    assert_eq!(a.latest("BTCUSDT").unwrap().price, dec!(64250));

    a.detach();
    assert!(a.is_detached());
}
