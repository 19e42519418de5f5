use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use udprobe::{Client, Config, ProgressCallback, ProgressEvent, Server};

/// Custom callback implementation using a struct
struct TestCallback {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressCallback for TestCallback {
    fn on_progress(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Spawns an echoing server on the given port and waits for it to bind.
async fn spawn_echo_server(port: u16) {
    let server = Server::new(Config::server(port).with_echo(true));
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_custom_callback_struct() {
    spawn_echo_server(18801).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let callback = TestCallback {
        events: events.clone(),
    };

    let config = Config::client("127.0.0.1", 18801)
        .with_packet_count(30)
        .with_echo(true)
        .with_grace(Duration::from_secs(1));

    let client = Client::new(config).unwrap().with_callback(callback);
    client.run().await.unwrap();

    let events = events.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ProgressEvent::TestStarted)),
        "Should have received TestStarted event"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ProgressEvent::Progress { sent: 30, total: 30, .. })),
        "Should have reported the end of the burst"
    );

    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::IterationCompleted(record) => Some(record),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 1, "One iteration should have completed");
    assert_eq!(completed[0].packets_sent, 30);

    assert!(
        events
            .iter()
            .any(|e| matches!(e, ProgressEvent::TestCompleted { summary: Some(_) })),
        "Completion event should carry the aggregate summary"
    );
}

#[tokio::test]
async fn test_closure_callback() {
    spawn_echo_server(18802).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();

    let config = Config::client("127.0.0.1", 18802)
        .with_packet_count(20)
        .with_echo(true)
        .with_grace(Duration::from_secs(1));

    let client = Client::new(config)
        .unwrap()
        .with_callback(move |event: ProgressEvent| {
            events_clone.lock().unwrap().push(event);
        });

    client.run().await.unwrap();

    let captured = events.lock().unwrap();
    assert!(!captured.is_empty(), "Should have captured events");
    assert!(
        matches!(captured.last(), Some(ProgressEvent::TestCompleted { .. })),
        "TestCompleted should be the final event"
    );
}

#[tokio::test]
async fn test_multi_round_callback_order() {
    spawn_echo_server(18803).await;

    let rounds = Arc::new(Mutex::new(Vec::new()));
    let rounds_clone = rounds.clone();

    let config = Config::client("127.0.0.1", 18803)
        .with_packet_count(20)
        .with_iterations(2)
        .with_echo(true)
        .with_grace(Duration::from_secs(1));

    let client = Client::new(config)
        .unwrap()
        .with_callback(move |event: ProgressEvent| {
            if let ProgressEvent::IterationCompleted(record) = event {
                rounds_clone.lock().unwrap().push(record.round);
            }
        });

    client.run().await.unwrap();

    assert_eq!(*rounds.lock().unwrap(), vec![1, 2]);

    let summary = client.summary().expect("two rounds completed");
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.total_packets_sent, 40);
}

#[test]
fn test_callback_forms() {
    fn handle_event(_event: ProgressEvent) {}

    struct Quiet;
    impl ProgressCallback for Quiet {
        fn on_progress(&self, _event: ProgressEvent) {}
    }

    // Closures, plain functions and custom structs all satisfy the trait.
    let config = Config::client("127.0.0.1", 8888);
    let _ = Client::new(config.clone())
        .unwrap()
        .with_callback(|_event: ProgressEvent| {});
    let _ = Client::new(config.clone()).unwrap().with_callback(handle_event);
    let _ = Client::new(config).unwrap().with_callback(Quiet);
}
