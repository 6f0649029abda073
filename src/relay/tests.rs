use super::*;
use crate::record::{Level, LogRecord, Marker};
use std::sync::atomic::AtomicU64;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Default)]
struct Recording {
    records: Mutex<Vec<LogRecord>>,
    stops: AtomicU64,
}

impl Recording {
    fn texts(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.text.clone())
            .collect()
    }
}

impl Sink for Recording {
    fn log(&self, record: LogRecord) -> bool {
        self.records.lock().unwrap().push(record);
        true
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}

/// Blocks inside the first `log` call until released.
struct Gate {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
    inner: Recording,
}

impl Sink for Gate {
    fn log(&self, record: LogRecord) -> bool {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
        self.inner.log(record)
    }
}

/// Accepts nothing.
struct Refusing;

impl Sink for Refusing {
    fn log(&self, _record: LogRecord) -> bool {
        false
    }
}

fn manual(dedup_window: Option<Duration>, overflow: OverflowPolicy, capacity: usize) -> RelayConfig {
    RelayConfig {
        capacity,
        overflow,
        dedup_window,
        start_mode: StartMode::Manual,
    }
}

fn record(text: &str) -> LogRecord {
    LogRecord::now("relay-test", Level::Info, text)
}

#[test]
fn rejects_zero_capacity() {
    let sink = Arc::new(Recording::default());
    let config = manual(None, OverflowPolicy::Block, 0);
    assert!(matches!(
        AsyncRelay::new(sink, config),
        Err(RelayError::ZeroCapacity)
    ));
}

#[test]
fn explicit_start_is_rejected_in_automatic_mode() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(sink, RelayConfig::default()).unwrap();
    let error = relay.start().unwrap_err();
    assert!(matches!(
        error,
        SinkError::Relay(RelayError::AutomaticStartConfigured)
    ));
}

#[test]
fn automatic_mode_starts_on_first_log_and_drains_on_stop() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(sink.clone(), RelayConfig::default()).unwrap();

    for index in 0..10 {
        assert!(relay.log(record(&format!("message {index}"))));
    }
    relay.stop();

    let expected: Vec<String> = (0..10).map(|index| format!("message {index}")).collect();
    assert_eq!(sink.texts(), expected);
    assert_eq!(sink.stops.load(Ordering::Relaxed), 1);
    let metrics = relay.metrics();
    assert_eq!(metrics.enqueued, 10);
    assert_eq!(metrics.delivered, 10);
}

#[test]
fn preserves_per_producer_order_across_threads() {
    let sink = Arc::new(Recording::default());
    let config = RelayConfig {
        capacity: 16,
        overflow: OverflowPolicy::Block,
        ..RelayConfig::default()
    };
    let relay = Arc::new(AsyncRelay::new(sink.clone(), config).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let relay = Arc::clone(&relay);
            std::thread::spawn(move || {
                for index in 0..250 {
                    assert!(relay.log(record(&format!("{producer}:{index}"))));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    relay.stop();

    let texts = sink.texts();
    assert_eq!(texts.len(), 1000);
    for producer in 0..4 {
        let sequence: Vec<usize> = texts
            .iter()
            .filter_map(|text| text.strip_prefix(&format!("{producer}:")))
            .map(|index| index.parse().unwrap())
            .collect();
        assert_eq!(sequence, (0..250).collect::<Vec<_>>());
    }
}

#[test]
fn collapses_consecutive_duplicates() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(
        sink.clone(),
        manual(Some(Duration::from_millis(50)), OverflowPolicy::Block, 64),
    )
    .unwrap();

    for text in ["disk full", "disk full", "disk full", "recovered"] {
        relay.log(record(text));
    }
    relay.start().unwrap();
    relay.stop();

    let texts = sink.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[0].starts_with("disk full [repeated 2 times over "));
    assert!(texts[0].ends_with(" ms]"));
    assert_eq!(texts[1], "recovered");
    assert_eq!(relay.metrics().merged, 2);
}

#[test]
fn zero_window_folds_only_queued_duplicates() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(
        sink.clone(),
        manual(Some(Duration::ZERO), OverflowPolicy::Block, 64),
    )
    .unwrap();

    for text in ["a", "a", "b", "a"] {
        relay.log(record(text));
    }
    relay.start().unwrap();
    relay.stop();

    let texts = sink.texts();
    assert_eq!(texts.len(), 3);
    assert!(texts[0].starts_with("a [repeated 1 times"));
    assert_eq!(texts[1], "b");
    assert_eq!(texts[2], "a");
}

#[test]
fn records_with_different_markers_are_not_merged() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(
        sink.clone(),
        manual(Some(Duration::ZERO), OverflowPolicy::Block, 64),
    )
    .unwrap();

    relay.log(record("same").with_marker(Marker::new("one")));
    relay.log(record("same").with_marker(Marker::new("one")));
    relay.start().unwrap();
    relay.stop();

    assert_eq!(sink.texts(), vec!["same", "same"]);
}

#[test]
fn overflow_drops_are_reported_after_next_delivery() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(sink.clone(), manual(None, OverflowPolicy::Drop, 1)).unwrap();

    assert!(relay.log(record("kept")));
    assert!(!relay.log(record("lost one")));
    assert!(!relay.log(record("lost two")));
    relay.start().unwrap();
    relay.stop();

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text, "kept");
    assert_eq!(records[1].logger, RELAY_LOGGER);
    assert_eq!(records[1].level, Level::Warn);
    assert_eq!(
        records[1].text,
        "2 log records dropped because the relay queue was full"
    );
    assert_eq!(relay.metrics().dropped, 2);
}

#[test]
fn timed_enqueue_gives_up_on_full_queue() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(
        sink,
        manual(None, OverflowPolicy::Timeout(Duration::from_millis(20)), 1),
    )
    .unwrap();

    assert!(relay.log(record("first")));
    let started = std::time::Instant::now();
    assert!(!relay.log(record("second")));
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[test]
fn stop_now_discards_queued_records() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
        inner: Recording::default(),
    });
    let relay = Arc::new(
        AsyncRelay::new(gate.clone(), manual(None, OverflowPolicy::Block, 8)).unwrap(),
    );
    relay.start().unwrap();

    relay.log(record("in flight"));
    entered_rx.recv().unwrap();
    relay.log(record("queued one"));
    relay.log(record("queued two"));

    let stopper = {
        let relay = Arc::clone(&relay);
        std::thread::spawn(move || relay.stop_now())
    };
    std::thread::sleep(Duration::from_millis(100));
    release_tx.send(()).unwrap();
    stopper.join().unwrap();

    assert_eq!(gate.inner.texts(), vec!["in flight"]);
}

#[test]
fn stop_now_with_dedup_discards_records_read_ahead() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
        inner: Recording::default(),
    });
    let relay = Arc::new(
        AsyncRelay::new(
            gate.clone(),
            manual(Some(Duration::ZERO), OverflowPolicy::Block, 64),
        )
        .unwrap(),
    );

    relay.log(record("in flight"));
    for index in 0..20 {
        relay.log(record(&format!("queued {index}")));
    }
    relay.start().unwrap();
    entered_rx.recv().unwrap();

    let stopper = {
        let relay = Arc::clone(&relay);
        std::thread::spawn(move || relay.stop_now())
    };
    std::thread::sleep(Duration::from_millis(100));
    release_tx.send(()).unwrap();
    stopper.join().unwrap();

    assert_eq!(gate.inner.texts(), vec!["in flight"]);
    assert_eq!(relay.metrics().delivered, 1);
}

#[test]
fn refused_records_are_not_counted_as_delivered() {
    let relay = AsyncRelay::new(Arc::new(Refusing), manual(None, OverflowPolicy::Block, 8)).unwrap();

    for index in 0..3 {
        assert!(relay.log(record(&format!("message {index}"))));
    }
    relay.start().unwrap();
    relay.stop();

    let metrics = relay.metrics();
    assert_eq!(metrics.enqueued, 3);
    assert_eq!(metrics.delivered, 0);
}

#[test]
fn stop_interrupts_idle_worker_and_relay_restarts() {
    let sink = Arc::new(Recording::default());
    let relay = AsyncRelay::new(sink.clone(), manual(None, OverflowPolicy::Block, 8)).unwrap();

    relay.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    relay.stop();
    relay.stop();

    relay.log(record("after restart"));
    relay.start().unwrap();
    relay.stop();

    assert_eq!(sink.texts(), vec!["after restart"]);
}
