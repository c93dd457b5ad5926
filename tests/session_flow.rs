//! End-to-end command router tests with in-memory frame sources and relay

use async_trait::async_trait;
use sortline_controller::actuator::{ActuatorManager, SimulatedActuator};
use sortline_controller::bucket_ledger::{BucketLedger, LedgerRepository};
use sortline_controller::command_router::{CommandRouter, RouterContext};
use sortline_controller::frame_source::{Frame, FrameSource, FrameSourceFactory, RetryPolicy};
use sortline_controller::panel_buttons::PanelCommand;
use sortline_controller::power_control::PowerControl;
use sortline_controller::realtime_hub::RealtimeHub;
use sortline_controller::streaming_session::Outbound;
use sortline_controller::tracker::{
    BoundingBox, CrossingDirection, TrackerConfig, TriggerLine,
};
use sortline_controller::vision::{Detector, FrameAnnotator};
use sortline_controller::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

const SIZE: u32 = 16;
const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy)]
enum After {
    Hang,
    Exhaust,
    Fail,
}

struct MockSource {
    remaining: usize,
    after: After,
    sequence: u64,
    released: Arc<AtomicU32>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return match self.after {
                After::Hang => std::future::pending().await,
                After::Exhaust => Ok(None),
                After::Fail => Err(Error::Frame("camera unplugged".to_string())),
            };
        }
        self.remaining -= 1;
        let frame = Frame {
            width: SIZE,
            height: SIZE,
            pixels: vec![0; (SIZE * SIZE * 3) as usize],
            sequence: self.sequence,
        };
        self.sequence += 1;
        Ok(Some(frame))
    }

    async fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockFactory {
    frames: usize,
    after: After,
    available: AtomicBool,
    opens: AtomicU32,
    released: Arc<AtomicU32>,
}

impl MockFactory {
    fn new(frames: usize, after: After) -> Self {
        Self {
            frames,
            after,
            available: AtomicBool::new(true),
            opens: AtomicU32::new(0),
            released: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl FrameSourceFactory for MockFactory {
    async fn open(&self) -> Result<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::SourceUnavailable("no camera".to_string()));
        }
        Ok(Box::new(MockSource {
            remaining: self.frames,
            after: self.after,
            sequence: 0,
            released: self.released.clone(),
        }))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// One item moving up across y=8 between frame 0 and frame 1
struct CrossingItem;

impl Detector for CrossingItem {
    fn detect(&self, frame: &Frame) -> Vec<BoundingBox> {
        let y = if frame.sequence == 0 { 12.0 } else { 4.0 };
        vec![BoundingBox::around(8.0, y, 4.0, 4.0)]
    }
}

#[derive(Default)]
struct RecordingPower {
    calls: AtomicU32,
}

#[async_trait]
impl PowerControl for RecordingPower {
    async fn power_off(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Rig {
    ctx: RouterContext,
    relay: Arc<SimulatedActuator>,
    factory: Arc<MockFactory>,
    power: Arc<RecordingPower>,
    ledger: Arc<BucketLedger>,
    _dir: tempfile::TempDir,
}

async fn rig(factory: MockFactory, threshold: u32) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(SimulatedActuator::new());
    let factory = Arc::new(factory);
    let power = Arc::new(RecordingPower::default());
    let ledger = Arc::new(
        BucketLedger::load(
            LedgerRepository::new(dir.path().join("buckets.json")),
            4,
            threshold,
            Arc::new(RealtimeHub::new()),
        )
        .await,
    );

    let ctx = RouterContext {
        ledger: ledger.clone(),
        actuators: Arc::new(ActuatorManager::new(relay.clone())),
        frame_sources: factory.clone(),
        detector: Arc::new(CrossingItem),
        annotator: FrameAnnotator::new(50),
        tracker_config: TrackerConfig {
            trigger: TriggerLine::horizontal(8.0, CrossingDirection::Decreasing),
            ..Default::default()
        },
        retry: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
        },
        frame_interval: Duration::from_millis(1),
        power: power.clone(),
        power_off_delay: Duration::from_millis(1),
    };

    Rig {
        ctx,
        relay,
        factory,
        power,
        ledger,
        _dir: dir,
    }
}

struct Client {
    inbound: mpsc::Sender<String>,
    outbound: mpsc::Receiver<Outbound>,
    task: JoinHandle<()>,
}

impl Client {
    async fn connect(ctx: &RouterContext, panel: Option<broadcast::Receiver<PanelCommand>>) -> Self {
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound) = mpsc::channel(64);
        let router = CommandRouter::new(Uuid::new_v4(), ctx.clone(), outbound_tx);
        let task = tokio::spawn(router.run(inbound_rx, panel));
        let mut client = Self {
            inbound,
            outbound,
            task,
        };
        let greeting = client.next_text().await;
        assert!(greeting.contains("buckets_update"), "unexpected greeting {greeting}");
        client
    }

    async fn send(&self, text: &str) {
        self.inbound.send(text.to_string()).await.unwrap();
    }

    /// Next text message, skipping frames
    async fn next_text(&mut self) -> String {
        loop {
            match tokio::time::timeout(WAIT, self.outbound.recv()).await {
                Ok(Some(Outbound::Text(text))) => return text,
                Ok(Some(Outbound::Binary(_))) => continue,
                Ok(None) => panic!("router closed"),
                Err(_) => panic!("timed out waiting for text"),
            }
        }
    }

    /// Displayed count of the next frame
    async fn next_count(&mut self) -> u32 {
        loop {
            match tokio::time::timeout(WAIT, self.outbound.recv()).await {
                Ok(Some(Outbound::Binary(bytes))) => {
                    return u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                }
                Ok(Some(Outbound::Text(_))) => continue,
                Ok(None) => panic!("router closed"),
                Err(_) => panic!("timed out waiting for frame"),
            }
        }
    }

    async fn request(&mut self, text: &str) -> String {
        self.send(text).await;
        self.next_text().await
    }

    async fn disconnect(self) {
        drop(self.inbound);
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("router did not finish")
            .unwrap();
    }
}

fn json(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| panic!("not json: {text}"))
}

#[tokio::test]
async fn test_start_stream_stop() {
    let rig = rig(MockFactory::new(3, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    assert_eq!(client.request("start").await, "started");
    assert!(rig.relay.is_running());
    assert_eq!(client.next_count().await, 0);
    assert_eq!(client.next_count().await, 1);

    assert_eq!(client.request("stop").await, "stopped");
    assert!(!rig.relay.is_running());
    assert_eq!(rig.factory.released.load(Ordering::SeqCst), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_selected_bucket_receives_counts() {
    let rig = rig(MockFactory::new(2, After::Exhaust), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    let echo = json(&client.request(r#"{"type":"select_bucket","bucket":2}"#).await);
    assert_eq!(echo["type"], "selected_bucket");
    assert_eq!(echo["bucket"], 2);

    assert_eq!(client.request("start").await, "started");
    // loop ends on its own once the source is exhausted
    assert_eq!(client.next_text().await, "stopped");

    let buckets = rig.ledger.snapshot().await;
    assert_eq!(buckets[1].count, 1);
    assert_eq!(buckets[0].count, 0);
    assert!(!rig.relay.is_running());

    client.disconnect().await;
}

#[tokio::test]
async fn test_validation_errors_change_nothing() {
    let rig = rig(MockFactory::new(0, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    let error = json(&client.request(r#"{"type":"select_bucket","bucket":99}"#).await);
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "validation_error");

    let error = json(
        &client
            .request(r#"{"type":"set_bucket_value","bucket":1,"set_value":0}"#)
            .await,
    );
    assert_eq!(error["code"], "validation_error");

    let error = json(&client.request(r#"{"type":"set_all","set_value":-3}"#).await);
    assert_eq!(error["code"], "validation_error");

    assert!(rig.ledger.snapshot().await.iter().all(|b| b.threshold == 800));

    client.disconnect().await;
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let rig = rig(MockFactory::new(0, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.send("launch").await;
    client.send(r#"{"type":"self_destruct"}"#).await;
    client.send("{broken").await;
    let ack = json(&client.request(r#"{"type":"set_offset","offset":7}"#).await);
    assert_eq!(ack["message"], "offset set to 7");

    client.disconnect().await;
}

#[tokio::test]
async fn test_set_values() {
    let rig = rig(MockFactory::new(0, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client
        .send(r#"{"type":"set_bucket_value","bucket":3,"set_value":250}"#)
        .await;
    client.send(r#"{"type":"set_all","set_value":900}"#).await;
    client
        .send(r#"{"type":"set_bucket_value","bucket":4,"set_value":120}"#)
        .await;
    // set_offset ack proves the earlier commands were dispatched
    client.request(r#"{"type":"set_offset","offset":0}"#).await;

    let thresholds: Vec<u32> = rig
        .ledger
        .snapshot()
        .await
        .iter()
        .map(|b| b.threshold)
        .collect();
    assert_eq!(thresholds, vec![900, 900, 900, 120]);

    client.disconnect().await;
}

#[tokio::test]
async fn test_offset_shifts_displayed_count() {
    let rig = rig(MockFactory::new(3, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request(r#"{"type":"set_offset","offset":100}"#).await;
    client.request("start").await;
    assert_eq!(client.next_count().await, 100);
    assert_eq!(client.next_count().await, 101);

    client.disconnect().await;
    assert!(rig.ledger.snapshot().await.iter().all(|b| b.count == 0));
}

#[tokio::test]
async fn test_source_unavailable() {
    let rig = rig(MockFactory::new(1, After::Hang), 800).await;
    rig.factory.available.store(false, Ordering::SeqCst);
    let mut client = Client::connect(&rig.ctx, None).await;

    let error = json(&client.request("start").await);
    assert_eq!(error["code"], "source_unavailable");
    assert_eq!(rig.factory.opens.load(Ordering::SeqCst), 2);
    assert_eq!(rig.relay.start_calls(), 0);

    // Back to idle: a later start works
    rig.factory.available.store(true, Ordering::SeqCst);
    assert_eq!(client.request("start").await, "started");
    assert_eq!(client.request("start").await, json_info("already streaming"));

    client.disconnect().await;
}

fn json_info(message: &str) -> String {
    format!(r#"{{"type":"info","message":"{message}"}}"#)
}

#[tokio::test]
async fn test_second_session_cannot_take_the_line() {
    let rig = rig(MockFactory::new(1, After::Hang), 800).await;
    let mut first = Client::connect(&rig.ctx, None).await;
    let mut second = Client::connect(&rig.ctx, None).await;

    assert_eq!(first.request("start").await, "started");
    let error = json(&second.request("start").await);
    assert_eq!(error["code"], "actuator_busy");

    // Idle session cannot stop a line it does not own
    assert_eq!(
        second.request("stop").await,
        json_info("conveyor is controlled by another session")
    );
    assert!(rig.relay.is_running());

    first.disconnect().await;
    assert!(!rig.relay.is_running());
    assert_eq!(second.request("start").await, "started");
    second.disconnect().await;
}

#[tokio::test]
async fn test_fill_stops_line_but_keeps_counting() {
    let rig = rig(MockFactory::new(4, After::Hang), 1).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request(r#"{"type":"select_bucket","bucket":1}"#).await;
    client.request("start").await;

    let stopped = json(&client.next_text().await);
    assert_eq!(stopped["type"], "bucket_stopped");
    assert_eq!(stopped["bucket"], 1);
    assert!(!rig.relay.is_running());

    let bucket = rig.ledger.snapshot().await[0].clone();
    assert!(bucket.filled);
    assert_eq!(bucket.count, 1);

    // frames keep flowing with the relay off
    assert_eq!(client.next_count().await, 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_reset_while_streaming() {
    let rig = rig(MockFactory::new(3, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request(r#"{"type":"select_bucket","bucket":1}"#).await;
    client.request(r#"{"type":"set_offset","offset":5}"#).await;
    client.request("start").await;
    assert_eq!(client.next_count().await, 5);
    assert_eq!(client.next_count().await, 6);

    assert_eq!(client.request("reset").await, "reset");
    let selection = json(&client.next_text().await);
    assert_eq!(selection["type"], "selected_bucket");
    assert!(selection["bucket"].is_null());

    assert!(!rig.relay.is_running());
    assert_eq!(rig.factory.released.load(Ordering::SeqCst), 1);
    assert!(rig.ledger.snapshot().await.iter().all(|b| b.count == 0 && !b.filled));

    // tracker and offset start over
    client.request("start").await;
    assert_eq!(client.next_count().await, 0);

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_stops_hardware() {
    let rig = rig(MockFactory::new(2, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request("start").await;
    client.next_count().await;
    assert!(rig.relay.is_running());

    client.disconnect().await;
    assert!(!rig.relay.is_running());
    assert_eq!(rig.factory.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_source_failure_mid_stream() {
    let rig = rig(MockFactory::new(1, After::Fail), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request("start").await;
    let error = json(&client.next_text().await);
    assert_eq!(error["code"], "frame_error");
    assert_eq!(client.next_text().await, "stopped");
    assert!(!rig.relay.is_running());
    assert_eq!(rig.factory.released.load(Ordering::SeqCst), 1);

    // restartable
    assert_eq!(client.request("start").await, "started");
    client.disconnect().await;
}

#[tokio::test]
async fn test_shutdown_powers_off_after_stopping() {
    let rig = rig(MockFactory::new(1, After::Hang), 800).await;
    let mut client = Client::connect(&rig.ctx, None).await;

    client.request("start").await;
    assert_eq!(client.request("shutdown").await, json_info("shutting down"));

    tokio::time::timeout(WAIT, async {
        while rig.power.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!rig.relay.is_running());

    client.disconnect().await;
}

#[tokio::test]
async fn test_panel_buttons_drive_session() {
    let rig = rig(MockFactory::new(1, After::Hang), 800).await;
    let (panel_tx, panel_rx) = broadcast::channel(4);
    let mut client = Client::connect(&rig.ctx, Some(panel_rx)).await;

    panel_tx.send(PanelCommand::Start).unwrap();
    assert_eq!(client.next_text().await, "started");
    assert!(rig.relay.is_running());

    panel_tx.send(PanelCommand::Stop).unwrap();
    assert_eq!(client.next_text().await, "stopped");
    assert!(!rig.relay.is_running());

    client.disconnect().await;
}
