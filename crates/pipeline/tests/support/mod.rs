//! Spy handlers shared by the pipeline integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    courier_pipeline::{
        Envelope, IncomingHandler, LogArg, LogSink, OutgoingHandler, Pipeline, PipelineEvent,
        Severity, render_format,
    },
    serde_json::{Value, json},
    tokio::sync::broadcast,
};

pub type Shared<T> = Arc<Mutex<Vec<T>>>;

/// Error type handlers fail with, so tests can downcast the rejection.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("handler broke: {0}")]
pub struct HandlerBroke(pub &'static str);

// ── Outgoing ────────────────────────────────────────────────────────────────

/// Answers with a fixed payload, declines, or fails.
pub struct Responder {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Envelope<Value>>>,
    behavior: Behavior,
}

enum Behavior {
    Reply(Value),
    Echo,
    Decline,
    Fail(&'static str),
}

impl Responder {
    fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            behavior,
        })
    }

    pub fn reply(data: Value) -> Arc<Self> {
        Self::with(Behavior::Reply(data))
    }

    pub fn echo() -> Arc<Self> {
        Self::with(Behavior::Echo)
    }

    pub fn decline() -> Arc<Self> {
        Self::with(Behavior::Decline)
    }

    pub fn fail(reason: &'static str) -> Arc<Self> {
        Self::with(Behavior::Fail(reason))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Envelope<Value>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutgoingHandler<Value, Value> for Responder {
    async fn handle(
        &self,
        _pipeline: &Pipeline<Value, Value>,
        outgoing: &Envelope<Value>,
    ) -> Result<Option<Envelope<Value>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(outgoing.clone());
        match &self.behavior {
            Behavior::Reply(data) => Ok(Some(Envelope::new(data.clone()))),
            Behavior::Echo => {
                tokio::task::yield_now().await;
                Ok(Some(Envelope::new(outgoing.data.clone())))
            },
            Behavior::Decline => Ok(None),
            Behavior::Fail(reason) => Err(HandlerBroke(*reason).into()),
        }
    }
}

// ── Incoming ────────────────────────────────────────────────────────────────

/// What an incoming stage observed on one invocation.
#[derive(Debug, Clone)]
pub struct StageCall {
    pub stage: &'static str,
    pub outgoing_operation: Option<Option<String>>,
    pub incoming_operation: Option<String>,
}

/// Appends its name to the payload's `trail` array, or fails.
pub struct Stage {
    name: &'static str,
    fail: bool,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    journal: Shared<StageCall>,
}

impl Stage {
    fn build(
        name: &'static str,
        journal: &Shared<StageCall>,
        fail: bool,
        delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            delay,
            calls: AtomicUsize::new(0),
            journal: Arc::clone(journal),
        })
    }

    pub fn new(name: &'static str, journal: &Shared<StageCall>) -> Arc<Self> {
        Self::build(name, journal, false, None)
    }

    pub fn failing(name: &'static str, journal: &Shared<StageCall>) -> Arc<Self> {
        Self::build(name, journal, true, None)
    }

    /// Sleeps for `delay` before doing its work.
    pub fn slow(name: &'static str, journal: &Shared<StageCall>, delay: Duration) -> Arc<Self> {
        Self::build(name, journal, false, Some(delay))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IncomingHandler<Value, Value> for Stage {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(
        &self,
        _pipeline: &Pipeline<Value, Value>,
        outgoing: Option<&Envelope<Value>>,
        mut incoming: Envelope<Value>,
    ) -> Result<Envelope<Value>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push(StageCall {
            stage: self.name,
            outgoing_operation: outgoing.map(|o| o.operation_id.clone()),
            incoming_operation: incoming.operation_id.clone(),
        });
        if self.fail {
            return Err(HandlerBroke(self.name).into());
        }

        if !incoming.data.is_object() {
            incoming.data = json!({"inner": incoming.data});
        }
        let trail = incoming
            .data
            .as_object_mut()
            .unwrap()
            .entry("trail")
            .or_insert_with(|| json!([]));
        trail.as_array_mut().unwrap().push(json!(self.name));
        Ok(incoming)
    }
}

pub fn journal() -> Shared<StageCall> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Wait for the next broadcast event, failing the test after two seconds.
pub async fn next_event(
    events: &mut broadcast::Receiver<PipelineEvent<Value>>,
) -> PipelineEvent<Value> {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no pipeline event within 2s")
        .unwrap()
}

/// Assert nothing else is broadcast within a short grace period.
pub async fn assert_quiet(events: &mut broadcast::Receiver<PipelineEvent<Value>>) {
    let extra = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
    assert!(extra.is_err(), "unexpected event: {extra:?}");
}

pub fn stages(journal: &Shared<StageCall>) -> Vec<&'static str> {
    journal.lock().unwrap().iter().map(|c| c.stage).collect()
}

// ── Log capture ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CaptureSink {
    pub lines: Mutex<Vec<(Severity, String)>>,
}

impl CaptureSink {
    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for CaptureSink {
    fn log(&self, severity: Severity, format: &str, args: &[LogArg]) {
        self.lines
            .lock()
            .unwrap()
            .push((severity, render_format(format, args)));
    }
}
