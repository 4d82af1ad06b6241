//! The dispatch engine.
//!
//! An outbound call ([`Pipeline::pipe`]) probes outgoing handlers in order
//! until one answers, then threads the answer through every incoming handler.
//! Unsolicited messages raised by a [`Listener`] run through the same incoming
//! stack and are broadcast as [`PipelineEvent::Data`].

use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    courier_protocol::{Envelope, MergeTemplate, OperationInfo, new_id},
    serde::de::DeserializeOwned,
    serde_json::Value,
    tokio::sync::broadcast,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{
    counter, gauge, histogram, incoming as incoming_metrics, labels, listeners as listener_metrics,
    pipeline as pipeline_metrics,
};

use crate::{
    config::PipelineConfig,
    diagnostics::{self, LogSink, Severity, TracingSink},
    error::PipelineError,
    factory::{DefaultMessageFactory, MessageFactory},
    handler::{HandlerChain, IncomingHandler, OutgoingHandler},
    listener::{Listener, ListenerId, MessageSubscriber, SubscriptionHandle},
};

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Pipeline over JSON payloads in both directions.
pub type JsonPipeline = Pipeline<Value, Value>;

// ── PipelineEvent ───────────────────────────────────────────────────────────

/// Events broadcast to local subscribers.
#[derive(Debug, Clone)]
pub enum PipelineEvent<In> {
    /// An unsolicited message made it through the incoming stack.
    Data { pipeline_id: String, payload: In },
    /// An unsolicited message raised by a listener failed in an incoming
    /// handler. Nobody awaits that delivery, so this is where it surfaces.
    IncomingFailed {
        pipeline_id: String,
        envelope_id: String,
        error: Arc<anyhow::Error>,
    },
}

// ── Listener bookkeeping ────────────────────────────────────────────────────

struct AttachedListener<In> {
    seq: u64,
    listener: Arc<dyn Listener<In>>,
    subscription: SubscriptionHandle,
}

struct ListenerSet<In> {
    next_seq: u64,
    attached: HashMap<ListenerId, AttachedListener<In>>,
}

/// Subscribed to every attached listener; forwards into the pipeline.
///
/// Each message runs the incoming stack on its own task, so a listener's
/// read loop is never held up by a slow incoming handler.
struct Forwarder<Out, In> {
    pipeline: Weak<Pipeline<Out, In>>,
}

#[async_trait]
impl<Out, In> MessageSubscriber<In> for Forwarder<Out, In>
where
    Out: Send + Sync + 'static,
    In: Clone + Send + Sync + 'static,
{
    async fn on_message(&self, listener: ListenerId, envelope: Envelope<In>) {
        let Some(pipeline) = self.pipeline.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            pipeline.deliver_unsolicited(listener, envelope).await;
        });
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

pub struct Pipeline<Out, In> {
    id: String,
    template: Out,
    factory: Arc<dyn MessageFactory<Out>>,
    log_sink: Option<Arc<dyn LogSink>>,
    min_severity: Severity,
    outgoing: HandlerChain<dyn OutgoingHandler<Out, In>>,
    incoming: HandlerChain<dyn IncomingHandler<Out, In>>,
    listeners: Mutex<ListenerSet<In>>,
    events: broadcast::Sender<PipelineEvent<In>>,
    disposed: AtomicBool,
}

impl<Out, In> Pipeline<Out, In>
where
    Out: MergeTemplate + Default + Send + Sync + 'static,
    In: Clone + Send + Sync + 'static,
{
    pub fn builder() -> PipelineBuilder<Out, In> {
        PipelineBuilder::new()
    }
}

impl<Out, In> Pipeline<Out, In> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Default payload every outgoing message is layered over.
    pub fn template(&self) -> &Out {
        &self.template
    }

    /// Outgoing handler chain. Append to add a candidate transport.
    pub fn outgoing(&self) -> &HandlerChain<dyn OutgoingHandler<Out, In>> {
        &self.outgoing
    }

    /// Incoming handler chain. Append to add an interceptor stage.
    pub fn incoming(&self) -> &HandlerChain<dyn IncomingHandler<Out, In>> {
        &self.incoming
    }

    /// Listen for [`PipelineEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent<In>> {
        self.events.subscribe()
    }

    /// Log `envelope` at info severity.
    pub fn log_message<T>(&self, envelope: &Envelope<T>, text: Option<&str>) {
        self.log_message_at(envelope, text, Severity::Info);
    }

    pub fn log_message_at<T>(&self, envelope: &Envelope<T>, text: Option<&str>, severity: Severity) {
        if severity < self.min_severity {
            return;
        }
        diagnostics::log_envelope(self.log_sink.as_deref(), &self.id, envelope, text, severity);
    }

    /// Snapshot of attached listeners in the order they were added.
    pub fn listeners(&self) -> Vec<Arc<dyn Listener<In>>> {
        let set = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let mut attached: Vec<&AttachedListener<In>> = set.attached.values().collect();
        attached.sort_by_key(|a| a.seq);
        attached.iter().map(|a| Arc::clone(&a.listener)).collect()
    }

    /// Detach `listener`. Returns false if it was not attached.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener<In>>) -> bool {
        let key = ListenerId::of(&**listener);
        let removed = {
            let mut set = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            let removed = set.attached.remove(&key);
            #[cfg(feature = "metrics")]
            gauge!(listener_metrics::ATTACHED, labels::PIPELINE => self.id.clone())
                .set(set.attached.len() as f64);
            removed
        };
        match removed {
            Some(entry) => {
                entry.listener.unsubscribe(entry.subscription);
                debug!(pipeline = %self.id, listener = %key, "listener detached");
                true
            },
            None => false,
        }
    }

    /// Detach every listener. Handler chains are kept and outbound calls keep
    /// working. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let detached = self.detach_all();
        info!(pipeline = %self.id, listeners = detached, "pipeline disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn detach_all(&self) -> usize {
        let drained: Vec<AttachedListener<In>> = {
            let mut set = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            set.attached.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.listener.unsubscribe(entry.subscription);
        }
        #[cfg(feature = "metrics")]
        gauge!(listener_metrics::ATTACHED, labels::PIPELINE => self.id.clone()).set(0.0);
        drained.len()
    }
}

impl<Out, In> Pipeline<Out, In>
where
    Out: Send + Sync + 'static,
    In: Clone + Send + Sync + 'static,
{
    /// Attach `listener` so its messages feed the incoming stack. Adding the
    /// same listener twice is a no-op; returns false in that case.
    pub fn add_listener(self: &Arc<Self>, listener: Arc<dyn Listener<In>>) -> bool {
        let key = ListenerId::of(&*listener);
        if self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .attached
            .contains_key(&key)
        {
            return false;
        }

        // Subscribe without the lock: the listener may call back into us.
        let forwarder: Arc<dyn MessageSubscriber<In>> = Arc::new(Forwarder {
            pipeline: Arc::downgrade(self),
        });
        let subscription = listener.subscribe(forwarder);

        let mut set = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if set.attached.contains_key(&key) {
            // Lost a race with a concurrent add of the same listener.
            drop(set);
            listener.unsubscribe(subscription);
            return false;
        }
        let seq = set.next_seq;
        set.next_seq += 1;
        set.attached.insert(key, AttachedListener {
            seq,
            listener,
            subscription,
        });
        #[cfg(feature = "metrics")]
        gauge!(listener_metrics::ATTACHED, labels::PIPELINE => self.id.clone())
            .set(set.attached.len() as f64);
        debug!(pipeline = %self.id, listener = %key, "listener attached");
        true
    }

    /// Send `data` and return the payload of the processed response.
    pub async fn pipe(&self, data: Out) -> Result<In> {
        self.pipe_with(data, OperationInfo::default()).await
    }

    /// Like [`pipe`](Self::pipe), naming the operation for correlation logs.
    pub async fn pipe_with(&self, data: Out, operation: OperationInfo) -> Result<In> {
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        counter!(pipeline_metrics::PIPES_TOTAL, labels::PIPELINE => self.id.clone()).increment(1);

        let outgoing = self
            .factory
            .create(&self.id, &self.template, data, operation);
        self.log_message_at(&outgoing, Some("sending"), Severity::Debug);

        let result = self.exchange(&outgoing).await;

        #[cfg(feature = "metrics")]
        histogram!(pipeline_metrics::PIPE_DURATION_SECONDS, labels::PIPELINE => self.id.clone())
            .record(started.elapsed().as_secs_f64());

        let incoming = result?;
        self.log_message_at(
            &incoming,
            Some(&format!("completed in {}ms", started.elapsed().as_millis())),
            Severity::Info,
        );
        Ok(incoming.into_data())
    }

    async fn exchange(&self, outgoing: &Envelope<Out>) -> Result<Envelope<In>> {
        let mut response = match self.run_outgoing(outgoing).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                let operation_id = outgoing.operation_id.clone().unwrap_or_default();
                self.log_message_at(outgoing, Some("unhandled outgoing message"), Severity::Error);
                #[cfg(feature = "metrics")]
                counter!(pipeline_metrics::UNHANDLED_TOTAL, labels::PIPELINE => self.id.clone())
                    .increment(1);
                return Err(PipelineError::unhandled(operation_id).into());
            },
            Err(e) => {
                self.log_message_at(
                    outgoing,
                    Some(&format!("outgoing handler failed: {e}")),
                    Severity::Error,
                );
                self.count_failure("outgoing");
                return Err(e);
            },
        };

        response.inherit_operation(outgoing);
        self.log_message_at(&response, Some("received"), Severity::Debug);

        self.run_incoming(Some(outgoing), response)
            .await
            .inspect_err(|_| self.count_failure("incoming"))
    }

    /// First-responder-wins probe over the outgoing chain.
    async fn run_outgoing(&self, outgoing: &Envelope<Out>) -> Result<Option<Envelope<In>>> {
        for handler in self.outgoing.snapshot() {
            if let Some(response) = handler.handle(self, outgoing).await? {
                debug!(
                    pipeline = %self.id,
                    handler = handler.name(),
                    envelope = %outgoing.id,
                    "outgoing handler answered"
                );
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Thread `incoming` through every incoming handler in order.
    async fn run_incoming(
        &self,
        outgoing: Option<&Envelope<Out>>,
        mut incoming: Envelope<In>,
    ) -> Result<Envelope<In>> {
        for handler in self.incoming.snapshot() {
            let in_flight = incoming.header();
            incoming = match handler.handle(self, outgoing, incoming).await {
                Ok(next) => next,
                Err(e) => {
                    self.log_message_at(
                        &in_flight,
                        Some(&format!("incoming handler {} failed: {e}", handler.name())),
                        Severity::Error,
                    );
                    return Err(e);
                },
            };
        }
        Ok(incoming)
    }

    /// Run an unsolicited message through the incoming stack and broadcast
    /// the resulting payload as [`PipelineEvent::Data`].
    pub async fn emit_incoming_message(&self, envelope: Envelope<In>) -> Result<()> {
        self.log_message_at(&envelope, Some("incoming"), Severity::Debug);
        let delivered = self.run_incoming(None, envelope).await?;
        self.log_message_at(&delivered, Some("delivered"), Severity::Debug);
        #[cfg(feature = "metrics")]
        counter!(incoming_metrics::DELIVERED_TOTAL, labels::PIPELINE => self.id.clone())
            .increment(1);
        // No subscribers is fine.
        let _ = self.events.send(PipelineEvent::Data {
            pipeline_id: self.id.clone(),
            payload: delivered.into_data(),
        });
        Ok(())
    }

    async fn deliver_unsolicited(&self, listener: ListenerId, envelope: Envelope<In>) {
        let envelope_id = envelope.id.clone();
        if let Err(e) = self.emit_incoming_message(envelope).await {
            warn!(
                pipeline = %self.id,
                listener = %listener,
                envelope = %envelope_id,
                error = %e,
                "unsolicited message dropped"
            );
            #[cfg(feature = "metrics")]
            counter!(incoming_metrics::FAILED_TOTAL, labels::PIPELINE => self.id.clone())
                .increment(1);
            let _ = self.events.send(PipelineEvent::IncomingFailed {
                pipeline_id: self.id.clone(),
                envelope_id,
                error: Arc::new(e),
            });
        }
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn count_failure(&self, stage: &'static str) {
        #[cfg(feature = "metrics")]
        counter!(
            pipeline_metrics::PIPE_ERRORS_TOTAL,
            labels::PIPELINE => self.id.clone(),
            labels::STAGE => stage
        )
        .increment(1);
    }
}

impl<Out, In> Drop for Pipeline<Out, In> {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.detach_all();
        }
    }
}

// ── PipelineBuilder ─────────────────────────────────────────────────────────

pub struct PipelineBuilder<Out, In> {
    id: Option<String>,
    template: Option<Out>,
    factory: Option<Arc<dyn MessageFactory<Out>>>,
    log_sink: Option<Arc<dyn LogSink>>,
    min_severity: Severity,
    event_capacity: usize,
    _incoming: PhantomData<fn() -> In>,
}

impl<Out, In> PipelineBuilder<Out, In>
where
    Out: MergeTemplate + Default + Send + Sync + 'static,
    In: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            id: None,
            template: None,
            factory: None,
            log_sink: None,
            min_severity: Severity::Trace,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            _incoming: PhantomData,
        }
    }

    /// Apply file-based settings. Fails if `defaults` does not deserialize
    /// into the outgoing payload type.
    pub fn from_config(config: &PipelineConfig) -> Result<Self>
    where
        Out: DeserializeOwned,
    {
        let mut builder = Self::new().event_capacity(config.event_capacity);
        if let Some(id) = &config.id {
            builder = builder.id(id.clone());
        }
        if !config.defaults.is_empty() {
            let template: Out = serde_json::from_value(Value::Object(config.defaults.clone()))?;
            builder = builder.template(template);
        }
        if config.diagnostics.enabled {
            builder = builder
                .log_sink(Arc::new(TracingSink))
                .min_severity(config.diagnostics.min_severity);
        }
        Ok(builder)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn template(mut self, template: Out) -> Self {
        self.template = Some(template);
        self
    }

    pub fn factory(mut self, factory: Arc<dyn MessageFactory<Out>>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Arc<Pipeline<Out, In>> {
        let (events, _) = broadcast::channel(self.event_capacity);
        let pipeline = Pipeline {
            id: self.id.unwrap_or_else(new_id),
            template: self.template.unwrap_or_default(),
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(DefaultMessageFactory)),
            log_sink: self.log_sink,
            min_severity: self.min_severity,
            outgoing: HandlerChain::new("outgoing"),
            incoming: HandlerChain::new("incoming"),
            listeners: Mutex::new(ListenerSet {
                next_seq: 0,
                attached: HashMap::new(),
            }),
            events,
            disposed: AtomicBool::new(false),
        };
        debug!(pipeline = %pipeline.id, "pipeline created");
        Arc::new(pipeline)
    }
}

impl<Out, In> Default for PipelineBuilder<Out, In>
where
    Out: MergeTemplate + Default + Send + Sync + 'static,
    In: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
