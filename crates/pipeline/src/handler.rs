//! Handler traits and the ordered chains the pipeline dispatches through.

use std::sync::{Arc, RwLock};

use {anyhow::Result, async_trait::async_trait, courier_protocol::Envelope, tracing::debug};

use crate::pipeline::Pipeline;

// ── OutgoingHandler ─────────────────────────────────────────────────────────

/// A candidate transport for outbound calls.
///
/// Return `Ok(Some(response))` to answer the call, `Ok(None)` to let the next
/// handler try. An `Err` aborts the call; later handlers are not consulted.
#[async_trait]
pub trait OutgoingHandler<Out, In>: Send + Sync {
    /// A human-readable name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        pipeline: &Pipeline<Out, In>,
        outgoing: &Envelope<Out>,
    ) -> Result<Option<Envelope<In>>>;
}

// ── IncomingHandler ─────────────────────────────────────────────────────────

/// One stage of the inbound interceptor stack.
///
/// `outgoing` is the envelope that triggered the response, or `None` for
/// unsolicited messages raised by a listener.
#[async_trait]
pub trait IncomingHandler<Out, In>: Send + Sync {
    /// A human-readable name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn handle(
        &self,
        pipeline: &Pipeline<Out, In>,
        outgoing: Option<&Envelope<Out>>,
        incoming: Envelope<In>,
    ) -> Result<Envelope<In>>;
}

// ── HandlerChain ────────────────────────────────────────────────────────────

/// Ordered, append-mostly handler sequence.
///
/// The lock is only held to mutate or copy the sequence. A dispatch works on
/// a snapshot, so changes made while a call is in flight apply from that
/// call's next phase onward.
pub struct HandlerChain<H: ?Sized> {
    stage: &'static str,
    handlers: RwLock<Vec<Arc<H>>>,
}

impl<H: ?Sized> HandlerChain<H> {
    pub(crate) fn new(stage: &'static str) -> Self {
        Self {
            stage,
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a handler at the end of the chain.
    pub fn push(&self, handler: Arc<H>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.push(handler);
        debug!(
            stage = self.stage,
            count = handlers.len(),
            "handler appended"
        );
    }

    /// Remove a handler by identity. Returns false if it was not in the chain.
    pub fn remove(&self, handler: &Arc<H>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|h| Arc::as_ptr(h) as *const () != target);
        let removed = handlers.len() != before;
        if removed {
            debug!(
                stage = self.stage,
                count = handlers.len(),
                "handler removed"
            );
        }
        removed
    }

    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current sequence, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<H>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
