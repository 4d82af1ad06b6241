//! Adapter between concrete transports and the outgoing handler chain.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, courier_protocol::Envelope, tracing::trace};

use crate::{handler::OutgoingHandler, pipeline::Pipeline};

/// A concrete transport: socket, named pipe, in-process channel.
///
/// Returning `Ok(None)` means this transport cannot deliver the message and
/// the pipeline should try the next outgoing handler.
#[async_trait]
pub trait Communicator<Out, In>: Send + Sync {
    /// Endpoint the transport talks to, stamped as `target` on responses that
    /// carry none.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    async fn send(&self, envelope: &Envelope<Out>) -> Result<Option<Envelope<In>>>;
}

/// Outgoing handler that forwards every message to a [`Communicator`].
pub struct CommunicatorHandler<Out, In> {
    name: String,
    communicator: Arc<dyn Communicator<Out, In>>,
}

impl<Out, In> CommunicatorHandler<Out, In> {
    pub fn new(name: impl Into<String>, communicator: Arc<dyn Communicator<Out, In>>) -> Self {
        Self {
            name: name.into(),
            communicator,
        }
    }
}

#[async_trait]
impl<Out, In> OutgoingHandler<Out, In> for CommunicatorHandler<Out, In>
where
    Out: Send + Sync + 'static,
    In: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        _pipeline: &Pipeline<Out, In>,
        outgoing: &Envelope<Out>,
    ) -> Result<Option<Envelope<In>>> {
        trace!(handler = %self.name, envelope = %outgoing.id, "forwarding to communicator");
        let mut response = self.communicator.send(outgoing).await?;
        if let (Some(response), Some(endpoint)) = (response.as_mut(), self.communicator.endpoint())
            && response.target.is_none()
        {
            response.target = Some(endpoint.to_string());
        }
        Ok(response)
    }
}
