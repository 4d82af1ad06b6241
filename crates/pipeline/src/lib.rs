//! Transport-agnostic message pipeline.
//!
//! A [`Pipeline`] turns an outbound call into a correlated request/response
//! exchange. Outgoing handlers are probed in registration order and the first
//! one to return a response wins. The response then runs through every
//! incoming handler, in order, before its payload is handed back to the
//! caller. Listeners feed unsolicited messages into the same incoming stack
//! and the results are broadcast as [`PipelineEvent`]s.
//!
//! Handlers and listeners are supplied by the embedding code; the pipeline
//! itself knows nothing about sockets, encodings or retries.

pub mod communicator;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod handler;
pub mod listener;
pub mod pipeline;

pub use {
    communicator::{Communicator, CommunicatorHandler},
    config::{PipelineConfig, load_config},
    courier_protocol::{Envelope, MergeTemplate, OperationInfo},
    diagnostics::{LogArg, LogSink, Severity, TracingSink, render_format},
    error::PipelineError,
    factory::{DefaultMessageFactory, MessageFactory},
    handler::{HandlerChain, IncomingHandler, OutgoingHandler},
    listener::{Listener, ListenerHub, ListenerId, MessageSubscriber, SubscriptionHandle},
    pipeline::{JsonPipeline, Pipeline, PipelineBuilder, PipelineEvent},
};
