//! Message envelope definitions shared by the courier pipeline and its
//! transports.
//!
//! An [`Envelope`] wraps one logical message: a typed payload plus identity,
//! correlation and tamper-evidence metadata. The crate is
//! serialization-agnostic; serde derives are provided so a transport can pick
//! whatever wire encoding it likes.

mod envelope;
mod template;

pub use {
    envelope::{Envelope, OperationInfo, new_id, now_ms},
    template::MergeTemplate,
};
