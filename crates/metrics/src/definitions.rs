//! Metric name and label definitions.

/// Outbound call metrics
pub mod pipeline {
    /// Total number of outbound calls started
    pub const PIPES_TOTAL: &str = "courier_pipes_total";
    /// Outbound calls that failed in a handler
    pub const PIPE_ERRORS_TOTAL: &str = "courier_pipe_errors_total";
    /// Outbound calls no outgoing handler answered
    pub const UNHANDLED_TOTAL: &str = "courier_unhandled_outgoing_total";
    /// End-to-end duration of an outbound call in seconds
    pub const PIPE_DURATION_SECONDS: &str = "courier_pipe_duration_seconds";
}

/// Unsolicited inbound metrics
pub mod incoming {
    /// Unsolicited messages delivered to subscribers
    pub const DELIVERED_TOTAL: &str = "courier_incoming_delivered_total";
    /// Unsolicited messages dropped by a failing handler
    pub const FAILED_TOTAL: &str = "courier_incoming_failed_total";
}

/// Listener registry metrics
pub mod listeners {
    /// Number of listeners currently attached to a pipeline
    pub const ATTACHED: &str = "courier_listeners_attached";
}

/// Common label keys
pub mod labels {
    pub const PIPELINE: &str = "pipeline";
    pub const STAGE: &str = "stage";
}
