//! Trace output through `tracing`

use super::TraceWriter;
use tracing::{debug, error, info};

/// Forwards evaluation traces to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraceWriter;

impl TraceWriter for TracingTraceWriter {
    fn info(&self, message: &str) {
        info!(target: "pipeline_resolver::trace", "{}", message);
    }

    fn verbose(&self, message: &str) {
        debug!(target: "pipeline_resolver::trace", "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "pipeline_resolver::trace", "{}", message);
    }
}
