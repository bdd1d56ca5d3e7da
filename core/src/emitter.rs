//! Producer-side helper: encode one event and publish it keyed.

use crate::log::{EventLog, LogError, LogRecord};
use crate::record::{EncodeError, Event, WireFormat, WireRecord};
use std::sync::Arc;
use thiserror::Error;

/// Errors from emitting an event.
#[derive(Error, Debug)]
pub enum EmitError {
    /// The event could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The log did not acknowledge the publish.
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Publishes keyed events onto the input topic.
///
/// Thin producer wrapper: the key travels as the log message key (which
/// is what the substrate hashes for partition affinity), the encoded
/// event as the payload. Emission is synchronous per event: `emit`
/// resolves once the log acknowledges the write.
///
/// # Example
///
/// ```ignore
/// let emitter = Emitter::new(log, "observations", WireFormat::Binary);
/// emitter.emit("3", &Event {
///     observed_at: Utc::now().to_rfc3339(),
///     amount: 2,
/// }).await?;
/// ```
pub struct Emitter {
    log: Arc<dyn EventLog>,
    topic: String,
    format: WireFormat,
}

impl Emitter {
    /// Create an emitter for one topic and wire format.
    ///
    /// The format must match what the consuming processor was configured
    /// with; there is no negotiation on the wire.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, topic: impl Into<String>, format: WireFormat) -> Self {
        Self {
            log,
            topic: topic.into(),
            format,
        }
    }

    /// Encode `event` and publish it under `key`, waiting for the log's
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError::Encode`] if encoding fails (the event is
    /// dropped, nothing was published) or [`EmitError::Log`] if the log
    /// does not acknowledge the write.
    pub async fn emit(&self, key: &str, event: &Event) -> Result<(), EmitError> {
        let payload = event.encode(self.format)?;
        self.log
            .publish(&self.topic, LogRecord::new(key.to_string(), payload))
            .await?;
        tracing::debug!(
            topic = %self.topic,
            key = %key,
            amount = event.amount,
            "event emitted"
        );
        Ok(())
    }
}
