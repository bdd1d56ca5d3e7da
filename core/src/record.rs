//! Wire records and the encode/decode contract.
//!
//! Two record kinds travel through the pipeline: [`Event`] on the input
//! topic and [`AggregateState`] on the changelog topic and in the keyed
//! table. Each kind is a distinct Rust type with its own statically
//! selected codec through the [`WireRecord`] trait; there is no runtime
//! dispatch between record kinds.
//!
//! # Wire formats
//!
//! One deployment picks exactly one [`WireFormat`] and uses it end-to-end
//! (producer, table, changelog, view). The two supported formats are:
//!
//! - [`WireFormat::Binary`]: bincode, compact and fast
//! - [`WireFormat::Json`]: serde_json, human-readable
//!
//! Mixing formats between producer and table is a configuration error; it
//! surfaces as [`DecodeError`] on the consuming side, never as silently
//! wrong values.
//!
//! # Contract
//!
//! - Round-trip fidelity: `decode(encode(x)) == x` for every representable
//!   value, field for field, including empty strings and `i32::MAX` /
//!   `i32::MIN` totals.
//! - Decode is all-or-nothing: truncated bytes, a missing required field,
//!   or a field of the wrong primitive type fail the whole record.
//! - The schema is fixed and versionless. A schema change requires a new
//!   topic and table.
//!
//! # Example
//!
//! ```
//! use keyfold_core::record::{Event, WireFormat, WireRecord};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let event = Event {
//!     observed_at: "2026-01-01T00:00:00Z".to_string(),
//!     amount: 7,
//! };
//!
//! let bytes = event.encode(WireFormat::Binary)?;
//! let decoded = Event::decode(&bytes, WireFormat::Binary)?;
//! assert_eq!(event, decoded);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// The serialization format used for all records of one deployment.
///
/// Selected once at construction time and threaded explicitly through the
/// emitter, processor, and view. There is no per-record format tag on the
/// wire; the two sides must agree out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// Compact bincode encoding.
    Binary,
    /// Plain JSON encoding.
    Json,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Failed to encode a record.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The serializer rejected the value.
    #[error("failed to encode {kind} record as {format}: {reason}")]
    Serialization {
        /// Record kind being encoded (see [`WireRecord::KIND`]).
        kind: &'static str,
        /// Wire format in use.
        format: WireFormat,
        /// Underlying serializer message.
        reason: String,
    },
}

/// Failed to decode a record. Decoding is all-or-nothing: no partially
/// populated record is ever returned.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload was empty where a record was required.
    #[error("cannot decode {kind} record: empty payload")]
    EmptyPayload {
        /// Record kind being decoded.
        kind: &'static str,
    },

    /// The bytes were truncated, a required field was missing, or a field
    /// had the wrong primitive type.
    #[error("failed to decode {kind} record from {format}: {reason}")]
    Malformed {
        /// Record kind being decoded.
        kind: &'static str,
        /// Wire format in use.
        format: WireFormat,
        /// Underlying deserializer message.
        reason: String,
    },
}

/// A record that can cross the wire in either [`WireFormat`].
///
/// Implemented by [`Event`] and [`AggregateState`]. The codec is selected
/// statically per record type: callers always know at compile time which
/// kind they are encoding or decoding, so a malformed payload of one kind
/// can never be misread as the other.
///
/// The provided methods cover both formats; implementors only supply
/// [`WireRecord::KIND`] for error context.
pub trait WireRecord: Serialize + DeserializeOwned + Sized {
    /// Short lowercase name of the record kind, used in error messages
    /// and log fields.
    const KIND: &'static str;

    /// Encode this record in the given format.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::Serialization`] if the serializer rejects
    /// the value. This does not happen for well-formed [`Event`] and
    /// [`AggregateState`] values but is surfaced rather than swallowed.
    fn encode(&self, format: WireFormat) -> Result<Vec<u8>, EncodeError> {
        let result = match format {
            WireFormat::Binary => bincode::serialize(self).map_err(|e| e.to_string()),
            WireFormat::Json => serde_json::to_vec(self).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| EncodeError::Serialization {
            kind: Self::KIND,
            format,
            reason,
        })
    }

    /// Decode a record from bytes in the given format.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::EmptyPayload`] if `bytes` is empty
    /// - [`DecodeError::Malformed`] if the bytes are truncated, a required
    ///   field is missing, or a field has the wrong primitive type
    fn decode(bytes: &[u8], format: WireFormat) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyPayload { kind: Self::KIND });
        }
        let result = match format {
            WireFormat::Binary => bincode::deserialize(bytes).map_err(|e| e.to_string()),
            WireFormat::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| DecodeError::Malformed {
            kind: Self::KIND,
            format,
            reason,
        })
    }
}

/// One keyed observation on the input topic.
///
/// The aggregation key is not part of the encoded payload: it travels as
/// the log message key, which is also what the log substrate hashes to
/// pick a partition. Key and payload are reunited in [`LogRecord`].
///
/// [`LogRecord`]: crate::log::LogRecord
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was generated, as an opaque string. Never parsed or
    /// compared; carried into the aggregate's timestamps verbatim.
    pub observed_at: String,

    /// Signed increment contributed by this event. Fixed at 32 bits
    /// across the whole system; totals wrap on overflow.
    pub amount: i32,
}

impl WireRecord for Event {
    const KIND: &'static str = "event";
}

/// The current aggregate for one key, as stored in the keyed table and on
/// the changelog topic.
///
/// Exists only once at least one [`Event`] has been folded for the key.
/// Produced exclusively by [`fold`](crate::fold::fold); consumers treat
/// it as immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    /// `observed_at` of the first event folded for this key. Set once,
    /// never overwritten.
    pub first_seen_at: String,

    /// `observed_at` of the most recent event folded for this key.
    /// Overwritten on every fold.
    pub last_seen_at: String,

    /// Wrapping sum of all folded `amount`s.
    pub total: i32,
}

impl WireRecord for AggregateState {
    const KIND: &'static str = "aggregate-state";
}
