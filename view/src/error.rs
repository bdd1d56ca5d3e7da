//! Error types for the view.
//!
//! The lookup path itself cannot fail (an absent key is a `null` result,
//! not an error), so the taxonomy covers only the changelog follower.

use keyfold_core::log::LogError;
use keyfold_core::record::DecodeError;
use thiserror::Error;

/// Errors from the changelog follower.
#[derive(Error, Debug)]
pub enum ViewError {
    /// The changelog subscription failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// A changelog record could not be decoded. The follower stops
    /// rather than serve a replica that silently diverges from the
    /// table.
    #[error("follower halted: {0}")]
    ChangelogDecode(#[from] DecodeError),
}
