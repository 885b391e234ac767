//! User directory access.
//!
//! The directory is the source of truth for which subjects exist and holds
//! their playback-provider credentials.

pub mod clerk;

use async_trait::async_trait;

use crate::Result;
use crate::domain::{Credential, SubjectSnapshot};

pub use clerk::{ClerkConfig, ClerkDirectory};

/// Provider name used for credential queries.
pub const SPOTIFY_PROVIDER: &str = "spotify";

#[async_trait]
pub trait DirectoryProvider: Send + Sync {
    /// Full membership snapshot. Implementations page internally.
    async fn list_subjects(&self) -> Result<Vec<SubjectSnapshot>>;

    /// Current credential for `subject_id` at `provider`, `None` when unlinked.
    async fn list_credential(&self, subject_id: &str, provider: &str)
    -> Result<Option<Credential>>;
}
