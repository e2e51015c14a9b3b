//! Read-only access to authoritative records.
//!
//! A [`RepositoryClient`] fetches a record's current body and CID straight
//! from the personal data server that owns it. Implementations make exactly
//! one attempt per call; retry and backoff belong to the caller.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The current authoritative state of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritativeRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
    /// The PDS that answered.
    pub pds_endpoint: String,
}

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Fetch the record at `uri`.
    ///
    /// `pds_hint` is the endpoint the record was last seen on; clients may
    /// use it to skip identity resolution.
    ///
    /// Returns `Ok(None)` when the repository answers that the record does
    /// not exist, and `Err` when it could not be reached or answered
    /// unintelligibly.
    async fn fetch_record(
        &self,
        uri: &str,
        pds_hint: Option<&str>,
    ) -> Result<Option<AuthoritativeRecord>>;
}
