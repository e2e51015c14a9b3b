//! HTTP [`RepositoryClient`] that reads records straight from their PDS.
//!
//! Resolution order for a record `at://{authority}/{collection}/{rkey}`:
//!
//! 1. If a PDS hint is given (the endpoint the record was indexed from), use it.
//! 2. Otherwise resolve the authority DID to its DID document:
//!    `did:plc:*` via the configured PLC directory, `did:web:*` via
//!    `https://{host}/.well-known/did.json`.
//! 3. Take the `#atproto_pds` service endpoint from the document.
//!
//! The record itself comes from `GET {pds}/xrpc/com.atproto.repo.getRecord`.
//! A 404, or a 400 whose error is `RecordNotFound`, means the record does not
//! exist. Everything else that is not a 200 is a transient failure.
//!
//! Each call makes exactly one attempt; see [`crate::resilience`] for retries.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use eprint_index_core::record::RecordUri;
use eprint_index_core::repository::{AuthoritativeRecord, RepositoryClient};

use crate::config::RepositoryConfig;

pub struct HttpRepositoryClient {
    client: reqwest::Client,
    plc_directory: String,
}

#[derive(Deserialize)]
struct GetRecordResponse {
    uri: String,
    cid: Option<String>,
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct XrpcError {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidDocument {
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    id: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    service_endpoint: serde_json::Value,
}

impl HttpRepositoryClient {
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            plc_directory: config.plc_directory.trim_end_matches('/').to_string(),
        })
    }

    /// Find the PDS endpoint for a DID.
    pub async fn resolve_pds(&self, did: &str) -> Result<String> {
        let url = if did.starts_with("did:plc:") {
            format!("{}/{}", self.plc_directory, did)
        } else if let Some(host) = did.strip_prefix("did:web:") {
            format!("https://{}/.well-known/did.json", host.replace("%3A", ":"))
        } else {
            bail!("cannot resolve authority '{}': expected did:plc or did:web", did);
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("DID resolution request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("DID resolution for {} returned {}", did, status);
        }

        let doc: DidDocument = response
            .json()
            .await
            .with_context(|| format!("invalid DID document for {}", did))?;

        pds_from_document(&doc).ok_or_else(|| anyhow!("DID document for {} lists no PDS", did))
    }
}

fn pds_from_document(doc: &DidDocument) -> Option<String> {
    doc.service
        .iter()
        .find(|s| {
            s.id.ends_with("#atproto_pds")
                || s.kind.as_deref() == Some("AtprotoPersonalDataServer")
        })
        .and_then(|s| s.service_endpoint.as_str())
        .map(|e| e.trim_end_matches('/').to_string())
}

#[async_trait]
impl RepositoryClient for HttpRepositoryClient {
    async fn fetch_record(
        &self,
        uri: &str,
        pds_hint: Option<&str>,
    ) -> Result<Option<AuthoritativeRecord>> {
        let parsed = RecordUri::parse(uri).map_err(|e| anyhow!(e.to_string()))?;

        let pds = match pds_hint {
            Some(hint) => hint.trim_end_matches('/').to_string(),
            None => self.resolve_pds(&parsed.authority).await?,
        };

        let url = format!("{}/xrpc/com.atproto.repo.getRecord", pds);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("repo", parsed.authority.as_str()),
                ("collection", parsed.collection.as_str()),
                ("rkey", parsed.rkey.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("getRecord request failed: {}", url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::BAD_REQUEST {
            let body: XrpcError = response
                .json()
                .await
                .unwrap_or(XrpcError {
                    error: None,
                    message: None,
                });
            if body.error.as_deref() == Some("RecordNotFound") {
                return Ok(None);
            }
            bail!(
                "getRecord {} rejected: {}",
                uri,
                body.message.or(body.error).unwrap_or_default()
            );
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("getRecord {} returned {}: {}", uri, status, text);
        }

        let body: GetRecordResponse = response
            .json()
            .await
            .with_context(|| format!("invalid getRecord response for {}", uri))?;

        let cid = body
            .cid
            .ok_or_else(|| anyhow!("getRecord response for {} has no cid", uri))?;

        tracing::debug!(uri = %body.uri, cid = %cid, pds = %pds, "fetched authoritative record");
        Ok(Some(AuthoritativeRecord {
            uri: body.uri,
            cid,
            value: body.value,
            pds_endpoint: pds,
        }))
    }
}
