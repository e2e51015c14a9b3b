//! Record kinds accepted at the ingestion boundary.
//!
//! Authoritative records arrive as loosely-typed JSON from personal data
//! servers. They are parsed here into a closed set of variants keyed by
//! their `$type` NSID; anything unrecognized is rejected rather than passed
//! through to the index.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub const EPRINT_SUBMISSION: &str = "pub.chive.eprint.submission";
pub const REVIEW_COMMENT: &str = "pub.chive.review.comment";
pub const REVIEW_ENDORSEMENT: &str = "pub.chive.review.endorsement";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EprintSubmission {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub subject: String,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endorsement {
    pub subject: String,
    pub contributions: Vec<String>,
    pub created_at: String,
}

/// A validated record body, tagged by its lexicon type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum IndexableRecord {
    #[serde(rename = "pub.chive.eprint.submission")]
    Eprint(EprintSubmission),
    #[serde(rename = "pub.chive.review.comment")]
    Review(ReviewComment),
    #[serde(rename = "pub.chive.review.endorsement")]
    Endorsement(Endorsement),
}

impl IndexableRecord {
    /// Parse and validate a raw record body.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, IndexError> {
        let record_type = value
            .get("$type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| IndexError::validation("record has no $type"))?;

        match record_type {
            EPRINT_SUBMISSION | REVIEW_COMMENT | REVIEW_ENDORSEMENT => {}
            other => {
                return Err(IndexError::validation(format!(
                    "unrecognized record type: {}",
                    other
                )))
            }
        }

        let record: IndexableRecord = serde_json::from_value(value.clone()).map_err(|e| {
            IndexError::validation(format!("malformed {} record: {}", record_type, e))
        })?;
        record.check()?;
        Ok(record)
    }

    pub fn record_type(&self) -> &'static str {
        match self {
            IndexableRecord::Eprint(_) => EPRINT_SUBMISSION,
            IndexableRecord::Review(_) => REVIEW_COMMENT,
            IndexableRecord::Endorsement(_) => REVIEW_ENDORSEMENT,
        }
    }

    /// Eprints are the only kind that become citation-graph entities.
    pub fn is_eprint(&self) -> bool {
        matches!(self, IndexableRecord::Eprint(_))
    }

    pub fn to_json(&self) -> Result<String, IndexError> {
        serde_json::to_string(self)
            .map_err(|e| IndexError::validation(format!("record not serializable: {}", e)))
    }

    fn check(&self) -> Result<(), IndexError> {
        match self {
            IndexableRecord::Eprint(e) => {
                if e.title.trim().is_empty() {
                    return Err(IndexError::validation("eprint title must not be empty"));
                }
                if e.authors.is_empty() {
                    return Err(IndexError::validation("eprint must list at least one author"));
                }
            }
            IndexableRecord::Review(r) => {
                if r.text.trim().is_empty() {
                    return Err(IndexError::validation("review text must not be empty"));
                }
                RecordUri::parse(&r.subject)?;
            }
            IndexableRecord::Endorsement(e) => {
                RecordUri::parse(&e.subject)?;
            }
        }
        Ok(())
    }
}

/// A parsed `at://authority/collection/rkey` identifier.
///
/// The repository client needs the parts, and ingestion checks the shape.
/// Everywhere else URIs are opaque strings compared by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
    pub authority: String,
    pub collection: String,
    pub rkey: String,
}

impl RecordUri {
    pub fn parse(uri: &str) -> Result<Self, IndexError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| IndexError::validation(format!("not an at:// uri: {}", uri)))?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [authority, collection, rkey]
                if !authority.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
            {
                Ok(Self {
                    authority: authority.to_string(),
                    collection: collection.to_string(),
                    rkey: rkey.to_string(),
                })
            }
            _ => Err(IndexError::validation(format!(
                "expected at://authority/collection/rkey, got: {}",
                uri
            ))),
        }
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.authority, self.collection, self.rkey)
    }
}
