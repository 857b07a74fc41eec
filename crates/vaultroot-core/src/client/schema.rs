//! Response schemas of the remote store, one per endpoint.
//!
//! Parsing fails closed: a body that does not match its endpoint's shape becomes a
//! `Schema` error instead of a half-filled value.

use crate::error::{Result, VaultRootError};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// `GET /vault/{dir}/`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ListingResponse {
    pub files: Vec<String>,
}

/// `GET /vault/{path}` with the note JSON accept header
#[derive(Debug, Clone, Deserialize)]
pub struct NoteResponse {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub frontmatter: Option<serde_json::Map<String, serde_json::Value>>,
    pub stat: NoteStat,
}

/// File timestamps in milliseconds since the epoch
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct NoteStat {
    pub ctime: i64,
    pub mtime: i64,
    pub size: u64,
}

/// `GET /`
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub authenticated: Option<bool>,
}

/// Accept header selecting the note JSON representation
pub const NOTE_JSON: &str = "application/vnd.olrapi.note+json";

/// Parse a body for a named endpoint
pub fn parse<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| VaultRootError::Schema(format!("{} response: {}", endpoint, e)))
}
