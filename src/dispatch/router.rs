// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subject classification and payload decoding.
//!
//! Payloads are JSON documents wrapped once more as a JSON string literal:
//!
//! ```text
//! "{\"igoRequestId\":\"REQ001\",\"samples\":[...]}"
//! ```
//!
//! Decoding unwraps the string, then parses the document according to the
//! subject's category: one request, a request version list, or a sample
//! version list. Version lists must not be empty.

use serde::de::DeserializeOwned;

use super::types::{Category, Event};
use crate::config::FeedConfig;
use crate::error::SyncError;
use crate::model::{Request, Sample};

#[derive(Debug, Clone)]
pub struct Router {
    new_request: String,
    update_request: String,
    update_sample: String,
}

impl Router {
    pub fn new(
        new_request: impl Into<String>,
        update_request: impl Into<String>,
        update_sample: impl Into<String>,
    ) -> Self {
        Self {
            new_request: new_request.into(),
            update_request: update_request.into(),
            update_sample: update_sample.into(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.new_request_filter.as_str(),
            config.update_request_filter.as_str(),
            config.update_sample_filter.as_str(),
        )
    }

    /// Exact subject match against the three filters.
    #[must_use]
    pub fn classify(&self, subject: &str) -> Option<Category> {
        if subject == self.new_request {
            Some(Category::NewRequest)
        } else if subject == self.update_request {
            Some(Category::UpdateRequest)
        } else if subject == self.update_sample {
            Some(Category::UpdateSample)
        } else {
            None
        }
    }
}

/// Decode `payload` as an event of `category`.
pub fn decode(category: Category, subject: &str, payload: &[u8]) -> Result<Event, SyncError> {
    let fail = |reason: String| SyncError::Decode { subject: subject.to_string(), reason };

    let document: String =
        serde_json::from_slice(payload).map_err(|e| fail(format!("payload is not a quoted document: {}", e)))?;

    match category {
        Category::NewRequest => parse::<Request>(&document).map(Event::NewRequest).map_err(fail),
        Category::UpdateRequest => parse_versions::<Request>(&document)
            .map(Event::UpdateRequest)
            .map_err(fail),
        Category::UpdateSample => parse_versions::<Sample>(&document)
            .map(Event::UpdateSample)
            .map_err(fail),
    }
}

fn parse<T: DeserializeOwned>(document: &str) -> Result<T, String> {
    serde_json::from_str(document).map_err(|e| e.to_string())
}

fn parse_versions<T: DeserializeOwned>(document: &str) -> Result<Vec<T>, String> {
    let versions: Vec<T> = parse(document)?;
    if versions.is_empty() {
        return Err("version list is empty".to_string());
    }
    Ok(versions)
}
