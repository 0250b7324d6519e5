// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request and sample records as they arrive on the feed.
//!
//! Both records are mostly opaque: only the fields that make up their keys are
//! typed, everything else is kept in a flattened JSON map so that it survives
//! decode → re-serialize untouched.
//!
//! # Example
//!
//! ```
//! use labsync::{Request, Sample};
//! use serde_json::json;
//!
//! let request: Request = serde_json::from_value(json!({
//!     "igoRequestId": "REQ001",
//!     "projectManagerName": "Doe, Jane",
//!     "samples": [{
//!         "sampleName": "S1",
//!         "cmoSampleName": "C-S1",
//!         "additionalProperties": {"igoRequestId": "REQ001"}
//!     }]
//! })).unwrap();
//!
//! assert_eq!(request.request_id, "REQ001");
//! assert_eq!(request.samples.len(), 1);
//! assert_eq!(request.samples[0].key().sample_name, "S1");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A laboratory request. The request identifier is the sync key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "igoRequestId")]
    pub request_id: String,
    /// Samples travel embedded in the request on the feed, but are stored
    /// only in the sample table.
    #[serde(default)]
    pub samples: Vec<Sample>,
    /// Everything else, preserved verbatim.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Request {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            samples: Vec::new(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serialize the request document for the request table.
    ///
    /// The embedded sample collection is always emptied first.
    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        let stored = Request {
            request_id: self.request_id.clone(),
            samples: Vec::new(),
            metadata: self.metadata.clone(),
        };
        serde_json::to_string(&stored)
    }
}

/// Nested properties block of a sample; carries the owning request id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleProperties {
    #[serde(rename = "igoRequestId", default)]
    pub request_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A sample belonging to exactly one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "sampleName")]
    pub sample_name: String,
    /// Secondary (institutional) sample name.
    #[serde(rename = "cmoSampleName", default)]
    pub alt_sample_name: String,
    #[serde(rename = "barcodeId", default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(rename = "additionalProperties", default)]
    pub properties: SampleProperties,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Sample {
    pub fn new(
        request_id: impl Into<String>,
        sample_name: impl Into<String>,
        alt_sample_name: impl Into<String>,
    ) -> Self {
        Self {
            sample_name: sample_name.into(),
            alt_sample_name: alt_sample_name.into(),
            barcode: None,
            properties: SampleProperties {
                request_id: request_id.into(),
                extra: Map::new(),
            },
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The request this sample claims to belong to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.properties.request_id
    }

    /// Composite key, using the sample's own request id.
    #[must_use]
    pub fn key(&self) -> SampleKey {
        self.key_under(self.request_id())
    }

    /// Composite key with the request id supplied by the caller (the owning
    /// request's id when samples are written as part of a request).
    #[must_use]
    pub fn key_under(&self, request_id: &str) -> SampleKey {
        SampleKey {
            request_id: request_id.to_string(),
            sample_name: self.sample_name.clone(),
            alt_sample_name: self.alt_sample_name.clone(),
            barcode: self.barcode.clone(),
        }
    }

    pub fn to_document(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// (request id, sample name, secondary name, barcode): identifies one sample row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub request_id: String,
    pub sample_name: String,
    pub alt_sample_name: String,
    pub barcode: Option<String>,
}

impl std::fmt::Display for SampleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.request_id, self.sample_name, self.alt_sample_name
        )?;
        if let Some(ref barcode) = self.barcode {
            write!(f, "/{}", barcode)?;
        }
        Ok(())
    }
}
