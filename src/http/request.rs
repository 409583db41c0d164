//! HTTP request types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// HTTP request template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request ID
    pub id: String,

    /// Request name/label
    pub name: String,

    /// HTTP method
    pub method: String,

    /// Request URL
    pub url: String,

    /// Request headers
    pub headers: BTreeMap<String, String>,

    /// Query parameters appended to the URL
    pub params: BTreeMap<String, String>,

    /// Request body
    pub body: Option<String>,

    /// Request timeout in seconds
    pub timeout: Option<u64>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "New Request".to_string(),
            method: "GET".to_string(),
            url: String::new(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }
}

impl Request {
    /// Create a new request
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Full URL including query parameters
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }

        match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                {
                    let mut pairs = parsed.query_pairs_mut();
                    for (key, value) in &self.params {
                        pairs.append_pair(key, value);
                    }
                }
                parsed.to_string()
            }
            Err(_) => self.url.clone(),
        }
    }
}
