//! Binding extraction from HTTP requests
//!
//! Extraction is deterministic, never blocks, and omits attributes the request
//! does not carry. Whether a missing binding matters is up to the policy.

use axum::http::request::Parts;
use serde_json::Value;

use crate::BindingMap;

/// Builds the binding map for one request
pub trait BindingExtractor: Send + Sync + 'static {
    fn extract(&self, parts: &Parts) -> BindingMap;
}

impl<F> BindingExtractor for F
where
    F: Fn(&Parts) -> BindingMap + Send + Sync + 'static,
{
    fn extract(&self, parts: &Parts) -> BindingMap {
        self(parts)
    }
}

/// Request attributes that can be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// URL path, bound as `path`
    Path,
    /// HTTP method, bound as `method`
    Method,
    /// Raw query string, bound as `query`
    Query,
    /// Host header, bound as `host`
    Host,
    /// All headers as a name → value map, bound as `headers`
    Headers,
}

/// Declarative extractor over standard request attributes
#[derive(Debug, Clone)]
pub struct RequestBindings {
    attributes: Vec<Attribute>,

    /// (header name, binding name)
    headers: Vec<(String, String)>,
}

impl RequestBindings {
    /// Extractor binding nothing
    pub fn empty() -> Self {
        Self {
            attributes: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn with(mut self, attribute: Attribute) -> Self {
        if !self.attributes.contains(&attribute) {
            self.attributes.push(attribute);
        }
        self
    }

    /// Bind a single header's value under `binding`
    pub fn with_header(mut self, header: impl Into<String>, binding: impl Into<String>) -> Self {
        self.headers
            .push((header.into().to_ascii_lowercase(), binding.into()));
        self
    }
}

impl Default for RequestBindings {
    /// Path and method
    fn default() -> Self {
        Self::empty().with(Attribute::Path).with(Attribute::Method)
    }
}

impl BindingExtractor for RequestBindings {
    fn extract(&self, parts: &Parts) -> BindingMap {
        let mut bindings = BindingMap::new();

        for attribute in &self.attributes {
            match attribute {
                Attribute::Path => {
                    bindings.insert("path".to_string(), Value::from(parts.uri.path()));
                }
                Attribute::Method => {
                    bindings.insert("method".to_string(), Value::from(parts.method.as_str()));
                }
                Attribute::Query => {
                    if let Some(query) = parts.uri.query() {
                        bindings.insert("query".to_string(), Value::from(query));
                    }
                }
                Attribute::Host => {
                    let host = parts
                        .headers
                        .get(axum::http::header::HOST)
                        .and_then(|v| v.to_str().ok())
                        .or_else(|| parts.uri.host());
                    if let Some(host) = host {
                        bindings.insert("host".to_string(), Value::from(host));
                    }
                }
                Attribute::Headers => {
                    let mut headers = serde_json::Map::new();
                    for name in parts.headers.keys() {
                        // First value wins for repeated headers
                        if let Some(value) = parts.headers.get(name).and_then(|v| v.to_str().ok()) {
                            headers.insert(name.as_str().to_string(), Value::from(value));
                        }
                    }
                    bindings.insert("headers".to_string(), Value::Object(headers));
                }
            }
        }

        for (header, binding) in &self.headers {
            if let Some(value) = parts.headers.get(header.as_str()).and_then(|v| v.to_str().ok()) {
                bindings.insert(binding.clone(), Value::from(value));
            }
        }

        bindings
    }
}
