//! MCP Resources Support
//!
//! Static resources are addressed by exact URI. Templated resources use
//! `{placeholder}` segments, e.g. `fs://chunk/{file_path}/{chunk_index}`; a
//! placeholder matches exactly one non-empty `/`-free segment and its value is
//! percent-decoded before it reaches the reader.

use async_trait::async_trait;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::registry::EntryKind;

/// A resource exposed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A templated resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>, // base64 encoded
}

impl ResourceContents {
    pub fn text(uri: impl Into<String>, mime_type: &str, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.to_string()),
            text: Some(text.into()),
            blob: None,
        }
    }

    pub fn blob(uri: impl Into<String>, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.to_string()),
            text: None,
            blob: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
        }
    }

    /// Raw payload bytes, decoding `blob` if needed.
    pub fn payload(&self) -> Result<Vec<u8>> {
        match (&self.text, &self.blob) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(blob)) => base64::engine::general_purpose::STANDARD
                .decode(blob)
                .map_err(|e| Error::MalformedMessage(format!("invalid base64 blob: {}", e))),
            (None, None) => Ok(Vec::new()),
        }
    }
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
}

/// Result of resources/templates/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourceTemplatesResult {
    pub resource_templates: Vec<ResourceTemplate>,
}

/// Params of resources/read, resources/subscribe and resources/unsubscribe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUriParams {
    pub uri: String,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Produces content for a resource URI.
///
/// `params` holds the decoded placeholder values for templated resources and
/// is empty for static ones.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self, uri: &str, params: &HashMap<String, String>) -> Result<ResourceContents>;
}

// ===== URI templates =====

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Parse a template. Each `/`-separated segment is either fully literal
    /// or a single `{name}`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |detail: &str| Error::InvalidTemplate {
            template: raw.to_string(),
            detail: detail.to_string(),
        };

        let mut segments = Vec::new();
        let mut names = Vec::new();
        for part in raw.split('/') {
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty()
                    || !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(invalid("placeholder names must be [A-Za-z0-9_]+"));
                }
                if names.contains(&name) {
                    return Err(invalid("placeholder names must be unique"));
                }
                names.push(name);
                segments.push(Segment::Placeholder(name.to_string()));
            } else if part.contains('{') || part.contains('}') {
                return Err(invalid("a placeholder must occupy a whole segment"));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        if names.is_empty() {
            return Err(invalid("template has no placeholders"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names, in order.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Match `uri` and return the decoded placeholder values.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Placeholder(_) if part.is_empty() => return None,
                Segment::Placeholder(name) => {
                    let value = percent_decode_str(part).decode_utf8().ok()?;
                    params.insert(name.clone(), value.into_owned());
                }
            }
        }
        Some(params)
    }

    /// Whether some URI could match both templates.
    pub fn overlaps(&self, other: &UriTemplate) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    // A placeholder never matches an empty segment.
                    (Segment::Placeholder(_), Segment::Literal(lit))
                    | (Segment::Literal(lit), Segment::Placeholder(_)) => !lit.is_empty(),
                    (Segment::Placeholder(_), Segment::Placeholder(_)) => true,
                })
    }
}

// ===== Resource table =====

struct StaticEntry {
    resource: Resource,
    reader: Arc<dyn ResourceReader>,
}

struct TemplateEntry {
    descriptor: ResourceTemplate,
    template: UriTemplate,
    reader: Arc<dyn ResourceReader>,
}

/// A URI resolved to the reader that serves it.
#[derive(Clone)]
pub struct ResolvedResource {
    pub uri: String,
    pub params: HashMap<String, String>,
    pub reader: Arc<dyn ResourceReader>,
    /// The matching template, for templated resources.
    pub template: Option<String>,
}

impl ResolvedResource {
    pub async fn read(&self) -> Result<ResourceContents> {
        self.reader.read(&self.uri, &self.params).await
    }
}

/// Static resources and templates, in registration order.
#[derive(Default)]
pub struct ResourceTable {
    statics: Vec<StaticEntry>,
    static_index: HashMap<String, usize>,
    templates: Vec<TemplateEntry>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_static<R: ResourceReader + 'static>(
        &mut self,
        resource: Resource,
        reader: R,
    ) -> Result<()> {
        if self.static_index.contains_key(&resource.uri) {
            return Err(Error::DuplicateEntry {
                kind: EntryKind::Resource,
                name: resource.uri,
            });
        }
        self.static_index
            .insert(resource.uri.clone(), self.statics.len());
        self.statics.push(StaticEntry {
            resource,
            reader: Arc::new(reader),
        });
        Ok(())
    }

    /// Register a template. Rejects templates that could match a URI some
    /// registered template already matches.
    pub fn register_template<R: ResourceReader + 'static>(
        &mut self,
        descriptor: ResourceTemplate,
        reader: R,
    ) -> Result<()> {
        let template = UriTemplate::parse(&descriptor.uri_template)?;

        if let Some(existing) = self
            .templates
            .iter()
            .find(|e| e.template.overlaps(&template))
        {
            if existing.template.as_str() == template.as_str() {
                return Err(Error::DuplicateEntry {
                    kind: EntryKind::ResourceTemplate,
                    name: descriptor.uri_template,
                });
            }
            return Err(Error::InvalidTemplate {
                template: descriptor.uri_template,
                detail: format!("overlaps registered template {}", existing.template.as_str()),
            });
        }

        self.templates.push(TemplateEntry {
            descriptor,
            template,
            reader: Arc::new(reader),
        });
        Ok(())
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.statics.iter().map(|e| e.resource.clone()).collect()
    }

    pub fn list_templates(&self) -> Vec<ResourceTemplate> {
        self.templates.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn template(&self, uri_template: &str) -> Option<&ResourceTemplate> {
        self.templates
            .iter()
            .find(|e| e.descriptor.uri_template == uri_template)
            .map(|e| &e.descriptor)
    }

    /// Resolve a URI: exact static match first, then templates.
    pub fn resolve(&self, uri: &str) -> Result<ResolvedResource> {
        if let Some(&i) = self.static_index.get(uri) {
            return Ok(ResolvedResource {
                uri: uri.to_string(),
                params: HashMap::new(),
                reader: self.statics[i].reader.clone(),
                template: None,
            });
        }

        self.templates
            .iter()
            .find_map(|entry| {
                entry.template.matches(uri).map(|params| ResolvedResource {
                    uri: uri.to_string(),
                    params,
                    reader: entry.reader.clone(),
                    template: Some(entry.descriptor.uri_template.clone()),
                })
            })
            .ok_or_else(|| Error::not_found(EntryKind::Resource, uri))
    }

    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.templates.is_empty()
    }
}

/// Infer a MIME type string for a file path based on its extension.
pub fn guess_mime_type(path: &std::path::Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return "text/plain";
    };
    match ext {
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "js" | "tsx" | "jsx" => "text/javascript",
        "ts" => "text/typescript",
        "json" => "application/json",
        "yaml" | "yml" => "text/yaml",
        "toml" => "text/x-toml",
        "md" => "text/markdown",
        "html" => "text/html",
        "css" => "text/css",
        "sh" | "bash" => "text/x-shellscript",
        "xml" => "application/xml",
        _ => "text/plain",
    }
}
