//! Provider catalog: tools, prompts, resources and resource templates behind
//! one `(kind, key)` lookup.
//!
//! Registration needs `&mut Registry` and happens before the registry is
//! shared; once wrapped in an `Arc` it is read-only, so concurrent lookups
//! need no locking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::handler::{ToolHandler, ToolTable};
use crate::mcp::prompts::{Prompt, PromptTable, PromptTemplate};
use crate::mcp::protocol::{
    PromptsCapability, ResourcesCapability, ServerCapabilities, Tool, ToolsCapability,
};
use crate::mcp::resources::{
    ResolvedResource, Resource, ResourceReader, ResourceTable, ResourceTemplate,
};

/// The capability kinds a provider exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Tool,
    Prompt,
    Resource,
    ResourceTemplate,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Resource => "resource",
            Self::ResourceTemplate => "resource template",
        })
    }
}

/// A listed entry.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Descriptor {
    Tool(Tool),
    Prompt(Prompt),
    Resource(Resource),
    ResourceTemplate(ResourceTemplate),
}

/// A looked-up entry.
#[derive(Clone)]
pub enum Entry {
    Tool(Arc<dyn ToolHandler>),
    Prompt(Prompt),
    Resource(ResolvedResource),
    ResourceTemplate(ResourceTemplate),
}

/// The provider catalog.
#[derive(Default)]
pub struct Registry {
    tools: ToolTable,
    prompts: PromptTable,
    resources: ResourceTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool<T: ToolHandler + 'static>(&mut self, handler: T) -> Result<()> {
        self.tools.register(handler)
    }

    pub fn register_prompt(&mut self, prompt: Prompt, template: PromptTemplate) -> Result<()> {
        self.prompts.register(prompt, template)
    }

    pub fn register_resource<R: ResourceReader + 'static>(
        &mut self,
        resource: Resource,
        reader: R,
    ) -> Result<()> {
        self.resources.register_static(resource, reader)
    }

    pub fn register_template<R: ResourceReader + 'static>(
        &mut self,
        template: ResourceTemplate,
        reader: R,
    ) -> Result<()> {
        self.resources.register_template(template, reader)
    }

    /// Descriptors of one kind, in registration order. Empty, never an error,
    /// when nothing of that kind is registered.
    pub fn list(&self, kind: EntryKind) -> Vec<Descriptor> {
        match kind {
            EntryKind::Tool => self.tools.list().into_iter().map(Descriptor::Tool).collect(),
            EntryKind::Prompt => self
                .prompts
                .list()
                .into_iter()
                .map(Descriptor::Prompt)
                .collect(),
            EntryKind::Resource => self
                .resources
                .list_resources()
                .into_iter()
                .map(Descriptor::Resource)
                .collect(),
            EntryKind::ResourceTemplate => self
                .resources
                .list_templates()
                .into_iter()
                .map(Descriptor::ResourceTemplate)
                .collect(),
        }
    }

    /// Look up by name (tools, prompts), URI (resources) or URI template
    /// string (templates).
    pub fn get(&self, kind: EntryKind, key: &str) -> Result<Entry> {
        let entry = match kind {
            EntryKind::Tool => self.tools.get(key).map(Entry::Tool),
            EntryKind::Prompt => self.prompts.descriptor(key).cloned().map(Entry::Prompt),
            EntryKind::Resource => return self.resources.resolve(key).map(Entry::Resource),
            EntryKind::ResourceTemplate => self
                .resources
                .template(key)
                .cloned()
                .map(Entry::ResourceTemplate),
        };
        entry.ok_or_else(|| Error::not_found(kind, key))
    }

    pub fn tools(&self) -> &ToolTable {
        &self.tools
    }

    pub fn prompts(&self) -> &PromptTable {
        &self.prompts
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// The capability set this catalog supports.
    pub fn server_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(ToolsCapability {
                list_changed: false,
            }),
            resources: Some(ResourcesCapability {
                subscribe: true,
                list_changed: false,
            }),
            prompts: Some(PromptsCapability {
                list_changed: false,
            }),
            experimental: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mcp::handler::{success_result, ToolContext};
    use crate::mcp::protocol::ToolResult;
    use crate::mcp::resources::ResourceContents;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct Named(&'static str);

    #[async_trait]
    impl ToolHandler for Named {
        fn definition(&self) -> Tool {
            Tool {
                name: self.0.to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _: &ToolContext, _: HashMap<String, Value>) -> Result<ToolResult> {
            Ok(success_result(self.0))
        }
    }

    struct Fixed;

    #[async_trait]
    impl ResourceReader for Fixed {
        async fn read(&self, uri: &str, _: &HashMap<String, String>) -> Result<ResourceContents> {
            Ok(ResourceContents::text(uri, "text/plain", "fixed"))
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_tool(Named("b_tool")).unwrap();
        registry.register_tool(Named("a_tool")).unwrap();
        registry
            .register_prompt(
                Prompt {
                    name: "guide".to_string(),
                    description: None,
                    arguments: vec![],
                },
                PromptTemplate::user("hello"),
            )
            .unwrap();
        registry
            .register_resource(
                Resource {
                    uri: "fs://sample".to_string(),
                    name: "sample".to_string(),
                    description: None,
                    mime_type: None,
                },
                Fixed,
            )
            .unwrap();
        registry
            .register_template(
                ResourceTemplate {
                    uri_template: "fs://chunks/{file_path}".to_string(),
                    name: "manifest".to_string(),
                    description: None,
                    mime_type: None,
                },
                Fixed,
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_list_is_ordered_per_kind() {
        let registry = registry();
        let tools = registry.list(EntryKind::Tool);
        assert!(matches!(&tools[0], Descriptor::Tool(t) if t.name == "b_tool"));
        assert!(matches!(&tools[1], Descriptor::Tool(t) if t.name == "a_tool"));
        assert_eq!(registry.list(EntryKind::Prompt).len(), 1);
        assert_eq!(registry.list(EntryKind::Resource).len(), 1);
        assert_eq!(registry.list(EntryKind::ResourceTemplate).len(), 1);
    }

    #[test]
    fn test_empty_registry_lists_nothing() {
        let registry = Registry::new();
        for kind in [
            EntryKind::Tool,
            EntryKind::Prompt,
            EntryKind::Resource,
            EntryKind::ResourceTemplate,
        ] {
            assert!(registry.list(kind).is_empty());
        }
    }

    #[test]
    fn test_get_by_kind() {
        let registry = registry();
        assert!(matches!(
            registry.get(EntryKind::Tool, "a_tool"),
            Ok(Entry::Tool(_))
        ));
        assert!(matches!(
            registry.get(EntryKind::Prompt, "guide"),
            Ok(Entry::Prompt(_))
        ));
        assert!(matches!(
            registry.get(EntryKind::Resource, "fs://chunks/x.txt"),
            Ok(Entry::Resource(r)) if r.params["file_path"] == "x.txt"
        ));
        assert!(matches!(
            registry.get(EntryKind::ResourceTemplate, "fs://chunks/{file_path}"),
            Ok(Entry::ResourceTemplate(_))
        ));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = registry();
        for (kind, key) in [
            (EntryKind::Tool, "nope"),
            (EntryKind::Prompt, "nope"),
            (EntryKind::Resource, "fs://nope"),
            (EntryKind::ResourceTemplate, "fs://nope/{x}"),
        ] {
            let err = registry.get(kind, key).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::NotFound);
            assert!(err.to_string().starts_with(&kind.to_string()));
        }
    }

    #[test]
    fn test_duplicate_tool_is_configuration_error() {
        let mut registry = registry();
        let err = registry.register_tool(Named("a_tool")).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate tool registration: a_tool");
    }

    #[test]
    fn test_entry_kind_display() {
        assert_eq!(EntryKind::Tool.to_string(), "tool");
        assert_eq!(EntryKind::ResourceTemplate.to_string(), "resource template");
        assert_eq!(
            serde_json::to_value(EntryKind::ResourceTemplate).unwrap(),
            "resource_template"
        );
    }
}
