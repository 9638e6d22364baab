//! Tool catalog — maps MCP tool names to invocations of the wrapped program.
//!
//! The dispatcher consumes the catalog through the `ToolCatalog` trait so
//! tests can substitute a stub; `CommandCatalog` is the config-driven
//! implementation used in production.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::ExecutionRequest;
use crate::config::ToolConfig;

/// Tool descriptor as exposed by `tools/list`.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Collaborator interface supplying the tool inventory and the mapping from
/// a tool call to a command invocation.
pub trait ToolCatalog: Send + Sync {
    fn list_tools(&self) -> Vec<ToolSpec>;

    /// Build the execution request for a named tool, or `None` when the
    /// tool is not registered.
    fn build_invocation(
        &self,
        tool: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<ExecutionRequest>;
}

struct CatalogEntry {
    spec: ToolSpec,
    /// Subcommand path prepended to caller-supplied arguments.
    args: Vec<String>,
}

/// Config-driven catalog wrapping a single external program.
pub struct CommandCatalog {
    command: String,
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
}

impl CommandCatalog {
    pub fn new(command: impl Into<String>, tools: &[ToolConfig]) -> Self {
        let command = command.into();
        let mut entries = Vec::with_capacity(tools.len());
        let mut by_name = HashMap::with_capacity(tools.len());
        for tool in tools {
            let schema = tool
                .input_schema
                .clone()
                .unwrap_or_else(generic_input_schema);
            by_name.insert(tool.name.clone(), entries.len());
            entries.push(CatalogEntry {
                spec: ToolSpec {
                    name: tool.name.clone(),
                    description: if tool.description.is_empty() {
                        format!("{} {}", command, tool.args.join(" "))
                    } else {
                        tool.description.clone()
                    },
                    input_schema: schema,
                },
                args: tool.args.clone(),
            });
        }
        Self {
            command,
            entries,
            by_name,
        }
    }

    pub fn into_shared(self) -> Arc<dyn ToolCatalog> {
        Arc::new(self)
    }
}

impl ToolCatalog for CommandCatalog {
    fn list_tools(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    fn build_invocation(
        &self,
        tool: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Option<ExecutionRequest> {
        let entry = &self.entries[*self.by_name.get(tool)?];
        let mut args = entry.args.clone();
        args.extend(extract_args(arguments));
        Some(ExecutionRequest::new(self.command.clone(), args))
    }
}

/// Generic input schema for tools without an explicit one.
fn generic_input_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "args": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Additional arguments to pass to the command"
            }
        }
    })
}

/// Extract positional + flag args from a tool-call argument map.
///
/// Convention:
/// - an "args" array supplies positional arguments in order
/// - every other key becomes a `--key value` pair (underscores folded to
///   hyphens)
/// - boolean `true` emits just the flag; `false`/null are skipped
pub fn extract_args(arguments: &serde_json::Map<String, serde_json::Value>) -> Vec<String> {
    let mut result = Vec::new();

    if let Some(serde_json::Value::Array(positional)) = arguments.get("args") {
        for v in positional {
            if let Some(s) = v.as_str() {
                result.push(s.to_string());
            }
        }
    }

    for (key, value) in arguments {
        if key == "args" {
            continue;
        }
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            serde_json::Value::Bool(true) => {
                result.push(flag);
            }
            serde_json::Value::Bool(false) | serde_json::Value::Null => {}
            serde_json::Value::String(s) => {
                result.push(flag);
                result.push(s.clone());
            }
            other => {
                result.push(flag);
                result.push(other.to_string());
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, args: &[&str]) -> ToolConfig {
        ToolConfig {
            name: name.to_string(),
            description: String::new(),
            args: args.iter().map(|s| s.to_string()).collect(),
            input_schema: None,
        }
    }

    fn args_map(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_list_tools_carries_generic_schema() {
        let catalog = CommandCatalog::new("quill", &[tool("list_invoices", &["invoice", "list"])]);
        let tools = catalog.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "list_invoices");
        assert_eq!(tools[0].description, "quill invoice list");
        assert!(tools[0].input_schema["properties"]["args"].is_object());
    }

    #[test]
    fn test_build_invocation_prepends_subcommand() {
        let catalog = CommandCatalog::new("quill", &[tool("create_invoice", &["invoice", "create"])]);
        let arguments = args_map(&[("args", serde_json::json!(["--client", "acme"]))]);
        let request = catalog.build_invocation("create_invoice", &arguments).unwrap();
        assert_eq!(request.command, "quill");
        assert_eq!(request.args, vec!["invoice", "create", "--client", "acme"]);
    }

    #[test]
    fn test_build_invocation_unknown_tool_is_none() {
        let catalog = CommandCatalog::new("quill", &[tool("list_invoices", &["invoice", "list"])]);
        assert!(catalog
            .build_invocation("delete_everything", &serde_json::Map::new())
            .is_none());
    }

    #[test]
    fn test_extract_args_bool_true_emits_bare_flag() {
        let arguments = args_map(&[("verbose", serde_json::json!(true))]);
        assert_eq!(extract_args(&arguments), vec!["--verbose"]);
    }

    #[test]
    fn test_extract_args_bool_false_and_null_skipped() {
        let arguments = args_map(&[
            ("dry_run", serde_json::json!(false)),
            ("client", serde_json::Value::Null),
        ]);
        assert!(extract_args(&arguments).is_empty());
    }

    #[test]
    fn test_extract_args_underscores_fold_to_hyphens() {
        let arguments = args_map(&[("due_date", serde_json::json!("2026-09-01"))]);
        assert_eq!(
            extract_args(&arguments),
            vec!["--due-date", "2026-09-01"]
        );
    }

    #[test]
    fn test_extract_args_numbers_stringified() {
        let arguments = args_map(&[("limit", serde_json::json!(25))]);
        assert_eq!(extract_args(&arguments), vec!["--limit", "25"]);
    }
}
