//! Tool definitions and the converter that bridges them into the
//! advertise-in-child / execute-in-parent split.
//!
//! A [`Tool`] is a capability record: name, description, JSON schema, an
//! async handler, and a `takes_context` flag. The facade's registry is a
//! flat map over this record; [`Tool::to_schema`] produces the
//! [`crate::types::ToolSchema`] written to the bridge's schema file, and
//! [`Tool::invoke`] runs the envelope-coercion rules that turn an arbitrary
//! handler return value into the wire-protocol [`ToolResult`].

use crate::error::{Error, Result};
use crate::types::{ContentItem, ToolResult, ToolSchema};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// An async tool handler: JSON arguments in, an arbitrary JSON-serializable
/// result out.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A framework tool: what the CLI sees advertised, and how the parent
/// executes it when the bridge relays an invocation.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
    takes_context: bool,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .field("takes_context", &self.takes_context)
            .finish()
    }
}

impl Tool {
    /// Build a new tool. Rejects `takes_context` handlers eagerly: a run
    /// context has no meaning inside the bridge's address space, so there is
    /// no point deferring the failure to call time.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        takes_context: bool,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if takes_context {
            return Err(Error::other(
                "tools that take a run context cannot be bridged to a subprocess CLI",
            ));
        }
        Ok(Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
            takes_context: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn takes_context(&self) -> bool {
        self.takes_context
    }

    /// The record written to the session's schema file.
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Run the handler and coerce its outcome into a [`ToolResult`] envelope.
    /// Never propagates a handler error — failures become a text envelope
    /// naming the error, so the CLI sees a tool-level failure rather than a
    /// broken connection.
    pub async fn invoke(&self, arguments: Value) -> ToolResult {
        match (self.handler)(arguments).await {
            Ok(value) => format_return_value(value),
            Err(e) => ToolResult::error(format!("Error: {e}")),
        }
    }
}

/// Coerce an arbitrary handler return value into the wire-protocol envelope.
///
/// A value already in envelope shape (an object with a `content` array whose
/// first item is `{"type": "text", ...}`) passes through, keeping only the
/// text items. Anything else is coerced: strings pass through as a single
/// text item, objects/arrays are JSON-encoded, `null` becomes an empty
/// string, everything else is stringified.
pub fn format_return_value(value: Value) -> ToolResult {
    if let Value::Object(ref map) = value {
        if let Some(Value::Array(items)) = map.get("content") {
            if !items.is_empty() {
                if let Some(Value::Object(first)) = items.first() {
                    if first.get("type").and_then(Value::as_str) == Some("text") {
                        let content: Vec<ContentItem> = items
                            .iter()
                            .filter_map(|item| item.as_object())
                            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                            .map(|item| {
                                ContentItem::text(
                                    item.get("text").and_then(Value::as_str).unwrap_or("").to_string(),
                                )
                            })
                            .collect();
                        let is_error = map.get("isError").and_then(Value::as_bool);
                        return ToolResult {
                            content,
                            is_error,
                        };
                    }
                }
            }
        }
    }

    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Object(_) | Value::Array(_) => serde_json::to_string(&value).unwrap_or_default(),
        other => other.to_string(),
    };
    ToolResult::ok(text)
}

/// A flat registry of tools keyed by name. Re-registration overwrites.
pub type ToolRegistry = HashMap<String, Tool>;

/// Fluent builder for [`Tool`], mirroring the simple-type-notation shorthand
/// used elsewhere in this ecosystem for describing parameters.
pub struct ToolBuilder {
    name: String,
    description: String,
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
    takes_context: bool,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            properties: serde_json::Map::new(),
            required: Vec::new(),
            takes_context: false,
        }
    }

    /// Add a parameter in simple type-string notation (`"string"`, `"int"`,
    /// `"number"`, `"bool"`, `"array"`, `"object"`). Required by default.
    pub fn param(mut self, name: impl Into<String>, type_str: &str) -> Self {
        let name = name.into();
        self.properties
            .insert(name.clone(), serde_json::json!({"type": type_to_json_schema(type_str)}));
        self.required.push(name);
        self
    }

    pub fn takes_context(mut self, flag: bool) -> Self {
        self.takes_context = flag;
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Result<Tool>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let schema = serde_json::json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        });
        Tool::new(self.name, self.description, schema, self.takes_context, handler)
    }
}

fn type_to_json_schema(type_str: &str) -> &'static str {
    match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    }
}

/// Start building a tool with the given name and description.
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_context_taking_handlers_at_construction() {
        let err = Tool::new(
            "ctx",
            "wants context",
            serde_json::json!({"type": "object"}),
            true,
            |_args| async { Ok(Value::Null) },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn invoke_wraps_string_return_in_single_text_item() {
        let t = Tool::new(
            "greet",
            "says hi",
            serde_json::json!({"type": "object"}),
            false,
            |_args| async { Ok(Value::String("hello".to_string())) },
        )
        .unwrap();
        let result = t.invoke(serde_json::json!({})).await;
        assert_eq!(result.content[0].text, "hello");
        assert_eq!(result.is_error, None);
    }

    #[tokio::test]
    async fn invoke_never_propagates_handler_errors() {
        let t = Tool::new(
            "boom",
            "always fails",
            serde_json::json!({"type": "object"}),
            false,
            |_args| async { Err(Error::other("kaboom")) },
        )
        .unwrap();
        let result = t.invoke(serde_json::json!({})).await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.content[0].text.contains("kaboom"));
    }

    #[test]
    fn format_return_value_passes_through_envelope_shape() {
        let value = serde_json::json!({"content": [{"type": "text", "text": "5"}]});
        let result = format_return_value(value);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].text, "5");
        assert_eq!(result.is_error, None);
    }

    #[test]
    fn format_return_value_json_encodes_objects() {
        let value = serde_json::json!({"name": "t", "score": 95});
        let result = format_return_value(value);
        let parsed: Value = serde_json::from_str(&result.content[0].text).unwrap();
        assert_eq!(parsed["score"], 95);
    }

    #[test]
    fn format_return_value_maps_null_to_empty_string() {
        let result = format_return_value(Value::Null);
        assert_eq!(result.content[0].text, "");
    }

    #[tokio::test]
    async fn builder_produces_object_schema_with_required_params() {
        let t = tool("add", "adds two numbers")
            .param("a", "int")
            .param("b", "int")
            .build(|args| async move {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(Value::String((a + b).to_string()))
            })
            .unwrap();
        let schema = t.to_schema();
        assert_eq!(schema.name, "add");
        assert_eq!(schema.input_schema["required"], serde_json::json!(["a", "b"]));
    }
}
