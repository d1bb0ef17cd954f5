//! Tool trait and registry
//!
//! Each tool declares its parameters. Arguments proposed by the model are
//! validated against that declaration before the tool runs, and every tool
//! result comes back as a string: failures become `"Error..."` text rather
//! than crossing the registry boundary.

use crate::config::AppConfig;
use crate::error::OrchestrationError;
use crate::model::{FunctionDeclaration, LanguageModel};
use crate::models::{ExecutionStatus, FunctionCall, ToolResult};
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub mod expense;
pub mod extract;
pub mod mail;
pub mod storage;

pub const TOOL_NOT_FOUND: &str = "Error: Tool not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Boolean,
}

impl ParamKind {
    fn schema_type(&self) -> &'static str {
        match self {
            ParamKind::String => "STRING",
            ParamKind::Integer => "INTEGER",
            ParamKind::Boolean => "BOOLEAN",
        }
    }
}

/// One declared tool parameter
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ToolArgs {
    /// Validate raw model arguments against a parameter list.
    ///
    /// Unknown fields, missing required fields and type mismatches are
    /// rejected. Integral floats (`5.0`) and numeric strings are accepted for
    /// integer parameters; `"true"`/`"false"` for booleans. Nulls count as
    /// absent.
    pub fn validate(params: &[ParamSpec], raw: &Value) -> Result<Self> {
        let empty = Map::new();
        let object = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(OrchestrationError::InvalidToolInput(format!(
                    "arguments must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut unknown: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|key| !params.iter().any(|p| p.name == *key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(OrchestrationError::InvalidToolInput(format!(
                "unknown parameter(s): {}",
                unknown.join(", ")
            )));
        }

        let mut values = BTreeMap::new();
        for param in params {
            match object.get(param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(OrchestrationError::InvalidToolInput(format!(
                            "missing required parameter '{}'",
                            param.name
                        )));
                    }
                }
                Some(value) => {
                    let coerced = coerce(param, value)?;
                    values.insert(param.name.to_string(), coerced);
                }
            }
        }

        Ok(Self { values })
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Required string; validation guarantees presence for required params.
    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.str(name).ok_or_else(|| {
            OrchestrationError::InvalidToolInput(format!("missing parameter '{}'", name))
        })
    }

    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        match self.values.get(name) {
            Some(ArgValue::Int(n)) => *n,
            _ => default,
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        match self.values.get(name) {
            Some(ArgValue::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    ArgValue::Str(s) => json!(s),
                    ArgValue::Int(n) => json!(n),
                    ArgValue::Bool(b) => json!(b),
                };
                (k.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}

fn coerce(param: &ParamSpec, value: &Value) -> Result<ArgValue> {
    let mismatch = || {
        OrchestrationError::InvalidToolInput(format!(
            "parameter '{}' expects {:?}, got {}",
            param.name, param.kind, value
        ))
    };

    match param.kind {
        ParamKind::String => match value {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Number(n) => Ok(ArgValue::Str(n.to_string())),
            _ => Err(mismatch()),
        },
        ParamKind::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(ArgValue::Int)
                .ok_or_else(mismatch),
            Value::String(s) => s.trim().parse().map(ArgValue::Int).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ParamKind::Boolean => match value {
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(ArgValue::Bool(true)),
                "false" => Ok(ArgValue::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}

/// Trait for a single tool wrapping one external-service operation
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> &'static [ParamSpec];
    async fn execute(&self, args: ToolArgs) -> Result<String>;
}

fn declaration_for(tool: &dyn Tool) -> FunctionDeclaration {
    let properties: Map<String, Value> = tool
        .parameters()
        .iter()
        .map(|p| {
            (
                p.name.to_string(),
                json!({ "type": p.kind.schema_type(), "description": p.description }),
            )
        })
        .collect();

    let required: Vec<&str> = tool
        .parameters()
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name)
        .collect();

    FunctionDeclaration {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Declarations for every tool, sorted by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<FunctionDeclaration> = self
            .tools
            .values()
            .map(|tool| declaration_for(tool.as_ref()))
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }

    /// Look up, validate and run one call. Never fails: every outcome is a
    /// [`ToolResult`].
    pub async fn dispatch(&self, call: &FunctionCall) -> ToolResult {
        let start = Instant::now();
        let finish = |output: String, status: ExecutionStatus| ToolResult {
            tool_name: call.name.clone(),
            output,
            status,
            execution_time_ms: start.elapsed().as_millis() as u64,
        };

        let Some(tool) = self.get(&call.name) else {
            warn!(tool_name = %call.name, "Tool not registered");
            return finish(TOOL_NOT_FOUND.to_string(), ExecutionStatus::NotFound);
        };

        let args = match ToolArgs::validate(tool.parameters(), &call.args) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool_name = %call.name, error = %e, "Rejected tool arguments");
                return finish(
                    format!("Error: invalid arguments for {}: {}", call.name, e),
                    ExecutionStatus::Rejected,
                );
            }
        };

        debug!(tool_name = %call.name, args = %args.to_json(), "Executing tool");

        // Own task so a panicking tool cannot take the loop down with it.
        let handle = tokio::spawn(async move { tool.execute(args).await });

        match handle.await {
            Ok(Ok(output)) => finish(output, ExecutionStatus::Success),
            Ok(Err(e)) => {
                warn!(tool_name = %call.name, error = %e, "Tool execution failed");
                finish(
                    format!("Error executing {}: {}", call.name, e),
                    ExecutionStatus::Failed,
                )
            }
            Err(join_error) => {
                let detail = if join_error.is_panic() {
                    "tool panicked".to_string()
                } else {
                    join_error.to_string()
                };
                warn!(tool_name = %call.name, %detail, "Tool task aborted");
                finish(
                    format!("Error executing {}: {}", call.name, detail),
                    ExecutionStatus::Failed,
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the registry with every mail, storage and expense tool.
pub fn create_default_registry(config: &AppConfig, model: Arc<dyn LanguageModel>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let extractor = extract::DocumentExtractor::new(model.clone());

    mail::register(
        &mut registry,
        mail::MailClient::from_config(config),
        mail::SendClient::from_config(config),
    );
    storage::register(
        &mut registry,
        storage::DriveClient::from_config(config),
        extractor.clone(),
    );
    registry.register(Arc::new(expense::ValidateReimbursementTool::new(
        model,
        extractor,
        expense::load_policy(config.expense_policy_path.as_deref()),
    )));

    registry
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes its arguments; counts invocations.
    pub struct EchoTool {
        pub calls: AtomicUsize,
    }

    impl EchoTool {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    const ECHO_PARAMS: &[ParamSpec] = &[
        ParamSpec::required("text", ParamKind::String, "Text to echo"),
        ParamSpec::optional("times", ParamKind::Integer, "Repeat count"),
        ParamSpec::optional("shout", ParamKind::Boolean, "Upper-case output"),
    ];

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo text back"
        }

        fn parameters(&self) -> &'static [ParamSpec] {
            ECHO_PARAMS
        }

        async fn execute(&self, args: ToolArgs) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = args.require_str("text")?;
            let times = args.int_or("times", 1).max(1) as usize;
            let out = text.repeat(times);
            Ok(if args.bool_or("shout", false) {
                out.to_uppercase()
            } else {
                out
            })
        }
    }

    pub struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn description(&self) -> &'static str {
            "Always fails"
        }

        fn parameters(&self) -> &'static [ParamSpec] {
            &[]
        }

        async fn execute(&self, _args: ToolArgs) -> Result<String> {
            Err(OrchestrationError::ToolError("upstream unavailable".to_string()))
        }
    }

    pub struct PanickingTool;

    #[async_trait::async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn description(&self) -> &'static str {
            "Always panics"
        }

        fn parameters(&self) -> &'static [ParamSpec] {
            &[]
        }

        async fn execute(&self, _args: ToolArgs) -> Result<String> {
            panic!("boom");
        }
    }
}
