//! The tool seam.
//!
//! Concrete tool implementations (file I/O, shell, web fetch) live outside
//! the core; they plug in through [`Tool`]. The registry owns the
//! declaration list sent to the provider, and [`dispatch_tool`] wraps one
//! invocation with its timeout and error shaping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sb_domain::error::{Error, Result};
use sb_domain::message::ToolDefinition;

use crate::runtime::cancel::CancelToken;

/// What one tool call produced, in the shape the model sees.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    /// Tool asked the pipeline to end the turn after recording this result.
    pub stop_turn: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            stop_turn: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            stop_turn: false,
        }
    }
}

/// Trait every tool implements.
///
/// Cancellation is cooperative: a tool that ignores the token runs to
/// completion, and its result is still recorded.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn run(&self, arguments: serde_json::Value, cancel: CancelToken) -> Result<ToolOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

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
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Declarations sent to the provider, in stable name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether a tool's calls may run concurrently with its siblings.
    pub fn is_independent(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.definition().independent)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one tool call under its timeout. Failures are non-fatal to the
/// session: they come back as error outcomes the model can read.
pub async fn dispatch_tool(
    registry: &ToolRegistry,
    tool_name: &str,
    arguments: serde_json::Value,
    timeout: Duration,
    cancel: CancelToken,
) -> ToolOutcome {
    let Some(tool) = registry.get(tool_name) else {
        return ToolOutcome::error(format!("unknown tool: {tool_name}"));
    };

    match tokio::time::timeout(timeout, tool.run(arguments, cancel)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::warn!(tool = tool_name, error = %e, "tool failed");
            ToolOutcome::error(e.to_string())
        }
        Err(_) => {
            tracing::warn!(tool = tool_name, ?timeout, "tool timed out");
            ToolOutcome::error(
                Error::Timeout(format!("tool {tool_name} exceeded {timeout:?}")).to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        independent: bool,
    }

    #[async_trait::async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                parameters: serde_json::json!({"type": "object"}),
                independent: self.independent,
            }
        }
        async fn run(
            &self,
            arguments: serde_json::Value,
            _cancel: CancelToken,
        ) -> Result<ToolOutcome> {
            Ok(ToolOutcome::ok(arguments.to_string()))
        }
    }

    struct Hang;

    #[async_trait::async_trait]
    impl Tool for Hang {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "hang".into(),
                description: "never returns".into(),
                parameters: serde_json::json!({"type": "object"}),
                independent: false,
            }
        }
        async fn run(
            &self,
            _arguments: serde_json::Value,
            _cancel: CancelToken,
        ) -> Result<ToolOutcome> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(ToolOutcome::ok("unreachable"))
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo { independent: true }));

        let outcome = dispatch_tool(
            &reg,
            "echo",
            serde_json::json!({"x": 1}),
            Duration::from_secs(5),
            CancelToken::new(),
        )
        .await;
        assert!(!outcome.is_error);
        assert!(outcome.content.contains("\"x\":1"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome() {
        let reg = ToolRegistry::new();
        let outcome = dispatch_tool(
            &reg,
            "missing",
            serde_json::json!({}),
            Duration::from_secs(5),
            CancelToken::new(),
        )
        .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn timed_out_tool_is_an_error_outcome() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Hang));
        let outcome = dispatch_tool(
            &reg,
            "hang",
            serde_json::json!({}),
            Duration::from_millis(20),
            CancelToken::new(),
        )
        .await;
        assert!(outcome.is_error);
    }

    #[test]
    fn definitions_are_name_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Hang));
        reg.register(Arc::new(Echo { independent: true }));
        let names: Vec<String> = reg.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "hang"]);
        assert!(reg.is_independent("echo"));
        assert!(!reg.is_independent("hang"));
    }
}
