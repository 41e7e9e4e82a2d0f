//! The guardrail seam.
//!
//! Rule libraries are external collaborators; the core invokes them through
//! this narrow callback before every tool execution. A block produces an
//! error tool result with the rule's reason; warnings are attached to the
//! result but do not stop the call.

use std::sync::Arc;

/// What the rule engine sees for one tool call.
#[derive(Debug, Clone)]
pub struct GuardrailInput<'a> {
    pub tool_name: &'a str,
    pub arguments: &'a serde_json::Value,
    pub session_id: &'a str,
    pub workspace_id: &'a str,
}

/// Aggregate verdict across all registered guardrails.
#[derive(Debug, Clone, Default)]
pub struct GuardrailVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    /// Names of rules that fired (blocked or warned).
    pub triggered: Vec<String>,
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, input: &GuardrailInput<'_>) -> GuardrailVerdict;
}

/// Evaluate every guardrail, merging verdicts. The first block wins the
/// reason; warnings and triggered names accumulate.
pub fn evaluate_all(
    guardrails: &[Arc<dyn Guardrail>],
    input: &GuardrailInput<'_>,
) -> GuardrailVerdict {
    let mut merged = GuardrailVerdict::default();
    for rule in guardrails {
        let verdict = rule.evaluate(input);
        if verdict.blocked && !merged.blocked {
            merged.blocked = true;
            merged.reason = verdict.reason.clone();
        }
        merged.warnings.extend(verdict.warnings);
        merged.triggered.extend(verdict.triggered);
    }
    merged
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pattern guardrail
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Blocks tool calls whose serialized arguments match any denied pattern.
/// Patterns are compiled once at construction.
pub struct PatternGuardrail {
    name: String,
    denied: regex::RegexSet,
}

impl PatternGuardrail {
    pub fn new(name: impl Into<String>, patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            denied: regex::RegexSet::new(patterns)?,
        })
    }
}

impl Guardrail for PatternGuardrail {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &GuardrailInput<'_>) -> GuardrailVerdict {
        let haystack = input.arguments.to_string();
        if self.denied.is_match(&haystack) {
            GuardrailVerdict {
                blocked: true,
                reason: Some(format!(
                    "arguments to {} matched a denied pattern ({})",
                    input.tool_name, self.name
                )),
                warnings: Vec::new(),
                triggered: vec![self.name.clone()],
            }
        } else {
            GuardrailVerdict::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(args: &'a serde_json::Value) -> GuardrailInput<'a> {
        GuardrailInput {
            tool_name: "exec",
            arguments: args,
            session_id: "s1",
            workspace_id: "w1",
        }
    }

    #[test]
    fn pattern_blocks_matching_arguments() {
        let rule = PatternGuardrail::new("no-rm", &[r"rm\s+-rf"]).unwrap();
        let args = serde_json::json!({"command": "rm -rf /"});
        let verdict = rule.evaluate(&input(&args));
        assert!(verdict.blocked);
        assert!(verdict.reason.unwrap().contains("no-rm"));
    }

    #[test]
    fn pattern_passes_clean_arguments() {
        let rule = PatternGuardrail::new("no-rm", &[r"rm\s+-rf"]).unwrap();
        let args = serde_json::json!({"command": "ls -la"});
        assert!(!rule.evaluate(&input(&args)).blocked);
    }

    #[test]
    fn evaluate_all_merges_first_block_and_all_warnings() {
        struct Warner;
        impl Guardrail for Warner {
            fn name(&self) -> &str {
                "warner"
            }
            fn evaluate(&self, _input: &GuardrailInput<'_>) -> GuardrailVerdict {
                GuardrailVerdict {
                    blocked: false,
                    reason: None,
                    warnings: vec!["watch out".into()],
                    triggered: vec!["warner".into()],
                }
            }
        }

        let rules: Vec<Arc<dyn Guardrail>> = vec![
            Arc::new(Warner),
            Arc::new(PatternGuardrail::new("no-secrets", &["password"]).unwrap()),
        ];
        let args = serde_json::json!({"command": "echo password"});
        let verdict = evaluate_all(&rules, &input(&args));
        assert!(verdict.blocked);
        assert_eq!(verdict.warnings, vec!["watch out".to_string()]);
        assert_eq!(verdict.triggered.len(), 2);
    }
}
