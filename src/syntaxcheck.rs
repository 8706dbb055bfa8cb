//! Abstract "compile check" interface and the lightweight reference rules
//! used both for the Scorer's soft syntax pass and the hard compile check
//! when no real compiler is wired in.

use async_trait::async_trait;

/// Result of a syntax/compile check: either clean, or a list of problems.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Errors from invoking the checker itself (as opposed to the code under
/// test failing to check out).
#[derive(Debug, thiserror::Error)]
pub enum SyntaxCheckError {
    #[error("syntax check timed out")]
    Timeout,
    #[error("syntax check backend failed: {0}")]
    Backend(String),
}

/// The "hard" compile-check collaborator: pure-ish, expected to return
/// within a few seconds, with a timeout treated as failure.
#[async_trait]
pub trait SyntaxChecker: Send + Sync {
    async fn check(&self, code: &str) -> Result<CheckOutcome, SyntaxCheckError>;
}

/// Lightweight textual rules standing in for a real compiler: balanced
/// braces/brackets/parens, no stray trailing commas before a closing
/// delimiter, and (heuristically) a semicolon after non-brace-terminated
/// statement lines. These same rules back the Scorer's soft `syntax`
/// penalty; `HeuristicSyntaxChecker` reuses them as the hard `jac_check`
/// stand-in since no real compiler is in scope.
#[derive(Debug, Clone, Default)]
pub struct HeuristicSyntaxChecker;

/// Runs the heuristic rules over `code`, returning one violation message
/// per rule that fails. Shared by the Scorer (soft check) and
/// [`HeuristicSyntaxChecker`] (hard check).
pub fn heuristic_violations(code: &str) -> Vec<String> {
    let mut violations = Vec::new();

    if !braces_balanced(code) {
        violations.push("unbalanced braces or brackets".to_string());
    }
    if has_stray_comma(code) {
        violations.push("stray comma before closing delimiter".to_string());
    }
    if missing_required_semicolons(code) {
        violations.push("statement line missing a terminating semicolon".to_string());
    }

    violations
}

fn braces_balanced(code: &str) -> bool {
    let mut stack = Vec::new();
    for c in code.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

fn has_stray_comma(code: &str) -> bool {
    let mut chars = code.chars().peekable();
    let mut prev_non_ws: Option<char> = None;
    while let Some(c) = chars.next() {
        if c == ',' {
            let mut rest = chars.clone();
            while let Some(&n) = rest.peek() {
                if n.is_whitespace() {
                    rest.next();
                } else {
                    break;
                }
            }
            if matches!(rest.peek(), Some(')') | Some(']') | Some('}')) {
                return true;
            }
        }
        if !c.is_whitespace() {
            prev_non_ws = Some(c);
        }
    }
    let _ = prev_non_ws;
    false
}

/// Heuristic, not a real parser: flags a non-blank line that neither ends
/// in a brace/bracket/colon/semicolon nor opens a new block, as a proxy
/// for "probably missing a semicolon." Intentionally conservative to
/// avoid false positives on multi-line expressions.
fn missing_required_semicolons(code: &str) -> bool {
    for line in code.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let last = match trimmed.chars().last() {
            Some(c) => c,
            None => continue,
        };
        let looks_like_statement = trimmed.starts_with("return ")
            || trimmed.starts_with("let ")
            || (trimmed.contains(" = ") && !trimmed.ends_with(':'));
        if looks_like_statement && !matches!(last, ';' | '{' | '}' | ',' | ':') {
            return true;
        }
    }
    false
}

#[async_trait]
impl SyntaxChecker for HeuristicSyntaxChecker {
    async fn check(&self, code: &str) -> Result<CheckOutcome, SyntaxCheckError> {
        let errors = heuristic_violations(code);
        Ok(CheckOutcome {
            ok: errors.is_empty(),
            errors,
        })
    }
}
