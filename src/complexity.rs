//! Shared function-complexity heuristics (§4.8, §4.9).
//!
//! The Design Authority's code-complexity gate and the Vibe Check static
//! analyzer apply the same function-length/nesting/parameter-count/
//! cyclomatic-complexity thresholds to source text; this module is the
//! one place that walks a source string and measures them, so the two
//! callers can never drift out of sync on what counts as a violation.
//!
//! This is a line-oriented heuristic, not a parser: it finds `fn`
//! signatures, counts braces to bound the body, and counts
//! branch-introducing keywords/operators as a cyclomatic-complexity
//! proxy. It will misjudge adversarially formatted code (macros that
//! expand to `fn`, strings containing `{`); that tradeoff is accepted in
//! exchange for not depending on a full parser.

use serde::{Deserialize, Serialize};

/// Severity of a [`ComplexityIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Breaches a hard limit.
    Error,
    /// Breaches a soft limit.
    Warning,
}

/// What kind of limit a [`ComplexityIssue`] breaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Function body exceeds `max_function_lines`.
    FunctionLength,
    /// Nesting depth exceeds `max_nesting_depth`.
    Nesting,
    /// Parameter count exceeds `max_parameters`.
    Parameters,
    /// Branch count proxy exceeds `max_cyclomatic_complexity`.
    CyclomaticComplexity,
}

/// Configurable limits (§4.8, §4.9 defaults).
#[derive(Debug, Clone, Copy)]
pub struct ComplexityThresholds {
    /// Function body line limit before [`IssueKind::FunctionLength`].
    pub max_function_lines: usize,
    /// Nesting depth limit before [`IssueKind::Nesting`].
    pub max_nesting_depth: usize,
    /// Parameter count limit before [`IssueKind::Parameters`].
    pub max_parameters: usize,
    /// Branch-count limit before [`IssueKind::CyclomaticComplexity`].
    pub max_cyclomatic_complexity: u32,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            max_function_lines: 30,
            max_nesting_depth: 3,
            max_parameters: 5,
            max_cyclomatic_complexity: 8,
        }
    }
}

/// One complexity finding against a single function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityIssue {
    /// 1-based line of the offending `fn` signature.
    pub line: usize,
    /// Which threshold was breached.
    pub kind: IssueKind,
    /// Human-readable detail, including the measured value and limit.
    pub description: String,
    /// How serious the finding is.
    pub severity: Severity,
}

fn is_fn_signature(trimmed: &str) -> bool {
    let stripped = trimmed
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub ")
        .trim_start_matches("async ")
        .trim_start_matches("unsafe ");
    stripped.starts_with("fn ")
}

fn count_parameters(signature: &str) -> usize {
    let Some(open) = signature.find('(') else {
        return 0;
    };
    let Some(close) = signature[open..].find(')').map(|offset| open + offset) else {
        return 0;
    };
    let inner = signature[open + 1..close].trim();
    if inner.is_empty() {
        0
    } else {
        inner.split(',').filter(|part| !part.trim().is_empty()).count()
    }
}

fn is_branch_line(trimmed: &str) -> bool {
    trimmed.starts_with("if ")
        || trimmed.starts_with("} else if")
        || trimmed.starts_with("else if")
        || trimmed.starts_with("match ")
        || trimmed.starts_with("for ")
        || trimmed.starts_with("while ")
        || trimmed.starts_with("loop")
}

/// Walks every top-level `fn` in `code` and measures it against
/// `thresholds`, returning one [`ComplexityIssue`] per breached limit.
#[must_use]
pub fn analyze(code: &str, thresholds: &ComplexityThresholds) -> Vec<ComplexityIssue> {
    let lines: Vec<&str> = code.lines().collect();
    let mut issues = Vec::new();
    let mut cursor = 0;

    while cursor < lines.len() {
        if !is_fn_signature(lines[cursor].trim_start()) {
            cursor += 1;
            continue;
        }
        let signature_line = cursor;

        let mut signature = String::new();
        let mut brace_line = None;
        let mut scan = cursor;
        while scan < lines.len() {
            signature.push_str(lines[scan]);
            signature.push('\n');
            if let Some(pos) = lines[scan].find('{') {
                brace_line = Some((scan, pos));
                break;
            }
            scan += 1;
        }
        let Some((body_line, body_col)) = brace_line else {
            cursor += 1;
            continue;
        };

        let params = count_parameters(&signature);
        if params > thresholds.max_parameters {
            issues.push(ComplexityIssue {
                line: signature_line + 1,
                kind: IssueKind::Parameters,
                description: format!(
                    "function has {params} parameters, limit is {}",
                    thresholds.max_parameters
                ),
                severity: Severity::Warning,
            });
        }

        let mut depth: i32 = 0;
        let mut max_nesting: i32 = 0;
        let mut branch_count: u32 = 0;
        let mut body_lines: usize = 0;
        let mut row = body_line;
        let mut closed_at = lines.len().saturating_sub(1);
        'body: while row < lines.len() {
            let text = if row == body_line { &lines[row][body_col..] } else { lines[row] };
            for ch in text.chars() {
                match ch {
                    '{' => {
                        depth += 1;
                        max_nesting = max_nesting.max(depth);
                    }
                    '}' => {
                        depth -= 1;
                        if depth <= 0 {
                            closed_at = row;
                            break 'body;
                        }
                    }
                    _ => {}
                }
            }
            let trimmed = lines[row].trim_start();
            if is_branch_line(trimmed) {
                branch_count += 1;
            }
            branch_count += u32::try_from(trimmed.matches("&&").count() + trimmed.matches("||").count())
                .unwrap_or(u32::MAX);
            body_lines += 1;
            row += 1;
        }

        if body_lines > thresholds.max_function_lines {
            issues.push(ComplexityIssue {
                line: signature_line + 1,
                kind: IssueKind::FunctionLength,
                description: format!(
                    "function body is {body_lines} lines, limit is {}",
                    thresholds.max_function_lines
                ),
                severity: Severity::Error,
            });
        }
        if max_nesting as usize > thresholds.max_nesting_depth {
            issues.push(ComplexityIssue {
                line: signature_line + 1,
                kind: IssueKind::Nesting,
                description: format!(
                    "nesting depth is {max_nesting}, limit is {}",
                    thresholds.max_nesting_depth
                ),
                severity: Severity::Error,
            });
        }
        let cyclomatic = 1 + branch_count;
        if cyclomatic > thresholds.max_cyclomatic_complexity {
            issues.push(ComplexityIssue {
                line: signature_line + 1,
                kind: IssueKind::CyclomaticComplexity,
                description: format!(
                    "cyclomatic complexity is {cyclomatic}, limit is {}",
                    thresholds.max_cyclomatic_complexity
                ),
                severity: Severity::Error,
            });
        }

        cursor = closed_at + 1;
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_long_function() {
        let mut body = "fn long_one() {\n".to_string();
        for i in 0..40 {
            body.push_str(&format!("    let _x{i} = {i};\n"));
        }
        body.push_str("}\n");

        let issues = analyze(&body, &ComplexityThresholds::default());
        assert!(issues.iter().any(|issue| issue.kind == IssueKind::FunctionLength));
    }

    #[test]
    fn flags_too_many_parameters() {
        let code = "fn many(a: i32, b: i32, c: i32, d: i32, e: i32, f: i32) {\n    let _ = a + b + c + d + e + f;\n}\n";
        let issues = analyze(code, &ComplexityThresholds::default());
        assert!(issues.iter().any(|issue| issue.kind == IssueKind::Parameters));
    }

    #[test]
    fn clean_function_yields_no_issues() {
        let code = "fn small(a: i32) -> i32 {\n    a + 1\n}\n";
        let issues = analyze(code, &ComplexityThresholds::default());
        assert!(issues.is_empty());
    }
}
