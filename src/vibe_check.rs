//! Vibe Check (component J, §4.9).
//!
//! Pure static analyzer over source files: per-function complexity via
//! [`crate::complexity`], plus file-length, line-duplication, and
//! anti-pattern substring checks. Grounded on `original_source`'s
//! `VibePatternDetector`/`vibe_check_models`: the same duplication
//! threshold (`>20` char lines repeated `>3` times) and substring-scan
//! anti-pattern mechanism, with the anti-pattern list itself re-expressed
//! for Rust source (the Python list's `except:`/`global `/`eval(` have no
//! direct Rust equivalent).

use serde::{Deserialize, Serialize};

use crate::complexity::{self, ComplexityThresholds};

/// Severity of a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Hard failure.
    Error,
    /// Soft failure; promoted to `Error` under `strict_mode`.
    Warning,
}

impl From<complexity::Severity> for Severity {
    fn from(value: complexity::Severity) -> Self {
        match value {
            complexity::Severity::Error => Self::Error,
            complexity::Severity::Warning => Self::Warning,
        }
    }
}

/// What kind of check produced a [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// Function body too long.
    LongFunction,
    /// Nesting too deep.
    DeepNesting,
    /// Too many parameters.
    TooManyParameters,
    /// Branch count too high.
    HighCyclomaticComplexity,
    /// File exceeds the line-count limit.
    FileLength,
    /// A substantial line repeats more than the allowed number of times.
    Duplication,
    /// A named anti-pattern substring was matched.
    AntiPattern,
}

/// One static-analysis finding (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Path of the file the violation was found in.
    pub file: String,
    /// 1-based line number, or 0 when not line-specific (e.g.
    /// cross-file duplication).
    pub line: usize,
    /// Which check produced this violation.
    pub violation_type: ViolationType,
    /// Severity.
    pub severity: Severity,
    /// Human-readable detail.
    pub description: String,
    /// Suggested remedy.
    pub suggestion: String,
}

/// Named substring anti-patterns, adapted for Rust source (§4.9 "bare
/// catch-all, global mutable declaration, dynamic eval/exec, etc.").
const ANTI_PATTERNS: &[(&str, &str, &str)] = &[
    ("bare_catch_all", "Err(_) =>", "Match specific error variants instead of discarding them"),
    ("global_mutable_state", "static mut ", "Avoid global mutable state; pass explicit context"),
    ("unsafe_transmute", "mem::transmute", "Avoid transmute; prefer a safe conversion"),
    ("blocking_sleep_in_async", "thread::sleep", "Use an async sleep inside async functions"),
    ("panicking_unwrap", ".unwrap()", "Propagate errors with `?` instead of unwrapping"),
];

const DUPLICATION_MIN_LEN: usize = 20;
const DUPLICATION_MAX_REPEATS: usize = 3;
const DEFAULT_MAX_FILE_LINES: usize = 300;

fn check_function_complexity(file: &str, content: &str, thresholds: &ComplexityThresholds) -> Vec<Violation> {
    complexity::analyze(content, thresholds)
        .into_iter()
        .map(|issue| {
            let violation_type = match issue.kind {
                complexity::IssueKind::FunctionLength => ViolationType::LongFunction,
                complexity::IssueKind::Nesting => ViolationType::DeepNesting,
                complexity::IssueKind::Parameters => ViolationType::TooManyParameters,
                complexity::IssueKind::CyclomaticComplexity => ViolationType::HighCyclomaticComplexity,
            };
            let suggestion = match issue.kind {
                complexity::IssueKind::FunctionLength => "Split into smaller functions",
                complexity::IssueKind::Nesting => "Use early returns or guard clauses",
                complexity::IssueKind::Parameters => "Group parameters into a struct",
                complexity::IssueKind::CyclomaticComplexity => "Extract branches into helper functions",
            };
            Violation {
                file: file.to_string(),
                line: issue.line,
                violation_type,
                severity: issue.severity.into(),
                description: issue.description,
                suggestion: suggestion.to_string(),
            }
        })
        .collect()
}

fn check_file_length(file: &str, content: &str, max_lines: usize) -> Vec<Violation> {
    let total = content.lines().count();
    if total > max_lines {
        vec![Violation {
            file: file.to_string(),
            line: 0,
            violation_type: ViolationType::FileLength,
            severity: Severity::Error,
            description: format!("file is {total} lines, limit is {max_lines}"),
            suggestion: "Split this file into smaller modules".to_string(),
        }]
    } else {
        Vec::new()
    }
}

fn check_duplication(file: &str, content: &str) -> Vec<Violation> {
    use std::collections::HashMap;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.len() > DUPLICATION_MIN_LEN {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count > DUPLICATION_MAX_REPEATS)
        .map(|(line, count)| {
            let preview: String = line.chars().take(50).collect();
            Violation {
                file: file.to_string(),
                line: 0,
                violation_type: ViolationType::Duplication,
                severity: Severity::Warning,
                description: format!("line appears {count} times: '{preview}...'"),
                suggestion: "Extract into a function or constant".to_string(),
            }
        })
        .collect()
}

fn check_anti_patterns(file: &str, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        for (name, pattern, suggestion) in ANTI_PATTERNS {
            if line.contains(pattern) {
                violations.push(Violation {
                    file: file.to_string(),
                    line: line_number + 1,
                    violation_type: ViolationType::AntiPattern,
                    severity: Severity::Warning,
                    description: format!("anti-pattern detected: {name}"),
                    suggestion: (*suggestion).to_string(),
                });
            }
        }
    }
    violations
}

/// Runs every §4.9 check over one file's contents.
#[must_use]
pub fn check_file(file: &str, content: &str, thresholds: &ComplexityThresholds, max_file_lines: usize) -> Vec<Violation> {
    let mut violations = check_function_complexity(file, content, thresholds);
    violations.extend(check_file_length(file, content, max_file_lines));
    violations.extend(check_duplication(file, content));
    violations.extend(check_anti_patterns(file, content));
    violations
}

/// Pass/warning/fail verdict for a [`VibeCheckReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VibeStatus {
    /// No violations.
    Pass,
    /// Only warnings, and not running in strict mode.
    Warning,
    /// At least one error, or a warning under strict mode.
    Fail,
}

/// Aggregated findings over one or more files (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VibeCheckReport {
    /// Every violation found, across all checked files.
    pub violations: Vec<Violation>,
    /// Whether warnings are promoted to failures.
    pub strict_mode: bool,
}

impl VibeCheckReport {
    /// Runs [`check_file`] over every `(path, content)` pair.
    #[must_use]
    pub fn run(files: &[(String, String)], thresholds: &ComplexityThresholds, strict_mode: bool) -> Self {
        let violations = files
            .iter()
            .flat_map(|(path, content)| check_file(path, content, thresholds, DEFAULT_MAX_FILE_LINES))
            .collect();
        Self { violations, strict_mode }
    }

    /// Overall pass/warning/fail verdict.
    #[must_use]
    pub fn status(&self) -> VibeStatus {
        let has_error = self.violations.iter().any(|v| v.severity == Severity::Error);
        let has_warning = self.violations.iter().any(|v| v.severity == Severity::Warning);
        if has_error || (self.strict_mode && has_warning) {
            VibeStatus::Fail
        } else if has_warning {
            VibeStatus::Warning
        } else {
            VibeStatus::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_function_yields_violation() {
        let mut code = "fn long_one() {\n".to_string();
        for i in 0..40 {
            code.push_str(&format!("    let _x{i} = {i};\n"));
        }
        code.push_str("}\n");

        let report = VibeCheckReport::run(&[("src/foo.rs".into(), code)], &ComplexityThresholds::default(), false);
        assert_eq!(report.status(), VibeStatus::Fail);
        assert!(report.violations.iter().any(|v| v.violation_type == ViolationType::LongFunction));
    }

    #[test]
    fn clean_file_passes() {
        let code = "fn small(a: i32) -> i32 {\n    a + 1\n}\n".to_string();
        let report = VibeCheckReport::run(&[("src/foo.rs".into(), code)], &ComplexityThresholds::default(), false);
        assert_eq!(report.status(), VibeStatus::Pass);
    }

    #[test]
    fn strict_mode_promotes_warning_to_fail() {
        let code = "fn f() {\n    let _ = x.unwrap();\n}\n".to_string();
        let report = VibeCheckReport::run(&[("src/foo.rs".into(), code)], &ComplexityThresholds::default(), true);
        assert_eq!(report.status(), VibeStatus::Fail);
    }

    #[test]
    fn duplication_flags_repeated_substantial_line() {
        let mut code = String::new();
        for _ in 0..4 {
            code.push_str("    let value = some_long_function_call(with, several, arguments);\n");
        }
        let report = VibeCheckReport::run(&[("src/foo.rs".into(), code)], &ComplexityThresholds::default(), false);
        assert!(report.violations.iter().any(|v| v.violation_type == ViolationType::Duplication));
    }
}
