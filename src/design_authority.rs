//! Design Authority (component I, §4.8).
//!
//! A rule-based gate enforcing KISS/YAGNI/single-responsibility against
//! component plans and reviewing code for complexity. Grounded on
//! `original_source`'s `DesignAuthority`: the same principle/red-flag
//! knowledge base, anti-pattern list, and complexity heuristics, with the
//! module-scope singleton replaced by an explicit context value per §9
//! "Global mutable state".

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::complexity::{self, ComplexityThresholds, IssueKind};
use crate::domain_types::AgentId;
use crate::project_registry::ProjectRegistry;

/// How serious a [`DesignReview`] finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSeverity {
    /// Blocks implementation.
    Error,
    /// Suggests reconsideration.
    Warning,
    /// General guidance; no action required.
    Info,
}

/// One design principle in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principle {
    /// Principle name, e.g. `"KISS"`.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Positive guidance statements.
    pub guidelines: Vec<String>,
    /// Substrings in a plan that suggest this principle is at risk.
    pub red_flags: Vec<String>,
}

/// The Design Authority's fixed knowledge base: principles, anti-patterns,
/// and preferred alternatives (§4.8, supplemented from `original_source`).
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    /// Named design principles and their red-flag keywords.
    pub principles: Vec<Principle>,
    /// Free-text anti-pattern descriptions; a plan matching any word of
    /// one is an `error`-severity violation.
    pub anti_patterns: Vec<String>,
    /// Complex-construct to simple-alternative suggestions.
    pub preferred_alternatives: Vec<(String, String)>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self {
            principles: vec![
                Principle {
                    name: "KISS".into(),
                    description: "Keep It Simple, Stupid".into(),
                    guidelines: vec![
                        "Prefer simple functions over complex types".into(),
                        "Use standard library types when possible".into(),
                        "Avoid premature abstractions".into(),
                        "Choose clarity over cleverness".into(),
                    ],
                    red_flags: vec![
                        "complex".into(),
                        "advanced".into(),
                        "sophisticated".into(),
                        "enterprise".into(),
                        "framework".into(),
                        "architecture".into(),
                        "pattern".into(),
                        "design".into(),
                    ],
                },
                Principle {
                    name: "YAGNI".into(),
                    description: "You Aren't Gonna Need It".into(),
                    guidelines: vec![
                        "Build only what you need right now".into(),
                        "Avoid speculative features".into(),
                        "Start simple, add complexity when required".into(),
                        "Prefer composition over inheritance".into(),
                    ],
                    red_flags: vec![
                        "future-proof".into(),
                        "extensible".into(),
                        "scalable".into(),
                        "generic".into(),
                        "reusable".into(),
                        "flexible".into(),
                        "configurable".into(),
                    ],
                },
                Principle {
                    name: "Single Responsibility".into(),
                    description: "One component, one purpose".into(),
                    guidelines: vec![
                        "Each function should do one thing well".into(),
                        "Separate concerns clearly".into(),
                        "Avoid god types or functions".into(),
                        "Keep modules focused".into(),
                    ],
                    red_flags: vec![
                        "manager".into(),
                        "handler".into(),
                        "controller".into(),
                        "processor".into(),
                        "service".into(),
                        "facade".into(),
                        "adapter".into(),
                    ],
                },
            ],
            anti_patterns: vec![
                "Creating interfaces before understanding requirements".into(),
                "Building generic solutions for specific problems".into(),
                "Over-engineering simple data structures".into(),
                "Premature optimization".into(),
                "Complex inheritance hierarchies".into(),
                "Deeply nested conditional logic".into(),
                "Functions with too many parameters".into(),
                "Types with too many responsibilities".into(),
            ],
            preferred_alternatives: vec![
                ("complex_class".into(), "simple_function".into()),
                ("inheritance".into(), "composition".into()),
                ("interface".into(), "concrete_type".into()),
                ("factory".into(), "direct_construction".into()),
                ("builder".into(), "constructor".into()),
                ("strategy".into(), "if_statement".into()),
                ("observer".into(), "callback_function".into()),
            ],
        }
    }
}

/// One finding from [`DesignAuthority::review_component_plan`] or
/// [`DesignAuthority::review_code_complexity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Principle or category this finding concerns.
    pub principle: String,
    /// What was matched or measured.
    pub description: String,
    /// How serious the finding is.
    pub severity: DecisionSeverity,
}

/// A design review decision (§4.8 "DesignReview").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignReview {
    /// Requesting agent.
    pub requester: AgentId,
    /// Component under review.
    pub component_name: String,
    /// Overall severity: the worst severity among findings, or `info` if
    /// approved with nothing to report.
    pub severity: DecisionSeverity,
    /// Whether the plan/code may proceed.
    pub approved: bool,
    /// Human-readable findings and guidance.
    pub feedback: Vec<String>,
    /// Suggested alternatives or simplifications.
    pub alternatives: Vec<String>,
    /// When the review was produced.
    pub timestamp: DateTime<Utc>,
}

/// Rule-based KISS/YAGNI/single-responsibility gate (§4.8).
pub struct DesignAuthority {
    knowledge_base: KnowledgeBase,
    thresholds: ComplexityThresholds,
    registry: std::sync::Arc<ProjectRegistry>,
    review_history: Mutex<Vec<DesignReview>>,
}

impl DesignAuthority {
    /// Builds a Design Authority over `registry`, using default
    /// thresholds and the built-in knowledge base.
    #[must_use]
    pub fn new(registry: std::sync::Arc<ProjectRegistry>) -> Self {
        Self {
            knowledge_base: KnowledgeBase::default(),
            thresholds: ComplexityThresholds::default(),
            registry,
            review_history: Mutex::new(Vec::new()),
        }
    }

    /// Overrides the default complexity thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ComplexityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Reviews a plan to create `component_name` (§4.8).
    ///
    /// If the component already exists in the registry, the review is
    /// immediately rejected with an `error` severity, independent of plan
    /// content.
    pub async fn review_component_plan(
        &self,
        requester: AgentId,
        component_name: &str,
        plan: &str,
    ) -> DesignReview {
        if self.registry.check_exists(component_name).await {
            let review = DesignReview {
                requester,
                component_name: component_name.to_string(),
                severity: DecisionSeverity::Error,
                approved: false,
                feedback: vec![format!(
                    "Component '{component_name}' already exists. Check the registry before creating."
                )],
                alternatives: vec![format!("Reuse existing component: {component_name}")],
                timestamp: Utc::now(),
            };
            self.review_history.lock().expect("review_history poisoned").push(review.clone());
            return review;
        }

        let violations = self.analyze_plan(plan);
        let recommendations = self.recommend_alternatives(plan);
        let approved = !violations
            .iter()
            .any(|finding| finding.severity == DecisionSeverity::Error);

        let review = DesignReview {
            requester,
            component_name: component_name.to_string(),
            severity: if approved {
                DecisionSeverity::Info
            } else {
                DecisionSeverity::Error
            },
            approved,
            feedback: Self::render_feedback(&violations),
            alternatives: recommendations,
            timestamp: Utc::now(),
        };
        self.review_history.lock().expect("review_history poisoned").push(review.clone());
        review
    }

    fn analyze_plan(&self, plan: &str) -> Vec<Finding> {
        let lowered = plan.to_lowercase();
        let mut findings = Vec::new();

        for principle in &self.knowledge_base.principles {
            for red_flag in &principle.red_flags {
                if lowered.contains(red_flag.as_str()) {
                    findings.push(Finding {
                        principle: principle.name.clone(),
                        description: format!("Contains complexity indicator: '{red_flag}'"),
                        severity: DecisionSeverity::Warning,
                    });
                }
            }
        }

        for anti_pattern in &self.knowledge_base.anti_patterns {
            if anti_pattern
                .to_lowercase()
                .split_whitespace()
                .any(|word| lowered.contains(word))
            {
                findings.push(Finding {
                    principle: "Anti-Pattern".into(),
                    description: anti_pattern.clone(),
                    severity: DecisionSeverity::Error,
                });
            }
        }

        findings
    }

    fn recommend_alternatives(&self, plan: &str) -> Vec<String> {
        let lowered = plan.to_lowercase();
        let mut recommendations: Vec<String> = self
            .knowledge_base
            .preferred_alternatives
            .iter()
            .filter(|(complex, _)| lowered.contains(complex.as_str()))
            .map(|(complex, simple)| format!("Consider {simple} instead of {complex}"))
            .collect();

        if recommendations.is_empty() {
            recommendations.extend([
                "Start with the simplest implementation that works".to_string(),
                "Use standard library types when possible".to_string(),
                "Prefer free functions over types for simple logic".to_string(),
                "Avoid creating abstractions until you have multiple use cases".to_string(),
            ]);
        }
        recommendations
    }

    fn render_feedback(violations: &[Finding]) -> Vec<String> {
        if violations.is_empty() {
            return vec!["Plan looks good; proceed with implementation.".to_string()];
        }
        violations
            .iter()
            .map(|finding| format!("[{:?}] {}", finding.severity, finding.description))
            .collect()
    }

    /// Reviews `code` for complexity violations against the configured
    /// thresholds (§4.8 "For code complexity").
    ///
    /// This is a line-oriented heuristic, not a parser: it counts lines
    /// between top-level function boundaries, tracks a simple
    /// indentation-based nesting counter, and counts commas on `fn`
    /// signature lines. See [`crate::vibe_check`] for the shared,
    /// file-oriented version of the same heuristics.
    pub fn review_code_complexity(&self, requester: AgentId, component_name: &str, code: &str) -> DesignReview {
        let issues = complexity::analyze(code, &self.thresholds);
        let approved = !issues
            .iter()
            .any(|issue| issue.severity == complexity::Severity::Error);

        let feedback = if issues.is_empty() {
            vec!["Code complexity is acceptable.".to_string()]
        } else {
            let mut lines: Vec<String> = issues
                .iter()
                .map(|issue| format!("[{:?}] {}", issue.severity, issue.description))
                .collect();
            lines.push("Consider refactoring to reduce complexity.".to_string());
            lines
        };

        let alternatives = issues
            .iter()
            .map(|issue| match issue.kind {
                IssueKind::FunctionLength => "Break the function into smaller, focused functions".to_string(),
                IssueKind::Nesting => "Use early returns or guard clauses to reduce nesting".to_string(),
                IssueKind::Parameters => "Group related parameters into a struct".to_string(),
                IssueKind::CyclomaticComplexity => "Split branching logic into helper functions".to_string(),
            })
            .collect();

        let review = DesignReview {
            requester,
            component_name: component_name.to_string(),
            severity: if approved { DecisionSeverity::Info } else { DecisionSeverity::Error },
            approved,
            feedback,
            alternatives,
            timestamp: Utc::now(),
        };
        self.review_history.lock().expect("review_history poisoned").push(review.clone());
        review
    }

    /// Review history, optionally filtered to one requester.
    #[must_use]
    pub fn review_history(&self, requester: Option<&AgentId>) -> Vec<DesignReview> {
        let history = self.review_history.lock().expect("review_history poisoned");
        match requester {
            Some(id) => history.iter().filter(|r| &r.requester == id).cloned().collect(),
            None => history.clone(),
        }
    }

    /// Summary of the knowledge base and review activity (§4.8, supplemented
    /// from `original_source`'s `get_knowledge_summary`).
    #[must_use]
    pub fn knowledge_summary(&self) -> KnowledgeSummary {
        let history = self.review_history.lock().expect("review_history poisoned");
        let approved = history.iter().filter(|r| r.approved).count();
        KnowledgeSummary {
            principle_names: self.knowledge_base.principles.iter().map(|p| p.name.clone()).collect(),
            anti_pattern_count: self.knowledge_base.anti_patterns.len(),
            total_reviews: history.len(),
            approval_rate: if history.is_empty() {
                1.0
            } else {
                approved as f64 / history.len() as f64
            },
        }
    }
}

/// Snapshot of knowledge-base coverage and review activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    /// Names of the loaded principles.
    pub principle_names: Vec<String>,
    /// Total named anti-patterns.
    pub anti_pattern_count: usize,
    /// Total reviews performed.
    pub total_reviews: usize,
    /// Fraction of reviews that were approved.
    pub approval_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn authority() -> DesignAuthority {
        let dir = tempfile::tempdir().unwrap();
        let registry = std::sync::Arc::new(
            ProjectRegistry::open(dir.keep(), "test-project").await.unwrap(),
        );
        DesignAuthority::new(registry)
    }

    #[tokio::test]
    async fn rejects_plan_for_existing_component() {
        let authority = authority().await;
        authority
            .registry
            .register_component(
                "http_client",
                "src/net/http_client.rs".into(),
                "client".into(),
                AgentId::try_new("Agent-1").unwrap(),
                vec![],
            )
            .await
            .unwrap();

        let review = authority
            .review_component_plan(AgentId::try_new("Agent-2").unwrap(), "http_client", "a new client")
            .await;
        assert!(!review.approved);
        assert_eq!(review.severity, DecisionSeverity::Error);
    }

    #[tokio::test]
    async fn flags_anti_pattern_plan() {
        let authority = authority().await;
        let review = authority
            .review_component_plan(
                AgentId::try_new("Agent-1").unwrap(),
                "new_thing",
                "premature optimization of the hot path",
            )
            .await;
        assert!(!review.approved);
    }

    #[tokio::test]
    async fn approves_plain_plan() {
        let authority = authority().await;
        let review = authority
            .review_component_plan(AgentId::try_new("Agent-1").unwrap(), "new_thing", "parse the config file")
            .await;
        assert!(review.approved);
    }
}
