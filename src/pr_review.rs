//! PR Review Protocol (component K, §4.11).
//!
//! Agent-to-agent pull-request lifecycle: creation with deterministic
//! reviewer assignment, review execution aggregating the Project
//! Registry (duplication), Vibe Check, and Design Authority, and a
//! decision gate. Grounded on `original_source`'s `PRReviewProtocol` /
//! `PRValidator`: the same five-check review order and fixed
//! `approval_criteria` list, persisted as one file per §6 ("PRs: a
//! single file with `{pull_requests, review_history}`").
//!
//! Unlike the Python original, which classified a violation as blocking
//! by scanning its rendered text for the substrings `"error"`/`"failed"`,
//! each [`Violation`] here carries an explicit `critical: bool` set by
//! the check that produced it — the same decision, made by the check
//! itself instead of reconstructed later from prose.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::complexity::ComplexityThresholds;
use crate::design_authority::DesignAuthority;
use crate::domain_types::{AgentId, PrId, Priority};
use crate::persistence::{self, PersistenceError};
use crate::project_registry::ProjectRegistry;
use crate::vibe_check::{self, VibeStatus};

/// Errors raised by the PR Review Protocol.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// An operation referenced a PR id with no record.
    #[error("pull request not found: {0}")]
    NotFound(PrId),

    /// `create` was called with `author == reviewer`.
    #[error("author cannot review their own pull request")]
    AuthorIsReviewer,

    /// No eligible reviewer remained after excluding the author.
    #[error("no eligible reviewer available")]
    NoEligibleReviewer,

    /// Underlying read/write failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Lifecycle status of a [`PullRequest`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    /// Created, awaiting review start.
    Pending,
    /// A reviewer has started reviewing.
    InReview,
    /// Passed review with no critical violations.
    Approved,
    /// Review found at least one critical violation.
    NeedsChanges,
    /// Explicitly rejected (reserved for future manual rejection support).
    Rejected,
}

/// Kind of file change in a [`CodeChange`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A new file.
    Added,
    /// An existing file, altered.
    Modified,
    /// A file removed.
    Deleted,
}

/// One file-level change proposed by a [`PullRequest`] (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChange {
    /// Repository-relative path.
    pub file_path: String,
    /// What kind of change this is.
    pub change_type: ChangeType,
    /// Content before the change, if any.
    pub old_content: String,
    /// Content after the change.
    pub new_content: String,
    /// First changed line, 1-based.
    pub line_start: usize,
    /// Last changed line, 1-based.
    pub line_end: usize,
}

fn default_approval_criteria() -> Vec<String> {
    vec![
        "Code follows project design patterns".to_string(),
        "No duplication with existing components".to_string(),
        "Passes vibe check (complexity, simplicity)".to_string(),
        "Proper error handling implemented".to_string(),
        "Documentation updated if needed".to_string(),
    ]
}

/// A proposed code change reviewed by another agent before merging (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Stable identifier.
    pub id: PrId,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Submitting agent.
    pub author: AgentId,
    /// Assigned reviewer; always distinct from `author` (§3 invariant 5).
    pub reviewer: AgentId,
    /// Current lifecycle status.
    pub status: PrStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Proposed file changes.
    pub changes: Vec<CodeChange>,
    /// Free-text comments accumulated across reviews.
    pub review_comments: Vec<String>,
    /// Fixed checklist shown to reviewers.
    pub approval_criteria: Vec<String>,
}

/// One finding from [`PrReviewProtocol::review`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Human-readable description.
    pub description: String,
    /// Whether this finding alone blocks approval.
    pub critical: bool,
}

/// Outcome of one review attempt (§3 "ReviewResult").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    /// PR reviewed.
    pub pr_id: PrId,
    /// Reviewer who performed this review.
    pub reviewer: AgentId,
    /// Resulting PR status.
    pub status: PrStatus,
    /// Rendered feedback, one entry per line.
    pub feedback: Vec<String>,
    /// Every violation found, across all five checks.
    pub violations_found: Vec<Violation>,
    /// Actionable suggestions synthesized from the violation categories.
    pub suggestions: Vec<String>,
    /// Whether the PR was approved by this review.
    pub approved: bool,
    /// When this review was recorded.
    pub timestamp: DateTime<Utc>,
    /// Vibe Check verdict over the changed files, if any were checked.
    pub vibe_check_status: Option<VibeStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrStoreData {
    pull_requests: HashMap<PrId, PullRequest>,
    review_history: Vec<ReviewResult>,
}

/// Agent-to-agent pull-request lifecycle manager (§4.11).
pub struct PrReviewProtocol {
    path: PathBuf,
    data: RwLock<PrStoreData>,
    registry: std::sync::Arc<ProjectRegistry>,
    design_authority: std::sync::Arc<DesignAuthority>,
    thresholds: ComplexityThresholds,
    agent_roster: Vec<AgentId>,
    reviewer_fairness_window: usize,
}

impl PrReviewProtocol {
    /// Opens (or lazily creates) the PR store at `data_root/prs.json`.
    ///
    /// `reviewer_fairness_window` is floor-clamped to the roster size
    /// (§9 Open Question, resolved as `max(configured, roster.len())`):
    /// a window shorter than the roster could starve an agent out of
    /// rotation entirely.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if an existing file cannot be read.
    pub async fn open(
        data_root: impl AsRef<Path>,
        registry: std::sync::Arc<ProjectRegistry>,
        design_authority: std::sync::Arc<DesignAuthority>,
        agent_roster: Vec<AgentId>,
        reviewer_fairness_window: usize,
    ) -> Result<Self, PersistenceError> {
        let path = data_root.as_ref().join("prs.json");
        let data = persistence::read_json_lenient::<PrStoreData>(&path)
            .await?
            .unwrap_or_default();
        let reviewer_fairness_window = reviewer_fairness_window.max(agent_roster.len());
        Ok(Self {
            path,
            data: RwLock::new(data),
            registry,
            design_authority,
            thresholds: ComplexityThresholds::default(),
            agent_roster,
            reviewer_fairness_window,
        })
    }

    async fn save(&self, data: &PrStoreData) -> Result<(), PersistenceError> {
        persistence::write_json_atomic(&self.path, data).await
    }

    fn assign_reviewer(&self, author: &AgentId, history: &[ReviewResult]) -> Result<AgentId, ReviewError> {
        let eligible: Vec<&AgentId> = self.agent_roster.iter().filter(|id| *id != author).collect();
        if eligible.is_empty() {
            return Err(ReviewError::NoEligibleReviewer);
        }

        let mut counts: HashMap<&AgentId, usize> = HashMap::new();
        for result in history.iter().rev().take(self.reviewer_fairness_window) {
            *counts.entry(&result.reviewer).or_insert(0) += 1;
        }

        let chosen = eligible
            .into_iter()
            .min_by_key(|id| (counts.get(id).copied().unwrap_or(0), id.as_ref().as_str().to_string()))
            .expect("eligible is non-empty");
        Ok(chosen.clone())
    }

    /// Creates a pull request, assigning a reviewer deterministically if
    /// none is supplied (§4.11).
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::AuthorIsReviewer`] if an explicit `reviewer`
    /// equals `author`, [`ReviewError::NoEligibleReviewer`] if no
    /// reviewer can be assigned, or a persistence failure.
    pub async fn create(
        &self,
        author: AgentId,
        title: String,
        description: String,
        changes: Vec<CodeChange>,
        priority: Priority,
        reviewer: Option<AgentId>,
    ) -> Result<PrId, ReviewError> {
        let mut data = self.data.write().await;

        let reviewer = match reviewer {
            Some(reviewer) if reviewer == author => return Err(ReviewError::AuthorIsReviewer),
            Some(reviewer) => reviewer,
            None => self.assign_reviewer(&author, &data.review_history)?,
        };

        let now = Utc::now();
        let id = PrId::generate();
        let pr = PullRequest {
            id: id.clone(),
            title,
            description,
            author,
            reviewer,
            status: PrStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            changes,
            review_comments: Vec::new(),
            approval_criteria: default_approval_criteria(),
        };
        data.pull_requests.insert(id.clone(), pr);
        self.save(&data).await?;
        Ok(id)
    }

    /// Marks `pr_id` as `in_review`, iff `reviewer` is the assigned
    /// reviewer. Returns `false` (not an error) on mismatch, per §4.11.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::NotFound`] or a persistence failure.
    pub async fn start_review(&self, pr_id: &PrId, reviewer: &AgentId) -> Result<bool, ReviewError> {
        let mut data = self.data.write().await;
        let pr = data
            .pull_requests
            .get_mut(pr_id)
            .ok_or_else(|| ReviewError::NotFound(pr_id.clone()))?;
        if &pr.reviewer != reviewer {
            return Ok(false);
        }
        pr.status = PrStatus::InReview;
        pr.updated_at = Utc::now();
        self.save(&data).await?;
        Ok(true)
    }

    fn check_duplication(&self, changes: &[CodeChange], components: &[(String, crate::project_registry::Component)]) -> Vec<Violation> {
        changes
            .iter()
            .filter(|change| change.change_type == ChangeType::Added)
            .flat_map(|change| {
                let stem = Path::new(&change.file_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&change.file_path)
                    .to_lowercase();
                components.iter().filter_map(move |(_, component)| {
                    let existing = component.path.to_lowercase();
                    if existing.contains(&stem) || stem.contains(&existing) {
                        Some(Violation {
                            description: format!(
                                "Duplication error: {} may duplicate {}",
                                change.file_path, component.path
                            ),
                            critical: true,
                        })
                    } else {
                        None
                    }
                })
            })
            .collect()
    }

    async fn check_design_compliance(&self, author: &AgentId, changes: &[CodeChange]) -> Vec<Violation> {
        let mut violations = Vec::new();
        for change in changes
            .iter()
            .filter(|change| matches!(change.change_type, ChangeType::Added | ChangeType::Modified))
        {
            let component_name = Path::new(&change.file_path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&change.file_path)
                .to_string();
            let plan: String = change.new_content.chars().take(200).collect();
            let review = self
                .design_authority
                .review_component_plan(author.clone(), &component_name, &plan)
                .await;
            if !review.approved {
                violations.push(Violation {
                    description: format!("Design review error: {}", review.feedback.join("; ")),
                    critical: true,
                });
            }
        }
        violations
    }

    fn check_error_handling(&self, changes: &[CodeChange]) -> Vec<Violation> {
        let mut violations = Vec::new();
        for change in changes
            .iter()
            .filter(|c| matches!(c.change_type, ChangeType::Added | ChangeType::Modified))
        {
            let lowered = change.new_content.to_lowercase();
            if lowered.contains("err(_) =>") {
                violations.push(Violation {
                    description: format!("Error handling violation: bare catch-all in {}", change.file_path),
                    critical: true,
                });
            }
            if lowered.contains("fn ") && !lowered.contains("result<") {
                violations.push(Violation {
                    description: format!("New function in {} may need explicit error propagation", change.file_path),
                    critical: false,
                });
            }
        }
        violations
    }

    fn check_documentation(&self, changes: &[CodeChange]) -> Vec<Violation> {
        changes
            .iter()
            .filter(|c| c.change_type == ChangeType::Added)
            .filter(|c| c.new_content.contains("fn ") && !(c.new_content.contains("///") || c.new_content.contains("//!") || c.new_content.contains("// TODO")))
            .map(|c| Violation {
                description: format!("New functions in {} should be documented", c.file_path),
                critical: false,
            })
            .collect()
    }

    fn synthesize_suggestions(violations: &[Violation]) -> Vec<String> {
        let joined = violations.iter().map(|v| v.description.to_lowercase()).collect::<Vec<_>>().join(" ");
        let mut suggestions = Vec::new();
        if joined.contains("duplication") {
            suggestions.push("Consider reusing existing components instead of creating new ones".to_string());
        }
        if joined.contains("vibe check") {
            suggestions.push("Run vibe-check locally before submitting".to_string());
            suggestions.push("Simplify complex functions and reduce nesting depth".to_string());
        }
        if joined.contains("error handling") || joined.contains("error propagation") {
            suggestions.push("Add proper error handling with specific error types".to_string());
        }
        if joined.contains("documented") {
            suggestions.push("Add doc comments to new public functions".to_string());
        }
        if suggestions.is_empty() {
            suggestions.extend([
                "Ensure all new components are registered in the project registry".to_string(),
                "Follow KISS and YAGNI principles".to_string(),
                "Test changes locally before submitting".to_string(),
            ]);
        }
        suggestions
    }

    fn render_feedback(approved: bool, violations: &[Violation], suggestions: &[String]) -> Vec<String> {
        if approved {
            return vec![
                "APPROVED - changes look good".to_string(),
                "No duplication detected".to_string(),
                "Passes vibe check".to_string(),
                "Follows design principles".to_string(),
            ];
        }
        let mut lines = vec!["NEEDS CHANGES - please address the following issues:".to_string()];
        lines.extend(violations.iter().map(|v| format!("- {}", v.description)));
        lines.extend(suggestions.iter().map(|s| format!("suggestion: {s}")));
        lines
    }

    /// Performs the five-check review over `pr_id` (§4.11).
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::NotFound`] or a persistence failure.
    pub async fn review(&self, pr_id: &PrId, reviewer: &AgentId) -> Result<ReviewResult, ReviewError> {
        let mut data = self.data.write().await;
        let pr = data
            .pull_requests
            .get(pr_id)
            .ok_or_else(|| ReviewError::NotFound(pr_id.clone()))?
            .clone();

        if &pr.reviewer != reviewer {
            let result = ReviewResult {
                pr_id: pr_id.clone(),
                reviewer: reviewer.clone(),
                status: PrStatus::Rejected,
                feedback: vec!["Not authorized to review this pull request".to_string()],
                violations_found: Vec::new(),
                suggestions: Vec::new(),
                approved: false,
                timestamp: Utc::now(),
                vibe_check_status: None,
            };
            return Ok(result);
        }

        let components = self.registry.list_all().await;
        let mut violations = self.check_duplication(&pr.changes, &components);
        violations.extend(self.check_design_compliance(&pr.author, &pr.changes).await);
        violations.extend(self.check_error_handling(&pr.changes));
        violations.extend(self.check_documentation(&pr.changes));

        let changed_files: Vec<(String, String)> = pr
            .changes
            .iter()
            .filter(|c| matches!(c.change_type, ChangeType::Added | ChangeType::Modified))
            .map(|c| (c.file_path.clone(), c.new_content.clone()))
            .collect();
        let vibe_check_status = if changed_files.is_empty() {
            None
        } else {
            let report = vibe_check::VibeCheckReport::run(&changed_files, &self.thresholds, true);
            let status = report.status();
            if status == VibeStatus::Fail {
                violations.push(Violation {
                    description: format!("Vibe check failed: {} violation(s)", report.violations.len()),
                    critical: true,
                });
            }
            Some(status)
        };

        let suggestions = Self::synthesize_suggestions(&violations);
        let approved = !violations.iter().any(|v| v.critical);
        let status = if approved { PrStatus::Approved } else { PrStatus::NeedsChanges };
        let feedback = Self::render_feedback(approved, &violations, &suggestions);

        let result = ReviewResult {
            pr_id: pr_id.clone(),
            reviewer: reviewer.clone(),
            status,
            feedback,
            violations_found: violations,
            suggestions,
            approved,
            timestamp: Utc::now(),
            vibe_check_status,
        };

        if let Some(stored) = data.pull_requests.get_mut(pr_id) {
            stored.status = status;
            stored.updated_at = Utc::now();
        }
        data.review_history.push(result.clone());
        self.save(&data).await?;
        Ok(result)
    }

    /// Looks up a PR by id.
    pub async fn get(&self, pr_id: &PrId) -> Option<PullRequest> {
        self.data.read().await.pull_requests.get(pr_id).cloned()
    }

    /// Pending reviews assigned to `reviewer`.
    pub async fn pending_for(&self, reviewer: &AgentId) -> Vec<PullRequest> {
        self.data
            .read()
            .await
            .pull_requests
            .values()
            .filter(|pr| &pr.reviewer == reviewer && pr.status == PrStatus::Pending)
            .cloned()
            .collect()
    }

    /// PRs authored by `author`.
    pub async fn by_author(&self, author: &AgentId) -> Vec<PullRequest> {
        self.data
            .read()
            .await
            .pull_requests
            .values()
            .filter(|pr| &pr.author == author)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    fn clean_change(path: &str) -> CodeChange {
        CodeChange {
            file_path: path.to_string(),
            change_type: ChangeType::Added,
            old_content: String::new(),
            new_content: "/// Adds two numbers.\npub fn add(a: i32, b: i32) -> Result<i32, String> {\n    Ok(a + b)\n}\n".to_string(),
            line_start: 1,
            line_end: 4,
        }
    }

    async fn harness(dir: &std::path::Path) -> (PrReviewProtocol, std::sync::Arc<ProjectRegistry>) {
        let registry = std::sync::Arc::new(ProjectRegistry::open(dir, "test-project").await.unwrap());
        let design_authority = std::sync::Arc::new(DesignAuthority::new(std::sync::Arc::clone(&registry)));
        let roster = vec![agent("Agent-1"), agent("Agent-2")];
        let protocol = PrReviewProtocol::open(dir, std::sync::Arc::clone(&registry), design_authority, roster, 20)
            .await
            .unwrap();
        (protocol, registry)
    }

    #[tokio::test]
    async fn happy_path_review_approves() {
        let dir = tempdir().unwrap();
        let (protocol, _registry) = harness(dir.path()).await;

        let author = agent("Agent-1");
        let pr_id = protocol
            .create(
                author,
                "Add two numbers".to_string(),
                "Small utility function".to_string(),
                vec![clean_change("src/math/add.rs")],
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        let pr = protocol.get(&pr_id).await.unwrap();
        let result = protocol.review(&pr_id, &pr.reviewer).await.unwrap();

        assert!(result.approved, "expected approval, got: {:?}", result.violations_found);
        assert_eq!(result.status, PrStatus::Approved);
        assert!(result.violations_found.is_empty());
    }

    #[tokio::test]
    async fn duplication_against_registered_component_blocks_approval() {
        let dir = tempdir().unwrap();
        let (protocol, registry) = harness(dir.path()).await;

        registry
            .register_component(
                "http_client",
                "src/net/http_client.py".to_string(),
                "Fetches remote resources".to_string(),
                agent("Agent-2"),
                Vec::new(),
            )
            .await
            .unwrap();

        let author = agent("Agent-1");
        let pr_id = protocol
            .create(
                author,
                "Add an http client".to_string(),
                "New networking helper".to_string(),
                vec![clean_change("src/util/http_client.rs")],
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        let pr = protocol.get(&pr_id).await.unwrap();
        let result = protocol.review(&pr_id, &pr.reviewer).await.unwrap();

        assert!(!result.approved);
        assert_eq!(result.status, PrStatus::NeedsChanges);
        assert!(result
            .violations_found
            .iter()
            .any(|v| v.critical && v.description.contains("Duplication")));
    }

    #[tokio::test]
    async fn long_function_fails_vibe_check_and_blocks_approval() {
        let dir = tempdir().unwrap();
        let (protocol, _registry) = harness(dir.path()).await;

        let mut body = "pub fn long_one() {\n".to_string();
        for i in 0..40 {
            body.push_str(&format!("    let _x{i} = {i};\n"));
        }
        body.push_str("}\n");

        let change = CodeChange {
            file_path: "src/big.rs".to_string(),
            change_type: ChangeType::Added,
            old_content: String::new(),
            new_content: body,
            line_start: 1,
            line_end: 42,
        };

        let author = agent("Agent-1");
        let pr_id = protocol
            .create(
                author,
                "Add a long function".to_string(),
                "Refactor pending".to_string(),
                vec![change],
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        let pr = protocol.get(&pr_id).await.unwrap();
        let result = protocol.review(&pr_id, &pr.reviewer).await.unwrap();

        assert!(!result.approved);
        assert_eq!(result.status, PrStatus::NeedsChanges);
        assert_eq!(result.vibe_check_status, Some(VibeStatus::Fail));
        assert!(result.violations_found.iter().any(|v| v.description.contains("Vibe check failed")));
    }

    #[tokio::test]
    async fn reviewer_assignment_excludes_author_and_is_deterministic() {
        let dir = tempdir().unwrap();
        let (protocol, _registry) = harness(dir.path()).await;

        let author = agent("Agent-1");
        let pr_id = protocol
            .create(
                author.clone(),
                "Trivial change".to_string(),
                String::new(),
                vec![clean_change("src/trivial.rs")],
                Priority::Low,
                None,
            )
            .await
            .unwrap();

        let pr = protocol.get(&pr_id).await.unwrap();
        assert_ne!(pr.reviewer, author);
        assert_eq!(pr.reviewer, agent("Agent-2"));
    }

    #[tokio::test]
    async fn reviewer_assignment_favors_agent_with_fewest_recent_reviews() {
        let dir = tempdir().unwrap();
        let registry = std::sync::Arc::new(ProjectRegistry::open(dir.path(), "test-project").await.unwrap());
        let design_authority = std::sync::Arc::new(DesignAuthority::new(std::sync::Arc::clone(&registry)));
        let roster = vec![agent("Agent-1"), agent("Agent-2"), agent("Agent-3")];
        let protocol =
            PrReviewProtocol::open(dir.path(), registry, design_authority, roster, 20).await.unwrap();

        let author = agent("Agent-1");
        let mut history = Vec::new();
        for _ in 0..5 {
            history.push(ReviewResult {
                pr_id: PrId::generate(),
                reviewer: agent("Agent-2"),
                status: PrStatus::Approved,
                feedback: vec![],
                violations_found: vec![],
                suggestions: vec![],
                approved: true,
                timestamp: chrono::Utc::now(),
                vibe_check_status: None,
            });
        }

        let chosen = protocol.assign_reviewer(&author, &history).unwrap();
        assert_eq!(chosen, agent("Agent-3"));
    }

    #[tokio::test]
    async fn reviewer_fairness_window_ignores_history_older_than_the_window() {
        let dir = tempdir().unwrap();
        let registry = std::sync::Arc::new(ProjectRegistry::open(dir.path(), "test-project").await.unwrap());
        let design_authority = std::sync::Arc::new(DesignAuthority::new(std::sync::Arc::clone(&registry)));
        let roster = vec![agent("Agent-1"), agent("Agent-2"), agent("Agent-3")];
        let protocol =
            PrReviewProtocol::open(dir.path(), registry, design_authority, roster, 2).await.unwrap();

        let author = agent("Agent-1");
        let stale = ReviewResult {
            pr_id: PrId::generate(),
            reviewer: agent("Agent-3"),
            status: PrStatus::Approved,
            feedback: vec![],
            violations_found: vec![],
            suggestions: vec![],
            approved: true,
            timestamp: chrono::Utc::now(),
            vibe_check_status: None,
        };
        let mut recent = ReviewResult {
            reviewer: agent("Agent-2"),
            ..stale.clone()
        };
        recent.pr_id = PrId::generate();

        // window is floor-clamped to the 3-agent roster, so only the
        // most recent 3 entries count; `stale` falls outside that.
        let history = vec![stale.clone(), stale.clone(), stale, recent.clone(), recent];
        let chosen = protocol.assign_reviewer(&author, &history).unwrap();
        assert_eq!(chosen, agent("Agent-3"));
    }

    #[tokio::test]
    async fn explicit_reviewer_matching_author_is_rejected() {
        let dir = tempdir().unwrap();
        let (protocol, _registry) = harness(dir.path()).await;

        let author = agent("Agent-1");
        let err = protocol
            .create(
                author.clone(),
                "Self review attempt".to_string(),
                String::new(),
                vec![clean_change("src/self_review.rs")],
                Priority::Low,
                Some(author),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::AuthorIsReviewer));
    }

    #[tokio::test]
    async fn review_by_non_assigned_reviewer_is_not_authorized() {
        let dir = tempdir().unwrap();
        let (protocol, _registry) = harness(dir.path()).await;

        let pr_id = protocol
            .create(
                agent("Agent-1"),
                "Some change".to_string(),
                String::new(),
                vec![clean_change("src/some_change.rs")],
                Priority::Low,
                Some(agent("Agent-2")),
            )
            .await
            .unwrap();

        let result = protocol.review(&pr_id, &agent("Agent-1")).await.unwrap();
        assert_eq!(result.status, PrStatus::Rejected);
        assert!(!result.approved);
    }
}
