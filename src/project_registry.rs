//! Project Registry (component H, §4.7).
//!
//! Single source of truth for named components, their ownership, and the
//! project's approved design patterns. Grounded on `original_source`'s
//! `ProjectRegistryManager`: one JSON file holding the whole registry
//! (§6), a fixed default pattern set (KISS, YAGNI, Single Responsibility,
//! Error Handling), and keyword-based `validate_design_decision`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain_types::AgentId;
use crate::persistence::{self, PersistenceError};

/// Errors raised by the Project Registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `register_component` was called for a name already present.
    #[error("component already exists: {0}")]
    AlreadyExists(String),

    /// An operation referenced a component name with no entry.
    #[error("component not found: {0}")]
    NotFound(String),

    /// Underlying read/write failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Lifecycle status of a [`Component`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// In active use.
    Active,
    /// No longer maintained; callers should migrate away.
    Deprecated,
    /// Under active restructuring.
    Refactoring,
}

/// A named, owned unit of the project (original_source's `Component`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Repository-relative path.
    pub path: String,
    /// One-line statement of what it's for.
    pub purpose: String,
    /// Owning agent.
    pub owner: AgentId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub last_modified: DateTime<Utc>,
    /// Lifecycle status.
    pub status: ComponentStatus,
    /// Names of other components this one depends on.
    pub dependencies: Vec<String>,
}

/// Enforcement strength of a [`DesignPattern`] (§4.7, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    /// A violation is an error.
    Required,
    /// A violation is a warning.
    Recommended,
    /// A violation is informational only.
    Optional,
}

/// An approved design principle, with example usages and named
/// anti-patterns that violate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignPattern {
    /// Short name, e.g. `"KISS Principle"`.
    pub name: String,
    /// One-paragraph description.
    pub description: String,
    /// Example applications.
    pub examples: Vec<String>,
    /// Named anti-patterns this principle rules out.
    pub anti_patterns: Vec<String>,
    /// How strictly this principle is enforced.
    pub enforcement_level: EnforcementLevel,
}

impl DesignPattern {
    fn kiss() -> Self {
        Self {
            name: "KISS Principle".into(),
            description: "Keep It Simple, Stupid - prefer simple solutions".into(),
            examples: vec![
                "Use simple functions instead of complex classes".into(),
                "Prefer if/else over deeply nested match arms".into(),
                "Use built-in types instead of custom wrappers".into(),
            ],
            anti_patterns: vec![
                "Over-engineering simple problems".into(),
                "Creating abstractions before they're needed".into(),
                "Complex inheritance hierarchies".into(),
            ],
            enforcement_level: EnforcementLevel::Required,
        }
    }

    fn yagni() -> Self {
        Self {
            name: "YAGNI".into(),
            description: "You Aren't Gonna Need It - don't build features until needed".into(),
            examples: vec![
                "Start with simple data structures".into(),
                "Add complexity only when requirements demand it".into(),
                "Prefer composition over inheritance".into(),
            ],
            anti_patterns: vec![
                "Building features for hypothetical future needs".into(),
                "Creating complex interfaces for simple use cases".into(),
                "Over-abstracting before understanding requirements".into(),
            ],
            enforcement_level: EnforcementLevel::Required,
        }
    }

    fn single_responsibility() -> Self {
        Self {
            name: "Single Responsibility".into(),
            description: "Each component should have one clear purpose".into(),
            examples: vec![
                "Separate data access from business logic".into(),
                "Keep UI components focused on presentation".into(),
                "Isolate external service integrations".into(),
            ],
            anti_patterns: vec![
                "God modules that do everything".into(),
                "Functions that handle multiple concerns".into(),
                "Modules mixing different abstraction levels".into(),
            ],
            enforcement_level: EnforcementLevel::Required,
        }
    }

    fn error_handling() -> Self {
        Self {
            name: "Error Handling".into(),
            description: "Use structured error types for consistent error handling".into(),
            examples: vec![
                "#[derive(thiserror::Error)] enum ModuleError { ... }".into(),
                "fn process_data() -> Result<String, ModuleError>".into(),
                "Use `?` with `#[from]` conversions for context".into(),
            ],
            anti_patterns: vec![
                "Bare catch-all handlers".into(),
                "Silent error swallowing".into(),
                "Inconsistent error types".into(),
            ],
            enforcement_level: EnforcementLevel::Required,
        }
    }

    /// The fixed default pattern set a freshly created registry ships with.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::kiss(),
            Self::yagni(),
            Self::single_responsibility(),
            Self::error_handling(),
        ]
    }
}

/// Severity of a single [`ValidationReport`] finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Breaks a `required` pattern.
    Error,
    /// Breaks a `recommended`/`optional` pattern.
    Warning,
}

/// One keyword-matched finding against a [`DesignPattern`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// The pattern this finding concerns.
    pub pattern: String,
    /// The specific anti-pattern text matched, or a suggestion for
    /// recommendations.
    pub detail: String,
    /// How serious the finding is.
    pub severity: Severity,
}

/// Result of `validate_design_decision` (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff no `error`-severity violation was found.
    pub valid: bool,
    /// Required-pattern breaches.
    pub violations: Vec<Violation>,
    /// Recommended/optional-pattern suggestions.
    pub recommendations: Vec<Violation>,
}

/// Aggregate counts returned by [`ProjectRegistry::summary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySummary {
    /// Registry's declared project name.
    pub project_name: String,
    /// Registry schema version.
    pub version: String,
    /// Total component count.
    pub total_components: usize,
    /// Currently active agent ids.
    pub active_agents: Vec<AgentId>,
    /// Component count per owner.
    pub by_owner: HashMap<AgentId, usize>,
    /// Component count per status.
    pub by_status: HashMap<ComponentStatus, usize>,
}

/// On-disk registry contents (§6 "Registry").
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryData {
    project_name: String,
    version: String,
    components: HashMap<String, Component>,
    patterns: Vec<DesignPattern>,
    last_updated: DateTime<Utc>,
    active_agents: Vec<AgentId>,
}

impl RegistryData {
    fn default_for(project_name: &str) -> Self {
        Self {
            project_name: project_name.to_string(),
            version: "1.0.0".into(),
            components: HashMap::new(),
            patterns: DesignPattern::defaults(),
            last_updated: Utc::now(),
            active_agents: Vec::new(),
        }
    }
}

/// Single-source-of-truth registry of components, owners, and design
/// patterns, persisted as one file (§4.7, §6).
pub struct ProjectRegistry {
    path: PathBuf,
    data: RwLock<RegistryData>,
}

impl ProjectRegistry {
    /// Opens (or lazily creates) the registry at `data_root/registry.json`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if an existing file cannot be read.
    pub async fn open(data_root: impl AsRef<Path>, project_name: &str) -> Result<Self, PersistenceError> {
        let path = data_root.as_ref().join("registry.json");
        let data = persistence::read_json_lenient::<RegistryData>(&path)
            .await?
            .unwrap_or_else(|| RegistryData::default_for(project_name));
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    async fn save(&self, data: &RegistryData) -> Result<(), PersistenceError> {
        persistence::write_json_atomic(&self.path, data).await
    }

    /// Registers a new component. Rejects an already-registered name
    /// (§3 invariant: names are unique).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] or a persistence failure.
    pub async fn register_component(
        &self,
        name: &str,
        path: String,
        purpose: String,
        owner: AgentId,
        dependencies: Vec<String>,
    ) -> Result<Component, RegistryError> {
        let mut data = self.data.write().await;
        if data.components.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        let now = Utc::now();
        let component = Component {
            path,
            purpose,
            owner,
            created_at: now,
            last_modified: now,
            status: ComponentStatus::Active,
            dependencies,
        };
        data.components.insert(name.to_string(), component.clone());
        data.last_updated = now;
        self.save(&data).await?;
        Ok(component)
    }

    /// Looks up a component by name.
    pub async fn get_component(&self, name: &str) -> Option<Component> {
        self.data.read().await.components.get(name).cloned()
    }

    /// Whether `name` is already registered.
    pub async fn check_exists(&self, name: &str) -> bool {
        self.data.read().await.components.contains_key(name)
    }

    /// Applies `mutator` to the named component and persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or a persistence failure.
    pub async fn update_component(
        &self,
        name: &str,
        mutator: impl FnOnce(&mut Component),
    ) -> Result<Component, RegistryError> {
        let mut data = self.data.write().await;
        let component = data
            .components
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        mutator(component);
        component.last_modified = Utc::now();
        let updated = component.clone();
        data.last_updated = Utc::now();
        self.save(&data).await?;
        Ok(updated)
    }

    /// Reassigns ownership of `name` to `new_owner`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or a persistence failure.
    pub async fn transfer_ownership(
        &self,
        name: &str,
        new_owner: AgentId,
    ) -> Result<Component, RegistryError> {
        self.update_component(name, |component| component.owner = new_owner)
            .await
    }

    /// Lists every registered component, name paired with record.
    pub async fn list_all(&self) -> Vec<(String, Component)> {
        self.data
            .read()
            .await
            .components
            .iter()
            .map(|(name, component)| (name.clone(), component.clone()))
            .collect()
    }

    /// Lists every component owned by `owner`.
    pub async fn list_by_owner(&self, owner: &AgentId) -> Vec<(String, Component)> {
        self.data
            .read()
            .await
            .components
            .iter()
            .filter(|(_, component)| &component.owner == owner)
            .map(|(name, component)| (name.clone(), component.clone()))
            .collect()
    }

    /// Returns the registry's approved design patterns.
    pub async fn patterns(&self) -> Vec<DesignPattern> {
        self.data.read().await.patterns.clone()
    }

    /// Registers `agent` as active, for reporting in [`Self::summary`].
    pub async fn note_active_agent(&self, agent: AgentId) -> Result<(), PersistenceError> {
        let mut data = self.data.write().await;
        if !data.active_agents.contains(&agent) {
            data.active_agents.push(agent);
            data.last_updated = Utc::now();
            self.save(&data).await?;
        }
        Ok(())
    }

    /// Aggregate counts over the current registry state (§4.7 "summary").
    pub async fn summary(&self) -> RegistrySummary {
        let data = self.data.read().await;
        let mut by_owner: HashMap<AgentId, usize> = HashMap::new();
        let mut by_status: HashMap<ComponentStatus, usize> = HashMap::new();
        for component in data.components.values() {
            *by_owner.entry(component.owner.clone()).or_insert(0) += 1;
            *by_status.entry(component.status).or_insert(0) += 1;
        }
        RegistrySummary {
            project_name: data.project_name.clone(),
            version: data.version.clone(),
            total_components: data.components.len(),
            active_agents: data.active_agents.clone(),
            by_owner,
            by_status,
        }
    }

    /// Validates free-text `decision` against every pattern's anti-pattern
    /// list using the same "complex/advanced/sophisticated/enterprise"
    /// red-flag keyword scan as `original_source`'s
    /// `validate_design_decision` (§4.7).
    pub async fn validate_design_decision(&self, decision: &str) -> ValidationReport {
        const RED_FLAGS: &[&str] = &["complex", "advanced", "sophisticated", "enterprise"];
        let lowered = decision.to_lowercase();
        let flagged = RED_FLAGS.iter().any(|flag| lowered.contains(flag));

        let mut violations = Vec::new();
        let mut recommendations = Vec::new();
        if flagged {
            for pattern in &self.data.read().await.patterns {
                for anti_pattern in &pattern.anti_patterns {
                    match pattern.enforcement_level {
                        EnforcementLevel::Required => violations.push(Violation {
                            pattern: pattern.name.clone(),
                            detail: anti_pattern.clone(),
                            severity: Severity::Error,
                        }),
                        EnforcementLevel::Recommended | EnforcementLevel::Optional => {
                            recommendations.push(Violation {
                                pattern: pattern.name.clone(),
                                detail: format!("Consider: {}", pattern.description),
                                severity: Severity::Warning,
                            });
                        }
                    }
                }
            }
        }

        ValidationReport {
            valid: violations.is_empty(),
            violations,
            recommendations,
        }
    }
}

/// Shared handle used by the PR Review Protocol and Design Authority.
pub type SharedProjectRegistry = Arc<ProjectRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> ProjectRegistry {
        let dir = tempfile::tempdir().unwrap();
        ProjectRegistry::open(dir.keep(), "test-project").await.unwrap()
    }

    #[tokio::test]
    async fn register_then_lookup_round_trips() {
        let registry = registry().await;
        let owner = AgentId::try_new("Agent-1").unwrap();
        registry
            .register_component("http_client", "src/net/http_client.rs".into(), "HTTP client".into(), owner.clone(), vec![])
            .await
            .unwrap();

        assert!(registry.check_exists("http_client").await);
        let component = registry.get_component("http_client").await.unwrap();
        assert_eq!(component.owner, owner);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_name() {
        let registry = registry().await;
        let owner = AgentId::try_new("Agent-1").unwrap();
        registry
            .register_component("http_client", "a".into(), "p".into(), owner.clone(), vec![])
            .await
            .unwrap();

        let err = registry
            .register_component("http_client", "b".into(), "p".into(), owner, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn validate_design_decision_flags_enterprise_keyword() {
        let registry = registry().await;
        let report = registry
            .validate_design_decision("let's build an enterprise-grade abstraction layer")
            .await;
        assert!(!report.valid);
        assert!(!report.violations.is_empty());
    }

    #[tokio::test]
    async fn validate_design_decision_passes_plain_text() {
        let registry = registry().await;
        let report = registry
            .validate_design_decision("add a retry loop to the delivery adapter")
            .await;
        assert!(report.valid);
        assert!(report.violations.is_empty());
    }
}
