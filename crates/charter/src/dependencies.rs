//! Making a chart's declared dependencies present before it is installed

use serde::{Deserialize, Serialize};
use std::path::Path;

use charter_core::LoadedChart;
use charter_repo::{DependencyManager, check_dependencies};

use crate::error::{ChartError, Result};

/// When to run a dependency update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyPolicy {
    /// Update only when a dependency is missing or at a mismatched version
    #[default]
    CheckFirst,
    /// Update whenever the chart declares dependencies
    AlwaysUpdate,
}

/// Ensures declared dependencies are physically present under `charts/`
pub struct DependencyResolver<M: DependencyManager> {
    manager: M,
    policy: DependencyPolicy,
}

impl<M: DependencyManager> DependencyResolver<M> {
    pub fn new(manager: M, policy: DependencyPolicy) -> Self {
        Self { manager, policy }
    }

    pub fn policy(&self) -> DependencyPolicy {
        self.policy
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Check the chart's dependencies and update them if needed
    ///
    /// A chart without dependencies, or one whose dependencies are already
    /// satisfied under [`DependencyPolicy::CheckFirst`], never reaches the
    /// dependency manager. After an update the chart is read back from
    /// `chart_path` and must satisfy every declared constraint.
    pub async fn ensure_dependencies(&self, chart: &LoadedChart, chart_path: &Path) -> Result<()> {
        if chart.metadata.dependencies.is_empty() {
            return Ok(());
        }

        let dependency_error = |message: String| ChartError::Dependency {
            chart: chart.name().to_string(),
            message,
        };

        if self.policy == DependencyPolicy::CheckFirst {
            let check = check_dependencies(chart).map_err(|e| dependency_error(e.to_string()))?;
            if check.is_satisfied() {
                tracing::debug!(chart = %chart.name(), "dependencies already satisfied");
                return Ok(());
            }
            tracing::debug!(
                chart = %chart.name(),
                unresolved = %check.summary(),
                "updating dependencies"
            );
        }

        self.manager
            .update(chart, chart_path)
            .await
            .map_err(|e| dependency_error(e.to_string()))?;

        let updated = LoadedChart::load(chart_path).map_err(|e| dependency_error(e.to_string()))?;
        let check = check_dependencies(&updated).map_err(|e| dependency_error(e.to_string()))?;
        if !check.is_satisfied() {
            return Err(dependency_error(format!(
                "still unresolved after update: {}",
                check.summary()
            )));
        }
        Ok(())
    }
}
