//! Release records and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charter_core::{ChartMetadata, Values};

/// Prefix of the storage key of every release revision
pub const STORAGE_KEY_PREFIX: &str = "sh.charter.release.v1";

/// The chart a release revision was made from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(metadata: &ChartMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            version: metadata.version.to_string(),
            chart_type: metadata.chart_type.clone(),
            app_version: metadata.app_version.clone(),
        }
    }
}

/// One revision of a release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    /// Release name
    pub name: String,

    /// Kubernetes namespace
    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub revision: u32,

    /// Current state
    pub state: ReleaseState,

    /// Chart metadata at deploy time
    pub chart: ChartInfo,

    /// Effective values (chart defaults merged with overrides)
    pub values: Values,

    /// Manifest applied to the cluster
    pub manifest: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// First revision of a new release
    pub fn for_install(
        name: String,
        namespace: String,
        chart: ChartInfo,
        values: Values,
        manifest: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            name,
            namespace,
            revision: 1,
            state: ReleaseState::PendingInstall { started_at: now },
            chart,
            values,
            manifest,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next revision after `previous`
    pub fn for_upgrade(previous: &StoredRelease, chart: ChartInfo, values: Values, manifest: String) -> Self {
        let now = Utc::now();
        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            revision: previous.revision + 1,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                previous_revision: previous.revision,
            },
            chart,
            values,
            manifest,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key for this revision
    pub fn storage_key(&self) -> String {
        storage_key(&self.name, self.revision)
    }

    /// Whether this revision still describes an installed release
    pub fn is_live(&self) -> bool {
        !matches!(self.state, ReleaseState::Uninstalled)
    }

    pub fn mark_deployed(&mut self) {
        self.state = ReleaseState::Deployed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: String) {
        let now = Utc::now();
        self.state = ReleaseState::Failed {
            reason,
            failed_at: now,
        };
        self.updated_at = now;
    }

    /// Mark the revision as replaced by a newer one
    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }

    pub fn mark_uninstalling(&mut self) {
        let now = Utc::now();
        self.state = ReleaseState::PendingUninstall { started_at: now };
        self.updated_at = now;
    }

    pub fn mark_uninstalled(&mut self) {
        self.state = ReleaseState::Uninstalled;
        self.updated_at = Utc::now();
    }
}

/// Storage key of revision `revision` of release `name`
pub fn storage_key(name: &str, revision: u32) -> String {
    format!("{}.{}.v{}", STORAGE_KEY_PREFIX, name, revision)
}

/// Release state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReleaseState {
    /// Successfully deployed
    Deployed,

    /// The action failed after the revision was recorded
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    /// Release has been uninstalled (history kept)
    Uninstalled,

    /// Replaced by a newer revision
    Superseded,

    PendingInstall {
        started_at: DateTime<Utc>,
    },

    PendingUpgrade {
        started_at: DateTime<Utc>,
        previous_revision: u32,
    },

    PendingUninstall {
        started_at: DateTime<Utc>,
    },
}

impl ReleaseState {
    /// Check if this is a pending (transitional) state
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall { .. } | Self::PendingUpgrade { .. } | Self::PendingUninstall { .. }
        )
    }

    /// Status name as stored and displayed
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed { .. } => "failed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::PendingInstall { .. } => "pending-install",
            Self::PendingUpgrade { .. } => "pending-upgrade",
            Self::PendingUninstall { .. } => "pending-uninstall",
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status_name()),
        }
    }
}
