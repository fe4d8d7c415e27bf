//! Active resource-group scope with a replaceable background resource cache.
//!
//! [`ActiveScope`] is a cheaply cloneable handle over an `ArcSwap` snapshot.
//! Readers always see a whole `(resource group, resources)` pair; a refresh
//! started for one group can never publish into a snapshot owned by another.

mod resource_types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use azsh_backend::{az_args, BackendQuery, QueryBudget, ResourceSummary};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use resource_types::{
    alias_for_abbreviation, short_resource_type, ResourceTypeAlias, RESOURCE_TYPE_ALIASES,
};

/// Maximum number of cached names listed in the scope directive.
pub const SCOPE_DIRECTIVE_MAX_RESOURCES: usize = 25;

/// Lifecycle of the background resource enumeration for the current scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefreshState {
    #[default]
    Idle,
    Pending,
    Loaded {
        count: usize,
    },
    Failed {
        reason: String,
    },
}

/// Public struct `ScopedResource` describing one cached child resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedResource {
    pub name: String,
    pub resource_type: String,
    pub location: String,
    pub id: Option<String>,
}

impl ScopedResource {
    /// Completion text: `@<abbr>:<name>` for known types, `@<name>` otherwise.
    pub fn mention(&self) -> String {
        match short_resource_type(&self.resource_type) {
            Some(abbreviation) => format!("@{abbreviation}:{}", self.name),
            None => format!("@{}", self.name),
        }
    }

    pub fn description(&self) -> String {
        format!("{} ({})", self.resource_type, self.location)
    }

    fn from_summary(summary: ResourceSummary) -> Option<Self> {
        let name = summary.name.filter(|name| !name.trim().is_empty())?;
        Some(Self {
            name,
            resource_type: summary.resource_type.unwrap_or_default(),
            location: summary.location.unwrap_or_default(),
            id: summary.id,
        })
    }
}

/// Immutable view of the active scope at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSnapshot {
    pub generation: u64,
    pub resource_group: Option<String>,
    pub resources: Vec<ScopedResource>,
    pub refresh: RefreshState,
}

impl ScopeSnapshot {
    pub fn find_resource(&self, name: &str) -> Option<&ScopedResource> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    /// Renders the directive prepended to prompts while a scope is active.
    pub fn directive(&self) -> Option<String> {
        let resource_group = self.resource_group.as_deref()?;
        let mut lines = vec![
            format!("[Active Scope: Resource Group '{resource_group}']"),
            format!(
                "The user is working in resource group '{resource_group}'. Treat \"this resource group\", \"here\", \"these resources\" and resources named without a group as belonging to '{resource_group}', and pass `-g {resource_group}` to az commands unless the user says otherwise."
            ),
        ];
        if !self.resources.is_empty() {
            let mut names = self
                .resources
                .iter()
                .take(SCOPE_DIRECTIVE_MAX_RESOURCES)
                .map(|resource| resource.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let hidden = self
                .resources
                .len()
                .saturating_sub(SCOPE_DIRECTIVE_MAX_RESOURCES);
            if hidden > 0 {
                names.push_str(&format!(" (+{hidden} more)"));
            }
            lines.push(format!("Known resources: {names}"));
        }
        Some(lines.join("\n"))
    }
}

/// Injectable handle over the active scope snapshot and its refresh task.
#[derive(Clone)]
pub struct ActiveScope {
    inner: Arc<ActiveScopeInner>,
}

struct ActiveScopeInner {
    backend: Arc<dyn BackendQuery>,
    snapshot: ArcSwap<ScopeSnapshot>,
    generation: AtomicU64,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    refreshed: Notify,
}

impl ActiveScope {
    pub fn new(backend: Arc<dyn BackendQuery>) -> Self {
        Self {
            inner: Arc::new(ActiveScopeInner {
                backend,
                snapshot: ArcSwap::from_pointee(ScopeSnapshot::default()),
                generation: AtomicU64::new(0),
                refresh_task: Mutex::new(None),
                refreshed: Notify::new(),
            }),
        }
    }

    /// Switches the scope and starts a one-shot background refresh.
    ///
    /// The snapshot is replaced immediately with an empty resource list. Must be
    /// called from within a tokio runtime.
    pub fn set_scope(&self, resource_group: impl Into<String>) {
        let resource_group = resource_group.into().trim().to_string();
        let mut slot = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.snapshot.store(Arc::new(ScopeSnapshot {
            generation,
            resource_group: Some(resource_group.clone()),
            resources: Vec::new(),
            refresh: RefreshState::Pending,
        }));
        debug!(%resource_group, generation, "active scope set");

        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move {
            inner.refresh(generation, resource_group).await;
        }));
    }

    pub fn clear(&self) {
        let mut slot = self
            .inner
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.snapshot.store(Arc::new(ScopeSnapshot {
            generation,
            ..ScopeSnapshot::default()
        }));
        self.inner.refreshed.notify_waiters();
        debug!(generation, "active scope cleared");
    }

    pub fn scope(&self) -> Option<String> {
        self.inner.snapshot.load().resource_group.clone()
    }

    pub fn snapshot(&self) -> Arc<ScopeSnapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn resources(&self) -> Vec<ScopedResource> {
        self.inner.snapshot.load().resources.clone()
    }

    /// Returns `(mention, description)` pairs for every cached resource.
    pub fn completions(&self) -> Vec<(String, String)> {
        self.inner
            .snapshot
            .load()
            .resources
            .iter()
            .map(|resource| (resource.mention(), resource.description()))
            .collect()
    }

    /// Waits until the current snapshot is no longer pending.
    pub async fn wait_for_refresh(&self) -> Arc<ScopeSnapshot> {
        loop {
            let notified = self.inner.refreshed.notified();
            let snapshot = self.snapshot();
            if snapshot.refresh != RefreshState::Pending {
                return snapshot;
            }
            notified.await;
        }
    }
}

impl ActiveScopeInner {
    async fn refresh(&self, generation: u64, resource_group: String) {
        let args = az_args(["resource", "list", "-g", resource_group.as_str()]);
        let outcome = self
            .backend
            .query(&args, QueryBudget::Enumerate)
            .await
            .map_err(|error| error.to_string())
            .and_then(parse_resources);
        let (resources, refresh) = match outcome {
            Ok(resources) => {
                let count = resources.len();
                debug!(%resource_group, count, "scope refresh loaded resources");
                (resources, RefreshState::Loaded { count })
            }
            Err(reason) => {
                warn!(%resource_group, %reason, "scope refresh failed");
                (Vec::new(), RefreshState::Failed { reason })
            }
        };

        let current = self.snapshot.load_full();
        if current.generation != generation {
            debug!(generation, current = current.generation, "scope refresh superseded");
            return;
        }
        let next = Arc::new(ScopeSnapshot {
            generation,
            resource_group: current.resource_group.clone(),
            resources,
            refresh,
        });
        let previous = self.snapshot.compare_and_swap(&current, next);
        if Arc::ptr_eq(&*previous, &current) {
            self.refreshed.notify_waiters();
        } else {
            debug!(generation, "scope refresh lost compare-and-swap");
        }
    }
}

fn parse_resources(value: Value) -> Result<Vec<ScopedResource>, String> {
    let Value::Array(entries) = value else {
        return Err("malformed JSON output: expected a resource array".to_string());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<ResourceSummary>(entry).ok())
        .filter_map(ScopedResource::from_summary)
        .collect())
}
