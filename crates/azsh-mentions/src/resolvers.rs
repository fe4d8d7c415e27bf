//! Built-in resolvers for each mention grammar.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use azsh_backend::{
    az_args, display_or, Account, BackendQuery, ManagedCluster, QueryBudget, ResourceGroup,
    ResourceSummary, VirtualMachine,
};
use azsh_scope::{alias_for_abbreviation, ActiveScope, ResourceTypeAlias, ScopedResource};
use serde_json::Value;

use crate::{MentionError, MentionResolver, ResolvedMention};

const SUBSCRIPTION_LABEL: &str = "the current subscription";

/// Environment lookup used for Cloud Shell hints.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads process environment variables, ignoring blank values.
pub fn process_env() -> EnvLookup {
    Arc::new(|key: &str| {
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
    })
}

fn first_entry<T: serde::de::DeserializeOwned>(value: Value) -> Result<Option<T>, MentionError> {
    let Value::Array(entries) = value else {
        return Err(MentionError::Malformed("expected a JSON array".to_string()));
    };
    match entries.into_iter().next() {
        Some(entry) => Ok(Some(serde_json::from_value(entry)?)),
        None => Ok(None),
    }
}

fn name_query(name: &str) -> String {
    format!("[?name=='{name}']")
}

/// `@sub`: Cloud Shell environment hints, then `az account show`.
pub struct SubscriptionResolver {
    backend: Arc<dyn BackendQuery>,
    env: EnvLookup,
}

impl SubscriptionResolver {
    pub fn new(backend: Arc<dyn BackendQuery>, env: EnvLookup) -> Self {
        Self { backend, env }
    }

    fn from_env(&self) -> Option<String> {
        let subscription_id = (self.env)("ACC_USER_SUBSCRIPTION")?;
        let hint = |key: &str| (self.env)(key).unwrap_or_else(|| "unknown".to_string());
        Some(format!(
            "[Azure Context: Current Subscription]\nSubscription ID: {subscription_id}, Tenant: {}, Region: {}, User: {}, Session: {}",
            hint("ACC_TID"),
            hint("ACC_LOCATION"),
            hint("USER"),
            hint("ACC_SESSION_TYPE"),
        ))
    }
}

#[async_trait]
impl MentionResolver for SubscriptionResolver {
    async fn resolve(&self, _identifier: &str) -> Result<ResolvedMention, MentionError> {
        if let Some(block) = self.from_env() {
            return Ok(ResolvedMention::new(block, SUBSCRIPTION_LABEL));
        }
        let value = self
            .backend
            .query(&az_args(["account", "show"]), QueryBudget::Lookup)
            .await?;
        let account: Account = serde_json::from_value(value)?;
        let block = format!(
            "[Azure Context: Subscription '{}']\nID: {}, Tenant: {}, User: {}, State: {}",
            display_or(&account.name, "unknown"),
            display_or(&account.id, "unknown"),
            display_or(&account.tenant_id, "unknown"),
            account.user_name().unwrap_or("unknown"),
            display_or(&account.state, "unknown"),
        );
        Ok(ResolvedMention::new(block, SUBSCRIPTION_LABEL))
    }
}

/// `@rg:<name>`: group details plus its resource list.
pub struct ResourceGroupResolver {
    backend: Arc<dyn BackendQuery>,
}

impl ResourceGroupResolver {
    pub fn new(backend: Arc<dyn BackendQuery>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl MentionResolver for ResourceGroupResolver {
    async fn resolve(&self, name: &str) -> Result<ResolvedMention, MentionError> {
        let group: ResourceGroup = serde_json::from_value(
            self.backend
                .query(&az_args(["group", "show", "-n", name]), QueryBudget::Lookup)
                .await?,
        )?;
        let resources: Vec<ResourceSummary> = serde_json::from_value(
            self.backend
                .query(&az_args(["resource", "list", "-g", name]), QueryBudget::Lookup)
                .await?,
        )?;

        let resource_lines = if resources.is_empty() {
            "  (none)".to_string()
        } else {
            resources
                .iter()
                .map(|resource| {
                    format!(
                        "  - {} ({}) [{}]",
                        display_or(&resource.name, "?"),
                        display_or(&resource.resource_type, "?"),
                        display_or(&resource.location, "?"),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let block = format!(
            "[Azure Context: Resource Group '{name}']\nLocation: {}, Tags: {}, Provisioning: {}\nResources:\n{resource_lines}",
            display_or(&group.location, "unknown"),
            group.tags_text(),
            group.provisioning_state().unwrap_or("unknown"),
        );
        Ok(ResolvedMention::new(block, format!("resource group '{name}'")))
    }
}

/// `@vm:<name>`: details from `az vm list -d`.
pub struct VirtualMachineResolver {
    backend: Arc<dyn BackendQuery>,
}

impl VirtualMachineResolver {
    pub fn new(backend: Arc<dyn BackendQuery>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl MentionResolver for VirtualMachineResolver {
    async fn resolve(&self, name: &str) -> Result<ResolvedMention, MentionError> {
        let query = name_query(name);
        let value = self
            .backend
            .query(
                &az_args(["vm", "list", "-d", "--query", query.as_str()]),
                QueryBudget::Lookup,
            )
            .await?;
        let vm: VirtualMachine =
            first_entry(value)?.ok_or_else(|| MentionError::NotFound("VM not found".to_string()))?;
        let block = format!(
            "[Azure Context: VM '{name}']\nResource Group: {}, Location: {}\nSize: {}, OS: {}, Power State: {}\nPublic IP: {}, Private IP: {}",
            display_or(&vm.resource_group, "unknown"),
            display_or(&vm.location, "unknown"),
            vm.vm_size().unwrap_or("unknown"),
            vm.os_type().unwrap_or("unknown"),
            display_or(&vm.power_state, "unknown"),
            display_or(&vm.public_ips, "none"),
            display_or(&vm.private_ips, "none"),
        );
        Ok(ResolvedMention::new(block, format!("VM '{name}'")))
    }
}

/// `@aks:<name>`: cluster version and node pools.
pub struct AksClusterResolver {
    backend: Arc<dyn BackendQuery>,
}

impl AksClusterResolver {
    pub fn new(backend: Arc<dyn BackendQuery>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl MentionResolver for AksClusterResolver {
    async fn resolve(&self, name: &str) -> Result<ResolvedMention, MentionError> {
        let query = name_query(name);
        let value = self
            .backend
            .query(
                &az_args(["aks", "list", "--query", query.as_str()]),
                QueryBudget::Lookup,
            )
            .await?;
        let cluster: ManagedCluster = first_entry(value)?
            .ok_or_else(|| MentionError::NotFound("cluster not found".to_string()))?;

        let pools = cluster.agent_pool_profiles.unwrap_or_default();
        let pool_lines = if pools.is_empty() {
            "  (none)".to_string()
        } else {
            pools
                .iter()
                .map(|pool| {
                    format!(
                        "  - {}: {} nodes ({})",
                        display_or(&pool.name, "?"),
                        pool.count
                            .map(|count| count.to_string())
                            .unwrap_or_else(|| "?".to_string()),
                        display_or(&pool.vm_size, "?"),
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let block = format!(
            "[Azure Context: AKS Cluster '{name}']\nVersion: {}, FQDN: {}, Provisioning: {}\nNode Pools:\n{pool_lines}",
            display_or(&cluster.kubernetes_version, "unknown"),
            display_or(&cluster.fqdn, "unknown"),
            display_or(&cluster.provisioning_state, "unknown"),
        );
        Ok(ResolvedMention::new(block, format!("AKS cluster '{name}'")))
    }
}

/// `@file:<path>`: embeds the whole file.
pub struct FileResolver {
    home: Option<PathBuf>,
}

impl FileResolver {
    pub fn new(home: Option<PathBuf>) -> Self {
        Self { home }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os("HOME").map(PathBuf::from))
    }

    fn expand(&self, path: &str) -> PathBuf {
        match (&self.home, path.strip_prefix('~')) {
            (Some(home), Some("")) => home.clone(),
            (Some(home), Some(rest)) if rest.starts_with('/') => {
                home.join(rest.trim_start_matches('/'))
            }
            _ => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl MentionResolver for FileResolver {
    async fn resolve(&self, path: &str) -> Result<ResolvedMention, MentionError> {
        let expanded = self.expand(path);
        let contents = match tokio::fs::read_to_string(&expanded).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(MentionError::NotFound("file not found".to_string()));
            }
            Err(error) => return Err(MentionError::Io(error.to_string())),
        };
        Ok(ResolvedMention::new(
            format!("[Azure Context: File '{path}']\n{contents}"),
            format!("file '{path}'"),
        ))
    }
}

fn resource_block(display: &str, name: &str, summary: &ResourceSummary) -> String {
    format!(
        "[Azure Context: {display} '{name}']\nType: {}, Resource Group: {}, Location: {}\nID: {}",
        display_or(&summary.resource_type, "unknown"),
        display_or(&summary.resource_group, "unknown"),
        display_or(&summary.location, "unknown"),
        display_or(&summary.id, "unknown"),
    )
}

/// Typed `@<abbr>:<name>` lookup filtered by resource type.
pub struct TypedResourceResolver {
    backend: Arc<dyn BackendQuery>,
    scope: ActiveScope,
    alias: &'static ResourceTypeAlias,
}

impl TypedResourceResolver {
    pub fn new(
        backend: Arc<dyn BackendQuery>,
        scope: ActiveScope,
        alias: &'static ResourceTypeAlias,
    ) -> Self {
        Self {
            backend,
            scope,
            alias,
        }
    }
}

#[async_trait]
impl MentionResolver for TypedResourceResolver {
    async fn resolve(&self, name: &str) -> Result<ResolvedMention, MentionError> {
        let query = format!(
            "[?name=='{name}' && type=='{}']",
            self.alias.resource_type
        );
        let mut args = az_args(["resource", "list", "--query", query.as_str()]);
        if let Some(resource_group) = self.scope.scope() {
            args.extend(az_args(["-g", resource_group.as_str()]));
        }
        let value = self.backend.query(&args, QueryBudget::Lookup).await?;
        let summary: ResourceSummary = first_entry(value)?.ok_or_else(|| {
            MentionError::NotFound(format!("{} not found", self.alias.display_name))
        })?;
        Ok(ResolvedMention::new(
            resource_block(self.alias.display_name, name, &summary),
            format!("{} '{name}'", self.alias.display_name.to_lowercase()),
        ))
    }
}

/// Bare `@<name>` for resources cached in the active scope.
pub struct ScopedNameResolver {
    backend: Arc<dyn BackendQuery>,
    scope: ActiveScope,
}

impl ScopedNameResolver {
    pub fn new(backend: Arc<dyn BackendQuery>, scope: ActiveScope) -> Self {
        Self { backend, scope }
    }

    fn cached_summary(resource: &ScopedResource, resource_group: Option<String>) -> ResourceSummary {
        ResourceSummary {
            id: resource.id.clone(),
            name: Some(resource.name.clone()),
            resource_type: Some(resource.resource_type.clone()),
            location: Some(resource.location.clone()),
            resource_group,
        }
    }
}

#[async_trait]
impl MentionResolver for ScopedNameResolver {
    fn claims(&self, identifier: &str) -> bool {
        self.scope.snapshot().find_resource(identifier).is_some()
    }

    async fn resolve(&self, name: &str) -> Result<ResolvedMention, MentionError> {
        let snapshot = self.scope.snapshot();
        let resource = snapshot
            .find_resource(name)
            .ok_or_else(|| MentionError::NotFound("resource not in active scope".to_string()))?;
        let summary = match resource.id.as_deref() {
            Some(id) => serde_json::from_value(
                self.backend
                    .query(&az_args(["resource", "show", "--ids", id]), QueryBudget::Lookup)
                    .await?,
            )?,
            None => Self::cached_summary(resource, snapshot.resource_group.clone()),
        };
        let display = azsh_scope::short_resource_type(&resource.resource_type)
            .and_then(alias_for_abbreviation)
            .map(|alias| alias.display_name)
            .unwrap_or("Resource");
        Ok(ResolvedMention::new(
            resource_block(display, name, &summary),
            format!("resource '{name}'"),
        ))
    }
}
