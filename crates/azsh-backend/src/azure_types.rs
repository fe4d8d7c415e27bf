//! Typed views over the `az` JSON payloads the shell reads.
//!
//! Every field is optional: the CLI omits or nulls fields freely across
//! versions, and a missing field should render as a fallback rather than fail
//! the whole lookup.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Returns the field text, or `fallback` when it is missing or blank.
pub fn display_or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => fallback,
    }
}

/// `az account show` / `az account list` entry.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub name: Option<String>,
    pub id: Option<String>,
    pub tenant_id: Option<String>,
    pub user: Option<AccountUser>,
    pub state: Option<String>,
    pub cloud_name: Option<String>,
    pub is_default: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountUser {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Account {
    pub fn user_name(&self) -> Option<&str> {
        self.user.as_ref().and_then(|user| user.name.as_deref())
    }

    pub fn user_kind(&self) -> Option<&str> {
        self.user.as_ref().and_then(|user| user.kind.as_deref())
    }
}

/// `az group show` payload.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceGroup {
    pub name: Option<String>,
    pub location: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub properties: Option<ResourceGroupProperties>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceGroupProperties {
    pub provisioning_state: Option<String>,
}

impl ResourceGroup {
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|properties| properties.provisioning_state.as_deref())
    }

    /// Renders tags as `k=v, k2=v2`, or `none`.
    pub fn tags_text(&self) -> String {
        match &self.tags {
            Some(tags) if !tags.is_empty() => tags
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "none".to_string(),
        }
    }
}

/// One entry of `az resource list`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSummary {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    pub location: Option<String>,
    pub resource_group: Option<String>,
}

/// One entry of `az vm list -d`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualMachine {
    pub name: Option<String>,
    pub location: Option<String>,
    pub resource_group: Option<String>,
    pub power_state: Option<String>,
    pub public_ips: Option<String>,
    pub private_ips: Option<String>,
    pub hardware_profile: Option<HardwareProfile>,
    pub storage_profile: Option<StorageProfile>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HardwareProfile {
    pub vm_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageProfile {
    pub os_disk: Option<OsDisk>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OsDisk {
    pub os_type: Option<String>,
}

impl VirtualMachine {
    pub fn vm_size(&self) -> Option<&str> {
        self.hardware_profile
            .as_ref()
            .and_then(|profile| profile.vm_size.as_deref())
    }

    pub fn os_type(&self) -> Option<&str> {
        self.storage_profile
            .as_ref()
            .and_then(|profile| profile.os_disk.as_ref())
            .and_then(|disk| disk.os_type.as_deref())
    }
}

/// One entry of `az aks list`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedCluster {
    pub name: Option<String>,
    pub kubernetes_version: Option<String>,
    pub fqdn: Option<String>,
    pub provisioning_state: Option<String>,
    pub agent_pool_profiles: Option<Vec<AgentPoolProfile>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentPoolProfile {
    pub name: Option<String>,
    pub count: Option<u64>,
    pub vm_size: Option<String>,
}
