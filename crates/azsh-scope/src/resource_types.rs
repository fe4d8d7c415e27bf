//! Static mapping between Azure resource types and mention prefixes.

/// One row of the resource-type abbreviation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTypeAlias {
    pub resource_type: &'static str,
    pub abbreviation: &'static str,
    pub display_name: &'static str,
}

pub const RESOURCE_TYPE_ALIASES: &[ResourceTypeAlias] = &[
    ResourceTypeAlias {
        resource_type: "Microsoft.Compute/virtualMachines",
        abbreviation: "vm",
        display_name: "VM",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.ContainerService/managedClusters",
        abbreviation: "aks",
        display_name: "AKS Cluster",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Storage/storageAccounts",
        abbreviation: "storage",
        display_name: "Storage Account",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Web/sites",
        abbreviation: "webapp",
        display_name: "Web App",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Sql/servers",
        abbreviation: "sql",
        display_name: "SQL Server",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Network/virtualNetworks",
        abbreviation: "vnet",
        display_name: "Virtual Network",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Network/networkSecurityGroups",
        abbreviation: "nsg",
        display_name: "Network Security Group",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Network/publicIPAddresses",
        abbreviation: "pip",
        display_name: "Public IP",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Network/loadBalancers",
        abbreviation: "lb",
        display_name: "Load Balancer",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.KeyVault/vaults",
        abbreviation: "kv",
        display_name: "Key Vault",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.ContainerRegistry/registries",
        abbreviation: "acr",
        display_name: "Container Registry",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.DBforPostgreSQL/flexibleServers",
        abbreviation: "pg",
        display_name: "PostgreSQL Server",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.DBforMySQL/flexibleServers",
        abbreviation: "mysql",
        display_name: "MySQL Server",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.Insights/components",
        abbreviation: "appinsights",
        display_name: "Application Insights",
    },
    ResourceTypeAlias {
        resource_type: "Microsoft.OperationalInsights/workspaces",
        abbreviation: "loganalytics",
        display_name: "Log Analytics Workspace",
    },
];

/// Maps a full resource type (any casing) to its mention prefix.
pub fn short_resource_type(resource_type: &str) -> Option<&'static str> {
    RESOURCE_TYPE_ALIASES
        .iter()
        .find(|alias| alias.resource_type.eq_ignore_ascii_case(resource_type.trim()))
        .map(|alias| alias.abbreviation)
}

pub fn alias_for_abbreviation(abbreviation: &str) -> Option<&'static ResourceTypeAlias> {
    RESOURCE_TYPE_ALIASES
        .iter()
        .find(|alias| alias.abbreviation == abbreviation)
}
