//! Provider configuration
//!
//! Settings come from `ARM_*` environment variables and are overridden by the
//! `provider` block of the configuration file.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a subscription ID must be set via ARM_SUBSCRIPTION_ID or the provider block")]
    MissingSubscription,

    #[error("unknown cloud environment {0:?} (expected public, usgovernment or china)")]
    InvalidEnvironment(String),

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("client secret authentication requires tenant_id, client_id and client_secret")]
    IncompleteServicePrincipal,
}

/// Azure cloud the provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudEnvironment {
    #[default]
    Public,
    UsGovernment,
    China,
}

impl CloudEnvironment {
    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "https://management.azure.com",
            CloudEnvironment::UsGovernment => "https://management.usgovcloudapi.net",
            CloudEnvironment::China => "https://management.chinacloudapi.cn",
        }
    }

    pub fn authority_host(&self) -> &'static str {
        match self {
            CloudEnvironment::Public => "https://login.microsoftonline.com",
            CloudEnvironment::UsGovernment => "https://login.microsoftonline.us",
            CloudEnvironment::China => "https://login.chinacloudapi.cn",
        }
    }

    /// OAuth2 scope for the resource manager endpoint
    pub fn token_scope(&self) -> String {
        format!("{}/.default", self.resource_manager_endpoint())
    }
}

impl FromStr for CloudEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" | "azurecloud" => Ok(CloudEnvironment::Public),
            "usgovernment" | "azureusgovernment" => Ok(CloudEnvironment::UsGovernment),
            "china" | "azurechinacloud" => Ok(CloudEnvironment::China),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for CloudEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloudEnvironment::Public => "public",
            CloudEnvironment::UsGovernment => "usgovernment",
            CloudEnvironment::China => "china",
        };
        write!(f, "{}", name)
    }
}

fn enabled() -> bool {
    true
}

/// Behaviour switches for API Management services
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiManagementFeatures {
    /// Purge the soft-deleted service after a destroy
    #[serde(default = "enabled")]
    pub purge_soft_delete_on_destroy: bool,
    /// Recover a soft-deleted service of the same name instead of failing
    #[serde(default = "enabled")]
    pub recover_soft_deleted: bool,
}

impl Default for ApiManagementFeatures {
    fn default() -> Self {
        Self {
            purge_soft_delete_on_destroy: true,
            recover_soft_deleted: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub api_management: ApiManagementFeatures,
}

/// `provider` block of the configuration file; every field overrides the environment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderBlock {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub environment: Option<String>,
    pub use_cli: Option<bool>,
    pub poll_interval_secs: Option<u64>,
    pub features: Option<Features>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub subscription_id: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub environment: CloudEnvironment,
    pub use_cli: bool,
    pub poll_interval: Duration,
    pub features: Features,
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

impl ProviderConfig {
    /// Load configuration from the process environment
    pub fn from_env(block: Option<&ProviderBlock>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), block)
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        block: Option<&ProviderBlock>,
    ) -> Result<Self, ConfigError> {
        let env = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let empty = ProviderBlock::default();
        let block = block.unwrap_or(&empty);

        let subscription_id = block
            .subscription_id
            .clone()
            .or_else(|| env("ARM_SUBSCRIPTION_ID"))
            .ok_or(ConfigError::MissingSubscription)?;

        let environment = match block.environment.clone().or_else(|| env("ARM_ENVIRONMENT")) {
            Some(name) => name.parse()?,
            None => CloudEnvironment::Public,
        };

        let use_cli = match block.use_cli {
            Some(v) => v,
            None => match env("ARM_USE_CLI") {
                Some(v) => parse_bool("ARM_USE_CLI", &v)?,
                None => false,
            },
        };

        let poll_interval = match block.poll_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => match env("ARM_POLL_INTERVAL_SECS") {
                Some(v) => Duration::from_secs(v.parse().map_err(|_| {
                    ConfigError::InvalidValue {
                        name: "ARM_POLL_INTERVAL_SECS".to_string(),
                        value: v.clone(),
                    }
                })?),
                None => DEFAULT_POLL_INTERVAL,
            },
        };

        let config = Self {
            subscription_id,
            tenant_id: block.tenant_id.clone().or_else(|| env("ARM_TENANT_ID")),
            client_id: block.client_id.clone().or_else(|| env("ARM_CLIENT_ID")),
            client_secret: block
                .client_secret
                .clone()
                .or_else(|| env("ARM_CLIENT_SECRET")),
            environment,
            use_cli,
            poll_interval,
            features: block.features.clone().unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Whether a service principal secret is configured
    pub fn has_client_secret(&self) -> bool {
        self.client_secret.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.use_cli
            && self.client_secret.is_some()
            && (self.tenant_id.is_none() || self.client_id.is_none())
        {
            return Err(ConfigError::IncompleteServicePrincipal);
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn loads_from_environment() {
        let config = ProviderConfig::from_lookup(
            lookup(&[
                ("ARM_SUBSCRIPTION_ID", "00000000-0000-0000-0000-000000000000"),
                ("ARM_TENANT_ID", "tenant"),
                ("ARM_CLIENT_ID", "client"),
                ("ARM_CLIENT_SECRET", "secret"),
                ("ARM_ENVIRONMENT", "usgovernment"),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(config.subscription_id, "00000000-0000-0000-0000-000000000000");
        assert_eq!(config.environment, CloudEnvironment::UsGovernment);
        assert!(config.has_client_secret());
        assert!(!config.use_cli);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.features.api_management.recover_soft_deleted);
    }

    #[test]
    fn provider_block_overrides_environment() {
        let block: ProviderBlock = serde_json::from_value(serde_json::json!({
            "subscription_id": "from-block",
            "use_cli": true,
            "poll_interval_secs": 2,
            "features": {"api_management": {"purge_soft_delete_on_destroy": false}}
        }))
        .unwrap();

        let config =
            ProviderConfig::from_lookup(lookup(&[("ARM_SUBSCRIPTION_ID", "from-env")]), Some(&block))
                .unwrap();

        assert_eq!(config.subscription_id, "from-block");
        assert!(config.use_cli);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(!config.features.api_management.purge_soft_delete_on_destroy);
        assert!(config.features.api_management.recover_soft_deleted);
    }

    #[test]
    fn missing_subscription_is_an_error() {
        let err = ProviderConfig::from_lookup(lookup(&[]), None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSubscription));
    }

    #[test]
    fn incomplete_service_principal_is_an_error() {
        let err = ProviderConfig::from_lookup(
            lookup(&[("ARM_SUBSCRIPTION_ID", "sub"), ("ARM_CLIENT_SECRET", "secret")]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::IncompleteServicePrincipal));
    }

    #[test]
    fn environment_names() {
        assert_eq!(
            "AzureChinaCloud".parse::<CloudEnvironment>().unwrap(),
            CloudEnvironment::China
        );
        assert!("mars".parse::<CloudEnvironment>().is_err());
        assert_eq!(
            CloudEnvironment::Public.token_scope(),
            "https://management.azure.com/.default"
        );
    }
}
