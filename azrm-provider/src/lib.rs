//! azrm Azure Resource Manager Provider
//!
//! Manages API Management services, APIs and backends, and Private DNS
//! zones, record sets and virtual network links through the ARM REST API.
//!
//! ## Module Structure
//!
//! - `config` - Provider settings from the environment and configuration file
//! - `auth` - Bearer token sources (client secret, Azure CLI)
//! - `client` - ARM HTTP client with long-running operation polling
//! - `ids` - Typed ARM resource IDs
//! - `validate` - Attribute validators used by the schemas
//! - `resources` - Resource type definitions and CRUD modules
//! - `provider` - AzureProvider implementation

pub mod auth;
pub mod client;
pub mod config;
pub mod ids;
pub mod provider;
pub mod resources;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::{ApiManagementFeatures, Features, ProviderBlock, ProviderConfig};
pub use provider::{AzureProvider, parse_identifier};
pub use resources::schemas;

use azrm_core::provider::{BoxFuture, Provider, ProviderResult};
use azrm_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzureProvider {
    fn name(&self) -> &'static str {
        "azurerm"
    }

    fn resource_types(&self) -> Vec<Box<dyn azrm_core::provider::ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(id, &identifier, &from, to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }

    fn import<'a>(
        &'a self,
        id: &'a ResourceId,
        identifier: &'a str,
    ) -> BoxFuture<'a, ProviderResult<State>> {
        Box::pin(async move { self.import_resource(id, identifier).await })
    }
}
