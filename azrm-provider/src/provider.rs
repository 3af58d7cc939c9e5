//! Azure Resource Manager provider implementation
//!
//! Dispatches each resource type onto its CRUD module and runs every call
//! under the timeout declared in the type's schema.

use std::sync::Arc;

use azrm_core::provider::{ProviderError, ProviderResult};
use azrm_core::resource::{Resource, ResourceId, State};
use azrm_core::schema::ResourceSchema;
use log::debug;

use crate::auth::Credential;
use crate::client::{ArmClient, HttpTransport, with_timeout};
use crate::config::{Features, ProviderConfig};
use crate::ids::{
    ApiManagementApiId, ApiManagementBackendId, ApiManagementServiceId, PrivateDnsZoneId,
    ResourceIdentifier, VirtualNetworkLinkId,
};
use crate::resources::private_dns_record::{self, RecordType};
use crate::resources::{
    api_management, api_management_api, api_management_backend, parse_id, private_dns_zone,
    private_dns_zone_virtual_network_link,
};

/// Resource families handled by this provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Service,
    Api,
    Backend,
    Zone,
    Link,
    Record(RecordType),
}

impl Kind {
    fn of(resource_type: &str) -> ProviderResult<Self> {
        let kind = match resource_type {
            api_management::RESOURCE_TYPE => Kind::Service,
            api_management_api::RESOURCE_TYPE => Kind::Api,
            api_management_backend::RESOURCE_TYPE => Kind::Backend,
            private_dns_zone::RESOURCE_TYPE => Kind::Zone,
            private_dns_zone_virtual_network_link::RESOURCE_TYPE => Kind::Link,
            other => match RecordType::from_resource_type(other) {
                Some(record_type) => Kind::Record(record_type),
                None => {
                    return Err(ProviderError::new(format!(
                        "Unknown resource type: {}",
                        resource_type
                    )));
                }
            },
        };
        Ok(kind)
    }

    fn schema(self) -> ResourceSchema {
        match self {
            Kind::Service => api_management::schema(),
            Kind::Api => api_management_api::schema(),
            Kind::Backend => api_management_backend::schema(),
            Kind::Zone => private_dns_zone::schema(),
            Kind::Link => private_dns_zone_virtual_network_link::schema(),
            Kind::Record(record_type) => private_dns_record::schema(record_type),
        }
    }
}

fn segments_of<I: ResourceIdentifier>(identifier: &str) -> ProviderResult<Vec<(&'static str, String)>> {
    Ok(parse_id::<I>(identifier)?.segments())
}

/// Parse `identifier` with the ID parser of `resource_type`
pub fn parse_identifier(
    resource_type: &str,
    identifier: &str,
) -> ProviderResult<Vec<(&'static str, String)>> {
    match Kind::of(resource_type)? {
        Kind::Service => segments_of::<ApiManagementServiceId>(identifier),
        Kind::Api => segments_of::<ApiManagementApiId>(identifier),
        Kind::Backend => segments_of::<ApiManagementBackendId>(identifier),
        Kind::Zone => segments_of::<PrivateDnsZoneId>(identifier),
        Kind::Link => segments_of::<VirtualNetworkLinkId>(identifier),
        Kind::Record(record_type) => {
            Ok(private_dns_record::parse_record_id(record_type, identifier)?.segments())
        }
    }
}

/// Azure Resource Manager Provider
pub struct AzureProvider {
    client: ArmClient,
    features: Features,
}

impl AzureProvider {
    /// Build a provider that talks to the configured cloud
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("azrm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::new("building HTTP client").with_cause(e))?;
        let credential = Credential::from_config(config, http.clone())
            .map_err(|e| ProviderError::new("configuring Azure credentials").with_cause(e))?;
        let client = ArmClient::new(
            Arc::new(HttpTransport::new(http, credential)),
            config.environment.resource_manager_endpoint(),
            &config.subscription_id,
            config.poll_interval,
        );
        Ok(Self::with_client(client, config.features.clone()))
    }

    /// Build a provider around an existing client
    pub fn with_client(client: ArmClient, features: Features) -> Self {
        Self { client, features }
    }

    pub fn subscription_id(&self) -> &str {
        self.client.subscription_id()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let kind = Kind::of(&id.resource_type)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };
        let client = &self.client;

        with_timeout(kind.schema().timeouts.read, async {
            match kind {
                Kind::Service => api_management::read(client, id, identifier).await,
                Kind::Api => api_management_api::read(client, id, identifier).await,
                Kind::Backend => api_management_backend::read(client, id, identifier).await,
                Kind::Zone => private_dns_zone::read(client, id, identifier).await,
                Kind::Link => {
                    private_dns_zone_virtual_network_link::read(client, id, identifier).await
                }
                Kind::Record(record_type) => {
                    private_dns_record::read(client, record_type, id, identifier).await
                }
            }
        })
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn create_resource(&self, resource: Resource) -> ProviderResult<State> {
        let kind = Kind::of(&resource.id.resource_type)?;
        let client = &self.client;
        let features = &self.features.api_management;
        debug!("creating {}", resource.id);

        with_timeout(kind.schema().timeouts.create, async {
            match kind {
                Kind::Service => api_management::create(client, features, &resource).await,
                Kind::Api => api_management_api::create(client, &resource).await,
                Kind::Backend => api_management_backend::create(client, &resource).await,
                Kind::Zone => private_dns_zone::create(client, &resource).await,
                Kind::Link => private_dns_zone_virtual_network_link::create(client, &resource).await,
                Kind::Record(record_type) => {
                    private_dns_record::create(client, record_type, &resource).await
                }
            }
        })
        .await
        .map_err(|e| e.for_resource(resource.id.clone()))
    }

    pub async fn update_resource(
        &self,
        id: ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let kind = Kind::of(&id.resource_type)?;
        let client = &self.client;
        debug!("updating {}", id);

        with_timeout(kind.schema().timeouts.update, async {
            match kind {
                Kind::Service => api_management::update(client, identifier, &to).await,
                Kind::Api => api_management_api::update(client, identifier, from, &to).await,
                Kind::Backend => api_management_backend::update(client, identifier, &to).await,
                Kind::Zone => private_dns_zone::update(client, identifier, &to).await,
                Kind::Link => {
                    private_dns_zone_virtual_network_link::update(client, identifier, &to).await
                }
                Kind::Record(record_type) => {
                    private_dns_record::update(client, record_type, identifier, &to).await
                }
            }
        })
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let kind = Kind::of(&id.resource_type)?;
        let client = &self.client;
        let features = &self.features.api_management;
        debug!("deleting {}", id);

        with_timeout(kind.schema().timeouts.delete, async {
            match kind {
                Kind::Service => api_management::delete(client, features, identifier).await,
                Kind::Api => api_management_api::delete(client, identifier).await,
                Kind::Backend => api_management_backend::delete(client, identifier).await,
                Kind::Zone => private_dns_zone::delete(client, identifier).await,
                Kind::Link => private_dns_zone_virtual_network_link::delete(client, identifier).await,
                Kind::Record(record_type) => {
                    private_dns_record::delete(client, record_type, identifier).await
                }
            }
        })
        .await
        .map_err(|e| e.for_resource(id.clone()))
    }

    /// Read an existing resource after checking its ID has the right shape
    pub async fn import_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<State> {
        parse_identifier(&id.resource_type, identifier).map_err(|e| e.for_resource(id.clone()))?;

        let state = self.read_resource(id, Some(identifier)).await?;
        if !state.exists {
            return Err(ProviderError::not_found(format!(
                "cannot import non-existent remote object {}",
                identifier
            ))
            .for_resource(id.clone()));
        }
        Ok(state)
    }
}
