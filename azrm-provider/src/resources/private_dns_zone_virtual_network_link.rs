//! azurerm_private_dns_zone_virtual_network_link

use std::collections::HashMap;

use azrm_core::provider::ProviderResult;
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::info;
use serde_json::{Value as Json, json};

use super::{
    ArmContext, arm_id_value, bool_or, delete_if_present, ensure_absent, gone, parse_id, required_str,
    tags_from_json, tags_to_json,
};
use crate::client::ArmClient;
use crate::ids::{ResourceIdentifier, VirtualNetworkId, VirtualNetworkLinkId};
use crate::validate;

pub const RESOURCE_TYPE: &str = "azurerm_private_dns_zone_virtual_network_link";
pub const API_VERSION: &str = super::private_dns_zone::API_VERSION;

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("Links a virtual network to a Private DNS zone")
        .attribute(
            AttributeSchema::new("name", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "private_dns_zone_name",
                validate::string("ZoneName", validate::zone_name),
            )
            .required()
            .force_new(),
        )
        .attribute(
            AttributeSchema::new("resource_group_name", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("virtual_network_id", validate::string("ArmId", validate::arm_id))
                .required()
                .force_new()
                .normalized_with(arm_id_value),
        )
        .attribute(
            AttributeSchema::new("registration_enabled", AttributeType::Bool).with_default(false),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
}

fn link_id(client: &ArmClient, resource: &Resource) -> ProviderResult<VirtualNetworkLinkId> {
    Ok(VirtualNetworkLinkId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "private_dns_zone_name")?,
        required_str(resource, "name")?,
    ))
}

fn expand(resource: &Resource) -> ProviderResult<Json> {
    let vnet: VirtualNetworkId = parse_virtual_network(required_str(resource, "virtual_network_id")?)?;
    Ok(json!({
        "location": "global",
        "tags": tags_to_json(&resource.attributes),
        "properties": {
            "virtualNetwork": { "id": vnet.to_string() },
            "registrationEnabled": bool_or(&resource.attributes, "registration_enabled", false),
        }
    }))
}

/// ARM returns lower-cased segments in some responses
fn parse_virtual_network(input: &str) -> ProviderResult<VirtualNetworkId> {
    VirtualNetworkId::parse_insensitively(input).or_else(|_| parse_id(input))
}

fn flatten(id: &VirtualNetworkLinkId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert("name".to_string(), Value::from(id.virtual_network_link_name.as_str()));
    attrs.insert(
        "private_dns_zone_name".to_string(),
        Value::from(id.private_dns_zone_name.as_str()),
    );
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );
    attrs.insert("tags".to_string(), tags_from_json(body.get("tags")));

    if let Some(props) = body.get("properties") {
        if let Some(vnet) = props
            .pointer("/virtualNetwork/id")
            .and_then(Json::as_str)
            .and_then(|raw| parse_virtual_network(raw).ok())
        {
            attrs.insert("virtual_network_id".to_string(), Value::from(vnet.to_string()));
        }
        attrs.insert(
            "registration_enabled".to_string(),
            Value::Bool(
                props
                    .get("registrationEnabled")
                    .and_then(Json::as_bool)
                    .unwrap_or(false),
            ),
        );
    }
    attrs
}

pub async fn create(client: &ArmClient, resource: &Resource) -> ProviderResult<State> {
    let id = link_id(client, resource)?;
    ensure_absent(client, RESOURCE_TYPE, &id, API_VERSION).await?;

    client
        .put(&id.to_string(), API_VERSION, expand(resource)?, None)
        .await
        .context("creating", &id)?;
    info!("{}: creation complete", id);

    read(client, &resource.id, &id.to_string()).await
}

pub async fn read(client: &ArmClient, rid: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let id: VirtualNetworkLinkId = parse_id(identifier)?;
    let body = match client.get(&id.to_string(), API_VERSION).await {
        Ok(body) => body,
        Err(e) if e.was_not_found() => return Ok(gone(rid, &id)),
        Err(e) => return Err(e).context("retrieving", &id),
    };
    Ok(State::existing(rid.clone(), flatten(&id, &body)).with_identifier(id.to_string()))
}

pub async fn update(
    client: &ArmClient,
    identifier: &str,
    resource: &Resource,
) -> ProviderResult<State> {
    let id: VirtualNetworkLinkId = parse_id(identifier)?;
    client
        .put(&id.to_string(), API_VERSION, expand(resource)?, None)
        .await
        .context("updating", &id)?;
    read(client, &resource.id, identifier).await
}

pub async fn delete(client: &ArmClient, identifier: &str) -> ProviderResult<()> {
    let id: VirtualNetworkLinkId = parse_id(identifier)?;
    delete_if_present(client, &id, API_VERSION).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use azrm_core::differ::{Diff, diff};
    use azrm_core::provider::ProviderErrorKind;
    use reqwest::Method;

    use crate::testing::{FakeArm, configured};

    const VNET: &str = "/subscriptions/00000000-0000-0000-0000-000000000000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1";

    fn link_path() -> String {
        VirtualNetworkLinkId::new(FakeArm::SUBSCRIPTION, "rg1", "example.internal", "link1")
            .to_string()
    }

    fn desired() -> Resource {
        Resource::new(RESOURCE_TYPE, "link")
            .with_attribute("name", "link1")
            .with_attribute("private_dns_zone_name", "example.internal")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute("virtual_network_id", VNET)
            .with_attribute("registration_enabled", true)
    }

    #[tokio::test]
    async fn create_links_virtual_network() {
        let arm = FakeArm::new();
        let state = create(&arm.client(), &desired()).await.unwrap();

        let body = arm.resource(&link_path()).unwrap();
        assert_eq!(body["location"], "global");
        assert_eq!(body["properties"]["virtualNetwork"]["id"], VNET);
        assert_eq!(body["properties"]["registrationEnabled"], true);
        assert_eq!(state.attributes["virtual_network_id"], Value::from(VNET));
        assert_eq!(state.attributes["registration_enabled"], Value::Bool(true));
    }

    #[tokio::test]
    async fn create_rejects_malformed_virtual_network_id() {
        let arm = FakeArm::new();
        let resource = desired().with_attribute(
            "virtual_network_id",
            "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Network/subnets/s1",
        );
        let err = create(&arm.client(), &resource).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidId);
        assert_eq!(arm.count(Method::PUT, &link_path()), 0);
    }

    #[tokio::test]
    async fn read_normalizes_lowercase_virtual_network_id() {
        let arm = FakeArm::new();
        arm.seed(
            &link_path(),
            json!({
                "location": "global",
                "properties": {
                    "virtualNetwork": {
                        "id": "/subscriptions/00000000-0000-0000-0000-000000000000/resourcegroups/rg1/providers/microsoft.network/virtualnetworks/vnet1"
                    },
                    "registrationEnabled": false
                }
            }),
        );

        let state = read(&arm.client(), &desired().id, &link_path()).await.unwrap();
        assert_eq!(state.attributes["virtual_network_id"], Value::from(VNET));
        assert_eq!(state.attributes["registration_enabled"], Value::Bool(false));
    }

    #[tokio::test]
    async fn read_missing_link_clears_state() {
        let arm = FakeArm::new();
        let state = read(&arm.client(), &desired().id, &link_path()).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn update_toggles_registration() {
        let arm = FakeArm::new();
        create(&arm.client(), &desired()).await.unwrap();

        let changed = desired().with_attribute("registration_enabled", false);
        let state = update(&arm.client(), &link_path(), &changed).await.unwrap();
        assert_eq!(state.attributes["registration_enabled"], Value::Bool(false));
    }

    #[tokio::test]
    async fn delete_removes_link() {
        let arm = FakeArm::new();
        create(&arm.client(), &desired()).await.unwrap();
        delete(&arm.client(), &link_path()).await.unwrap();
        assert!(arm.resource(&link_path()).is_none());
    }

    #[tokio::test]
    async fn plan_after_create_has_no_changes() {
        let arm = FakeArm::new();
        let schema = schema();
        let desired = configured(&schema, desired());

        create(&arm.client(), &desired).await.unwrap();
        let current = read(&arm.client(), &desired.id, &link_path()).await.unwrap();
        assert_eq!(
            diff(&desired, &current, Some(&schema)),
            Diff::NoChange(desired.id.clone())
        );
    }

    #[tokio::test]
    async fn virtual_network_id_casing_is_not_a_change() {
        let arm = FakeArm::new();
        let schema = schema();
        let desired = configured(
            &schema,
            desired().with_attribute(
                "virtual_network_id",
                "/subscriptions/00000000-0000-0000-0000-000000000000/resourcegroups/RG1/providers/microsoft.network/virtualnetworks/vnet1",
            ),
        );

        create(&arm.client(), &desired).await.unwrap();
        let current = read(&arm.client(), &desired.id, &link_path()).await.unwrap();
        assert_eq!(current.attributes["virtual_network_id"], Value::from(VNET.replace("rg1", "RG1")));
        assert_eq!(
            diff(&desired, &current, Some(&schema)),
            Diff::NoChange(desired.id.clone())
        );

        let other = desired.with_attribute("virtual_network_id", VNET.replace("vnet1", "vnet2"));
        assert!(matches!(
            diff(&other, &current, Some(&schema)),
            Diff::Replace { .. }
        ));
    }
}
