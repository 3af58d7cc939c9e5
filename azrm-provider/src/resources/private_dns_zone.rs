//! azurerm_private_dns_zone

use std::collections::HashMap;

use azrm_core::provider::ProviderResult;
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::info;
use serde_json::{Value as Json, json};

use super::{
    ArmContext, delete_if_present, ensure_absent, gone, parse_id, required_str, set_from_json,
    tags_from_json, tags_to_json,
};
use crate::client::ArmClient;
use crate::ids::PrivateDnsZoneId;
use crate::validate;

pub const RESOURCE_TYPE: &str = "azurerm_private_dns_zone";
pub const API_VERSION: &str = "2020-06-01";

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("A Private DNS zone")
        .attribute(
            AttributeSchema::new("name", validate::string("ZoneName", validate::zone_name))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("resource_group_name", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("number_of_record_sets", AttributeType::Int).read_only())
        .attribute(
            AttributeSchema::new("max_number_of_record_sets", AttributeType::Int).read_only(),
        )
        .attribute(
            AttributeSchema::new("max_number_of_virtual_network_links", AttributeType::Int)
                .read_only(),
        )
        .attribute(
            AttributeSchema::new(
                "max_number_of_virtual_network_links_with_registration",
                AttributeType::Int,
            )
            .read_only(),
        )
}

fn zone_id(client: &ArmClient, resource: &Resource) -> ProviderResult<PrivateDnsZoneId> {
    Ok(PrivateDnsZoneId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "name")?,
    ))
}

fn expand(attrs: &HashMap<String, Value>) -> Json {
    json!({
        "location": "global",
        "tags": tags_to_json(attrs),
    })
}

fn flatten(id: &PrivateDnsZoneId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert("name".to_string(), Value::from(id.private_dns_zone_name.as_str()));
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );
    attrs.insert("tags".to_string(), tags_from_json(body.get("tags")));

    let props = body.get("properties");
    for (key, field) in [
        ("number_of_record_sets", "numberOfRecordSets"),
        ("max_number_of_record_sets", "maxNumberOfRecordSets"),
        (
            "max_number_of_virtual_network_links",
            "maxNumberOfVirtualNetworkLinks",
        ),
        (
            "max_number_of_virtual_network_links_with_registration",
            "maxNumberOfVirtualNetworkLinksWithRegistration",
        ),
    ] {
        set_from_json(&mut attrs, key, props.and_then(|p| p.get(field)));
    }
    attrs
}

pub async fn create(client: &ArmClient, resource: &Resource) -> ProviderResult<State> {
    let id = zone_id(client, resource)?;
    ensure_absent(client, RESOURCE_TYPE, &id, API_VERSION).await?;

    client
        .put(&id.to_string(), API_VERSION, expand(&resource.attributes), None)
        .await
        .context("creating", &id)?;
    info!("{}: creation complete", id);

    read(client, &resource.id, &id.to_string()).await
}

pub async fn read(client: &ArmClient, rid: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let id: PrivateDnsZoneId = parse_id(identifier)?;
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
    let id: PrivateDnsZoneId = parse_id(identifier)?;
    client
        .put(&id.to_string(), API_VERSION, expand(&resource.attributes), None)
        .await
        .context("updating", &id)?;
    read(client, &resource.id, identifier).await
}

pub async fn delete(client: &ArmClient, identifier: &str) -> ProviderResult<()> {
    let id: PrivateDnsZoneId = parse_id(identifier)?;
    delete_if_present(client, &id, API_VERSION).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use azrm_core::differ::{Diff, diff};
    use azrm_core::provider::ProviderErrorKind;
    use reqwest::Method;

    use crate::client::ArmResponse;
    use crate::testing::{FakeArm, configured};

    fn zone_path() -> String {
        PrivateDnsZoneId::new(FakeArm::SUBSCRIPTION, "rg1", "example.internal").to_string()
    }

    fn desired() -> Resource {
        Resource::new(RESOURCE_TYPE, "example")
            .with_attribute("name", "example.internal")
            .with_attribute("resource_group_name", "rg1")
            .with_attribute(
                "tags",
                Value::Map(HashMap::from([("env".to_string(), Value::from("test"))])),
            )
    }

    #[tokio::test]
    async fn create_puts_global_zone() {
        let arm = FakeArm::new();
        let state = create(&arm.client(), &desired()).await.unwrap();

        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some(zone_path().as_str()));
        let body = arm.resource(&zone_path()).unwrap();
        assert_eq!(body["location"], "global");
        assert_eq!(body["tags"]["env"], "test");
    }

    #[tokio::test]
    async fn create_existing_zone_requires_import() {
        let arm = FakeArm::new();
        arm.seed(&zone_path(), json!({"location": "global"}));

        let err = create(&arm.client(), &desired()).await.unwrap_err();
        assert!(matches!(err.kind, ProviderErrorKind::AlreadyExists { .. }));
        assert_eq!(arm.count(Method::PUT, &zone_path()), 0);
    }

    #[tokio::test]
    async fn create_polls_async_operation() {
        let arm = FakeArm::new();
        arm.respond(
            Method::PUT,
            &zone_path(),
            ArmResponse::new(202).with_header(
                "Azure-AsyncOperation",
                format!("{}/operations/zone-op", FakeArm::ENDPOINT),
            ),
        );
        arm.respond(
            Method::GET,
            "/operations/zone-op",
            ArmResponse::new(200).with_body(json!({"status": "Succeeded"})),
        );

        let state = create(&arm.client(), &desired()).await.unwrap();
        assert!(state.exists);
        assert_eq!(arm.count(Method::GET, "/operations/zone-op"), 1);
    }

    #[tokio::test]
    async fn read_flattens_computed_counts() {
        let arm = FakeArm::new();
        arm.seed(
            &zone_path(),
            json!({
                "location": "global",
                "tags": {},
                "properties": {
                    "numberOfRecordSets": 3,
                    "maxNumberOfRecordSets": 25000,
                    "maxNumberOfVirtualNetworkLinks": 1000,
                    "maxNumberOfVirtualNetworkLinksWithRegistration": 100
                }
            }),
        );

        let state = read(&arm.client(), &desired().id, &zone_path()).await.unwrap();
        assert_eq!(state.attributes["name"], Value::from("example.internal"));
        assert_eq!(state.attributes["resource_group_name"], Value::from("rg1"));
        assert_eq!(state.attributes["number_of_record_sets"], Value::Int(3));
        assert_eq!(
            state.attributes["max_number_of_virtual_network_links_with_registration"],
            Value::Int(100)
        );
    }

    #[tokio::test]
    async fn read_missing_zone_clears_state() {
        let arm = FakeArm::new();
        let state = read(&arm.client(), &desired().id, &zone_path()).await.unwrap();
        assert!(!state.exists);
        assert!(state.identifier.is_none());
    }

    #[tokio::test]
    async fn read_rejects_foreign_id() {
        let arm = FakeArm::new();
        let err = read(&arm.client(), &desired().id, "/subscriptions/sub/resourceGroups/rg1")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidId);
    }

    #[tokio::test]
    async fn update_replaces_tags() {
        let arm = FakeArm::new();
        create(&arm.client(), &desired()).await.unwrap();

        let changed = desired().with_attribute(
            "tags",
            Value::Map(HashMap::from([("env".to_string(), Value::from("prod"))])),
        );
        let state = update(&arm.client(), &zone_path(), &changed).await.unwrap();
        assert_eq!(
            state.attributes["tags"],
            Value::Map(HashMap::from([("env".to_string(), Value::from("prod"))]))
        );
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let arm = FakeArm::new();
        create(&arm.client(), &desired()).await.unwrap();
        delete(&arm.client(), &zone_path()).await.unwrap();
        assert!(arm.resource(&zone_path()).is_none());

        arm.respond(
            Method::DELETE,
            &zone_path(),
            ArmResponse::new(404)
                .with_body(json!({"error": {"code": "NotFound", "message": "gone"}})),
        );
        delete(&arm.client(), &zone_path()).await.unwrap();
    }

    #[tokio::test]
    async fn plan_after_create_has_no_changes() {
        let arm = FakeArm::new();
        let schema = schema();
        let desired = configured(&schema, desired());

        create(&arm.client(), &desired).await.unwrap();
        let current = read(&arm.client(), &desired.id, &zone_path()).await.unwrap();
        assert_eq!(
            diff(&desired, &current, Some(&schema)),
            Diff::NoChange(desired.id.clone())
        );
    }
}
