//! Resource type definitions
//!
//! This module defines:
//! - Resource type definitions (implementing the ResourceType trait)
//! - Helpers shared by the CRUD modules: attribute access, tag
//!   conversion, existence checks and ARM error wrapping

use std::collections::HashMap;
use std::fmt::Display;

use azrm_core::provider::{ProviderError, ProviderErrorKind, ProviderResult, ResourceType};
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::ResourceSchema;
use log::info;
use serde_json::{Map, Value as Json};

use crate::client::{ArmClient, ArmError, ArmResult};
use crate::ids::{IdParseError, ResourceIdentifier};

pub mod api_management;
pub mod api_management_api;
pub mod api_management_backend;
pub mod private_dns_record;
pub mod private_dns_zone;
pub mod private_dns_zone_virtual_network_link;

use private_dns_record::RecordType;

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, $schema:expr) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn schema(&self) -> ResourceSchema {
                $schema
            }
        }
    };
}

define_resource_type!(
    ApiManagementType,
    api_management::RESOURCE_TYPE,
    api_management::schema()
);
define_resource_type!(
    ApiManagementApiType,
    api_management_api::RESOURCE_TYPE,
    api_management_api::schema()
);
define_resource_type!(
    ApiManagementBackendType,
    api_management_backend::RESOURCE_TYPE,
    api_management_backend::schema()
);
define_resource_type!(
    PrivateDnsZoneType,
    private_dns_zone::RESOURCE_TYPE,
    private_dns_zone::schema()
);
define_resource_type!(
    PrivateDnsZoneVirtualNetworkLinkType,
    private_dns_zone_virtual_network_link::RESOURCE_TYPE,
    private_dns_zone_virtual_network_link::schema()
);
define_resource_type!(
    PrivateDnsARecordType,
    RecordType::A.resource_type(),
    private_dns_record::schema(RecordType::A)
);
define_resource_type!(
    PrivateDnsAaaaRecordType,
    RecordType::Aaaa.resource_type(),
    private_dns_record::schema(RecordType::Aaaa)
);
define_resource_type!(
    PrivateDnsCnameRecordType,
    RecordType::Cname.resource_type(),
    private_dns_record::schema(RecordType::Cname)
);
define_resource_type!(
    PrivateDnsMxRecordType,
    RecordType::Mx.resource_type(),
    private_dns_record::schema(RecordType::Mx)
);
define_resource_type!(
    PrivateDnsPtrRecordType,
    RecordType::Ptr.resource_type(),
    private_dns_record::schema(RecordType::Ptr)
);
define_resource_type!(
    PrivateDnsSrvRecordType,
    RecordType::Srv.resource_type(),
    private_dns_record::schema(RecordType::Srv)
);
define_resource_type!(
    PrivateDnsTxtRecordType,
    RecordType::Txt.resource_type(),
    private_dns_record::schema(RecordType::Txt)
);

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(ApiManagementType),
        Box::new(ApiManagementApiType),
        Box::new(ApiManagementBackendType),
        Box::new(PrivateDnsZoneType),
        Box::new(PrivateDnsZoneVirtualNetworkLinkType),
        Box::new(PrivateDnsARecordType),
        Box::new(PrivateDnsAaaaRecordType),
        Box::new(PrivateDnsCnameRecordType),
        Box::new(PrivateDnsMxRecordType),
        Box::new(PrivateDnsPtrRecordType),
        Box::new(PrivateDnsSrvRecordType),
        Box::new(PrivateDnsTxtRecordType),
    ]
}

/// Schemas of every resource type, keyed by type name
pub fn schemas() -> HashMap<String, ResourceSchema> {
    resource_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

// =============================================================================
// Errors
// =============================================================================

fn kind_of(err: &ArmError) -> ProviderErrorKind {
    match err {
        ArmError::Status { status, .. } => ProviderErrorKind::Api { status: *status },
        ArmError::Timeout(_) => ProviderErrorKind::Timeout,
        _ => ProviderErrorKind::Other,
    }
}

impl From<ArmError> for ProviderError {
    fn from(err: ArmError) -> Self {
        let message = match &err {
            ArmError::Timeout(_) => "operation timed out",
            _ => "request to Azure Resource Manager failed",
        };
        ProviderError::new(message)
            .with_kind(kind_of(&err))
            .with_cause(err)
    }
}

/// Attach "<action> <target>" context to ARM failures
pub(crate) trait ArmContext<T> {
    fn context(self, action: &str, target: &dyn Display) -> ProviderResult<T>;
}

impl<T> ArmContext<T> for ArmResult<T> {
    fn context(self, action: &str, target: &dyn Display) -> ProviderResult<T> {
        self.map_err(|err| {
            ProviderError::new(format!("{} {}", action, target))
                .with_kind(kind_of(&err))
                .with_cause(err)
        })
    }
}

/// Parse an ARM ID, reporting a mismatch as `InvalidId`
pub(crate) fn parse_id<I: ResourceIdentifier>(identifier: &str) -> ProviderResult<I> {
    I::parse(identifier).map_err(|err: IdParseError| {
        ProviderError::invalid_id(format!("parsing {} ID", I::KIND)).with_cause(err)
    })
}

// =============================================================================
// Lifecycle helpers
// =============================================================================

/// Fail with an import conflict unless `id` is absent remotely
pub(crate) async fn ensure_absent(
    client: &ArmClient,
    resource_type: &str,
    id: &impl Display,
    api_version: &str,
) -> ProviderResult<()> {
    let path = id.to_string();
    match client.get(&path, api_version).await {
        Ok(_) => Err(ProviderError::already_exists(resource_type, path)),
        Err(e) if e.was_not_found() => Ok(()),
        Err(e) => Err(e).context("checking for presence of existing", id),
    }
}

/// State for a resource that vanished remotely
pub(crate) fn gone(id: &ResourceId, identifier: &impl Display) -> State {
    info!("{} does not exist - removing from state", identifier);
    State::not_found(id.clone())
}

/// DELETE that treats an already-missing resource as success
pub(crate) async fn delete_if_present(
    client: &ArmClient,
    id: &impl Display,
    api_version: &str,
) -> ProviderResult<()> {
    match client.delete(&id.to_string(), api_version).await {
        Ok(()) => Ok(()),
        Err(e) if e.was_not_found() => {
            info!("{} is already gone", id);
            Ok(())
        }
        Err(e) => Err(e).context("deleting", id),
    }
}

// =============================================================================
// Attribute access
// =============================================================================

pub(crate) fn required_str<'a>(resource: &'a Resource, key: &str) -> ProviderResult<&'a str> {
    resource
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ProviderError::validation(format!("`{}` is required", key))
                .for_resource(resource.id.clone())
        })
}

pub(crate) fn optional_str<'a>(attrs: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str)
}

pub(crate) fn bool_or(attrs: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    attrs.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// First element of a single-block attribute, accepting a bare map too
pub(crate) fn block<'a>(
    attrs: &'a HashMap<String, Value>,
    key: &str,
) -> Option<&'a HashMap<String, Value>> {
    match attrs.get(key)? {
        Value::Map(map) => Some(map),
        Value::List(items) => items.first().and_then(Value::as_map),
        _ => None,
    }
}

/// Items of a list or set attribute; empty when unset
pub(crate) fn items<'a>(attrs: &'a HashMap<String, Value>, key: &str) -> &'a [Value] {
    attrs.get(key).and_then(Value::as_list).unwrap_or(&[])
}

pub(crate) fn strings(attrs: &HashMap<String, Value>, key: &str) -> Vec<Json> {
    items(attrs, key)
        .iter()
        .filter_map(Value::as_str)
        .map(|s| Json::String(s.to_string()))
        .collect()
}

/// Copy a JSON field into `attrs` when it is present and not null
pub(crate) fn set_from_json(attrs: &mut HashMap<String, Value>, key: &str, json: Option<&Json>) {
    if let Some(value) = json.and_then(Value::from_json) {
        attrs.insert(key.to_string(), value);
    }
}

/// Copy `attrs[key]` into `target[field]` when set
pub(crate) fn put_json(
    target: &mut Map<String, Json>,
    field: &str,
    attrs: &HashMap<String, Value>,
    key: &str,
) {
    if let Some(value) = attrs.get(key) {
        target.insert(field.to_string(), value.to_json());
    }
}

pub(crate) fn tags_to_json(attrs: &HashMap<String, Value>) -> Json {
    let tags: Map<String, Json> = attrs
        .get("tags")
        .and_then(Value::as_map)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), Json::String(s.to_string()))))
                .collect()
        })
        .unwrap_or_default();
    Json::Object(tags)
}

pub(crate) fn tags_from_json(json: Option<&Json>) -> Value {
    let tags = json
        .and_then(Json::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), Value::from(s))))
                .collect()
        })
        .unwrap_or_default();
    Value::Map(tags)
}

/// Azure reports locations in several spellings ("West Europe", "westeurope")
pub(crate) fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}

/// Attribute normalizer for locations
pub(crate) fn location_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::from(normalize_location(s)),
        other => other.clone(),
    }
}

/// Attribute normalizer for ARM IDs (or lists of them), which compare case-insensitively
pub(crate) fn arm_id_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::from(s.to_lowercase()),
        Value::List(ids) => Value::List(ids.iter().map(arm_id_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::testing::FakeArm;

    #[test]
    fn every_resource_type_has_a_schema() {
        let types = resource_types();
        assert_eq!(types.len(), 12);
        for t in &types {
            assert_eq!(t.schema().resource_type, t.name());
        }
        let schemas = schemas();
        assert!(schemas.contains_key("azurerm_private_dns_srv_record"));
        assert!(schemas.contains_key("azurerm_api_management_backend"));
    }

    #[test]
    fn tags_convert_both_ways() {
        let mut attrs = HashMap::new();
        attrs.insert(
            "tags".to_string(),
            Value::Map(HashMap::from([("env".to_string(), Value::from("test"))])),
        );
        let json = tags_to_json(&attrs);
        assert_eq!(json, json!({"env": "test"}));
        assert_eq!(tags_from_json(Some(&json)), attrs["tags"]);
        assert_eq!(tags_from_json(None), Value::Map(HashMap::new()));
    }

    #[test]
    fn locations_are_normalized() {
        assert_eq!(normalize_location("West Europe"), "westeurope");
        assert_eq!(normalize_location("westeurope"), "westeurope");
        assert_eq!(location_value(&Value::from("North Europe")), Value::from("northeurope"));
        assert_eq!(arm_id_value(&Value::from("/Subscriptions/X")), Value::from("/subscriptions/x"));
    }

    #[test]
    fn block_accepts_map_or_single_item_list() {
        let inner = HashMap::from([("email".to_string(), Value::from("a@b.c"))]);
        let mut attrs = HashMap::new();
        attrs.insert("contact".to_string(), Value::Map(inner.clone()));
        assert_eq!(block(&attrs, "contact"), Some(&inner));

        attrs.insert("contact".to_string(), Value::List(vec![Value::Map(inner.clone())]));
        assert_eq!(block(&attrs, "contact"), Some(&inner));
        assert_eq!(block(&attrs, "license"), None);
    }

    #[tokio::test]
    async fn ensure_absent_reports_import_conflict() {
        let arm = FakeArm::new();
        let path = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/privateDnsZones/example.internal";
        assert!(
            ensure_absent(&arm.client(), "azurerm_private_dns_zone", &path, "2020-06-01")
                .await
                .is_ok()
        );

        arm.seed(path, json!({"location": "global"}));
        let err = ensure_absent(&arm.client(), "azurerm_private_dns_zone", &path, "2020-06-01")
            .await
            .unwrap_err();
        assert_eq!(
            err.kind,
            ProviderErrorKind::AlreadyExists {
                identifier: path.to_string()
            }
        );
    }

    #[tokio::test]
    async fn other_failures_carry_context() {
        let arm = FakeArm::new();
        let path = "/subscriptions/sub/resourceGroups/rg";
        arm.respond(
            reqwest::Method::GET,
            path,
            crate::client::ArmResponse::new(403).with_body(
                json!({"error": {"code": "AuthorizationFailed", "message": "no access"}}),
            ),
        );
        let err = ensure_absent(&arm.client(), "x", &path, "2021-04-01")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Api { status: 403 });
        assert!(err.to_string().contains("checking for presence of existing"));
        assert!(err.to_string().contains("AuthorizationFailed"));
    }

    #[tokio::test]
    async fn delete_if_present_ignores_missing() {
        let arm = FakeArm::new();
        let path = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/privateDnsZones/gone.internal";
        arm.respond(
            reqwest::Method::DELETE,
            path,
            crate::client::ArmResponse::new(404)
                .with_body(json!({"error": {"code": "NotFound", "message": "gone"}})),
        );
        assert!(delete_if_present(&arm.client(), &path, "2020-06-01").await.is_ok());
    }
}
