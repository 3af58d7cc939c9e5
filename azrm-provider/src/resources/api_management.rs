//! azurerm_api_management
//!
//! API Management service. Creating a service takes a long time, so the
//! schema carries hour-long timeouts. Deleted services stay soft-deleted for
//! a while; create can recover them and delete can purge them, depending on
//! `ApiManagementFeatures`.
//!
//! `security` and `protocols` are not properties of their own: ARM keeps them
//! as string flags in `customProperties`. Tenant access lives on a separate
//! `tenant/access` endpoint whose keys are only returned by `listSecrets`.

use std::collections::HashMap;
use std::time::Duration;

use azrm_core::provider::{ProviderError, ProviderResult};
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use log::{debug, info};
use serde_json::{Map, Value as Json, json};

use super::{
    ArmContext, arm_id_value, block, bool_or, delete_if_present, ensure_absent, gone, items,
    location_value, normalize_location, optional_str, parse_id, put_json, required_str,
    set_from_json, tags_from_json, tags_to_json,
};
use crate::client::ArmClient;
use crate::config::ApiManagementFeatures;
use crate::ids::{ApiManagementServiceId, DeletedServiceId};
use crate::validate;

pub const RESOURCE_TYPE: &str = "azurerm_api_management";
pub const API_VERSION: &str = "2022-08-01";

const HOURS_3: Duration = Duration::from_secs(3 * 60 * 60);

const IDENTITY_TYPES: &[&str] = &["SystemAssigned", "UserAssigned", "SystemAssigned, UserAssigned"];

const CUSTOM_PROPERTY_PREFIX: &str = "Microsoft.WindowsAzure.ApiManagement.Gateway.";
const HTTP2: &str = "Protocols.Server.Http2";

/// `security` fields, the custom property behind each, and whether the
/// Consumption tier accepts it
const SECURITY_PROPERTIES: &[(&str, &str, bool)] = &[
    ("backend_ssl30_enabled", "Security.Backend.Protocols.Ssl30", true),
    ("backend_tls10_enabled", "Security.Backend.Protocols.Tls10", true),
    ("backend_tls11_enabled", "Security.Backend.Protocols.Tls11", true),
    ("frontend_ssl30_enabled", "Security.Protocols.Ssl30", false),
    ("frontend_tls10_enabled", "Security.Protocols.Tls10", true),
    ("frontend_tls11_enabled", "Security.Protocols.Tls11", true),
    ("triple_des_ciphers_enabled", "Security.Ciphers.TripleDes168", false),
    (
        "tls_ecdhe_ecdsa_with_aes256_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA",
        false,
    ),
    (
        "tls_ecdhe_ecdsa_with_aes128_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA",
        false,
    ),
    (
        "tls_ecdhe_rsa_with_aes256_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
        false,
    ),
    (
        "tls_ecdhe_rsa_with_aes128_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
        false,
    ),
    (
        "tls_rsa_with_aes128_gcm_sha256_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_128_GCM_SHA256",
        false,
    ),
    (
        "tls_rsa_with_aes256_gcm_sha384_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_256_GCM_SHA384",
        false,
    ),
    (
        "tls_rsa_with_aes256_cbc_sha256_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_256_CBC_SHA256",
        false,
    ),
    (
        "tls_rsa_with_aes128_cbc_sha256_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_128_CBC_SHA256",
        false,
    ),
    (
        "tls_rsa_with_aes256_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_256_CBC_SHA",
        false,
    ),
    (
        "tls_rsa_with_aes128_cbc_sha_ciphers_enabled",
        "Security.Ciphers.TLS_RSA_WITH_AES_128_CBC_SHA",
        false,
    ),
];

const TENANT_ACCESS: &str = "tenant/access";

fn identity() -> AttributeType {
    AttributeType::Block(vec![
        AttributeSchema::new(
            "type",
            AttributeType::Enum(IDENTITY_TYPES.iter().map(|t| t.to_string()).collect()),
        )
        .required(),
        AttributeSchema::new(
            "identity_ids",
            AttributeType::Set(Box::new(validate::string("ArmId", validate::arm_id))),
        )
        .normalized_with(arm_id_value),
        AttributeSchema::new("principal_id", AttributeType::String).computed(),
        AttributeSchema::new("tenant_id", AttributeType::String).computed(),
    ])
}

fn security() -> AttributeType {
    AttributeType::Block(
        SECURITY_PROPERTIES
            .iter()
            .map(|(field, _, _)| AttributeSchema::new(*field, AttributeType::Bool).with_default(false))
            .collect(),
    )
}

fn tenant_access() -> AttributeType {
    AttributeType::Block(vec![
        AttributeSchema::new("enabled", AttributeType::Bool).required(),
        AttributeSchema::new("tenant_id", AttributeType::String).computed(),
        AttributeSchema::new("primary_key", AttributeType::String)
            .computed()
            .sensitive(),
        AttributeSchema::new("secondary_key", AttributeType::String)
            .computed()
            .sensitive(),
    ])
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("An API Management service")
        .with_timeouts(Timeouts {
            create: HOURS_3,
            read: Duration::from_secs(5 * 60),
            update: HOURS_3,
            delete: HOURS_3,
        })
        .attribute(
            AttributeSchema::new("name", validate::string("ServiceName", validate::service_name))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("resource_group_name", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("location", types::non_empty_string())
                .required()
                .force_new()
                .normalized_with(location_value),
        )
        .attribute(
            AttributeSchema::new(
                "publisher_name",
                validate::string("PublisherName", validate::publisher_name),
            )
            .required(),
        )
        .attribute(
            AttributeSchema::new("publisher_email", validate::string("Email", validate::email))
                .required(),
        )
        .attribute(
            AttributeSchema::new("sku_name", validate::string("SkuName", validate::sku_name))
                .required(),
        )
        .attribute(
            AttributeSchema::new(
                "notification_sender_email",
                validate::string("Email", validate::email),
            )
            .computed(),
        )
        .attribute(
            AttributeSchema::new("public_network_access_enabled", AttributeType::Bool)
                .with_default(true),
        )
        .attribute(AttributeSchema::new("gateway_disabled", AttributeType::Bool).with_default(false))
        .attribute(AttributeSchema::new("min_api_version", types::non_empty_string()))
        .attribute(
            AttributeSchema::new(
                "virtual_network_type",
                AttributeType::Enum(vec![
                    "None".to_string(),
                    "External".to_string(),
                    "Internal".to_string(),
                ]),
            )
            .with_default("None"),
        )
        .attribute(AttributeSchema::new(
            "virtual_network_configuration",
            AttributeType::Block(vec![
                AttributeSchema::new("subnet_id", validate::string("ArmId", validate::arm_id))
                    .required()
                    .normalized_with(arm_id_value),
            ]),
        ))
        .attribute(
            AttributeSchema::new("client_certificate_enabled", AttributeType::Bool).computed(),
        )
        .attribute(AttributeSchema::new("identity", identity()))
        .attribute(
            AttributeSchema::new(
                "protocols",
                AttributeType::Block(vec![
                    AttributeSchema::new("http2_enabled", AttributeType::Bool).with_default(false),
                ]),
            )
            .computed(),
        )
        .attribute(AttributeSchema::new("security", security()).computed())
        .attribute(AttributeSchema::new("tenant_access", tenant_access()).computed())
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("gateway_url", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("gateway_regional_url", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("management_api_url", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("portal_url", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("developer_portal_url", AttributeType::String).read_only())
        .attribute(AttributeSchema::new("scm_url", AttributeType::String).read_only())
        .attribute(
            AttributeSchema::new(
                "public_ip_addresses",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .read_only(),
        )
        .attribute(
            AttributeSchema::new(
                "private_ip_addresses",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .read_only(),
        )
        .with_rule(client_certificate_needs_consumption)
        .with_rule(gateway_needs_additional_location)
        .with_rule(virtual_network_needs_configuration)
        .with_rule(identity_ids_match_type)
        .with_rule(consumption_limits)
}

/// "Developer_1" -> "Developer"
fn sku_tier(attrs: &HashMap<String, Value>) -> Option<&str> {
    optional_str(attrs, "sku_name")
        .and_then(|s| s.split_once('_'))
        .map(|(tier, _)| tier)
}

fn client_certificate_needs_consumption(attrs: &HashMap<String, Value>) -> Result<(), String> {
    let tier = sku_tier(attrs);
    if bool_or(attrs, "client_certificate_enabled", false) && tier != Some("Consumption") {
        return Err(
            "`client_certificate_enabled` is only supported when sku type is `Consumption`"
                .to_string(),
        );
    }
    Ok(())
}

// Additional locations are not managed here, so the gateway can never be disabled.
fn gateway_needs_additional_location(attrs: &HashMap<String, Value>) -> Result<(), String> {
    if bool_or(attrs, "gateway_disabled", false) {
        return Err("`gateway_disabled` is only supported when `additional_location` is set".to_string());
    }
    Ok(())
}

fn virtual_network_needs_configuration(attrs: &HashMap<String, Value>) -> Result<(), String> {
    let network_type = optional_str(attrs, "virtual_network_type").unwrap_or("None");
    if network_type != "None" && block(attrs, "virtual_network_configuration").is_none() {
        return Err(format!(
            "you must specify `virtual_network_configuration` when `virtual_network_type` is {:?}",
            network_type
        ));
    }
    Ok(())
}

fn identity_ids_match_type(attrs: &HashMap<String, Value>) -> Result<(), String> {
    let Some(identity) = block(attrs, "identity") else {
        return Ok(());
    };
    let user_assigned = optional_str(identity, "type").is_some_and(|t| t.contains("UserAssigned"));
    match (user_assigned, items(identity, "identity_ids").is_empty()) {
        (true, true) => Err("`identity_ids` is required when `type` includes `UserAssigned`".to_string()),
        (false, false) => {
            Err("`identity_ids` can only be set when `type` includes `UserAssigned`".to_string())
        }
        _ => Ok(()),
    }
}

fn consumption_limits(attrs: &HashMap<String, Value>) -> Result<(), String> {
    if sku_tier(attrs) != Some("Consumption") {
        return Ok(());
    }
    if block(attrs, "tenant_access").is_some() {
        return Err("`tenant_access` is not supported for sku tier `Consumption`".to_string());
    }
    if let Some(security) = block(attrs, "security")
        && let Some((field, _, _)) = SECURITY_PROPERTIES
            .iter()
            .find(|(field, _, allowed)| !allowed && bool_or(security, field, false))
    {
        return Err(format!("`{}` is not supported for Sku Tier `Consumption`", field));
    }
    Ok(())
}

fn opted_out_of_recovery(name: &str, location: &str) -> String {
    format!(
        "An existing soft-deleted API Management exists with the Name {:?} in the location {:?}, \
         however automatically recovering this API Management has been disabled via the \
         `features` block.\n\n\
         Enable `recover_soft_deleted` under `features.api_management` in the provider block to \
         recover it automatically. Alternatively recover it manually (e.g. using the Azure CLI) \
         and import it, or pick a different name/location.",
        name, location
    )
}

// =============================================================================
// Expand / flatten
// =============================================================================

/// "Developer_1" -> {"name": "Developer", "capacity": 1}
fn expand_sku(resource: &Resource) -> ProviderResult<Json> {
    let sku = required_str(resource, "sku_name")?;
    let parsed = sku
        .split_once('_')
        .and_then(|(name, capacity)| capacity.parse::<i64>().ok().map(|c| (name, c)));
    match parsed {
        Some((name, capacity)) => Ok(json!({ "name": name, "capacity": capacity })),
        None => Err(ProviderError::validation(format!(
            "`sku_name` {:?} must be `<tier>_<capacity>`",
            sku
        ))
        .for_resource(resource.id.clone())),
    }
}

fn custom_property(suffix: &str) -> String {
    format!("{}{}", CUSTOM_PROPERTY_PREFIX, suffix)
}

/// Every security flag is sent, so removing the block turns them all off
fn expand_custom_properties(attrs: &HashMap<String, Value>, consumption: bool) -> Json {
    let security = block(attrs, "security");
    let mut out = Map::new();
    for (field, property, allowed) in SECURITY_PROPERTIES {
        if consumption && !allowed {
            continue;
        }
        let enabled = security.is_some_and(|s| bool_or(s, field, false));
        out.insert(custom_property(property), json!(enabled.to_string()));
    }
    if let Some(protocols) = block(attrs, "protocols") {
        out.insert(
            custom_property(HTTP2),
            json!(bool_or(protocols, "http2_enabled", false).to_string()),
        );
    }
    Json::Object(out)
}

fn expand_identity(attrs: &HashMap<String, Value>) -> Json {
    let Some(identity) = block(attrs, "identity") else {
        return json!({ "type": "None" });
    };
    let mut out = Map::new();
    put_json(&mut out, "type", identity, "type");
    let ids: Map<String, Json> = items(identity, "identity_ids")
        .iter()
        .filter_map(Value::as_str)
        .map(|id| (id.to_string(), json!({})))
        .collect();
    if !ids.is_empty() {
        out.insert("userAssignedIdentities".to_string(), Json::Object(ids));
    }
    Json::Object(out)
}

fn expand(resource: &Resource) -> ProviderResult<Json> {
    let attrs = &resource.attributes;

    let mut props = Map::new();
    put_json(&mut props, "publisherName", attrs, "publisher_name");
    put_json(&mut props, "publisherEmail", attrs, "publisher_email");
    put_json(&mut props, "notificationSenderEmail", attrs, "notification_sender_email");
    props.insert(
        "publicNetworkAccess".to_string(),
        json!(if bool_or(attrs, "public_network_access_enabled", true) {
            "Enabled"
        } else {
            "Disabled"
        }),
    );
    props.insert(
        "disableGateway".to_string(),
        json!(bool_or(attrs, "gateway_disabled", false)),
    );
    put_json(&mut props, "enableClientCertificate", attrs, "client_certificate_enabled");
    if let Some(version) = optional_str(attrs, "min_api_version") {
        props.insert(
            "apiVersionConstraint".to_string(),
            json!({ "minApiVersion": version }),
        );
    }

    let network_type = optional_str(attrs, "virtual_network_type").unwrap_or("None");
    props.insert("virtualNetworkType".to_string(), json!(network_type));
    if network_type != "None"
        && let Some(network) = block(attrs, "virtual_network_configuration")
    {
        let mut out = Map::new();
        put_json(&mut out, "subnetResourceId", network, "subnet_id");
        props.insert("virtualNetworkConfiguration".to_string(), Json::Object(out));
    }

    let consumption = sku_tier(attrs) == Some("Consumption");
    props.insert(
        "customProperties".to_string(),
        expand_custom_properties(attrs, consumption),
    );

    Ok(json!({
        "location": normalize_location(required_str(resource, "location")?),
        "sku": expand_sku(resource)?,
        "identity": expand_identity(attrs),
        "tags": tags_to_json(attrs),
        "properties": props,
    }))
}

fn flatten_custom_properties(
    attrs: &mut HashMap<String, Value>,
    custom: &Map<String, Json>,
    consumption: bool,
) {
    // Flags are "true"/"false" strings, sometimes capitalised; missing means off
    let enabled = |property: &str| {
        custom
            .get(&custom_property(property))
            .and_then(Json::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    };
    let security = SECURITY_PROPERTIES
        .iter()
        .filter(|(_, _, allowed)| !consumption || *allowed)
        .map(|(field, property, _)| (field.to_string(), Value::Bool(enabled(property))))
        .collect();
    attrs.insert("security".to_string(), Value::Map(security));
    attrs.insert(
        "protocols".to_string(),
        Value::Map(HashMap::from([(
            "http2_enabled".to_string(),
            Value::Bool(enabled(HTTP2)),
        )])),
    );
}

fn flatten_identity(json: &Json) -> Option<Value> {
    let kind = json.get("type").and_then(Json::as_str)?;
    if kind.eq_ignore_ascii_case("None") {
        return None;
    }
    let mut out = HashMap::new();
    out.insert("type".to_string(), Value::from(kind));
    let mut ids: Vec<&String> = json
        .get("userAssignedIdentities")
        .and_then(Json::as_object)
        .map(|ids| ids.keys().collect())
        .unwrap_or_default();
    ids.sort();
    if !ids.is_empty() {
        out.insert(
            "identity_ids".to_string(),
            Value::List(ids.into_iter().map(|id| Value::from(id.as_str())).collect()),
        );
    }
    set_from_json(&mut out, "principal_id", json.get("principalId"));
    set_from_json(&mut out, "tenant_id", json.get("tenantId"));
    Some(Value::Map(out))
}

fn is_consumption(body: &Json) -> bool {
    body.pointer("/sku/name").and_then(Json::as_str) == Some("Consumption")
}

fn flatten(id: &ApiManagementServiceId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert("name".to_string(), Value::from(id.service_name.as_str()));
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );
    if let Some(location) = body.get("location").and_then(Json::as_str) {
        attrs.insert("location".to_string(), Value::from(normalize_location(location)));
    }
    attrs.insert("tags".to_string(), tags_from_json(body.get("tags")));
    if let Some(identity) = body.get("identity").and_then(flatten_identity) {
        attrs.insert("identity".to_string(), identity);
    }

    if let (Some(name), Some(capacity)) = (
        body.pointer("/sku/name").and_then(Json::as_str),
        body.pointer("/sku/capacity").and_then(Json::as_i64),
    ) {
        attrs.insert(
            "sku_name".to_string(),
            Value::from(format!("{}_{}", name, capacity)),
        );
    }

    let Some(props) = body.get("properties") else {
        return attrs;
    };
    for (key, field) in [
        ("publisher_name", "publisherName"),
        ("publisher_email", "publisherEmail"),
        ("notification_sender_email", "notificationSenderEmail"),
        ("gateway_url", "gatewayUrl"),
        ("gateway_regional_url", "gatewayRegionalUrl"),
        ("management_api_url", "managementApiUrl"),
        ("portal_url", "portalUrl"),
        ("developer_portal_url", "developerPortalUrl"),
        ("scm_url", "scmUrl"),
        ("public_ip_addresses", "publicIPAddresses"),
        ("private_ip_addresses", "privateIPAddresses"),
        ("virtual_network_type", "virtualNetworkType"),
        ("client_certificate_enabled", "enableClientCertificate"),
        ("gateway_disabled", "disableGateway"),
    ] {
        set_from_json(&mut attrs, key, props.get(field));
    }
    set_from_json(
        &mut attrs,
        "min_api_version",
        props.pointer("/apiVersionConstraint/minApiVersion"),
    );
    if let Some(custom) = props.get("customProperties").and_then(Json::as_object) {
        flatten_custom_properties(&mut attrs, custom, is_consumption(body));
    }
    attrs.insert(
        "public_network_access_enabled".to_string(),
        Value::Bool(
            props
                .get("publicNetworkAccess")
                .and_then(Json::as_str)
                .is_none_or(|access| access == "Enabled"),
        ),
    );
    if let Some(subnet) = props
        .pointer("/virtualNetworkConfiguration/subnetResourceId")
        .and_then(Json::as_str)
    {
        attrs.insert(
            "virtual_network_configuration".to_string(),
            Value::Map(HashMap::from([(
                "subnet_id".to_string(),
                Value::from(subnet),
            )])),
        );
    }
    attrs
}

// =============================================================================
// CRUD
// =============================================================================

fn service_id(client: &ArmClient, resource: &Resource) -> ProviderResult<ApiManagementServiceId> {
    Ok(ApiManagementServiceId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "name")?,
    ))
}

/// Whether a soft-deleted service blocks the name. Without read access on the
/// subscription ARM answers 403 rather than 404; both mean "nothing to recover".
async fn soft_deleted(client: &ArmClient, id: &DeletedServiceId) -> ProviderResult<bool> {
    match client.get(&id.to_string(), API_VERSION).await {
        Ok(_) => Ok(true),
        Err(e) if e.was_not_found() || e.was_forbidden() => Ok(false),
        Err(e) => Err(e).context("checking for the presence of an existing soft-deleted", id),
    }
}

/// Delete every member of a collection under the service
async fn delete_children(
    client: &ArmClient,
    service: &ApiManagementServiceId,
    collection: &str,
    query: (&str, &str),
) -> ProviderResult<()> {
    let path = format!("{}/{}", service, collection);
    let children = client
        .list(&path, API_VERSION)
        .await
        .context(&format!("listing {} after creation of", collection), service)?;

    for child in children {
        let Some(child_id) = child.get("id").and_then(Json::as_str) else {
            continue;
        };
        debug!("Deleting {}", child_id);
        match client
            .delete_with_query(child_id, API_VERSION, &[query])
            .await
        {
            Ok(()) => {}
            Err(e) if e.was_not_found() => {}
            Err(e) => return Err(e).context("deleting", &child_id),
        }
    }
    Ok(())
}

async fn update_tenant_access(
    client: &ArmClient,
    id: &ApiManagementServiceId,
    attrs: &HashMap<String, Value>,
) -> ProviderResult<()> {
    let Some(access) = block(attrs, "tenant_access") else {
        return Ok(());
    };
    let body = json!({ "properties": { "enabled": bool_or(access, "enabled", false) } });
    client
        .patch(&format!("{}/{}", id, TENANT_ACCESS), API_VERSION, body, Some("*"))
        .await
        .context("updating tenant access settings for", id)?;
    Ok(())
}

/// Consumption services have no tenant access settings
async fn read_tenant_access(
    client: &ArmClient,
    id: &ApiManagementServiceId,
    body: &Json,
) -> ProviderResult<Option<Value>> {
    if is_consumption(body) {
        return Ok(None);
    }
    let secrets = match client
        .post(&format!("{}/{}/listSecrets", id, TENANT_ACCESS), API_VERSION)
        .await
    {
        Ok(secrets) => secrets,
        Err(e) if e.was_not_found() => return Ok(None),
        Err(e) => return Err(e).context("retrieving tenant access properties for", id),
    };
    let mut out = HashMap::from([(
        "enabled".to_string(),
        Value::Bool(secrets.get("enabled").and_then(Json::as_bool).unwrap_or(false)),
    )]);
    set_from_json(&mut out, "tenant_id", secrets.get("id"));
    set_from_json(&mut out, "primary_key", secrets.get("primaryKey"));
    set_from_json(&mut out, "secondary_key", secrets.get("secondaryKey"));
    Ok(Some(Value::Map(out)))
}

/// New services come with an "Echo API" and starter products
async fn remove_samples(client: &ArmClient, id: &ApiManagementServiceId) -> ProviderResult<()> {
    delete_children(client, id, "apis", ("deleteRevisions", "true")).await?;
    delete_children(client, id, "products", ("deleteSubscriptions", "true")).await
}

pub async fn create(
    client: &ArmClient,
    features: &ApiManagementFeatures,
    resource: &Resource,
) -> ProviderResult<State> {
    let id = service_id(client, resource)?;
    ensure_absent(client, RESOURCE_TYPE, &id, API_VERSION).await?;

    let body = expand(resource)?;
    let location = normalize_location(required_str(resource, "location")?);

    let deleted = DeletedServiceId::new(&id.subscription_id, &location, &id.service_name);
    if soft_deleted(client, &deleted).await? {
        if !features.recover_soft_deleted {
            return Err(
                ProviderError::new(opted_out_of_recovery(&id.service_name, &location))
                    .for_resource(resource.id.clone()),
            );
        }

        info!("recovering soft-deleted {}", id);
        // Everything except location and sku is ignored while restoring
        let restore = json!({
            "location": location,
            "sku": body["sku"].clone(),
            "properties": { "restore": true },
        });
        client
            .put(&id.to_string(), API_VERSION, restore, None)
            .await
            .context("recovering", &id)?;
    }

    client
        .put(&id.to_string(), API_VERSION, body, None)
        .await
        .context("creating/updating", &id)?;
    info!("{}: creation complete", id);

    remove_samples(client, &id).await?;
    update_tenant_access(client, &id, &resource.attributes).await?;

    read(client, &resource.id, &id.to_string()).await
}

pub async fn read(client: &ArmClient, rid: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let id: ApiManagementServiceId = parse_id(identifier)?;
    let body = match client.get(&id.to_string(), API_VERSION).await {
        Ok(body) => body,
        Err(e) if e.was_not_found() => return Ok(gone(rid, &id)),
        Err(e) => return Err(e).context("retrieving", &id),
    };
    let mut attrs = flatten(&id, &body);
    if let Some(access) = read_tenant_access(client, &id, &body).await? {
        attrs.insert("tenant_access".to_string(), access);
    }
    Ok(State::existing(rid.clone(), attrs).with_identifier(id.to_string()))
}

pub async fn update(
    client: &ArmClient,
    identifier: &str,
    resource: &Resource,
) -> ProviderResult<State> {
    let id: ApiManagementServiceId = parse_id(identifier)?;
    client
        .put(&id.to_string(), API_VERSION, expand(resource)?, None)
        .await
        .context("creating/updating", &id)?;
    update_tenant_access(client, &id, &resource.attributes).await?;
    read(client, &resource.id, identifier).await
}

pub async fn delete(
    client: &ArmClient,
    features: &ApiManagementFeatures,
    identifier: &str,
) -> ProviderResult<()> {
    let id: ApiManagementServiceId = parse_id(identifier)?;

    let existing = match client.get(&id.to_string(), API_VERSION).await {
        Ok(body) => body,
        Err(e) if e.was_not_found() => {
            info!("{} is already gone", id);
            return Ok(());
        }
        Err(e) => return Err(e).context("retrieving", &id),
    };

    debug!("Deleting {}", id);
    delete_if_present(client, &id, API_VERSION).await?;

    if features.purge_soft_delete_on_destroy
        && let Some(location) = existing.get("location").and_then(Json::as_str)
    {
        debug!("{} marked for purge - executing purge", id);
        let deleted = DeletedServiceId::new(
            &id.subscription_id,
            normalize_location(location),
            &id.service_name,
        );
        delete_if_present(client, &deleted, API_VERSION).await?;
        debug!("Purged {}", id);
    }
    Ok(())
}
