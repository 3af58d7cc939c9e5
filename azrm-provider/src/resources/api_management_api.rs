//! azurerm_api_management_api
//!
//! An API revision inside an API Management service. The ARM ID of a
//! revision is `<name>;rev=<revision>`.
//!
//! When `import` is set the definition is uploaded with a first PUT and the
//! remaining properties are applied with a second PUT (`If-Match: *`), since
//! ARM ignores most properties on an import request.

use std::collections::HashMap;

use azrm_core::provider::ProviderResult;
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::{debug, info};
use serde_json::{Map, Value as Json, json};

use super::{
    ArmContext, block, delete_if_present, ensure_absent, gone, optional_str, parse_id, put_json,
    required_str, set_from_json, strings,
};
use crate::client::ArmClient;
use crate::ids::{ApiManagementApiId, ApiManagementServiceId};
use crate::validate;

pub const RESOURCE_TYPE: &str = "azurerm_api_management_api";
pub const API_VERSION: &str = "2022-08-01";

const API_TYPES: &[&str] = &["graphql", "http", "soap", "websocket"];
const PROTOCOLS: &[&str] = &["http", "https", "ws", "wss"];
const CONTENT_FORMATS: &[&str] = &[
    "openapi",
    "openapi+json",
    "openapi+json-link",
    "openapi-link",
    "swagger-json",
    "swagger-link-json",
    "wadl-link-json",
    "wadl-xml",
    "wsdl",
    "wsdl-link",
];
const BEARER_TOKEN_SENDING_METHODS: &[&str] = &["authorizationHeader", "query"];

fn enumeration(values: &[&str]) -> AttributeType {
    AttributeType::Enum(values.iter().map(|v| v.to_string()).collect())
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("A revision of an API published by an API Management service")
        .attribute(
            AttributeSchema::new("name", validate::string("ChildName", validate::child_name))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new(
                "api_management_name",
                validate::string("ServiceName", validate::service_name),
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
            AttributeSchema::new("revision", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new(
            "revision_description",
            types::non_empty_string(),
        ))
        .attribute(AttributeSchema::new("display_name", types::non_empty_string()).computed())
        .attribute(
            AttributeSchema::new("path", validate::string("ApiPath", validate::api_path))
                .computed(),
        )
        .attribute(
            AttributeSchema::new(
                "protocols",
                AttributeType::Set(Box::new(enumeration(PROTOCOLS))),
            )
            .computed(),
        )
        .attribute(AttributeSchema::new("api_type", enumeration(API_TYPES)).computed())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(AttributeSchema::new("service_url", types::non_empty_string()).computed())
        .attribute(
            AttributeSchema::new("subscription_required", AttributeType::Bool).with_default(true),
        )
        .attribute(
            AttributeSchema::new(
                "subscription_key_parameter_names",
                AttributeType::Block(vec![
                    AttributeSchema::new("header", types::non_empty_string()).required(),
                    AttributeSchema::new("query", types::non_empty_string()).required(),
                ]),
            )
            .computed(),
        )
        .attribute(AttributeSchema::new(
            "contact",
            AttributeType::Block(vec![
                AttributeSchema::new("email", validate::string("Email", validate::email)),
                AttributeSchema::new("name", types::non_empty_string()),
                AttributeSchema::new("url", validate::string("HttpUrl", validate::http_url)),
            ]),
        ))
        .attribute(AttributeSchema::new(
            "license",
            AttributeType::Block(vec![
                AttributeSchema::new("name", types::non_empty_string()),
                AttributeSchema::new("url", validate::string("HttpUrl", validate::http_url)),
            ]),
        ))
        .attribute(AttributeSchema::new(
            "terms_of_service_url",
            types::non_empty_string(),
        ))
        .attribute(AttributeSchema::new("source_api_id", types::non_empty_string()))
        .attribute(AttributeSchema::new("version", types::non_empty_string()).computed())
        .attribute(
            AttributeSchema::new("version_set_id", types::non_empty_string()).computed(),
        )
        .attribute(AttributeSchema::new(
            "version_description",
            types::non_empty_string(),
        ))
        .attribute(
            AttributeSchema::new(
                "oauth2_authorization",
                AttributeType::Block(vec![
                    AttributeSchema::new("authorization_server_name", types::non_empty_string())
                        .required(),
                    AttributeSchema::new("scope", types::non_empty_string()),
                ]),
            )
            .conflicts_with(&["openid_authentication"]),
        )
        .attribute(
            AttributeSchema::new(
                "openid_authentication",
                AttributeType::Block(vec![
                    AttributeSchema::new("openid_provider_name", types::non_empty_string())
                        .required(),
                    AttributeSchema::new(
                        "bearer_token_sending_methods",
                        AttributeType::Set(Box::new(enumeration(BEARER_TOKEN_SENDING_METHODS))),
                    ),
                ]),
            )
            .conflicts_with(&["oauth2_authorization"]),
        )
        .attribute(
            AttributeSchema::new(
                "import",
                AttributeType::Block(vec![
                    AttributeSchema::new("content_format", enumeration(CONTENT_FORMATS)).required(),
                    AttributeSchema::new("content_value", types::non_empty_string()).required(),
                    AttributeSchema::new(
                        "wsdl_selector",
                        AttributeType::Block(vec![
                            AttributeSchema::new("service_name", types::non_empty_string())
                                .required(),
                            AttributeSchema::new("endpoint_name", types::non_empty_string())
                                .required(),
                        ]),
                    ),
                ]),
            )
            .with_description("Not returned by the API; kept from configuration"),
        )
        .attribute(AttributeSchema::new("is_current", AttributeType::Bool).read_only())
        .attribute(AttributeSchema::new("is_online", AttributeType::Bool).read_only())
        .with_rule(version_needs_version_set)
        .with_rule(standalone_api_needs_display_fields)
}

fn version_needs_version_set(attrs: &HashMap<String, Value>) -> Result<(), String> {
    if attrs.contains_key("version") && !attrs.contains_key("version_set_id") {
        return Err("setting `version` without the required `version_set_id`".to_string());
    }
    Ok(())
}

fn standalone_api_needs_display_fields(attrs: &HashMap<String, Value>) -> Result<(), String> {
    if attrs.contains_key("source_api_id") {
        return Ok(());
    }
    if !attrs.contains_key("display_name") || !attrs.contains_key("protocols") {
        return Err(
            "`display_name`, `protocols` are required when `source_api_id` is not set"
                .to_string(),
        );
    }
    Ok(())
}

// =============================================================================
// Expand / flatten
// =============================================================================

/// `apiType` counterpart of the API `type`
fn soap_api_type(api_type: &str) -> &'static str {
    match api_type {
        "graphql" => "graphql",
        "soap" => "soap",
        "websocket" => "websocket",
        _ => "http",
    }
}

fn expand_import(attrs: &HashMap<String, Value>) -> Option<Json> {
    let import = block(attrs, "import")?;
    let api_type = optional_str(attrs, "api_type").unwrap_or("http");

    let mut props = Map::new();
    props.insert("type".to_string(), json!(api_type));
    props.insert("apiType".to_string(), json!(soap_api_type(api_type)));
    put_json(&mut props, "format", import, "content_format");
    put_json(&mut props, "value", import, "content_value");
    props.insert(
        "path".to_string(),
        json!(optional_str(attrs, "path").unwrap_or_default()),
    );
    if let Some(selector) = block(import, "wsdl_selector") {
        let mut out = Map::new();
        put_json(&mut out, "wsdlServiceName", selector, "service_name");
        put_json(&mut out, "wsdlEndpointName", selector, "endpoint_name");
        props.insert("wsdlSelector".to_string(), Json::Object(out));
    }
    put_json(&mut props, "serviceUrl", attrs, "service_url");
    put_json(&mut props, "apiVersion", attrs, "version");
    put_json(&mut props, "apiVersionSetId", attrs, "version_set_id");

    Some(json!({ "properties": props }))
}

/// Scalar attributes and the property each one maps to
const SCALARS: &[(&str, &str)] = &[
    ("description", "description"),
    ("display_name", "displayName"),
    ("path", "path"),
    ("revision_description", "apiRevisionDescription"),
    ("service_url", "serviceUrl"),
    ("source_api_id", "sourceApiId"),
    ("subscription_required", "subscriptionRequired"),
    ("terms_of_service_url", "termsOfServiceUrl"),
    ("version", "apiVersion"),
    ("version_description", "apiVersionDescription"),
    ("version_set_id", "apiVersionSetId"),
];

fn expand_contact(contact: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    put_json(&mut out, "email", contact, "email");
    put_json(&mut out, "name", contact, "name");
    put_json(&mut out, "url", contact, "url");
    Json::Object(out)
}

fn expand_license(license: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    put_json(&mut out, "name", license, "name");
    put_json(&mut out, "url", license, "url");
    Json::Object(out)
}

fn expand_key_names(names: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    put_json(&mut out, "header", names, "header");
    put_json(&mut out, "query", names, "query");
    Json::Object(out)
}

fn expand_authentication(attrs: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    if let Some(oauth2) = block(attrs, "oauth2_authorization") {
        let mut settings = Map::new();
        put_json(&mut settings, "authorizationServerId", oauth2, "authorization_server_name");
        put_json(&mut settings, "scope", oauth2, "scope");
        out.insert("oAuth2".to_string(), Json::Object(settings));
    }
    if let Some(openid) = block(attrs, "openid_authentication") {
        let mut settings = Map::new();
        put_json(&mut settings, "openidProviderId", openid, "openid_provider_name");
        settings.insert(
            "bearerTokenSendingMethods".to_string(),
            Json::Array(strings(openid, "bearer_token_sending_methods")),
        );
        out.insert("openid".to_string(), Json::Object(settings));
    }
    Json::Object(out)
}

/// Overlay the configured attributes onto `props`
///
/// Attributes present in `previous` but no longer configured are removed so
/// the PUT clears them remotely. Computed attributes keep their remote value.
fn expand_into(
    props: &mut Map<String, Json>,
    attrs: &HashMap<String, Value>,
    previous: &HashMap<String, Value>,
) {
    let schema = schema();
    let cleared = |key: &str| {
        previous.contains_key(key) && schema.attributes.get(key).is_some_and(|a| !a.computed)
    };
    let mut set_or_clear = |field: &str, key: &str, value: Option<Json>| match value {
        Some(v) => {
            props.insert(field.to_string(), v);
        }
        None if cleared(key) => {
            props.remove(field);
        }
        None => {}
    };

    for &(key, field) in SCALARS {
        set_or_clear(field, key, attrs.get(key).map(Value::to_json));
    }
    set_or_clear(
        "protocols",
        "protocols",
        attrs.get("protocols").map(|_| Json::Array(strings(attrs, "protocols"))),
    );
    set_or_clear("contact", "contact", block(attrs, "contact").map(expand_contact));
    set_or_clear("license", "license", block(attrs, "license").map(expand_license));
    set_or_clear(
        "subscriptionKeyParameterNames",
        "subscription_key_parameter_names",
        block(attrs, "subscription_key_parameter_names").map(expand_key_names),
    );

    if let Some(api_type) = optional_str(attrs, "api_type") {
        props.insert("type".to_string(), json!(api_type));
        props.insert("apiType".to_string(), json!(soap_api_type(api_type)));
    }
    props.insert("authenticationSettings".to_string(), expand_authentication(attrs));
}

fn flatten_block(json: Option<&Json>, fields: &[(&str, &str)]) -> Option<Value> {
    let json = json.filter(|j| j.is_object())?;
    let mut out = HashMap::new();
    for (key, field) in fields {
        set_from_json(&mut out, key, json.get(*field));
    }
    (!out.is_empty()).then_some(Value::Map(out))
}

fn flatten(id: &ApiManagementApiId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert("name".to_string(), Value::from(id.api_name()));
    attrs.insert(
        "api_management_name".to_string(),
        Value::from(id.service_name.as_str()),
    );
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );
    if let Some(revision) = id.revision() {
        attrs.insert("revision".to_string(), Value::from(revision));
    }

    let Some(props) = body.get("properties") else {
        return attrs;
    };

    for (key, field) in SCALARS {
        set_from_json(&mut attrs, key, props.get(*field));
    }
    set_from_json(&mut attrs, "revision", props.get("apiRevision"));
    set_from_json(&mut attrs, "is_current", props.get("isCurrent"));
    set_from_json(&mut attrs, "is_online", props.get("isOnline"));
    attrs.insert(
        "api_type".to_string(),
        Value::from(
            props
                .get("type")
                .and_then(Json::as_str)
                .filter(|t| !t.is_empty())
                .unwrap_or("http"),
        ),
    );
    attrs.insert(
        "protocols".to_string(),
        props
            .get("protocols")
            .and_then(Value::from_json)
            .unwrap_or(Value::List(Vec::new())),
    );

    let blocks: [(&str, Option<Value>); 3] = [
        (
            "subscription_key_parameter_names",
            flatten_block(
                props.get("subscriptionKeyParameterNames"),
                &[("header", "header"), ("query", "query")],
            ),
        ),
        (
            "contact",
            flatten_block(
                props.get("contact"),
                &[("email", "email"), ("name", "name"), ("url", "url")],
            ),
        ),
        (
            "license",
            flatten_block(props.get("license"), &[("name", "name"), ("url", "url")]),
        ),
    ];
    for (key, value) in blocks {
        if let Some(value) = value {
            attrs.insert(key.to_string(), value);
        }
    }

    let auth = props.get("authenticationSettings");
    if let Some(oauth2) = flatten_block(
        auth.and_then(|a| a.get("oAuth2")),
        &[
            ("authorization_server_name", "authorizationServerId"),
            ("scope", "scope"),
        ],
    ) {
        attrs.insert("oauth2_authorization".to_string(), oauth2);
    }
    if let Some(openid) = flatten_block(
        auth.and_then(|a| a.get("openid")),
        &[
            ("openid_provider_name", "openidProviderId"),
            ("bearer_token_sending_methods", "bearerTokenSendingMethods"),
        ],
    ) {
        attrs.insert("openid_authentication".to_string(), openid);
    }
    attrs
}

// =============================================================================
// CRUD
// =============================================================================

fn api_id(client: &ArmClient, resource: &Resource) -> ProviderResult<ApiManagementApiId> {
    let service = ApiManagementServiceId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "api_management_name")?,
    );
    Ok(service.api(format!(
        "{};rev={}",
        required_str(resource, "name")?,
        required_str(resource, "revision")?
    )))
}

async fn import_definition(
    client: &ArmClient,
    id: &ApiManagementApiId,
    attrs: &HashMap<String, Value>,
) -> ProviderResult<()> {
    let Some(body) = expand_import(attrs) else {
        return Ok(());
    };
    debug!("importing the definition of {}", id);
    client
        .put(&id.to_string(), API_VERSION, body, None)
        .await
        .context("importing definition for", id)?;
    Ok(())
}

pub async fn create(client: &ArmClient, resource: &Resource) -> ProviderResult<State> {
    let id = api_id(client, resource)?;
    ensure_absent(client, RESOURCE_TYPE, &id, API_VERSION).await?;

    import_definition(client, &id, &resource.attributes).await?;

    let mut props = Map::new();
    props.insert(
        "type".to_string(),
        json!(optional_str(&resource.attributes, "api_type").unwrap_or("http")),
    );
    props.insert("path".to_string(), json!(""));
    expand_into(&mut props, &resource.attributes, &HashMap::new());
    client
        .put(
            &id.to_string(),
            API_VERSION,
            json!({ "properties": props }),
            Some("*"),
        )
        .await
        .context("creating", &id)?;
    info!("{}: creation complete", id);

    read(client, &resource.id, &id.to_string()).await
}

pub async fn read(client: &ArmClient, rid: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let id: ApiManagementApiId = parse_id(identifier)?;
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
    from: &State,
    resource: &Resource,
) -> ProviderResult<State> {
    let id: ApiManagementApiId = parse_id(identifier)?;

    if from.attributes.get("import") != resource.attributes.get("import") {
        import_definition(client, &id, &resource.attributes).await?;
    }

    let existing = client
        .get(&id.to_string(), API_VERSION)
        .await
        .context("retrieving", &id)?;

    let mut props = existing
        .get("properties")
        .and_then(Json::as_object)
        .cloned()
        .unwrap_or_default();
    for read_only in ["isCurrent", "isOnline"] {
        props.remove(read_only);
    }
    expand_into(&mut props, &resource.attributes, &from.attributes);

    client
        .put(
            &id.to_string(),
            API_VERSION,
            json!({ "properties": props }),
            Some("*"),
        )
        .await
        .context("updating", &id)?;

    read(client, &resource.id, identifier).await
}

pub async fn delete(client: &ArmClient, identifier: &str) -> ProviderResult<()> {
    let id: ApiManagementApiId = parse_id(identifier)?;
    delete_if_present(client, &id, API_VERSION).await
}
