//! azurerm_api_management_backend
//!
//! A backend is either a single endpoint (`url` + `protocol`) or a
//! load-balanced `pool` of other backends; the two shapes are exclusive.

use std::collections::HashMap;

use azrm_core::provider::ProviderResult;
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::{debug, info};
use serde_json::{Map, Value as Json, json};

use super::{
    ArmContext, block, bool_or, delete_if_present, ensure_absent, gone, items, parse_id,
    put_json, required_str, set_from_json, strings,
};
use crate::client::ArmClient;
use crate::ids::{ApiManagementBackendId, ApiManagementServiceId};
use crate::validate;

pub const RESOURCE_TYPE: &str = "azurerm_api_management_backend";
/// Pools need a newer api-version than the rest of API Management
pub const API_VERSION: &str = "2024-05-01";

const SINGLE_ONLY: &[&str] = &[
    "url",
    "protocol",
    "credentials",
    "proxy",
    "tls",
    "circuit_breaker_rule",
];

const ERROR_REASONS: &[&str] = &[
    "OperationNotFound",
    "SubscriptionKeyNotFound",
    "SubscriptionKeyInvalid",
    "ClientConnectionFailure",
    "BackendConnectionFailure",
    "ExpressionValueEvaluationFailure",
];

fn circuit_breaker_rule() -> AttributeType {
    let status_code_range = AttributeType::Block(vec![
        AttributeSchema::new("min", validate::int("StatusCode", validate::status_code)).required(),
        AttributeSchema::new("max", validate::int("StatusCode", validate::status_code)).required(),
    ]);
    let failure_condition = AttributeType::Block(vec![
        AttributeSchema::new("count", validate::int("FailureCount", validate::failure_count)),
        AttributeSchema::new(
            "percentage",
            validate::int("FailurePercentage", validate::failure_percentage),
        ),
        AttributeSchema::new(
            "error_reasons",
            AttributeType::List(Box::new(AttributeType::Enum(
                ERROR_REASONS.iter().map(|r| r.to_string()).collect(),
            ))),
        ),
        AttributeSchema::new("interval", validate::string("Duration", validate::iso8601_duration))
            .required(),
        AttributeSchema::new("status_code_range", AttributeType::List(Box::new(status_code_range)))
            .required(),
    ]);
    AttributeType::Block(vec![
        AttributeSchema::new("name", types::non_empty_string()).required(),
        AttributeSchema::new("accept_retry_after", AttributeType::Bool).with_default(false),
        AttributeSchema::new(
            "trip_duration",
            validate::string("Duration", validate::iso8601_duration),
        )
        .required(),
        AttributeSchema::new("failure_condition", failure_condition).required(),
    ])
}

pub fn schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("A backend of an API Management service")
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
            AttributeSchema::new(
                "protocol",
                AttributeType::Enum(vec!["http".to_string(), "soap".to_string()]),
            )
            .conflicts_with(&["pool"]),
        )
        .attribute(
            AttributeSchema::new("url", types::non_empty_string()).conflicts_with(&["pool"]),
        )
        .attribute(AttributeSchema::new(
            "description",
            validate::string("BackendDescription", validate::backend_description),
        ))
        .attribute(AttributeSchema::new("resource_id", types::non_empty_string()))
        .attribute(AttributeSchema::new("title", types::non_empty_string()))
        .attribute(
            AttributeSchema::new(
                "credentials",
                AttributeType::Block(vec![
                    AttributeSchema::new(
                        "authorization",
                        AttributeType::Block(vec![
                            AttributeSchema::new("parameter", AttributeType::String),
                            AttributeSchema::new("scheme", AttributeType::String),
                        ]),
                    ),
                    AttributeSchema::new(
                        "certificate",
                        AttributeType::List(Box::new(AttributeType::String)),
                    ),
                    AttributeSchema::new("header", AttributeType::Map(Box::new(AttributeType::String)))
                        .with_description("Values are comma separated"),
                    AttributeSchema::new("query", AttributeType::Map(Box::new(AttributeType::String)))
                        .with_description("Values are comma separated"),
                ]),
            )
            .conflicts_with(&["pool"]),
        )
        .attribute(
            AttributeSchema::new(
                "proxy",
                AttributeType::Block(vec![
                    AttributeSchema::new("url", types::non_empty_string()).required(),
                    AttributeSchema::new("username", types::non_empty_string()).required(),
                    AttributeSchema::new("password", AttributeType::String).sensitive(),
                ]),
            )
            .conflicts_with(&["pool"]),
        )
        .attribute(
            AttributeSchema::new(
                "tls",
                AttributeType::Block(vec![
                    AttributeSchema::new("validate_certificate_chain", AttributeType::Bool),
                    AttributeSchema::new("validate_certificate_name", AttributeType::Bool),
                ]),
            )
            .conflicts_with(&["pool"]),
        )
        .attribute(
            AttributeSchema::new("circuit_breaker_rule", circuit_breaker_rule())
                .conflicts_with(&["pool"]),
        )
        .attribute(
            AttributeSchema::new(
                "pool",
                AttributeType::Block(vec![
                    AttributeSchema::new(
                        "service",
                        AttributeType::List(Box::new(AttributeType::Block(vec![
                            AttributeSchema::new("id", validate::string("ArmId", validate::arm_id))
                                .required(),
                            AttributeSchema::new(
                                "priority",
                                validate::int("Priority", validate::pool_priority),
                            ),
                            AttributeSchema::new(
                                "weight",
                                validate::int("Weight", validate::pool_weight),
                            ),
                        ]))),
                    )
                    .required(),
                ]),
            )
            .conflicts_with(SINGLE_ONLY),
        )
        .with_rule(single_backend_needs_endpoint)
        .with_rule(failure_condition_has_one_threshold)
}

fn single_backend_needs_endpoint(attrs: &HashMap<String, Value>) -> Result<(), String> {
    if attrs.contains_key("pool") {
        return Ok(());
    }
    if !attrs.contains_key("url") || !attrs.contains_key("protocol") {
        return Err("`url` and `protocol` are required when `pool` is not set".to_string());
    }
    Ok(())
}

fn failure_condition_has_one_threshold(attrs: &HashMap<String, Value>) -> Result<(), String> {
    let Some(condition) =
        block(attrs, "circuit_breaker_rule").and_then(|rule| block(rule, "failure_condition"))
    else {
        return Ok(());
    };
    match (condition.contains_key("count"), condition.contains_key("percentage")) {
        (true, false) | (false, true) => Ok(()),
        _ => Err(
            "exactly one of `failure_condition.count` and `failure_condition.percentage` must be set"
                .to_string(),
        ),
    }
}

// =============================================================================
// Expand / flatten
// =============================================================================

/// "a,b" -> ["a", "b"]
fn expand_credential_values(map: Option<&HashMap<String, Value>>) -> Json {
    let out: Map<String, Json> = map
        .into_iter()
        .flatten()
        .filter_map(|(k, v)| {
            v.as_str().map(|s| {
                let values = s.split(',').map(|p| Json::String(p.to_string())).collect();
                (k.clone(), Json::Array(values))
            })
        })
        .collect();
    Json::Object(out)
}

fn expand_credentials(credentials: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    if let Some(auth) = block(credentials, "authorization") {
        let mut authorization = Map::new();
        put_json(&mut authorization, "parameter", auth, "parameter");
        put_json(&mut authorization, "scheme", auth, "scheme");
        out.insert("authorization".to_string(), Json::Object(authorization));
    }
    let certificates: Vec<Json> = items(credentials, "certificate")
        .iter()
        .map(Value::to_json)
        .collect();
    if !certificates.is_empty() {
        out.insert("certificate".to_string(), Json::Array(certificates));
    }
    out.insert(
        "header".to_string(),
        expand_credential_values(credentials.get("header").and_then(Value::as_map)),
    );
    out.insert(
        "query".to_string(),
        expand_credential_values(credentials.get("query").and_then(Value::as_map)),
    );
    Json::Object(out)
}

fn expand_pool(pool: &HashMap<String, Value>) -> Json {
    let services: Vec<Json> = items(pool, "service")
        .iter()
        .filter_map(Value::as_map)
        .map(|service| {
            let mut item = Map::new();
            put_json(&mut item, "id", service, "id");
            put_json(&mut item, "priority", service, "priority");
            put_json(&mut item, "weight", service, "weight");
            Json::Object(item)
        })
        .collect();
    json!({ "services": services })
}

/// One rule; ARM nests it in `circuitBreaker.rules`
fn expand_circuit_breaker(rule: &HashMap<String, Value>) -> Json {
    let mut out = Map::new();
    put_json(&mut out, "name", rule, "name");
    out.insert(
        "acceptRetryAfter".to_string(),
        json!(bool_or(rule, "accept_retry_after", false)),
    );
    put_json(&mut out, "tripDuration", rule, "trip_duration");

    if let Some(condition) = block(rule, "failure_condition") {
        let mut failure = Map::new();
        put_json(&mut failure, "count", condition, "count");
        put_json(&mut failure, "percentage", condition, "percentage");
        put_json(&mut failure, "interval", condition, "interval");
        let reasons = strings(condition, "error_reasons");
        if !reasons.is_empty() {
            failure.insert("errorReasons".to_string(), Json::Array(reasons));
        }
        let ranges: Vec<Json> = items(condition, "status_code_range")
            .iter()
            .filter_map(Value::as_map)
            .map(|range| {
                let mut item = Map::new();
                put_json(&mut item, "min", range, "min");
                put_json(&mut item, "max", range, "max");
                Json::Object(item)
            })
            .collect();
        failure.insert("statusCodeRanges".to_string(), Json::Array(ranges));
        out.insert("failureCondition".to_string(), Json::Object(failure));
    }

    json!({ "rules": [out] })
}

fn expand(attrs: &HashMap<String, Value>) -> Json {
    let mut props = Map::new();

    if let Some(pool) = block(attrs, "pool") {
        props.insert("type".to_string(), json!("Pool"));
        props.insert("pool".to_string(), expand_pool(pool));
    } else {
        props.insert("type".to_string(), json!("Single"));
        put_json(&mut props, "protocol", attrs, "protocol");
        put_json(&mut props, "url", attrs, "url");
        if let Some(credentials) = block(attrs, "credentials") {
            props.insert("credentials".to_string(), expand_credentials(credentials));
        }
        if let Some(proxy) = block(attrs, "proxy") {
            let mut out = Map::new();
            put_json(&mut out, "url", proxy, "url");
            put_json(&mut out, "username", proxy, "username");
            put_json(&mut out, "password", proxy, "password");
            props.insert("proxy".to_string(), Json::Object(out));
        }
        if let Some(tls) = block(attrs, "tls") {
            let mut out = Map::new();
            put_json(&mut out, "validateCertificateChain", tls, "validate_certificate_chain");
            put_json(&mut out, "validateCertificateName", tls, "validate_certificate_name");
            props.insert("tls".to_string(), Json::Object(out));
        }
        if let Some(rule) = block(attrs, "circuit_breaker_rule") {
            props.insert("circuitBreaker".to_string(), expand_circuit_breaker(rule));
        }
    }

    put_json(&mut props, "description", attrs, "description");
    put_json(&mut props, "resourceId", attrs, "resource_id");
    put_json(&mut props, "title", attrs, "title");

    json!({ "properties": props })
}

/// ["a", "b"] -> "a,b"
fn flatten_credential_values(json: Option<&Json>) -> Option<Value> {
    let map: HashMap<String, Value> = json?
        .as_object()?
        .iter()
        .map(|(k, v)| {
            let joined = v
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Json::as_str)
                .collect::<Vec<_>>()
                .join(",");
            (k.clone(), Value::from(joined))
        })
        .collect();
    (!map.is_empty()).then_some(Value::Map(map))
}

fn flatten_credentials(json: &Json) -> Value {
    let mut out = HashMap::new();
    if let Some(auth) = json.get("authorization").filter(|a| a.is_object()) {
        let mut authorization = HashMap::new();
        set_from_json(&mut authorization, "parameter", auth.get("parameter"));
        set_from_json(&mut authorization, "scheme", auth.get("scheme"));
        out.insert("authorization".to_string(), Value::Map(authorization));
    }
    set_from_json(&mut out, "certificate", json.get("certificate"));
    if let Some(header) = flatten_credential_values(json.get("header")) {
        out.insert("header".to_string(), header);
    }
    if let Some(query) = flatten_credential_values(json.get("query")) {
        out.insert("query".to_string(), query);
    }
    Value::Map(out)
}

fn flatten_pool(json: &Json) -> Value {
    let services = json
        .get("services")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .map(|service| {
            let mut item = HashMap::new();
            set_from_json(&mut item, "id", service.get("id"));
            set_from_json(&mut item, "priority", service.get("priority"));
            set_from_json(&mut item, "weight", service.get("weight"));
            Value::Map(item)
        })
        .collect();
    Value::Map(HashMap::from([("service".to_string(), Value::List(services))]))
}

/// Only the first rule is managed
fn flatten_circuit_breaker(json: &Json) -> Option<Value> {
    let rule = json.get("rules")?.as_array()?.first()?;
    let mut out = HashMap::new();
    set_from_json(&mut out, "name", rule.get("name"));
    set_from_json(&mut out, "accept_retry_after", rule.get("acceptRetryAfter"));
    set_from_json(&mut out, "trip_duration", rule.get("tripDuration"));

    if let Some(condition) = rule.get("failureCondition").filter(|c| c.is_object()) {
        let mut failure = HashMap::new();
        // ARM reports the unused threshold as 0
        for (key, field) in [("count", "count"), ("percentage", "percentage")] {
            set_from_json(
                &mut failure,
                key,
                condition.get(field).filter(|n| n.as_i64() != Some(0)),
            );
        }
        set_from_json(&mut failure, "interval", condition.get("interval"));
        set_from_json(&mut failure, "error_reasons", condition.get("errorReasons"));
        let ranges = condition
            .get("statusCodeRanges")
            .and_then(Json::as_array)
            .into_iter()
            .flatten()
            .map(|range| {
                let mut item = HashMap::new();
                set_from_json(&mut item, "min", range.get("min"));
                set_from_json(&mut item, "max", range.get("max"));
                Value::Map(item)
            })
            .collect();
        failure.insert("status_code_range".to_string(), Value::List(ranges));
        out.insert("failure_condition".to_string(), Value::Map(failure));
    }
    Some(Value::Map(out))
}

fn flatten(id: &ApiManagementBackendId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert("name".to_string(), Value::from(id.backend_name.as_str()));
    attrs.insert(
        "api_management_name".to_string(),
        Value::from(id.service_name.as_str()),
    );
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );

    let Some(props) = body.get("properties") else {
        return attrs;
    };
    for (key, field) in [
        ("description", "description"),
        ("protocol", "protocol"),
        ("resource_id", "resourceId"),
        ("title", "title"),
        ("url", "url"),
    ] {
        set_from_json(&mut attrs, key, props.get(field));
    }

    if let Some(credentials) = props.get("credentials").filter(|c| c.is_object()) {
        attrs.insert("credentials".to_string(), flatten_credentials(credentials));
    }
    if let Some(proxy) = props.get("proxy").filter(|p| p.is_object()) {
        let mut out = HashMap::new();
        set_from_json(&mut out, "url", proxy.get("url"));
        set_from_json(&mut out, "username", proxy.get("username"));
        set_from_json(&mut out, "password", proxy.get("password"));
        attrs.insert("proxy".to_string(), Value::Map(out));
    }
    if let Some(tls) = props.get("tls").filter(|t| t.is_object()) {
        let mut out = HashMap::new();
        set_from_json(
            &mut out,
            "validate_certificate_chain",
            tls.get("validateCertificateChain"),
        );
        set_from_json(
            &mut out,
            "validate_certificate_name",
            tls.get("validateCertificateName"),
        );
        attrs.insert("tls".to_string(), Value::Map(out));
    }
    if let Some(rule) = props.get("circuitBreaker").and_then(flatten_circuit_breaker) {
        attrs.insert("circuit_breaker_rule".to_string(), rule);
    }
    if let Some(pool) = props.get("pool").filter(|p| p.is_object()) {
        attrs.insert("pool".to_string(), flatten_pool(pool));
    }
    attrs
}

// =============================================================================
// CRUD
// =============================================================================

fn backend_id(client: &ArmClient, resource: &Resource) -> ProviderResult<ApiManagementBackendId> {
    let service = ApiManagementServiceId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "api_management_name")?,
    );
    Ok(ApiManagementBackendId::new(
        service.subscription_id,
        service.resource_group_name,
        service.service_name,
        required_str(resource, "name")?,
    ))
}

async fn put(
    client: &ArmClient,
    id: &ApiManagementBackendId,
    attrs: &HashMap<String, Value>,
    action: &str,
) -> ProviderResult<()> {
    let body = expand(attrs);
    debug!(
        "sending {} backend of type {}",
        id,
        if attrs.contains_key("pool") { "Pool" } else { "Single" }
    );
    client
        .put(&id.to_string(), API_VERSION, body, None)
        .await
        .context(action, id)?;
    Ok(())
}

pub async fn create(client: &ArmClient, resource: &Resource) -> ProviderResult<State> {
    let id = backend_id(client, resource)?;
    ensure_absent(client, RESOURCE_TYPE, &id, API_VERSION).await?;
    put(client, &id, &resource.attributes, "creating").await?;
    info!("{}: creation complete", id);
    read(client, &resource.id, &id.to_string()).await
}

pub async fn read(client: &ArmClient, rid: &ResourceId, identifier: &str) -> ProviderResult<State> {
    let id: ApiManagementBackendId = parse_id(identifier)?;
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
    let id: ApiManagementBackendId = parse_id(identifier)?;
    put(client, &id, &resource.attributes, "updating").await?;
    read(client, &resource.id, identifier).await
}

pub async fn delete(client: &ArmClient, identifier: &str) -> ProviderResult<()> {
    let id: ApiManagementBackendId = parse_id(identifier)?;
    delete_if_present(client, &id, API_VERSION).await
}
