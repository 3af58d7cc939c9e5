//! azurerm_private_dns_{a,aaaa,cname,mx,ptr,srv,txt}_record
//!
//! Every record type shares one lifecycle; only the payload under
//! `properties` differs.

use std::collections::HashMap;
use std::fmt;

use azrm_core::provider::{ProviderError, ProviderResult};
use azrm_core::resource::{Resource, ResourceId, State, Value};
use azrm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use log::info;
use serde_json::{Map, Value as Json, json};

use super::{
    ArmContext, delete_if_present, ensure_absent, gone, items, optional_str, parse_id,
    required_str, set_from_json, tags_from_json, tags_to_json,
};
use crate::client::ArmClient;
use crate::ids::{PrivateDnsRecordId, PrivateDnsZoneId};
use crate::validate;

pub const API_VERSION: &str = super::private_dns_zone::API_VERSION;

/// TXT strings longer than this are split across several entries
const TXT_CHUNK: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Ptr,
    Srv,
    Txt,
}

impl RecordType {
    pub const ALL: [RecordType; 7] = [
        RecordType::A,
        RecordType::Aaaa,
        RecordType::Cname,
        RecordType::Mx,
        RecordType::Ptr,
        RecordType::Srv,
        RecordType::Txt,
    ];

    pub fn resource_type(self) -> &'static str {
        match self {
            RecordType::A => "azurerm_private_dns_a_record",
            RecordType::Aaaa => "azurerm_private_dns_aaaa_record",
            RecordType::Cname => "azurerm_private_dns_cname_record",
            RecordType::Mx => "azurerm_private_dns_mx_record",
            RecordType::Ptr => "azurerm_private_dns_ptr_record",
            RecordType::Srv => "azurerm_private_dns_srv_record",
            RecordType::Txt => "azurerm_private_dns_txt_record",
        }
    }

    /// Record type segment of the ARM ID
    pub fn segment(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Ptr => "PTR",
            RecordType::Srv => "SRV",
            RecordType::Txt => "TXT",
        }
    }

    pub fn from_resource_type(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.resource_type() == name)
    }

    /// Property holding the record payload
    fn property(self) -> &'static str {
        match self {
            RecordType::A => "aRecords",
            RecordType::Aaaa => "aaaaRecords",
            RecordType::Cname => "cnameRecord",
            RecordType::Mx => "mxRecords",
            RecordType::Ptr => "ptrRecords",
            RecordType::Srv => "srvRecords",
            RecordType::Txt => "txtRecords",
        }
    }

    /// Configuration attribute holding the record payload
    fn attribute(self) -> &'static str {
        match self {
            RecordType::A | RecordType::Aaaa | RecordType::Ptr => "records",
            _ => "record",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

// =============================================================================
// Schema
// =============================================================================

fn int_field(name: &str, validator: validate::Validator) -> AttributeSchema {
    AttributeSchema::new(name, validate::int(name, validator)).required()
}

fn payload_schema(record_type: RecordType) -> AttributeSchema {
    let name = record_type.attribute();
    let attr_type = match record_type {
        RecordType::A => AttributeType::Set(Box::new(validate::string(
            "Ipv4Address",
            validate::ipv4_address,
        ))),
        RecordType::Aaaa => AttributeType::Set(Box::new(validate::string(
            "Ipv6Address",
            validate::ipv6_address,
        ))),
        RecordType::Ptr => AttributeType::Set(Box::new(types::non_empty_string())),
        RecordType::Cname => types::non_empty_string(),
        RecordType::Mx => AttributeType::Set(Box::new(AttributeType::Block(vec![
            int_field("preference", validate::mx_preference),
            AttributeSchema::new("exchange", types::non_empty_string()).required(),
        ]))),
        RecordType::Srv => AttributeType::Set(Box::new(AttributeType::Block(vec![
            int_field("priority", validate::srv_field),
            int_field("weight", validate::srv_field),
            int_field("port", validate::srv_field),
            AttributeSchema::new("target", types::non_empty_string()).required(),
        ]))),
        RecordType::Txt => AttributeType::Set(Box::new(AttributeType::Block(vec![
            AttributeSchema::new("value", validate::string("TxtValue", validate::txt_value))
                .required(),
        ]))),
    };
    AttributeSchema::new(name, attr_type).required()
}

pub fn schema(record_type: RecordType) -> ResourceSchema {
    let name = AttributeSchema::new("name", validate::string("RecordName", validate::record_name))
        .force_new();
    let name = if record_type == RecordType::Mx {
        name.with_default("@")
    } else {
        name.required()
    };

    ResourceSchema::new(record_type.resource_type())
        .with_description(format!("A Private DNS {} record set", record_type))
        .attribute(name)
        .attribute(
            AttributeSchema::new("zone_name", validate::string("ZoneName", validate::zone_name))
                .required()
                .force_new(),
        )
        .attribute(
            AttributeSchema::new("resource_group_name", types::non_empty_string())
                .required()
                .force_new(),
        )
        .attribute(AttributeSchema::new("ttl", validate::int("Ttl", validate::ttl)).required())
        .attribute(payload_schema(record_type))
        .attribute(AttributeSchema::new("tags", types::tags()))
        .attribute(AttributeSchema::new("fqdn", AttributeType::String).read_only())
}

// =============================================================================
// Payload conversion
// =============================================================================

fn field_int(map: &HashMap<String, Value>, key: &str) -> i64 {
    map.get(key).and_then(Value::as_int).unwrap_or_default()
}

fn field_str<'a>(map: &'a HashMap<String, Value>, key: &str) -> &'a str {
    map.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn split_txt(value: &str) -> Vec<Json> {
    let chars: Vec<char> = value.chars().collect();
    chars
        .chunks(TXT_CHUNK)
        .map(|chunk| Json::String(chunk.iter().collect()))
        .collect()
}

fn expand_payload(record_type: RecordType, attrs: &HashMap<String, Value>) -> Json {
    let key = record_type.attribute();
    let blocks = || items(attrs, key).iter().filter_map(Value::as_map);
    let addresses = |field: &str| -> Json {
        items(attrs, key)
            .iter()
            .filter_map(Value::as_str)
            .map(|s| {
                let mut entry = Map::new();
                entry.insert(field.to_string(), Json::String(s.to_string()));
                Json::Object(entry)
            })
            .collect()
    };

    match record_type {
        RecordType::A => addresses("ipv4Address"),
        RecordType::Aaaa => addresses("ipv6Address"),
        RecordType::Ptr => addresses("ptrdname"),
        RecordType::Cname => json!({ "cname": optional_str(attrs, key).unwrap_or_default() }),
        RecordType::Mx => blocks()
            .map(|b| {
                json!({
                    "preference": field_int(b, "preference"),
                    "exchange": field_str(b, "exchange"),
                })
            })
            .collect(),
        RecordType::Srv => blocks()
            .map(|b| {
                json!({
                    "priority": field_int(b, "priority"),
                    "weight": field_int(b, "weight"),
                    "port": field_int(b, "port"),
                    "target": field_str(b, "target"),
                })
            })
            .collect(),
        RecordType::Txt => blocks()
            .map(|b| json!({ "value": split_txt(field_str(b, "value")) }))
            .collect(),
    }
}

fn flatten_payload(record_type: RecordType, payload: &Json) -> Option<Value> {
    let entries = || payload.as_array().into_iter().flatten();
    let addresses = |field: &str| {
        Value::List(
            entries()
                .filter_map(|e| e.get(field).and_then(Json::as_str))
                .map(Value::from)
                .collect(),
        )
    };
    let block = |pairs: Vec<(&str, Option<Value>)>| {
        Value::Map(
            pairs
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
                .collect(),
        )
    };

    let value = match record_type {
        RecordType::A => addresses("ipv4Address"),
        RecordType::Aaaa => addresses("ipv6Address"),
        RecordType::Ptr => addresses("ptrdname"),
        RecordType::Cname => Value::from(payload.get("cname")?.as_str()?),
        RecordType::Mx => Value::List(
            entries()
                .map(|e| {
                    block(vec![
                        ("preference", e.get("preference").and_then(Value::from_json)),
                        ("exchange", e.get("exchange").and_then(Value::from_json)),
                    ])
                })
                .collect(),
        ),
        RecordType::Srv => Value::List(
            entries()
                .map(|e| {
                    block(vec![
                        ("priority", e.get("priority").and_then(Value::from_json)),
                        ("weight", e.get("weight").and_then(Value::from_json)),
                        ("port", e.get("port").and_then(Value::from_json)),
                        ("target", e.get("target").and_then(Value::from_json)),
                    ])
                })
                .collect(),
        ),
        RecordType::Txt => Value::List(
            entries()
                .map(|e| {
                    let joined: String = e
                        .get("value")
                        .and_then(Json::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(Json::as_str)
                        .collect();
                    block(vec![("value", Some(Value::from(joined)))])
                })
                .collect(),
        ),
    };
    Some(value)
}

fn expand(record_type: RecordType, attrs: &HashMap<String, Value>) -> Json {
    let mut properties = Map::new();
    properties.insert(
        "ttl".to_string(),
        json!(attrs.get("ttl").and_then(Value::as_int).unwrap_or(300)),
    );
    properties.insert("metadata".to_string(), tags_to_json(attrs));
    properties.insert(
        record_type.property().to_string(),
        expand_payload(record_type, attrs),
    );
    json!({ "properties": properties })
}

fn flatten(record_type: RecordType, id: &PrivateDnsRecordId, body: &Json) -> HashMap<String, Value> {
    let mut attrs = HashMap::new();
    attrs.insert(
        "name".to_string(),
        Value::from(id.relative_record_set_name.as_str()),
    );
    attrs.insert(
        "zone_name".to_string(),
        Value::from(id.private_dns_zone_name.as_str()),
    );
    attrs.insert(
        "resource_group_name".to_string(),
        Value::from(id.resource_group_name.as_str()),
    );

    let props = body.get("properties");
    set_from_json(&mut attrs, "ttl", props.and_then(|p| p.get("ttl")));
    set_from_json(&mut attrs, "fqdn", props.and_then(|p| p.get("fqdn")));
    attrs.insert(
        "tags".to_string(),
        tags_from_json(props.and_then(|p| p.get("metadata"))),
    );
    if let Some(payload) = props
        .and_then(|p| p.get(record_type.property()))
        .and_then(|p| flatten_payload(record_type, p))
    {
        attrs.insert(record_type.attribute().to_string(), payload);
    }
    attrs
}

// =============================================================================
// CRUD
// =============================================================================

fn record_id(
    client: &ArmClient,
    record_type: RecordType,
    resource: &Resource,
) -> ProviderResult<PrivateDnsRecordId> {
    let zone = PrivateDnsZoneId::new(
        client.subscription_id(),
        required_str(resource, "resource_group_name")?,
        required_str(resource, "zone_name")?,
    );
    let name = optional_str(&resource.attributes, "name")
        .filter(|n| !n.is_empty())
        .or(if record_type == RecordType::Mx { Some("@") } else { None })
        .ok_or_else(|| {
            ProviderError::validation("`name` is required").for_resource(resource.id.clone())
        })?;
    Ok(zone.record(record_type.segment(), name))
}

/// Parse a record ID and check its type segment
pub fn parse_record_id(record_type: RecordType, identifier: &str) -> ProviderResult<PrivateDnsRecordId> {
    let id: PrivateDnsRecordId = parse_id(identifier)?;
    if !id.record_type.eq_ignore_ascii_case(record_type.segment()) {
        return Err(ProviderError::invalid_id(format!(
            "{:?} is a {} record set, expected {}",
            identifier, id.record_type, record_type
        )));
    }
    Ok(id)
}

pub async fn create(
    client: &ArmClient,
    record_type: RecordType,
    resource: &Resource,
) -> ProviderResult<State> {
    let id = record_id(client, record_type, resource)?;
    ensure_absent(client, record_type.resource_type(), &id, API_VERSION).await?;

    client
        .put(
            &id.to_string(),
            API_VERSION,
            expand(record_type, &resource.attributes),
            None,
        )
        .await
        .context("creating", &id)?;
    info!("{}: creation complete", id);

    read(client, record_type, &resource.id, &id.to_string()).await
}

pub async fn read(
    client: &ArmClient,
    record_type: RecordType,
    rid: &ResourceId,
    identifier: &str,
) -> ProviderResult<State> {
    let id = parse_record_id(record_type, identifier)?;
    let body = match client.get(&id.to_string(), API_VERSION).await {
        Ok(body) => body,
        Err(e) if e.was_not_found() => return Ok(gone(rid, &id)),
        Err(e) => return Err(e).context("retrieving", &id),
    };
    Ok(State::existing(rid.clone(), flatten(record_type, &id, &body))
        .with_identifier(id.to_string()))
}

pub async fn update(
    client: &ArmClient,
    record_type: RecordType,
    identifier: &str,
    resource: &Resource,
) -> ProviderResult<State> {
    let id = parse_record_id(record_type, identifier)?;
    client
        .put(
            &id.to_string(),
            API_VERSION,
            expand(record_type, &resource.attributes),
            None,
        )
        .await
        .context("updating", &id)?;
    read(client, record_type, &resource.id, identifier).await
}

pub async fn delete(
    client: &ArmClient,
    record_type: RecordType,
    identifier: &str,
) -> ProviderResult<()> {
    let id = parse_record_id(record_type, identifier)?;
    delete_if_present(client, &id, API_VERSION).await
}
