//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the desired state declared in configuration with the current
//! state fetched from the Provider, and generates the list of required
//! Effects (Plan).

use std::collections::{HashMap, HashSet};

use crate::effect::Effect;
use crate::plan::Plan;
use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed -> needs delete then create
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: Option<&ResourceSchema>) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        return Diff::NoChange(desired.id.clone());
    }

    let replace = schema.is_some_and(|s| {
        changed
            .iter()
            .any(|name| s.attributes.get(name).is_some_and(|a| a.force_new))
    });

    if replace {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
///
/// Only attributes present in `desired` are compared; read-only attributes
/// are never a difference.
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: Option<&ResourceSchema>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        let attr = schema.and_then(|s| s.attributes.get(key));
        if attr.is_some_and(|a| a.is_read_only()) {
            continue;
        }

        let equal = match current.get(key) {
            Some(current_value) => match attr {
                Some(a) => a.values_equal(desired_value, current_value),
                None => desired_value == current_value,
            },
            None => false,
        };
        if !equal {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

/// Compute Diff for multiple resources and generate a Plan
///
/// `current_states` is in state (creation) order. States with no desired
/// counterpart are deleted last created first, as `destroy_plan` does.
pub fn create_plan(
    desired: &[Resource],
    current_states: &[State],
    schemas: &HashMap<String, ResourceSchema>,
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        let current = current_states
            .iter()
            .find(|s| s.exists && s.id == resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        match diff(resource, &current, schemas.get(&resource.id.resource_type)) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Update {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => plan.add(Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            }),
            Diff::NoChange(_) => {}
        }
    }

    let wanted: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    let orphans = current_states.iter().filter(|s| !wanted.contains(&s.id));
    add_deletes(&mut plan, orphans);

    plan
}

fn add_deletes<'a>(plan: &mut Plan, states: impl DoubleEndedIterator<Item = &'a State>) {
    for state in states.rev() {
        if !state.exists {
            continue;
        }
        if let Some(identifier) = &state.identifier {
            plan.add(Effect::Delete {
                id: state.id.clone(),
                identifier: identifier.clone(),
            });
        }
    }
}

/// Plan deleting every existing state, last created first
pub fn destroy_plan(states: &[State]) -> Plan {
    let mut plan = Plan::new();
    add_deletes(&mut plan, states.iter());
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn link_schema() -> ResourceSchema {
        ResourceSchema::new("link")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("virtual_network_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("registration_enabled", AttributeType::Bool))
            .attribute(AttributeSchema::new(
                "protocols",
                AttributeType::Set(Box::new(AttributeType::String)),
            ))
            .attribute(AttributeSchema::new("fqdn", AttributeType::String).read_only())
    }

    fn existing(attrs: &[(&str, Value)]) -> State {
        State::existing(
            ResourceId::new("link", "test"),
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
        .with_identifier("/id")
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("link", "test");
        let current = State::not_found(ResourceId::new("link", "test"));

        let result = diff(&desired, &current, None);
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("link", "test").with_attribute("registration_enabled", true);
        let current = existing(&[("registration_enabled", Value::Bool(false))]);

        match diff(&desired, &current, Some(&link_schema())) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["registration_enabled".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn force_new_change_yields_replace() {
        let desired = Resource::new("link", "test").with_attribute("virtual_network_id", "/vnet2");
        let current = existing(&[("virtual_network_id", Value::from("/vnet1"))]);

        let result = diff(&desired, &current, Some(&link_schema()));
        assert!(matches!(result, Diff::Replace { .. }));
    }

    #[test]
    fn set_reordering_is_no_change() {
        let desired = Resource::new("link", "test").with_attribute(
            "protocols",
            Value::List(vec![Value::from("https"), Value::from("http")]),
        );
        let current = existing(&[(
            "protocols",
            Value::List(vec![Value::from("http"), Value::from("https")]),
        )]);

        let result = diff(&desired, &current, Some(&link_schema()));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn computed_and_unset_attributes_are_ignored() {
        let desired = Resource::new("link", "test")
            .with_attribute("name", "l1")
            .with_attribute("fqdn", "stale.example");
        let current = existing(&[
            ("name", Value::from("l1")),
            ("fqdn", Value::from("l1.example")),
            ("registration_enabled", Value::Bool(true)),
        ]);

        let result = diff(&desired, &current, Some(&link_schema()));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn create_plan_deletes_orphans() {
        let resources = vec![Resource::new("link", "new")];

        let current_states = vec![
            State::existing(ResourceId::new("link", "old"), HashMap::new())
                .with_identifier("/old"),
        ];

        let mut schemas = HashMap::new();
        schemas.insert("link".to_string(), link_schema());

        let plan = create_plan(&resources, &current_states, &schemas);
        assert_eq!(plan.effects().len(), 2);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(
            &plan.effects()[1],
            Effect::Delete { identifier, .. } if identifier == "/old"
        ));
    }

    #[test]
    fn destroy_plan_reverses_order() {
        let states = vec![
            State::existing(ResourceId::new("zone", "a"), HashMap::new()).with_identifier("/a"),
            State::not_found(ResourceId::new("record", "gone")),
            State::existing(ResourceId::new("record", "b"), HashMap::new()).with_identifier("/b"),
        ];

        let plan = destroy_plan(&states);
        let ids: Vec<String> = plan
            .effects()
            .iter()
            .map(|e| e.resource_id().to_string())
            .collect();
        assert_eq!(ids, vec!["record.b", "zone.a"]);
    }

    #[test]
    fn orphans_are_deleted_in_reverse_state_order() {
        // Addresses sort the zone after its record; state order must win
        let states = vec![
            State::existing(ResourceId::new("zone", "z"), HashMap::new()).with_identifier("/z"),
            State::existing(ResourceId::new("record", "r"), HashMap::new()).with_identifier("/z/r"),
        ];

        let plan = create_plan(&[], &states, &HashMap::new());
        let ids: Vec<String> = plan
            .effects()
            .iter()
            .map(|e| e.resource_id().to_string())
            .collect();
        assert_eq!(ids, vec!["record.r", "zone.z"]);
    }

    #[test]
    fn normalized_force_new_attribute_is_no_change() {
        let schema = ResourceSchema::new("service").attribute(
            AttributeSchema::new("location", AttributeType::String)
                .required()
                .force_new()
                .normalized_with(|v| match v {
                    Value::String(s) => Value::String(s.replace(' ', "").to_lowercase()),
                    other => other.clone(),
                }),
        );
        let desired = Resource::new("service", "test").with_attribute("location", "West Europe");
        let current = State::existing(
            ResourceId::new("service", "test"),
            HashMap::from([("location".to_string(), Value::from("westeurope"))]),
        )
        .with_identifier("/id");

        assert!(matches!(
            diff(&desired, &current, Some(&schema)),
            Diff::NoChange(_)
        ));
    }
}
