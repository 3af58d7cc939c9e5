//! In-memory ARM double for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use azrm_core::resource::Resource;
use azrm_core::schema::ResourceSchema;
use reqwest::Method;
use serde_json::{Value as Json, json};

use crate::client::{ArmClient, ArmRequest, ArmResponse, ArmResult, ArmTransport};

#[derive(Default)]
struct FakeState {
    resources: HashMap<String, Json>,
    scripted: HashMap<(Method, String), VecDeque<ArmResponse>>,
    requests: Vec<ArmRequest>,
}

/// Stores PUT bodies by path and serves them back. Scripted responses
/// replace the default answer for one matching request but the store is
/// still updated.
#[derive(Clone, Default)]
pub struct FakeArm {
    state: Arc<Mutex<FakeState>>,
}

impl FakeArm {
    pub const ENDPOINT: &'static str = "https://management.test";
    pub const SUBSCRIPTION: &'static str = "00000000-0000-0000-0000-000000000000";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> ArmClient {
        ArmClient::new(
            Arc::new(self.clone()),
            Self::ENDPOINT,
            Self::SUBSCRIPTION,
            Duration::ZERO,
        )
    }

    /// Queue a response for the next `method` request on `path`
    pub fn respond(&self, method: Method, path: &str, response: ArmResponse) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Pre-populate a remote resource
    pub fn seed(&self, path: &str, body: Json) {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(path.to_string(), body);
    }

    pub fn resource(&self, path: &str) -> Option<Json> {
        self.state.lock().unwrap().resources.get(path).cloned()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .count()
    }

    pub fn last_request(&self, method: Method) -> Option<ArmRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .rev()
            .find(|r| r.method == method)
            .cloned()
    }

    /// Every request body sent with `method` to `path`, oldest first
    pub fn bodies(&self, method: Method, path: &str) -> Vec<Json> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .filter_map(|r| r.body.clone())
            .collect()
    }
}

/// `resource` with schema defaults filled in, as configuration loading does
pub fn configured(schema: &ResourceSchema, mut resource: Resource) -> Resource {
    schema.apply_defaults(&mut resource.attributes);
    resource
}

fn path_of(url: &str) -> String {
    let without_endpoint = url.strip_prefix(FakeArm::ENDPOINT).unwrap_or(url);
    without_endpoint
        .split('?')
        .next()
        .unwrap_or(without_endpoint)
        .to_string()
}

/// Children of `path` when its parent resource is stored, e.g. `.../service/x/apis`
fn collection(resources: &HashMap<String, Json>, path: &str) -> Option<Vec<Json>> {
    let (parent, _) = path.rsplit_once('/')?;
    if !resources.contains_key(parent) {
        return None;
    }
    let prefix = format!("{}/", path);
    let mut children: Vec<(&String, &Json)> = resources
        .iter()
        .filter(|(key, _)| {
            key.strip_prefix(&prefix)
                .is_some_and(|rest| !rest.contains('/'))
        })
        .collect();
    children.sort_by(|a, b| a.0.cmp(b.0));
    Some(children.into_iter().map(|(_, body)| body.clone()).collect())
}

/// JSON merge patch: objects merge recursively, anything else replaces
fn merge(target: &mut Json, patch: Json) {
    match (target, patch) {
        (Json::Object(target), Json::Object(patch)) => {
            for (key, value) in patch {
                merge(target.entry(key).or_insert(Json::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

fn not_found(path: &str) -> ArmResponse {
    ArmResponse::new(404).with_body(json!({
        "error": {
            "code": "ResourceNotFound",
            "message": format!("The Resource '{}' was not found.", path)
        }
    }))
}

#[async_trait]
impl ArmTransport for FakeArm {
    async fn send(&self, request: ArmRequest) -> ArmResult<ArmResponse> {
        let path = path_of(&request.url);
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        let default = match request.method {
            Method::GET => match state.resources.get(&path) {
                Some(body) => ArmResponse::new(200).with_body(body.clone()),
                None => match collection(&state.resources, &path) {
                    Some(items) => ArmResponse::new(200).with_body(json!({ "value": items })),
                    None => not_found(&path),
                },
            },
            Method::PUT => {
                let mut body = request.body.clone().unwrap_or_else(|| json!({}));
                if let Some(obj) = body.as_object_mut() {
                    let name = path.rsplit('/').next().unwrap_or_default().to_string();
                    obj.insert("id".to_string(), json!(path));
                    obj.insert("name".to_string(), json!(name));
                }
                let existed = state.resources.insert(path.clone(), body.clone()).is_some();
                ArmResponse::new(if existed { 200 } else { 201 }).with_body(body)
            }
            Method::PATCH => {
                let body = state.resources.entry(path.clone()).or_insert_with(|| json!({}));
                merge(body, request.body.clone().unwrap_or_else(|| json!({})));
                ArmResponse::new(200).with_body(body.clone())
            }
            // Actions answer with the parent's properties, e.g. `.../access/listSecrets`
            Method::POST => match path
                .rsplit_once('/')
                .and_then(|(parent, _)| state.resources.get(parent))
            {
                Some(body) => ArmResponse::new(200)
                    .with_body(body.get("properties").cloned().unwrap_or_else(|| json!({}))),
                None => not_found(&path),
            },
            Method::DELETE => match state.resources.remove(&path) {
                Some(_) => ArmResponse::new(200),
                None => ArmResponse::new(204),
            },
            _ => ArmResponse::new(200),
        };

        let scripted = state
            .scripted
            .get_mut(&(request.method.clone(), path))
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or(default))
    }
}
