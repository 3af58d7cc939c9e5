//! Configuration file loading
//!
//! ```json
//! {
//!   "provider": { "subscription_id": "..." },
//!   "resources": [
//!     { "type": "azurerm_private_dns_zone", "name": "main", "attributes": { ... } }
//!   ]
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use azrm_core::resource::{Resource, ResourceId, Value};
use azrm_core::schema::ResourceSchema;
use azrm_provider::ProviderBlock;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub provider: Option<ProviderBlock>,
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| format!("Parse error: {}", e))
    }

    /// Desired resources in declaration order, with schema defaults filled in
    pub fn resources(
        &self,
        schemas: &HashMap<String, ResourceSchema>,
    ) -> Result<Vec<Resource>, String> {
        let mut seen = HashSet::new();
        let mut resources = Vec::with_capacity(self.resources.len());

        for block in &self.resources {
            let id = ResourceId::new(&block.resource_type, &block.name);
            let Some(schema) = schemas.get(&block.resource_type) else {
                return Err(format!("{}: unknown resource type", id));
            };
            if !seen.insert(id.clone()) {
                return Err(format!("{}: declared more than once", id));
            }

            let mut attributes = block.attributes.clone();
            schema.apply_defaults(&mut attributes);
            resources.push(Resource { id, attributes });
        }

        Ok(resources)
    }
}
