//! The fixed set of CRM operations the model may invoke.
//!
//! The catalog is parsed once at startup and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../catalog/tools.json");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

impl ToolDescriptor {
    /// OpenAI-style function declaration offered to the model.
    pub fn to_model_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not read tool catalog `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse tool catalog from {origin}: {source}")]
    Parse { origin: String, source: serde_json::Error },
    #[error("tool catalog contains duplicate tool name `{0}`")]
    DuplicateName(String),
    #[error("tool catalog contains an entry with a blank name")]
    BlankName,
    #[error("tool catalog is empty")]
    Empty,
}

#[derive(Clone, Debug)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_json("built-in catalog", BUILTIN_CATALOG)
    }

    /// Loads the catalog from `path` when given, otherwise the embedded one.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let catalog = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|source| CatalogError::Read { path: path.to_path_buf(), source })?;
                Self::from_json(&path.display().to_string(), &raw)?
            }
            None => Self::builtin()?,
        };

        debug!(
            event_name = "catalog.loaded",
            tools = catalog.len(),
            custom = path.is_some(),
            "tool catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_json(origin: &str, raw: &str) -> Result<Self, CatalogError> {
        let tools = serde_json::from_str::<Vec<ToolDescriptor>>(raw)
            .map_err(|source| CatalogError::Parse { origin: origin.to_string(), source })?;
        Self::from_descriptors(tools)
    }

    pub fn from_descriptors(tools: Vec<ToolDescriptor>) -> Result<Self, CatalogError> {
        if tools.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(CatalogError::BlankName);
            }
            if index.insert(tool.name.clone(), position).is_some() {
                return Err(CatalogError::DuplicateName(tool.name.clone()));
            }
        }

        Ok(Self { tools, index })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn model_tools(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDescriptor::to_model_tool).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{CatalogError, ToolCatalog};

    #[test]
    fn builtin_catalog_lists_every_crm_operation() {
        let catalog = ToolCatalog::builtin().expect("builtin catalog parses");

        assert_eq!(catalog.len(), 21);
        for name in [
            "contacts_get-contacts",
            "contacts_add-tags",
            "conversations_send-a-new-message",
            "opportunities_update-opportunity",
            "locations_get-custom-fields",
            "calendars_get-calendars",
            "calendars_create-appointment",
            "payments_list-transactions",
        ] {
            assert!(catalog.contains(name), "missing {name}");
        }
        assert!(!catalog.contains("contacts_delete-everything"));
    }

    #[test]
    fn model_tools_use_function_declaration_shape() {
        let catalog = ToolCatalog::builtin().expect("builtin catalog parses");
        let tools = catalog.model_tools();

        assert_eq!(tools.len(), catalog.len());
        let first = &tools[0];
        assert_eq!(first["type"], "function");
        assert_eq!(first["function"]["name"], "contacts_get-contacts");
        assert_eq!(first["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let raw = r#"[
            {"name": "contacts_get-contact", "description": "a"},
            {"name": "contacts_get-contact", "description": "b"}
        ]"#;

        let error = ToolCatalog::from_json("inline", raw).expect_err("duplicates must fail");
        assert!(
            matches!(error, CatalogError::DuplicateName(ref name) if name == "contacts_get-contact")
        );
    }

    #[test]
    fn missing_parameters_default_to_empty_object_schema() {
        let catalog =
            ToolCatalog::from_json("inline", r#"[{"name": "locations_get-location"}]"#)
                .expect("catalog parses");
        let tool = catalog.get("locations_get-location").expect("tool exists");

        assert_eq!(tool.parameters["type"], "object");
        assert_eq!(tool.description, "");
    }

    #[test]
    fn load_reads_catalog_from_explicit_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("tools.json");
        fs::write(&path, r#"[{"name": "contacts_get-contacts", "description": "list"}]"#)
            .expect("write catalog");

        let catalog = ToolCatalog::load(Some(&path)).expect("catalog loads");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["contacts_get-contacts"]);
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let error = ToolCatalog::from_json("inline", "[]").expect_err("empty must fail");
        assert!(matches!(error, CatalogError::Empty));
    }
}
