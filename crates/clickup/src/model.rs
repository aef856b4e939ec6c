//! ClickUp task and custom field models.
//!
//! Parsing is lenient: ClickUp returns far more fields than we consume, and
//! several of the ones we do consume are shaped inconsistently across
//! workspaces (dropdown values in particular). Everything non-essential is
//! optional or defaulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A ClickUp task, optionally with its subtasks inlined
/// (`include_subtasks=true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
}

impl Task {
    /// Look up a custom field by its ID.
    pub fn custom_field(&self, field_id: &str) -> Option<&CustomField> {
        self.custom_fields.iter().find(|f| f.id == field_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: String,
}

/// A custom field as returned on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomField {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    /// Raw value; shape depends on `field_type` (dropdowns may carry an
    /// orderindex, an option object, an option ID, or an option name).
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub type_config: Option<TypeConfig>,
}

impl CustomField {
    /// Dropdown options, empty for non-dropdown fields.
    pub fn options(&self) -> &[DropdownOption] {
        self.type_config
            .as_ref()
            .map(|tc| tc.options.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub options: Vec<DropdownOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropdownOption {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub orderindex: Option<i64>,
}
