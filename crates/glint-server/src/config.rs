//! Server settings.
//!
//! Settings arrive from two places, later sources overlaying earlier ones:
//! `initializationOptions` in the `initialize` request, then any number of
//! `workspace/didChangeConfiguration` notifications. Editors commonly nest
//! the server's section under its name, so a top-level `"glint"` key is
//! unwrapped before merging.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Section name editors use to namespace our settings.
pub const CONFIG_SECTION: &str = "glint";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Publish diagnostics on open/change/save.
    pub diagnostics: bool,
    /// Serve completion requests.
    pub completion: bool,
    /// Lines longer than this get a diagnostic.
    pub max_line_length: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            diagnostics: true,
            completion: true,
            max_line_length: 80,
        }
    }
}

impl Settings {
    /// Overlay the keys present in `value` onto these settings. Unknown
    /// keys are ignored; a non-object or unparsable payload leaves the
    /// settings untouched.
    pub fn merge(&mut self, value: &Value) {
        let section = value.get(CONFIG_SECTION).unwrap_or(value);
        if !section.is_object() {
            return;
        }

        let mut current = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            _ => return,
        };
        if let Value::Object(overlay) = section {
            for (key, val) in overlay {
                current.insert(key.clone(), val.clone());
            }
        }

        match serde_json::from_value(Value::Object(current)) {
            Ok(merged) => *self = merged,
            Err(e) => warn!("ignoring invalid settings payload: {}", e),
        }
    }
}
