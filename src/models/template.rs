use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    /// Raw stored priority; only 1, 2 and 3 are meaningful.
    pub priority: i32,
    pub subject: Option<String>,
    pub body: String,
}

impl Template {
    /// Substitutes every `{{key}}` in the body. Fails if a marker is left over.
    pub fn render(&self, placeholders: &HashMap<String, String>) -> Result<String, Error> {
        debug!(
            template_name = %self.name,
            placeholder_count = placeholders.len(),
            "Rendering template"
        );

        let mut result = self.body.clone();

        for (key, value) in placeholders {
            let marker = format!("{{{{{}}}}}", key);
            result = result.replace(&marker, value);
        }

        if let Some(start) = result.find("{{") {
            if let Some(len) = result[start..].find("}}") {
                let missing = &result[start..start + len + 2];

                warn!(
                    template_name = %self.name,
                    missing_placeholder = %missing,
                    "Template contains unreplaced placeholder"
                );

                return Err(anyhow!("Missing placeholder in template: {}", missing));
            }
        }

        Ok(result)
    }
}
