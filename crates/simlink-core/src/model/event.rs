use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A simulator event to fire, identified by name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    name: String,
    #[serde(default)]
    value: u32,
}

impl EventRef {
    pub fn new(name: impl Into<String>, value: u32) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn with_value(&self, value: u32) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() || self.name.trim() != self.name {
            return Err(CoreError::ValidationFailed {
                message: format!("invalid event name '{}'", self.name),
            });
        }
        Ok(())
    }
}
