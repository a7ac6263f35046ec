use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Registration identity of a variable: name and unit, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableKey {
    pub name: String,
    pub unit: String,
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}[{}]", self.name, self.unit)
        }
    }
}

/// A simulator variable plus the value carried by one call.
///
/// Immutable once built: [`with_value`](Self::with_value) and
/// [`with_alias`](Self::with_alias) return new instances, so concurrent
/// callers that share a logical variable never see each other's payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRef {
    name: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_alias: Option<String>,
}

impl VariableRef {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value: 0.0,
            output_alias: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn output_alias(&self) -> Option<&str> {
        self.output_alias.as_deref()
    }

    /// The alias if one was given, otherwise the variable name.
    pub fn output_name(&self) -> &str {
        self.output_alias.as_deref().unwrap_or(&self.name)
    }

    /// `true` when this carries the "no data" sentinel.
    pub fn is_unavailable(&self) -> bool {
        self.value.is_nan()
    }

    pub fn key(&self) -> VariableKey {
        VariableKey {
            name: self.name.clone(),
            unit: self.unit.clone(),
        }
    }

    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    pub fn with_alias(&self, alias: impl Into<String>) -> Self {
        Self {
            output_alias: Some(alias.into()),
            ..self.clone()
        }
    }

    /// Copy of this variable carrying the NaN "no data" sentinel.
    pub fn unavailable(&self) -> Self {
        self.with_value(f64::NAN)
    }

    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationFailed {
                message: "variable name is empty".into(),
            });
        }
        if self.name.trim() != self.name || self.unit.trim() != self.unit {
            return Err(CoreError::ValidationFailed {
                message: format!("variable '{}' has surrounding whitespace", self.key()),
            });
        }
        Ok(())
    }
}

// ── Boundary spec parsing ────────────────────────────────────────────

/// Parses the `NAME[UNIT]|ALIAS` convention used by transports.
///
/// Unit and alias are optional. `PLANE ALTITUDE[feet]|alt` yields name
/// `PLANE ALTITUDE`, unit `feet`, alias `alt`.
impl FromStr for VariableRef {
    type Err = CoreError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::ValidationFailed {
            message: format!("invalid variable spec '{spec}': {reason}"),
        };

        let (body, alias) = match spec.rsplit_once('|') {
            Some((body, alias)) => {
                let alias = alias.trim();
                if alias.is_empty() {
                    return Err(invalid("empty alias"));
                }
                (body, Some(alias))
            }
            None => (spec, None),
        };

        let body = body.trim();
        let (name, unit) = match body.find('[') {
            Some(open) => {
                let Some(inner) = body[open + 1..].strip_suffix(']') else {
                    return Err(invalid("unit must be closed with ']' at the end"));
                };
                if inner.contains(['[', ']']) {
                    return Err(invalid("nested brackets in unit"));
                }
                (body[..open].trim(), inner.trim())
            }
            None if body.contains(']') => return Err(invalid("']' without '['")),
            None => (body, ""),
        };

        if name.is_empty() {
            return Err(invalid("empty name"));
        }

        let variable = Self::new(name, unit);
        Ok(match alias {
            Some(alias) => variable.with_alias(alias),
            None => variable,
        })
    }
}
