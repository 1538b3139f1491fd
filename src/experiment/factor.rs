//! Factors - independent variables and their possible values

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One possible value of a factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorValue {
    id: String,
    name: Option<String>,
}

impl FactorValue {
    /// Create a factor value.
    #[must_use]
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Get the value ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// An independent variable of the experiment design.
///
/// Invariant: `default_value`, when set, is one of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Factor {
    id: String,
    name: Option<String>,
    #[serde(rename = "type")]
    factor_type: String,
    kind: Option<String>,
    tag: Option<String>,
    values: Vec<FactorValue>,
    default_value: Option<String>,
}

impl Factor {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, factor_type: impl Into<String>) -> FactorBuilder {
        FactorBuilder::new(id, factor_type)
    }

    /// Get the factor ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Get the semantic type tag (e.g. "Integer", "String").
    #[must_use]
    pub fn factor_type(&self) -> &str {
        &self.factor_type
    }

    /// Get the kind, if any.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Get the tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Get the possible values, in declaration order.
    #[must_use]
    pub fn values(&self) -> &[FactorValue] {
        &self.values
    }

    /// Look up a value by ID.
    #[must_use]
    pub fn value(&self, value_id: &str) -> Option<&FactorValue> {
        self.values.iter().find(|v| v.id() == value_id)
    }

    /// Get the default value, if one is designated.
    #[must_use]
    pub fn default_value(&self) -> Option<&FactorValue> {
        self.default_value
            .as_deref()
            .and_then(|value_id| self.value(value_id))
    }

    /// Designate (or clear) the default value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if `value_id` is not a value of this factor.
    pub fn set_default_value(&mut self, value_id: Option<&str>) -> Result<()> {
        if let Some(value_id) = value_id {
            if self.value(value_id).is_none() {
                return Err(Error::InvalidDesign(format!(
                    "default value {value_id} is not a value of factor {}",
                    self.id
                )));
            }
        }
        self.default_value = value_id.map(ToString::to_string);
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (i, value) in self.values.iter().enumerate() {
            if self.values[..i].iter().any(|v| v.id() == value.id()) {
                return Err(Error::InvalidDesign(format!(
                    "duplicate value {} in factor {}",
                    value.id(),
                    self.id
                )));
            }
        }
        if let Some(default) = &self.default_value {
            if self.value(default).is_none() {
                return Err(Error::InvalidDesign(format!(
                    "default value {default} is not a value of factor {}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Builder for `Factor`.
#[derive(Debug)]
pub struct FactorBuilder {
    factor: Factor,
}

impl FactorBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, factor_type: impl Into<String>) -> Self {
        Self {
            factor: Factor {
                id: id.into(),
                name: None,
                factor_type: factor_type.into(),
                kind: None,
                tag: None,
                values: Vec::new(),
                default_value: None,
            },
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.factor.name = Some(name.into());
        self
    }

    /// Set the kind.
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.factor.kind = Some(kind.into());
        self
    }

    /// Set the tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.factor.tag = Some(tag.into());
        self
    }

    /// Append a value without a display name.
    #[must_use]
    pub fn value(mut self, id: impl Into<String>) -> Self {
        self.factor.values.push(FactorValue::new(id, None));
        self
    }

    /// Append a value with a display name.
    #[must_use]
    pub fn named_value(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.factor
            .values
            .push(FactorValue::new(id, Some(name.into())));
        self
    }

    /// Designate the default value.
    #[must_use]
    pub fn default_value(mut self, value_id: impl Into<String>) -> Self {
        self.factor.default_value = Some(value_id.into());
        self
    }

    /// Build the `Factor`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] on duplicate values or a default
    /// value that is not one of the factor's values.
    pub fn build(self) -> Result<Factor> {
        self.factor.validate()?;
        Ok(self.factor)
    }
}
