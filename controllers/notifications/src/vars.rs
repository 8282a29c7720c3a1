//! Template variable binding for generic target objects.
//!
//! The target kind is chosen at startup, so nothing here may assume fields
//! beyond the object being a JSON object. The whole object is exposed to
//! templates under a single key.

use kube::core::DynamicObject;
use notifications_api::{
    BindingError, Config, Destination, GetVars, InitGetVars, NotificationError, Vars,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use serde_json::Value;
use std::sync::Arc;

/// Wraps an observed object under one template key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableBinding {
    key: String,
}

impl VariableBinding {
    /// Binds each object under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Template key the object is exposed under
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Binds `object` for delivery to `destination`.
    ///
    /// The destination does not influence the result; it is part of the
    /// signature expected by the notification engine.
    pub fn bind(&self, object: &Value, _destination: &Destination) -> Result<Vars, BindingError> {
        if !object.is_object() {
            return Err(BindingError::NotAnObject {
                found: json_type(object),
            });
        }
        let mut vars = Vars::new();
        vars.insert(self.key.clone(), object.clone());
        Ok(vars)
    }

    /// Variable initializer for [`notifications_api::Settings`].
    #[must_use]
    pub fn into_initializer(self) -> InitGetVars {
        Arc::new(
            move |_config: &Config,
                  _config_map: &ConfigMap,
                  _secret: &Secret|
                  -> Result<GetVars, NotificationError> {
                let binding = self.clone();
                Ok(Arc::new(
                    move |object: &Value, destination: &Destination| -> Result<Vars, BindingError> {
                        binding.bind(object, destination)
                    },
                ))
            },
        )
    }
}

/// Converts a cached target object into the field bag handed to templates.
pub fn to_field_bag(object: &DynamicObject) -> Result<Value, BindingError> {
    serde_json::to_value(object).map_err(|e| BindingError::Conversion(e.to_string()))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
