// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service contracts: the typed surface of an addressable handler
//!
//! A contract names the event type a service accepts, the event types it
//! emits, and a JSON Schema for each payload. Handlers validate inbound
//! data against `accepts` and outbound data against `emits`; the agent
//! loop derives its `arvo` tool catalog from these contracts.

use indexmap::IndexMap;
use jsonschema::Validator;
use serde_json::Value;
use thiserror::Error;

/// Reserved field linking a child workflow to its parent subject.
///
/// Stripped from payloads before schema validation; consumed by the
/// resumable-handler runner for hierarchy tracking.
pub const PARENT_SUBJECT_KEY: &str = "parentSubject$$";

/// Errors from contract construction and payload validation
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("contract '{uri}' has an invalid schema for '{event_type}': {detail}")]
    InvalidSchema {
        uri: String,
        event_type: String,
        detail: String,
    },
    #[error("contract '{uri}' rejected '{event_type}' payload: {detail}")]
    Rejected {
        uri: String,
        event_type: String,
        detail: String,
    },
    #[error("contract '{uri}' does not emit '{event_type}'")]
    UnknownEmitType { uri: String, event_type: String },
}

struct CompiledSchema {
    schema: Value,
    validator: Validator,
}

impl CompiledSchema {
    fn new(uri: &str, event_type: &str, schema: Value) -> Result<Self, ContractError> {
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| ContractError::InvalidSchema {
                uri: uri.to_string(),
                event_type: event_type.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self { schema, validator })
    }

    fn validate(&self, uri: &str, event_type: &str, data: &Value) -> Result<(), ContractError> {
        self.validator
            .validate(data)
            .map_err(|e| ContractError::Rejected {
                uri: uri.to_string(),
                event_type: event_type.to_string(),
                detail: e.to_string(),
            })
    }
}

/// A service's typed accept/emit surface with compiled validators.
pub struct ServiceContract {
    uri: String,
    accepts_type: String,
    accepts: CompiledSchema,
    emits: IndexMap<String, CompiledSchema>,
}

impl std::fmt::Debug for ServiceContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContract")
            .field("uri", &self.uri)
            .field("accepts_type", &self.accepts_type)
            .field("emit_types", &self.emits.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceContract {
    pub fn new(
        uri: impl Into<String>,
        accepts_type: impl Into<String>,
        accepts_schema: Value,
        emits: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, ContractError> {
        let uri = uri.into();
        let accepts_type = accepts_type.into();
        let accepts = CompiledSchema::new(&uri, &accepts_type, accepts_schema)?;
        let mut compiled = IndexMap::new();
        for (event_type, schema) in emits {
            let entry = CompiledSchema::new(&uri, &event_type, schema)?;
            compiled.insert(event_type, entry);
        }
        Ok(Self {
            uri,
            accepts_type,
            accepts,
            emits: compiled,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn accepts_type(&self) -> &str {
        &self.accepts_type
    }

    pub fn accepts_schema(&self) -> &Value {
        &self.accepts.schema
    }

    pub fn emit_types(&self) -> impl Iterator<Item = &str> {
        self.emits.keys().map(String::as_str)
    }

    pub fn emits(&self, event_type: &str) -> bool {
        self.emits.contains_key(event_type)
    }

    /// Validate an inbound payload against the accepts schema.
    ///
    /// The reserved [`PARENT_SUBJECT_KEY`] field is removed first and the
    /// stripped payload is returned for the caller to forward.
    pub fn validate_accepts(&self, data: &Value) -> Result<Value, ContractError> {
        let stripped = strip_parent_subject(data);
        self.accepts
            .validate(&self.uri, &self.accepts_type, &stripped)?;
        Ok(stripped)
    }

    /// Validate an outbound payload against the schema of `event_type`.
    pub fn validate_emits(&self, event_type: &str, data: &Value) -> Result<(), ContractError> {
        let compiled = self
            .emits
            .get(event_type)
            .ok_or_else(|| ContractError::UnknownEmitType {
                uri: self.uri.clone(),
                event_type: event_type.to_string(),
            })?;
        compiled.validate(&self.uri, event_type, data)
    }
}

/// Returns a copy of `data` without the reserved parent-subject field.
pub fn strip_parent_subject(data: &Value) -> Value {
    match data {
        Value::Object(map) if map.contains_key(PARENT_SUBJECT_KEY) => {
            let mut copy = map.clone();
            copy.remove(PARENT_SUBJECT_KEY);
            Value::Object(copy)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
