use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::limits::*;
use crate::model::*;
use crate::resolver::{resolve_record, DocumentLookup, ResolveError, SchemaRegistry};
use crate::schema::{parse_schema, FieldDefinition, RawFieldDefinition};

use super::{Engine, EngineError};

fn validate_key(what: &'static str, value: &str) -> Result<(), EngineError> {
    if value.is_empty() {
        return Err(EngineError::Validation(format!("{what} is required")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    pub async fn register_schema(
        &self,
        form: &str,
        raw: Vec<RawFieldDefinition>,
    ) -> Result<Vec<FieldDefinition>, EngineError> {
        validate_key("form name", form)?;
        let fields = parse_schema(raw).map_err(|e| EngineError::Validation(e.to_string()))?;

        let event = Event::SchemaRegistered {
            form: form.to_string(),
            fields: fields.clone(),
        };
        let _gate = self.mutation_gate().await?;
        self.persist(&event).await?;
        self.store.apply_unlocked(&event);
        tracing::info!(form, fields = fields.len(), "schema registered");
        Ok(fields)
    }

    pub fn get_schema(&self, form: &str) -> Result<Arc<Vec<FieldDefinition>>, EngineError> {
        self.store
            .schema(form)
            .ok_or_else(|| EngineError::not_found("schema", form))
    }

    /// Insert or replace a form document. Only scalar values are stored; an
    /// `id` key in the body is ignored in favour of the path id.
    pub async fn upsert_document(
        &self,
        form: &str,
        id: &str,
        body: &Map<String, Value>,
    ) -> Result<Document, EngineError> {
        validate_key("form name", form)?;
        validate_key("document id", id)?;
        if body.len() > MAX_FIELDS_PER_FORM {
            return Err(EngineError::LimitExceeded("too many fields in document"));
        }
        let mut fields = BTreeMap::new();
        for (key, value) in body.iter().filter(|(k, _)| k.as_str() != "id") {
            let scalar = Scalar::from_json(value)
                .ok_or_else(|| EngineError::Validation(format!("field {key} must be a scalar")))?;
            fields.insert(key.clone(), scalar);
        }

        let document = Document {
            form: form.to_string(),
            id: id.to_string(),
            fields,
        };
        let event = Event::DocumentUpserted {
            document: document.clone(),
        };
        let _gate = self.mutation_gate().await?;
        let _writes = self.document_write_lock().await?;
        self.persist(&event).await?;
        self.store.apply_unlocked(&event);
        tracing::debug!(form, id, "document upserted");
        Ok(document)
    }

    pub fn get_document(&self, form: &str, id: &str) -> Result<Document, EngineError> {
        self.store
            .document(form, id)
            .ok_or_else(|| EngineError::not_found("document", format!("{form}/{id}")))
    }

    /// Remove a document. References to it are left dangling.
    pub async fn delete_document(&self, form: &str, id: &str) -> Result<(), EngineError> {
        let _gate = self.mutation_gate().await?;
        let _writes = self.document_write_lock().await?;
        if self.store.document(form, id).is_none() {
            return Err(EngineError::not_found("document", format!("{form}/{id}")));
        }
        let event = Event::DocumentDeleted {
            form: form.to_string(),
            id: id.to_string(),
        };
        self.persist(&event).await?;
        self.store.apply_unlocked(&event);
        tracing::info!(form, id, "document deleted");
        Ok(())
    }

    /// Run a raw submission through the reference resolver using `form`'s schema.
    pub async fn resolve_submission(
        &self,
        form: &str,
        record: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let schema = self.get_schema(form)?;
        Ok(resolve_record(&schema, record, self, self).await?)
    }
}

#[async_trait]
impl DocumentLookup for Engine {
    async fn find_document(&self, form: &str, id: &str) -> Result<Option<Document>, ResolveError> {
        Ok(self.store.document(form, id))
    }

    async fn find_documents(&self, form: &str, ids: &[String]) -> Result<Vec<Document>, ResolveError> {
        if ids.len() > MAX_IDS_PER_LOOKUP {
            return Err(ResolveError::TooManyIds(ids.len()));
        }
        Ok(self.store.documents(form, ids))
    }
}

#[async_trait]
impl SchemaRegistry for Engine {
    async fn form_schema(&self, form: &str) -> Result<Option<Arc<Vec<FieldDefinition>>>, ResolveError> {
        Ok(self.store.schema(form))
    }
}
