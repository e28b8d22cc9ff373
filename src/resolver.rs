//! Reference resolution: the single place where raw foreign-key values in
//! form submissions become `{id, display[, metadata]}` projections.
//!
//! The resolver never mutates the document collections it reads. Values that
//! are already resolved pass through untouched, so the same record can go
//! through the pipeline on both the create and the read path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::limits::MAX_IDS_PER_LOOKUP;
use crate::model::{Document, Reference, Scalar};
use crate::schema::{FieldDefinition, ForeignRef, ReferenceShape};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("document store unavailable: {0}")]
    Store(String),
    #[error("too many ids in one lookup: {0}")]
    TooManyIds(usize),
}

/// Read access to form documents.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    async fn find_document(&self, form: &str, id: &str) -> Result<Option<Document>, ResolveError>;

    /// One round-trip for many ids. Missing ids are simply absent from the result.
    async fn find_documents(&self, form: &str, ids: &[String]) -> Result<Vec<Document>, ResolveError>;
}

/// Read access to form schemas.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn form_schema(&self, form: &str) -> Result<Option<Arc<Vec<FieldDefinition>>>, ResolveError>;
}

/// A raw field value, classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInput {
    Id(String),
    Reference(Reference),
    List(Vec<ListItem>),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListItem {
    Id(String),
    Reference(Reference),
}

impl FieldInput {
    pub fn from_json(value: &Value) -> Self {
        if let Some(id) = id_of(value) {
            return FieldInput::Id(id);
        }
        if let Some(r) = reference_of(value) {
            return FieldInput::Reference(r);
        }
        if let Value::Array(items) = value {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(id) = id_of(item) {
                    out.push(ListItem::Id(id));
                } else if let Some(r) = reference_of(item) {
                    out.push(ListItem::Reference(r));
                } else {
                    return FieldInput::Other(value.clone());
                }
            }
            return FieldInput::List(out);
        }
        FieldInput::Other(value.clone())
    }
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Recognize a projection this module produced earlier (`Reference::to_json`)
/// or the plain `{id, display}` pair the form pipeline stores.
fn reference_of(value: &Value) -> Option<Reference> {
    let obj = value.as_object()?;
    let id = id_of(obj.get("id")?)?;
    if obj.get("resolved") == Some(&Value::Bool(false)) {
        return Some(Reference::Unresolved { id });
    }
    let display = match obj.get("display")? {
        Value::String(s) => s.clone(),
        other => Scalar::from_json(other)?.display(),
    };
    let metadata = obj.get("metadata").and_then(Value::as_object).map(|m| {
        m.iter()
            .map(|(k, v)| (k.clone(), Scalar::from_json(v).unwrap_or(Scalar::Null)))
            .collect::<BTreeMap<_, _>>()
    });
    Some(Reference::Resolved { id, display, metadata })
}

/// Result of resolving one field.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedField {
    One(Reference),
    Many(Vec<Reference>),
    Passthrough(Value),
}

impl ResolvedField {
    pub fn to_json(&self) -> Value {
        match self {
            ResolvedField::One(r) => r.to_json(),
            ResolvedField::Many(rs) => Value::Array(rs.iter().map(Reference::to_json).collect()),
            ResolvedField::Passthrough(v) => v.clone(),
        }
    }

    fn passthrough(input: &FieldInput) -> Self {
        ResolvedField::Passthrough(match input {
            FieldInput::Id(id) => Value::String(id.clone()),
            FieldInput::Reference(r) => r.to_json(),
            FieldInput::List(items) => Value::Array(
                items
                    .iter()
                    .map(|i| match i {
                        ListItem::Id(id) => Value::String(id.clone()),
                        ListItem::Reference(r) => r.to_json(),
                    })
                    .collect(),
            ),
            FieldInput::Other(v) => v.clone(),
        })
    }
}

/// Build the projection of `doc` for a reference field. `display` is exactly
/// the joined foreign attributes, empty when none of them is set.
pub fn project(doc: &Document, foreign: &ForeignRef, shape: ReferenceShape) -> Reference {
    let fields = foreign.target.fields();
    let display = fields
        .iter()
        .filter_map(|f| doc.field(f))
        .filter(|v| v.is_truthy())
        .map(Scalar::display)
        .collect::<Vec<_>>()
        .join(" ");
    let metadata = shape.carries_metadata().then(|| {
        fields
            .iter()
            .map(|f| (f.clone(), doc.field(f).cloned().unwrap_or(Scalar::Null)))
            .collect()
    });
    Reference::Resolved {
        id: doc.id.clone(),
        display,
        metadata,
    }
}

/// A foreign target that the referenced form's schema does not declare means
/// the field is not really a reference. An unregistered foreign form cannot be
/// checked and is trusted.
async fn targets_declared(
    foreign: &ForeignRef,
    schemas: &dyn SchemaRegistry,
) -> Result<bool, ResolveError> {
    let Some(schema) = schemas.form_schema(&foreign.form).await? else {
        return Ok(true);
    };
    Ok(foreign
        .target
        .fields()
        .iter()
        .all(|f| schema.iter().any(|def| &def.name == f)))
}

/// The foreign target and shape of `def`, or `None` when the field does not
/// act as a reference and its value must pass through.
async fn reference_target<'a>(
    def: &'a FieldDefinition,
    schemas: &dyn SchemaRegistry,
) -> Result<Option<(&'a ForeignRef, ReferenceShape)>, ResolveError> {
    let (Some(foreign), Some(shape)) = (&def.foreign, def.field_type.reference_shape()) else {
        return Ok(None);
    };
    if !targets_declared(foreign, schemas).await? {
        return Ok(None);
    }
    Ok(Some((foreign, shape)))
}

/// Resolve one raw value against its field definition.
pub async fn resolve_field(
    input: &FieldInput,
    def: &FieldDefinition,
    docs: &dyn DocumentLookup,
    schemas: &dyn SchemaRegistry,
) -> Result<ResolvedField, ResolveError> {
    let Some((foreign, shape)) = reference_target(def, schemas).await? else {
        return Ok(ResolvedField::passthrough(input));
    };

    match (input, shape.is_multi()) {
        (FieldInput::Reference(r), false) => Ok(ResolvedField::One(r.clone())),
        (FieldInput::Reference(r), true) => Ok(ResolvedField::Many(vec![r.clone()])),
        (FieldInput::Id(id), false) => {
            let resolved = match docs.find_document(&foreign.form, id).await? {
                Some(doc) => project(&doc, foreign, shape),
                None => Reference::Unresolved { id: id.clone() },
            };
            Ok(ResolvedField::One(resolved))
        }
        (FieldInput::List(items), true) => {
            Ok(ResolvedField::Many(resolve_list(items, foreign, shape, docs).await?))
        }
        _ => Ok(ResolvedField::passthrough(input)),
    }
}

/// Resolve many ids through one reference field, batched by
/// [`MAX_IDS_PER_LOOKUP`]. `None` under the same rule that makes
/// [`resolve_field`] pass a value through.
pub async fn resolve_ids(
    ids: &[String],
    def: &FieldDefinition,
    docs: &dyn DocumentLookup,
    schemas: &dyn SchemaRegistry,
) -> Result<Option<Vec<Reference>>, ResolveError> {
    let Some((foreign, shape)) = reference_target(def, schemas).await? else {
        return Ok(None);
    };
    let batches = try_join_all(ids.chunks(MAX_IDS_PER_LOOKUP).map(|chunk| async move {
        let items: Vec<ListItem> = chunk.iter().cloned().map(ListItem::Id).collect();
        resolve_list(&items, foreign, shape, docs).await
    }))
    .await?;
    Ok(Some(batches.into_iter().flatten().collect()))
}

async fn resolve_list(
    items: &[ListItem],
    foreign: &ForeignRef,
    shape: ReferenceShape,
    docs: &dyn DocumentLookup,
) -> Result<Vec<Reference>, ResolveError> {
    let mut seen = HashSet::new();
    let pending: Vec<String> = items
        .iter()
        .filter_map(|i| match i {
            ListItem::Id(id) if seen.insert(id.as_str()) => Some(id.clone()),
            _ => None,
        })
        .collect();
    if pending.len() > MAX_IDS_PER_LOOKUP {
        return Err(ResolveError::TooManyIds(pending.len()));
    }

    let found: HashMap<String, Document> = if pending.is_empty() {
        HashMap::new()
    } else {
        docs.find_documents(&foreign.form, &pending)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect()
    };

    Ok(items
        .iter()
        .map(|item| match item {
            ListItem::Reference(r) => r.clone(),
            ListItem::Id(id) => match found.get(id) {
                Some(doc) => project(doc, foreign, shape),
                None => {
                    tracing::warn!(form = %foreign.form, %id, "dangling reference");
                    Reference::Unresolved { id: id.clone() }
                }
            },
        })
        .collect())
}

/// Resolve every field of a submitted record. Keys without a definition are
/// copied as-is; the input map is not modified.
pub async fn resolve_record(
    schema: &[FieldDefinition],
    record: &Map<String, Value>,
    docs: &dyn DocumentLookup,
    schemas: &dyn SchemaRegistry,
) -> Result<Map<String, Value>, ResolveError> {
    let mut out = Map::with_capacity(record.len());
    for (key, value) in record {
        let resolved = match schema.iter().find(|def| &def.name == key && def.foreign.is_some()) {
            Some(def) => match resolve_field(&FieldInput::from_json(value), def, docs, schemas).await? {
                ResolvedField::Passthrough(_) => value.clone(),
                resolved => resolved.to_json(),
            },
            None => value.clone(),
        };
        out.insert(key.clone(), resolved);
    }
    Ok(out)
}
