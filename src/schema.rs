use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::limits::*;

/// Field types a form schema can declare. Anything the engine does not
/// interpret is carried as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Checkbox,
    Select,
    SelectAutocomplete,
    Radio,
    MultipleSelect,
    EnhancedSelect,
    EnhancedMultipleSelect,
    Other(String),
}

/// How a reference-typed field stores its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceShape {
    /// One id, displayed from one attribute.
    Single,
    /// Array of ids, batch-fetched.
    Multi,
    /// One id, displayed from several attributes with metadata.
    EnhancedSingle,
    /// Array of ids, displayed from several attributes with metadata.
    EnhancedMulti,
}

impl ReferenceShape {
    pub fn is_multi(self) -> bool {
        matches!(self, ReferenceShape::Multi | ReferenceShape::EnhancedMulti)
    }

    pub fn carries_metadata(self) -> bool {
        matches!(self, ReferenceShape::EnhancedSingle | ReferenceShape::EnhancedMulti)
    }
}

impl FieldType {
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => FieldType::Text,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "checkbox" => FieldType::Checkbox,
            "select" => FieldType::Select,
            "selectAutocomplete" => FieldType::SelectAutocomplete,
            "radio" => FieldType::Radio,
            "multipleSelect" => FieldType::MultipleSelect,
            "enhancedSelect" => FieldType::EnhancedSelect,
            "enhancedMultipleSelect" => FieldType::EnhancedMultipleSelect,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
            FieldType::Select => "select",
            FieldType::SelectAutocomplete => "selectAutocomplete",
            FieldType::Radio => "radio",
            FieldType::MultipleSelect => "multipleSelect",
            FieldType::EnhancedSelect => "enhancedSelect",
            FieldType::EnhancedMultipleSelect => "enhancedMultipleSelect",
            FieldType::Other(s) => s,
        }
    }

    pub fn reference_shape(&self) -> Option<ReferenceShape> {
        match self {
            FieldType::Select | FieldType::SelectAutocomplete | FieldType::Radio => {
                Some(ReferenceShape::Single)
            }
            FieldType::MultipleSelect => Some(ReferenceShape::Multi),
            FieldType::EnhancedSelect => Some(ReferenceShape::EnhancedSingle),
            FieldType::EnhancedMultipleSelect => Some(ReferenceShape::EnhancedMulti),
            _ => None,
        }
    }
}

/// Which attribute(s) of the referenced document make up the display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignTarget {
    Field(String),
    Fields(Vec<String>),
}

impl ForeignTarget {
    pub fn fields(&self) -> &[String] {
        match self {
            ForeignTarget::Field(f) => std::slice::from_ref(f),
            ForeignTarget::Fields(fs) => fs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub form: String,
    pub target: ForeignTarget,
}

/// One field of a form schema. A field that references another form always
/// names exactly one of a single display attribute or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub foreign: Option<ForeignRef>,
    pub options: Vec<String>,
}

impl FieldDefinition {
    pub fn reference(name: &str, field_type: FieldType, form: &str, target: ForeignTarget) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            foreign: Some(ForeignRef {
                form: form.to_string(),
                target,
            }),
            options: Vec::new(),
        }
    }

    pub fn plain(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            foreign: None,
            options: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("field name must not be empty")]
    EmptyName,
    #[error("field name too long: {0}")]
    NameTooLong(String),
    #[error("duplicate field: {0}")]
    DuplicateField(String),
    #[error("field {0} declares both foreignField and foreignFields")]
    BothForeignTargets(String),
    #[error("field {0} names a foreign form but neither foreignField nor foreignFields")]
    MissingForeignTarget(String),
    #[error("field {0} declares an empty foreignFields list")]
    EmptyForeignFields(String),
    #[error("field {0} declares a foreign target without foreignFormName")]
    MissingForeignForm(String),
    #[error("too many fields in form")]
    TooManyFields,
}

/// Wire shape of a field definition as form schemas spell it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_form_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
}

impl TryFrom<RawFieldDefinition> for FieldDefinition {
    type Error = SchemaError;

    fn try_from(raw: RawFieldDefinition) -> Result<Self, SchemaError> {
        if raw.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if raw.name.len() > MAX_NAME_LEN {
            return Err(SchemaError::NameTooLong(raw.name));
        }
        let target = match (raw.foreign_field, raw.foreign_fields) {
            (Some(_), Some(_)) => return Err(SchemaError::BothForeignTargets(raw.name)),
            (Some(f), None) => Some(ForeignTarget::Field(f)),
            (None, Some(fs)) if fs.is_empty() => {
                return Err(SchemaError::EmptyForeignFields(raw.name));
            }
            (None, Some(fs)) => Some(ForeignTarget::Fields(fs)),
            (None, None) => None,
        };
        let foreign = match (raw.foreign_form_name, target) {
            (Some(form), Some(target)) => Some(ForeignRef { form, target }),
            (Some(_), None) => return Err(SchemaError::MissingForeignTarget(raw.name)),
            (None, Some(_)) => return Err(SchemaError::MissingForeignForm(raw.name)),
            (None, None) => None,
        };
        // `items` is the older spelling of `options`.
        let options = if raw.options.is_empty() { raw.items } else { raw.options };
        Ok(FieldDefinition {
            name: raw.name,
            field_type: FieldType::parse(&raw.field_type),
            foreign,
            options,
        })
    }
}

impl From<&FieldDefinition> for RawFieldDefinition {
    fn from(def: &FieldDefinition) -> Self {
        let (foreign_form_name, foreign_field, foreign_fields) = match &def.foreign {
            Some(ForeignRef {
                form,
                target: ForeignTarget::Field(f),
            }) => (Some(form.clone()), Some(f.clone()), None),
            Some(ForeignRef {
                form,
                target: ForeignTarget::Fields(fs),
            }) => (Some(form.clone()), None, Some(fs.clone())),
            None => (None, None, None),
        };
        RawFieldDefinition {
            name: def.name.clone(),
            field_type: def.field_type.as_str().to_string(),
            foreign_form_name,
            foreign_field,
            foreign_fields,
            options: def.options.clone(),
            items: Vec::new(),
        }
    }
}

/// Validate and convert a whole form schema.
pub fn parse_schema(raw: Vec<RawFieldDefinition>) -> Result<Vec<FieldDefinition>, SchemaError> {
    if raw.len() > MAX_FIELDS_PER_FORM {
        return Err(SchemaError::TooManyFields);
    }
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(raw.len());
    for r in raw {
        let def = FieldDefinition::try_from(r)?;
        if !seen.insert(def.name.clone()) {
            return Err(SchemaError::DuplicateField(def.name));
        }
        fields.push(def);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, ty: &str) -> RawFieldDefinition {
        RawFieldDefinition {
            name: name.into(),
            field_type: ty.into(),
            foreign_form_name: None,
            foreign_field: None,
            foreign_fields: None,
            options: Vec::new(),
            items: Vec::new(),
        }
    }

    #[test]
    fn single_reference_parses() {
        let mut r = raw("employee", "select");
        r.foreign_form_name = Some("employees".into());
        r.foreign_field = Some("fullName".into());
        let def = FieldDefinition::try_from(r).unwrap();
        assert_eq!(def.field_type.reference_shape(), Some(ReferenceShape::Single));
        let foreign = def.foreign.unwrap();
        assert_eq!(foreign.form, "employees");
        assert_eq!(foreign.target.fields(), ["fullName".to_string()]);
    }

    #[test]
    fn both_targets_rejected() {
        let mut r = raw("employee", "enhancedSelect");
        r.foreign_form_name = Some("employees".into());
        r.foreign_field = Some("fullName".into());
        r.foreign_fields = Some(vec!["firstName".into()]);
        assert_eq!(
            FieldDefinition::try_from(r),
            Err(SchemaError::BothForeignTargets("employee".into()))
        );
    }

    #[test]
    fn foreign_form_without_target_rejected() {
        let mut r = raw("employee", "select");
        r.foreign_form_name = Some("employees".into());
        assert_eq!(
            FieldDefinition::try_from(r),
            Err(SchemaError::MissingForeignTarget("employee".into()))
        );
    }

    #[test]
    fn items_fill_in_for_options() {
        let mut r = raw("shift", "radio");
        r.items = vec!["morning".into(), "evening".into()];
        let def = FieldDefinition::try_from(r).unwrap();
        assert_eq!(def.options, vec!["morning", "evening"]);
        assert!(def.foreign.is_none());
    }

    #[test]
    fn duplicate_fields_rejected() {
        let err = parse_schema(vec![raw("a", "text"), raw("a", "number")]).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField("a".into()));
    }

    #[test]
    fn unknown_type_is_carried() {
        let def = FieldDefinition::try_from(raw("photo", "fileUpload")).unwrap();
        assert_eq!(def.field_type, FieldType::Other("fileUpload".into()));
        assert_eq!(def.field_type.reference_shape(), None);
        assert_eq!(RawFieldDefinition::from(&def).field_type, "fileUpload");
    }
}
