//! `RecordDef`: an ordered set of typed fields with required/default,
//! numeric/length bounds, enum values, regex pattern, uniqueness (with an
//! optional scope field), and an optional foreign-key reference.

use indexmap::IndexMap;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Text,
    Int,
    Float,
    Bool,
    Uuid,
    DateTime,
    Decimal,
    Array,
    Json,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "datetime",
            FieldType::Decimal => "decimal",
            FieldType::Array => "array",
            FieldType::Json => "json",
        }
    }
}

/// Default value generators: a literal, or the special `now` sentinel that
/// resolves to the current timestamp at insert time.
#[derive(Debug, Clone)]
pub enum DefaultValue {
    Literal(flow_core::Value),
    Now,
}

#[derive(Debug, Clone, Default)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub primary_key: bool,
    pub default: Option<DefaultValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub enum_values: Option<Vec<String>>,
    pub pattern: Option<String>,
    pub is_unique: bool,
    pub unique_scope_field: Option<String>,
    pub unique_scope_label: Option<String>,
    pub references_record: Option<String>,
    pub reference_target_field: Option<String>,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::String
    }
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, ..Default::default() }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn unique_scoped(mut self, scope_field: impl Into<String>, scope_label: impl Into<String>) -> Self {
        self.is_unique = true;
        self.unique_scope_field = Some(scope_field.into());
        self.unique_scope_label = Some(scope_label.into());
        self
    }

    pub fn references(mut self, record: impl Into<String>, field: impl Into<String>) -> Self {
        self.references_record = Some(record.into());
        self.reference_target_field = Some(field.into());
        self
    }

    pub fn compiled_pattern(&self) -> Option<Regex> {
        self.pattern.as_deref().and_then(|p| Regex::new(p).ok())
    }
}

#[derive(Debug, Clone)]
pub struct RecordDef {
    pub name: String,
    /// Name of the backing frame rows live in (defaults to the record name).
    pub frame: String,
    pub fields: IndexMap<String, FieldDef>,
}

impl RecordDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { frame: name.clone(), name, fields: IndexMap::new() }
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.frame = frame.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn primary_key_field(&self) -> Option<&FieldDef> {
        self.fields.values().find(|f| f.primary_key)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.is_unique)
    }
}
