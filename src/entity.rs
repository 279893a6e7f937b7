//! Entity types - declarative table descriptions
//!
//! An [`EntityType`] is a table name plus an ordered list of typed fields.
//! Every entity type also carries the implicit integer identifier column
//! [`ID_FIELD`], which is assigned by the engine on first save.
//!
//! Field lists are plain static tables:
//!
//! ```
//! use litestore::{EntityType, FieldType};
//!
//! const PERSON: &[(&str, FieldType)] = &[
//!     ("name", FieldType::Text),
//!     ("email", FieldType::Text),
//!     ("age", FieldType::Integer),
//! ];
//!
//! let person = EntityType::from_fields("Person", PERSON).unwrap();
//! assert_eq!(person.fields().len(), 3);
//! ```

use crate::query::Term;
use crate::value::{FieldType, Value};
use crate::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Name of the implicit identifier column
pub const ID_FIELD: &str = "id";

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// SQLite keywords; names are interpolated unquoted, so none may be used
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

/// Whether `name` can be used verbatim as a table, column or alias name
pub(crate) fn is_identifier(name: &str) -> bool {
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"))
        .is_match(name)
        && !is_keyword(name)
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(name))
}

/// A declared field: name, semantic type and optional default
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub default: Option<Value>,
}

#[derive(Debug, PartialEq)]
struct EntityTypeInner {
    name: String,
    fields: Vec<Field>,
}

/// Declarative description of a storage-backed record type.
///
/// Cheap to clone; clones share the same definition. Two entity types are
/// equal when their names and field lists are equal.
#[derive(Clone, PartialEq)]
pub struct EntityType {
    inner: Arc<EntityTypeInner>,
}

impl EntityType {
    /// Start building an entity type
    pub fn builder(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Create an entity type from a static (name, type) table
    pub fn from_fields(name: impl Into<String>, fields: &[(&str, FieldType)]) -> Result<Self> {
        fields
            .iter()
            .fold(Self::builder(name), |builder, (field, ty)| builder.field(*field, *ty))
            .build()
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared fields in registration order (identifier excluded)
    pub fn fields(&self) -> &[Field] {
        &self.inner.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.inner.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.inner.fields.iter().position(|f| f.name == name)
    }

    /// Type of a column, the identifier included
    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        if name == ID_FIELD {
            Some(FieldType::Integer)
        } else {
            self.field(name).map(|f| f.ty)
        }
    }

    /// Column reference for expression building.
    ///
    /// Unknown names are accepted here and rejected when the query compiles.
    pub fn c(&self, field: &str) -> Term {
        Term::column(self.name(), field)
    }

    /// Column reference for the identifier
    pub fn id_column(&self) -> Term {
        self.c(ID_FIELD)
    }

    /// A transient record with every field at its default (or null)
    pub fn record(&self) -> Record {
        let values = self
            .inner
            .fields
            .iter()
            .map(|f| f.default.clone().unwrap_or(Value::Null))
            .collect();
        Record {
            entity: self.clone(),
            values,
        }
    }

    /// A transient record with the given fields set, defaults elsewhere
    pub fn record_with(&self, values: &[(&str, Value)]) -> Result<Record> {
        let mut record = self.record();
        for (name, value) in values {
            record.set(name, value.clone())?;
        }
        Ok(record)
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.inner.name)
            .field("fields", &self.inner.fields)
            .finish()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)
    }
}

/// Builder for [`EntityType`]
#[derive(Debug)]
pub struct EntityTypeBuilder {
    name: String,
    fields: Vec<Field>,
}

impl EntityTypeBuilder {
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(Field {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    /// Default for the most recently added field
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.default = Some(value.into());
        }
        self
    }

    /// Validate names and defaults and produce the entity type
    pub fn build(self) -> Result<EntityType> {
        if !is_identifier(&self.name) {
            return Err(Error::InvalidSchema(format!("invalid table name: {:?}", self.name)));
        }

        let mut fields: Vec<Field> = Vec::with_capacity(self.fields.len());
        for mut field in self.fields {
            if !is_identifier(&field.name) {
                return Err(Error::InvalidSchema(format!(
                    "{}: invalid field name {:?}",
                    self.name, field.name
                )));
            }
            if field.name.eq_ignore_ascii_case(ID_FIELD) {
                return Err(Error::InvalidSchema(format!(
                    "{}: `{}` is the implicit identifier and cannot be declared",
                    self.name, ID_FIELD
                )));
            }
            if fields.iter().any(|f| f.name.eq_ignore_ascii_case(&field.name)) {
                return Err(Error::InvalidSchema(format!(
                    "{}: duplicate field {:?}",
                    self.name, field.name
                )));
            }
            if let Some(default) = field.default.take() {
                let coerced = field.ty.coerce(default).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "{}.{}: default does not fit type {}",
                        self.name, field.name, field.ty
                    ))
                })?;
                field.default = Some(coerced);
            }
            fields.push(field);
        }

        Ok(EntityType {
            inner: Arc::new(EntityTypeInner {
                name: self.name,
                fields,
            }),
        })
    }
}

/// A transient instance: field values without an identifier or a store.
///
/// Saving a record moves it into a store's identity cache; see
/// [`Record::save`](crate::lifecycle).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: EntityType,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn from_parts(entity: EntityType, values: Vec<Value>) -> Self {
        Self { entity, values }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity
    }

    /// Values in declared field order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn into_parts(self) -> (EntityType, Vec<Value>) {
        (self.entity, self.values)
    }

    pub fn get(&self, field: &str) -> Result<&Value> {
        let index = self.index_of(field)?;
        Ok(&self.values[index])
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<()> {
        let index = self.index_of(field)?;
        self.values[index] = coerce_field(&self.entity, index, value.into())?;
        Ok(())
    }

    /// Builder-style [`Record::set`]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(field, value)?;
        Ok(self)
    }

    fn index_of(&self, field: &str) -> Result<usize> {
        self.entity.field_index(field).ok_or_else(|| {
            Error::Usage(format!("{} has no field {:?}", self.entity, field))
        })
    }
}

/// Coerce a value for the field at `index`, reporting a usage error on mismatch
pub(crate) fn coerce_field(entity: &EntityType, index: usize, value: Value) -> Result<Value> {
    let field = &entity.fields()[index];
    let shown = value.to_string();
    field.ty.coerce(value).ok_or_else(|| {
        Error::Usage(format!(
            "{}.{} expects {}, got {}",
            entity, field.name, field.ty, shown
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityType {
        EntityType::from_fields(
            "Person",
            &[("name", FieldType::Text), ("email", FieldType::Text), ("age", FieldType::Integer)],
        )
        .unwrap()
    }

    #[test]
    fn test_field_order_is_declaration_order() {
        let names: Vec<_> = person().fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["name", "email", "age"]);
        assert_eq!(person().column_type("id"), Some(FieldType::Integer));
        assert_eq!(person().column_type("missing"), None);
    }

    #[test]
    fn test_equal_definitions_compare_equal() {
        assert_eq!(person(), person());
        let other = EntityType::from_fields("Person", &[("name", FieldType::Text)]).unwrap();
        assert_ne!(person(), other);
    }

    #[test]
    fn test_rejects_invalid_declarations() {
        assert!(matches!(
            EntityType::from_fields("Person", &[("id", FieldType::Integer)]),
            Err(Error::InvalidSchema(_))
        ));
        assert!(matches!(
            EntityType::from_fields("Person", &[("a", FieldType::Text), ("a", FieldType::Integer)]),
            Err(Error::InvalidSchema(_))
        ));
        assert!(matches!(
            EntityType::from_fields("Per son", &[]),
            Err(Error::InvalidSchema(_))
        ));
        assert!(matches!(
            EntityType::from_fields("Person", &[("drop table", FieldType::Text)]),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_rejects_sql_keywords_as_names() {
        assert!(matches!(
            EntityType::from_fields("Item", &[("order", FieldType::Integer)]),
            Err(Error::InvalidSchema(_))
        ));
        assert!(matches!(
            EntityType::from_fields("Group", &[("name", FieldType::Text)]),
            Err(Error::InvalidSchema(_))
        ));
        assert!(EntityType::from_fields("Item", &[("ordered", FieldType::Integer)]).is_ok());
    }

    #[test]
    fn test_record_set_validates_field_and_type() {
        let mut record = person().record();
        record.set("age", 30).unwrap();
        assert_eq!(record.get("age").unwrap(), &Value::Integer(30));

        assert!(matches!(record.set("nope", 1), Err(Error::Usage(_))));
        assert!(matches!(record.set("age", "thirty"), Err(Error::Usage(_))));
    }

    #[test]
    fn test_defaults_apply_to_new_records() {
        let entity = EntityType::builder("Account")
            .field("owner", FieldType::Text)
            .default_value("nobody")
            .field("balance", FieldType::Real)
            .default_value(0)
            .build()
            .unwrap();

        let record = entity.record();
        assert_eq!(record.get("owner").unwrap(), &Value::Text("nobody".into()));
        assert_eq!(record.get("balance").unwrap(), &Value::Real(0.0));

        let record = entity.record_with(&[("owner", "Ann".into())]).unwrap();
        assert_eq!(record.get("owner").unwrap(), &Value::Text("Ann".into()));
    }

    #[test]
    fn test_default_must_fit_type() {
        let result = EntityType::builder("Account")
            .field("balance", FieldType::Integer)
            .default_value("lots")
            .build();
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }
}
