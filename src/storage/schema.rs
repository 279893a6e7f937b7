//! Schema reconciliation
//!
//! Tables are only ever created or extended, never altered destructively.
//! [`plan`] compares an entity type with the columns reported by
//! `PRAGMA table_info` and yields the DDL needed to make the table fit.

use crate::entity::{EntityType, Field, ID_FIELD};
use crate::value::FieldType;
use crate::{Error, Result};

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_sql_type(&self.declared_type)
    }
}

/// What registration did to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Created,
    /// Columns appended, in order
    Extended(Vec<String>),
    Unchanged,
}

/// DDL to run and the change it amounts to
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub change: SchemaChange,
    pub statements: Vec<String>,
}

pub fn table_info_sql(table: &str) -> String {
    format!("PRAGMA table_info({})", table)
}

/// `CREATE TABLE` with the identifier first, then fields in declared order
pub fn create_table_sql(entity: &EntityType) -> String {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY", ID_FIELD)];
    columns.extend(entity.fields().iter().map(column_definition));
    format!("CREATE TABLE {} ({})", entity.name(), columns.join(", "))
}

pub fn add_column_sql(table: &str, field: &Field) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", table, column_definition(field))
}

fn column_definition(field: &Field) -> String {
    format!("{} {}", field.name, field.ty.sql_type())
}

/// Work out the DDL that makes `existing` (empty when the table is absent)
/// fit `entity`.
pub fn plan(entity: &EntityType, existing: &[ColumnInfo]) -> Result<Plan> {
    if existing.is_empty() {
        return Ok(Plan {
            change: SchemaChange::Created,
            statements: vec![create_table_sql(entity)],
        });
    }

    let conflict = |column: &str, detail: String| Error::SchemaConflict {
        table: entity.name().to_string(),
        column: column.to_string(),
        detail,
    };
    let find = |name: &str| existing.iter().find(|c| c.name.eq_ignore_ascii_case(name));

    match find(ID_FIELD) {
        Some(id) if id.field_type() == Some(FieldType::Integer) => {}
        Some(id) => {
            return Err(conflict(
                ID_FIELD,
                format!("identifier column is declared {:?}, expected INTEGER", id.declared_type),
            ))
        }
        None => return Err(conflict(ID_FIELD, "table has no identifier column".to_string())),
    }

    let mut missing: Vec<&Field> = Vec::new();
    for field in entity.fields() {
        match find(&field.name) {
            Some(column) => {
                if let Some(first_missing) = missing.first() {
                    return Err(conflict(
                        &field.name,
                        format!(
                            "field exists but follows missing field {:?}; appending would reorder fields",
                            first_missing.name
                        ),
                    ));
                }
                if column.field_type() != Some(field.ty) {
                    return Err(conflict(
                        &field.name,
                        format!(
                            "column is declared {:?}, field expects {}",
                            column.declared_type,
                            field.ty.sql_type()
                        ),
                    ));
                }
            }
            None => missing.push(field),
        }
    }

    if missing.is_empty() {
        return Ok(Plan {
            change: SchemaChange::Unchanged,
            statements: Vec::new(),
        });
    }

    Ok(Plan {
        statements: missing.iter().map(|f| add_column_sql(entity.name(), f)).collect(),
        change: SchemaChange::Extended(missing.iter().map(|f| f.name.clone()).collect()),
    })
}

/// Entity type matching an existing table.
///
/// Declared types SQLite would give numeric affinity map to `Real`.
pub fn reflect(table: &str, columns: &[ColumnInfo]) -> Result<EntityType> {
    if columns.is_empty() {
        return Err(Error::InvalidSchema(format!("no such table: {}", table)));
    }
    match columns.iter().find(|c| c.name.eq_ignore_ascii_case(ID_FIELD)) {
        Some(id) if id.field_type() == Some(FieldType::Integer) => {}
        _ => {
            return Err(Error::InvalidSchema(format!(
                "{} has no INTEGER `{}` column",
                table, ID_FIELD
            )))
        }
    }

    columns
        .iter()
        .filter(|c| !c.name.eq_ignore_ascii_case(ID_FIELD))
        .fold(EntityType::builder(table), |builder, column| {
            builder.field(column.name.clone(), column.field_type().unwrap_or(FieldType::Real))
        })
        .build()
}
