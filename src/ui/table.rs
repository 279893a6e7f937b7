use crate::query::Row;
use crate::storage::ColumnInfo;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Column")]
    name: String,
    #[tabled(rename = "Declared")]
    declared: String,
    #[tabled(rename = "Field type")]
    field_type: String,
    #[tabled(rename = "Key")]
    key: &'static str,
}

/// One line per column of a table, as reported by introspection
pub fn columns_table(columns: &[ColumnInfo]) -> String {
    let rows: Vec<ColumnRow> = columns
        .iter()
        .enumerate()
        .map(|(position, column)| ColumnRow {
            position,
            name: column.name.clone(),
            declared: column.declared_type.clone(),
            field_type: column
                .field_type()
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "-".to_string()),
            key: if column.primary_key { "PK" } else { "" },
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Result rows under their column names
pub fn rows_table(columns: &[String], rows: &[Row]) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for row in rows {
        builder.push_record(row.values().iter().map(|v| match v {
            crate::Value::Text(s) => s.clone(),
            other => other.to_string(),
        }));
    }
    builder.build().with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompiledQuery, Store};

    #[test]
    fn test_rows_table_renders_headers_and_values() {
        let store = Store::open_in_memory().unwrap();
        let rows = store
            .cursor(CompiledQuery::raw("SELECT 1 AS one, 'two' AS two", vec![]))
            .unwrap()
            .fetch_all()
            .unwrap();
        let rendered = rows_table(&["one".to_string(), "two".to_string()], &rows);
        assert!(rendered.contains("one"));
        assert!(rendered.contains("two"));
        assert!(rendered.contains('1'));
        assert!(!rendered.contains("\"two\""));
    }

    #[test]
    fn test_metric_table() {
        let mut builder = TableBuilder::new();
        assert!(builder.build().is_empty());
        builder.add_row("rows", "11");
        assert!(builder.build().contains("Metric"));
    }
}
