//! Lazy result cursors
//!
//! A [`Cursor`] holds a prepared statement; [`Cursor::rows`] executes it and
//! yields decoded [`Row`]s one step at a time. The statement is reset when
//! the iterator is exhausted or dropped.

use std::sync::Arc;

use rusqlite::{params_from_iter, Rows, Statement};

use super::store::{statement_error, Store};
use crate::query::{CompiledQuery, Row};
use crate::value::{FieldType, Value};
use crate::Result;

pub struct Cursor<'s> {
    store: &'s Store,
    stmt: Statement<'s>,
    query: CompiledQuery,
    columns: Arc<[String]>,
}

impl<'s> Cursor<'s> {
    pub(crate) fn new(store: &'s Store, stmt: Statement<'s>, query: CompiledQuery) -> Self {
        let columns: Arc<[String]> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into();
        Self {
            store,
            stmt,
            query,
            columns,
        }
    }

    /// Result column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn query(&self) -> &CompiledQuery {
        &self.query
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Execute and iterate. May be called again to re-run the statement.
    pub fn rows(&mut self) -> Result<RowIter<'_>> {
        self.store.ensure_open()?;
        self.store.emit_query(&self.query);
        let rows = self
            .stmt
            .query(params_from_iter(self.query.params.iter()))
            .map_err(|source| statement_error("query", &self.query.sql, source))?;
        Ok(RowIter {
            store: self.store,
            rows,
            columns: Arc::clone(&self.columns),
            types: &self.query.column_types,
            sql: &self.query.sql,
            done: false,
        })
    }

    /// Every remaining row
    pub fn fetch_all(mut self) -> Result<Vec<Row>> {
        let rows = self.rows()?.collect::<Result<Vec<_>>>();
        rows
    }

    /// The first row, if any
    pub fn first(mut self) -> Result<Option<Row>> {
        let first = self.rows()?.next().transpose();
        first
    }
}

/// Iterator over the rows of one execution of a [`Cursor`]
pub struct RowIter<'c> {
    store: &'c Store,
    rows: Rows<'c>,
    columns: Arc<[String]>,
    types: &'c [Option<FieldType>],
    sql: &'c str,
    done: bool,
}

impl RowIter<'_> {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.store.ensure_open() {
            self.done = true;
            return Some(Err(e));
        }
        match self.rows.next() {
            Ok(Some(row)) => Some(decode_row(row, &self.columns, self.types, self.sql)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(source) => {
                self.done = true;
                Some(Err(statement_error("fetch", self.sql, source)))
            }
        }
    }
}

fn decode_row(
    row: &rusqlite::Row<'_>,
    columns: &Arc<[String]>,
    types: &[Option<FieldType>],
    sql: &str,
) -> Result<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for index in 0..columns.len() {
        let raw = row
            .get_ref(index)
            .map_err(|source| statement_error("fetch", sql, source))?;
        let ty = types.get(index).copied().flatten();
        values.push(Value::decode(raw, ty)?);
    }
    Ok(Row::new(Arc::clone(columns), values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_numbers() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .execute(&CompiledQuery::raw("CREATE TABLE n (id INTEGER PRIMARY KEY, v INTEGER)", vec![]))
            .unwrap();
        for v in [3, 1, 2] {
            store
                .execute(&CompiledQuery::raw("INSERT INTO n (v) VALUES (?)", vec![Value::Integer(v)]))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_rows_are_lazy_and_rerunnable() {
        let store = store_with_numbers();
        let mut cursor = store
            .cursor(CompiledQuery::raw("SELECT v AS value FROM n ORDER BY v", vec![]))
            .unwrap();
        assert_eq!(cursor.columns(), &["value".to_string()]);

        {
            let mut rows = cursor.rows().unwrap();
            assert_eq!(rows.next().unwrap().unwrap()["value"], Value::Integer(1));
            // abandoned after one row
        }

        let all: Vec<i64> = cursor
            .rows()
            .unwrap()
            .map(|r| r.unwrap()[0].as_i64().unwrap())
            .collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn test_first_and_empty_results() {
        let store = store_with_numbers();
        let first = store
            .cursor(CompiledQuery::raw("SELECT v FROM n WHERE v > ?", vec![Value::Integer(1)]))
            .unwrap()
            .first()
            .unwrap();
        assert!(first.is_some());

        let none = store
            .cursor(CompiledQuery::raw("SELECT v FROM n WHERE v > ?", vec![Value::Integer(9)]))
            .unwrap()
            .fetch_all()
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_closed_store_cursor_fails() {
        let store = store_with_numbers();
        let mut cursor = store
            .cursor(CompiledQuery::raw("SELECT v FROM n", vec![]))
            .unwrap();
        drop(cursor.rows().unwrap());
        drop(cursor);
        store.close().unwrap();
        assert!(store.cursor(CompiledQuery::raw("SELECT v FROM n", vec![])).is_err());
    }

    #[test]
    fn test_live_iterator_stops_when_store_closes() {
        let store = store_with_numbers();
        let mut cursor = store
            .cursor(CompiledQuery::raw("SELECT v FROM n ORDER BY v", vec![]))
            .unwrap();
        let mut rows = cursor.rows().unwrap();
        assert!(rows.next().unwrap().is_ok());

        store.close().unwrap();
        assert!(matches!(rows.next(), Some(Err(crate::Error::Usage(_)))));
        assert!(rows.next().is_none());
    }
}
