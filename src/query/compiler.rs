//! Query compiler - expression trees to SQL text plus bound parameters
//!
//! Rules:
//! - The projection renders as `<field>` / `<fn>(<arg>)[ AS <alias>]`, comma
//!   joined; no projection means `id` plus every declared field.
//! - A comparison renders `<term> <op> ?` and appends its literal to the
//!   parameter list; a conjunction renders `( <left> ) AND|OR ( <right> )`.
//! - `DISTINCT` renders inside an aggregate (`count(DISTINCT age)`) or, for
//!   whole rows, as `SELECT DISTINCT` via [`QuerySpec::distinct`].
//! - `WHERE`, `GROUP BY`, `ORDER BY` and `LIMIT ?` appear in that order and
//!   only when requested (SQLite rejects grouping after ordering).
//! - Parameters are bound in traversal order: filter first, then limit.
//!   Literals never reach the SQL text.

use crate::entity::{is_identifier, EntityType, ID_FIELD};
use crate::query::expr::{Direction, Expr, Function, OrderTerm, Projection, Selection, Term};
use crate::value::{FieldType, Value};
use crate::{Error, Result};

/// SQL text, its positional parameters and the expected type of each
/// result column (used to decode booleans and JSON)
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub column_types: Vec<Option<FieldType>>,
}

impl CompiledQuery {
    /// A hand-written statement; result columns are decoded as stored
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
            column_types: Vec::new(),
        }
    }
}

/// Full descriptor of a SELECT: projection, filter, ordering, grouping, limit
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    entity: EntityType,
    projection: Option<Projection>,
    filter: Option<Expr>,
    order_by: Vec<OrderTerm>,
    group_by: Vec<Term>,
    limit: Option<u64>,
    distinct: bool,
}

impl QuerySpec {
    /// Full-entity query (identifier plus every field)
    pub fn new(entity: &EntityType) -> Self {
        Self {
            entity: entity.clone(),
            projection: None,
            filter: None,
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            distinct: false,
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity
    }

    pub fn select(mut self, projection: impl Into<Projection>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the filter when one is given
    pub fn filter_opt(mut self, filter: Option<Expr>) -> Self {
        self.filter = filter;
        self
    }

    /// Append an ordering term; may be called repeatedly
    pub fn order_by(mut self, order: OrderTerm) -> Self {
        self.order_by.push(order);
        self
    }

    /// Append a grouping term; may be called repeatedly
    pub fn group_by(mut self, term: Term) -> Self {
        self.group_by.push(term);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drop duplicate result rows (`SELECT DISTINCT`)
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Whether this query returns whole entities
    pub fn is_full_entity(&self) -> bool {
        self.projection.is_none()
    }
}

/// Compile a SELECT
pub fn compile(spec: &QuerySpec) -> Result<CompiledQuery> {
    let mut writer = SqlWriter::new(&spec.entity);
    writer.push(if spec.distinct { "SELECT DISTINCT " } else { "SELECT " });

    let column_types = match &spec.projection {
        None => writer.full_projection(),
        Some(projection) => writer.projection(projection)?,
    };
    writer.push(" FROM ");
    writer.push(spec.entity.name());

    if let Some(filter) = &spec.filter {
        writer.push(" WHERE ");
        writer.expr(filter)?;
    }

    if !spec.group_by.is_empty() {
        writer.push(" GROUP BY ");
        for (i, term) in spec.group_by.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.term(term, false)?;
        }
    }

    if !spec.order_by.is_empty() {
        writer.push(" ORDER BY ");
        for (i, order) in spec.order_by.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.term(&order.term, true)?;
            writer.push(match order.direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
    }

    if let Some(limit) = spec.limit {
        let limit = i64::try_from(limit)
            .map_err(|_| Error::QueryCompile(format!("limit {} out of range", limit)))?;
        writer.push(" LIMIT ?");
        writer.params.push(Value::Integer(limit));
    }

    Ok(writer.finish(column_types))
}

/// `INSERT INTO <T> (<fields>) VALUES (?, ...)` over all declared fields
pub fn compile_insert(entity: &EntityType, values: &[Value]) -> CompiledQuery {
    let sql = if entity.fields().is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", entity.name())
    } else {
        let names: Vec<&str> = entity.fields().iter().map(|f| f.name.as_str()).collect();
        let marks = vec!["?"; names.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            entity.name(),
            names.join(", "),
            marks
        )
    };
    CompiledQuery::raw(sql, values.to_vec())
}

/// `UPDATE <T> SET <field> = ?, ... WHERE id = ?`; `None` when there is
/// nothing to write
pub fn compile_update(entity: &EntityType, id: i64, values: &[Value]) -> Option<CompiledQuery> {
    if entity.fields().is_empty() {
        return None;
    }
    let assignments: Vec<String> = entity
        .fields()
        .iter()
        .map(|f| format!("{} = ?", f.name))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        entity.name(),
        assignments.join(", "),
        ID_FIELD
    );
    let mut params = values.to_vec();
    params.push(Value::Integer(id));
    Some(CompiledQuery::raw(sql, params))
}

/// `DELETE FROM <T> WHERE id = ?`
pub fn compile_delete(entity: &EntityType, id: i64) -> CompiledQuery {
    CompiledQuery::raw(
        format!("DELETE FROM {} WHERE {} = ?", entity.name(), ID_FIELD),
        vec![Value::Integer(id)],
    )
}

/// `DELETE FROM <T> WHERE <filter> RETURNING id`
pub fn compile_delete_where(entity: &EntityType, filter: &Expr) -> Result<CompiledQuery> {
    let mut writer = SqlWriter::new(entity);
    writer.push("DELETE FROM ");
    writer.push(entity.name());
    writer.push(" WHERE ");
    writer.expr(filter)?;
    writer.push(" RETURNING ");
    writer.push(ID_FIELD);
    Ok(writer.finish(vec![Some(FieldType::Integer)]))
}

/// Type of the value a term produces, when it can be known up front
fn term_type(entity: &EntityType, term: &Term) -> Option<FieldType> {
    match term {
        Term::Column(col) => entity.column_type(col.field()),
        Term::Literal(_) => None,
        Term::Distinct(term) => term_type(entity, term),
        Term::Call { function, args } => match function {
            Function::Count | Function::Length | Function::Random => Some(FieldType::Integer),
            Function::Avg => Some(FieldType::Real),
            Function::Lower | Function::Upper | Function::Trim | Function::Ltrim | Function::Rtrim => {
                Some(FieldType::Text)
            }
            Function::Min | Function::Max | Function::Abs => {
                let mut types = args.iter().map(|arg| term_type(entity, arg));
                let first = types.next().flatten();
                // mixed argument types decode as stored
                if types.all(|ty| ty == first) { first } else { None }
            }
            // integer for integer columns, real otherwise
            Function::Sum => None,
        },
    }
}

struct SqlWriter<'a> {
    entity: &'a EntityType,
    sql: String,
    params: Vec<Value>,
}

impl<'a> SqlWriter<'a> {
    fn new(entity: &'a EntityType) -> Self {
        Self {
            entity,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn finish(self, column_types: Vec<Option<FieldType>>) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
            column_types,
        }
    }

    fn full_projection(&mut self) -> Vec<Option<FieldType>> {
        let mut names = vec![ID_FIELD];
        let mut types = vec![Some(FieldType::Integer)];
        for field in self.entity.fields() {
            names.push(&field.name);
            types.push(Some(field.ty));
        }
        self.sql.push_str(&names.join(", "));
        types
    }

    fn projection(&mut self, projection: &Projection) -> Result<Vec<Option<FieldType>>> {
        if projection.is_empty() {
            return Err(Error::QueryCompile("empty projection".to_string()));
        }
        let mut types = Vec::with_capacity(projection.len());
        for (i, selection) in projection.items().iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.selection(selection)?;
            types.push(term_type(self.entity, &selection.term));
        }
        Ok(types)
    }

    fn selection(&mut self, selection: &Selection) -> Result<()> {
        self.term(&selection.term, true)?;
        if let Some(alias) = &selection.alias {
            if !is_identifier(alias) {
                return Err(Error::QueryCompile(format!("invalid alias {:?}", alias)));
            }
            self.push(" AS ");
            self.push(alias);
        }
        Ok(())
    }

    fn term(&mut self, term: &Term, allow_aggregate: bool) -> Result<()> {
        match term {
            Term::Column(col) => {
                if col.entity() != self.entity.name() {
                    return Err(Error::QueryCompile(format!(
                        "column {} does not belong to {}",
                        col,
                        self.entity.name()
                    )));
                }
                if self.entity.column_type(col.field()).is_none() {
                    return Err(Error::QueryCompile(format!("unknown column {}", col)));
                }
                self.push(col.field());
            }
            Term::Call { function, args } => {
                if function.is_aggregate(args.len()) && !allow_aggregate {
                    return Err(Error::QueryCompile(format!(
                        "aggregate {} used where a scalar operand is required",
                        term
                    )));
                }
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    return Err(Error::QueryCompile(format!(
                        "{} takes {} argument(s), got {}",
                        function.sql_name(),
                        if min == max { min.to_string() } else { format!("at least {}", min) },
                        args.len()
                    )));
                }
                self.push(function.sql_name());
                self.push("(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    match arg {
                        Term::Distinct(inner) if function.is_aggregate(args.len()) => {
                            self.push("DISTINCT ");
                            self.term(inner, false)?;
                        }
                        _ => self.term(arg, allow_aggregate)?,
                    }
                }
                self.push(")");
            }
            Term::Distinct(_) => {
                return Err(Error::QueryCompile(format!(
                    "{} is only valid inside an aggregate; use QuerySpec::distinct for rows",
                    term
                )));
            }
            Term::Literal(text) => self.push(text),
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Comparison { term, op, value } => {
                self.term(term, false)?;
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ?");
                self.params.push(value.clone());
            }
            Expr::Null { term, negated } => {
                self.term(term, false)?;
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::Conjunction {
                left,
                right,
                connective,
            } => {
                self.push("( ");
                self.expr(left)?;
                self.push(" ) ");
                self.push(connective.as_sql());
                self.push(" ( ");
                self.expr(right)?;
                self.push(" )");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::Projection;

    fn person() -> EntityType {
        EntityType::from_fields(
            "Person",
            &[("name", FieldType::Text), ("email", FieldType::Text), ("age", FieldType::Integer)],
        )
        .unwrap()
    }

    #[test]
    fn test_full_projection_with_range_filter() {
        let p = person();
        let spec = QuerySpec::new(&p).filter(p.c("age").ge(16) & p.c("age").le(50));
        let compiled = compile(&spec).unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT id, name, email, age FROM Person WHERE ( age >= ? ) AND ( age <= ? )"
        );
        assert_eq!(compiled.params, vec![Value::Integer(16), Value::Integer(50)]);
        assert_eq!(compiled.column_types.len(), 4);
    }

    #[test]
    fn test_no_filter_omits_where() {
        let compiled = compile(&QuerySpec::new(&person())).unwrap();
        assert_eq!(compiled.sql, "SELECT id, name, email, age FROM Person");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_aggregate_alias() {
        let p = person();
        let spec = QuerySpec::new(&p).select(p.c("age").min().alias("minimum_age"));
        let compiled = compile(&spec).unwrap();
        assert_eq!(compiled.sql, "SELECT min(age) AS minimum_age FROM Person");
        assert_eq!(compiled.column_types, vec![Some(FieldType::Integer)]);
    }

    #[test]
    fn test_clause_order_and_parameter_order() {
        let p = person();
        let spec = QuerySpec::new(&p)
            .select(p.c("name").then(p.c("age").sum().alias("total")))
            .filter(p.c("name").like("%a%").or(p.c("email").is_not_null()))
            .order_by(p.c("name").desc())
            .group_by(p.c("name"))
            .limit(5);
        let compiled = compile(&spec).unwrap();

        assert_eq!(
            compiled.sql,
            "SELECT name, sum(age) AS total FROM Person \
             WHERE ( name LIKE ? ) OR ( email IS NOT NULL ) \
             GROUP BY name ORDER BY name DESC LIMIT ?"
        );
        assert_eq!(compiled.params, vec![Value::Text("%a%".into()), Value::Integer(5)]);
    }

    #[test]
    fn test_nested_conjunctions() {
        let p = person();
        let filter = (p.c("age").gt(1) & p.c("age").lt(9)) | p.c("name").equals("x");
        let compiled = compile(&QuerySpec::new(&p).select(p.id_column()).filter(filter)).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT id FROM Person WHERE ( ( age > ? ) AND ( age < ? ) ) OR ( name = ? )"
        );
        assert_eq!(
            compiled.params,
            vec![Value::Integer(1), Value::Integer(9), Value::Text("x".into())]
        );
    }

    #[test]
    fn test_scalar_function_in_filter() {
        let p = person();
        let spec = QuerySpec::new(&p).filter(p.c("name").length().le(3));
        let compiled = compile(&spec).unwrap();
        assert!(compiled.sql.ends_with("WHERE length(name) <= ?"));
    }

    #[test]
    fn test_aggregate_in_filter_is_rejected() {
        let p = person();
        let spec = QuerySpec::new(&p).filter(p.c("age").max().gt(3));
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));
    }

    #[test]
    fn test_unknown_and_foreign_columns_are_rejected() {
        let p = person();
        let spec = QuerySpec::new(&p).select(p.c("height"));
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));

        let other = EntityType::from_fields("Pet", &[("age", FieldType::Integer)]).unwrap();
        let spec = QuerySpec::new(&p).filter(other.c("age").gt(1));
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));
    }

    #[test]
    fn test_empty_projection_and_bad_alias_are_rejected() {
        let p = person();
        let spec = QuerySpec::new(&p).select(Projection::default());
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));

        let spec = QuerySpec::new(&p).select(p.c("age").alias("x; DROP TABLE Person"));
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));
    }

    #[test]
    fn test_distinct_inside_aggregate_and_on_rows() {
        let p = person();
        let spec = QuerySpec::new(&p).select(p.c("age").distinct().count().alias("ages"));
        let compiled = compile(&spec).unwrap();
        assert_eq!(compiled.sql, "SELECT count(DISTINCT age) AS ages FROM Person");
        assert_eq!(compiled.column_types, vec![Some(FieldType::Integer)]);

        let spec = QuerySpec::new(&p).select(p.c("name").then(p.c("age"))).distinct();
        assert_eq!(compile(&spec).unwrap().sql, "SELECT DISTINCT name, age FROM Person");
    }

    #[test]
    fn test_bare_distinct_is_rejected() {
        let p = person();
        let spec = QuerySpec::new(&p).select(p.c("name").then(p.c("age").distinct()));
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));

        let spec = QuerySpec::new(&p).select(p.c("age").distinct().abs());
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));
    }

    #[test]
    fn test_literal_random_and_multi_argument_calls() {
        use crate::query::expr::{literal, max_of, random};

        let p = person();
        let spec = QuerySpec::new(&p).select(literal("*").count().alias("total"));
        assert_eq!(compile(&spec).unwrap().sql, "SELECT count(*) AS total FROM Person");

        let spec = QuerySpec::new(&p)
            .select(p.c("name"))
            .filter(max_of([p.c("age"), p.c("name").length()]).gt(10))
            .order_by(random().asc());
        let compiled = compile(&spec).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT name FROM Person WHERE max(age, length(name)) > ? ORDER BY random() ASC"
        );
        assert_eq!(compiled.params, vec![Value::Integer(10)]);

        let bad = Term::function(Function::Abs, [p.c("age"), p.c("age")]);
        let spec = QuerySpec::new(&p).select(bad);
        assert!(matches!(compile(&spec), Err(Error::QueryCompile(_))));
    }

    #[test]
    fn test_write_statements() {
        let p = person();
        let values = vec![Value::Text("a".into()), Value::Null, Value::Integer(3)];

        let insert = compile_insert(&p, &values);
        assert_eq!(insert.sql, "INSERT INTO Person (name, email, age) VALUES (?, ?, ?)");
        assert_eq!(insert.params, values);

        let update = compile_update(&p, 7, &values).unwrap();
        assert_eq!(update.sql, "UPDATE Person SET name = ?, email = ?, age = ? WHERE id = ?");
        assert_eq!(update.params.last(), Some(&Value::Integer(7)));

        let delete = compile_delete(&p, 7);
        assert_eq!(delete.sql, "DELETE FROM Person WHERE id = ?");

        let delete_where = compile_delete_where(&p, &p.c("age").lt(2)).unwrap();
        assert_eq!(delete_where.sql, "DELETE FROM Person WHERE age < ? RETURNING id");
        assert_eq!(delete_where.params, vec![Value::Integer(2)]);
    }

    #[test]
    fn test_fieldless_entity_statements() {
        let bare = EntityType::from_fields("Marker", &[]).unwrap();
        assert_eq!(compile_insert(&bare, &[]).sql, "INSERT INTO Marker DEFAULT VALUES");
        assert!(compile_update(&bare, 1, &[]).is_none());
        assert_eq!(compile(&QuerySpec::new(&bare)).unwrap().sql, "SELECT id FROM Marker");
    }
}
