//! Expression builder
//!
//! Columns, function calls, comparisons and boolean combinators are plain
//! tree values. Nothing here touches SQL text; see [`super::compiler`].
//!
//! ```
//! use litestore::{EntityType, FieldType};
//!
//! let person = EntityType::from_fields("Person", &[("age", FieldType::Integer)]).unwrap();
//! let teens = person.c("age").ge(13) & person.c("age").le(19);
//! let stats = person.c("age").min().alias("youngest").then(person.c("age").max());
//! assert_eq!(stats.len(), 2);
//! # let _ = teens;
//! ```

use crate::value::Value;
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// (entity type, field) pair naming one column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    entity: String,
    field: String,
}

impl ColumnRef {
    pub fn new(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            field: field.into(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.field)
    }
}

/// SQL functions usable on a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Min,
    Max,
    Count,
    Sum,
    Avg,
    Abs,
    Length,
    Lower,
    Upper,
    Trim,
    Ltrim,
    Rtrim,
    Random,
}

impl Function {
    pub fn sql_name(&self) -> &'static str {
        match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::Count => "count",
            Function::Sum => "sum",
            Function::Avg => "avg",
            Function::Abs => "abs",
            Function::Length => "length",
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Trim => "trim",
            Function::Ltrim => "ltrim",
            Function::Rtrim => "rtrim",
            Function::Random => "random",
        }
    }

    /// Whether a call with `arity` arguments collapses rows. `min`/`max`
    /// with several arguments are scalar in SQLite.
    pub fn is_aggregate(&self, arity: usize) -> bool {
        match self {
            Function::Min | Function::Max => arity == 1,
            Function::Count | Function::Sum | Function::Avg => true,
            _ => false,
        }
    }

    /// Accepted argument counts as (min, max)
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Function::Random => (0, 0),
            Function::Min | Function::Max => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

/// A column, a function call, `DISTINCT` over a term or raw SQL text
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Column(ColumnRef),
    Call { function: Function, args: Vec<Term> },
    /// `DISTINCT <term>`; only valid as the argument of an aggregate
    Distinct(Box<Term>),
    /// Rendered verbatim (`*`, SQL keywords); never built from user input
    Literal(String),
}

impl Term {
    pub fn column(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Term::Column(ColumnRef::new(entity, field))
    }

    /// `function(args...)`
    pub fn function(function: Function, args: impl IntoIterator<Item = Term>) -> Self {
        Term::Call {
            function,
            args: args.into_iter().collect(),
        }
    }

    fn call(self, function: Function) -> Self {
        Term::Call {
            function,
            args: vec![self],
        }
    }

    /// Whether an aggregate occurs anywhere in this term
    pub fn has_aggregate(&self) -> bool {
        match self {
            Term::Column(_) | Term::Literal(_) => false,
            Term::Call { function, args } => {
                function.is_aggregate(args.len()) || args.iter().any(Term::has_aggregate)
            }
            Term::Distinct(term) => term.has_aggregate(),
        }
    }

    /// Every column referenced by this term
    pub fn columns(&self) -> Vec<&ColumnRef> {
        match self {
            Term::Column(col) => vec![col],
            Term::Literal(_) => Vec::new(),
            Term::Call { args, .. } => args.iter().flat_map(Term::columns).collect(),
            Term::Distinct(term) => term.columns(),
        }
    }

    // ========== Comparisons ==========

    /// `= ?`; comparing against `Null` becomes `IS NULL`
    pub fn equals(self, value: impl Into<Value>) -> Expr {
        match value.into() {
            Value::Null => self.is_null(),
            value => self.compare(CompareOp::Eq, value),
        }
    }

    /// `!= ?`; comparing against `Null` becomes `IS NOT NULL`
    pub fn not_equals(self, value: impl Into<Value>) -> Expr {
        match value.into() {
            Value::Null => self.is_not_null(),
            value => self.compare(CompareOp::Ne, value),
        }
    }

    pub fn lt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value.into())
    }

    pub fn le(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Le, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value.into())
    }

    pub fn ge(self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ge, value.into())
    }

    pub fn like(self, pattern: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Like, pattern.into())
    }

    pub fn is_null(self) -> Expr {
        Expr::Null {
            term: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Null {
            term: self,
            negated: true,
        }
    }

    fn compare(self, op: CompareOp, value: Value) -> Expr {
        Expr::Comparison {
            term: self,
            op,
            value,
        }
    }

    // ========== Aggregates ==========

    pub fn min(self) -> Term {
        self.call(Function::Min)
    }

    pub fn max(self) -> Term {
        self.call(Function::Max)
    }

    pub fn count(self) -> Term {
        self.call(Function::Count)
    }

    pub fn sum(self) -> Term {
        self.call(Function::Sum)
    }

    pub fn avg(self) -> Term {
        self.call(Function::Avg)
    }

    /// `DISTINCT <term>`, for use inside an aggregate: `age.distinct().count()`
    pub fn distinct(self) -> Term {
        Term::Distinct(Box::new(self))
    }

    // ========== Scalar functions ==========

    pub fn abs(self) -> Term {
        self.call(Function::Abs)
    }

    pub fn length(self) -> Term {
        self.call(Function::Length)
    }

    pub fn lower(self) -> Term {
        self.call(Function::Lower)
    }

    pub fn upper(self) -> Term {
        self.call(Function::Upper)
    }

    pub fn trim(self) -> Term {
        self.call(Function::Trim)
    }

    pub fn ltrim(self) -> Term {
        self.call(Function::Ltrim)
    }

    pub fn rtrim(self) -> Term {
        self.call(Function::Rtrim)
    }

    // ========== Projection & ordering ==========

    /// Name the result column (`<term> AS <alias>`)
    pub fn alias(self, name: impl Into<String>) -> Selection {
        Selection {
            term: self,
            alias: Some(name.into()),
        }
    }

    pub fn asc(self) -> OrderTerm {
        OrderTerm {
            term: self,
            direction: Direction::Asc,
        }
    }

    pub fn desc(self) -> OrderTerm {
        OrderTerm {
            term: self,
            direction: Direction::Desc,
        }
    }

    /// Combine into a projection, left to right
    pub fn then(self, other: impl Into<Projection>) -> Projection {
        Projection::from(self).then(other)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Column(col) => write!(f, "{}", col),
            Term::Call { function, args } => {
                write!(f, "{}(", function.sql_name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Term::Distinct(term) => write!(f, "DISTINCT {}", term),
            Term::Literal(text) => write!(f, "{}", text),
        }
    }
}

/// One projected result column with an optional alias
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub term: Term,
    pub alias: Option<String>,
}

impl Selection {
    pub fn then(self, other: impl Into<Projection>) -> Projection {
        Projection::from(self).then(other)
    }
}

impl From<Term> for Selection {
    fn from(term: Term) -> Self {
        Selection { term, alias: None }
    }
}

/// Ordered list of projected columns; duplicates are kept
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection {
    items: Vec<Selection>,
}

impl Projection {
    pub fn of<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Append another projection, flattening it
    pub fn then(mut self, other: impl Into<Projection>) -> Projection {
        self.items.extend(other.into().items);
        self
    }

    pub fn items(&self) -> &[Selection] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Term> for Projection {
    fn from(term: Term) -> Self {
        Projection {
            items: vec![term.into()],
        }
    }
}

impl From<Selection> for Projection {
    fn from(selection: Selection) -> Self {
        Projection {
            items: vec![selection],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// A term with a sort direction, for `ORDER BY`
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub term: Term,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

/// Filter expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `<term> <op> ?` with the literal bound as a parameter
    Comparison { term: Term, op: CompareOp, value: Value },
    /// `<term> IS [NOT] NULL`
    Null { term: Term, negated: bool },
    /// `( <left> ) AND|OR ( <right> )`
    Conjunction {
        left: Box<Expr>,
        right: Box<Expr>,
        connective: Connective,
    },
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        self.join(other, Connective::And)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.join(other, Connective::Or)
    }

    fn join(self, other: Expr, connective: Connective) -> Expr {
        Expr::Conjunction {
            left: Box::new(self),
            right: Box::new(other),
            connective,
        }
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

/// Raw SQL text as a term, e.g. `literal("*").count()`
pub fn literal(text: impl Into<String>) -> Term {
    Term::Literal(text.into())
}

/// `random()`, mostly for `ORDER BY random()`
pub fn random() -> Term {
    Term::function(Function::Random, Vec::new())
}

/// Scalar `max(a, b, ...)` over several terms
pub fn max_of(terms: impl IntoIterator<Item = Term>) -> Term {
    Term::function(Function::Max, terms)
}

/// Scalar `min(a, b, ...)` over several terms
pub fn min_of(terms: impl IntoIterator<Item = Term>) -> Term {
    Term::function(Function::Min, terms)
}

/// Left-fold `exprs` with AND; `None` when empty
pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

/// Left-fold `exprs` with OR; `None` when empty
pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::or)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age() -> Term {
        Term::column("Person", "age")
    }

    #[test]
    fn test_comparison_binds_literal() {
        assert_eq!(
            age().ge(16),
            Expr::Comparison {
                term: age(),
                op: CompareOp::Ge,
                value: Value::Integer(16),
            }
        );
    }

    #[test]
    fn test_null_equality_becomes_is_null() {
        assert_eq!(age().equals(Value::Null), age().is_null());
        assert_eq!(age().not_equals(None::<i64>), age().is_not_null());
    }

    #[test]
    fn test_operators_match_named_combinators() {
        assert_eq!(age().ge(16) & age().le(50), age().ge(16).and(age().le(50)));
        assert_eq!(age().lt(1) | age().gt(9), age().lt(1).or(age().gt(9)));
    }

    #[test]
    fn test_and_all_folds_left() {
        let folded = and_all(vec![age().gt(1), age().gt(2), age().gt(3)]).unwrap();
        assert_eq!(folded, age().gt(1).and(age().gt(2)).and(age().gt(3)));
        assert!(or_all(Vec::new()).is_none());
    }

    #[test]
    fn test_projection_flattens_and_keeps_duplicates() {
        let name = Term::column("Person", "name");
        let projection = age()
            .min()
            .alias("youngest")
            .then(age().max().then(name.clone()))
            .then(name.clone());

        let rendered: Vec<String> = projection
            .items()
            .iter()
            .map(|s| s.term.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec!["min(Person.age)", "max(Person.age)", "Person.name", "Person.name"]
        );
        assert_eq!(projection.items()[0].alias.as_deref(), Some("youngest"));
    }

    #[test]
    fn test_aggregate_detection() {
        assert!(age().min().has_aggregate());
        assert!(age().count().abs().has_aggregate());
        assert!(!age().abs().has_aggregate());
        assert!(!age().has_aggregate());
        assert!(age().distinct().count().has_aggregate());
    }

    #[test]
    fn test_multi_argument_min_max_are_scalar() {
        let height = Term::column("Person", "height");
        let tallest = max_of([age(), height.clone()]);
        assert!(!tallest.has_aggregate());
        assert_eq!(tallest.to_string(), "max(Person.age, Person.height)");
        assert_eq!(tallest.columns().len(), 2);
        assert!(min_of([age()]).has_aggregate());
    }

    #[test]
    fn test_literal_and_random_terms() {
        assert_eq!(literal("*").count().to_string(), "count(*)");
        assert!(literal("*").columns().is_empty());
        assert_eq!(random().to_string(), "random()");
        assert!(!random().has_aggregate());
    }
}
