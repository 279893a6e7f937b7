//! Query layer - expression builder, SQL compiler and result rows

pub mod expr;
pub mod compiler;
pub mod row;

pub use expr::{
    and_all, literal, max_of, min_of, or_all, random, ColumnRef, CompareOp, Connective,
    Direction, Expr, Function, OrderTerm, Projection, Selection, Term,
};
pub use compiler::{compile, CompiledQuery, QuerySpec};
pub use row::Row;
