pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, section, statement, status, success, warn};
pub use table::{columns_table, rows_table, TableBuilder};
pub use theme::{theme, Theme};
