use crate::ui::{theme, Icons};
use crate::value::{format_params, Value};
use owo_colors::OwoColorize;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, text.style(theme().header.clone()));
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!("{} {}: {}", icon, label.style(theme().dim.clone()), value);
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().dim.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn dim(text: &str) -> String {
    text.style(theme().dim.clone()).to_string()
}

/// Default sink for debug-mode statements: `<sql> [params]` on stderr
pub fn statement(sql: &str, params: &[Value]) {
    eprintln!("{}", render_statement(sql, params));
}

fn render_statement(sql: &str, params: &[Value]) -> String {
    format!(
        "{} {} {}",
        Icons::SQL,
        sql.style(theme().sql.clone()),
        format_params(params).style(theme().params.clone())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_keeps_brackets_in_sql_and_params() {
        let sql = "SELECT id FROM Note WHERE body = ' [x]' AND tag = ?";
        let rendered = render_statement(sql, &[Value::Text("a [b]".into())]);
        assert!(rendered.contains(sql));
        assert!(rendered.contains(r#"["a [b]"]"#));
    }
}
