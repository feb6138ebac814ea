use std::fmt::Write;

mod scanner;

use scanner::{
    State, is_block_comment_end, is_block_comment_start, is_line_comment_start, matches_tag,
    scan_identifier, sigil_allowed, try_start_dollar_quote,
};

use crate::error::SqlDalError;
use crate::params::Params;
use crate::types::{DatabaseType, RowValues};

/// Target placeholder style for compiled queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Postgres,
    /// SQLite-style placeholders like `?1`.
    Sqlite,
}

impl PlaceholderStyle {
    #[must_use]
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => PlaceholderStyle::Postgres,
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => PlaceholderStyle::Sqlite,
        }
    }

    fn sigil(self) -> char {
        match self {
            PlaceholderStyle::Postgres => '$',
            PlaceholderStyle::Sqlite => '?',
        }
    }
}

/// Query text with named placeholders rewritten to positional ones.
///
/// Compile once, then [`bind`](NamedQuery::bind) any number of parameter sets; the batch path
/// relies on this to reuse one statement for every row of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    sql: String,
    names: Vec<String>,
}

impl NamedQuery {
    /// Rewrite `@name` / `:name` placeholders into the positional form for `style`.
    ///
    /// Repeated names reuse the same position. Placeholders inside string literals, quoted
    /// identifiers, comments, and dollar-quoted blocks are left alone, as are `::` casts.
    #[must_use]
    pub fn compile(sql: &str, style: PlaceholderStyle) -> Self {
        let mut out = String::with_capacity(sql.len());
        let mut names: Vec<String> = Vec::new();
        let mut state = State::Normal;
        let bytes = sql.as_bytes();
        let mut idx = 0;
        // start of the not-yet-copied slice of `sql`
        let mut copied = 0;

        while idx < bytes.len() {
            let b = bytes[idx];
            match state {
                State::Normal => match b {
                    b'\'' => state = State::SingleQuoted,
                    b'"' => state = State::DoubleQuoted,
                    b'[' if style == PlaceholderStyle::Sqlite => state = State::Bracketed,
                    _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                    _ if is_block_comment_start(bytes, idx) => {
                        state = State::BlockComment(1);
                        idx += 1;
                    }
                    b'$' => {
                        if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                            state = State::DollarQuoted(tag);
                            idx = advance;
                        }
                    }
                    b'@' | b':' if sigil_allowed(bytes, idx) => {
                        if let Some((end, name)) = scan_identifier(bytes, idx + 1) {
                            let position = match names
                                .iter()
                                .position(|n| n.eq_ignore_ascii_case(name))
                            {
                                Some(existing) => existing + 1,
                                None => {
                                    names.push(name.to_owned());
                                    names.len()
                                }
                            };
                            out.push_str(&sql[copied..idx]);
                            out.push(style.sigil());
                            let _ = write!(out, "{position}");
                            copied = end;
                            idx = end;
                            continue;
                        }
                    }
                    _ => {}
                },
                State::SingleQuoted => {
                    if b == b'\'' {
                        if bytes.get(idx + 1) == Some(&b'\'') {
                            idx += 1; // escaped quote
                        } else {
                            state = State::Normal;
                        }
                    }
                }
                State::DoubleQuoted => {
                    if b == b'"' {
                        if bytes.get(idx + 1) == Some(&b'"') {
                            idx += 1;
                        } else {
                            state = State::Normal;
                        }
                    }
                }
                State::Bracketed => {
                    if b == b']' {
                        state = State::Normal;
                    }
                }
                State::LineComment => {
                    if b == b'\n' {
                        state = State::Normal;
                    }
                }
                State::BlockComment(depth) => {
                    if is_block_comment_start(bytes, idx) {
                        state = State::BlockComment(depth + 1);
                        idx += 1;
                    } else if is_block_comment_end(bytes, idx) {
                        state = if depth == 1 {
                            State::Normal
                        } else {
                            State::BlockComment(depth - 1)
                        };
                        idx += 1;
                    }
                }
                State::DollarQuoted(ref tag) => {
                    if b == b'$' && matches_tag(bytes, idx, tag) {
                        idx += tag.len() + 1;
                        state = State::Normal;
                    }
                }
            }
            idx += 1;
        }

        out.push_str(&sql[copied..]);
        NamedQuery { sql: out, names }
    }

    /// The rewritten SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in positional order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Produce positional values for one parameter set.
    ///
    /// Parameters the query never references are ignored.
    ///
    /// # Errors
    /// Returns `SqlDalError::ParameterError` if a referenced name has no value.
    pub fn bind(&self, params: &Params) -> Result<Vec<RowValues>, SqlDalError> {
        self.names
            .iter()
            .map(|name| {
                params.get(name).cloned().ok_or_else(|| {
                    SqlDalError::ParameterError(format!(
                        "no value supplied for parameter @{name}"
                    ))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn rewrites_named_to_sqlite() {
        let q = NamedQuery::compile(
            "insert into t (id, name) values (@id, :name)",
            PlaceholderStyle::Sqlite,
        );
        assert_eq!(q.sql(), "insert into t (id, name) values (?1, ?2)");
        assert_eq!(q.names(), ["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn rewrites_named_to_postgres_and_reuses_positions() {
        let q = NamedQuery::compile(
            "select * from t where a = @x or b = @y or c = @X",
            PlaceholderStyle::Postgres,
        );
        assert_eq!(q.sql(), "select * from t where a = $1 or b = $2 or c = $1");
        assert_eq!(q.names().len(), 2);
    }

    #[test]
    fn skips_literals_comments_and_casts() {
        let sql = "select '@a', \"@b\", x::int -- @c\n/* :d */ from t where e = @e";
        let q = NamedQuery::compile(sql, PlaceholderStyle::Postgres);
        assert_eq!(
            q.sql(),
            "select '@a', \"@b\", x::int -- @c\n/* :d */ from t where e = $1"
        );
        assert_eq!(q.names(), ["e".to_string()]);
    }

    #[test]
    fn skips_dollar_quoted_blocks() {
        let sql = "$fn$ select @a $fn$ where b = @b";
        let q = NamedQuery::compile(sql, PlaceholderStyle::Postgres);
        assert_eq!(q.sql(), "$fn$ select @a $fn$ where b = $1");
    }

    #[test]
    fn leaves_positional_placeholders_alone() {
        let sql = "select * from t where a = $1";
        let q = NamedQuery::compile(sql, PlaceholderStyle::Postgres);
        assert_eq!(q.sql(), sql);
        assert!(q.names().is_empty());
    }

    #[test]
    fn sqlite_bracket_identifiers_are_opaque() {
        let q = NamedQuery::compile("select [@odd] from t where a = @a", PlaceholderStyle::Sqlite);
        assert_eq!(q.sql(), "select [@odd] from t where a = ?1");
    }

    #[test]
    fn bind_reports_missing_names() {
        let q = NamedQuery::compile("select @a, @b", PlaceholderStyle::Sqlite);
        let err = q.bind(&params! { "a" => 1 }).unwrap_err();
        assert!(matches!(err, SqlDalError::ParameterError(msg) if msg.contains("@b")));
    }

    #[test]
    fn bind_orders_values_by_position_and_ignores_extras() {
        let q = NamedQuery::compile("update t set name = @name where id = @id", PlaceholderStyle::Sqlite);
        let values = q
            .bind(&params! { "id" => 4, "name" => "n", "unused" => true })
            .unwrap();
        assert_eq!(values, vec![RowValues::Text("n".into()), RowValues::Int(4)]);
    }
}
