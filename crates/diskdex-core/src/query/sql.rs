/// Translation of a [`Query`] into a parameterised SQLite statement.
///
/// Values never reach the SQL text: every predicate contributes a fixed
/// clause with `?` placeholders and pushes its value onto the parameter
/// list. The `ORDER BY` is chosen from a closed set of constants.
use super::{Query, SortOrder};
use rusqlite::types::Value;

/// Column list shared by every entry `SELECT`, in `row_to_entry` order.
pub const ENTRY_COLUMNS: &str =
    "path, name, size, is_directory, extension, modified_time, size_calculated, indexed_time";

/// A statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn order_by(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Name => "size_calculated DESC, name ASC, path ASC",
        SortOrder::SizeDesc => "size_calculated DESC, size DESC, name ASC, path ASC",
        SortOrder::MtimeDesc => "size_calculated DESC, modified_time DESC, name ASC, path ASC",
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Build the `WHERE` clause (without the keyword) and its parameters.
pub fn build_where(query: &Query) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(needle) = query.name_needle() {
        clauses.push("name LIKE ? ESCAPE '\\'".into());
        params.push(Value::Text(format!("%{}%", escape_like(needle))));
    }
    let exts = query.normalized_extensions();
    match exts.len() {
        0 => {}
        1 => clauses.push("extension = ?".into()),
        n => clauses.push(format!("extension IN ({})", vec!["?"; n].join(", "))),
    }
    params.extend(exts.into_iter().map(Value::Text));
    if query.min_size.is_some() || query.max_size.is_some() {
        clauses.push("size_calculated = 1".into());
    }
    if let Some(min) = query.min_size {
        clauses.push("size >= ?".into());
        params.push(Value::Integer(to_i64(min)));
    }
    if let Some(max) = query.max_size {
        clauses.push("size <= ?".into());
        params.push(Value::Integer(to_i64(max)));
    }
    match query.directory_filter() {
        Some(true) => clauses.push("is_directory = 1".into()),
        Some(false) => clauses.push("is_directory = 0".into()),
        None => {}
    }
    if let Some(after) = query.modified_after {
        clauses.push("modified_time > ?".into());
        params.push(Value::Integer(after.timestamp_millis()));
    }
    if let Some(before) = query.modified_before {
        clauses.push("modified_time < ?".into());
        params.push(Value::Integer(before.timestamp_millis()));
    }

    let clause = if clauses.is_empty() {
        "1 = 1".to_owned()
    } else {
        clauses.join(" AND ")
    };
    (clause, params)
}

/// Full `SELECT` for `query`, including ordering and pagination.
pub fn build_select(query: &Query) -> SqlQuery {
    let (clause, mut params) = build_where(query);
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE {clause} ORDER BY {} LIMIT ? OFFSET ?",
        order_by(query.sort)
    );
    // SQLite treats a negative LIMIT as "no limit".
    let limit = query
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1);
    params.push(Value::Integer(limit));
    params.push(Value::Integer(i64::try_from(query.offset).unwrap_or(i64::MAX)));
    SqlQuery { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_selects_everything() {
        let q = build_select(&Query::new());
        assert!(q.sql.contains("WHERE 1 = 1"));
        assert_eq!(q.params, vec![Value::Integer(-1), Value::Integer(0)]);
    }

    #[test]
    fn values_are_bound_not_interpolated() {
        let q = build_select(&Query::new().name_contains("x' OR 1=1 --").extension("TXT"));
        assert!(!q.sql.contains("OR 1=1"));
        assert_eq!(q.params[0], Value::Text("%x' OR 1=1 --%".into()));
        assert_eq!(q.params[1], Value::Text(".txt".into()));
    }

    #[test]
    fn extension_set_binds_one_placeholder_each() {
        let (clause, params) =
            build_where(&Query::new().extension("log").extensions(["TXT", ".log", "csv"]));
        assert_eq!(clause, "extension IN (?, ?, ?)");
        assert_eq!(
            params,
            vec![
                Value::Text(".log".into()),
                Value::Text(".txt".into()),
                Value::Text(".csv".into()),
            ]
        );
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
    }

    #[test]
    fn files_only_wins() {
        let (clause, _) = build_where(&Query::new().files_only().directories_only());
        assert!(clause.contains("is_directory = 0"));
        assert!(!clause.contains("is_directory = 1"));
    }

    #[test]
    fn size_bounds_require_calculated_sizes() {
        let (clause, params) = build_where(&Query::new().min_size(10).max_size(20));
        assert_eq!(
            clause,
            "size_calculated = 1 AND size >= ? AND size <= ?"
        );
        assert_eq!(params, vec![Value::Integer(10), Value::Integer(20)]);
    }

    #[test]
    fn every_sort_groups_calculated_first() {
        for sort in [SortOrder::Name, SortOrder::SizeDesc, SortOrder::MtimeDesc] {
            let q = build_select(&Query::new().sort(sort));
            assert!(q.sql.contains("ORDER BY size_calculated DESC"));
            assert!(q.sql.ends_with("LIMIT ? OFFSET ?"));
        }
    }

    #[test]
    fn pagination_binds_limit_and_offset() {
        let q = build_select(&Query::new().limit(25).offset(50));
        let n = q.params.len();
        assert_eq!(q.params[n - 2], Value::Integer(25));
        assert_eq!(q.params[n - 1], Value::Integer(50));
    }
}
