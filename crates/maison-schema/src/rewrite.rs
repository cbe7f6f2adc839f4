use crate::{catalog, SchemaError};
use rusqlite::Connection;

/// Replaces the declared definition of one column inside the stored
/// `CREATE TABLE` statement, without rewriting any row data. SQLite has no
/// `ALTER TABLE ... MODIFY COLUMN`; the supported metadata path is to edit
/// the schema text under `PRAGMA writable_schema`, bump the schema cookie,
/// and reload.
///
/// `new_decl` is everything after the column name, e.g.
/// `VARCHAR(255) NOT NULL DEFAULT '0'`. Fails without touching the schema
/// when the column definition cannot be located unambiguously.
pub fn rewrite_column_decl(
    conn: &Connection,
    table: &str,
    column: &str,
    new_decl: &str,
) -> Result<(), SchemaError> {
    let sql = catalog::table_sql(conn, table)?.ok_or_else(|| SchemaError::Rewrite {
        table: table.to_string(),
        column: column.to_string(),
        reason: "table has no stored schema".to_string(),
    })?;
    let rewritten =
        replace_column_decl(&sql, column, new_decl).ok_or_else(|| SchemaError::Rewrite {
            table: table.to_string(),
            column: column.to_string(),
            reason: "column definition not found in stored schema".to_string(),
        })?;

    let cookie: i64 = conn.query_row("PRAGMA schema_version", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA writable_schema = ON")?;
    let update = conn.execute(
        "UPDATE sqlite_master SET sql = ?1 WHERE type = 'table' AND name = ?2",
        rusqlite::params![rewritten, table],
    );
    // Leave writable-schema mode and force a reload even if the update
    // failed, so the connection never stays in the writable state.
    let reload = conn
        .execute_batch(&format!("PRAGMA schema_version = {}", cookie + 1))
        .and_then(|_| conn.execute_batch("PRAGMA writable_schema = RESET"));
    update?;
    reload?;
    Ok(())
}

/// Pure text surgery on a `CREATE TABLE` statement: finds the top-level
/// definition whose leading identifier is `column` and swaps everything
/// after the identifier for `new_decl`. Returns `None` unless exactly one
/// matching definition exists.
fn replace_column_decl(sql: &str, column: &str, new_decl: &str) -> Option<String> {
    let open = sql.find('(')?;
    let close = sql.rfind(')')?;
    if close <= open {
        return None;
    }
    let head = &sql[..=open];
    let body = &sql[open + 1..close];
    let tail = &sql[close..];

    let mut defs = split_top_level(body);
    let mut matched = 0usize;
    for def in defs.iter_mut() {
        let trimmed = def.trim_start();
        let Some(ident) = leading_identifier(trimmed) else {
            continue;
        };
        if is_constraint_keyword(&ident.unquoted) {
            continue;
        }
        if ident.unquoted.eq_ignore_ascii_case(column) {
            matched += 1;
            *def = format!("{} {}", ident.raw, new_decl);
        }
    }
    if matched != 1 {
        return None;
    }
    Some(format!("{head}{}{tail}", defs.join(", ")))
}

/// Splits the parenthesized body of a CREATE TABLE statement on commas
/// that are not nested inside parentheses, strings, or quoted identifiers.
fn split_top_level(body: &str) -> Vec<String> {
    let mut defs = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in body.chars() {
        if let Some(open) = quote {
            current.push(ch);
            let close = match open {
                '[' => ']',
                other => other,
            };
            if ch == close {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' | '[' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                defs.push(current.trim().to_string());
                current = String::new();
            }
            other => current.push(other),
        }
    }
    if !current.trim().is_empty() {
        defs.push(current.trim().to_string());
    }
    defs
}

struct Identifier {
    /// The token as written, quoting preserved.
    raw: String,
    unquoted: String,
}

fn leading_identifier(def: &str) -> Option<Identifier> {
    let mut chars = def.chars();
    let first = chars.next()?;
    match first {
        '"' | '`' | '\'' => {
            let close = first;
            let inner: String = chars.clone().take_while(|&c| c != close).collect();
            let raw_len = 1 + inner.chars().map(char::len_utf8).sum::<usize>() + 1;
            if def.len() < raw_len {
                return None;
            }
            Some(Identifier {
                raw: def[..raw_len].to_string(),
                unquoted: inner,
            })
        }
        '[' => {
            let inner: String = chars.clone().take_while(|&c| c != ']').collect();
            let raw_len = 1 + inner.chars().map(char::len_utf8).sum::<usize>() + 1;
            if def.len() < raw_len {
                return None;
            }
            Some(Identifier {
                raw: def[..raw_len].to_string(),
                unquoted: inner,
            })
        }
        _ => {
            let ident: String = def
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if ident.is_empty() {
                return None;
            }
            Some(Identifier {
                unquoted: ident.clone(),
                raw: ident,
            })
        }
    }
}

fn is_constraint_keyword(ident: &str) -> bool {
    matches!(
        ident.to_ascii_uppercase().as_str(),
        "CONSTRAINT" | "PRIMARY" | "UNIQUE" | "CHECK" | "FOREIGN"
    )
}
