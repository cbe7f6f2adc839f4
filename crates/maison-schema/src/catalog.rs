use crate::SchemaError;
use rusqlite::{Connection, OptionalExtension};

/// Coarse classification of a column's declared SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    Text,
    Numeric,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    /// Length parsed from the declared type, e.g. 255 for `VARCHAR(255)`.
    /// `None` for unparameterized types such as bare `TEXT` or `INTEGER`.
    pub max_length: Option<u32>,
    pub notnull: bool,
    /// Default clause exactly as stored in the catalog, literal quoting
    /// included.
    pub default: Option<String>,
    pub primary_key: bool,
}

impl ColumnInfo {
    pub fn class(&self) -> ColumnClass {
        classify(&self.declared_type)
    }
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool, SchemaError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool, SchemaError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 LIMIT 1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, SchemaError> {
    Ok(column_info(conn, table, column)?.is_some())
}

pub fn column_info(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<Option<ColumnInfo>, SchemaError> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .find(|info| info.name.eq_ignore_ascii_case(column)))
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, SchemaError> {
    let mut statement = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
    )?;
    let rows = statement.query_map([table], |row| {
        let declared_type: String = row.get(1)?;
        Ok(ColumnInfo {
            name: row.get(0)?,
            max_length: declared_max_length(&declared_type),
            declared_type,
            notnull: row.get::<_, i64>(2)? != 0,
            default: row.get(3)?,
            primary_key: row.get::<_, i64>(4)? != 0,
        })
    })?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

pub fn primary_key(conn: &Connection, table: &str) -> Result<Option<ColumnInfo>, SchemaError> {
    Ok(table_columns(conn, table)?
        .into_iter()
        .find(|info| info.primary_key))
}

/// Names of explicitly created indexes that cover `column`. Automatic
/// indexes backing UNIQUE or PRIMARY KEY constraints are excluded since
/// they cannot be dropped.
pub fn indexes_on_column(
    conn: &Connection,
    table: &str,
    column: &str,
) -> Result<Vec<String>, SchemaError> {
    let mut statement =
        conn.prepare("SELECT name, origin FROM pragma_index_list(?1)")?;
    let rows = statement.query_map([table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut index_names = Vec::new();
    for row in rows {
        let (name, origin) = row?;
        if origin != "c" {
            continue;
        }
        if index_covers_column(conn, &name, column)? {
            index_names.push(name);
        }
    }
    Ok(index_names)
}

fn index_covers_column(
    conn: &Connection,
    index: &str,
    column: &str,
) -> Result<bool, SchemaError> {
    let mut statement = conn.prepare("SELECT name FROM pragma_index_info(?1)")?;
    let rows = statement.query_map([index], |row| row.get::<_, Option<String>>(0))?;
    for row in rows {
        if let Some(name) = row? {
            if name.eq_ignore_ascii_case(column) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Stored `CREATE TABLE` statement for `table`, as kept in `sqlite_master`.
pub fn table_sql(conn: &Connection, table: &str) -> Result<Option<String>, SchemaError> {
    let sql = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(sql)
}

fn classify(declared: &str) -> ColumnClass {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        ColumnClass::Text
    } else if upper.contains("INT")
        || upper.contains("REAL")
        || upper.contains("FLOA")
        || upper.contains("DOUB")
        || upper.contains("DEC")
        || upper.contains("NUM")
    {
        ColumnClass::Numeric
    } else {
        ColumnClass::Other
    }
}

fn declared_max_length(declared: &str) -> Option<u32> {
    let open = declared.find('(')?;
    let rest = &declared[open + 1..];
    let end = rest.find([',', ')'])?;
    rest[..end].trim().parse().ok()
}
