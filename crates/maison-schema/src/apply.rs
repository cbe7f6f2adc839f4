use crate::{catalog, SchemaError, PROPERTIES_TABLE};
use maison_core::report::StepReport;
use rusqlite::Connection;

const CREATE_PROPERTIES_SQL: &str = "CREATE TABLE properties (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title VARCHAR(255) NOT NULL,
    price VARCHAR(255) NOT NULL DEFAULT '0',
    slug VARCHAR(255),
    is_published INTEGER NOT NULL DEFAULT 1,
    listing_type VARCHAR(32) NOT NULL DEFAULT 'sale',
    created_at TEXT NOT NULL DEFAULT ''
)";

const CREATE_SITE_SETTINGS_SQL: &str = "CREATE TABLE site_settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(191) NOT NULL UNIQUE,
    value TEXT NOT NULL DEFAULT ''
)";

const CREATE_SITE_PAGES_SQL: &str = "CREATE TABLE site_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug VARCHAR(255) NOT NULL UNIQUE,
    title VARCHAR(255) NOT NULL,
    body TEXT NOT NULL DEFAULT ''
)";

/// Two concurrently booting processes can both observe a missing object
/// and both try to create it; the loser's error is success for our
/// purposes.
pub(crate) fn is_already_exists(err: &rusqlite::Error) -> bool {
    let message = err.to_string();
    message.contains("already exists") || message.contains("duplicate column name")
}

/// Runs one DDL statement, reporting whether this process actually
/// created the object (`false` means another process got there first).
fn execute_ddl(conn: &Connection, sql: &str) -> Result<bool, SchemaError> {
    match conn.execute_batch(sql) {
        Ok(()) => Ok(true),
        Err(err) if is_already_exists(&err) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn lost_race_note(report: StepReport) -> StepReport {
    report.with_note("created concurrently by another process")
}

/// Creates the primary entity table on a fresh database. Every other step
/// re-checks live catalog state, so this stays safe to skip when the
/// table was provisioned elsewhere.
pub fn ensure_properties_table(conn: &Connection) -> Result<StepReport, SchemaError> {
    const STEP: &str = "properties_table";
    if catalog::table_exists(conn, PROPERTIES_TABLE)? {
        return Ok(StepReport::skipped(STEP));
    }
    if execute_ddl(conn, CREATE_PROPERTIES_SQL)? {
        Ok(StepReport::applied(STEP))
    } else {
        Ok(lost_race_note(StepReport::skipped(STEP)))
    }
}

pub fn ensure_column(
    conn: &Connection,
    step: &str,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<StepReport, SchemaError> {
    if !catalog::table_exists(conn, table)? {
        return Ok(StepReport::skipped(step).with_note(format!("table {table} is absent")));
    }
    if catalog::column_exists(conn, table, column)? {
        return Ok(StepReport::skipped(step));
    }
    let sql = format!("ALTER TABLE \"{table}\" ADD COLUMN \"{column}\" {decl}");
    if execute_ddl(conn, &sql)? {
        Ok(StepReport::applied(step))
    } else {
        Ok(lost_race_note(StepReport::skipped(step)))
    }
}

pub fn ensure_index(
    conn: &Connection,
    step: &str,
    table: &str,
    index: &str,
    columns: &[&str],
) -> Result<StepReport, SchemaError> {
    if !catalog::table_exists(conn, table)? {
        return Ok(StepReport::skipped(step).with_note(format!("table {table} is absent")));
    }
    if catalog::index_exists(conn, index)? {
        return Ok(StepReport::skipped(step));
    }
    let column_list = columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("CREATE INDEX \"{index}\" ON \"{table}\" ({column_list})");
    if execute_ddl(conn, &sql)? {
        Ok(StepReport::applied(step))
    } else {
        Ok(lost_race_note(StepReport::skipped(step)))
    }
}

/// One-time data repair: rows written before `listing_type` existed carry
/// the old implicit default (empty string) and are moved to `'sale'`.
pub fn backfill_listing_type_default(conn: &Connection) -> Result<StepReport, SchemaError> {
    const STEP: &str = "listing_type_defaults";
    if !catalog::column_exists(conn, PROPERTIES_TABLE, "listing_type")? {
        return Ok(StepReport::skipped(STEP).with_note("listing_type column is absent"));
    }
    let changed = conn.execute(
        "UPDATE properties SET listing_type = 'sale' WHERE listing_type = ''",
        [],
    )?;
    if changed == 0 {
        Ok(StepReport::skipped(STEP))
    } else {
        Ok(StepReport::applied(STEP).with_note(format!("defaulted {changed} rows to 'sale'")))
    }
}

/// The child table's parent-reference column must carry the exact declared
/// type of the parent's primary key, discovered from the live catalog
/// rather than hardcoded.
pub fn ensure_property_places(conn: &Connection) -> Result<StepReport, SchemaError> {
    const STEP: &str = "property_places_table";
    if catalog::table_exists(conn, "property_places")? {
        return Ok(StepReport::skipped(STEP));
    }
    let Some(parent_pk) = catalog::primary_key(conn, PROPERTIES_TABLE)? else {
        return Ok(
            StepReport::skipped(STEP).with_note("parent table has no introspectable primary key")
        );
    };
    let pk_type = if parent_pk.declared_type.trim().is_empty() {
        "INTEGER".to_string()
    } else {
        parent_pk.declared_type.clone()
    };

    let sql = format!(
        "CREATE TABLE property_places (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    property_id {pk_type} NOT NULL,
    label VARCHAR(255) NOT NULL,
    distance_m INTEGER,
    position INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (property_id) REFERENCES properties({pk})
)",
        pk = parent_pk.name,
    );
    let mut report = if execute_ddl(conn, &sql)? {
        StepReport::applied(STEP).with_note(format!("property_id typed {pk_type} after parent key"))
    } else {
        lost_race_note(StepReport::skipped(STEP))
    };

    if !catalog::index_exists(conn, "idx_property_places_property")? {
        let created = execute_ddl(
            conn,
            "CREATE INDEX idx_property_places_property ON property_places (property_id, position)",
        )?;
        if created {
            report.push_note("indexed by property and position".to_string());
        }
    }
    Ok(report)
}

pub fn ensure_site_settings(conn: &Connection) -> Result<StepReport, SchemaError> {
    ensure_table(conn, "site_settings_table", "site_settings", CREATE_SITE_SETTINGS_SQL)
}

pub fn ensure_site_pages(conn: &Connection) -> Result<StepReport, SchemaError> {
    ensure_table(conn, "site_pages_table", "site_pages", CREATE_SITE_PAGES_SQL)
}

fn ensure_table(
    conn: &Connection,
    step: &str,
    table: &str,
    sql: &str,
) -> Result<StepReport, SchemaError> {
    if catalog::table_exists(conn, table)? {
        return Ok(StepReport::skipped(step));
    }
    if execute_ddl(conn, sql)? {
        Ok(StepReport::applied(step))
    } else {
        Ok(lost_race_note(StepReport::skipped(step)))
    }
}
