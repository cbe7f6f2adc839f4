use crate::catalog::{self, ColumnClass, ColumnInfo};
use crate::{rewrite, SchemaError, PROPERTIES_TABLE};
use maison_core::report::{StepOutcome, StepReport};
use rusqlite::Connection;

pub const PRICE_COLUMN: &str = "price";
pub const STAGING_COLUMN: &str = "price_temp";
/// Downstream display code treats the price as an opaque string and
/// relies on at least this much declared room.
pub const MIN_PRICE_TEXT_LEN: u32 = 255;

const STEP: &str = "price_text_migration";
const VERIFY_SAMPLE_LIMIT: i64 = 10;

/// Converts a populated numeric `price` column to bounded text in place.
///
/// Already-textual columns are widened when their declared length is
/// short of the minimum and otherwise left alone; unexpected types are
/// left untouched. The numeric path runs the staged
/// STAGE → COPY → VERIFY → SWAP sequence, with a best-effort restore on
/// failure. Nothing in here raises past the returned report except
/// errors from INSPECT/STAGE, which happen before the source column has
/// been touched.
pub fn migrate_price_column(conn: &Connection) -> Result<StepReport, SchemaError> {
    if !catalog::table_exists(conn, PROPERTIES_TABLE)? {
        return Ok(StepReport::skipped(STEP).with_note("properties table is absent"));
    }
    let Some(source) = catalog::column_info(conn, PROPERTIES_TABLE, PRICE_COLUMN)? else {
        return Ok(StepReport::skipped(STEP).with_note("price column is absent"));
    };

    match source.class() {
        ColumnClass::Text => widen_if_short(conn, &source),
        ColumnClass::Numeric => staged_migration(conn, &source),
        ColumnClass::Other => Ok(StepReport::skipped(STEP).with_note(format!(
            "unexpected declared type {}; column left untouched",
            source.declared_type
        ))),
    }
}

fn widen_if_short(conn: &Connection, source: &ColumnInfo) -> Result<StepReport, SchemaError> {
    match source.max_length {
        Some(length) if length < MIN_PRICE_TEXT_LEN => {
            let mut decl = format!("VARCHAR({MIN_PRICE_TEXT_LEN})");
            if source.notnull {
                decl.push_str(" NOT NULL");
            }
            if let Some(default) = &source.default {
                decl.push_str(" DEFAULT ");
                decl.push_str(default);
            }
            rewrite::rewrite_column_decl(conn, PROPERTIES_TABLE, PRICE_COLUMN, &decl)?;
            Ok(StepReport::applied(STEP).with_note(format!(
                "widened {} to VARCHAR({MIN_PRICE_TEXT_LEN})",
                source.declared_type
            )))
        }
        _ => Ok(StepReport::skipped(STEP)),
    }
}

fn staged_migration(conn: &Connection, source: &ColumnInfo) -> Result<StepReport, SchemaError> {
    let mut report = StepReport::applied(STEP);
    stage(conn, &mut report)?;
    if let Err(err) = copy_verify_swap(conn, &mut report) {
        return Ok(attempt_restore(conn, source, report, err));
    }
    report.push_note(format!(
        "converted {} to VARCHAR({MIN_PRICE_TEXT_LEN})",
        source.declared_type
    ));
    Ok(report)
}

/// A staging column left over from an interrupted run is treated as
/// corrupt, never resumed from.
fn stage(conn: &Connection, report: &mut StepReport) -> Result<(), SchemaError> {
    if catalog::column_exists(conn, PROPERTIES_TABLE, STAGING_COLUMN)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {PROPERTIES_TABLE} DROP COLUMN {STAGING_COLUMN}"
        ))?;
        report.push_note("dropped stale staging column from an interrupted run");
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {PROPERTIES_TABLE} ADD COLUMN {STAGING_COLUMN} TEXT"
    ))?;
    Ok(())
}

fn copy_verify_swap(conn: &Connection, report: &mut StepReport) -> Result<(), SchemaError> {
    let expected = count_non_null(conn, PRICE_COLUMN)?;
    copy_staged(conn)?;
    verify_staged(conn, expected, report)?;
    swap_staged(conn, report)?;
    Ok(())
}

fn copy_staged(conn: &Connection) -> Result<(), SchemaError> {
    conn.execute(
        &format!(
            "UPDATE {PROPERTIES_TABLE}
             SET {STAGING_COLUMN} = CAST({PRICE_COLUMN} AS TEXT)
             WHERE {PRICE_COLUMN} IS NOT NULL"
        ),
        [],
    )?;
    Ok(())
}

/// Count comparison plus a small row sample. Both checks are diagnostic:
/// a mismatch is recorded on the report but does not block the swap.
fn verify_staged(
    conn: &Connection,
    expected: i64,
    report: &mut StepReport,
) -> Result<(), SchemaError> {
    let actual = count_non_null(conn, STAGING_COLUMN)?;
    if actual != expected {
        report.push_note(format!(
            "staged value count {actual} does not match source count {expected}"
        ));
    }

    let mut statement = conn.prepare(&format!(
        "SELECT rowid, CAST({PRICE_COLUMN} AS TEXT), {STAGING_COLUMN}
         FROM {PROPERTIES_TABLE}
         WHERE {PRICE_COLUMN} IS NOT NULL
         ORDER BY rowid
         LIMIT ?1"
    ))?;
    let rows = statement.query_map([VERIFY_SAMPLE_LIMIT], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut mismatched = Vec::new();
    for row in rows {
        let (rowid, source_text, staged) = row?;
        if staged.as_deref() != Some(source_text.as_str()) {
            mismatched.push(rowid);
        }
    }
    if !mismatched.is_empty() {
        report.push_note(format!(
            "sample comparison mismatched on rows {mismatched:?}"
        ));
    }
    Ok(())
}

fn swap_staged(conn: &Connection, report: &mut StepReport) -> Result<(), SchemaError> {
    // Indexes on the numeric column do not carry over to its successor
    // and would block DROP COLUMN; they are lost unless a later index
    // invariant recreates them.
    for index in catalog::indexes_on_column(conn, PROPERTIES_TABLE, PRICE_COLUMN)? {
        conn.execute_batch(&format!("DROP INDEX \"{index}\""))?;
        report.push_note(format!("dropped index {index} on the numeric column"));
    }
    conn.execute_batch(&format!(
        "ALTER TABLE {PROPERTIES_TABLE} DROP COLUMN {PRICE_COLUMN}"
    ))?;
    conn.execute_batch(&format!(
        "ALTER TABLE {PROPERTIES_TABLE} RENAME COLUMN {STAGING_COLUMN} TO {PRICE_COLUMN}"
    ))?;
    // There should be no nulls left; the sentinel fill guarantees the
    // NOT NULL declaration below cannot be violated.
    conn.execute(
        &format!("UPDATE {PROPERTIES_TABLE} SET {PRICE_COLUMN} = '0' WHERE {PRICE_COLUMN} IS NULL"),
        [],
    )?;
    rewrite::rewrite_column_decl(
        conn,
        PROPERTIES_TABLE,
        PRICE_COLUMN,
        &format!("VARCHAR({MIN_PRICE_TEXT_LEN}) NOT NULL DEFAULT '0'"),
    )?;
    Ok(())
}

/// Best-effort rollback. Every failure in here is recorded on the report
/// and swallowed: this subsystem must never stop the process from
/// starting, and the next run's STAGE drops whatever is left behind.
fn attempt_restore(
    conn: &Connection,
    source: &ColumnInfo,
    mut report: StepReport,
    err: SchemaError,
) -> StepReport {
    report.outcome = StepOutcome::Failed {
        reason: err.to_string(),
    };

    let staging_exists =
        catalog::column_exists(conn, PROPERTIES_TABLE, STAGING_COLUMN).unwrap_or(false);
    let source_exists =
        catalog::column_exists(conn, PROPERTIES_TABLE, PRICE_COLUMN).unwrap_or(true);

    if !staging_exists {
        report.push_note("no staging column left to clean up");
        return report;
    }

    if source_exists {
        // Source survived; the staged copy is debris.
        match conn.execute_batch(&format!(
            "ALTER TABLE {PROPERTIES_TABLE} DROP COLUMN {STAGING_COLUMN}"
        )) {
            Ok(()) => report.push_note("dropped staging column after failed migration"),
            Err(drop_err) => report.push_note(format!(
                "could not drop staging column: {drop_err}; next run will drop it"
            )),
        }
        return report;
    }

    match conn.execute_batch(&format!(
        "ALTER TABLE {PROPERTIES_TABLE} RENAME COLUMN {STAGING_COLUMN} TO {PRICE_COLUMN}"
    )) {
        Ok(()) => {
            let mut decl = if source.declared_type.trim().is_empty() {
                "NUMERIC".to_string()
            } else {
                source.declared_type.clone()
            };
            if source.notnull {
                decl.push_str(" NOT NULL");
            }
            if let Some(default) = &source.default {
                decl.push_str(" DEFAULT ");
                decl.push_str(default);
            }
            match rewrite::rewrite_column_decl(conn, PROPERTIES_TABLE, PRICE_COLUMN, &decl) {
                Ok(()) => report.push_note("restored source column with its original declared type"),
                Err(rewrite_err) => report.push_note(format!(
                    "restored column data but not its original declared type: {rewrite_err}"
                )),
            }
        }
        Err(rename_err) => {
            report.push_note(format!("restore rename failed: {rename_err}"));
            match conn.execute_batch(&format!(
                "ALTER TABLE {PROPERTIES_TABLE} DROP COLUMN {STAGING_COLUMN}"
            )) {
                Ok(()) => report.push_note("dropped orphaned staging column"),
                Err(drop_err) => report.push_note(format!(
                    "could not drop orphaned staging column: {drop_err}; next run starts by dropping it"
                )),
            }
        }
    }
    report
}

fn count_non_null(conn: &Connection, column: &str) -> Result<i64, SchemaError> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {PROPERTIES_TABLE} WHERE \"{column}\" IS NOT NULL"),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_numeric_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open db");
        conn.execute_batch(
            "CREATE TABLE properties (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(255) NOT NULL,
                price INTEGER
            );
            INSERT INTO properties (title, price) VALUES
                ('Studio centre', 0),
                ('Villa vue mer', 25000000),
                ('Appartement F3', 7500000);",
        )
        .expect("legacy schema");
        conn
    }

    fn price_info(conn: &Connection) -> ColumnInfo {
        catalog::column_info(conn, "properties", "price")
            .expect("query")
            .expect("price present")
    }

    fn prices_by_id(conn: &Connection) -> Vec<String> {
        let mut statement = conn
            .prepare("SELECT price FROM properties ORDER BY id")
            .expect("prepare");
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query");
        rows.map(|row| row.expect("row")).collect()
    }

    #[test]
    fn numeric_column_becomes_exact_text() {
        let conn = legacy_numeric_db();
        let report = migrate_price_column(&conn).expect("migrate");
        assert_eq!(report.outcome, StepOutcome::Applied);

        let info = price_info(&conn);
        assert_eq!(info.class(), ColumnClass::Text);
        assert_eq!(info.max_length, Some(255));
        assert!(info.notnull);
        assert_eq!(prices_by_id(&conn), vec!["0", "25000000", "7500000"]);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM properties", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 3);
        assert!(!catalog::column_exists(&conn, "properties", "price_temp").expect("staging gone"));
    }

    #[test]
    fn rerun_after_success_is_a_noop() {
        let conn = legacy_numeric_db();
        migrate_price_column(&conn).expect("first run");
        let second = migrate_price_column(&conn).expect("second run");
        assert_eq!(second.outcome, StepOutcome::Skipped);
        assert_eq!(prices_by_id(&conn), vec!["0", "25000000", "7500000"]);
    }

    #[test]
    fn stale_staging_column_is_dropped_and_migration_completes() {
        let conn = legacy_numeric_db();
        // Simulate a process killed after STAGE: staging exists with junk,
        // source column untouched.
        conn.execute_batch(
            "ALTER TABLE properties ADD COLUMN price_temp TEXT;
             UPDATE properties SET price_temp = 'junk' WHERE id = 1;",
        )
        .expect("stale staging");

        let report = migrate_price_column(&conn).expect("migrate");
        assert_eq!(report.outcome, StepOutcome::Applied);
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("stale staging")));
        assert_eq!(prices_by_id(&conn), vec!["0", "25000000", "7500000"]);
    }

    #[test]
    fn nulls_are_filled_with_sentinel_before_not_null() {
        let conn = legacy_numeric_db();
        conn.execute_batch("INSERT INTO properties (title, price) VALUES ('Sans prix', NULL)")
            .expect("null row");

        migrate_price_column(&conn).expect("migrate");
        let sentinel: String = conn
            .query_row(
                "SELECT price FROM properties WHERE title = 'Sans prix'",
                [],
                |row| row.get(0),
            )
            .expect("sentinel row");
        assert_eq!(sentinel, "0");
        assert!(price_info(&conn).notnull);
    }

    #[test]
    fn short_text_column_is_widened_in_place() {
        let conn = Connection::open_in_memory().expect("open db");
        conn.execute_batch(
            "CREATE TABLE properties (
                id INTEGER PRIMARY KEY,
                price VARCHAR(100) NOT NULL DEFAULT '0'
            );
            INSERT INTO properties (id, price) VALUES (1, '125000');",
        )
        .expect("short text schema");

        let report = migrate_price_column(&conn).expect("widen");
        assert_eq!(report.outcome, StepOutcome::Applied);
        assert!(report.notes.iter().any(|note| note.contains("widened")));

        let info = price_info(&conn);
        assert_eq!(info.max_length, Some(255));
        assert!(info.notnull);
        assert_eq!(info.default.as_deref(), Some("'0'"));
        let value: String = conn
            .query_row("SELECT price FROM properties WHERE id = 1", [], |row| {
                row.get(0)
            })
            .expect("row intact");
        assert_eq!(value, "125000");
        // No staged migration happened.
        assert!(!catalog::column_exists(&conn, "properties", "price_temp").expect("no staging"));

        let second = migrate_price_column(&conn).expect("rerun");
        assert_eq!(second.outcome, StepOutcome::Skipped);
    }

    #[test]
    fn unexpected_type_is_left_untouched() {
        let conn = Connection::open_in_memory().expect("open db");
        conn.execute_batch(
            "CREATE TABLE properties (id INTEGER PRIMARY KEY, price BLOB);
             INSERT INTO properties (id, price) VALUES (1, x'00ff');",
        )
        .expect("blob schema");

        let report = migrate_price_column(&conn).expect("inspect");
        assert_eq!(report.outcome, StepOutcome::Skipped);
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("unexpected declared type")));
        assert_eq!(price_info(&conn).class(), ColumnClass::Other);
    }

    #[test]
    fn indexes_on_the_numeric_column_are_dropped_for_the_swap() {
        let conn = legacy_numeric_db();
        conn.execute_batch("CREATE INDEX idx_properties_price ON properties(price)")
            .expect("price index");

        let report = migrate_price_column(&conn).expect("migrate");
        assert_eq!(report.outcome, StepOutcome::Applied);
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("idx_properties_price")));
        assert!(!catalog::index_exists(&conn, "idx_properties_price").expect("index gone"));
    }

    #[test]
    fn sample_mismatch_is_recorded_but_does_not_block_the_swap() {
        let conn = legacy_numeric_db();
        let mut report = StepReport::applied("price_text_migration");
        stage(&conn, &mut report).expect("stage");
        let expected = count_non_null(&conn, PRICE_COLUMN).expect("count");
        copy_staged(&conn).expect("copy");
        // Corrupt one staged value the way a buggy cast would.
        conn.execute_batch("UPDATE properties SET price_temp = '999' WHERE id = 2")
            .expect("corrupt staged value");

        verify_staged(&conn, expected, &mut report).expect("verify is non-fatal");
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("sample comparison mismatched")));

        swap_staged(&conn, &mut report).expect("swap proceeds");
        let info = price_info(&conn);
        assert!(info.notnull);
        assert_eq!(info.max_length, Some(255));
        // The staged value, corrupt or not, is what lands in the column.
        assert_eq!(prices_by_id(&conn), vec!["0", "999", "7500000"]);
    }

    #[test]
    fn count_mismatch_is_recorded_but_non_fatal() {
        let conn = legacy_numeric_db();
        let mut report = StepReport::applied("price_text_migration");
        stage(&conn, &mut report).expect("stage");
        copy_staged(&conn).expect("copy");

        verify_staged(&conn, 99, &mut report).expect("verify is non-fatal");
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("does not match source count 99")));
    }

    #[test]
    fn failed_swap_restores_the_source_column() {
        let conn = legacy_numeric_db();
        let source = price_info(&conn);
        let mut report = StepReport::applied("price_text_migration");
        stage(&conn, &mut report).expect("stage");
        copy_staged(&conn).expect("copy");
        // Simulate a crash between DROP COLUMN and the NOT NULL rewrite:
        // source gone, staging still under its temporary name.
        conn.execute_batch("ALTER TABLE properties DROP COLUMN price")
            .expect("drop source");

        let report = attempt_restore(
            &conn,
            &source,
            report,
            SchemaError::Rewrite {
                table: "properties".to_string(),
                column: "price".to_string(),
                reason: "simulated failure".to_string(),
            },
        );
        assert!(report.outcome.is_failure());
        assert!(report
            .notes
            .iter()
            .any(|note| note.contains("restored source column")));

        let info = price_info(&conn);
        assert_eq!(info.declared_type.to_ascii_uppercase(), "INTEGER");
        assert!(!catalog::column_exists(&conn, "properties", "price_temp").expect("staging gone"));
        assert_eq!(
            prices_by_id(&conn),
            vec!["0", "25000000", "7500000"],
            "copied values survive the restore"
        );
    }

    #[test]
    fn failed_copy_drops_the_staging_debris() {
        let conn = legacy_numeric_db();
        let source = price_info(&conn);
        let mut report = StepReport::applied("price_text_migration");
        stage(&conn, &mut report).expect("stage");

        let report = attempt_restore(
            &conn,
            &source,
            report,
            SchemaError::Rewrite {
                table: "properties".to_string(),
                column: "price".to_string(),
                reason: "simulated copy failure".to_string(),
            },
        );
        assert!(report.outcome.is_failure());
        // Source untouched, staging cleaned up.
        assert_eq!(price_info(&conn).class(), ColumnClass::Numeric);
        assert!(!catalog::column_exists(&conn, "properties", "price_temp").expect("staging gone"));
    }
}
