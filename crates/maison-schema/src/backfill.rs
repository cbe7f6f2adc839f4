use crate::{catalog, SchemaError, PROPERTIES_TABLE};
use maison_core::report::StepReport;
use maison_core::slug::SlugAllocator;
use rusqlite::Connection;

const STEP: &str = "slug_backfill";

/// Assigns a unique slug to every property missing one. The allocator is
/// seeded with every slug already present so newly derived candidates
/// can never collide with existing rows or with each other.
pub fn backfill_slugs(conn: &Connection) -> Result<StepReport, SchemaError> {
    if !catalog::column_exists(conn, PROPERTIES_TABLE, "slug")? {
        return Ok(StepReport::skipped(STEP).with_note("slug column is absent"));
    }

    let mut allocator = SlugAllocator::new();
    {
        let mut statement = conn.prepare(
            "SELECT slug FROM properties WHERE slug IS NOT NULL AND slug <> ''",
        )?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            allocator.reserve(row?);
        }
    }

    let pending: Vec<(i64, String)> = {
        let mut statement = conn.prepare(
            "SELECT id, title FROM properties WHERE slug IS NULL OR slug = '' ORDER BY id",
        )?;
        let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut pending = Vec::new();
        for row in rows {
            pending.push(row?);
        }
        pending
    };
    if pending.is_empty() {
        return Ok(StepReport::skipped(STEP));
    }

    let mut report = StepReport::applied(STEP);
    let mut assigned = 0usize;
    for (id, title) in pending {
        let slug = allocator.allocate(&title);
        // A failed write is skipped but its candidate stays reserved: the
        // slug may already be partially visible and must not be reissued.
        match conn.execute(
            "UPDATE properties SET slug = ?1 WHERE id = ?2",
            rusqlite::params![slug, id],
        ) {
            Ok(_) => assigned += 1,
            Err(err) => {
                report.push_note(format!("row {id}: failed to persist slug {slug:?}: {err}"))
            }
        }
    }
    report.push_note(format!("assigned {assigned} slugs"));
    Ok(report)
}
