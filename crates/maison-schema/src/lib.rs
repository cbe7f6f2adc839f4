//! Self-healing schema engine for the maison property-listing database.
//!
//! Runs once at boot, derives everything it needs from live catalog state,
//! and reports per-step outcomes instead of raising: a failed step never
//! prevents the process from starting.

mod apply;
mod backfill;
mod catalog;
mod price;
mod rewrite;

pub use catalog::{
    column_exists, column_info, index_exists, primary_key, table_exists, ColumnClass, ColumnInfo,
};
pub use maison_core::report::{HealReport, StepOutcome, StepReport};
pub use price::{MIN_PRICE_TEXT_LEN, PRICE_COLUMN, STAGING_COLUMN};

use rusqlite::Connection;
use thiserror::Error;

pub const PROPERTIES_TABLE: &str = "properties";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot rewrite declared type of {table}.{column}: {reason}")]
    Rewrite {
        table: String,
        column: String,
        reason: String,
    },
}

/// Runs every schema step in fixed order against live catalog state.
/// Each step is isolated: an error becomes a `Failed` entry in the report
/// and the next step still runs. Nothing is cached between runs, which is
/// what makes a rerun against an already-healed database a pure no-op.
pub fn heal(conn: &Connection) -> HealReport {
    let mut report = HealReport::default();

    report.push(run_step("properties_table", || {
        apply::ensure_properties_table(conn)
    }));
    report.push(run_step("slug_column", || {
        apply::ensure_column(conn, "slug_column", PROPERTIES_TABLE, "slug", "VARCHAR(255)")
    }));
    report.push(run_step("is_published_column", || {
        apply::ensure_column(
            conn,
            "is_published_column",
            PROPERTIES_TABLE,
            "is_published",
            "INTEGER NOT NULL DEFAULT 1",
        )
    }));
    report.push(run_step("listing_type_column", || {
        apply::ensure_column(
            conn,
            "listing_type_column",
            PROPERTIES_TABLE,
            "listing_type",
            "VARCHAR(32) NOT NULL DEFAULT 'sale'",
        )
    }));
    report.push(run_step("listing_type_index", || {
        apply::ensure_index(
            conn,
            "listing_type_index",
            PROPERTIES_TABLE,
            "idx_properties_listing_type",
            &["listing_type"],
        )
    }));
    report.push(run_step("listing_type_defaults", || {
        apply::backfill_listing_type_default(conn)
    }));
    report.push(run_step("price_text_migration", || {
        price::migrate_price_column(conn)
    }));
    report.push(run_step("slug_backfill", || backfill::backfill_slugs(conn)));
    report.push(run_step("property_places_table", || {
        apply::ensure_property_places(conn)
    }));
    report.push(run_step("site_settings_table", || {
        apply::ensure_site_settings(conn)
    }));
    report.push(run_step("site_pages_table", || apply::ensure_site_pages(conn)));

    report
}

fn run_step<F>(name: &str, step: F) -> StepReport
where
    F: FnOnce() -> Result<StepReport, SchemaError>,
{
    match step() {
        Ok(report) => report,
        Err(err) => StepReport::failed(name, err.to_string()),
    }
}
