use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        // scraper_status - one row per worker type
        .operation(
            CreateTable::new("scraper_status")
                .add_field(Field::new("scraper_type", FieldType::Text).primary_key())
                .add_field(Field::new("state", FieldType::Text).not_null().default("'idle'"))
                .add_field(Field::new("enabled", FieldType::Integer).not_null().default("1"))
                .add_field(Field::new("auto_paused", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("current_activity", FieldType::Text))
                .add_field(Field::new("activity_detail", FieldType::Text))
                .add_field(Field::new("config", FieldType::Text).not_null().default("'{}'"))
                .add_field(Field::new("run_id", FieldType::Integer))
                .add_field(Field::new("current_cell", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("total_cells", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("items_found", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("items_saved", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("items_updated", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("items_rejected", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("session_errors", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("consecutive_errors", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("rate_limit_hits", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("cooldown_until", FieldType::Text))
                .add_field(Field::new("last_activity", FieldType::Text))
                .add_field(Field::new("last_started_at", FieldType::Text))
                .add_field(Field::new("last_completed_at", FieldType::Text))
                .add_field(Field::new("last_error", FieldType::Text))
                .add_field(Field::new("last_error_at", FieldType::Text))
                .add_field(Field::new("total_runs", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("successful_runs", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("lifetime_items_saved", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("restart_count", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("last_restart_at", FieldType::Text))
                .add_field(Field::new("host", FieldType::Text))
                .add_field(Field::new("updated_at", FieldType::Text).not_null()),
        )
        // crawl_runs - resumable checkpoints
        .operation(
            RunSql::new(
                r#"CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scraper_type TEXT NOT NULL,
    kind TEXT NOT NULL,
    categories TEXT NOT NULL DEFAULT '[]',
    states TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'created',
    current_cell INTEGER NOT NULL DEFAULT 0,
    total_cells INTEGER NOT NULL DEFAULT 0,
    items_found INTEGER NOT NULL DEFAULT 0,
    items_saved INTEGER NOT NULL DEFAULT 0,
    items_updated INTEGER NOT NULL DEFAULT 0,
    items_rejected INTEGER NOT NULL DEFAULT 0,
    errors INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    finished_at TEXT,
    last_error TEXT,
    last_error_at TEXT
)"#,
            )
            .only_for(&["sqlite"]),
        )
        .operation(AddIndex::new(
            "crawl_runs",
            Index::new("idx_crawl_runs_scraper_status")
                .column("scraper_type")
                .column("status"),
        ))
        .operation(AddIndex::new(
            "crawl_runs",
            Index::new("idx_crawl_runs_started").column_desc("started_at"),
        ))
}
