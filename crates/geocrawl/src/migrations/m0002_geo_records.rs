use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_geo_records")
        .depends_on(&["0001_initial_schema"])
        .operation(
            RunSql::new(
                r#"CREATE TABLE IF NOT EXISTS geo_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    external_id TEXT NOT NULL,
    serial TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    category TEXT NOT NULL,
    name TEXT,
    measure REAL,
    attributes TEXT NOT NULL DEFAULT '{}',
    scraper_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(kind, external_id),
    UNIQUE(serial)
)"#,
            )
            .only_for(&["sqlite"]),
        )
        .operation(AddIndex::new(
            "geo_records",
            Index::new("idx_geo_records_position")
                .column("kind")
                .column("latitude")
                .column("longitude"),
        ))
        .operation(AddIndex::new(
            "geo_records",
            Index::new("idx_geo_records_category")
                .column("kind")
                .column("category"),
        ))
}
