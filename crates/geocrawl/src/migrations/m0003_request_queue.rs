use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_request_queue")
        .depends_on(&["0001_initial_schema"])
        .operation(
            RunSql::new(
                r#"CREATE TABLE IF NOT EXISTS crawl_requests_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scraper_type TEXT NOT NULL,
    scope TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    requested_at TEXT NOT NULL,
    started_at TEXT
)"#,
            )
            .only_for(&["sqlite"]),
        )
        .operation(AddIndex::new(
            "crawl_requests_queue",
            Index::new("idx_request_queue_pending")
                .column("scraper_type")
                .column("id")
                .filter("status = 'pending'"),
        ))
}
