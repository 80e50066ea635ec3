mod m0001_initial;
mod m0002_geo_records;
mod m0003_request_queue;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_initial::migration());
    reg.register(m0002_geo_records::migration());
    reg.register(m0003_request_queue::migration());
    reg
}
