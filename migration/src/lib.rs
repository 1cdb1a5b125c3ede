pub use sea_orm_migration::prelude::*;

pub mod entities;
mod m20251001_000001_partners;
mod m20251001_000002_postback_queue;
mod m20251001_000003_stats;
mod m20251001_000004_settings;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251001_000001_partners::Migration),
            Box::new(m20251001_000002_postback_queue::Migration),
            Box::new(m20251001_000003_stats::Migration),
            Box::new(m20251001_000004_settings::Migration),
        ]
    }
}
