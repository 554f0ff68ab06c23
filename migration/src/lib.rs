pub use sea_orm_migration::prelude::*;

mod m20260201_000001_create_production_data;
mod m20260201_000002_create_latest_production_view;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260201_000001_create_production_data::Migration),
            Box::new(m20260201_000002_create_latest_production_view::Migration),
        ]
    }
}
