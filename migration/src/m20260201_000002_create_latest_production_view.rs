use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Newest row per well, refreshed by the streamer after every write
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE MATERIALIZED VIEW IF NOT EXISTS latest_production AS
                SELECT DISTINCT ON (well_name)
                    time,
                    original_time,
                    well_name,
                    well_type,
                    oil_rate,
                    gas_rate,
                    water_rate,
                    water_inj_rate,
                    on_stream_hrs,
                    downhole_pressure,
                    downhole_temperature,
                    dp_tubing,
                    annulus_pressure,
                    choke_size,
                    choke_size_uom,
                    dp_choke_size,
                    thp,
                    wht,
                    flow_kind,
                    gor,
                    watercut,
                    liquid_rate
                FROM production_data
                ORDER BY well_name, time DESC;
                "#,
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_latest_production_well_name \
                 ON latest_production (well_name)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP MATERIALIZED VIEW IF EXISTS latest_production")
            .await?;

        Ok(())
    }
}
