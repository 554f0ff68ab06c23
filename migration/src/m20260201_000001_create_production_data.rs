use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per well per mapped hour; the primary key doubles as the
        // conflict target for replayed windows.
        manager
            .create_table(
                Table::create()
                    .table(ProductionData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductionData::Time)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionData::OriginalTime)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductionData::WellName)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProductionData::WellType).string_len(10).null())
                    .col(ColumnDef::new(ProductionData::OilRate).double().null())
                    .col(ColumnDef::new(ProductionData::GasRate).double().null())
                    .col(ColumnDef::new(ProductionData::WaterRate).double().null())
                    .col(ColumnDef::new(ProductionData::WaterInjRate).double().null())
                    .col(ColumnDef::new(ProductionData::OnStreamHrs).double().null())
                    .col(ColumnDef::new(ProductionData::DownholePressure).double().null())
                    .col(ColumnDef::new(ProductionData::DownholeTemperature).double().null())
                    .col(ColumnDef::new(ProductionData::DpTubing).double().null())
                    .col(ColumnDef::new(ProductionData::AnnulusPressure).double().null())
                    .col(ColumnDef::new(ProductionData::ChokeSize).double().null())
                    .col(ColumnDef::new(ProductionData::ChokeSizeUom).string_len(10).null())
                    .col(ColumnDef::new(ProductionData::DpChokeSize).double().null())
                    .col(ColumnDef::new(ProductionData::Thp).double().null())
                    .col(ColumnDef::new(ProductionData::Wht).double().null())
                    .col(ColumnDef::new(ProductionData::FlowKind).string_len(20).null())
                    .col(
                        ColumnDef::new(ProductionData::Gor)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(ProductionData::Watercut)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(ProductionData::LiquidRate).double().null())
                    .primary_key(
                        Index::create()
                            .name("pk_production_data")
                            .col(ProductionData::Time)
                            .col(ProductionData::WellName),
                    )
                    .to_owned(),
            )
            .await?;

        // Per-well history lookups: (well_name, time DESC)
        manager
            .create_index(
                Index::create()
                    .name("idx_production_data_well_time")
                    .table(ProductionData::Table)
                    .col(ProductionData::WellName)
                    .col((ProductionData::Time, IndexOrder::Desc))
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Resume queries read MAX(original_time)
        manager
            .create_index(
                Index::create()
                    .name("idx_production_data_original_time")
                    .table(ProductionData::Table)
                    .col(ProductionData::OriginalTime)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Hypertable only when the TimescaleDB extension is installed; plain
        // Postgres keeps a regular table.
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DO $$
                BEGIN
                    IF EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'timescaledb') THEN
                        PERFORM create_hypertable('production_data', 'time', if_not_exists => TRUE, migrate_data => TRUE);
                    END IF;
                END
                $$;
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProductionData::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ProductionData {
    Table,
    Time,
    OriginalTime,
    WellName,
    WellType,
    OilRate,
    GasRate,
    WaterRate,
    WaterInjRate,
    OnStreamHrs,
    DownholePressure,
    DownholeTemperature,
    DpTubing,
    AnnulusPressure,
    ChokeSize,
    ChokeSizeUom,
    DpChokeSize,
    Thp,
    Wht,
    FlowKind,
    Gor,
    Watercut,
    LiquidRate,
}
