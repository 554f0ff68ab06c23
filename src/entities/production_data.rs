//! SeaORM Entity for the replayed production time-series

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::models::production::MappedRecord;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_data")]
pub struct Model {
    /// Wall-clock time the reading is published under
    #[sea_orm(primary_key, auto_increment = false)]
    pub time: DateTimeUtc,
    #[sea_orm(primary_key, auto_increment = false)]
    pub well_name: String,
    /// Source timestamp, kept for resuming the replay
    pub original_time: DateTime,
    pub well_type: Option<String>,
    pub oil_rate: Option<f64>,
    pub gas_rate: Option<f64>,
    pub water_rate: Option<f64>,
    pub water_inj_rate: Option<f64>,
    pub on_stream_hrs: Option<f64>,
    pub downhole_pressure: Option<f64>,
    pub downhole_temperature: Option<f64>,
    pub dp_tubing: Option<f64>,
    pub annulus_pressure: Option<f64>,
    pub choke_size: Option<f64>,
    pub choke_size_uom: Option<String>,
    pub dp_choke_size: Option<f64>,
    pub thp: Option<f64>,
    pub wht: Option<f64>,
    pub flow_kind: Option<String>,
    pub gor: f64,
    pub watercut: f64,
    pub liquid_rate: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&MappedRecord> for ActiveModel {
    fn from(record: &MappedRecord) -> Self {
        let source = &record.source;
        ActiveModel {
            time: Set(record.time),
            well_name: Set(source.well_name.clone()),
            original_time: Set(source.original_time.naive_utc()),
            well_type: Set(source.well_type.clone()),
            oil_rate: Set(source.oil_rate),
            gas_rate: Set(source.gas_rate),
            water_rate: Set(source.water_rate),
            water_inj_rate: Set(source.water_inj_rate),
            on_stream_hrs: Set(source.on_stream_hrs),
            downhole_pressure: Set(source.downhole_pressure),
            downhole_temperature: Set(source.downhole_temperature),
            dp_tubing: Set(source.dp_tubing),
            annulus_pressure: Set(source.annulus_pressure),
            choke_size: Set(source.choke_size),
            choke_size_uom: Set(source.choke_size_uom.clone()),
            dp_choke_size: Set(source.dp_choke_size),
            thp: Set(source.thp),
            wht: Set(source.wht),
            flow_kind: Set(source.flow_kind.clone()),
            gor: Set(record.gor),
            watercut: Set(record.watercut),
            liquid_rate: Set(record.liquid_rate),
        }
    }
}
