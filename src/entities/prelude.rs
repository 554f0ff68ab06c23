pub use super::production_data::Entity as ProductionData;
