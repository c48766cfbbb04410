//! Float entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::FloatRecord;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "floats")]
pub struct Model {
    /// ARGO float id
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub record_id: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub platform_number: Option<String>,

    pub deploy_date: Option<Date>,

    #[sea_orm(column_type = "Text", nullable)]
    pub region: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,

    #[sea_orm(column_type = "Double", nullable)]
    pub lat: Option<f64>,

    #[sea_orm(column_type = "Double", nullable)]
    pub lon: Option<f64>,

    /// Fields outside the fixed schema as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub properties: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for FloatRecord {
    fn from(model: Model) -> Self {
        let properties = match model.properties {
            Json::Object(map) => map,
            _ => Default::default(),
        };
        FloatRecord {
            record_id: model.record_id,
            platform_number: model.platform_number,
            deploy_date: model.deploy_date,
            region: model.region,
            description: model.description,
            notes: model.notes,
            lat: model.lat,
            lon: model.lon,
            properties,
        }
    }
}
