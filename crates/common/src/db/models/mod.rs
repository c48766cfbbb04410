//! SeaORM entity models

mod float;

pub use float::{
    ActiveModel as FloatActiveModel,
    Column as FloatColumn,
    Entity as FloatEntity,
    Model as FloatModel,
};
