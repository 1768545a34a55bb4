mod field_path;
mod json;
mod key;
mod object_id;
#[allow(clippy::module_inception)]
mod value;

pub use field_path::FieldPath;
pub use json::from_json;
pub use key::{
    GetKey,
    Key,
};
pub use object_id::{
    ObjectId,
    ObjectIdAllocator,
};
pub use value::{
    compare,
    ComparatorOptions,
    Direction,
    NullsOrder,
    StringSort,
    TotalOrdF64,
    Value,
};
