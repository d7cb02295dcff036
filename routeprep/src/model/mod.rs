mod error;
pub mod id_set;
pub mod location_index;

pub use error::TransformError;
pub use id_set::{IdSetDense, IdSetSmall, NoElevationSets, ValidIdSets};
pub use location_index::{create_location_index, LocationIndex};
