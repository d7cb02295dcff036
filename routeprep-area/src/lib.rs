mod error;
pub mod mapping;
pub mod service;

pub use error::AreaError;
pub use mapping::{AreaId, AreaMapping, AREA_ID_MULTIPLE};
pub use service::{AreaService, AreaServiceConfig, GeometryFormat};
