pub mod cache;
mod error;
pub mod service;
pub mod srs;
pub mod tile;

pub use error::ElevationError;
pub use service::{ElevationService, LocationElevation};
pub use tile::RasterTile;

/// sentinel for "elevation unknown", shared by the rasters and the whole
/// pipeline. matches the nodata convention of the SRTM/GMTED tile sets.
pub const NODATA: f64 = -32768.0;
