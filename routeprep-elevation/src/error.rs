use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElevationError {
    #[error("failure opening raster tile {0}: {1}")]
    RasterOpenError(String, String),
    #[error("raster tile {0} carries no image data")]
    EmptyRaster(String),
    #[error("raster tile {0} carries an unsupported spatial reference '{1}'")]
    UnknownSrs(String, String),
    #[error("failure transforming coordinates: {0}")]
    ProjectionError(#[from] proj4rs::errors::Error),
    #[error("failure reading {0}: {1}")]
    IoError(String, std::io::Error),
}
