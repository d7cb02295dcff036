use thiserror::Error;

#[derive(Error, Debug)]
pub enum AreaError {
    #[error("failure reading area mapping {0}: {1}")]
    IoError(String, std::io::Error),
    #[error("failure parsing area mapping: {0}")]
    CsvError(#[from] csv::Error),
    #[error("unsupported geometry: {0}")]
    GeometryError(String),
    #[error("area mapping holds more areas than the id space allows")]
    AreaIdOverflow,
    #[error("invalid geometry type '{0}' (expected 'wkt' or 'geojson')")]
    InvalidGeometryType(String),
}
