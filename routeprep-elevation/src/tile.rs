//! A single opened GeoTIFF raster tile.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use georaster::geotiff::{GeoTiffReader, RasterValue};
use log::debug;
use proj4rs::Proj;

use crate::{srs, ElevationError, NODATA};

/// wraps one opened GeoTIFF: the WGS84↔tile coordinate transformation is
/// prepared once at open time, pixel access goes through the affine geo
/// transform (north-up, no rotation terms).
pub struct RasterTile {
    proj_wgs84: Proj,
    proj_tile: Proj,
    top_left_x: f64,
    top_left_y: f64,
    pixel_width: f64,
    pixel_height: f64,
    width: u32,
    height: u32,
    reader: GeoTiffReader<BufReader<File>>,
}

impl RasterTile {
    pub fn open(path: &Path) -> Result<Self, ElevationError> {
        let name = path.display().to_string();
        let file =
            File::open(path).map_err(|e| ElevationError::IoError(name.clone(), e))?;
        let reader = GeoTiffReader::open(BufReader::new(file))
            .map_err(|e| ElevationError::RasterOpenError(name.clone(), e.to_string()))?;

        let origin = reader
            .origin()
            .ok_or_else(|| ElevationError::EmptyRaster(name.clone()))?;
        let pixel_size = reader
            .pixel_size()
            .ok_or_else(|| ElevationError::EmptyRaster(name.clone()))?;
        let (width, height) = reader
            .images()
            .first()
            .and_then(|image| image.dimensions)
            .ok_or_else(|| ElevationError::EmptyRaster(name.clone()))?;

        let geo_params = reader.geo_params.clone().unwrap_or_default();
        let epsg = srs::resolve_epsg(&geo_params).ok_or_else(|| {
            let description = geo_params.split('|').next().unwrap_or_default().to_string();
            ElevationError::UnknownSrs(name.clone(), description)
        })?;
        let proj_wgs84 = Proj::from_epsg_code(4326)?;
        let proj_tile = Proj::from_epsg_code(epsg)?;

        debug!("opened raster tile {name} ({width} x {height}, EPSG:{epsg})");
        Ok(Self {
            proj_wgs84,
            proj_tile,
            top_left_x: origin[0],
            top_left_y: origin[1],
            pixel_width: pixel_size[0],
            pixel_height: pixel_size[1],
            width,
            height,
            reader,
        })
    }

    /// samples the elevation at a WGS84 coordinate. returns [`NODATA`] for
    /// points outside the raster, unreadable pixels and nodata pixels.
    pub fn sample(&mut self, lon: f64, lat: f64) -> f64 {
        let (tile_x, tile_y) = match transform(&self.proj_wgs84, &self.proj_tile, lon, lat) {
            Ok(coordinate) => coordinate,
            Err(_) => return NODATA,
        };
        let x = ((tile_x - self.top_left_x) / self.pixel_width).floor() as i64;
        let y = ((tile_y - self.top_left_y) / self.pixel_height).floor() as i64;
        let Some((x, y)) = resolve_pixel(x, y, self.width, self.height) else {
            return NODATA;
        };
        match as_elevation(self.reader.read_pixel(x, y)) {
            Some(value) if value > NODATA => value,
            _ => NODATA,
        }
    }

    /// top-left corner of the raster in WGS84 (lon, lat).
    pub fn top_left_wgs84(&self) -> Result<(f64, f64), ElevationError> {
        let point = transform(
            &self.proj_tile,
            &self.proj_wgs84,
            self.top_left_x,
            self.top_left_y,
        )?;
        Ok(point)
    }

    /// bottom-right corner of the raster in WGS84 (lon, lat).
    pub fn bottom_right_wgs84(&self) -> Result<(f64, f64), ElevationError> {
        let tile_x = self.top_left_x + self.pixel_width * self.width as f64;
        let tile_y = self.top_left_y + self.pixel_height * self.height as f64;
        let point = transform(&self.proj_tile, &self.proj_wgs84, tile_x, tile_y)?;
        Ok(point)
    }

    /// absolute pixel step in degrees along lon and lat, derived from the
    /// transformed corners.
    pub fn pixel_steps_degrees(&self) -> Result<(f64, f64), ElevationError> {
        let (left, top) = self.top_left_wgs84()?;
        let (right, bottom) = self.bottom_right_wgs84()?;
        let lon_step = ((right - left) / self.width as f64).abs();
        let lat_step = ((top - bottom) / self.height as f64).abs();
        Ok((lon_step, lat_step))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// projects a single point, converting between degrees and radians around
/// geographic reference systems the way proj4rs expects.
pub(crate) fn transform(
    src: &Proj,
    dst: &Proj,
    x: f64,
    y: f64,
) -> Result<(f64, f64), proj4rs::errors::Error> {
    let mut point = (x, y, 0.0);
    if src.is_latlong() {
        point.0 = point.0.to_radians();
        point.1 = point.1.to_radians();
    }
    proj4rs::transform::transform(src, dst, &mut point)?;
    if dst.is_latlong() {
        point.0 = point.0.to_degrees();
        point.1 = point.1.to_degrees();
    }
    Ok((point.0, point.1))
}

/// tiles are not cut along full degree lines, so coordinates right at the
/// border can land one pixel off the raster. the reject interval is widened
/// by one pixel on each side, accepted coordinates clamp onto the border
/// pixel.
fn resolve_pixel(x: i64, y: i64, width: u32, height: u32) -> Option<(u32, u32)> {
    if x < -1 || y < -1 || x > width as i64 || y > height as i64 {
        return None;
    }
    let x = x.clamp(0, width as i64 - 1) as u32;
    let y = y.clamp(0, height as i64 - 1) as u32;
    Some((x, y))
}

/// band-1 raster values as elevation in meters; color and missing values
/// carry no elevation.
fn as_elevation(value: RasterValue) -> Option<f64> {
    match value {
        RasterValue::U8(v) => Some(v as f64),
        RasterValue::U16(v) => Some(v as f64),
        RasterValue::U32(v) => Some(v as f64),
        RasterValue::U64(v) => Some(v as f64),
        RasterValue::I8(v) => Some(v as f64),
        RasterValue::I16(v) => Some(v as f64),
        RasterValue::I32(v) => Some(v as f64),
        RasterValue::I64(v) => Some(v as f64),
        RasterValue::F32(v) => Some(v as f64),
        RasterValue::F64(v) => Some(v),
        _ => None,
    }
}
