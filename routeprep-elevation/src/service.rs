//! Spatial index over raster tiles plus a byte-budgeted cache of opened
//! rasters, answering point and segment elevation queries in WGS84.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use kdam::{tqdm, BarExt};
use log::{info, warn};
use rstar::{Envelope, Point, PointDistance, RTree, RTreeObject, AABB};

use crate::cache::TileCache;
use crate::tile::RasterTile;
use crate::NODATA;

/// a sampled location along a way segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationElevation {
    pub lon: f64,
    pub lat: f64,
    pub ele: f64,
}

/// one indexed raster tile: its WGS84 bounding box, its resolution-derived
/// priority (smaller is finer) and the file it came from.
#[derive(Clone, Debug)]
pub struct TileEntry {
    min: [f64; 2],
    max: [f64; 2],
    priority: f64,
    filename: String,
}

impl TileEntry {
    pub(crate) fn new(min: [f64; 2], max: [f64; 2], priority: f64, filename: String) -> Self {
        Self {
            min,
            max,
            priority,
            filename,
        }
    }
}

impl RTreeObject for TileEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

impl PointDistance for TileEntry {
    fn distance_2(
        &self,
        point: &<Self::Envelope as Envelope>::Point,
    ) -> <<Self::Envelope as Envelope>::Point as Point>::Scalar {
        self.envelope().distance_2(point)
    }

    fn contains_point(&self, point: &<Self::Envelope as Envelope>::Point) -> bool {
        point[0] >= self.min[0]
            && point[0] <= self.max[0]
            && point[1] >= self.min[1]
            && point[1] <= self.max[1]
    }
}

/// R-tree of tile entries with a least-recently-used cache of opened
/// rasters, bounded by a total file-size budget.
pub struct ElevationService {
    rtree: RTree<TileEntry>,
    cache: TileCache<RasterTile>,
    initialized: bool,
    pub found_custom: u64,
    pub found_srtm: u64,
    pub found_gmted: u64,
}

impl ElevationService {
    pub fn new(cache_limit_bytes: u64) -> Self {
        Self {
            rtree: RTree::new(),
            cache: TileCache::new(cache_limit_bytes),
            initialized: false,
            found_custom: 0,
            found_srtm: 0,
            found_gmted: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn tile_count(&self) -> usize {
        self.rtree.size()
    }

    /// indexes every raster file found under the given paths. a path naming
    /// a regular file is used directly, directories are walked recursively.
    /// individual tiles that cannot be indexed are skipped with a warning.
    pub fn load(&mut self, paths: &[String]) {
        let mut rasters = Vec::new();
        for path in paths {
            collect_rasters(Path::new(path), &mut rasters);
        }
        let mut progress = tqdm!(total = rasters.len(), desc = "indexing raster tiles");
        for raster in &rasters {
            if let Err(e) = self.index_raster(raster) {
                warn!("skipping raster tile: {e}");
            }
            let _ = progress.update(1);
        }
        eprintln!();
        self.initialized = true;
        info!("raster tiles indexed: {}", self.rtree.size());
    }

    /// opens a tile just long enough to compute its WGS84 bounding box and
    /// priority, then indexes it; the handle is dropped again at the end.
    fn index_raster(&mut self, path: &Path) -> Result<(), crate::ElevationError> {
        let tile = RasterTile::open(path)?;
        let (left, top) = tile.top_left_wgs84()?;
        let (right, bottom) = tile.bottom_right_wgs84()?;
        let (lon_step, lat_step) = tile.pixel_steps_degrees()?;
        let priority = lon_step.min(lat_step);
        if !priority.is_finite() || priority <= 0.0 {
            return Err(crate::ElevationError::RasterOpenError(
                path.display().to_string(),
                String::from("degenerate pixel size"),
            ));
        }
        let entry = TileEntry::new(
            [left.min(right), top.min(bottom)],
            [left.max(right), top.max(bottom)],
            priority,
            path.display().to_string(),
        );
        self.rtree.insert(entry);
        Ok(())
    }

    /// elevation at a WGS84 point. of all tiles covering the point the one
    /// with the smallest priority (finest resolution) wins; no covering
    /// tile, an unopenable tile or a nodata pixel yield [`NODATA`]. when
    /// `count` is set, hits are attributed to the srtm/gmted/custom
    /// counters by file name.
    pub fn elevation(&mut self, lon: f64, lat: f64, count: bool) -> f64 {
        let Some(filename) = self.best_tile_at(lon, lat) else {
            return NODATA;
        };
        let ele = match self.load_tiff(&filename) {
            Some(tile) => tile.sample(lon, lat),
            None => NODATA,
        };
        if count && ele != NODATA {
            let name = Path::new(&filename)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with("srtm") {
                self.found_srtm += 1;
            } else if name.contains("gmted") {
                self.found_gmted += 1;
            } else {
                self.found_custom += 1;
            }
        }
        ele
    }

    /// samples the segment from→to at the resolution of the finest tile
    /// intersecting its envelope. the result carries the start point, the
    /// interior samples and a final sample at the exact end point; with no
    /// intersecting tile the result is empty.
    pub fn interpolate(&mut self, from: (f64, f64), to: (f64, f64)) -> Vec<LocationElevation> {
        let envelope = AABB::from_corners(
            [from.0.min(to.0), from.1.min(to.1)],
            [from.0.max(to.0), from.1.max(to.1)],
        );
        let step = self
            .rtree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.priority)
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let Some(step) = step else {
            return Vec::new();
        };

        let delta_x = to.0 - from.0;
        let delta_y = to.1 - from.1;
        let length = (delta_x * delta_x + delta_y * delta_y).sqrt();

        let mut data = Vec::new();
        if length > 0.0 {
            let step_x = delta_x / length * step;
            let step_y = delta_y / length * step;
            // the longitude quotient equals length / step whenever the
            // segment has a longitude extent; for meridional segments it
            // degenerates and the count falls back to the segment length
            let quotient = delta_x / step_x;
            let steps = if quotient.is_finite() {
                quotient as i64
            } else {
                (length / step) as i64
            };
            for s in 0..=steps {
                let lon = from.0 + step_x * s as f64;
                let lat = from.1 + step_y * s as f64;
                let ele = self.elevation(lon, lat, false);
                data.push(LocationElevation { lon, lat, ele });
            }
        }
        let ele = self.elevation(to.0, to.1, false);
        data.push(LocationElevation {
            lon: to.0,
            lat: to.1,
            ele,
        });
        data
    }

    /// all tiles covering the point, finest resolution first.
    fn tiles_at(&self, lon: f64, lat: f64) -> Vec<(f64, String)> {
        self.rtree
            .locate_all_at_point(&[lon, lat])
            .map(|entry| (entry.priority, entry.filename.clone()))
            .sorted_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
            .collect()
    }

    fn best_tile_at(&self, lon: f64, lat: f64) -> Option<String> {
        self.tiles_at(lon, lat).into_iter().next().map(|(_, f)| f)
    }

    /// fetches an opened raster from the cache, opening and inserting it
    /// when absent. insertion evicts least-recently-used tiles until the
    /// byte budget holds the new file.
    fn load_tiff(&mut self, filename: &str) -> Option<&mut RasterTile> {
        if self.cache.size_of(filename).is_none() {
            let size = fs::metadata(filename).ok()?.len();
            self.cache.record_size(filename, size);
        }
        if self.cache.contains(filename) {
            return self.cache.get(filename);
        }

        let tile = match RasterTile::open(Path::new(filename)) {
            Ok(tile) => tile,
            Err(e) => {
                warn!("failed to open raster tile: {e}");
                return None;
            }
        };
        self.cache.insert(filename, tile);
        self.cache.get(filename)
    }

    #[cfg(test)]
    fn insert_entry(&mut self, entry: TileEntry) {
        self.rtree.insert(entry);
        self.initialized = true;
    }
}

/// recursively collects raster files. a regular file is taken as-is, in
/// directories only `.tif`, `.tiff` and `.gtiff` files count
/// (case-insensitive). unreadable directories are skipped with a warning.
fn collect_rasters(path: &Path, rasters: &mut Vec<PathBuf>) {
    if path.is_file() {
        rasters.push(path.to_path_buf());
        return;
    }
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "failed to read raster tiles from {}: {e}. this might lead to a lesser \
                 success rate when determining location elevations.",
                path.display()
            );
            return;
        }
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_dir() {
            collect_rasters(&entry_path, rasters);
        } else if has_raster_extension(&entry_path) {
            rasters.push(entry_path);
        }
    }
}

fn has_raster_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_ascii_lowercase();
            extension == "tif" || extension == "tiff" || extension == "gtiff"
        })
        .unwrap_or(false)
}
