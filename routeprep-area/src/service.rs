//! Area mapping loading and point lookup.
//!
//! The mapping is loaded from a semicolon-separated CSV of area codes and
//! polygon geometries. Because grid classification is expensive, the built
//! index is persisted next to the working directory as three processed CSV
//! files and reloaded directly on the next run.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use geo::Intersects;
use geo_types::{Coord, MultiPolygon};
use geojson::GeoJson;
use log::{info, warn};
use serde::Deserialize;
use wkt::{ToWkt, Wkt};

use crate::mapping::{self, AreaIntersect, AreaMapping, AREA_ID_MULTIPLE};
use crate::AreaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFormat {
    Wkt,
    Geojson,
}

impl FromStr for GeometryFormat {
    type Err = AreaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "wkt" => Ok(GeometryFormat::Wkt),
            "geojson" => Ok(GeometryFormat::Geojson),
            other => Err(AreaError::InvalidGeometryType(other.to_string())),
        }
    }
}

/// source CSV schema and processed-file location.
#[derive(Debug, Clone)]
pub struct AreaServiceConfig {
    pub id_col: usize,
    pub geo_col: usize,
    pub format: GeometryFormat,
    pub has_header: bool,
    pub processed_file_prefix: String,
}

impl Default for AreaServiceConfig {
    fn default() -> Self {
        Self {
            id_col: 0,
            geo_col: 1,
            format: GeometryFormat::Wkt,
            has_header: true,
            processed_file_prefix: String::from("mapping_"),
        }
    }
}

/// answers "which areas is this point in" against a loaded [`AreaMapping`].
pub struct AreaService {
    mapping: AreaMapping,
    config: AreaServiceConfig,
    initialized: bool,
}

impl AreaService {
    pub fn new(config: AreaServiceConfig) -> Self {
        Self {
            mapping: AreaMapping::new(),
            config,
            initialized: false,
        }
    }

    /// assembles a service around an already-built mapping.
    pub fn from_mapping(mapping: AreaMapping) -> Self {
        Self {
            mapping,
            config: AreaServiceConfig::default(),
            initialized: true,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// loads the mapping, preferring the processed files when all three are
    /// present. a fresh load from the source CSV persists them afterwards.
    pub fn load(&mut self, path: &Path) -> Result<(), AreaError> {
        info!("loading area mapping");
        let area_path = self.processed_path("area.csv");
        let index_path = self.processed_path("index.csv");
        let id_path = self.processed_path("id.csv");

        if area_path.exists() && index_path.exists() && id_path.exists() {
            self.load_processed(&area_path, &index_path, &id_path);
            info!("loaded previously processed area mapping");
            self.log_summary();
            self.initialized = true;
            return Ok(());
        }

        let valid_rows = self.load_source_csv(path)?;
        self.save_processed(&area_path, &index_path, &id_path);
        self.log_summary();
        if valid_rows > 0 {
            info!("areas indexed: {valid_rows}");
            self.initialized = true;
        }
        Ok(())
    }

    /// area names containing the given WGS84 point, in mapping order. empty
    /// when the service is not initialized or the point misses the grid.
    pub fn get_area(&self, lon: f64, lat: f64) -> Vec<String> {
        let mut areas = Vec::new();
        if !self.initialized {
            return areas;
        }
        let Some(cell) = mapping::cell_id(lon, lat) else {
            return areas;
        };
        match self.mapping.cell_index[cell as usize] {
            0 => {}
            AREA_ID_MULTIPLE => {
                if let Some(overlaps) = self.mapping.cell_overlaps.get_vec(&cell) {
                    let point = Coord { x: lon, y: lat };
                    for overlap in overlaps {
                        if overlap.geometry.intersects(&point) {
                            if let Some(name) = self.mapping.area_names.get(&overlap.id) {
                                areas.push(name.clone());
                            }
                        }
                    }
                }
            }
            id => {
                if let Some(name) = self.mapping.area_names.get(&id) {
                    areas.push(name.clone());
                }
            }
        }
        areas
    }

    fn processed_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{suffix}", self.config.processed_file_prefix))
    }

    /// streams the source CSV. every data row consumes an id so that valid
    /// rows keep their row-derived id no matter how many invalid rows come
    /// before them; ids beyond the u16 space are rejected.
    fn load_source_csv(&mut self, path: &Path) -> Result<u32, AreaError> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("failed to open area mapping file {}: {e}", path.display());
                return Ok(0);
            }
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .quote(b'"')
            .escape(Some(b'\\'))
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut index: u32 = 0;
        if !self.config.has_header {
            index += 1;
        }
        let mut valid_rows = 0;
        for record in reader.records() {
            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    warn!("skipping unreadable area mapping row: {e}");
                    index += 1;
                    continue;
                }
            };
            let columns_needed = self.config.id_col.max(self.config.geo_col) + 1;
            if row.len() < columns_needed {
                warn!("area mapping row with incorrect number of columns");
                index += 1;
                continue;
            }
            let geometry_field = &row[self.config.geo_col];
            if !geometry_field_valid(geometry_field, self.config.format) {
                if index > 0 {
                    warn!("invalid value in geometry column, row {}", index + 1);
                }
                index += 1;
                continue;
            }
            if index == 0 {
                warn!("the area mapping seems to contain data in its header row");
                index += 1;
            }
            if index >= AREA_ID_MULTIPLE as u32 {
                return Err(AreaError::AreaIdOverflow);
            }
            let id = index as u16;
            let name = row[self.config.id_col].to_string();
            match parse_geometry(geometry_field, self.config.format) {
                Ok(geometry) => {
                    valid_rows += 1;
                    self.mapping.add_area(id, &name, &geometry);
                }
                Err(e) => {
                    self.mapping.area_names.insert(id, name);
                    warn!("invalid geometry in area mapping row {}: {e}", index + 1);
                }
            }
            index += 1;
        }
        Ok(valid_rows)
    }

    /// reloads the three processed files. corrupted rows are dropped with a
    /// warning, everything parseable is kept.
    fn load_processed(&mut self, area_path: &Path, index_path: &Path, id_path: &Path) {
        #[derive(Deserialize)]
        struct IdRecord {
            id: u16,
            name: String,
        }
        #[derive(Deserialize)]
        struct IndexRecord {
            cell: usize,
            id: u16,
        }
        #[derive(Deserialize)]
        struct AreaRecord {
            cell: u32,
            id: u16,
            geometry: String,
        }

        for record in read_processed::<IdRecord>(id_path) {
            self.mapping.area_names.insert(record.id, record.name);
        }
        for record in read_processed::<IndexRecord>(index_path) {
            if record.cell < self.mapping.cell_index.len() {
                self.mapping.cell_index[record.cell] = record.id;
            } else {
                warn!("processed area index file names a cell outside the grid");
            }
        }
        for record in read_processed::<AreaRecord>(area_path) {
            match wkt_to_multipolygon(&record.geometry) {
                Ok(geometry) => {
                    self.mapping.cell_overlaps.insert(
                        record.cell,
                        AreaIntersect {
                            id: record.id,
                            geometry,
                        },
                    );
                }
                Err(_) => warn!("processed area mapping file is corrupted"),
            }
        }
    }

    /// persists the processed index. failures only cost the fast path on
    /// the next run, so they degrade to warnings.
    fn save_processed(&self, area_path: &Path, index_path: &Path, id_path: &Path) {
        info!("saving processed area mapping");
        let write = |path: &Path, rows: &mut dyn Iterator<Item = Vec<String>>| {
            let mut writer = match csv::WriterBuilder::new().delimiter(b';').from_path(path) {
                Ok(writer) => writer,
                Err(e) => {
                    warn!("failed to write {}: {e}", path.display());
                    return;
                }
            };
            for row in rows {
                if let Err(e) = writer.write_record(&row) {
                    warn!("failed to write {}: {e}", path.display());
                    return;
                }
            }
            if let Err(e) = writer.flush() {
                warn!("failed to write {}: {e}", path.display());
            }
        };

        write(
            id_path,
            &mut self
                .mapping
                .area_names
                .iter()
                .map(|(id, name)| vec![id.to_string(), name.clone()]),
        );
        write(
            index_path,
            &mut self
                .mapping
                .cell_index
                .iter()
                .enumerate()
                .filter(|(_, id)| **id != 0)
                .map(|(cell, id)| vec![cell.to_string(), id.to_string()]),
        );
        write(
            area_path,
            &mut self.mapping.cell_overlaps.iter().map(|(cell, overlap)| {
                vec![
                    cell.to_string(),
                    overlap.id.to_string(),
                    overlap.geometry.wkt_string(),
                ]
            }),
        );
    }

    fn log_summary(&self) {
        let (empty, single, shared) = self.mapping.occupancy();
        info!(
            "areas: {}, split geometries: {}, grid: [ empty: {empty}, single: {single}, multiple: {shared} ]",
            self.mapping.area_names.len(),
            self.mapping.cell_overlaps.len(),
        );
    }
}

fn read_processed<Record: serde::de::DeserializeOwned>(path: &Path) -> Vec<Record> {
    let mut records = Vec::new();
    let reader = match csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_path(path)
    {
        Ok(reader) => reader,
        Err(e) => {
            warn!("failed to read {}: {e}", path.display());
            return records;
        }
    };
    for record in reader.into_deserialize() {
        match record {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping corrupted row in {}: {e}", path.display()),
        }
    }
    records
}

fn geometry_field_valid(field: &str, format: GeometryFormat) -> bool {
    match format {
        GeometryFormat::Wkt => field.starts_with("MULTIPOLYGON") || field.starts_with("POLYGON"),
        GeometryFormat::Geojson => field.starts_with('{') && field.ends_with('}'),
    }
}

fn parse_geometry(field: &str, format: GeometryFormat) -> Result<MultiPolygon<f64>, AreaError> {
    match format {
        GeometryFormat::Wkt => wkt_to_multipolygon(field),
        GeometryFormat::Geojson => geojson_to_multipolygon(field),
    }
}

/// parses a WKT POLYGON or MULTIPOLYGON into a [`MultiPolygon`].
pub fn wkt_to_multipolygon(field: &str) -> Result<MultiPolygon<f64>, AreaError> {
    let parsed: Wkt<f64> =
        Wkt::from_str(field).map_err(|e| AreaError::GeometryError(e.to_string()))?;
    match parsed.item {
        wkt::Geometry::MultiPolygon(mp) => Ok(mp.into()),
        wkt::Geometry::Polygon(polygon) => {
            let polygon: geo_types::Polygon<f64> = polygon.into();
            Ok(polygon.into())
        }
        _ => Err(AreaError::GeometryError(String::from(
            "expected POLYGON or MULTIPOLYGON",
        ))),
    }
}

fn geojson_to_multipolygon(field: &str) -> Result<MultiPolygon<f64>, AreaError> {
    let parsed: GeoJson = field
        .parse()
        .map_err(|e: geojson::Error| AreaError::GeometryError(e.to_string()))?;
    let geometry = match parsed {
        GeoJson::Geometry(geometry) => geometry,
        GeoJson::Feature(feature) => feature
            .geometry
            .ok_or_else(|| AreaError::GeometryError(String::from("feature without geometry")))?,
        GeoJson::FeatureCollection(_) => {
            return Err(AreaError::GeometryError(String::from(
                "expected a single geometry, found a feature collection",
            )))
        }
    };
    let geometry = geo_types::Geometry::<f64>::try_from(&geometry)
        .map_err(|e| AreaError::GeometryError(e.to_string()))?;
    match geometry {
        geo_types::Geometry::MultiPolygon(mp) => Ok(mp),
        geo_types::Geometry::Polygon(polygon) => Ok(polygon.into()),
        _ => Err(AreaError::GeometryError(String::from(
            "expected a Polygon or MultiPolygon geometry",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn border_areas() -> AreaService {
        let mut mapping = AreaMapping::new();
        mapping.add_area(
            1,
            "SQA",
            &wkt_to_multipolygon("POLYGON((1.5 1.5, 1.5 2.5, 2.5 2.5, 2.5 1.5, 1.5 1.5))")
                .unwrap(),
        );
        mapping.add_area(
            2,
            "REC",
            &wkt_to_multipolygon("MULTIPOLYGON(((2.5 1.5, 2.5 2.5, 4.5 2.5, 4.5 1.5, 2.5 1.5)))")
                .unwrap(),
        );
        mapping.add_area(
            3,
            "TRI",
            &wkt_to_multipolygon("MULTIPOLYGON(((5.5 1.5, 7.5 1.5, 6.5 2.5, 5.5 1.5)))").unwrap(),
        );
        AreaService::from_mapping(mapping)
    }

    #[test]
    fn single_area_points_resolve_to_one_name() {
        let service = border_areas();
        assert_eq!(service.get_area(2.1, 2.1), vec!["SQA"]);
        assert_eq!(service.get_area(3.6, 2.1), vec!["REC"]);
        assert_eq!(service.get_area(6.5, 2.1), vec!["TRI"]);
    }

    #[test]
    fn border_points_resolve_to_all_touching_areas() {
        let service = border_areas();
        let areas = service.get_area(2.5, 2.1);
        assert!(areas.contains(&String::from("SQA")));
        assert!(areas.contains(&String::from("REC")));
    }

    #[test]
    fn points_outside_any_area_resolve_to_nothing() {
        let service = border_areas();
        assert!(service.get_area(1.6, 3.6).is_empty());
        assert!(service.get_area(-100.0, 45.0).is_empty());
    }

    #[test]
    fn out_of_grid_latitudes_resolve_to_nothing() {
        let service = border_areas();
        assert!(service.get_area(0.0, 90.0).is_empty());
        assert!(service.get_area(0.0, -90.5).is_empty());
    }

    #[test]
    fn uninitialized_service_resolves_to_nothing() {
        let service = AreaService::new(AreaServiceConfig::default());
        assert!(service.get_area(2.1, 2.1).is_empty());
    }

    #[test]
    fn geojson_polygons_parse() {
        let polygon = r#"{"type":"Polygon","coordinates":[[[1.0,1.0],[1.0,2.0],[2.0,2.0],[2.0,1.0],[1.0,1.0]]]}"#;
        let mp = geojson_to_multipolygon(polygon).unwrap();
        assert_eq!(mp.0.len(), 1);
        assert!(geojson_to_multipolygon(r#"{"type":"Point","coordinates":[1.0,1.0]}"#).is_err());
    }

    #[test]
    fn source_csv_loads_and_round_trips_through_the_processed_files() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("areas.csv");
        std::fs::write(
            &source,
            "code;geometry\n\
             SQA;\"POLYGON((1.5 1.5, 1.5 2.5, 2.5 2.5, 2.5 1.5, 1.5 1.5))\"\n\
             BAD;\"LINESTRING(0 0, 1 1)\"\n\
             TRI;\"MULTIPOLYGON(((5.5 1.5, 7.5 1.5, 6.5 2.5, 5.5 1.5)))\"\n",
        )
        .unwrap();

        let prefix = dir.path().join("mapping_").display().to_string();
        let config = AreaServiceConfig {
            processed_file_prefix: prefix.clone(),
            ..AreaServiceConfig::default()
        };

        let mut service = AreaService::new(config.clone());
        service.load(&source).unwrap();
        assert!(service.is_initialized());
        assert_eq!(service.get_area(2.1, 2.1), vec!["SQA"]);
        assert_eq!(service.get_area(6.5, 2.1), vec!["TRI"]);

        // invalid rows consume an id so valid rows keep their row number
        assert_eq!(service.mapping.area_names.get(&1).map(String::as_str), Some("SQA"));
        assert_eq!(service.mapping.area_names.get(&3).map(String::as_str), Some("TRI"));
        assert!(!service.mapping.area_names.contains_key(&2));

        for suffix in ["area.csv", "index.csv", "id.csv"] {
            assert!(PathBuf::from(format!("{prefix}{suffix}")).exists());
        }

        // a second service skips the source and loads the processed files
        let mut reloaded = AreaService::new(config);
        reloaded.load(Path::new("does-not-exist.csv")).unwrap();
        assert!(reloaded.is_initialized());
        assert_eq!(reloaded.get_area(2.1, 2.1), vec!["SQA"]);
        assert_eq!(reloaded.get_area(6.5, 2.1), vec!["TRI"]);
        assert!(reloaded.get_area(10.0, 10.0).is_empty());
    }

    #[test]
    fn geojson_source_csvs_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("areas.csv");
        std::fs::write(
            &source,
            concat!(
                "code;geometry\n",
                r#"SQA;"{\"type\": \"Polygon\", \"coordinates\": [[[1.5, 1.5], [1.5, 2.5], [2.5, 2.5], [2.5, 1.5], [1.5, 1.5]]]}""#,
                "\n",
            ),
        )
        .unwrap();

        let config = AreaServiceConfig {
            format: GeometryFormat::Geojson,
            processed_file_prefix: dir.path().join("geo_").display().to_string(),
            ..AreaServiceConfig::default()
        };
        let mut service = AreaService::new(config);
        service.load(&source).unwrap();
        assert!(service.is_initialized());
        assert_eq!(service.get_area(2.1, 2.1), vec!["SQA"]);
    }

    #[test]
    fn geometry_format_names_parse() {
        assert_eq!(GeometryFormat::from_str("wkt").unwrap(), GeometryFormat::Wkt);
        assert_eq!(
            GeometryFormat::from_str("geojson").unwrap(),
            GeometryFormat::Geojson
        );
        assert!(GeometryFormat::from_str("shapefile").is_err());
    }

    #[test]
    fn rows_without_enough_columns_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("areas.csv");
        std::fs::write(
            &source,
            "code;geometry\n\
             ONLYONECOLUMN\n\
             SQA;\"POLYGON((1.5 1.5, 1.5 2.5, 2.5 2.5, 2.5 1.5, 1.5 1.5))\"\n",
        )
        .unwrap();

        let config = AreaServiceConfig {
            processed_file_prefix: dir.path().join("m_").display().to_string(),
            ..AreaServiceConfig::default()
        };
        let mut service = AreaService::new(config);
        service.load(&source).unwrap();
        // the short row consumed id 1, the valid row keeps id 2
        assert_eq!(service.mapping.area_names.get(&2).map(String::as_str), Some("SQA"));
    }
}
