//! Command line and configuration file handling.
//!
//! Every option can come from the command line or from a TOML
//! configuration file; explicit command-line values win over the file,
//! the file wins over the built-in defaults.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Parser};
use log::warn;
use serde::Deserialize;

use crate::model::TransformError;
use routeprep_area::GeometryFormat;

pub const DEFAULT_REMOVE_TAGS: &str =
    "(.*:)?source(:.*)?|(.*:)?note(:.*)?|url|created_by|fixme|wikipedia";
pub const DEFAULT_CACHE_LIMIT: u64 = 1_073_741_824;
pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_INDEX_TYPE: &str = "flex_mem";
pub const DEFAULT_GEO_TIFF_FOLDERS: [&str; 3] = ["tiffs", "srtmdata", "gmteddata"];

/// first id handed to synthetic interpolation nodes; raised above the
/// observed max input id when an extract already exceeds it.
pub const SYNTHETIC_NODE_ID_START: i64 = 1_000_000_000;

#[derive(Parser, Debug, Default)]
#[command(
    name = "routeprep",
    version,
    about = "Preprocesses OSM extracts for routing graph builders",
    disable_version_flag = true
)]
pub struct CliOptions {
    /// path to the OSM PBF file to process
    #[arg(short = 'p', long = "osm_pbf")]
    pub osm_pbf: Option<PathBuf>,

    /// skip elevation data merge
    #[arg(short = 'e', long = "skip_elevation")]
    pub skip_elevation: bool,

    /// fetch SRTM tiles and exit
    #[arg(long)]
    pub srtm: bool,

    /// fetch GMTED tiles and exit
    #[arg(long)]
    pub gmted: bool,

    /// interpolate intermediate nodes
    #[arg(short = 'i', long)]
    pub interpolate: bool,

    /// regex matching removable tag keys
    #[arg(short = 'T', long = "remove_tag")]
    pub remove_tag: Option<String>,

    /// paths to GeoTIFF folders
    #[arg(short = 'F', long = "geo_tiff_folders", num_args = 1..)]
    pub geo_tiff_folders: Option<Vec<String>>,

    /// maximum memory used to store raster tiles in cache, in bytes
    #[arg(short = 'S', long = "cache_limit")]
    pub cache_limit: Option<u64>,

    /// elevation threshold for interpolation, in metres
    #[arg(short = 't', long)]
    pub threshold: Option<f64>,

    /// path to the area mapping file to use
    #[arg(short = 'a', long = "area_mapping")]
    pub area_mapping: Option<PathBuf>,

    /// column number (zero-based) of the area id in the mapping file
    #[arg(long)]
    pub area_mapping_id_col: Option<usize>,

    /// column number (zero-based) of the area geometry in the mapping file
    #[arg(long)]
    pub area_mapping_geo_col: Option<usize>,

    /// geometry type in the mapping file: 'wkt' or 'geojson'
    #[arg(long)]
    pub area_mapping_geo_type: Option<String>,

    /// the area mapping file has a header row
    #[arg(long)]
    pub area_mapping_has_header: Option<bool>,

    /// file prefix for the processed mapping files
    #[arg(long)]
    pub area_mapping_processed_file_prefix: Option<String>,

    /// path to a TOML configuration file with these options
    #[arg(short = 'f', long = "config_file")]
    pub config_file: Option<PathBuf>,

    /// node location index backend
    #[arg(long)]
    pub index_type: Option<String>,

    /// verbose diagnostics
    #[arg(short = 'd', long = "debug_mode")]
    pub debug_mode: bool,

    /// print version information
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
}

/// configuration file counterpart of [`CliOptions`].
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub osm_pbf: Option<PathBuf>,
    pub skip_elevation: Option<bool>,
    pub interpolate: Option<bool>,
    pub remove_tag: Option<String>,
    pub geo_tiff_folders: Option<Vec<String>>,
    pub cache_limit: Option<u64>,
    pub threshold: Option<f64>,
    pub area_mapping: Option<PathBuf>,
    pub area_mapping_id_col: Option<usize>,
    pub area_mapping_geo_col: Option<usize>,
    pub area_mapping_geo_type: Option<String>,
    pub area_mapping_has_header: Option<bool>,
    pub area_mapping_processed_file_prefix: Option<String>,
    pub index_type: Option<String>,
    pub debug_mode: Option<bool>,
}

impl FileConfig {
    pub fn from_path(path: &PathBuf) -> Result<Self, TransformError> {
        if !path.exists() {
            warn!("configuration file {} does not exist", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransformError::ConfigurationError(format!(
                "failure reading {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|e| {
            TransformError::ConfigurationError(format!(
                "failure decoding {}: {e}",
                path.display()
            ))
        })
    }
}

/// fully resolved run configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub osm_pbf: PathBuf,
    pub add_elevation: bool,
    pub interpolate: bool,
    pub remove_tag_regex: String,
    pub geo_tiff_folders: Vec<String>,
    pub cache_limit: u64,
    pub interpolate_threshold: f64,
    pub area_mapping: Option<PathBuf>,
    pub area_id_col: usize,
    pub area_geo_col: usize,
    pub area_geo_type: GeometryFormat,
    pub area_has_header: bool,
    pub area_processed_prefix: String,
    pub index_type: String,
    pub debug_mode: bool,
}

impl AppConfig {
    pub fn resolve(cli: CliOptions) -> Result<Self, TransformError> {
        let file = match &cli.config_file {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };

        let osm_pbf = cli
            .osm_pbf
            .or(file.osm_pbf)
            .ok_or_else(|| TransformError::ConfigurationError(String::from("no input file")))?;
        if !osm_pbf.exists() {
            return Err(TransformError::ConfigurationError(format!(
                "osm_pbf does not exist: {}",
                osm_pbf.display()
            )));
        }

        let area_geo_type = cli
            .area_mapping_geo_type
            .or(file.area_mapping_geo_type)
            .map(|value| {
                GeometryFormat::from_str(&value)
                    .map_err(|e| TransformError::ConfigurationError(e.to_string()))
            })
            .transpose()?
            .unwrap_or(GeometryFormat::Wkt);

        Ok(Self {
            osm_pbf,
            add_elevation: !(cli.skip_elevation || file.skip_elevation.unwrap_or(false)),
            interpolate: cli.interpolate || file.interpolate.unwrap_or(false),
            remove_tag_regex: cli
                .remove_tag
                .or(file.remove_tag)
                .unwrap_or_else(|| DEFAULT_REMOVE_TAGS.to_string()),
            geo_tiff_folders: cli.geo_tiff_folders.or(file.geo_tiff_folders).unwrap_or_else(
                || {
                    DEFAULT_GEO_TIFF_FOLDERS
                        .iter()
                        .map(|folder| folder.to_string())
                        .collect()
                },
            ),
            cache_limit: cli
                .cache_limit
                .or(file.cache_limit)
                .unwrap_or(DEFAULT_CACHE_LIMIT),
            interpolate_threshold: cli
                .threshold
                .or(file.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            area_mapping: cli.area_mapping.or(file.area_mapping),
            area_id_col: cli
                .area_mapping_id_col
                .or(file.area_mapping_id_col)
                .unwrap_or(0),
            area_geo_col: cli
                .area_mapping_geo_col
                .or(file.area_mapping_geo_col)
                .unwrap_or(1),
            area_geo_type,
            area_has_header: cli
                .area_mapping_has_header
                .or(file.area_mapping_has_header)
                .unwrap_or(true),
            area_processed_prefix: cli
                .area_mapping_processed_file_prefix
                .or(file.area_mapping_processed_file_prefix)
                .unwrap_or_else(|| String::from("mapping_")),
            index_type: cli
                .index_type
                .or(file.index_type)
                .unwrap_or_else(|| DEFAULT_INDEX_TYPE.to_string()),
            debug_mode: cli.debug_mode || file.debug_mode.unwrap_or(false),
        })
    }

    /// output path next to the input: `<stem>.ors.pbf`.
    pub fn output_path(&self) -> PathBuf {
        self.with_output_extension("ors.pbf")
    }

    /// temporary node stream written while interpolating.
    pub fn node_temp_path(&self) -> PathBuf {
        self.with_output_extension("ors.n.pbf")
    }

    /// temporary way/relation stream written while interpolating.
    pub fn way_relation_temp_path(&self) -> PathBuf {
        self.with_output_extension("ors.wr.pbf")
    }

    fn with_output_extension(&self, extension: &str) -> PathBuf {
        let stem = self
            .osm_pbf
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        // `karlsruhe.osm.pbf` becomes `karlsruhe.ors.pbf`, not `karlsruhe.osm.ors.pbf`
        let stem = match stem.split_once('.') {
            Some((prefix, _)) => prefix.to_string(),
            None => stem,
        };
        self.osm_pbf.with_file_name(format!("{stem}.{extension}"))
    }
}
