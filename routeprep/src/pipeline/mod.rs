//! The two-pass driver: filter pass over ways and relations, rewrite pass
//! over the full element stream, temp-file splitting when interpolation
//! reorders nodes before ways, and the final run report.

use std::fs;
use std::path::{Path, PathBuf};

use benchmark_rs::stopwatch::StopWatch;
use kdam::{Bar, BarBuilder, BarExt};
use log::{info, warn};
use osm_io::osm::model::element::Element;
use osm_io::osm::pbf::compression_type::CompressionType;
use osm_io::osm::pbf::file_info::FileInfo;
use osm_io::osm::pbf::reader::Reader;
use osm_io::osm::pbf::writer::Writer;
use regex::{Regex, RegexBuilder};

use routeprep_area::{AreaService, AreaServiceConfig};
use routeprep_elevation::ElevationService;

use crate::config::{AppConfig, SYNTHETIC_NODE_ID_START};
use crate::handler::{FirstPassHandler, RewriteHandler, RewriteStats};
use crate::model::{create_location_index, NoElevationSets, TransformError, ValidIdSets};

/// compiles the tag removal pattern. keys match as a whole and
/// case-insensitively, `url` must not strike `curl`.
pub fn build_remove_regex(pattern: &str) -> Result<Regex, TransformError> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .map_err(|e| TransformError::InvalidRemovalPattern(pattern.to_string(), e))
}

/// outcome of a full transformer run.
#[derive(Debug, Default)]
pub struct TransformSummary {
    pub stats: RewriteStats,
    pub valid_nodes: u64,
    pub valid_ways: u64,
    pub valid_relations: u64,
    pub elevation_found_custom: u64,
    pub elevation_found_srtm: u64,
    pub elevation_found_gmted: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

pub fn run(config: &AppConfig) -> Result<TransformSummary, TransformError> {
    let remove_tags = build_remove_regex(&config.remove_tag_regex)?;
    let mut valid_ids = ValidIdSets::default();
    let mut no_elevation = NoElevationSets::default();
    let max_node_ref = first_pass(config, &remove_tags, &mut valid_ids, &mut no_elevation)?;
    second_pass(config, &remove_tags, &valid_ids, &no_elevation, max_node_ref)
}

/// streaming read of ways and relations, filling the ID sets.
fn first_pass(
    config: &AppConfig,
    remove_tags: &Regex,
    valid_ids: &mut ValidIdSets,
    no_elevation: &mut NoElevationSets,
) -> Result<i64, TransformError> {
    info!("first pass: validating ways and relations");
    let mut stopwatch = StopWatch::new();
    stopwatch.start();

    let reader = open_reader(&config.osm_pbf)?;
    let mut handler = FirstPassHandler::new(remove_tags, valid_ids, no_elevation);
    let mut progress = progress_bar(
        Bar::builder()
            .desc("first pass")
            .unit(" elements")
            .unit_scale(true),
    )?;
    for element in read_elements(&reader, &config.osm_pbf)? {
        match &element {
            Element::Node { node } => handler.node(node),
            Element::Way { way } => handler.way(way),
            Element::Relation { relation } => handler.relation(relation),
            Element::Sentinel => {}
        }
        let _ = progress.update(1);
    }
    eprintln!();
    handler.log_stats();
    info!("first pass finished, time: {stopwatch}");
    Ok(handler.max_node_ref)
}

/// streaming rewrite of the retained elements into the output file.
fn second_pass(
    config: &AppConfig,
    remove_tags: &Regex,
    valid_ids: &ValidIdSets,
    no_elevation: &NoElevationSets,
    max_node_ref: i64,
) -> Result<TransformSummary, TransformError> {
    let mut elevation = ElevationService::new(config.cache_limit);
    if config.add_elevation {
        let mut stopwatch = StopWatch::new();
        stopwatch.start();
        elevation.load(&config.geo_tiff_folders);
        info!("raster index loaded, time: {stopwatch}");
    }

    let mut area = AreaService::new(AreaServiceConfig {
        id_col: config.area_id_col,
        geo_col: config.area_geo_col,
        format: config.area_geo_type,
        has_header: config.area_has_header,
        processed_file_prefix: config.area_processed_prefix.clone(),
    });
    if let Some(mapping) = &config.area_mapping {
        let mut stopwatch = StopWatch::new();
        stopwatch.start();
        area.load(mapping)?;
        info!("area mapping loaded, time: {stopwatch}");
    }

    let mut location_index = create_location_index(&config.index_type)?;

    let output = config.output_path();
    let total_elements =
        valid_ids.nodes.len() + valid_ids.ways.len() + valid_ids.relations.len();

    info!("second pass: rebuilding data");
    let mut stopwatch = StopWatch::new();
    stopwatch.start();

    let reader = open_reader(&config.osm_pbf)?;
    let mut file_info = reader.info().clone();
    file_info.with_writingprogram_str(concat!("routeprep v", env!("CARGO_PKG_VERSION")));

    let next_node_id = SYNTHETIC_NODE_ID_START.max(max_node_ref + 1);
    let mut handler = RewriteHandler::new(
        next_node_id,
        location_index.as_mut(),
        &mut elevation,
        &area,
        remove_tags,
        valid_ids,
        no_elevation,
        config.add_elevation,
        config.interpolate,
        config.interpolate_threshold,
    );

    let mut progress = progress_bar(
        Bar::builder()
            .desc("second pass")
            .total(total_elements as usize),
    )?;

    let stats = if config.interpolate {
        let node_path = config.node_temp_path();
        let way_relation_path = config.way_relation_temp_path();
        let mut node_writer = open_writer(&node_path, file_info.clone())?;
        let mut way_relation_writer = open_writer(&way_relation_path, file_info.clone())?;

        for element in read_elements(&reader, &config.osm_pbf)? {
            let before = handler.stats().processed_elements;
            handler.handle(element);
            drain_buffer(&mut handler.node_buffer, &mut node_writer, &node_path)?;
            drain_buffer(
                &mut handler.buffer,
                &mut way_relation_writer,
                &way_relation_path,
            )?;
            let _ = progress.update((handler.stats().processed_elements - before) as usize);
        }
        close_writer(node_writer, &node_path)?;
        close_writer(way_relation_writer, &way_relation_path)?;

        // all nodes precede all ways and relations in the final file
        let mut writer = open_writer(&output, file_info)?;
        copy_elements(&node_path, &mut writer, &output)?;
        remove_temp_file(&node_path);
        copy_elements(&way_relation_path, &mut writer, &output)?;
        remove_temp_file(&way_relation_path);
        close_writer(writer, &output)?;
        handler.into_stats()
    } else {
        let mut writer = open_writer(&output, file_info)?;
        for element in read_elements(&reader, &config.osm_pbf)? {
            let before = handler.stats().processed_elements;
            handler.handle(element);
            drain_buffer(&mut handler.node_buffer, &mut writer, &output)?;
            drain_buffer(&mut handler.buffer, &mut writer, &output)?;
            let _ = progress.update((handler.stats().processed_elements - before) as usize);
        }
        close_writer(writer, &output)?;
        handler.into_stats()
    };
    eprintln!();
    info!("second pass finished, time: {stopwatch}");

    let summary = TransformSummary {
        stats,
        valid_nodes: valid_ids.nodes.len(),
        valid_ways: valid_ids.ways.len(),
        valid_relations: valid_ids.relations.len(),
        elevation_found_custom: elevation.found_custom,
        elevation_found_srtm: elevation.found_srtm,
        elevation_found_gmted: elevation.found_gmted,
        input_bytes: fs::metadata(&config.osm_pbf).map(|m| m.len()).unwrap_or(0),
        output_bytes: fs::metadata(&output).map(|m| m.len()).unwrap_or(0),
    };
    report(config, &summary);
    Ok(summary)
}

fn open_reader(path: &PathBuf) -> Result<Reader, TransformError> {
    Reader::new(path).map_err(|e| TransformError::PbfReadError {
        path: path.display().to_string(),
        source: e,
    })
}

fn read_elements<'a>(
    reader: &'a Reader,
    path: &Path,
) -> Result<impl Iterator<Item = Element> + 'a, TransformError> {
    reader.elements().map_err(|e| TransformError::PbfReadError {
        path: path.display().to_string(),
        source: e,
    })
}

fn open_writer(path: &Path, file_info: FileInfo) -> Result<Writer, TransformError> {
    let mut writer = Writer::from_file_info(path.to_path_buf(), file_info, CompressionType::Zlib)
        .map_err(|e| TransformError::PbfWriteError {
            path: path.display().to_string(),
            source: e,
        })?;
    writer
        .write_header()
        .map_err(|e| TransformError::PbfWriteError {
            path: path.display().to_string(),
            source: e,
        })?;
    Ok(writer)
}

fn close_writer(mut writer: Writer, path: &Path) -> Result<(), TransformError> {
    writer.close().map_err(|e| TransformError::PbfWriteError {
        path: path.display().to_string(),
        source: e,
    })
}

fn drain_buffer(
    buffer: &mut Vec<Element>,
    writer: &mut Writer,
    path: &Path,
) -> Result<(), TransformError> {
    for element in buffer.drain(..) {
        writer
            .write_element(element)
            .map_err(|e| TransformError::PbfWriteError {
                path: path.display().to_string(),
                source: e,
            })?;
    }
    Ok(())
}

/// sequentially appends every element of a finished temp file.
fn copy_elements(input: &Path, writer: &mut Writer, output: &Path) -> Result<(), TransformError> {
    let input_buf = input.to_path_buf();
    let reader = open_reader(&input_buf)?;
    for element in read_elements(&reader, input)? {
        if matches!(element, Element::Sentinel) {
            continue;
        }
        writer
            .write_element(element)
            .map_err(|e| TransformError::PbfWriteError {
                path: output.display().to_string(),
                source: e,
            })?;
    }
    Ok(())
}

fn remove_temp_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("failed to remove temporary file {}: {e}", path.display());
    }
}

fn progress_bar(builder: BarBuilder) -> Result<Bar, TransformError> {
    builder.build().map_err(TransformError::InternalError)
}

fn report(config: &AppConfig, summary: &TransformSummary) {
    let stats = &summary.stats;
    let reduction = summary.input_bytes.saturating_sub(summary.output_bytes);
    let reduction_percent = if summary.input_bytes > 0 {
        reduction as f64 / summary.input_bytes as f64 * 100.0
    } else {
        0.0
    };
    info!(
        "original: {} b, reduced: {} b, reduction: {reduction} b (= {reduction_percent:.2} %)",
        summary.input_bytes, summary.output_bytes
    );
    info!(
        "nodes with no country: {}, single country: {}, multiple countries: {}",
        stats.nodes_with_no_country,
        stats.nodes_with_single_country,
        stats.nodes_with_multiple_countries
    );

    if config.add_elevation {
        let valid_nodes = summary.valid_nodes;
        let percent = |count: u64| {
            if valid_nodes > 0 {
                count as f64 / valid_nodes as f64 * 100.0
            } else {
                0.0
            }
        };
        info!("nodes: {valid_nodes}");
        if config.interpolate {
            info!(
                "nodes added by interpolation: {}",
                stats.nodes_added_by_interpolation
            );
        }
        info!(
            "elevation found: {:6.2} % ({})",
            percent(stats.nodes_with_elevation),
            stats.nodes_with_elevation
        );
        info!(
            "custom elevation: {:6.2} % ({})",
            percent(summary.elevation_found_custom),
            summary.elevation_found_custom
        );
        info!(
            "srtm elevation: {:6.2} % ({})",
            percent(summary.elevation_found_srtm),
            summary.elevation_found_srtm
        );
        info!(
            "gmted elevation: {:6.2} % ({})",
            percent(summary.elevation_found_gmted),
            summary.elevation_found_gmted
        );
        info!(
            "failed elevation: {:6.2} % ({})",
            percent(stats.nodes_with_elevation_not_found),
            stats.nodes_with_elevation_not_found
        );
        if valid_nodes > stats.nodes_with_elevation + stats.nodes_with_elevation_not_found {
            info!(
                "notice: more nodes were referenced in ways & relations than were found in the \
                 data. this typically happens with extracts where nodes of ways & relations \
                 extending beyond the extent are omitted."
            );
        }
    }
}
