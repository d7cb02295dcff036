//! Bulk download of SRTM/GMTED elevation tiles from bundled CSV lists.
//!
//! The list `tiles_<kind>.csv` holds `filename,url` rows. Files already on
//! disk are kept, so an interrupted download run can simply be restarted.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::model::TransformError;

/// fetches every tile of the given kind (`srtm` or `gmted`) into
/// `<kind>data/`. SRTM tiles arrive zipped and are unpacked in place.
pub fn download_tiles(kind: &str) -> Result<(), TransformError> {
    let outdir = PathBuf::from(format!("{kind}data"));
    fs::create_dir_all(&outdir).map_err(|e| {
        TransformError::DownloadError(format!("cannot create tile data folder: {e}"))
    })?;

    let list = PathBuf::from(format!("tiles_{kind}.csv"));
    let instructions = read_tile_list(&list)?;

    let mut requested = 0u32;
    let mut present = 0u32;
    let mut loaded = 0u32;
    for (filename, url) in &instructions {
        requested += 1;
        let outfile = outdir.join(filename);
        if outfile.exists() {
            present += 1;
            continue;
        }
        match fetch_tile(kind, filename, url, &outfile) {
            Ok(()) => loaded += 1,
            Err(e) => error!("downloading {url} failed: {e}"),
        }
    }
    info!("requested {requested} tiles: {present} already present, {loaded} downloaded");
    Ok(())
}

/// reads a `filename,url` download list, skipping malformed rows.
fn read_tile_list(path: &Path) -> Result<Vec<(String, String)>, TransformError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            TransformError::DownloadError(format!("cannot read {}: {e}", path.display()))
        })?;
    let mut instructions = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("invalid download instruction: {e}");
                continue;
            }
        };
        let filename = record.get(0).unwrap_or_default();
        let url = record.get(1).unwrap_or_default();
        if filename.is_empty() || url.is_empty() {
            warn!("invalid download instruction: '{filename}' - '{url}'");
            continue;
        }
        instructions.push((filename.to_string(), url.to_string()));
    }
    Ok(instructions)
}

fn fetch_tile(
    kind: &str,
    filename: &str,
    url: &str,
    outfile: &Path,
) -> Result<(), TransformError> {
    info!("downloading {url}");
    let mut response = reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .map_err(|e| TransformError::DownloadError(e.to_string()))?;

    if kind == "srtm" {
        let zip_path = outfile.with_extension("zip");
        write_response(&mut response, &zip_path)?;
        let result = unpack_tile(&zip_path, filename, outfile);
        if let Err(e) = fs::remove_file(&zip_path) {
            warn!("failed to remove {}: {e}", zip_path.display());
        }
        result
    } else {
        write_response(&mut response, outfile)
    }
}

fn write_response(
    response: &mut reqwest::blocking::Response,
    path: &Path,
) -> Result<(), TransformError> {
    let mut file = File::create(path).map_err(|e| TransformError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;
    io::copy(response, &mut file).map_err(|e| TransformError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

/// extracts the named raster from a downloaded SRTM archive.
fn unpack_tile(zip_path: &Path, filename: &str, outfile: &Path) -> Result<(), TransformError> {
    info!("unpacking {}", zip_path.display());
    let archive_file = File::open(zip_path).map_err(|e| TransformError::IoError {
        path: zip_path.display().to_string(),
        source: e,
    })?;
    let mut archive = zip::ZipArchive::new(archive_file)
        .map_err(|e| TransformError::DownloadError(format!("cannot open archive: {e}")))?;
    let mut entry = archive.by_name(filename).map_err(|e| {
        TransformError::DownloadError(format!("'{filename}' not found in the archive: {e}"))
    })?;
    let mut file = File::create(outfile).map_err(|e| TransformError::IoError {
        path: outfile.display().to_string(),
        source: e,
    })?;
    io::copy(&mut entry, &mut file).map_err(|e| TransformError::IoError {
        path: outfile.display().to_string(),
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::read_tile_list;

    #[test]
    fn tile_lists_parse_and_skip_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("tiles_srtm.csv");
        std::fs::write(
            &list,
            "srtm_38_03.tif,https://example.org/srtm_38_03.zip\n\
             only-a-filename\n\
             srtm_38_02.tif,https://example.org/srtm_38_02.zip\n",
        )
        .unwrap();

        let instructions = read_tile_list(&list).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[0].0, "srtm_38_03.tif");
        assert_eq!(instructions[1].1, "https://example.org/srtm_38_02.zip");
    }

    #[test]
    fn a_missing_tile_list_is_an_error() {
        assert!(read_tile_list(std::path::Path::new("tiles_nope.csv")).is_err());
    }
}
