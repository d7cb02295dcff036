//! Resolution of GeoTIFF spatial reference descriptions to EPSG codes.
//!
//! GeoTIFF files carry their reference system as a free-form description
//! string (e.g. `WGS 84|` or `ETRS89 / UTM zone 32N|ETRS89|`). Only the
//! families that elevation tile sets actually use are resolved here; an
//! unknown description fails the tile load, which callers treat as a
//! non-fatal per-tile warning.

use regex::Regex;
use std::sync::OnceLock;

fn utm_zone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"UTM\s*zone\s*(\d{1,2})\s*([NS])?").unwrap())
}

fn epsg_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"EPSG:\s*(\d{4,5})").unwrap())
}

/// resolves the first segment of a GeoTIFF `geo_params` string to an EPSG
/// code. returns None when the description names no known reference system.
pub fn resolve_epsg(geo_params: &str) -> Option<u16> {
    let name = geo_params.split('|').next().unwrap_or_default().trim();
    if name.is_empty() {
        return None;
    }

    if let Some(captures) = epsg_code_pattern().captures(name) {
        return captures[1].parse::<u16>().ok();
    }

    if let Some(captures) = utm_zone_pattern().captures(name) {
        let zone: u16 = captures[1].parse().ok()?;
        if !(1..=60).contains(&zone) {
            return None;
        }
        let south = captures
            .get(2)
            .map(|m| m.as_str() == "S")
            .unwrap_or(false);
        if name.contains("ETRS89") {
            // ETRS89 / UTM covers zones 28N..38N only
            return (!south && (28..=38).contains(&zone)).then_some(25800 + zone);
        }
        if name.contains("WGS 84") || name.contains("WGS84") {
            return Some(if south { 32700 + zone } else { 32600 + zone });
        }
        return None;
    }

    if name.contains("WGS 84") || name.contains("WGS84") {
        return Some(4326);
    }
    if name.contains("ETRS89-extended") || name.contains("LAEA Europe") {
        return Some(3035);
    }
    if name == "ETRS89" {
        return Some(4258);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::resolve_epsg;

    #[test]
    fn resolves_wgs84_variants() {
        assert_eq!(resolve_epsg("WGS 84|"), Some(4326));
        assert_eq!(resolve_epsg("WGS 84"), Some(4326));
        assert_eq!(resolve_epsg("WGS84"), Some(4326));
    }

    #[test]
    fn resolves_utm_zones() {
        assert_eq!(resolve_epsg("ETRS89 / UTM zone 32N|ETRS89|"), Some(25832));
        assert_eq!(resolve_epsg("WGS 84 / UTM zone 33N"), Some(32633));
        assert_eq!(resolve_epsg("WGS 84 / UTM zone 19S"), Some(32719));
    }

    #[test]
    fn resolves_explicit_codes() {
        assert_eq!(resolve_epsg("EPSG:25832"), Some(25832));
        assert_eq!(resolve_epsg("EPSG: 4326"), Some(4326));
    }

    #[test]
    fn rejects_unknown_descriptions() {
        assert_eq!(resolve_epsg(""), None);
        assert_eq!(resolve_epsg("NAD27 / Alaska Albers"), None);
        assert_eq!(resolve_epsg("ETRS89 / UTM zone 99N"), None);
    }
}
