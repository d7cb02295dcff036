//! Streaming element handlers for the two passes, plus the shared tag
//! predicates that decide retention.

mod first_pass;
mod rewrite;

pub use first_pass::FirstPassHandler;
pub use rewrite::{RewriteHandler, RewriteStats};

use osm_io::osm::model::tag::Tag;
use regex::Regex;

/// keys that demote a way/relation when nothing else retains it.
const INVALIDATING_KEYS: [&str; 12] = [
    "building",
    "landuse",
    "boundary",
    "natural",
    "place",
    "waterway",
    "aeroway",
    "aviation",
    "military",
    "power",
    "communication",
    "man_made",
];

/// keys whose presence (with any value but "no") marks a way as exempt from
/// elevation subdivision.
const NO_ELEVATION_KEYS: [&str; 4] = ["bridge", "tunnel", "cutting", "indoor"];

/// tags that force retention regardless of invalidating keys.
fn tag_validates(key: &str, value: &str) -> bool {
    match key {
        "highway" | "route" => true,
        "railway" | "public_transport" => value == "platform",
        "man_made" => value == "pier",
        _ => false,
    }
}

/// decides removability from the tag list, ignoring tags whose key matches
/// the removal regex: an element with no surviving tags is irrelevant, one
/// with a validating tag is kept, and one whose surviving tags include an
/// invalidating key without any validating tag is dropped.
pub(crate) fn has_no_relevant_tags(tags: &[Tag], remove_tags: &Regex) -> bool {
    let mut no_tags_remain = true;
    let mut has_invalidating_tags = false;
    for tag in tags {
        if remove_tags.is_match(tag.k()) {
            continue;
        }
        no_tags_remain = false;
        if tag_validates(tag.k(), tag.v()) {
            return false;
        }
        if INVALIDATING_KEYS.contains(&tag.k().as_str()) {
            has_invalidating_tags = true;
        }
    }
    no_tags_remain || has_invalidating_tags
}

/// a way tagged bridge/tunnel/cutting/indoor (unless explicitly "no") keeps
/// its original edges.
pub(crate) fn is_no_elevation(tags: &[Tag]) -> bool {
    tags.iter()
        .any(|tag| NO_ELEVATION_KEYS.contains(&tag.k().as_str()) && tag.v() != "no")
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::build_remove_regex;
    use test_support::tags;

    fn default_regex() -> Regex {
        build_remove_regex("(.*:)?source(:.*)?|(.*:)?note(:.*)?|url|created_by|fixme|wikipedia")
            .unwrap()
    }

    #[test]
    fn empty_tag_lists_are_irrelevant() {
        let regex = default_regex();
        assert!(has_no_relevant_tags(&[], &regex));
    }

    #[test]
    fn lists_emptied_by_the_removal_regex_are_irrelevant() {
        let regex = default_regex();
        let list = tags(&[("source", "survey"), ("note:de", "x"), ("created_by", "y")]);
        assert!(has_no_relevant_tags(&list, &regex));
    }

    #[test]
    fn the_removal_regex_matches_whole_keys_case_insensitively() {
        let regex = default_regex();
        assert!(regex.is_match("FIXME"));
        assert!(regex.is_match("FixME"));
        assert!(regex.is_match("tiger:source"));
        assert!(regex.is_match("source:maxspeed"));
        // substrings of a key must not match
        assert!(!regex.is_match("curlier"));
        assert!(!regex.is_match("resource"));
    }

    #[test]
    fn validating_tags_retain() {
        let regex = default_regex();
        assert!(!has_no_relevant_tags(&tags(&[("highway", "yes")]), &regex));
        assert!(!has_no_relevant_tags(&tags(&[("route", "bus")]), &regex));
        assert!(!has_no_relevant_tags(
            &tags(&[("railway", "platform")]),
            &regex
        ));
        assert!(!has_no_relevant_tags(
            &tags(&[("man_made", "pier")]),
            &regex
        ));
        // a validating tag overrules invalidating company
        assert!(!has_no_relevant_tags(
            &tags(&[("building", "yes"), ("highway", "service")]),
            &regex
        ));
    }

    #[test]
    fn invalidating_tags_demote() {
        let regex = default_regex();
        assert!(has_no_relevant_tags(&tags(&[("building", "yes")]), &regex));
        // railway with a non-platform value neither validates nor
        // invalidates, so the list stays relevant
        assert!(!has_no_relevant_tags(&tags(&[("railway", "rail")]), &regex));
        assert!(has_no_relevant_tags(
            &tags(&[("man_made", "tower")]),
            &regex
        ));
    }

    #[test]
    fn no_elevation_keys_respect_the_no_value() {
        assert!(is_no_elevation(&tags(&[("tunnel", "yes")])));
        assert!(is_no_elevation(&tags(&[("bridge", "viaduct")])));
        assert!(!is_no_elevation(&tags(&[("tunnel", "no")])));
        assert!(!is_no_elevation(&tags(&[("highway", "primary")])));
    }
}
