//! Second streaming pass: emit retained elements with pruned tags,
//! elevation and area enrichment, and synthetic interpolation nodes.

use osm_io::osm::model::coordinate::Coordinate;
use osm_io::osm::model::element::Element;
use osm_io::osm::model::node::Node;
use osm_io::osm::model::relation::Relation;
use osm_io::osm::model::tag::Tag;
use osm_io::osm::model::way::Way;
use regex::Regex;

use routeprep_area::AreaService;
use routeprep_elevation::{ElevationService, LocationElevation, NODATA};

use crate::model::{LocationIndex, NoElevationSets, ValidIdSets};

/// counters accumulated over the rewrite pass.
#[derive(Default, Debug)]
pub struct RewriteStats {
    pub processed_elements: u64,
    pub total_tags: u64,
    pub valid_tags: u64,
    pub nodes_with_elevation: u64,
    pub nodes_with_elevation_not_found: u64,
    pub nodes_added_by_interpolation: u64,
    pub nodes_with_no_country: u64,
    pub nodes_with_single_country: u64,
    pub nodes_with_multiple_countries: u64,
}

/// rewrites the retained elements of one input stream. the services, ID
/// sets and removal regex are lent by the driver for the duration of the
/// pass; emitted elements land in two buffers the driver drains into the
/// node and way/relation writers.
pub struct RewriteHandler<'a> {
    location_index: &'a mut dyn LocationIndex,
    elevation: &'a mut ElevationService,
    area: &'a AreaService,
    remove_tags: &'a Regex,
    valid_ids: &'a ValidIdSets,
    no_elevation: &'a NoElevationSets,
    add_elevation: bool,
    interpolate: bool,
    threshold: f64,
    next_node_id: i64,
    /// ways and relations, in input order
    pub buffer: Vec<Element>,
    /// original and synthetic nodes
    pub node_buffer: Vec<Element>,
    stats: RewriteStats,
}

impl<'a> RewriteHandler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        next_node_id: i64,
        location_index: &'a mut dyn LocationIndex,
        elevation: &'a mut ElevationService,
        area: &'a AreaService,
        remove_tags: &'a Regex,
        valid_ids: &'a ValidIdSets,
        no_elevation: &'a NoElevationSets,
        add_elevation: bool,
        interpolate: bool,
        threshold: f64,
    ) -> Self {
        Self {
            location_index,
            elevation,
            area,
            remove_tags,
            valid_ids,
            no_elevation,
            add_elevation,
            interpolate,
            threshold,
            next_node_id,
            buffer: Vec::new(),
            node_buffer: Vec::new(),
            stats: RewriteStats::default(),
        }
    }

    pub fn handle(&mut self, element: Element) {
        match element {
            Element::Node { node } => self.node(node),
            Element::Way { way } => self.way(way),
            Element::Relation { relation } => self.relation(relation),
            Element::Sentinel => {}
        }
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    pub fn into_stats(self) -> RewriteStats {
        self.stats
    }

    fn node(&mut self, mut node: Node) {
        if node.id() < 0 || !self.valid_ids.nodes.get(node.id()) {
            return;
        }
        self.stats.processed_elements += 1;
        let lon = node.coordinate().lon();
        let lat = node.coordinate().lat();

        let mut ele = NODATA;
        if self.add_elevation && self.elevation.is_initialized() {
            ele = self.elevation.elevation(lon, lat, true);
            if ele != NODATA {
                self.stats.nodes_with_elevation += 1;
            } else {
                self.stats.nodes_with_elevation_not_found += 1;
            }
        }

        let countries = self.area.get_area(lon, lat);
        match countries.len() {
            0 => self.stats.nodes_with_no_country += 1,
            1 => self.stats.nodes_with_single_country += 1,
            _ => self.stats.nodes_with_multiple_countries += 1,
        }

        // metadata (version, timestamp, authorship) is stripped on the way out
        let tags = self.copy_node_tags(node.take_tags(), ele, &countries);
        let rebuilt = Node::new(
            node.id(),
            0,
            node.coordinate().clone(),
            0,
            0,
            0,
            String::default(),
            node.visible(),
            tags,
        );
        if self.interpolate {
            self.location_index.set(rebuilt.id(), lon, lat);
        }
        self.node_buffer.push(Element::Node { node: rebuilt });
    }

    fn way(&mut self, way: Way) {
        if way.id() < 0 || !self.valid_ids.ways.get(way.id()) {
            return;
        }
        self.stats.processed_elements += 1;
        let refs = if self.interpolate
            && self.elevation.is_initialized()
            && !self.no_elevation.ways.get(way.id())
        {
            self.interpolated_refs(&way)
        } else {
            way.refs().clone()
        };
        let tags = self.copy_tags(way.tags().clone());
        let rebuilt = Way::new(way.id(), 0, 0, 0, 0, String::default(), way.visible(), refs, tags);
        self.buffer.push(Element::Way { way: rebuilt });
    }

    fn relation(&mut self, relation: Relation) {
        if relation.id() < 0 || !self.valid_ids.relations.get(relation.id()) {
            return;
        }
        self.stats.processed_elements += 1;
        let tags = self.copy_tags(relation.tags().clone());
        let rebuilt = Relation::new(
            relation.id(),
            0,
            0,
            0,
            0,
            String::default(),
            relation.visible(),
            relation.members().clone(),
            tags,
        );
        self.buffer.push(Element::Relation { relation: rebuilt });
    }

    /// walks consecutive node pairs, sampling the elevation profile between
    /// them. a sample whose elevation deviates from the mean of its
    /// neighbors by at least the threshold becomes a synthetic node spliced
    /// into the ref list; the first and last samples are never inserted,
    /// the original refs stay.
    fn interpolated_refs(&mut self, way: &Way) -> Vec<i64> {
        let refs = way.refs();
        let mut rebuilt = Vec::with_capacity(refs.len());
        let mut from_location = self.location_index.get(refs[0]);
        rebuilt.push(refs[0]);
        for window in refs.windows(2) {
            let to = window[1];
            let to_location = self.location_index.get(to);
            if let (Some(from), Some(to_loc)) = (from_location, to_location) {
                let samples = self.elevation.interpolate(from, to_loc);
                for index in 1..samples.len().saturating_sub(1) {
                    let sample = samples[index];
                    if sample.ele == NODATA {
                        continue;
                    }
                    let before = samples[index - 1].ele;
                    let after = samples[index + 1].ele;
                    if (sample.ele - (before + after) / 2.0).abs() >= self.threshold {
                        let id = self.next_node_id();
                        self.push_synthetic_node(id, sample);
                        rebuilt.push(id);
                    }
                }
            }
            from_location = to_location;
            rebuilt.push(to);
        }
        rebuilt
    }

    fn next_node_id(&mut self) -> i64 {
        let id = self.next_node_id;
        self.next_node_id += 1;
        id
    }

    fn push_synthetic_node(&mut self, id: i64, sample: LocationElevation) {
        let node = Node::new(
            id,
            0,
            Coordinate::new(sample.lat, sample.lon),
            0,
            0,
            0,
            String::default(),
            true,
            vec![Tag::new("ele".to_string(), sample.ele.to_string())],
        );
        self.node_buffer.push(Element::Node { node });
        self.stats.nodes_added_by_interpolation += 1;
    }

    /// node tag copy: keys matching the removal regex are dropped, existing
    /// country tags (and elevation tags while enriching) are dropped in
    /// favor of the computed values appended at the end.
    fn copy_node_tags(&mut self, tags: Vec<Tag>, ele: f64, countries: &[String]) -> Vec<Tag> {
        let mut copied = Vec::with_capacity(tags.len());
        for tag in tags {
            self.stats.total_tags += 1;
            if self.remove_tags.is_match(tag.k()) {
                continue;
            }
            if tag.k() == "country" || (tag.k() == "ele" && self.add_elevation) {
                continue;
            }
            self.stats.valid_tags += 1;
            copied.push(tag);
        }
        if ele > NODATA {
            copied.push(Tag::new("ele".to_string(), ele.to_string()));
        }
        if !countries.is_empty() {
            copied.push(Tag::new("country".to_string(), countries.join(",")));
        }
        copied
    }

    fn copy_tags(&mut self, tags: Vec<Tag>) -> Vec<Tag> {
        let mut copied = Vec::with_capacity(tags.len());
        for tag in tags {
            self.stats.total_tags += 1;
            if self.remove_tags.is_match(tag.k()) {
                continue;
            }
            self.stats.valid_tags += 1;
            copied.push(tag);
        }
        copied
    }
}
