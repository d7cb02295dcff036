//! First streaming pass: classify ways and relations, mark the node ids
//! that must survive. Node records are not needed here, the pass works on
//! references alone.

use log::info;
use osm_io::osm::model::node::Node;
use osm_io::osm::model::relation::{Member, Relation};
use osm_io::osm::model::way::Way;
use regex::Regex;

use crate::handler::{has_no_relevant_tags, is_no_elevation};
use crate::model::{NoElevationSets, ValidIdSets};

pub struct FirstPassHandler<'a> {
    remove_tags: &'a Regex,
    valid_ids: &'a mut ValidIdSets,
    no_elevation: &'a mut NoElevationSets,
    pub node_count: u64,
    pub way_count: u64,
    pub relation_count: u64,
    /// largest node id referenced by any retained way or relation; guards
    /// the synthetic id range of the rewrite pass
    pub max_node_ref: i64,
}

impl<'a> FirstPassHandler<'a> {
    pub fn new(
        remove_tags: &'a Regex,
        valid_ids: &'a mut ValidIdSets,
        no_elevation: &'a mut NoElevationSets,
    ) -> Self {
        Self {
            remove_tags,
            valid_ids,
            no_elevation,
            node_count: 0,
            way_count: 0,
            relation_count: 0,
            max_node_ref: 0,
        }
    }

    /// nodes only count here, retention is decided by way/relation references.
    pub fn node(&mut self, node: &Node) {
        if node.id() < 0 {
            return;
        }
        self.node_count += 1;
    }

    pub fn way(&mut self, way: &Way) {
        if way.id() < 0 {
            return;
        }
        self.way_count += 1;
        if way.refs().len() < 2 || has_no_relevant_tags(way.tags(), self.remove_tags) {
            return;
        }
        for node_ref in way.refs() {
            self.valid_ids.nodes.set(*node_ref);
            self.max_node_ref = self.max_node_ref.max(*node_ref);
        }
        if is_no_elevation(way.tags()) {
            for node_ref in way.refs() {
                self.no_elevation.nodes.set(*node_ref);
            }
            self.no_elevation.ways.set(way.id());
        }
        self.valid_ids.ways.set(way.id());
    }

    pub fn relation(&mut self, relation: &Relation) {
        if relation.id() < 0 {
            return;
        }
        self.relation_count += 1;
        if has_no_relevant_tags(relation.tags(), self.remove_tags) {
            return;
        }
        for member in relation.members() {
            if let Member::Node { member } = member {
                self.valid_ids.nodes.set(member.id());
                self.max_node_ref = self.max_node_ref.max(member.id());
            }
        }
        self.valid_ids.relations.set(relation.id());
    }

    pub fn log_stats(&self) {
        info!(
            "valid nodes: {} ({}), valid ways: {} ({}), valid relations: {} ({})",
            self.valid_ids.nodes.len(),
            self.node_count,
            self.valid_ids.ways.len(),
            self.way_count,
            self.valid_ids.relations.len(),
            self.relation_count,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::{relation, way};
    use crate::pipeline::build_remove_regex;

    fn run_ways(ways: &[Way]) -> (ValidIdSets, NoElevationSets) {
        let regex = build_remove_regex(crate::config::DEFAULT_REMOVE_TAGS).unwrap();
        let mut valid_ids = ValidIdSets::default();
        let mut no_elevation = NoElevationSets::default();
        let mut handler = FirstPassHandler::new(&regex, &mut valid_ids, &mut no_elevation);
        for way in ways {
            handler.way(way);
        }
        (valid_ids, no_elevation)
    }

    #[test]
    fn highway_ways_are_retained_with_their_nodes() {
        let (valid_ids, _) = run_ways(&[way(10, vec![101, 102], &[("highway", "yes")])]);
        assert!(valid_ids.ways.get(10));
        assert!(valid_ids.nodes.get(101));
        assert!(valid_ids.nodes.get(102));
    }

    #[test]
    fn building_ways_are_demoted() {
        let (valid_ids, _) = run_ways(&[way(20, vec![201, 202], &[("building", "yes")])]);
        assert!(!valid_ids.ways.get(20));
        assert!(!valid_ids.nodes.get(201));
        assert!(!valid_ids.nodes.get(202));
    }

    #[test]
    fn short_ways_are_demoted() {
        let (valid_ids, _) = run_ways(&[way(30, vec![301], &[("highway", "primary")])]);
        assert!(!valid_ids.ways.get(30));
        assert!(!valid_ids.nodes.get(301));
    }

    #[test]
    fn negative_ids_are_ignored() {
        let (valid_ids, _) = run_ways(&[way(-10, vec![101, 102], &[("highway", "yes")])]);
        assert!(valid_ids.ways.is_empty());
        assert!(valid_ids.nodes.is_empty());
    }

    #[test]
    fn tunnel_ways_propagate_the_no_elevation_flag() {
        let (valid_ids, no_elevation) = run_ways(&[way(
            40,
            vec![401, 402, 403],
            &[("highway", "primary"), ("tunnel", "yes")],
        )]);
        assert!(valid_ids.ways.get(40));
        assert!(no_elevation.ways.get(40));
        for id in [401, 402, 403] {
            assert!(no_elevation.nodes.get(id));
        }
    }

    #[test]
    fn explicit_tunnel_no_keeps_elevation() {
        let (_, no_elevation) = run_ways(&[way(
            41,
            vec![411, 412],
            &[("highway", "primary"), ("tunnel", "no")],
        )]);
        assert!(!no_elevation.ways.get(41));
        assert!(!no_elevation.nodes.get(411));
    }

    #[test]
    fn relations_retain_their_node_members_only() {
        let regex = build_remove_regex(crate::config::DEFAULT_REMOVE_TAGS).unwrap();
        let mut valid_ids = ValidIdSets::default();
        let mut no_elevation = NoElevationSets::default();
        let mut handler = FirstPassHandler::new(&regex, &mut valid_ids, &mut no_elevation);

        handler.relation(&relation(50, vec![501, 502], &[("route", "bus")]));
        handler.relation(&relation(51, vec![511], &[("boundary", "administrative")]));

        assert!(valid_ids.relations.get(50));
        assert!(valid_ids.nodes.get(501));
        assert!(valid_ids.nodes.get(502));
        assert!(!valid_ids.relations.get(51));
        assert!(!valid_ids.nodes.get(511));
    }

    #[test]
    fn platform_and_pier_values_validate() {
        let (valid_ids, _) = run_ways(&[
            way(11, vec![1, 2], &[("railway", "platform")]),
            way(12, vec![3, 4], &[("public_transport", "platform")]),
            way(13, vec![5, 6], &[("man_made", "pier")]),
            way(14, vec![7, 8], &[("railway", "rail")]),
            way(15, vec![9, 10], &[("man_made", "tower")]),
        ]);
        assert!(valid_ids.ways.get(11));
        assert!(valid_ids.ways.get(12));
        assert!(valid_ids.ways.get(13));
        // railway=rail neither validates nor invalidates, the way survives
        assert!(valid_ids.ways.get(14));
        // man_made with any other value invalidates
        assert!(!valid_ids.ways.get(15));
    }

    #[test]
    fn ways_stripped_bare_by_the_removal_regex_are_demoted() {
        let (valid_ids, _) = run_ways(&[way(
            16,
            vec![1, 2],
            &[("source", "survey"), ("note", "check me")],
        )]);
        assert!(!valid_ids.ways.get(16));
    }

    #[test]
    fn max_node_ref_tracks_retained_references() {
        let regex = build_remove_regex(crate::config::DEFAULT_REMOVE_TAGS).unwrap();
        let mut valid_ids = ValidIdSets::default();
        let mut no_elevation = NoElevationSets::default();
        let mut handler = FirstPassHandler::new(&regex, &mut valid_ids, &mut no_elevation);

        handler.way(&way(10, vec![7, 2_000_000_000], &[("highway", "yes")]));
        handler.way(&way(20, vec![8, 9], &[("building", "yes")]));
        assert_eq!(handler.max_node_ref, 2_000_000_000);
    }
}
