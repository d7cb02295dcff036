//! Pluggable node-location index for the rewrite pass.

use rustc_hash::FxHashMap;

use crate::model::TransformError;

/// node id → WGS84 location, populated while nodes stream past and
/// consulted when their enclosing ways are rewritten.
pub trait LocationIndex {
    fn set(&mut self, id: i64, lon: f64, lat: f64);
    fn get(&self, id: i64) -> Option<(f64, f64)>;
}

/// creates the index backend selected by name.
pub fn create_location_index(name: &str) -> Result<Box<dyn LocationIndex>, TransformError> {
    match name {
        "flex_mem" => Ok(Box::new(DenseLocationIndex::new())),
        "hash_mem" => Ok(Box::new(HashLocationIndex::new())),
        "sparse_mem" => Ok(Box::new(SparseLocationIndex::new())),
        other => Err(TransformError::UnknownIndexType(other.to_string())),
    }
}

const PAGE_ENTRIES: usize = 1 << 16;

/// dense in-memory index paged by unsigned node id, the default backend.
#[derive(Default)]
pub struct DenseLocationIndex {
    pages: Vec<Option<Box<[[f64; 2]]>>>,
}

impl DenseLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationIndex for DenseLocationIndex {
    fn set(&mut self, id: i64, lon: f64, lat: f64) {
        if id < 0 {
            return;
        }
        let id = id as usize;
        let page = id / PAGE_ENTRIES;
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        let entries = self.pages[page]
            .get_or_insert_with(|| vec![[f64::NAN, f64::NAN]; PAGE_ENTRIES].into_boxed_slice());
        entries[id % PAGE_ENTRIES] = [lon, lat];
    }

    fn get(&self, id: i64) -> Option<(f64, f64)> {
        if id < 0 {
            return None;
        }
        let id = id as usize;
        let entry = self
            .pages
            .get(id / PAGE_ENTRIES)?
            .as_ref()?
            .get(id % PAGE_ENTRIES)?;
        if entry[0].is_nan() {
            None
        } else {
            Some((entry[0], entry[1]))
        }
    }
}

/// hash-backed index, cheaper for sparse extracts with huge id gaps.
#[derive(Default)]
pub struct HashLocationIndex {
    locations: FxHashMap<i64, (f64, f64)>,
}

impl HashLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationIndex for HashLocationIndex {
    fn set(&mut self, id: i64, lon: f64, lat: f64) {
        if id < 0 {
            return;
        }
        self.locations.insert(id, (lon, lat));
    }

    fn get(&self, id: i64) -> Option<(f64, f64)> {
        self.locations.get(&id).copied()
    }
}

/// ordered-map index; slowest, but its memory tracks the id count exactly.
#[derive(Default)]
pub struct SparseLocationIndex {
    locations: std::collections::BTreeMap<i64, (f64, f64)>,
}

impl SparseLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationIndex for SparseLocationIndex {
    fn set(&mut self, id: i64, lon: f64, lat: f64) {
        if id < 0 {
            return;
        }
        self.locations.insert(id, (lon, lat));
    }

    fn get(&self, id: i64) -> Option<(f64, f64)> {
        self.locations.get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_index_stores_and_misses() {
        let mut index = DenseLocationIndex::new();
        index.set(42, 8.05, 50.38);
        index.set((PAGE_ENTRIES * 2 + 1) as i64, 1.0, 2.0);
        assert_eq!(index.get(42), Some((8.05, 50.38)));
        assert_eq!(index.get((PAGE_ENTRIES * 2 + 1) as i64), Some((1.0, 2.0)));
        assert_eq!(index.get(43), None);
        assert_eq!(index.get(-1), None);
    }

    #[test]
    fn hash_index_stores_and_misses() {
        let mut index = HashLocationIndex::new();
        index.set(91142609, 6.0902180, 50.7220057);
        assert_eq!(index.get(91142609), Some((6.0902180, 50.7220057)));
        assert_eq!(index.get(1), None);
    }

    #[test]
    fn factory_resolves_known_backends() {
        for name in ["flex_mem", "hash_mem", "sparse_mem"] {
            let mut index = create_location_index(name).unwrap();
            index.set(5, 1.5, 2.5);
            assert_eq!(index.get(5), Some((1.5, 2.5)));
            assert_eq!(index.get(6), None);
        }
        assert!(matches!(
            create_location_index("sparse_file"),
            Err(TransformError::UnknownIndexType(_))
        ));
    }
}
