//! ID set containers for the filter pass.
//!
//! Retention decisions for a planet file touch billions of ids, so the
//! dense set is a bitset paged in fixed chunks: memory grows with the
//! largest id actually marked, untouched ranges cost one pointer. The small
//! set is a sorted vector for the handful of per-way flags.

use bit_vec::BitVec;

const PAGE_BITS: usize = 1 << 20;

/// dense set of non-negative 64-bit ids.
#[derive(Default)]
pub struct IdSetDense {
    pages: Vec<Option<BitVec>>,
    len: u64,
}

impl IdSetDense {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: i64) {
        if id < 0 {
            return;
        }
        let id = id as usize;
        let page = id / PAGE_BITS;
        let bit = id % PAGE_BITS;
        if page >= self.pages.len() {
            self.pages.resize_with(page + 1, || None);
        }
        let bits = self.pages[page].get_or_insert_with(|| BitVec::from_elem(PAGE_BITS, false));
        if !bits.get(bit).unwrap_or(false) {
            bits.set(bit, true);
            self.len += 1;
        }
    }

    pub fn get(&self, id: i64) -> bool {
        if id < 0 {
            return false;
        }
        let id = id as usize;
        self.pages
            .get(id / PAGE_BITS)
            .and_then(|page| page.as_ref())
            .and_then(|bits| bits.get(id % PAGE_BITS))
            .unwrap_or(false)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// sparse sorted set for small cardinalities.
#[derive(Default)]
pub struct IdSetSmall {
    ids: Vec<i64>,
}

impl IdSetSmall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: i64) {
        if id < 0 {
            return;
        }
        // ids usually arrive in ascending file order, the append path is hot
        match self.ids.last() {
            Some(last) if *last == id => {}
            Some(last) if *last < id => self.ids.push(id),
            _ => {
                if let Err(position) = self.ids.binary_search(&id) {
                    self.ids.insert(position, id);
                }
            }
        }
    }

    pub fn get(&self, id: i64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> u64 {
        self.ids.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// ids retained by the filter pass.
#[derive(Default)]
pub struct ValidIdSets {
    pub nodes: IdSetDense,
    pub ways: IdSetDense,
    pub relations: IdSetDense,
}

/// ways whose edges must not be subdivided, and the nodes they reference.
#[derive(Default)]
pub struct NoElevationSets {
    pub ways: IdSetSmall,
    pub nodes: IdSetDense,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_set_tracks_membership_and_size() {
        let mut set = IdSetDense::new();
        assert!(!set.get(0));
        set.set(0);
        set.set(17);
        set.set(17);
        assert!(set.get(0));
        assert!(set.get(17));
        assert!(!set.get(16));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dense_set_spans_page_boundaries() {
        let mut set = IdSetDense::new();
        let far = (super::PAGE_BITS * 3 + 5) as i64;
        set.set(far);
        set.set(far - 1);
        assert!(set.get(far));
        assert!(set.get(far - 1));
        assert!(!set.get(far + 1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dense_set_ignores_negative_ids() {
        let mut set = IdSetDense::new();
        set.set(-5);
        assert!(!set.get(-5));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn small_set_handles_out_of_order_inserts() {
        let mut set = IdSetSmall::new();
        for id in [10, 3, 7, 10, 99, 7] {
            set.set(id);
        }
        assert_eq!(set.len(), 4);
        for id in [3, 7, 10, 99] {
            assert!(set.get(id));
        }
        assert!(!set.get(4));
    }
}
