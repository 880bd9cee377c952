use std::collections::BTreeMap;

use cooldb_common::FilePage;

use crate::extent::Extent;

/// All used extents keyed by `(segmentId, start)`. Coalesces adjacent
/// extents belonging to the same segment on insert; splits on partial
/// removal.
#[derive(Default)]
pub struct UsedExtentMethod {
    by_segment: BTreeMap<(FilePage, u32), Extent>,
}

impl UsedExtentMethod {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, segment_id: FilePage, mut extent: Extent) {
        if let Some((&(seg, _), &lower)) = self.by_segment.range(..(segment_id, extent.start.page_num)).next_back() {
            if seg == segment_id && lower.adjoins(&extent) {
                self.by_segment.remove(&(seg, lower.start.page_num));
                extent = Extent::new(lower.start, lower.size + extent.size);
            }
        }
        let end = extent.end();
        if let Some(&upper) = self.by_segment.get(&(segment_id, end.page_num)) {
            self.by_segment.remove(&(segment_id, upper.start.page_num));
            extent = Extent::new(extent.start, extent.size + upper.size);
        }
        self.by_segment.insert((segment_id, extent.start.page_num), extent);
    }

    /// Remove `extent` from `segment_id`'s used set. If only part of a
    /// stored extent is being returned, the remainder stays registered.
    pub fn remove(&mut self, segment_id: FilePage, extent: Extent) -> bool {
        let Some(&stored) = self.by_segment.get(&(segment_id, extent.start.page_num)) else {
            return false;
        };
        if stored.size < extent.size || stored.start.file_id != extent.start.file_id {
            return false;
        }
        self.by_segment.remove(&(segment_id, stored.start.page_num));

        let (taken, remainder) = stored.split(extent.size);
        debug_assert_eq!(taken, extent);
        if let Some(rest) = remainder {
            self.by_segment.insert((segment_id, rest.start.page_num), rest);
        }
        true
    }

    pub fn extents_for(&self, segment_id: FilePage) -> Vec<Extent> {
        self.by_segment
            .range((segment_id, 0)..(segment_id, u32::MAX))
            .map(|(_, &e)| e)
            .collect()
    }

    pub fn total_pages_for(&self, segment_id: FilePage) -> u32 {
        self.extents_for(segment_id).iter().map(|e| e.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(n: u16) -> FilePage {
        FilePage::new(0, n as u32)
    }

    #[test]
    fn insert_coalesces_within_segment_only() {
        let mut idx = UsedExtentMethod::new();
        idx.insert(seg(1), Extent::new(FilePage::new(0, 0), 5));
        idx.insert(seg(2), Extent::new(FilePage::new(0, 5), 5));
        idx.insert(seg(1), Extent::new(FilePage::new(0, 10), 5));

        assert_eq!(idx.extents_for(seg(1)).len(), 2);
        assert_eq!(idx.total_pages_for(seg(1)), 10);
        assert_eq!(idx.total_pages_for(seg(2)), 5);
    }

    #[test]
    fn insert_coalesces_adjacent_same_segment() {
        let mut idx = UsedExtentMethod::new();
        idx.insert(seg(1), Extent::new(FilePage::new(0, 0), 5));
        idx.insert(seg(1), Extent::new(FilePage::new(0, 5), 5));
        assert_eq!(idx.extents_for(seg(1)), vec![Extent::new(FilePage::new(0, 0), 10)]);
    }

    #[test]
    fn remove_splits_remainder_back_in() {
        let mut idx = UsedExtentMethod::new();
        idx.insert(seg(1), Extent::new(FilePage::new(0, 0), 10));
        assert!(idx.remove(seg(1), Extent::new(FilePage::new(0, 0), 4)));
        assert_eq!(idx.extents_for(seg(1)), vec![Extent::new(FilePage::new(0, 4), 6)]);
    }

    #[test]
    fn remove_unknown_extent_fails() {
        let mut idx = UsedExtentMethod::new();
        idx.insert(seg(1), Extent::new(FilePage::new(0, 0), 4));
        assert!(!idx.remove(seg(1), Extent::new(FilePage::new(0, 20), 4)));
    }
}
