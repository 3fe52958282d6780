//! Batch planning: partition a document into fixed-size page ranges.

use crate::output::PageRange;

/// Split pages `1..=total_pages` into consecutive ranges of at most
/// `batch_size` pages.
///
/// The result is deterministic: `ceil(total_pages / batch_size)` ranges,
/// increasing, non-overlapping, covering every page exactly once. Only the
/// last range may be shorter. A `batch_size` of 0 is treated as 1; an empty
/// document yields no ranges.
pub fn plan_batches(total_pages: u32, batch_size: u32) -> Vec<PageRange> {
    let size = batch_size.max(1);
    let mut ranges = Vec::with_capacity(total_pages.div_ceil(size) as usize);
    let mut start = 1u32;
    while start <= total_pages {
        let end = start.saturating_add(size - 1).min(total_pages);
        if let Some(range) = PageRange::new(start, end) {
            ranges.push(range);
        }
        start = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(ranges: &[PageRange]) -> Vec<(u32, u32)> {
        ranges.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn three_pages_batch_three() {
        assert_eq!(pairs(&plan_batches(3, 3)), vec![(1, 3)]);
    }

    #[test]
    fn seven_pages_batch_three() {
        assert_eq!(pairs(&plan_batches(7, 3)), vec![(1, 3), (4, 6), (7, 7)]);
    }

    #[test]
    fn empty_and_degenerate() {
        assert!(plan_batches(0, 3).is_empty());
        assert_eq!(pairs(&plan_batches(2, 0)), vec![(1, 1), (2, 2)]);
        assert_eq!(pairs(&plan_batches(2, 10)), vec![(1, 2)]);
    }

    #[test]
    fn covers_every_page_exactly_once() {
        for total in 0..60u32 {
            for size in 1..9u32 {
                let ranges = plan_batches(total, size);
                assert_eq!(ranges.len() as u32, total.div_ceil(size));
                let pages: Vec<u32> = ranges.iter().flat_map(|r| r.pages()).collect();
                assert_eq!(pages, (1..=total).collect::<Vec<_>>());
                assert!(ranges.iter().all(|r| r.page_count() <= size));
                if let Some((last, init)) = ranges.split_last() {
                    assert!(init.iter().all(|r| r.page_count() == size));
                    assert!(last.page_count() >= 1);
                }
            }
        }
    }
}
