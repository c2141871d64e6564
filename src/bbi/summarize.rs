use crate::bbi::bbiread::BBIReadError;
use crate::bbi::{BigSummary, ZoomHeader, ZoomRecord};

pub(crate) fn validate_bins(start: u32, end: u32, num_bins: u32) -> Result<(), BBIReadError> {
    if end <= start {
        return Err(BBIReadError::InvalidFile(format!(
            "invalid interval: [{}, {})",
            start, end
        )));
    }
    if num_bins == 0 {
        return Err(BBIReadError::InvalidFile(
            "number of bins must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Picks the zoom level to aggregate from. The desired per-record reduction
/// is half a bin width; among the levels whose reduction does not exceed it,
/// the largest (and therefore closest) wins. `None` means aggregate the
/// unzoomed data.
pub(crate) fn pick_zoom_level(
    zooms: &[ZoomHeader],
    start: u32,
    end: u32,
    num_bins: u32,
) -> Option<&ZoomHeader> {
    let desired = (end - start) / (2 * num_bins);
    pick_by_reduction(zooms, desired)
}

pub(crate) fn pick_by_reduction(zooms: &[ZoomHeader], desired: u32) -> Option<&ZoomHeader> {
    if desired <= 1 {
        return None;
    }
    zooms
        .iter()
        .filter(|z| z.reduction_level <= desired)
        .max_by_key(|z| z.reduction_level)
}

/// An equal-width bin grid over `[start, end)` accumulating summaries.
pub(crate) struct BinnedSummaries {
    start: u32,
    end: u32,
    num_bins: u32,
    bins: Vec<BigSummary>,
}

impl BinnedSummaries {
    pub(crate) fn empty(start: u32, end: u32, num_bins: u32) -> BinnedSummaries {
        BinnedSummaries {
            start,
            end,
            num_bins,
            bins: vec![BigSummary::empty(); num_bins as usize],
        }
    }

    fn bin_start(&self, bin: u32) -> u32 {
        let len = (self.end - self.start) as u64;
        self.start + (u64::from(bin) * len / u64::from(self.num_bins)) as u32
    }

    /// The bin containing `pos`. Bin widths round unevenly, so the
    /// proportional guess needs a one-step fixup.
    fn bin_of(&self, pos: u32) -> u32 {
        let len = (self.end - self.start) as u64;
        let guess = u64::from(pos - self.start) * u64::from(self.num_bins) / len;
        let mut bin = (guess as u32).min(self.num_bins - 1);
        while bin + 1 < self.num_bins && self.bin_start(bin + 1) <= pos {
            bin += 1;
        }
        while self.bin_start(bin) > pos {
            bin -= 1;
        }
        bin
    }

    fn clip(&self, item_start: u32, item_end: u32) -> Option<(u32, u32)> {
        let s = item_start.max(self.start);
        let e = item_end.min(self.end);
        (s < e).then_some((s, e))
    }

    /// Adds one raw item covering `[item_start, item_end)` with a value.
    pub(crate) fn add_value(&mut self, item_start: u32, item_end: u32, value: f64) {
        let Some((s, e)) = self.clip(item_start, item_end) else {
            return;
        };
        let mut bin = self.bin_of(s);
        loop {
            let bin_start = self.bin_start(bin);
            if bin_start >= e {
                break;
            }
            let bin_end = if bin + 1 < self.num_bins {
                self.bin_start(bin + 1)
            } else {
                self.end
            };
            let intersection = u64::from(e.min(bin_end) - s.max(bin_start));
            if intersection > 0 {
                self.bins[bin as usize].update(
                    value,
                    value,
                    intersection,
                    value * intersection as f64,
                    value * value * intersection as f64,
                );
            }
            if bin + 1 >= self.num_bins {
                break;
            }
            bin += 1;
        }
    }

    /// Adds one zoom record, scaling its summary by the fraction of the
    /// record intersecting each bin; the scaled count rounds to nearest.
    pub(crate) fn add_zoom_record(&mut self, record: &ZoomRecord) {
        let Some((s, e)) = self.clip(record.start, record.end) else {
            return;
        };
        let total = f64::from(record.end - record.start);
        let summary = &record.summary;
        let mut bin = self.bin_of(s);
        loop {
            let bin_start = self.bin_start(bin);
            if bin_start >= e {
                break;
            }
            let bin_end = if bin + 1 < self.num_bins {
                self.bin_start(bin + 1)
            } else {
                self.end
            };
            let intersection = u64::from(e.min(bin_end) - s.max(bin_start));
            if intersection > 0 {
                let fraction = intersection as f64 / total;
                self.bins[bin as usize].update(
                    summary.min_val,
                    summary.max_val,
                    (fraction * summary.count as f64).round() as u64,
                    fraction * summary.sum,
                    fraction * summary.sum_squares,
                );
            }
            if bin + 1 >= self.num_bins {
                break;
            }
            bin += 1;
        }
    }

    pub(crate) fn dense(self) -> Vec<BigSummary> {
        self.bins.into_iter().map(BigSummary::normalized).collect()
    }

    pub(crate) fn sparse(self) -> Vec<(u32, BigSummary)> {
        self.bins
            .into_iter()
            .enumerate()
            .filter(|(_, bin)| !bin.is_empty())
            .map(|(i, bin)| (i as u32, bin))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zooms(reductions: &[u32]) -> Vec<ZoomHeader> {
        reductions
            .iter()
            .map(|&reduction_level| ZoomHeader {
                reduction_level,
                data_offset: 0,
                index_offset: 0,
            })
            .collect()
    }

    #[test]
    fn test_pick_zoom_level() {
        let headers = zooms(&[10, 40, 160, 640]);
        assert!(pick_by_reduction(&headers, 0).is_none());
        assert!(pick_by_reduction(&headers, 1).is_none());
        assert!(pick_by_reduction(&headers, 9).is_none());
        assert_eq!(pick_by_reduction(&headers, 10).unwrap().reduction_level, 10);
        assert_eq!(pick_by_reduction(&headers, 39).unwrap().reduction_level, 10);
        assert_eq!(pick_by_reduction(&headers, 40).unwrap().reduction_level, 40);
        assert_eq!(
            pick_by_reduction(&headers, 1_000_000)
                .unwrap()
                .reduction_level,
            640
        );
        assert!(pick_by_reduction(&[], 100).is_none());
    }

    #[test]
    fn test_bins_partition_interval() {
        // Bin widths are uneven when the length does not divide evenly; the
        // bins must still partition the interval exactly.
        let mut grid = BinnedSummaries::empty(0, 10, 3);
        grid.add_value(0, 10, 2.0);
        let bins = grid.dense();
        let total: u64 = bins.iter().map(|b| b.count).sum();
        assert_eq!(total, 10);
        let sum: f64 = bins.iter().map(|b| b.sum).sum();
        assert!((sum - 20.0).abs() < 1e-9);
        for bin in &bins {
            assert_eq!(bin.min_val, 2.0);
            assert_eq!(bin.max_val, 2.0);
        }
    }

    #[test]
    fn test_value_spanning_bins() {
        let mut grid = BinnedSummaries::empty(100, 200, 4);
        grid.add_value(120, 180, 1.5);
        let bins = grid.dense();
        assert_eq!(bins[0].count, 5);
        assert_eq!(bins[1].count, 25);
        assert_eq!(bins[2].count, 25);
        assert_eq!(bins[3].count, 5);
    }

    #[test]
    fn test_items_outside_are_clipped() {
        let mut grid = BinnedSummaries::empty(100, 200, 2);
        grid.add_value(0, 100, 9.0);
        grid.add_value(200, 300, 9.0);
        grid.add_value(90, 110, 1.0);
        let bins = grid.dense();
        assert_eq!(bins[0].count, 10);
        assert_eq!(bins[1].count, 0);
    }

    #[test]
    fn test_zoom_record_scaling() {
        let mut grid = BinnedSummaries::empty(0, 100, 2);
        // A record half inside each bin: contributions split 50/50.
        let record = ZoomRecord {
            chrom: 0,
            start: 30,
            end: 70,
            summary: BigSummary {
                count: 40,
                min_val: 1.0,
                max_val: 3.0,
                sum: 80.0,
                sum_squares: 200.0,
            },
        };
        grid.add_zoom_record(&record);
        let bins = grid.dense();
        assert_eq!(bins[0].count, 20);
        assert_eq!(bins[1].count, 20);
        assert!((bins[0].sum - 40.0).abs() < 1e-9);
        assert!((bins[1].sum_squares - 100.0).abs() < 1e-9);
        assert_eq!(bins[0].min_val, 1.0);
        assert_eq!(bins[0].max_val, 3.0);
    }

    #[test]
    fn test_sparse_skips_empty_bins() {
        let mut grid = BinnedSummaries::empty(0, 100, 10);
        grid.add_value(25, 30, 1.0);
        grid.add_value(85, 90, 2.0);
        let sparse = grid.sparse();
        let indices: Vec<u32> = sparse.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![2, 8]);
    }
}
