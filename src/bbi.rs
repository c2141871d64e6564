use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) mod bbiread;
pub(crate) mod bbiwrite;
pub(crate) mod bigbedread;
pub(crate) mod bigbedwrite;
pub(crate) mod bigwigread;
pub(crate) mod bigwigwrite;
pub(crate) mod bpt;
pub(crate) mod rtree;
pub(crate) mod summarize;
pub(crate) mod zoom;

pub(crate) const BIGWIG_MAGIC: u32 = 0x888F_FC26;
pub(crate) const BIGBED_MAGIC: u32 = 0x8789_F2EB;

pub(crate) const CIR_TREE_MAGIC: u32 = 0x2468_ACE0;
pub(crate) const CHROM_TREE_MAGIC: u32 = 0x78CA_8C91;

/// The type of bbi file
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BBIFile {
    BigWig,
    BigBed,
}

/// Info on a specific zoom level in a bbi file
#[derive(Copy, Clone, Debug)]
pub struct ZoomHeader {
    /// How many bases each summary record of this level aggregates
    pub reduction_level: u32,
    pub(crate) data_offset: u64,
    pub(crate) index_offset: u64,
}

/// A single zoom record: one summarized bin at some reduction level
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZoomRecord {
    pub(crate) chrom: u32,
    pub start: u32,
    pub end: u32,
    pub summary: BigSummary,
}

/// The file-level summary: the total summary block plus the item count
/// stored at the start of the data section.
#[derive(Copy, Clone, Debug)]
pub struct Summary {
    pub total_items: u64,
    pub bases_covered: u64,
    pub min_val: f64,
    pub max_val: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

/// A summary of values over some stretch of bases.
///
/// `count` is the number of covered bases, `sum` and `sum_squares` are
/// base-weighted. Summaries combine with [`BigSummary::merge`], which is
/// associative and commutative with [`BigSummary::empty`] as the identity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BigSummary {
    pub count: u64,
    pub min_val: f64,
    pub max_val: f64,
    pub sum: f64,
    pub sum_squares: f64,
}

impl BigSummary {
    pub fn empty() -> BigSummary {
        BigSummary {
            count: 0,
            min_val: f64::INFINITY,
            max_val: f64::NEG_INFINITY,
            sum: 0.0,
            sum_squares: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn merge(&mut self, other: &BigSummary) {
        self.count += other.count;
        self.min_val = self.min_val.min(other.min_val);
        self.max_val = self.max_val.max(other.max_val);
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    /// Adds `count` bases of a value with the given min/max and
    /// (base-weighted) sum contributions.
    pub(crate) fn update(&mut self, min_val: f64, max_val: f64, count: u64, sum: f64, sum_squares: f64) {
        self.count += count;
        self.min_val = self.min_val.min(min_val);
        self.max_val = self.max_val.max(max_val);
        self.sum += sum;
        self.sum_squares += sum_squares;
    }

    /// An empty summary carries infinite min/max sentinels internally;
    /// reported bins use plain zeros instead.
    pub(crate) fn normalized(self) -> BigSummary {
        if self.is_empty() {
            BigSummary {
                count: 0,
                min_val: 0.0,
                max_val: 0.0,
                sum: 0.0,
                sum_squares: 0.0,
            }
        } else {
            self
        }
    }
}

/// Represents a single value in a bigWig file
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Value {
    pub start: u32,
    pub end: u32,
    pub value: f32,
}

/// Represents a single entry in a bigBed file
#[derive(Clone, Debug, PartialEq)]
pub struct BedEntry {
    pub chrom: String,
    pub start: u32,
    pub end: u32,
    /// The tab-delimited tail of the bed line, without chrom/start/end.
    /// May be empty.
    pub rest: String,
}

/// A run of values where each interval is `span` bases wide and intervals
/// start `step` bases apart.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedStepSection {
    pub chrom: String,
    pub start: u32,
    pub step: u32,
    pub span: u32,
    pub values: Vec<f32>,
}

/// A run of values at explicit (strictly ascending) positions, each interval
/// `span` bases wide.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableStepSection {
    pub chrom: String,
    pub span: u32,
    pub positions: Vec<u32>,
    pub values: Vec<f32>,
}

/// A run of explicit intervals. Read-only within bigWigs: the writer does
/// not emit bedGraph sections.
#[derive(Clone, Debug, PartialEq)]
pub struct BedGraphSection {
    pub chrom: String,
    pub ranges: Vec<Value>,
}

/// One section of wiggle data
#[derive(Clone, Debug, PartialEq)]
pub enum WigSection {
    FixedStep(FixedStepSection),
    VariableStep(VariableStepSection),
    BedGraph(BedGraphSection),
}

impl WigSection {
    pub fn chrom(&self) -> &str {
        match self {
            WigSection::FixedStep(s) => &s.chrom,
            WigSection::VariableStep(s) => &s.chrom,
            WigSection::BedGraph(s) => &s.chrom,
        }
    }

    /// Start of the first interval, or 0 if the section is empty.
    pub fn start(&self) -> u32 {
        match self {
            WigSection::FixedStep(s) => s.start,
            WigSection::VariableStep(s) => s.positions.first().copied().unwrap_or(0),
            WigSection::BedGraph(s) => s.ranges.first().map(|r| r.start).unwrap_or(0),
        }
    }

    /// End of the last interval, or 0 if the section is empty.
    pub fn end(&self) -> u32 {
        match self {
            WigSection::FixedStep(s) => {
                if s.values.is_empty() {
                    0
                } else {
                    s.start + (s.values.len() as u32 - 1) * s.step + s.span
                }
            }
            WigSection::VariableStep(s) => s.positions.last().map(|p| p + s.span).unwrap_or(0),
            WigSection::BedGraph(s) => s.ranges.last().map(|r| r.end).unwrap_or(0),
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            WigSection::FixedStep(s) => s.values.len(),
            WigSection::VariableStep(s) => s.values.len(),
            WigSection::BedGraph(s) => s.ranges.len(),
        }
    }

    /// Splits this section so that no piece holds more than `max_items`
    /// items. Data blocks store their item count in a `u16`, so the writer
    /// splices with `max_items = i16::MAX as usize`.
    pub fn splice(self, max_items: usize) -> Vec<WigSection> {
        assert!(max_items > 0);
        if self.item_count() <= max_items {
            return vec![self];
        }
        match self {
            WigSection::FixedStep(s) => s
                .values
                .chunks(max_items)
                .enumerate()
                .map(|(i, chunk)| {
                    WigSection::FixedStep(FixedStepSection {
                        chrom: s.chrom.clone(),
                        start: s.start + (i * max_items) as u32 * s.step,
                        step: s.step,
                        span: s.span,
                        values: chunk.to_vec(),
                    })
                })
                .collect(),
            WigSection::VariableStep(s) => s
                .positions
                .chunks(max_items)
                .zip(s.values.chunks(max_items))
                .map(|(positions, values)| {
                    WigSection::VariableStep(VariableStepSection {
                        chrom: s.chrom.clone(),
                        span: s.span,
                        positions: positions.to_vec(),
                        values: values.to_vec(),
                    })
                })
                .collect(),
            WigSection::BedGraph(s) => s
                .ranges
                .chunks(max_items)
                .map(|ranges| {
                    WigSection::BedGraph(BedGraphSection {
                        chrom: s.chrom.clone(),
                        ranges: ranges.to_vec(),
                    })
                })
                .collect(),
        }
    }
}

/// Cooperative cancellation for queries and writes.
///
/// The flag is checked at index recursion boundaries and between data
/// blocks; a raised flag surfaces as a `Cancelled` error. Partial outputs of
/// a cancelled write must be discarded by the caller.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub(crate) fn check_cancel<E: From<CancelledError>>(cancel: Option<&CancelToken>) -> Result<(), E> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(CancelledError.into()),
        _ => Ok(()),
    }
}

/// Marker for a raised [`CancelToken`], converted into the `Cancelled`
/// variant of the read or write error by the caller.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CancelledError;

pub use bbiread::*;
pub use bbiwrite::*;
pub use bigbedread::*;
pub use bigbedwrite::*;
pub use bigwigread::*;
pub use bigwigwrite::*;
pub use bpt::{BPTreeHeader, BPTreeLeaf};
pub use rtree::Block;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_monoid() {
        let a = BigSummary {
            count: 10,
            min_val: -1.0,
            max_val: 3.0,
            sum: 12.0,
            sum_squares: 40.0,
        };
        let b = BigSummary {
            count: 5,
            min_val: 0.5,
            max_val: 9.0,
            sum: 7.0,
            sum_squares: 11.0,
        };
        let c = BigSummary {
            count: 2,
            min_val: -4.0,
            max_val: 0.0,
            sum: -6.0,
            sum_squares: 18.0,
        };

        let mut ab_c = a;
        ab_c.merge(&b);
        ab_c.merge(&c);

        let mut bc = b;
        bc.merge(&c);
        let mut a_bc = a;
        a_bc.merge(&bc);

        assert_eq!(ab_c, a_bc);

        let mut a_empty = a;
        a_empty.merge(&BigSummary::empty());
        assert_eq!(a_empty, a);

        let mut empty_a = BigSummary::empty();
        empty_a.merge(&a);
        assert_eq!(empty_a, a);
    }

    #[test]
    fn test_splice_fixed_step() {
        let section = WigSection::FixedStep(FixedStepSection {
            chrom: "chr1".to_string(),
            start: 100,
            step: 5,
            span: 2,
            values: (0..7).map(|i| i as f32).collect(),
        });
        let spliced = section.splice(3);
        assert_eq!(spliced.len(), 3);
        match &spliced[1] {
            WigSection::FixedStep(s) => {
                assert_eq!(s.start, 115);
                assert_eq!(s.values, vec![3.0, 4.0, 5.0]);
            }
            _ => panic!("expected fixed step"),
        }
        match &spliced[2] {
            WigSection::FixedStep(s) => {
                assert_eq!(s.start, 130);
                assert_eq!(s.values, vec![6.0]);
            }
            _ => panic!("expected fixed step"),
        }
    }

    #[test]
    fn test_splice_variable_step() {
        let section = WigSection::VariableStep(VariableStepSection {
            chrom: "chr1".to_string(),
            span: 1,
            positions: vec![1, 5, 9, 14],
            values: vec![1.0, 2.0, 3.0, 4.0],
        });
        let spliced = section.splice(3);
        assert_eq!(spliced.len(), 2);
        assert_eq!(spliced[0].item_count(), 3);
        assert_eq!(spliced[1].start(), 14);
        assert_eq!(spliced[1].end(), 15);
    }

    #[test]
    fn test_section_bounds() {
        let section = WigSection::FixedStep(FixedStepSection {
            chrom: "chrX".to_string(),
            start: 10,
            step: 5,
            span: 2,
            values: vec![1.0, 2.0, 3.0, 4.0],
        });
        assert_eq!(section.start(), 10);
        assert_eq!(section.end(), 27);
    }
}
