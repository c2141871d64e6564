/*!
Provides the interface for reading bigWig files.

## Example
```rust, no_run
# use std::error::Error;
# use bbifile::BigWigRead;
# fn main() -> Result<(), Box<dyn Error>> {
// First, we open a bigWig using a file name.
let mut bwread = BigWigRead::open_file("example.bigWig")?;

// Then, we could get the chromosomes and lengths.
let chroms = bwread.chroms().to_vec();

// We can get summary data, ...
let summary = bwread.get_summary()?;

// ... the sections intersecting an interval, ...
let sections = bwread.query("chr17", 0, 59899, true, None)?;

// ... or the individual values overlapping an interval.
for interval in bwread.get_interval("chr17", 0, 59899)? {
    let interval = interval?;
    println!("{}..{} = {}", interval.start, interval.end, interval.value);
}
# Ok(())
# }
```
*/
use std::io;
use std::io::Read;
use std::path::Path;
use std::vec;

use byteordered::{ByteOrdered, Endianness};

use crate::bbi::bbiread::{
    decode_zoom_block, read_info, read_total_summary, search_cir_tree, zoom_index_offset,
    BBIFileInfo, BBIReadError, BlockBuffers, ChromInfo, ZoomIntervalError,
};
use crate::bbi::rtree::Block;
use crate::bbi::summarize::{self, BinnedSummaries};
use crate::bbi::{
    check_cancel, BBIFile, BedGraphSection, BigSummary, CancelToken, FixedStepSection, Summary,
    Value, VariableStepSection, WigSection, ZoomRecord,
};
use crate::utils::file::{Reopen, ReopenableFile, SeekableRead};

pub(crate) const WIG_TYPE_BED_GRAPH: u8 = 1;
pub(crate) const WIG_TYPE_VARIABLE_STEP: u8 = 2;
pub(crate) const WIG_TYPE_FIXED_STEP: u8 = 3;

/// The struct used to read a bigWig file
pub struct BigWigRead<R> {
    pub(crate) info: BBIFileInfo,
    pub(crate) read: R,
    pub(crate) buffers: BlockBuffers,
}

impl<R: Reopen> Reopen for BigWigRead<R> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(BigWigRead {
            info: self.info.clone(),
            read: self.read.reopen()?,
            buffers: BlockBuffers::default(),
        })
    }
}

impl<R> BigWigRead<R> {
    /// Gets basic info about this bigWig
    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    /// Gets the chromosomes present in this bigWig
    pub fn chroms(&self) -> &[ChromInfo] {
        &self.info.chrom_info
    }

    /// Does *not* check if the passed `R` matches the provided info (not
    /// even that the `R` is a bigWig at all!)
    pub(crate) fn with_info(info: BBIFileInfo, read: R) -> Self {
        BigWigRead {
            info,
            read,
            buffers: BlockBuffers::default(),
        }
    }
}

impl BigWigRead<ReopenableFile> {
    /// Opens a new `BigWigRead` from a given path as a file.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        BigWigRead::open(ReopenableFile::open(path.as_ref())?)
    }
}

impl<R: SeekableRead> BigWigRead<R> {
    /// Opens a new `BigWigRead` for a given type that implements both `Read`
    /// and `Seek`
    pub fn open(mut read: R) -> Result<Self, BBIReadError> {
        let info = read_info(&mut read)?;
        match info.filetype {
            BBIFile::BigWig => {}
            _ => return Err(BBIReadError::WrongFileType),
        }
        Ok(BigWigRead::with_info(info, read))
    }

    /// Returns the total summary data from the bigWig.
    ///
    /// Note: for version 1 files there is no total summary, and all fields
    /// except the item count are zero.
    pub fn get_summary(&mut self) -> io::Result<Summary> {
        read_total_summary(&mut self.read, &self.info)
    }

    /// For a given chromosome and interval, returns the [`WigSection`]s
    /// whose matching values intersect it, clipped down to the matching
    /// values. With `overlaps` false only values fully contained in
    /// `[start, end)` match; with `overlaps` true any intersecting value
    /// matches. An unknown chromosome yields an empty result.
    pub fn query(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        overlaps: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<WigSection>, BBIReadError> {
        let chrom = match self.info.resolve_chrom_id(&mut self.read, chrom_name)? {
            Some(chrom) => chrom,
            None => return Ok(vec![]),
        };
        let endianness = self.info.header.endianness;
        let blocks = search_cir_tree(
            &mut self.read,
            endianness,
            self.info.header.full_index_offset,
            chrom,
            start,
            end,
            cancel,
        )?;
        let mut sections = Vec::with_capacity(blocks.len());
        for block in blocks {
            check_cancel::<BBIReadError>(cancel)?;
            let data = self
                .buffers
                .block_data(&mut self.read, &self.info, &block)?;
            let section = clip_block_to_section(
                endianness, data, chrom_name, chrom, start, end, overlaps,
            )?;
            sections.extend(section);
        }
        Ok(sections)
    }

    /// For a given chromosome, start, and end, returns an `Iterator` of the
    /// intersecting [`Value`]s, clamped to the queried interval. The
    /// resulting iterator takes a mutable reference of this `BigWigRead`.
    pub fn get_interval(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
    ) -> Result<IntervalIter<'_, R>, BBIReadError> {
        let blocks = match self.info.resolve_chrom_id(&mut self.read, chrom_name)? {
            None => (vec![], 0),
            Some(chrom) => {
                let blocks = search_cir_tree(
                    &mut self.read,
                    self.info.header.endianness,
                    self.info.header.full_index_offset,
                    chrom,
                    start,
                    end,
                    None,
                )?;
                (blocks, chrom)
            }
        };
        Ok(IntervalIter {
            bigwig: self,
            blocks: blocks.0.into_iter(),
            vals: None,
            chrom: blocks.1,
            start,
            end,
        })
    }

    /// Returns the values between `start` and `end` as a `Vec<f32>`. Any
    /// positions with no data in the bigWig will be `f32::NAN`.
    pub fn values(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
    ) -> Result<Vec<f32>, BBIReadError> {
        let mut values = vec![f32::NAN; (end - start) as usize];
        for interval in self.get_interval(chrom_name, start, end)? {
            let interval = interval?;
            let interval_start = (interval.start - start) as usize;
            let interval_end = (interval.end - start) as usize;
            for value in &mut values[interval_start..interval_end] {
                *value = interval.value;
            }
        }
        Ok(values)
    }

    /// For a given chromosome and interval, returns the intersecting
    /// [`ZoomRecord`]s of the zoom level with the given reduction level.
    pub fn get_zoom_interval(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        reduction_level: u32,
    ) -> Result<Vec<ZoomRecord>, ZoomIntervalError> {
        let index_offset = zoom_index_offset(&self.info, reduction_level)?;
        let chrom = match self.info.resolve_chrom_id(&mut self.read, chrom_name)? {
            Some(chrom) => chrom,
            None => return Ok(vec![]),
        };
        let endianness = self.info.header.endianness;
        let blocks = search_cir_tree(
            &mut self.read,
            endianness,
            index_offset,
            chrom,
            start,
            end,
            None,
        )?;
        let mut records = Vec::new();
        for block in blocks {
            let data = self
                .buffers
                .block_data(&mut self.read, &self.info, &block)
                .map_err(ZoomIntervalError::BBIReadError)?;
            records.extend(decode_zoom_block(endianness, data, chrom, start, end)?);
        }
        Ok(records)
    }

    /// Summarizes `[start, end)` over `num_bins` equal-width bins, drawing
    /// on the best-fitting zoom level when one is coarse enough. Empty bins
    /// are zero summaries.
    pub fn summarize(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        num_bins: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<BigSummary>, BBIReadError> {
        Ok(self
            .summarize_impl(chrom_name, start, end, num_bins, cancel)?
            .dense())
    }

    /// Like [`BigWigRead::summarize`], but sparse: only non-empty bins are
    /// returned, paired with their bin index.
    pub fn summarize_indexed(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        num_bins: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<(u32, BigSummary)>, BBIReadError> {
        Ok(self
            .summarize_impl(chrom_name, start, end, num_bins, cancel)?
            .sparse())
    }

    fn summarize_impl(
        &mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        num_bins: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<BinnedSummaries, BBIReadError> {
        summarize::validate_bins(start, end, num_bins)?;
        let chrom = match self.info.resolve_chrom_id(&mut self.read, chrom_name)? {
            Some(chrom) => chrom,
            None => return Ok(BinnedSummaries::empty(start, end, num_bins)),
        };
        let endianness = self.info.header.endianness;
        let mut grid = BinnedSummaries::empty(start, end, num_bins);
        match summarize::pick_zoom_level(&self.info.zoom_headers, start, end, num_bins) {
            Some(zoom) => {
                let blocks = search_cir_tree(
                    &mut self.read,
                    endianness,
                    zoom.index_offset,
                    chrom,
                    start,
                    end,
                    cancel,
                )?;
                for block in blocks {
                    check_cancel::<BBIReadError>(cancel)?;
                    let data = self
                        .buffers
                        .block_data(&mut self.read, &self.info, &block)?;
                    for record in decode_zoom_block(endianness, data, chrom, start, end)? {
                        grid.add_zoom_record(&record);
                    }
                }
            }
            None => {
                let blocks = search_cir_tree(
                    &mut self.read,
                    endianness,
                    self.info.header.full_index_offset,
                    chrom,
                    start,
                    end,
                    cancel,
                )?;
                for block in blocks {
                    check_cancel::<BBIReadError>(cancel)?;
                    let data = self
                        .buffers
                        .block_data(&mut self.read, &self.info, &block)?;
                    let values = decode_block_values(endianness, data, chrom, start, end)?;
                    for value in values.into_iter().flatten() {
                        grid.add_value(value.start, value.end, f64::from(value.value));
                    }
                }
            }
        }
        Ok(grid)
    }
}

/// An iterator over the flat values of a query, block by block.
pub struct IntervalIter<'a, R> {
    bigwig: &'a mut BigWigRead<R>,
    blocks: vec::IntoIter<Block>,
    vals: Option<vec::IntoIter<Value>>,
    chrom: u32,
    start: u32,
    end: u32,
}

impl<'a, R: SeekableRead> Iterator for IntervalIter<'a, R> {
    type Item = Result<Value, BBIReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.vals {
                Some(vals) => match vals.next() {
                    Some(v) => return Some(Ok(v)),
                    None => self.vals = None,
                },
                None => {
                    let current_block = self.blocks.next()?;
                    let bigwig = &mut *self.bigwig;
                    let data = match bigwig.buffers.block_data(
                        &mut bigwig.read,
                        &bigwig.info,
                        &current_block,
                    ) {
                        Ok(data) => data,
                        Err(e) => return Some(Err(e)),
                    };
                    match decode_block_values(
                        bigwig.info.header.endianness,
                        data,
                        self.chrom,
                        self.start,
                        self.end,
                    ) {
                        Ok(Some(vals)) => self.vals = Some(vals.into_iter()),
                        Ok(None) => {}
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }
}

struct WigBlockHeader {
    chrom_id: u32,
    start: u32,
    step: u32,
    span: u32,
    section_type: u8,
    item_count: u16,
}

fn read_wig_block_header<R: io::Read>(
    reader: &mut ByteOrdered<R, Endianness>,
) -> io::Result<WigBlockHeader> {
    let chrom_id = reader.read_u32()?;
    let start = reader.read_u32()?;
    let _end = reader.read_u32()?;
    let step = reader.read_u32()?;
    let span = reader.read_u32()?;
    let section_type = reader.read_u8()?;
    let _reserved = reader.read_u8()?;
    let item_count = reader.read_u16()?;
    Ok(WigBlockHeader {
        chrom_id,
        start,
        step,
        span,
        section_type,
        item_count,
    })
}

/// Decodes the values of one data block, clamped to `[start, end)`. Returns
/// `None` if the block belongs to another chromosome.
fn decode_block_values(
    endianness: Endianness,
    data: &[u8],
    chrom: u32,
    start: u32,
    end: u32,
) -> Result<Option<Vec<Value>>, BBIReadError> {
    let mut reader = ByteOrdered::runtime(data, endianness);
    let header = read_wig_block_header(&mut reader)?;
    if header.chrom_id != chrom {
        return Ok(None);
    }

    let mut values: Vec<Value> = Vec::with_capacity(header.item_count as usize);
    let mut push = |value_start: u32, value_end: u32, value: f32| {
        if value_end > start && value_start < end {
            values.push(Value {
                start: value_start.max(start),
                end: value_end.min(end),
                value,
            });
        }
    };

    match header.section_type {
        WIG_TYPE_BED_GRAPH => {
            for _ in 0..header.item_count {
                let value_start = reader.read_u32()?;
                let value_end = reader.read_u32()?;
                let value = reader.read_f32()?;
                push(value_start, value_end, value);
            }
        }
        WIG_TYPE_VARIABLE_STEP => {
            for _ in 0..header.item_count {
                let value_start = reader.read_u32()?;
                let value = reader.read_f32()?;
                push(value_start, value_start + header.span, value);
            }
        }
        WIG_TYPE_FIXED_STEP => {
            let mut curr_start = header.start;
            for _ in 0..header.item_count {
                let value = reader.read_f32()?;
                push(curr_start, curr_start + header.span, value);
                curr_start += header.step;
            }
        }
        n => {
            return Err(BBIReadError::InvalidFile(format!(
                "unknown bigWig section type: {}",
                n
            )))
        }
    }

    Ok(Some(values))
}

/// Clips one data block to the values matching the query, as a section.
/// Each data block holds exactly one wiggle section, so the clipped result
/// (if any values match) is a section again.
fn clip_block_to_section(
    endianness: Endianness,
    data: &[u8],
    chrom_name: &str,
    chrom: u32,
    start: u32,
    end: u32,
    overlaps: bool,
) -> Result<Option<WigSection>, BBIReadError> {
    let mut reader = ByteOrdered::runtime(data, endianness);
    let header = read_wig_block_header(&mut reader)?;
    if header.chrom_id != chrom {
        return Ok(None);
    }
    let matches = |value_start: u32, value_end: u32| {
        if overlaps {
            value_end > start && value_start < end
        } else {
            value_start >= start && value_end <= end
        }
    };

    let section = match header.section_type {
        WIG_TYPE_BED_GRAPH => {
            let mut ranges = Vec::new();
            for _ in 0..header.item_count {
                let value_start = reader.read_u32()?;
                let value_end = reader.read_u32()?;
                let value = reader.read_f32()?;
                if matches(value_start, value_end) {
                    ranges.push(Value {
                        start: value_start,
                        end: value_end,
                        value,
                    });
                }
            }
            if ranges.is_empty() {
                return Ok(None);
            }
            WigSection::BedGraph(BedGraphSection {
                chrom: chrom_name.to_string(),
                ranges,
            })
        }
        WIG_TYPE_VARIABLE_STEP => {
            let mut positions = Vec::new();
            let mut values = Vec::new();
            for _ in 0..header.item_count {
                let value_start = reader.read_u32()?;
                let value = reader.read_f32()?;
                if matches(value_start, value_start + header.span) {
                    positions.push(value_start);
                    values.push(value);
                }
            }
            if positions.is_empty() {
                return Ok(None);
            }
            WigSection::VariableStep(VariableStepSection {
                chrom: chrom_name.to_string(),
                span: header.span,
                positions,
                values,
            })
        }
        WIG_TYPE_FIXED_STEP => {
            // Realign to the step grid: skip directly to the first on-grid
            // interval that can match, keeping every emitted interval at an
            // offset congruent to `start mod step`.
            if header.item_count == 0 {
                return Ok(None);
            }
            let span = header.span;
            let step = header.step.max(1);
            let first = {
                let lo = if overlaps {
                    start.saturating_add(1).saturating_sub(span)
                } else {
                    start
                };
                if lo <= header.start {
                    0
                } else {
                    (lo - header.start).div_ceil(step)
                }
            };
            let last = {
                let hi = if overlaps {
                    // last interval start strictly before the query end
                    end.checked_sub(1)
                } else {
                    end.checked_sub(span)
                };
                match hi {
                    None => return Ok(None),
                    Some(hi) if hi < header.start => return Ok(None),
                    Some(hi) => ((hi - header.start) / step).min(u32::from(header.item_count) - 1),
                }
            };
            if first > last {
                return Ok(None);
            }
            let mut values = Vec::with_capacity((last - first + 1) as usize);
            let mut skip = vec![0u8; (first * 4) as usize];
            reader.read_exact(&mut skip)?;
            for _ in first..=last {
                values.push(reader.read_f32()?);
            }
            WigSection::FixedStep(FixedStepSection {
                chrom: chrom_name.to_string(),
                start: header.start + first * step,
                step: header.step,
                span: header.span,
                values,
            })
        }
        n => {
            return Err(BBIReadError::InvalidFile(format!(
                "unknown bigWig section type: {}",
                n
            )))
        }
    };
    Ok(Some(section))
}
