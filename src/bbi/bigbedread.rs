/*!
Provides the interface for reading bigBed files.

## Example
```rust, no_run
# use std::error::Error;
# use bbifile::BigBedRead;
# fn main() -> Result<(), Box<dyn Error>> {
let mut bbread = BigBedRead::open_file("example.bigBed")?;

// Entries fully contained in chr1:10000-11000
for entry in bbread.query("chr1", 10000, 11000, false, None)? {
    let entry = entry?;
    println!("{}\t{}\t{}\t{}", entry.chrom, entry.start, entry.end, entry.rest);
}
# Ok(())
# }
```
*/
use std::io::{self, Cursor};
use std::path::Path;
use std::vec;

use byteordered::{ByteOrdered, Endianness};

use crate::bbi::bbiread::{
    decode_zoom_block, read_autosql, read_info, read_total_summary, search_cir_tree,
    zoom_index_offset, BBIFileInfo, BBIReadError, BlockBuffers, ChromInfo, ZoomIntervalError,
};
use crate::bbi::rtree::Block;
use crate::bbi::summarize::{self, BinnedSummaries};
use crate::bbi::{check_cancel, BBIFile, BedEntry, BigSummary, CancelToken, Summary, ZoomRecord};
use crate::utils::file::{Reopen, ReopenableFile, SeekableRead};

/// The struct used to read a bigBed file
pub struct BigBedRead<R> {
    pub(crate) info: BBIFileInfo,
    pub(crate) read: R,
    pub(crate) buffers: BlockBuffers,
}

impl<R: Reopen> Reopen for BigBedRead<R> {
    fn reopen(&self) -> io::Result<Self> {
        Ok(BigBedRead {
            info: self.info.clone(),
            read: self.read.reopen()?,
            buffers: BlockBuffers::default(),
        })
    }
}

impl<R> BigBedRead<R> {
    /// Gets basic info about this bigBed
    pub fn info(&self) -> &BBIFileInfo {
        &self.info
    }

    /// Gets the chromosomes present in this bigBed
    pub fn chroms(&self) -> &[ChromInfo] {
        &self.info.chrom_info
    }

    pub(crate) fn with_info(info: BBIFileInfo, read: R) -> Self {
        BigBedRead {
            info,
            read,
            buffers: BlockBuffers::default(),
        }
    }
}

impl BigBedRead<ReopenableFile> {
    /// Opens a new `BigBedRead` from a given path as a file.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        BigBedRead::open(ReopenableFile::open(path.as_ref())?)
    }
}

impl<R: SeekableRead> BigBedRead<R> {
    /// Opens a new `BigBedRead` for a given type that implements both `Read`
    /// and `Seek`
    pub fn open(mut read: R) -> Result<Self, BBIReadError> {
        let info = read_info(&mut read)?;
        match info.filetype {
            BBIFile::BigBed => {}
            _ => return Err(BBIReadError::WrongFileType),
        }
        Ok(BigBedRead::with_info(info, read))
    }

    /// Returns the total summary data from the bigBed.
    pub fn get_summary(&mut self) -> io::Result<Summary> {
        read_total_summary(&mut self.read, &self.info)
    }

    /// Returns the autosql schema string stored in the file, if any.
    pub fn autosql(&mut self) -> Result<Option<String>, BBIReadError> {
        read_autosql(&mut self.read, &self.info)
    }

    /// For a given chromosome and interval, returns an `Iterator` of the
    /// matching [`BedEntry`]s in on-disk order. With `overlaps` false only
    /// entries fully contained in `[start, end)` match; with `overlaps` true
    /// any intersecting entry matches. An unknown chromosome yields an empty
    /// iterator.
    pub fn query<'a>(
        &'a mut self,
        chrom_name: &str,
        start: u32,
        end: u32,
        overlaps: bool,
        cancel: Option<&'a CancelToken>,
    ) -> Result<EntriesIter<'a, R>, BBIReadError> {
        let (blocks, chrom) = match self.info.resolve_chrom_id(&mut self.read, chrom_name)? {
            None => (vec![], 0),
            Some(chrom) => {
                let blocks = search_cir_tree(
                    &mut self.read,
                    self.info.header.endianness,
                    self.info.header.full_index_offset,
                    chrom,
                    start,
                    end,
                    cancel,
                )?;
                (blocks, chrom)
            }
        };
        Ok(EntriesIter {
            bigbed: self,
            chrom_name: chrom_name.to_string(),
            blocks: blocks.into_iter(),
            entries: None,
            chrom,
            start,
            end,
            overlaps,
            cancel,
        })
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
    /// on the best-fitting zoom level when one is coarse enough. Entries
    /// count 1.0 per covered base. Empty bins are zero summaries.
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

    /// Like [`BigBedRead::summarize`], but sparse: only non-empty bins are
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
                    for (entry_start, entry_end) in
                        decode_block_intervals(endianness, data, chrom)?
                    {
                        grid.add_value(entry_start, entry_end, 1.0);
                    }
                }
            }
        }
        Ok(grid)
    }
}

/// An iterator over the entries of a query, block by block.
pub struct EntriesIter<'a, R> {
    bigbed: &'a mut BigBedRead<R>,
    chrom_name: String,
    blocks: vec::IntoIter<Block>,
    entries: Option<vec::IntoIter<BedEntry>>,
    chrom: u32,
    start: u32,
    end: u32,
    overlaps: bool,
    cancel: Option<&'a CancelToken>,
}

impl<'a, R: SeekableRead> Iterator for EntriesIter<'a, R> {
    type Item = Result<BedEntry, BBIReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.entries {
                Some(entries) => match entries.next() {
                    Some(entry) => return Some(Ok(entry)),
                    None => self.entries = None,
                },
                None => {
                    let current_block = self.blocks.next()?;
                    if let Err(e) = check_cancel::<BBIReadError>(self.cancel) {
                        return Some(Err(e));
                    }
                    let bigbed = &mut *self.bigbed;
                    let data = match bigbed.buffers.block_data(
                        &mut bigbed.read,
                        &bigbed.info,
                        &current_block,
                    ) {
                        Ok(data) => data,
                        Err(e) => return Some(Err(e)),
                    };
                    match decode_block_entries(
                        bigbed.info.header.endianness,
                        data,
                        &self.chrom_name,
                        self.chrom,
                        self.start,
                        self.end,
                        self.overlaps,
                    ) {
                        Ok(entries) => self.entries = Some(entries.into_iter()),
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }
}

/// Decodes the entries of one data block that match the query. All entries
/// in a block share one chromosome; a block belonging to another chromosome
/// decodes to nothing.
fn decode_block_entries(
    endianness: Endianness,
    data: &[u8],
    chrom_name: &str,
    chrom: u32,
    start: u32,
    end: u32,
    overlaps: bool,
) -> Result<Vec<BedEntry>, BBIReadError> {
    let mut entries = Vec::new();
    let mut cursor = Cursor::new(data);
    let mut block_chrom: Option<u32> = None;
    while (cursor.position() as usize) < data.len() {
        let mut reader = ByteOrdered::runtime(&mut cursor, endianness);
        let chrom_id = reader.read_u32()?;
        let entry_start = reader.read_u32()?;
        let entry_end = reader.read_u32()?;
        let mut rest = Vec::new();
        loop {
            let byte = reader.read_u8()?;
            if byte == b'\0' {
                break;
            }
            rest.push(byte);
        }
        match block_chrom {
            None => block_chrom = Some(chrom_id),
            Some(block_chrom) if block_chrom != chrom_id => {
                return Err(BBIReadError::InvalidFile(
                    "bed data block contains multiple chromosomes".to_string(),
                ));
            }
            Some(_) => {}
        }
        if chrom_id != chrom {
            return Ok(vec![]);
        }
        let matches = if overlaps {
            entry_end > start && entry_start < end
        } else {
            entry_start >= start && entry_end <= end
        };
        if matches {
            let rest = String::from_utf8(rest).map_err(|_| {
                BBIReadError::InvalidFile("bed entry is not valid UTF-8".to_string())
            })?;
            entries.push(BedEntry {
                chrom: chrom_name.to_string(),
                start: entry_start,
                end: entry_end,
                rest,
            });
        }
    }
    Ok(entries)
}

/// Decodes only the intervals of one data block, for aggregation.
fn decode_block_intervals(
    endianness: Endianness,
    data: &[u8],
    chrom: u32,
) -> Result<Vec<(u32, u32)>, BBIReadError> {
    let mut intervals = Vec::new();
    let mut cursor = Cursor::new(data);
    while (cursor.position() as usize) < data.len() {
        let mut reader = ByteOrdered::runtime(&mut cursor, endianness);
        let chrom_id = reader.read_u32()?;
        let entry_start = reader.read_u32()?;
        let entry_end = reader.read_u32()?;
        loop {
            if reader.read_u8()? == b'\0' {
                break;
            }
        }
        if chrom_id == chrom {
            intervals.push((entry_start, entry_end));
        }
    }
    Ok(intervals)
}
