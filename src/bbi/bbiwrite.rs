use std::collections::HashMap;
use std::io::{self, Seek, SeekFrom, Write};

use byteordered::{ByteOrdered, Endianness};
use thiserror::Error;

use crate::bbi::bbiread::BBIReadError;
use crate::bbi::bpt::BPTreeLeaf;
use crate::bbi::{CancelledError, Summary, WigSection, ZoomHeader, ZoomRecord};
use crate::bbi::bigwigread::{WIG_TYPE_FIXED_STEP, WIG_TYPE_VARIABLE_STEP};

/// The block compression applied to data sections.
///
/// `Deflate` produces files readable by any bigWig/bigBed consumer.
/// `Snappy` is faster but private to this library; it bumps the file
/// version to 5, which other readers reject.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compression {
    None,
    Deflate,
    Snappy,
}

/// The default items per slot used when writing a bbi file
pub const DEFAULT_ITEMS_PER_SLOT: u32 = 1024;
/// The default items per slot of zoom level data blocks
pub const DEFAULT_ZOOM_ITEMS_PER_SLOT: u32 = 512;
/// The default block size of the interval index
pub const DEFAULT_BLOCK_SIZE: u32 = 256;
/// The default maximum count of zoom levels
pub const DEFAULT_MAX_ZOOMS: u32 = 8;

/// Options for writing to a bbi file
#[derive(Copy, Clone, Debug)]
pub struct BBIWriteOptions {
    pub compression: Compression,
    pub items_per_slot: u32,
    pub zoom_items_per_slot: u32,
    pub block_size: u32,
    pub max_zooms: u32,
    pub endianness: Endianness,
}

impl Default for BBIWriteOptions {
    fn default() -> Self {
        BBIWriteOptions {
            compression: Compression::Snappy,
            items_per_slot: DEFAULT_ITEMS_PER_SLOT,
            zoom_items_per_slot: DEFAULT_ZOOM_ITEMS_PER_SLOT,
            block_size: DEFAULT_BLOCK_SIZE,
            max_zooms: DEFAULT_MAX_ZOOMS,
            endianness: Endianness::native(),
        }
    }
}

impl BBIWriteOptions {
    pub(crate) fn version(&self) -> u16 {
        match self.compression {
            Compression::Snappy => 5,
            Compression::None | Compression::Deflate => 4,
        }
    }
}

/// Possible errors encountered when writing a bbi file
#[derive(Error, Debug)]
pub enum BBIWriteError {
    #[error("input not sorted by (chrom, start): {0}")]
    OrderingViolation(String),
    #[error("bedGraph sections cannot be written to a bigWig")]
    UnsupportedSection,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("error reading back written data: {0}")]
    ReadError(#[from] BBIReadError),
    #[error("error occurred: {0}")]
    IoError(#[from] io::Error),
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<CancelledError> for BBIWriteError {
    fn from(_: CancelledError) -> Self {
        BBIWriteError::Cancelled
    }
}

/// One written data block: where it landed and what it covers.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Section {
    pub(crate) chrom: u32,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// An encoded, possibly compressed data block, not yet positioned.
#[derive(Debug)]
pub(crate) struct SectionData {
    pub(crate) chrom: u32,
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) data: Vec<u8>,
    pub(crate) uncompressed_size: usize,
}

impl SectionData {
    /// Writes the block at the writer's current position and returns its
    /// section record.
    pub(crate) fn write<W: Write + Seek>(self, file: &mut W) -> io::Result<Section> {
        let offset = file.seek(SeekFrom::Current(0))?;
        file.write_all(&self.data)?;
        Ok(Section {
            chrom: self.chrom,
            start: self.start,
            end: self.end,
            offset,
            size: self.data.len() as u64,
        })
    }
}

fn compress(compression: Compression, bytes: Vec<u8>) -> (Vec<u8>, usize) {
    match compression {
        Compression::None => (bytes, 0),
        Compression::Deflate => {
            use libdeflater::{CompressionLvl, Compressor};
            let mut compressor = Compressor::new(CompressionLvl::default());
            let max_sz = compressor.zlib_compress_bound(bytes.len());
            let mut compressed_data = vec![0; max_sz];
            let actual_sz = compressor
                .zlib_compress(&bytes, &mut compressed_data)
                .unwrap();
            compressed_data.resize(actual_sz, 0);
            (compressed_data, bytes.len())
        }
        Compression::Snappy => {
            let mut encoder = snap::raw::Encoder::new();
            let compressed_data = encoder.compress_vec(&bytes).unwrap();
            (compressed_data, bytes.len())
        }
    }
}

pub(crate) fn encode_bed_section(
    options: BBIWriteOptions,
    chrom_id: u32,
    items: &[(u32, u32, String)],
) -> io::Result<SectionData> {
    let mut bytes = Vec::with_capacity(items.len() * 30);

    let start = items[0].0;
    let end = items.iter().map(|i| i.1).max().unwrap();

    let mut writer = ByteOrdered::runtime(&mut bytes, options.endianness);
    for (item_start, item_end, rest) in items.iter() {
        writer.write_u32(chrom_id)?;
        writer.write_u32(*item_start)?;
        writer.write_u32(*item_end)?;
        writer.write_all(rest.as_bytes())?;
        writer.write_all(&[b'\0'])?;
    }

    let (data, uncompressed_size) = compress(options.compression, bytes);
    Ok(SectionData {
        chrom: chrom_id,
        start,
        end,
        data,
        uncompressed_size,
    })
}

/// Encodes one wiggle section as a data block. The section must be
/// non-empty, spliced below the `u16` item count limit, and must not be a
/// bedGraph section.
pub(crate) fn encode_wig_section(
    options: BBIWriteOptions,
    chrom_id: u32,
    section: &WigSection,
) -> io::Result<SectionData> {
    let start = section.start();
    let end = section.end();
    let item_count = section.item_count();
    debug_assert!(item_count > 0 && item_count <= u16::MAX as usize);

    let mut bytes = Vec::with_capacity(24 + item_count * 8);
    let mut writer = ByteOrdered::runtime(&mut bytes, options.endianness);
    writer.write_u32(chrom_id)?;
    writer.write_u32(start)?;
    writer.write_u32(end)?;
    match section {
        WigSection::FixedStep(s) => {
            writer.write_u32(s.step)?;
            writer.write_u32(s.span)?;
            writer.write_u8(WIG_TYPE_FIXED_STEP)?;
            writer.write_u8(0)?;
            writer.write_u16(item_count as u16)?;
            for value in &s.values {
                writer.write_f32(*value)?;
            }
        }
        WigSection::VariableStep(s) => {
            writer.write_u32(0)?;
            writer.write_u32(s.span)?;
            writer.write_u8(WIG_TYPE_VARIABLE_STEP)?;
            writer.write_u8(0)?;
            writer.write_u16(item_count as u16)?;
            for (position, value) in s.positions.iter().zip(s.values.iter()) {
                writer.write_u32(*position)?;
                writer.write_f32(*value)?;
            }
        }
        WigSection::BedGraph(_) => unreachable!("bedGraph sections are rejected before encoding"),
    }

    let (data, uncompressed_size) = compress(options.compression, bytes);
    Ok(SectionData {
        chrom: chrom_id,
        start,
        end,
        data,
        uncompressed_size,
    })
}

pub(crate) fn encode_zoom_section(
    options: BBIWriteOptions,
    items: &[ZoomRecord],
) -> io::Result<SectionData> {
    let mut bytes = Vec::with_capacity(items.len() * 32);

    let start = items[0].start;
    let end = items.iter().map(|i| i.end).max().unwrap();
    let chrom = items[0].chrom;

    let mut writer = ByteOrdered::runtime(&mut bytes, options.endianness);
    for item in items.iter() {
        debug_assert_eq!(item.chrom, chrom);
        writer.write_u32(item.chrom)?;
        writer.write_u32(item.start)?;
        writer.write_u32(item.end)?;
        writer.write_u32(item.summary.count as u32)?;
        writer.write_f32(item.summary.min_val as f32)?;
        writer.write_f32(item.summary.max_val as f32)?;
        writer.write_f32(item.summary.sum as f32)?;
        writer.write_f32(item.summary.sum_squares as f32)?;
    }

    let (data, uncompressed_size) = compress(options.compression, bytes);
    Ok(SectionData {
        chrom,
        start,
        end,
        data,
        uncompressed_size,
    })
}

pub(crate) fn write_blank_headers<W: Write + Seek>(
    file: &mut W,
    max_zooms: u32,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    // Common header
    file.write_all(&[0; 64])?;
    // Zoom level slots
    file.write_all(&vec![0; max_zooms as usize * 24])?;
    Ok(())
}

/// Byte offset of the zoom level count within the header.
const ZOOM_LEVELS_OFFSET: u64 = 6;
/// Byte offset of the uncompress buffer size within the header.
const UNCOMPRESS_BUF_SIZE_OFFSET: u64 = 52;
/// The zoom descriptor slots follow the fixed header.
const ZOOM_HEADERS_OFFSET: u64 = 64;

#[allow(clippy::too_many_arguments)]
pub(crate) fn write_info<W: Write + Seek>(
    file: &mut W,
    options: BBIWriteOptions,
    magic: u32,
    chrom_index_start: u64,
    full_data_offset: u64,
    index_start: u64,
    field_count: u16,
    defined_field_count: u16,
    total_summary_offset: u64,
    uncompress_buf_size: u32,
    data_count: u64,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u32(magic)?;
    writer.write_u16(options.version())?;
    writer.write_u16(0)?; // zoom levels, patched after the pyramid is built
    writer.write_u64(chrom_index_start)?;
    writer.write_u64(full_data_offset)?;
    writer.write_u64(index_start)?;
    writer.write_u16(field_count)?;
    writer.write_u16(defined_field_count)?;
    writer.write_u64(0)?; // autoSql offset
    writer.write_u64(total_summary_offset)?;
    writer.write_u32(uncompress_buf_size)?;
    writer.write_u64(0)?; // extended header offset

    debug_assert_eq!(file.seek(SeekFrom::Current(0))?, 64);

    file.seek(SeekFrom::Start(full_data_offset))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u64(data_count)?;

    Ok(())
}

/// Patches the zoom descriptors and count, and widens the recorded
/// uncompress buffer size if the zoom blocks need more room.
pub(crate) fn write_zoom_headers<W: Write + Seek>(
    file: &mut W,
    options: BBIWriteOptions,
    zoom_entries: &[ZoomHeader],
    uncompress_buf_size: u32,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(ZOOM_LEVELS_OFFSET))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u16(zoom_entries.len() as u16)?;

    file.seek(SeekFrom::Start(UNCOMPRESS_BUF_SIZE_OFFSET))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u32(uncompress_buf_size)?;

    file.seek(SeekFrom::Start(ZOOM_HEADERS_OFFSET))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    for entry in zoom_entries {
        writer.write_u32(entry.reduction_level)?;
        writer.write_u32(0)?;
        writer.write_u64(entry.data_offset)?;
        writer.write_u64(entry.index_offset)?;
    }

    Ok(())
}

/// Writes the total summary block at its reserved offset and the trailing
/// magic at the end of the file. This is the final write of the file.
pub(crate) fn write_total_summary<W: Write + Seek>(
    file: &mut W,
    options: BBIWriteOptions,
    magic: u32,
    total_summary_offset: u64,
    summary: &Summary,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(total_summary_offset))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u64(summary.bases_covered)?;
    writer.write_f64(summary.min_val)?;
    writer.write_f64(summary.max_val)?;
    writer.write_f64(summary.sum)?;
    writer.write_f64(summary.sum_squares)?;

    file.seek(SeekFrom::End(0))?;
    let mut writer = ByteOrdered::runtime(&mut *file, options.endianness);
    writer.write_u32(magic)?;
    Ok(())
}

/// Assigns chromosome ids by rank in byte-lexicographic name order, which
/// matches the order the B+ tree stores its keys in.
pub(crate) fn chrom_leaves(chrom_sizes: &HashMap<String, u32>) -> Vec<BPTreeLeaf> {
    let mut names: Vec<(&String, &u32)> = chrom_sizes.iter().collect();
    names.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    names
        .into_iter()
        .enumerate()
        .map(|(id, (name, size))| BPTreeLeaf {
            key: name.clone(),
            id: id as u32,
            size: *size,
        })
        .collect()
}

/// Shared summary accumulation: one item of `len` covered bases at `value`.
pub(crate) fn accumulate_summary(summary: &mut Option<Summary>, len: u32, value: f64) {
    let len = f64::from(len);
    match summary {
        None => {
            *summary = Some(Summary {
                total_items: 1,
                bases_covered: len as u64,
                min_val: value,
                max_val: value,
                sum: len * value,
                sum_squares: len * value * value,
            })
        }
        Some(summary) => {
            summary.total_items += 1;
            summary.bases_covered += len as u64;
            summary.min_val = summary.min_val.min(value);
            summary.max_val = summary.max_val.max(value);
            summary.sum += len * value;
            summary.sum_squares += len * value * value;
        }
    }
}
