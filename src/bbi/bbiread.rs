use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use byteordered::{ByteOrdered, Endianness};
use thiserror::Error;

use crate::bbi::bpt::{self, BPTreeHeader};
use crate::bbi::rtree::{self, Block};
use crate::bbi::{
    BBIFile, BigSummary, CancelToken, CancelledError, Summary, ZoomHeader, ZoomRecord,
    BIGBED_MAGIC, BIGWIG_MAGIC,
};
use crate::utils::file::{ReopenableFile, SeekableRead};
use crate::{BigBedRead, BigWigRead};

/// Possible errors encountered when reading a bbi file
#[derive(Error, Debug)]
pub enum BBIReadError {
    #[error("bad signature (not a bigWig or bigBed file)")]
    BadSignature,
    #[error("the file is a bbi file, but not of the expected type")]
    WrongFileType,
    #[error("unsupported file version: {0}")]
    UnsupportedVersion(u16),
    #[error("corrupt index at offset {offset}: {reason}")]
    CorruptIndex { offset: u64, reason: String },
    #[error("block decompression failed: {0}")]
    Decompression(String),
    #[error("the file was invalid: {0}")]
    InvalidFile(String),
    #[error("error occurred: {0}")]
    IoError(#[from] io::Error),
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<CancelledError> for BBIReadError {
    fn from(_: CancelledError) -> Self {
        BBIReadError::Cancelled
    }
}

/// Header info for a bbi file
///
/// Note that info on internal properties like file offsets is not public.
/// Reading data is available through higher-level functions.
#[derive(Copy, Clone, Debug)]
pub struct BBIHeader {
    pub endianness: Endianness,
    pub version: u16,
    pub field_count: u16,
    pub defined_field_count: u16,

    pub(crate) zoom_levels: u16,
    pub(crate) chromosome_tree_offset: u64,
    pub(crate) full_data_offset: u64,
    pub(crate) full_index_offset: u64,
    pub(crate) auto_sql_offset: u64,
    pub(crate) total_summary_offset: u64,
    pub(crate) uncompress_buf_size: u32,
    pub(crate) extended_header_offset: u64,
}

impl BBIHeader {
    pub fn is_compressed(&self) -> bool {
        self.uncompress_buf_size > 0
    }
}

/// Information on a chromosome in a bbi file
#[derive(Clone, Debug)]
pub struct ChromInfo {
    pub name: String,
    pub length: u32,
    pub(crate) id: u32,
}

impl PartialEq for ChromInfo {
    fn eq(&self, other: &ChromInfo) -> bool {
        self.name == other.name
    }
}

/// Info on a bbi file
#[derive(Clone, Debug)]
pub struct BBIFileInfo {
    /// The type of the bbi file - either a bigBed or a bigWig
    pub filetype: BBIFile,
    /// Header info
    pub header: BBIHeader,
    /// Info on zooms in the file
    pub zoom_headers: Vec<ZoomHeader>,
    /// The chromosomes the file contains data for
    pub chrom_info: Vec<ChromInfo>,
    /// Header of the on-disk chromosome B+ tree
    pub chrom_tree: BPTreeHeader,
}

impl BBIFileInfo {
    /// Resolves a chromosome name to its id through the on-disk B+ tree.
    /// Unknown names resolve to `None`.
    pub(crate) fn resolve_chrom_id<R: SeekableRead>(
        &self,
        file: &mut R,
        chrom_name: &str,
    ) -> Result<Option<u32>, BBIReadError> {
        let leaf = bpt::find(file, self.header.endianness, &self.chrom_tree, chrom_name)?;
        Ok(leaf.map(|l| l.id))
    }
}

/// Peeks at the magic of `read` and reports the contained file type, or
/// `None` for anything that is not a bbi file.
pub fn determine_file_type<R: Read + Seek>(read: &mut R) -> io::Result<Option<BBIFile>> {
    read.seek(SeekFrom::Start(0))?;
    let mut magic_bytes = [0u8; 4];
    if let Err(e) = read.read_exact(&mut magic_bytes) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e),
        };
    }
    Ok(match_magic(magic_bytes).map(|(filetype, _)| filetype))
}

/// The endianness test: interpret the candidate as big-endian; if that does
/// not match a known magic, reverse the bytes and try again.
fn match_magic(magic_bytes: [u8; 4]) -> Option<(BBIFile, Endianness)> {
    let big = u32::from_be_bytes(magic_bytes);
    let little = u32::from_le_bytes(magic_bytes);
    match (big, little) {
        (BIGWIG_MAGIC, _) => Some((BBIFile::BigWig, Endianness::Big)),
        (BIGBED_MAGIC, _) => Some((BBIFile::BigBed, Endianness::Big)),
        (_, BIGWIG_MAGIC) => Some((BBIFile::BigWig, Endianness::Little)),
        (_, BIGBED_MAGIC) => Some((BBIFile::BigBed, Endianness::Little)),
        _ => None,
    }
}

pub(crate) fn read_info<R: SeekableRead>(file: &mut R) -> Result<BBIFileInfo, BBIReadError> {
    file.seek(SeekFrom::Start(0))?;
    let mut magic_bytes = [0u8; 4];
    file.read_exact(&mut magic_bytes)?;
    let (filetype, endianness) = match match_magic(magic_bytes) {
        Some(m) => m,
        None => return Err(BBIReadError::BadSignature),
    };

    let mut header_data = ByteOrdered::runtime(&mut *file, endianness);
    let version = header_data.read_u16()?;
    if !(1..=5).contains(&version) {
        return Err(BBIReadError::UnsupportedVersion(version));
    }
    let zoom_levels = header_data.read_u16()?;
    let chromosome_tree_offset = header_data.read_u64()?;
    let full_data_offset = header_data.read_u64()?;
    let full_index_offset = header_data.read_u64()?;
    let field_count = header_data.read_u16()?;
    let defined_field_count = header_data.read_u16()?;
    let auto_sql_offset = header_data.read_u64()?;
    let total_summary_offset = header_data.read_u64()?;
    let uncompress_buf_size = header_data.read_u32()?;
    let extended_header_offset = header_data.read_u64()?;

    let header = BBIHeader {
        endianness,
        version,
        zoom_levels,
        chromosome_tree_offset,
        full_data_offset,
        full_index_offset,
        field_count,
        defined_field_count,
        auto_sql_offset,
        total_summary_offset,
        uncompress_buf_size,
        extended_header_offset,
    };

    let mut zoom_headers = Vec::with_capacity(zoom_levels as usize);
    for _ in 0..zoom_levels {
        let reduction_level = header_data.read_u32()?;
        let _reserved = header_data.read_u32()?;
        let data_offset = header_data.read_u64()?;
        let index_offset = header_data.read_u64()?;
        zoom_headers.push(ZoomHeader {
            reduction_level,
            data_offset,
            index_offset,
        });
    }

    file.seek(SeekFrom::Start(chromosome_tree_offset))?;
    let chrom_tree = bpt::read_header(file, endianness)?;
    let chrom_info = bpt::traverse(file, endianness, &chrom_tree)?
        .into_iter()
        .map(|leaf| ChromInfo {
            name: leaf.key,
            id: leaf.id,
            length: leaf.size,
        })
        .collect();

    Ok(BBIFileInfo {
        filetype,
        header,
        zoom_headers,
        chrom_info,
        chrom_tree,
    })
}

pub(crate) fn read_total_summary<R: SeekableRead>(
    file: &mut R,
    info: &BBIFileInfo,
) -> io::Result<Summary> {
    let summary_offset = info.header.total_summary_offset;
    let data_offset = info.header.full_data_offset;
    let mut reader = ByteOrdered::runtime(file, info.header.endianness);
    let (bases_covered, min_val, max_val, sum, sum_squares) = if summary_offset != 0 {
        reader.seek(SeekFrom::Start(summary_offset))?;
        (
            reader.read_u64()?,
            reader.read_f64()?,
            reader.read_f64()?,
            reader.read_f64()?,
            reader.read_f64()?,
        )
    } else {
        (0, 0.0, 0.0, 0.0, 0.0)
    };
    reader.seek(SeekFrom::Start(data_offset))?;
    let total_items = reader.read_u64()?;
    Ok(Summary {
        total_items,
        bases_covered,
        min_val,
        max_val,
        sum,
        sum_squares,
    })
}

/// Reusable scratch for block reads: a compressed and an uncompressed
/// buffer, both growing by 3/2 when a larger block shows up, plus the most
/// recently decompressed block keyed by its data offset. Owned by a single
/// reader; share files across threads by reopening.
#[derive(Default)]
pub(crate) struct BlockBuffers {
    compressed: Vec<u8>,
    uncompressed: Vec<u8>,
    cached: Option<(u64, usize)>,
}

fn grow(buf: &mut Vec<u8>, needed: usize) {
    if buf.len() < needed {
        let grown = needed.max(buf.len() + buf.len() / 2);
        buf.resize(grown, 0);
    }
}

impl BlockBuffers {
    /// Returns the uncompressed contents of `block`, decompressing into the
    /// scratch buffers. A repeated read of the block that was fetched last
    /// skips both I/O and decompression.
    pub(crate) fn block_data<'a, R: SeekableRead>(
        &'a mut self,
        file: &mut R,
        info: &BBIFileInfo,
        block: &Block,
    ) -> Result<&'a [u8], BBIReadError> {
        if let Some((offset, len)) = self.cached {
            if offset == block.offset {
                return Ok(&self.uncompressed[..len]);
            }
        }

        let compressed_size = block.size as usize;
        grow(&mut self.compressed, compressed_size);
        file.seek(SeekFrom::Start(block.offset))?;
        file.read_exact(&mut self.compressed[..compressed_size])?;

        let uncompress_buf_size = info.header.uncompress_buf_size as usize;
        let len = if uncompress_buf_size > 0 {
            grow(&mut self.uncompressed, uncompress_buf_size);
            let input = &self.compressed[..compressed_size];
            if info.header.version >= 5 {
                let mut decoder = snap::raw::Decoder::new();
                decoder
                    .decompress(input, &mut self.uncompressed)
                    .map_err(|e| BBIReadError::Decompression(e.to_string()))?
            } else {
                let mut decompressor = libdeflater::Decompressor::new();
                decompressor
                    .zlib_decompress(input, &mut self.uncompressed)
                    .map_err(|e| BBIReadError::Decompression(e.to_string()))?
            }
        } else {
            grow(&mut self.uncompressed, compressed_size);
            self.uncompressed[..compressed_size]
                .copy_from_slice(&self.compressed[..compressed_size]);
            compressed_size
        };

        self.cached = Some((block.offset, len));
        Ok(&self.uncompressed[..len])
    }
}

/// Searches the interval index rooted at `index_offset` for the data blocks
/// overlapping the query.
pub(crate) fn search_cir_tree<R: SeekableRead>(
    file: &mut R,
    endianness: Endianness,
    index_offset: u64,
    chrom_ix: u32,
    start: u32,
    end: u32,
    cancel: Option<&CancelToken>,
) -> Result<Vec<Block>, BBIReadError> {
    file.seek(SeekFrom::Start(index_offset))?;
    let header = rtree::read_header(file, endianness)?;
    rtree::search(
        file,
        endianness,
        header.root_offset,
        chrom_ix,
        start,
        end,
        cancel,
    )
}

/// Decodes the zoom records of a data block, keeping those that intersect
/// `[start, end)` on `chrom`.
pub(crate) fn decode_zoom_block(
    endianness: Endianness,
    data: &[u8],
    chrom: u32,
    start: u32,
    end: u32,
) -> Result<Vec<ZoomRecord>, BBIReadError> {
    const RECORD_SIZE: usize = 4 * 8;
    if data.len() % RECORD_SIZE != 0 {
        return Err(BBIReadError::InvalidFile(format!(
            "zoom data block has invalid length ({})",
            data.len()
        )));
    }
    let item_count = data.len() / RECORD_SIZE;
    let mut records = Vec::with_capacity(item_count);
    let mut reader = ByteOrdered::runtime(data, endianness);
    for _ in 0..item_count {
        let chrom_id = reader.read_u32()?;
        let chrom_start = reader.read_u32()?;
        let chrom_end = reader.read_u32()?;
        let count = u64::from(reader.read_u32()?);
        let min_val = f64::from(reader.read_f32()?);
        let max_val = f64::from(reader.read_f32()?);
        let sum = f64::from(reader.read_f32()?);
        let sum_squares = f64::from(reader.read_f32()?);
        if chrom_id == chrom && chrom_end > start && chrom_start < end {
            records.push(ZoomRecord {
                chrom: chrom_id,
                start: chrom_start,
                end: chrom_end,
                summary: BigSummary {
                    count,
                    min_val,
                    max_val,
                    sum,
                    sum_squares,
                },
            });
        }
    }
    Ok(records)
}

/// Potential errors found when trying to read data from a zoom level
#[derive(Error, Debug)]
pub enum ZoomIntervalError {
    #[error("the requested reduction level was not found")]
    ReductionLevelNotFound,
    #[error("{}", .0)]
    BBIReadError(#[from] BBIReadError),
}

/// Finds the index offset of the zoom level with the given reduction level.
pub(crate) fn zoom_index_offset(
    info: &BBIFileInfo,
    reduction_level: u32,
) -> Result<u64, ZoomIntervalError> {
    info.zoom_headers
        .iter()
        .find(|h| h.reduction_level == reduction_level)
        .map(|h| h.index_offset)
        .ok_or(ZoomIntervalError::ReductionLevelNotFound)
}

/// Reads the autosql string, if any, at the header's autosql offset.
pub(crate) fn read_autosql<R: SeekableRead>(
    file: &mut R,
    info: &BBIFileInfo,
) -> Result<Option<String>, BBIReadError> {
    if info.header.auto_sql_offset == 0 {
        return Ok(None);
    }
    file.seek(SeekFrom::Start(info.header.auto_sql_offset))?;
    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        file.read_exact(&mut byte)?;
        if byte[0] == b'\0' {
            break;
        }
        buffer.push(byte[0]);
    }
    let autosql = String::from_utf8(buffer)
        .map_err(|_| BBIReadError::InvalidFile("invalid autosql: not UTF-8".to_owned()))?;
    Ok(Some(autosql))
}

/// A bbi file of either type, detected when opening.
pub enum GenericBBIRead<R> {
    BigWig(BigWigRead<R>),
    BigBed(BigBedRead<R>),
}

impl<R> GenericBBIRead<R> {
    pub fn info(&self) -> &BBIFileInfo {
        match self {
            GenericBBIRead::BigWig(b) => b.info(),
            GenericBBIRead::BigBed(b) => b.info(),
        }
    }

    pub fn chroms(&self) -> &[ChromInfo] {
        match self {
            GenericBBIRead::BigWig(b) => b.chroms(),
            GenericBBIRead::BigBed(b) => b.chroms(),
        }
    }

    pub fn bigwig(self) -> Option<BigWigRead<R>> {
        match self {
            GenericBBIRead::BigWig(b) => Some(b),
            GenericBBIRead::BigBed(_) => None,
        }
    }

    pub fn bigbed(self) -> Option<BigBedRead<R>> {
        match self {
            GenericBBIRead::BigBed(b) => Some(b),
            GenericBBIRead::BigWig(_) => None,
        }
    }
}

impl<R: SeekableRead> GenericBBIRead<R> {
    /// Opens a bbi file of either type for a given type that implements both
    /// `Read` and `Seek`.
    pub fn open(mut read: R) -> Result<Self, BBIReadError> {
        let info = read_info(&mut read)?;
        match info.filetype {
            BBIFile::BigWig => Ok(GenericBBIRead::BigWig(BigWigRead::with_info(info, read))),
            BBIFile::BigBed => Ok(GenericBBIRead::BigBed(BigBedRead::with_info(info, read))),
        }
    }
}

impl GenericBBIRead<ReopenableFile> {
    /// Opens a bbi file of either type.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, BBIReadError> {
        GenericBBIRead::open(ReopenableFile::open(path.as_ref())?)
    }
}
