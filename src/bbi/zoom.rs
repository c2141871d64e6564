//! The zoom pyramid post-pass: once the main data and index are on disk,
//! the file is reopened and each zoom level is recomputed from the unzoomed
//! data, appended, and the reserved header slots patched.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use crate::bbi::bbiread::{ChromInfo, GenericBBIRead};
use crate::bbi::bbiwrite::{
    encode_zoom_section, write_total_summary, write_zoom_headers, BBIWriteError, BBIWriteOptions,
    Section,
};
use crate::bbi::{check_cancel, BigSummary, CancelToken, Summary, ZoomHeader, ZoomRecord};
use crate::utils::file::{ReopenableFile, Tell};

/// Number of bases one summary record of the first level aggregates: ten
/// average item lengths.
fn initial_reduction(summary: &Summary) -> u64 {
    let average = summary.bases_covered.div_ceil(summary.total_items);
    10 * average.max(1)
}

/// Builds and appends the zoom pyramid, then writes the total summary block
/// and the trailing magic.
pub(crate) fn post_process(
    path: &Path,
    options: BBIWriteOptions,
    magic: u32,
    summary: &Summary,
    total_summary_offset: u64,
    data_uncompress_buf_size: u32,
    cancel: Option<&CancelToken>,
) -> Result<(), BBIWriteError> {
    let (zoom_entries, zoom_uncompressed) = build_zoom_levels(path, options, summary, cancel)?;

    let mut patch = OpenOptions::new().read(true).write(true).open(path)?;
    write_zoom_headers(
        &mut patch,
        options,
        &zoom_entries,
        data_uncompress_buf_size.max(zoom_uncompressed as u32),
    )?;
    write_total_summary(&mut patch, options, magic, total_summary_offset, summary)?;
    patch.sync_all()?;
    Ok(())
}

fn build_zoom_levels(
    path: &Path,
    options: BBIWriteOptions,
    summary: &Summary,
    cancel: Option<&CancelToken>,
) -> Result<(Vec<ZoomHeader>, usize), BBIWriteError> {
    if summary.total_items == 0 || summary.bases_covered == 0 {
        return Ok((vec![], 0));
    }

    let mut reader = GenericBBIRead::open_file(path)?;
    let chroms: Vec<ChromInfo> = reader.chroms().to_vec();
    let max_chrom_length = u64::from(chroms.iter().map(|c| c.length).max().unwrap_or(0));
    let data_size = {
        let header = &reader.info().header;
        header.full_index_offset - header.full_data_offset
    };

    let mut out = OpenOptions::new().read(true).write(true).open(path)?;

    let mut entries: Vec<ZoomHeader> = Vec::new();
    let mut max_uncompressed = 0usize;
    let mut prev_sections = u64::MAX;
    let mut reduction = initial_reduction(summary);

    while entries.len() < options.max_zooms as usize {
        if reduction > u64::from(u32::MAX) || reduction > 4 * max_chrom_length {
            break;
        }
        let records = level_records(&mut reader, &chroms, reduction as u32, cancel)?;
        if records.is_empty() {
            break;
        }

        let slots = slot_chunks(&records, options.zoom_items_per_slot as usize);
        let mut encoded = Vec::with_capacity(slots.len());
        for slot in &slots {
            check_cancel::<BBIWriteError>(cancel)?;
            encoded.push(encode_zoom_section(options, slot)?);
        }
        // A level that is not substantially smaller than the data it
        // summarizes is not worth storing.
        let zoom_size: u64 = encoded.iter().map(|s| s.data.len() as u64).sum();
        if zoom_size > data_size / 2 || encoded.len() as u64 >= prev_sections {
            reduction = reduction.saturating_mul(4);
            continue;
        }

        out.seek(SeekFrom::End(0))?;
        let data_offset = out.tell()?;
        let mut sections: Vec<Section> = Vec::with_capacity(encoded.len());
        for data in encoded {
            max_uncompressed = max_uncompressed.max(data.uncompressed_size);
            sections.push(data.write(&mut out)?);
        }
        let index_offset = out.tell()?;
        crate::bbi::rtree::write_index(
            &mut out,
            options.endianness,
            &sections,
            options.block_size,
            options.zoom_items_per_slot,
        )?;

        entries.push(ZoomHeader {
            reduction_level: reduction as u32,
            data_offset,
            index_offset,
        });
        prev_sections = sections.len() as u64;
        // A level that already fits one block cannot be usefully reduced
        // further.
        if sections.len() <= 1 {
            break;
        }
        reduction = reduction.saturating_mul(4);
    }

    Ok((entries, max_uncompressed))
}

/// Splits records into data-block slots, never crossing a chromosome
/// boundary within one slot.
fn slot_chunks(records: &[ZoomRecord], per_slot: usize) -> Vec<&[ZoomRecord]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < records.len() {
        let chrom = records[start].chrom;
        let mut end = start;
        while end < records.len() && records[end].chrom == chrom && end - start < per_slot {
            end += 1;
        }
        chunks.push(&records[start..end]);
        start = end;
    }
    chunks
}

/// Sweeps the unzoomed data chromosome by chromosome, filling moving-window
/// records `reduction` bases wide.
fn level_records(
    reader: &mut GenericBBIRead<ReopenableFile>,
    chroms: &[ChromInfo],
    reduction: u32,
    cancel: Option<&CancelToken>,
) -> Result<Vec<ZoomRecord>, BBIWriteError> {
    let mut records = Vec::new();
    for chrom in chroms {
        check_cancel::<BBIWriteError>(cancel)?;
        let items: Vec<(u32, u32, f64)> = match reader {
            GenericBBIRead::BigWig(b) => b
                .get_interval(&chrom.name, 0, chrom.length)?
                .map(|v| v.map(|v| (v.start, v.end, f64::from(v.value))))
                .collect::<Result<_, _>>()?,
            GenericBBIRead::BigBed(b) => b
                .query(&chrom.name, 0, chrom.length, true, cancel)?
                .map(|e| e.map(|e| (e.start, e.end, 1.0)))
                .collect::<Result<_, _>>()?,
        };

        let mut live: Option<ZoomRecord> = None;
        for (item_start, item_end, value) in items {
            let mut add_start = item_start;
            while add_start < item_end {
                if let Some(rec) = &live {
                    // The open window ends before this stretch begins.
                    if rec.start.saturating_add(reduction) <= add_start {
                        records.push(live.take().unwrap());
                    }
                }
                let rec = live.get_or_insert_with(|| ZoomRecord {
                    chrom: chrom.id,
                    start: add_start,
                    end: add_start,
                    summary: BigSummary::empty(),
                });
                let cap = rec.start.saturating_add(reduction);
                let add_end = item_end.min(cap);
                let bases = u64::from(add_end - add_start);
                rec.end = rec.end.max(add_end);
                rec.summary.update(
                    value,
                    value,
                    bases,
                    value * bases as f64,
                    value * value * bases as f64,
                );
                if add_end == cap {
                    records.push(live.take().unwrap());
                }
                add_start = add_end;
            }
        }
        if let Some(rec) = live.take() {
            if !rec.summary.is_empty() {
                records.push(rec);
            }
        }
    }
    Ok(records)
}
