/*!
Provides the interface for writing bigBed files.

## Example
```rust,no_run
# use std::collections::HashMap;
# use std::error::Error;
# use bbifile::{BedEntry, BigBedWrite};
# fn main() -> Result<(), Box<dyn Error>> {
// The chromosome sizes the entries live in.
let mut chrom_map = HashMap::new();
chrom_map.insert("chr1".to_string(), 248_956_422);

// Entries must be sorted by (chrom, start).
let entries = vec![
    BedEntry { chrom: "chr1".to_string(), start: 100, end: 250, rest: "first\t0\t+".to_string() },
    BedEntry { chrom: "chr1".to_string(), start: 400, end: 900, rest: "second\t0\t-".to_string() },
];

let out = BigBedWrite::create_file("example.bigBed");
out.write(chrom_map, entries, None)?;
# Ok(())
# }
```
*/
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use byteordered::ByteOrdered;
use log::debug;

use crate::bbi::bbiwrite::{
    accumulate_summary, chrom_leaves, encode_bed_section, write_blank_headers, write_info,
    BBIWriteError, BBIWriteOptions, Section,
};
use crate::bbi::{
    bpt, check_cancel, rtree, zoom, BedEntry, CancelToken, Summary, BIGBED_MAGIC,
};
use crate::utils::file::Tell;

/// The struct used to write a bigBed file
pub struct BigBedWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
}

impl BigBedWrite {
    pub fn create_file(path: impl Into<PathBuf>) -> Self {
        BigBedWrite {
            path: path.into(),
            options: BBIWriteOptions::default(),
        }
    }

    /// Writes `entries` (sorted by `(chrom, start)`) as a bigBed. Entries on
    /// chromosomes missing from `chrom_sizes` are dropped. A failed write
    /// leaves a truncated file that the caller must delete.
    pub fn write(
        self,
        chrom_sizes: HashMap<String, u32>,
        entries: impl IntoIterator<Item = BedEntry>,
        cancel: Option<&CancelToken>,
    ) -> Result<(), BBIWriteError> {
        let options = self.options;
        let fp = File::create(&self.path)?;
        let mut file = BufWriter::new(fp);

        write_blank_headers(&mut file, options.max_zooms)?;
        let total_summary_offset = file.tell()?;
        file.write_all(&[0; 40])?;

        let chrom_index_start = file.tell()?;
        let leaves = chrom_leaves(&chrom_sizes);
        bpt::write(&mut file, options.endianness, &leaves, options.block_size)?;
        let chrom_ids: HashMap<&str, (u32, u32)> = leaves
            .iter()
            .map(|l| (l.key.as_str(), (l.id, l.size)))
            .collect();

        let full_data_offset = file.tell()?;
        // Entry count, patched once it is known.
        ByteOrdered::runtime(&mut file, options.endianness).write_u64(0)?;

        let mut sections: Vec<Section> = Vec::new();
        let mut summary: Option<Summary> = None;
        let mut current: Vec<(u32, u32, String)> =
            Vec::with_capacity(options.items_per_slot as usize);
        let mut current_chrom: Option<u32> = None;
        let mut last: Option<(u32, u32)> = None;
        let mut entry_count = 0u64;
        let mut max_uncompressed = 0usize;
        let mut field_counts: Option<(u16, u16)> = None;
        let mut unknown_chroms: HashSet<String> = HashSet::new();

        for entry in entries {
            check_cancel::<BBIWriteError>(cancel)?;
            let (chrom_id, chrom_length) = match chrom_ids.get(entry.chrom.as_str()) {
                Some(ids) => *ids,
                None => {
                    if unknown_chroms.insert(entry.chrom.clone()) {
                        debug!(
                            "dropping entries on chromosome {} absent from the chromosome sizes",
                            entry.chrom
                        );
                    }
                    continue;
                }
            };
            if entry.start >= entry.end {
                return Err(BBIWriteError::InvalidInput(format!(
                    "invalid bed entry: {} >= {}",
                    entry.start, entry.end
                )));
            }
            if entry.end > chrom_length {
                return Err(BBIWriteError::InvalidInput(format!(
                    "invalid bed entry: {} is greater than the length of chromosome {} ({})",
                    entry.end, entry.chrom, chrom_length
                )));
            }
            if let Some((last_chrom, last_start)) = last {
                if chrom_id < last_chrom || (chrom_id == last_chrom && entry.start < last_start) {
                    return Err(BBIWriteError::OrderingViolation(format!(
                        "{}:{} follows a later position",
                        entry.chrom, entry.start
                    )));
                }
            }
            last = Some((chrom_id, entry.start));
            if field_counts.is_none() {
                let columns = if entry.rest.is_empty() {
                    0
                } else {
                    entry.rest.split('\t').count() as u16
                };
                field_counts = Some((3 + columns, (3 + columns).min(12)));
            }

            if current_chrom != Some(chrom_id) {
                if let Some(flushing) = current_chrom.filter(|_| !current.is_empty()) {
                    let data = encode_bed_section(options, flushing, &current)?;
                    max_uncompressed = max_uncompressed.max(data.uncompressed_size);
                    sections.push(data.write(&mut file)?);
                    current.clear();
                }
                current_chrom = Some(chrom_id);
            }
            accumulate_summary(&mut summary, entry.end - entry.start, 1.0);
            entry_count += 1;
            current.push((entry.start, entry.end, entry.rest));
            if current.len() >= options.items_per_slot as usize {
                let data = encode_bed_section(options, chrom_id, &current)?;
                max_uncompressed = max_uncompressed.max(data.uncompressed_size);
                sections.push(data.write(&mut file)?);
                current.clear();
            }
        }
        if let Some(flushing) = current_chrom.filter(|_| !current.is_empty()) {
            let data = encode_bed_section(options, flushing, &current)?;
            max_uncompressed = max_uncompressed.max(data.uncompressed_size);
            sections.push(data.write(&mut file)?);
        }

        let full_index_offset = file.tell()?;
        rtree::write_index(
            &mut file,
            options.endianness,
            &sections,
            options.block_size,
            options.items_per_slot,
        )?;

        let (field_count, defined_field_count) = field_counts.unwrap_or((3, 3));
        write_info(
            &mut file,
            options,
            BIGBED_MAGIC,
            chrom_index_start,
            full_data_offset,
            full_index_offset,
            field_count,
            defined_field_count,
            total_summary_offset,
            max_uncompressed as u32,
            entry_count,
        )?;
        file.flush()?;
        drop(file);

        let summary = summary.unwrap_or(Summary {
            total_items: 0,
            bases_covered: 0,
            min_val: 0.0,
            max_val: 0.0,
            sum: 0.0,
            sum_squares: 0.0,
        });

        zoom::post_process(
            &self.path,
            options,
            BIGBED_MAGIC,
            &summary,
            total_summary_offset,
            max_uncompressed as u32,
            cancel,
        )
    }
}
