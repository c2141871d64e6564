/*!
Provides the interface for writing bigWig files.

## Example
```rust,no_run
# use std::collections::HashMap;
# use std::error::Error;
# use bbifile::{BigWigWrite, FixedStepSection, WigSection};
# fn main() -> Result<(), Box<dyn Error>> {
let mut chrom_map = HashMap::new();
chrom_map.insert("chr17".to_string(), 83_257_441);

// Sections must be sorted by (chrom, start).
let sections = vec![WigSection::FixedStep(FixedStepSection {
    chrom: "chr17".to_string(),
    start: 59_000,
    step: 10,
    span: 10,
    values: vec![0.5, 1.5, 2.5],
})];

let out = BigWigWrite::create_file("example.bigWig");
out.write(chrom_map, sections, None)?;
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
    accumulate_summary, chrom_leaves, encode_wig_section, write_blank_headers, write_info,
    BBIWriteError, BBIWriteOptions, Section,
};
use crate::bbi::{
    bpt, check_cancel, rtree, zoom, CancelToken, Summary, WigSection, BIGWIG_MAGIC,
};
use crate::utils::file::Tell;

/// Sections are spliced so their on-disk item count stays within a signed
/// 16-bit count, the splice width the round-trip guarantee is defined over.
const MAX_SECTION_ITEMS: usize = i16::MAX as usize;

/// The struct used to write a bigWig file
pub struct BigWigWrite {
    pub path: PathBuf,
    pub options: BBIWriteOptions,
}

impl BigWigWrite {
    pub fn create_file(path: impl Into<PathBuf>) -> Self {
        BigWigWrite {
            path: path.into(),
            options: BBIWriteOptions::default(),
        }
    }

    /// Writes `sections` (sorted by `(chrom, start)`) as a bigWig. Sections
    /// on chromosomes missing from `chrom_sizes` are dropped; bedGraph
    /// sections are rejected. A failed write leaves a truncated file that
    /// the caller must delete.
    pub fn write(
        self,
        chrom_sizes: HashMap<String, u32>,
        sections: impl IntoIterator<Item = WigSection>,
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
        // Section count, patched once it is known.
        ByteOrdered::runtime(&mut file, options.endianness).write_u64(0)?;

        let mut written: Vec<Section> = Vec::new();
        let mut summary: Option<Summary> = None;
        let mut last: Option<(u32, u32)> = None;
        let mut section_count = 0u64;
        let mut max_uncompressed = 0usize;
        let mut unknown_chroms: HashSet<String> = HashSet::new();

        for section in sections {
            check_cancel::<BBIWriteError>(cancel)?;
            validate_section(&section)?;
            if section.item_count() == 0 {
                continue;
            }
            let (chrom_id, chrom_length) = match chrom_ids.get(section.chrom()) {
                Some(ids) => *ids,
                None => {
                    if unknown_chroms.insert(section.chrom().to_string()) {
                        debug!(
                            "dropping sections on chromosome {} absent from the chromosome sizes",
                            section.chrom()
                        );
                    }
                    continue;
                }
            };
            if section.end() > chrom_length {
                return Err(BBIWriteError::InvalidInput(format!(
                    "section ends at {}, past the length of chromosome {} ({})",
                    section.end(),
                    section.chrom(),
                    chrom_length
                )));
            }
            if let Some((last_chrom, last_start)) = last {
                if chrom_id < last_chrom
                    || (chrom_id == last_chrom && section.start() < last_start)
                {
                    return Err(BBIWriteError::OrderingViolation(format!(
                        "{}:{} follows a later position",
                        section.chrom(),
                        section.start()
                    )));
                }
            }
            last = Some((chrom_id, section.start()));

            accumulate_section_summary(&mut summary, &section);
            for piece in section.splice(MAX_SECTION_ITEMS) {
                check_cancel::<BBIWriteError>(cancel)?;
                let data = encode_wig_section(options, chrom_id, &piece)?;
                max_uncompressed = max_uncompressed.max(data.uncompressed_size);
                written.push(data.write(&mut file)?);
                section_count += 1;
            }
        }

        let full_index_offset = file.tell()?;
        rtree::write_index(
            &mut file,
            options.endianness,
            &written,
            options.block_size,
            options.items_per_slot,
        )?;

        write_info(
            &mut file,
            options,
            BIGWIG_MAGIC,
            chrom_index_start,
            full_data_offset,
            full_index_offset,
            0,
            0,
            total_summary_offset,
            max_uncompressed as u32,
            section_count,
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
            BIGWIG_MAGIC,
            &summary,
            total_summary_offset,
            max_uncompressed as u32,
            cancel,
        )
    }
}

fn validate_section(section: &WigSection) -> Result<(), BBIWriteError> {
    match section {
        WigSection::BedGraph(_) => Err(BBIWriteError::UnsupportedSection),
        WigSection::FixedStep(s) => {
            if s.span < 1 || s.step < 1 {
                return Err(BBIWriteError::InvalidInput(format!(
                    "fixed step section on {} has span {} and step {}; both must be at least 1",
                    s.chrom, s.span, s.step
                )));
            }
            Ok(())
        }
        WigSection::VariableStep(s) => {
            if s.span < 1 {
                return Err(BBIWriteError::InvalidInput(format!(
                    "variable step section on {} has span 0",
                    s.chrom
                )));
            }
            if s.positions.len() != s.values.len() {
                return Err(BBIWriteError::InvalidInput(format!(
                    "variable step section on {} has {} positions but {} values",
                    s.chrom,
                    s.positions.len(),
                    s.values.len()
                )));
            }
            if s.positions.windows(2).any(|w| w[0] >= w[1]) {
                return Err(BBIWriteError::InvalidInput(format!(
                    "variable step positions on {} are not strictly ascending",
                    s.chrom
                )));
            }
            Ok(())
        }
    }
}

fn accumulate_section_summary(summary: &mut Option<Summary>, section: &WigSection) {
    match section {
        WigSection::FixedStep(s) => {
            for value in &s.values {
                accumulate_summary(summary, s.span, f64::from(*value));
            }
        }
        WigSection::VariableStep(s) => {
            for value in &s.values {
                accumulate_summary(summary, s.span, f64::from(*value));
            }
        }
        WigSection::BedGraph(_) => unreachable!("bedGraph sections are rejected before this"),
    }
}
