use std::collections::HashMap;
use std::error::Error;

use byteordered::Endianness;
use tempfile::NamedTempFile;

use bbifile::{
    determine_file_type, BBIFile, BBIReadError, BBIWriteError, BBIWriteOptions, BedEntry,
    BigBedRead, BigBedWrite, BigWigRead, CancelToken, Compression, GenericBBIRead,
};

fn entry(chrom: &str, start: u32, end: u32, rest: &str) -> BedEntry {
    BedEntry {
        chrom: chrom.to_string(),
        start,
        end,
        rest: rest.to_string(),
    }
}

fn write_bigbed(
    entries: Vec<BedEntry>,
    chrom_sizes: &[(&str, u32)],
    options: Option<BBIWriteOptions>,
) -> Result<NamedTempFile, BBIWriteError> {
    let tempfile = NamedTempFile::new().unwrap();
    let mut out = BigBedWrite::create_file(tempfile.path());
    if let Some(options) = options {
        out.options = options;
    }
    let chrom_map: HashMap<String, u32> = chrom_sizes
        .iter()
        .map(|(name, size)| (name.to_string(), *size))
        .collect();
    out.write(chrom_map, entries, None)?;
    Ok(tempfile)
}

#[test]
fn test_write_then_query() -> Result<(), Box<dyn Error>> {
    let entries = vec![
        entry("chr1", 100, 200, ""),
        entry("chr1", 150, 250, ""),
        entry("chr2", 0, 10, ""),
    ];
    let tempfile = write_bigbed(entries.clone(), &[("chr1", 1000), ("chr2", 100)], None)?;
    let mut bbread = BigBedRead::open_file(tempfile.path())?;

    let chroms = bbread.chroms().to_vec();
    assert_eq!(chroms.len(), 2);
    assert_eq!(chroms[0].name, "chr1");
    assert_eq!(chroms[0].length, 1000);

    let overlapping: Vec<BedEntry> = bbread
        .query("chr1", 0, 300, true, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(overlapping, entries[0..2].to_vec());

    let chr2: Vec<BedEntry> = bbread
        .query("chr2", 0, 100, false, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(chr2, vec![entries[2].clone()]);

    // Unknown chromosomes are an empty result, not an error.
    let missing: Vec<BedEntry> = bbread
        .query("chrMissing", 0, 100, false, None)?
        .collect::<Result<_, _>>()?;
    assert!(missing.is_empty());

    let summary = bbread.get_summary()?;
    assert_eq!(summary.total_items, 3);
    assert_eq!(summary.bases_covered, 210);

    assert!(bbread.autosql()?.is_none());
    Ok(())
}

#[test]
fn test_containment_and_overlap() -> Result<(), Box<dyn Error>> {
    let entries = vec![
        entry("chr1", 100, 200, "left"),
        entry("chr1", 180, 300, "middle"),
        entry("chr1", 400, 500, "right"),
    ];
    let tempfile = write_bigbed(entries, &[("chr1", 1000)], None)?;
    let mut bbread = BigBedRead::open_file(tempfile.path())?;

    // Containment: both bounds inside the query.
    let contained: Vec<BedEntry> = bbread
        .query("chr1", 150, 350, false, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(contained.len(), 1);
    assert_eq!(contained[0].rest, "middle");
    for entry in &contained {
        assert!(entry.start >= 150 && entry.end <= 350);
    }

    // Overlap: any intersection counts, and entries are not clipped.
    let overlapping: Vec<BedEntry> = bbread
        .query("chr1", 150, 350, true, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(overlapping.len(), 2);
    for entry in &overlapping {
        assert!(entry.end > 150 && entry.start < 350);
    }
    assert_eq!(overlapping[0].start, 100);
    Ok(())
}

#[test]
fn test_endianness_symmetry() -> Result<(), Box<dyn Error>> {
    let entries = vec![
        entry("chr1", 10, 20, "a\t0\t+"),
        entry("chr1", 30, 55, "b\t0\t-"),
    ];
    let mut files = Vec::new();
    for endianness in [Endianness::Big, Endianness::Little] {
        let options = BBIWriteOptions {
            endianness,
            compression: Compression::Deflate,
            ..Default::default()
        };
        files.push(write_bigbed(
            entries.clone(),
            &[("chr1", 1000)],
            Some(options),
        )?);
    }

    let mut results = Vec::new();
    for file in &files {
        let mut bbread = BigBedRead::open_file(file.path())?;
        let header = &bbread.info().header;
        assert!(header.version >= 3);
        assert_eq!(bbread.info().chrom_tree.block_size, 1);
        assert_eq!(bbread.info().chrom_tree.item_count, 1);
        assert_eq!(header.field_count, 6);
        assert_eq!(header.defined_field_count, 6);
        let all: Vec<BedEntry> = bbread
            .query("chr1", 0, 1000, false, None)?
            .collect::<Result<_, _>>()?;
        results.push(all);
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], entries);
    Ok(())
}

#[test]
fn test_compression_round_trips() -> Result<(), Box<dyn Error>> {
    let entries: Vec<BedEntry> = (0..3000)
        .map(|i| entry("chr1", i * 10, i * 10 + 8, &format!("entry{}\t{}\t+", i, i % 1000)))
        .collect();

    for (compression, version) in [
        (Compression::None, 4),
        (Compression::Deflate, 4),
        (Compression::Snappy, 5),
    ] {
        let options = BBIWriteOptions {
            compression,
            ..Default::default()
        };
        let tempfile = write_bigbed(entries.clone(), &[("chr1", 100_000)], Some(options))?;
        let mut bbread = BigBedRead::open_file(tempfile.path())?;
        assert_eq!(bbread.info().header.version, version);
        assert_eq!(
            bbread.info().header.is_compressed(),
            compression != Compression::None
        );
        let all: Vec<BedEntry> = bbread
            .query("chr1", 0, 100_000, false, None)?
            .collect::<Result<_, _>>()?;
        assert_eq!(all, entries);
    }
    Ok(())
}

#[test]
fn test_unknown_chromosomes_are_dropped() -> Result<(), Box<dyn Error>> {
    let entries = vec![
        entry("chr1", 10, 20, ""),
        entry("chrUn_random", 5, 15, ""),
        entry("chr2", 1, 9, ""),
    ];
    let tempfile = write_bigbed(entries, &[("chr1", 100), ("chr2", 100)], None)?;
    let mut bbread = BigBedRead::open_file(tempfile.path())?;

    let summary = bbread.get_summary()?;
    assert_eq!(summary.total_items, 2);

    let chr1: Vec<BedEntry> = bbread
        .query("chr1", 0, 100, false, None)?
        .collect::<Result<_, _>>()?;
    assert_eq!(chr1, vec![entry("chr1", 10, 20, "")]);
    Ok(())
}

#[test]
fn test_ordering_violation() {
    let entries = vec![entry("chr1", 100, 200, ""), entry("chr1", 50, 80, "")];
    let result = write_bigbed(entries, &[("chr1", 1000)], None);
    assert!(matches!(result, Err(BBIWriteError::OrderingViolation(_))));

    // Chromosomes out of (name) order are an ordering violation too.
    let entries = vec![entry("chr2", 10, 20, ""), entry("chr1", 10, 20, "")];
    let result = write_bigbed(entries, &[("chr1", 1000), ("chr2", 1000)], None);
    assert!(matches!(result, Err(BBIWriteError::OrderingViolation(_))));
}

#[test]
fn test_out_of_bounds_entry() {
    let entries = vec![entry("chr1", 100, 2000, "")];
    let result = write_bigbed(entries, &[("chr1", 1000)], None);
    assert!(matches!(result, Err(BBIWriteError::InvalidInput(_))));
}

#[test]
fn test_cancelled_write() {
    let tempfile = NamedTempFile::new().unwrap();
    let out = BigBedWrite::create_file(tempfile.path());
    let mut chrom_map = HashMap::new();
    chrom_map.insert("chr1".to_string(), 1000);
    let token = CancelToken::new();
    token.cancel();
    let result = out.write(chrom_map, vec![entry("chr1", 1, 2, "")], Some(&token));
    assert!(matches!(result, Err(BBIWriteError::Cancelled)));
}

#[test]
fn test_empty_file() -> Result<(), Box<dyn Error>> {
    let tempfile = write_bigbed(vec![], &[("chr1", 1000)], None)?;
    let mut bbread = BigBedRead::open_file(tempfile.path())?;
    assert_eq!(bbread.chroms().len(), 1);
    let all: Vec<BedEntry> = bbread
        .query("chr1", 0, 1000, true, None)?
        .collect::<Result<_, _>>()?;
    assert!(all.is_empty());
    let summary = bbread.get_summary()?;
    assert_eq!(summary.total_items, 0);
    assert_eq!(summary.bases_covered, 0);
    assert!(bbread.info().zoom_headers.is_empty());
    Ok(())
}

#[test]
fn test_file_type_detection() -> Result<(), Box<dyn Error>> {
    let tempfile = write_bigbed(vec![entry("chr1", 1, 2, "")], &[("chr1", 10)], None)?;

    let mut file = std::fs::File::open(tempfile.path())?;
    assert_eq!(determine_file_type(&mut file)?, Some(BBIFile::BigBed));

    let generic = GenericBBIRead::open_file(tempfile.path())?;
    assert!(matches!(generic, GenericBBIRead::BigBed(_)));
    assert!(generic.bigwig().is_none());

    let mut not_bbi = std::io::Cursor::new(b"track type=bed\n".to_vec());
    assert_eq!(determine_file_type(&mut not_bbi)?, None);
    Ok(())
}

#[test]
fn test_open_errors() -> Result<(), Box<dyn Error>> {
    // Neither endianness of the magic matches.
    let garbage = std::io::Cursor::new(vec![0u8; 64]);
    assert!(matches!(
        BigBedRead::open(garbage),
        Err(BBIReadError::BadSignature)
    ));

    // A valid magic with a version outside [1, 5].
    let mut header = vec![0u8; 64];
    header[..4].copy_from_slice(&0x8789_F2EBu32.to_le_bytes());
    header[4..6].copy_from_slice(&9u16.to_le_bytes());
    assert!(matches!(
        BigBedRead::open(std::io::Cursor::new(header)),
        Err(BBIReadError::UnsupportedVersion(9))
    ));

    // A real bigBed is not a bigWig.
    let tempfile = write_bigbed(vec![entry("chr1", 1, 2, "")], &[("chr1", 10)], None)?;
    assert!(matches!(
        BigWigRead::open_file(tempfile.path()),
        Err(BBIReadError::WrongFileType)
    ));
    Ok(())
}

#[test]
fn test_summarize_coverage() -> Result<(), Box<dyn Error>> {
    // 100 adjacent 10-base entries covering chr1[0, 1000).
    let entries: Vec<BedEntry> = (0..100).map(|i| entry("chr1", i * 10, i * 10 + 10, "")).collect();
    let tempfile = write_bigbed(entries, &[("chr1", 1000)], None)?;
    let mut bbread = BigBedRead::open_file(tempfile.path())?;

    let bins = bbread.summarize("chr1", 0, 1000, 4, None)?;
    assert_eq!(bins.len(), 4);
    for bin in &bins {
        assert_eq!(bin.count, 250);
        assert_eq!(bin.min_val, 1.0);
        assert_eq!(bin.max_val, 1.0);
        assert!((bin.sum - 250.0).abs() < 1e-9);
    }

    let sparse = bbread.summarize_indexed("chr1", 0, 2000, 2, None)?;
    assert_eq!(sparse.len(), 1);
    assert_eq!(sparse[0].0, 0);

    // Unknown chromosome: all-empty bins.
    let bins = bbread.summarize("chrNope", 0, 1000, 4, None)?;
    assert!(bins.iter().all(|b| b.count == 0));
    Ok(())
}
