use std::collections::HashMap;
use std::error::Error;

use byteordered::Endianness;
use tempfile::NamedTempFile;

use bbifile::{
    BBIWriteError, BBIWriteOptions, BedGraphSection, BigWigRead, BigWigWrite, FixedStepSection,
    Value, VariableStepSection, WigSection,
};

fn write_bigwig(
    sections: Vec<WigSection>,
    chrom_sizes: &[(&str, u32)],
    options: Option<BBIWriteOptions>,
) -> Result<NamedTempFile, BBIWriteError> {
    let tempfile = NamedTempFile::new().unwrap();
    let mut out = BigWigWrite::create_file(tempfile.path());
    if let Some(options) = options {
        out.options = options;
    }
    let chrom_map: HashMap<String, u32> = chrom_sizes
        .iter()
        .map(|(name, size)| (name.to_string(), *size))
        .collect();
    out.write(chrom_map, sections, None)?;
    Ok(tempfile)
}

fn fixed(chrom: &str, start: u32, step: u32, span: u32, values: Vec<f32>) -> WigSection {
    WigSection::FixedStep(FixedStepSection {
        chrom: chrom.to_string(),
        start,
        step,
        span,
        values,
    })
}

#[test]
fn test_fixed_step_query() -> Result<(), Box<dyn Error>> {
    // Intervals [10,12), [15,17), [20,22), [25,27).
    let section = fixed("chrX", 10, 5, 2, vec![1.0, 2.0, 3.0, 4.0]);
    let tempfile = write_bigwig(vec![section], &[("chrX", 100)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let sections = bwread.query("chrX", 12, 22, false, None)?;
    assert_eq!(
        sections,
        vec![fixed("chrX", 15, 5, 2, vec![2.0, 3.0])]
    );
    Ok(())
}

#[test]
fn test_variable_step_query() -> Result<(), Box<dyn Error>> {
    let section = WigSection::VariableStep(VariableStepSection {
        chrom: "chrY".to_string(),
        span: 1,
        positions: vec![5, 10, 15],
        values: vec![1.0, 2.0, 3.0],
    });
    let tempfile = write_bigwig(vec![section], &[("chrY", 100)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let sections = bwread.query("chrY", 6, 15, false, None)?;
    assert_eq!(
        sections,
        vec![WigSection::VariableStep(VariableStepSection {
            chrom: "chrY".to_string(),
            span: 1,
            positions: vec![10],
            values: vec![2.0],
        })]
    );

    // With overlaps, [5,6) and [15,16) intersect the query too.
    let sections = bwread.query("chrY", 6, 16, true, None)?;
    match &sections[0] {
        WigSection::VariableStep(s) => assert_eq!(s.positions, vec![5, 10, 15]),
        _ => panic!("expected variable step"),
    }
    Ok(())
}

#[test]
fn test_round_trip_sections() -> Result<(), Box<dyn Error>> {
    let sections = vec![
        fixed("chr1", 100, 10, 10, vec![0.5, 1.5, 2.5]),
        WigSection::VariableStep(VariableStepSection {
            chrom: "chr1".to_string(),
            span: 3,
            positions: vec![500, 600, 750],
            values: vec![-1.0, 0.25, 9.5],
        }),
        fixed("chr2", 0, 5, 5, vec![7.0, 8.0]),
    ];
    let tempfile = write_bigwig(sections.clone(), &[("chr1", 1000), ("chr2", 1000)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let mut read_back = bwread.query("chr1", 0, 1000, false, None)?;
    read_back.extend(bwread.query("chr2", 0, 1000, false, None)?);
    assert_eq!(read_back, sections);
    Ok(())
}

#[test]
fn test_round_trip_splices_large_sections() -> Result<(), Box<dyn Error>> {
    let values: Vec<f32> = (0..40_000).map(|i| (i % 17) as f32).collect();
    let section = fixed("chr1", 0, 10, 10, values);
    let tempfile = write_bigwig(vec![section.clone()], &[("chr1", 1_000_000)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let read_back = bwread.query("chr1", 0, 1_000_000, false, None)?;
    let expected = section.splice(i16::MAX as usize);
    assert_eq!(read_back.len(), 2);
    assert_eq!(read_back, expected);
    Ok(())
}

#[test]
fn test_endianness_symmetry() -> Result<(), Box<dyn Error>> {
    let sections = vec![fixed("chr1", 50, 4, 4, vec![1.25, -2.5, 1e-7, 3e12])];
    let mut results = Vec::new();
    for endianness in [Endianness::Big, Endianness::Little] {
        let options = BBIWriteOptions {
            endianness,
            ..Default::default()
        };
        let tempfile = write_bigwig(sections.clone(), &[("chr1", 1000)], Some(options))?;
        let mut bwread = BigWigRead::open_file(tempfile.path())?;
        let values = bwread.values("chr1", 40, 80)?;
        let summary = bwread.get_summary()?;
        results.push((values, summary.sum));
    }
    let (values_be, sum_be) = &results[0];
    let (values_le, sum_le) = &results[1];
    assert_eq!(sum_be, sum_le);
    assert_eq!(values_be.len(), values_le.len());
    for (be, le) in values_be.iter().zip(values_le.iter()) {
        assert!((be.is_nan() && le.is_nan()) || be == le);
    }
    Ok(())
}

#[test]
fn test_values_fill() -> Result<(), Box<dyn Error>> {
    let tempfile = write_bigwig(
        vec![fixed("chr1", 10, 5, 2, vec![1.0, 2.0])],
        &[("chr1", 100)],
        None,
    )?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;
    let values = bwread.values("chr1", 8, 18)?;
    assert_eq!(values.len(), 10);
    assert!(values[0].is_nan());
    assert!(values[1].is_nan());
    assert_eq!(values[2], 1.0); // position 10
    assert_eq!(values[3], 1.0);
    assert!(values[4].is_nan());
    assert_eq!(values[7], 2.0); // position 15
    assert_eq!(values[8], 2.0);
    assert!(values[9].is_nan());
    Ok(())
}

#[test]
fn test_bedgraph_sections_are_rejected() {
    let section = WigSection::BedGraph(BedGraphSection {
        chrom: "chr1".to_string(),
        ranges: vec![Value {
            start: 0,
            end: 10,
            value: 1.0,
        }],
    });
    let result = write_bigwig(vec![section], &[("chr1", 100)], None);
    assert!(matches!(result, Err(BBIWriteError::UnsupportedSection)));
}

#[test]
fn test_zoomed_summarize() -> Result<(), Box<dyn Error>> {
    // 10 000 contiguous 100-base windows of value 1 covering chr1[0, 1M).
    let section = fixed("chr1", 0, 100, 100, vec![1.0; 10_000]);
    let tempfile = write_bigwig(vec![section], &[("chr1", 1_000_000)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let bins = bwread.summarize("chr1", 0, 1_000_000, 10, None)?;
    assert_eq!(bins.len(), 10);
    for bin in &bins {
        assert!((bin.count as f64 - 100_000.0).abs() < 1_000.0);
        assert!((bin.sum - 100_000.0).abs() < 1_000.0);
        assert_eq!(bin.min_val, 1.0);
        assert_eq!(bin.max_val, 1.0);
    }
    Ok(())
}

#[test]
fn test_zoom_levels_written_and_queryable() -> Result<(), Box<dyn Error>> {
    // Varied values so the data section does not compress into nothing and
    // the lower zoom levels survive the size cutoff.
    let values: Vec<f32> = (0..20_000).map(|i| ((i * 31) % 997) as f32).collect();
    let section = fixed("chr1", 0, 50, 50, values.clone());
    let tempfile = write_bigwig(vec![section], &[("chr1", 1_000_000)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let zooms = bwread.info().zoom_headers.to_vec();
    assert!(!zooms.is_empty());

    // Every zoom level conserves the total sum of the raw data.
    let total: f64 = values.iter().map(|v| 50.0 * f64::from(*v)).sum();
    for zoom in &zooms {
        let records = bwread.get_zoom_interval("chr1", 0, 1_000_000, zoom.reduction_level)?;
        assert!(!records.is_empty());
        let zoom_sum: f64 = records.iter().map(|r| r.summary.sum).sum();
        let zoom_count: u64 = records.iter().map(|r| r.summary.count).sum();
        assert_eq!(zoom_count, 1_000_000);
        assert!((zoom_sum - total).abs() / total < 1e-4);
    }
    Ok(())
}

#[test]
fn test_summary_conservation() -> Result<(), Box<dyn Error>> {
    let values: Vec<f32> = (0..20_000).map(|i| ((i * 31) % 997) as f32).collect();
    let section = fixed("chr1", 0, 50, 50, values);
    let tempfile = write_bigwig(vec![section], &[("chr1", 1_000_000)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;

    let total = bwread.get_summary()?;

    // Partitioning the covered interval must conserve the sum, whether the
    // bins aggregate zoom records or raw values.
    for num_bins in [1, 7, 100] {
        let bins = bwread.summarize("chr1", 0, 1_000_000, num_bins, None)?;
        let sum: f64 = bins.iter().map(|b| b.sum).sum();
        assert!(
            (sum - total.sum).abs() / total.sum < 1e-3,
            "{} bins: {} != {}",
            num_bins,
            sum,
            total.sum
        );
        let count: u64 = bins.iter().map(|b| b.count).sum();
        assert!((count as f64 - total.bases_covered as f64).abs() < 1000.0);
    }
    Ok(())
}

#[test]
fn test_unknown_chrom_query_is_empty() -> Result<(), Box<dyn Error>> {
    let tempfile = write_bigwig(
        vec![fixed("chr1", 0, 10, 10, vec![1.0])],
        &[("chr1", 100)],
        None,
    )?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;
    assert!(bwread.query("chrMissing", 0, 100, true, None)?.is_empty());
    let flat: Vec<Value> = bwread
        .get_interval("chrMissing", 0, 100)?
        .collect::<Result<_, _>>()?;
    assert!(flat.is_empty());
    Ok(())
}

#[test]
fn test_sections_dropped_for_unknown_chroms() -> Result<(), Box<dyn Error>> {
    let sections = vec![
        fixed("chr1", 0, 10, 10, vec![1.0]),
        fixed("chrUn", 0, 10, 10, vec![5.0]),
    ];
    let tempfile = write_bigwig(sections, &[("chr1", 100)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;
    let summary = bwread.get_summary()?;
    assert_eq!(summary.bases_covered, 10);
    assert_eq!(summary.max_val, 1.0);
    Ok(())
}

#[test]
fn test_overlapping_fixed_step_preserved() -> Result<(), Box<dyn Error>> {
    // step < span: intervals overlap and must round-trip untouched.
    let section = fixed("chr1", 0, 5, 8, vec![1.0, 2.0, 3.0]);
    let tempfile = write_bigwig(vec![section.clone()], &[("chr1", 100)], None)?;
    let mut bwread = BigWigRead::open_file(tempfile.path())?;
    let read_back = bwread.query("chr1", 0, 100, false, None)?;
    assert_eq!(read_back, vec![section]);
    Ok(())
}

#[test]
fn test_reopened_readers_are_independent() -> Result<(), Box<dyn Error>> {
    use bbifile::utils::Reopen;

    let tempfile = write_bigwig(
        vec![fixed("chr1", 0, 10, 10, vec![1.0, 2.0, 3.0])],
        &[("chr1", 100)],
        None,
    )?;
    let mut first = BigWigRead::open_file(tempfile.path())?;
    let mut second = first.reopen()?;

    // Interleaved reads through independent cursors see the same data.
    let a = first.values("chr1", 0, 30)?;
    let b = second.values("chr1", 0, 30)?;
    let c = first.values("chr1", 0, 30)?;
    assert_eq!(a, b);
    assert_eq!(a, c);
    Ok(())
}

#[test]
fn test_wig_ordering_violation() {
    let sections = vec![
        fixed("chr1", 500, 10, 10, vec![1.0]),
        fixed("chr1", 100, 10, 10, vec![1.0]),
    ];
    let result = write_bigwig(sections, &[("chr1", 1000)], None);
    assert!(matches!(result, Err(BBIWriteError::OrderingViolation(_))));
}

#[test]
fn test_invalid_variable_step_positions() {
    let section = WigSection::VariableStep(VariableStepSection {
        chrom: "chr1".to_string(),
        span: 1,
        positions: vec![10, 10],
        values: vec![1.0, 2.0],
    });
    let result = write_bigwig(vec![section], &[("chr1", 100)], None);
    assert!(matches!(result, Err(BBIWriteError::InvalidInput(_))));
}
