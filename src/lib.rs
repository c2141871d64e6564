/*!
Bbifile provides an API for reading and writing bigWig and bigBed files.

The original file format specification for bigWig and bigBed files is defined
in this paper: <https://doi.org/10.1093/bioinformatics/btq351>

## Reading

The entrypoint to reading bigWigs and bigBeds is [`BigWigRead::open`] and
[`BigBedRead::open`], respectively. These take any type that implements both
[`Read`][std::io::Read] and [`Seek`][std::io::Seek]. There are also
[`BigWigRead::open_file`] and [`BigBedRead::open_file`], which open a `File`
from a path. If the file type is not known up front, [`GenericBBIRead::open`]
detects it, and [`determine_file_type`] peeks at the magic without
constructing a reader.

Once a reader has been constructed, the header and chromosome list are
available through its `info` and `chroms` methods. The main data is read with
[`BigWigRead::query`] or [`BigBedRead::query`], which return the sections or
entries intersecting (or contained in) a half-open interval on a named
chromosome. Aggregated data is available through `summarize`, which bins an
interval and combines precomputed zoom summaries, falling back on the raw
data when no zoom level is coarse enough.

## Writing

Writing is done with [`BigWigWrite`] and [`BigBedWrite`]. Both are created
with `create_file` and consume an iterator of values sorted by
`(chromosome, start)`, together with a map of chromosome sizes:

```rust,no_run
# use std::collections::HashMap;
# use bbifile::{BedEntry, BigBedWrite};
# fn main() -> Result<(), Box<dyn std::error::Error>> {
let mut chrom_sizes = HashMap::new();
chrom_sizes.insert("chr1".to_string(), 1000);

let entries = vec![BedEntry {
    chrom: "chr1".to_string(),
    start: 100,
    end: 200,
    rest: String::new(),
}];

let out = BigBedWrite::create_file("out.bigBed");
out.write(chrom_sizes, entries, None)?;
# Ok(())
# }
```

The writer streams data blocks to the file while building the interval
index, then appends the zoom pyramid and patches the fixed-size header in
place. A failed write leaves a truncated file behind; deleting it is the
caller's responsibility.
*/

mod bbi;
pub mod bed;
pub mod utils;

pub use bbi::*;
