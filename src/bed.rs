/*!
Typed access to the optional fields of a bed entry.

A [`BedEntry`](crate::BedEntry) stores everything after `chrom`, `start`,
and `end` as an opaque tab-delimited `rest` string. [`ExtendedBedEntry`]
decomposes that tail into the standard BED12 fields; [`ExtendedBedEntry::pack`]
is the inverse.
*/

use crate::BedEntry;

/// The strand of a bed entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    fn parse(field: &str) -> Option<Strand> {
        match field {
            "+" => Some(Strand::Forward),
            "-" => Some(Strand::Reverse),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        }
    }
}

/// The decomposed tail of a bed entry. Fields a line does not carry (or
/// carries as the `.`/`0` placeholders) are `None`; columns past BED12 land
/// in `extra`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtendedBedEntry {
    pub name: Option<String>,
    pub score: Option<u16>,
    pub strand: Option<Strand>,
    pub thick_start: Option<u32>,
    pub thick_end: Option<u32>,
    pub item_rgb: Option<(u8, u8, u8)>,
    pub block_sizes: Option<Vec<u32>>,
    pub block_starts: Option<Vec<u32>>,
    pub extra: Vec<String>,
}

fn parse_u32_list(field: &str) -> Option<Vec<u32>> {
    field
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().ok())
        .collect()
}

fn parse_rgb(field: &str) -> Option<(u8, u8, u8)> {
    let mut parts = field.split(',');
    let r = parts.next()?.parse().ok()?;
    let g = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((r, g, b))
}

impl ExtendedBedEntry {
    /// Decomposes the `rest` tail of a bed entry. Parsing is tolerant:
    /// placeholder or malformed fields become `None`.
    pub fn unpack(rest: &str) -> ExtendedBedEntry {
        let mut entry = ExtendedBedEntry::default();
        if rest.is_empty() {
            return entry;
        }
        for (i, field) in rest.split('\t').enumerate() {
            match i {
                0 => {
                    if field != "." {
                        entry.name = Some(field.to_string());
                    }
                }
                1 => entry.score = field.parse().ok(),
                2 => entry.strand = Strand::parse(field),
                3 => entry.thick_start = field.parse().ok(),
                4 => entry.thick_end = field.parse().ok(),
                5 => entry.item_rgb = parse_rgb(field),
                6 => {} // block count; the lists carry it
                7 => entry.block_sizes = parse_u32_list(field),
                8 => entry.block_starts = parse_u32_list(field),
                _ => entry.extra.push(field.to_string()),
            }
        }
        entry
    }

    /// Rebuilds the `rest` tail. Emits fields up to the last one present,
    /// using the conventional placeholders for gaps.
    pub fn pack(&self) -> String {
        let field_count = if !self.extra.is_empty() {
            9 + self.extra.len()
        } else if self.block_starts.is_some() {
            9
        } else if self.block_sizes.is_some() {
            8
        } else if self.item_rgb.is_some() {
            6
        } else if self.thick_end.is_some() {
            5
        } else if self.thick_start.is_some() {
            4
        } else if self.strand.is_some() {
            3
        } else if self.score.is_some() {
            2
        } else if self.name.is_some() {
            1
        } else {
            0
        };

        let join = |list: &Option<Vec<u32>>| match list {
            None => ".".to_string(),
            Some(list) => list
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
        };

        let mut fields = Vec::with_capacity(field_count);
        for i in 0..field_count {
            let field = match i {
                0 => self.name.clone().unwrap_or_else(|| ".".to_string()),
                1 => self
                    .score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| ".".to_string()),
                2 => self
                    .strand
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| ".".to_string()),
                3 => self
                    .thick_start
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| ".".to_string()),
                4 => self
                    .thick_end
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| ".".to_string()),
                5 => match self.item_rgb {
                    Some((r, g, b)) => format!("{},{},{}", r, g, b),
                    None => "0".to_string(),
                },
                6 => self
                    .block_sizes
                    .as_ref()
                    .map(|s| s.len().to_string())
                    .unwrap_or_else(|| "0".to_string()),
                7 => join(&self.block_sizes),
                8 => join(&self.block_starts),
                _ => self.extra[i - 9].clone(),
            };
            fields.push(field);
        }
        fields.join("\t")
    }
}

impl BedEntry {
    /// Decomposes this entry's `rest` tail into typed fields.
    pub fn unpack(&self) -> ExtendedBedEntry {
        ExtendedBedEntry::unpack(&self.rest)
    }
}
