use std::collections::VecDeque;
use std::io::{self, Seek, SeekFrom, Write};

use byteordered::{ByteOrdered, Endianness};
use log::debug;
use smallvec::SmallVec;

use crate::bbi::bbiread::BBIReadError;
use crate::bbi::bbiwrite::Section;
use crate::bbi::{check_cancel, CancelToken, CIR_TREE_MAGIC};
use crate::utils::file::{SeekableRead, Tell};

pub(crate) const HEADER_SIZE: u64 = 48;
const NODEHEADER_SIZE: u64 = 1 + 1 + 2;
const NON_LEAFNODE_SIZE: u64 = 4 + 4 + 4 + 4 + 8;
const LEAFNODE_SIZE: u64 = 4 + 4 + 4 + 4 + 8 + 8;

/// A data block pointed to by the interval index
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Block {
    pub fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct RTreeHeader {
    pub(crate) block_size: u32,
    pub(crate) item_count: u64,
    pub(crate) start_chrom_ix: u32,
    pub(crate) start_base: u32,
    pub(crate) end_chrom_ix: u32,
    pub(crate) end_base: u32,
    pub(crate) end_data_offset: u64,
    pub(crate) items_per_slot: u32,
    pub(crate) root_offset: u64,
}

/// Reads the index header at the reader's current position.
pub(crate) fn read_header<R: SeekableRead>(
    file: &mut R,
    endianness: Endianness,
) -> Result<RTreeHeader, BBIReadError> {
    let offset = file.tell()?;
    let mut file = ByteOrdered::runtime(file, endianness);

    let magic = file.read_u32()?;
    if magic != CIR_TREE_MAGIC {
        return Err(BBIReadError::CorruptIndex {
            offset,
            reason: format!("invalid interval index magic (0x{:08x})", magic),
        });
    }
    let block_size = file.read_u32()?;
    let item_count = file.read_u64()?;
    let start_chrom_ix = file.read_u32()?;
    let start_base = file.read_u32()?;
    let end_chrom_ix = file.read_u32()?;
    let end_base = file.read_u32()?;
    let end_data_offset = file.read_u64()?;
    let items_per_slot = file.read_u32()?;
    let _reserved = file.read_u32()?;

    Ok(RTreeHeader {
        block_size,
        item_count,
        start_chrom_ix,
        start_base,
        end_chrom_ix,
        end_base,
        end_data_offset,
        items_per_slot,
        root_offset: offset + HEADER_SIZE,
    })
}

#[inline]
fn compare_position(chrom1: u32, chrom1_base: u32, chrom2: u32, chrom2_base: u32) -> i8 {
    if chrom1 < chrom2 {
        -1
    } else if chrom1 > chrom2 {
        1
    } else if chrom1_base < chrom2_base {
        -1
    } else if chrom1_base > chrom2_base {
        1
    } else {
        0
    }
}

#[inline]
fn overlaps(
    chromq: u32,
    chromq_start: u32,
    chromq_end: u32,
    chromb1: u32,
    chromb1_start: u32,
    chromb2: u32,
    chromb2_end: u32,
) -> bool {
    compare_position(chromq, chromq_start, chromb2, chromb2_end) <= 0
        && compare_position(chromq, chromq_end, chromb1, chromb1_start) >= 0
}

#[derive(Copy, Clone, Debug)]
struct LeafSlot {
    start_chrom_ix: u32,
    start_base: u32,
    end_chrom_ix: u32,
    end_base: u32,
    data_offset: u64,
    data_size: u64,
}

enum Node {
    Leaf(SmallVec<[LeafSlot; 4]>),
    NonLeaf(SmallVec<[(u32, u32, u32, u32, u64); 4]>),
}

/// Reads one node, eagerly materializing its children. The buffer is shared
/// across the whole search, so children must be in memory before descending.
fn read_node<R: SeekableRead>(
    file: &mut R,
    node_offset: u64,
    endianness: Endianness,
) -> Result<Node, BBIReadError> {
    file.seek(SeekFrom::Start(node_offset))?;
    let mut node = ByteOrdered::runtime(&mut *file, endianness);

    let is_leaf = node.read_u8()?;
    let _reserved = node.read_u8()?;
    let count = node.read_u16()?;

    match is_leaf {
        1 => {
            let mut children = SmallVec::with_capacity(count as usize);
            for _ in 0..count {
                children.push(LeafSlot {
                    start_chrom_ix: node.read_u32()?,
                    start_base: node.read_u32()?,
                    end_chrom_ix: node.read_u32()?,
                    end_base: node.read_u32()?,
                    data_offset: node.read_u64()?,
                    data_size: node.read_u64()?,
                });
            }
            Ok(Node::Leaf(children))
        }
        0 => {
            let mut children = SmallVec::with_capacity(count as usize);
            for _ in 0..count {
                children.push((
                    node.read_u32()?,
                    node.read_u32()?,
                    node.read_u32()?,
                    node.read_u32()?,
                    node.read_u64()?,
                ));
            }
            Ok(Node::NonLeaf(children))
        }
        n => Err(BBIReadError::CorruptIndex {
            offset: node_offset,
            reason: format!("unexpected node type ({})", n),
        }),
    }
}

/// Collects the data blocks whose intervals intersect
/// `[start, end)` on `chrom_ix`, in on-disk order.
pub(crate) fn search<R: SeekableRead>(
    file: &mut R,
    endianness: Endianness,
    root_offset: u64,
    chrom_ix: u32,
    start: u32,
    end: u32,
    cancel: Option<&CancelToken>,
) -> Result<Vec<Block>, BBIReadError> {
    let mut blocks = Vec::new();
    let mut remaining = VecDeque::with_capacity(64);
    remaining.push_front(root_offset);
    let mut warned_overlap = false;

    while let Some(node_offset) = remaining.pop_front() {
        check_cancel::<BBIReadError>(cancel)?;
        match read_node(file, node_offset, endianness)? {
            Node::Leaf(children) => {
                let mut prev: Option<(u32, u32)> = None;
                for child in children {
                    if let Some((end_chrom, end_base)) = prev {
                        let disjoint = compare_position(
                            end_chrom,
                            end_base,
                            child.start_chrom_ix,
                            child.start_base,
                        ) <= 0;
                        if !disjoint && !warned_overlap {
                            debug!(
                                "overlapping index leaves at offset {} (tolerated)",
                                node_offset
                            );
                            warned_overlap = true;
                        }
                    }
                    prev = Some((child.end_chrom_ix, child.end_base));
                    if overlaps(
                        chrom_ix,
                        start,
                        end,
                        child.start_chrom_ix,
                        child.start_base,
                        child.end_chrom_ix,
                        child.end_base,
                    ) {
                        blocks.push(Block {
                            offset: child.data_offset,
                            size: child.data_size,
                        });
                    }
                }
            }
            Node::NonLeaf(children) => {
                let matching = children.into_iter().filter(
                    |&(start_chrom_ix, start_base, end_chrom_ix, end_base, _)| {
                        overlaps(
                            chrom_ix, start, end, start_chrom_ix, start_base, end_chrom_ix,
                            end_base,
                        )
                    },
                );
                // Push in reverse so the leftmost child is visited next,
                // keeping blocks in on-disk order.
                for (_, _, _, _, child_offset) in
                    matching.collect::<SmallVec<[_; 4]>>().into_iter().rev()
                {
                    remaining.push_front(child_offset);
                }
            }
        }
    }

    Ok(blocks)
}

/// Writes a complete index for `sections` (sorted by `(chrom, start)`) at
/// the writer's current position. Every node is padded with zero bytes to
/// `block_size` slots, so a child's offset is just its index into its level.
pub(crate) fn write_index<W: Write + Seek>(
    file: &mut W,
    endianness: Endianness,
    sections: &[Section],
    block_size: u32,
    items_per_slot: u32,
) -> io::Result<()> {
    let end_data_offset = file.tell()?;
    let bs = block_size as usize;

    // Tower of interval unions: level 0 covers `bs` sections per node,
    // level i covers `bs^(i+1)`.
    #[derive(Copy, Clone)]
    struct NodeInterval {
        start_chrom_ix: u32,
        start_base: u32,
        end_chrom_ix: u32,
        end_base: u32,
    }

    let union = |intervals: &[NodeInterval]| {
        let mut merged = *intervals.first().unwrap();
        for i in intervals {
            if compare_position(
                i.start_chrom_ix,
                i.start_base,
                merged.start_chrom_ix,
                merged.start_base,
            ) < 0
            {
                merged.start_chrom_ix = i.start_chrom_ix;
                merged.start_base = i.start_base;
            }
            if compare_position(i.end_chrom_ix, i.end_base, merged.end_chrom_ix, merged.end_base)
                > 0
            {
                merged.end_chrom_ix = i.end_chrom_ix;
                merged.end_base = i.end_base;
            }
        }
        merged
    };

    let mut levels: Vec<Vec<NodeInterval>> = Vec::new();
    let leaf_intervals: Vec<NodeInterval> = sections
        .iter()
        .map(|s| NodeInterval {
            start_chrom_ix: s.chrom,
            start_base: s.start,
            end_chrom_ix: s.chrom,
            end_base: s.end,
        })
        .collect();
    let mut current: Vec<NodeInterval> = leaf_intervals
        .chunks(bs)
        .map(union)
        .collect();
    levels.push(current.clone());
    while current.len() > 1 {
        current = current.chunks(bs).map(union).collect();
        levels.push(current.clone());
    }
    // levels[0] holds the leaf nodes; the last entry is the root.

    let mut header = ByteOrdered::runtime(&mut *file, endianness);
    header.write_u32(CIR_TREE_MAGIC)?;
    header.write_u32(block_size)?;
    header.write_u64(sections.len() as u64)?;
    match sections.first() {
        None => {
            header.write_u32(0)?;
            header.write_u32(0)?;
            header.write_u32(0)?;
            header.write_u32(0)?;
        }
        Some(first) => {
            let end = union(&leaf_intervals);
            header.write_u32(first.chrom)?;
            header.write_u32(first.start)?;
            header.write_u32(end.end_chrom_ix)?;
            header.write_u32(end.end_base)?;
        }
    }
    header.write_u64(end_data_offset)?;
    header.write_u32(items_per_slot)?;
    header.write_u32(0)?;

    if sections.is_empty() {
        header.write_u8(1)?;
        header.write_u8(0)?;
        header.write_u16(0)?;
        let padding = vec![0u8; bs * LEAFNODE_SIZE as usize];
        header.write_all(&padding)?;
        return Ok(());
    }

    let leaf_node_size = NODEHEADER_SIZE + LEAFNODE_SIZE * block_size as u64;
    let non_leaf_node_size = NODEHEADER_SIZE + NON_LEAFNODE_SIZE * block_size as u64;
    let node_size = |level: usize| {
        if level == 0 {
            leaf_node_size
        } else {
            non_leaf_node_size
        }
    };

    // Levels are written root first; record where each one starts.
    let root_offset = file.tell()?;
    let mut level_starts = vec![0u64; levels.len()];
    let mut at = root_offset;
    for (i, level) in levels.iter().enumerate().rev() {
        level_starts[i] = at;
        at += level.len() as u64 * node_size(i);
    }

    for (level_ix, level) in levels.iter().enumerate().rev() {
        let is_leaf_level = level_ix == 0;
        let mut node = ByteOrdered::runtime(&mut *file, endianness);
        if is_leaf_level {
            for node_ix in 0..level.len() {
                let slots = &sections[node_ix * bs..((node_ix + 1) * bs).min(sections.len())];
                node.write_u8(1)?;
                node.write_u8(0)?;
                node.write_u16(slots.len() as u16)?;
                for section in slots {
                    node.write_u32(section.chrom)?;
                    node.write_u32(section.start)?;
                    node.write_u32(section.chrom)?;
                    node.write_u32(section.end)?;
                    node.write_u64(section.offset)?;
                    node.write_u64(section.size)?;
                }
                let padding = (bs - slots.len()) * LEAFNODE_SIZE as usize;
                node.write_all(&vec![0u8; padding])?;
            }
        } else {
            let child_level = &levels[level_ix - 1];
            let child_start = level_starts[level_ix - 1];
            let child_node_size = node_size(level_ix - 1);
            for node_ix in 0..level.len() {
                let first_child = node_ix * bs;
                let children =
                    &child_level[first_child..((node_ix + 1) * bs).min(child_level.len())];
                node.write_u8(0)?;
                node.write_u8(0)?;
                node.write_u16(children.len() as u16)?;
                for (child_ix, child) in children.iter().enumerate() {
                    node.write_u32(child.start_chrom_ix)?;
                    node.write_u32(child.start_base)?;
                    node.write_u32(child.end_chrom_ix)?;
                    node.write_u32(child.end_base)?;
                    node.write_u64(child_start + (first_child + child_ix) as u64 * child_node_size)?;
                }
                let padding = (bs - children.len()) * NON_LEAFNODE_SIZE as usize;
                node.write_all(&vec![0u8; padding])?;
            }
        }
    }

    Ok(())
}
