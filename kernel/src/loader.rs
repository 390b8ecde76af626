/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! C3 — the loader (`spec.md` §4.3): a pure function from an executable
//! image to load segments plus action descriptors. `spec.md` §1 treats the
//! loader as an external collaborator ("the executable-image parser —
//! consumed as a *loader* that returns action descriptors plus load
//! segments"); this module is that collaborator, not part of the kernel
//! core proper, and it never touches kernel state — `create` (in
//! `automaton.rs`) is the caller that installs its findings.
//!
//! Images are 32-bit little-endian ELF executables (`spec.md` §6, Image
//! format), the way `tools/ttt` in the teacher repo reads ELF via `goblin`
//! for its translation-table dump — here repurposed to find a single
//! `SHT_NOTE` section named `"lily"` holding a packed sequence of action
//! descriptors instead of page-table entries.

use crate::action::{ActionKind, Compare, ParamMode};
use goblin::elf::header::{self, ELFMAG, SIZEOF_IDENT};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::SHT_NOTE;
use snafu::Snafu;

pub const PAGE_SIZE: u32 = 4096;
const ACTION_DESCRIPTOR_NOTE_TYPE: u32 = 1;
const LILY_NOTE_NAME: &[u8] = b"lily\0";

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum LoaderError {
    #[snafu(display("malformed executable image: {reason}"))]
    BadText { reason: &'static str },
}

fn bad(reason: &'static str) -> LoaderError {
    LoaderError::BadText { reason }
}

/// `spec.md` §4.3: `(vaddr, fsize, msize, perm, alignment, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u32,
    pub fsize: u32,
    pub msize: u32,
    pub perm: SegmentPerm,
    pub alignment: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPerm {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl SegmentPerm {
    fn from_elf_flags(flags: u32) -> Self {
        Self {
            execute: flags & 0x1 != 0,
            write: flags & 0x2 != 0,
            read: flags & 0x4 != 0,
        }
    }

    fn any(&self) -> bool {
        self.read || self.write || self.execute
    }
}

/// `spec.md` §6, Image format: one record per action, straight out of the
/// `"lily"` note section.
#[derive(Debug, Clone)]
pub struct RawActionDescriptor {
    pub name: String,
    pub description: String,
    pub compare: Compare,
    pub kind: ActionKind,
    pub entry: u32,
    pub param_mode: ParamMode,
}

#[derive(Debug)]
pub struct ParsedImage {
    pub segments: Vec<LoadSegment>,
    pub actions: Vec<RawActionDescriptor>,
}

/// Reserved virtual range load segments may not overlap — the kernel's own
/// mapping, fixed at a well-known address by convention.
pub const KERNEL_RESERVED: core::ops::Range<u32> = 0xF000_0000..0xFFFF_FFFF;

pub fn parse(image: &[u8]) -> Result<ParsedImage, LoaderError> {
    validate_preamble(image)?;
    let segments = parse_segments(image)?;
    let actions = parse_actions(image)?;
    if segments.is_empty() {
        return Err(bad("image has no load segments"));
    }
    Ok(ParsedImage { segments, actions })
}

fn validate_preamble(image: &[u8]) -> Result<(), LoaderError> {
    if image.len() < SIZEOF_IDENT + 36 {
        return Err(bad("image too small for an ELF header"));
    }
    if &image[0..4] != ELFMAG {
        return Err(bad("bad magic"));
    }
    if image[header::EI_CLASS] != header::ELFCLASS32 {
        return Err(bad("not a 32-bit image"));
    }
    if image[header::EI_DATA] != header::ELFDATA2LSB {
        return Err(bad("not little-endian"));
    }
    let version = u32::from_le_bytes(image[20..24].try_into().unwrap());
    if version != 1 {
        return Err(bad("unsupported version"));
    }
    let e_type = u16::from_le_bytes(image[16..18].try_into().unwrap());
    if e_type as u32 != header::ET_EXEC.into() {
        return Err(bad("image is not an executable"));
    }
    let e_machine = u16::from_le_bytes(image[18..20].try_into().unwrap());
    if e_machine == 0 {
        return Err(bad("unknown architecture"));
    }
    Ok(())
}

fn read_u32(image: &[u8], off: usize) -> Result<u32, LoaderError> {
    image
        .get(off..off + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| bad("truncated header field"))
}

fn read_u16(image: &[u8], off: usize) -> Result<u16, LoaderError> {
    image
        .get(off..off + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| bad("truncated header field"))
}

fn parse_segments(image: &[u8]) -> Result<Vec<LoadSegment>, LoaderError> {
    let phoff = read_u32(image, 28)? as usize;
    let phentsize = read_u16(image, 42)? as usize;
    let phnum = read_u16(image, 44)? as usize;
    let mut segments = Vec::new();
    for i in 0..phnum {
        let base = phoff + i * phentsize;
        let entry = image
            .get(base..base + 32)
            .ok_or_else(|| bad("program header out of range"))?;
        let p_type = u32::from_le_bytes(entry[0..4].try_into().unwrap());
        if p_type != PT_LOAD {
            continue;
        }
        let offset = u32::from_le_bytes(entry[4..8].try_into().unwrap());
        let vaddr = u32::from_le_bytes(entry[8..12].try_into().unwrap());
        let fsize = u32::from_le_bytes(entry[16..20].try_into().unwrap());
        let msize = u32::from_le_bytes(entry[20..24].try_into().unwrap());
        let flags = u32::from_le_bytes(entry[24..28].try_into().unwrap());
        let alignment = u32::from_le_bytes(entry[28..32].try_into().unwrap());
        let perm = SegmentPerm::from_elf_flags(flags);

        validate_segment(image, offset, vaddr, fsize, msize, alignment, &perm)?;

        segments.push(LoadSegment {
            vaddr,
            fsize,
            msize,
            perm,
            alignment,
            offset,
        });
    }
    Ok(segments)
}

fn validate_segment(
    image: &[u8],
    offset: u32,
    vaddr: u32,
    fsize: u32,
    msize: u32,
    alignment: u32,
    perm: &SegmentPerm,
) -> Result<(), LoaderError> {
    let end = offset
        .checked_add(fsize)
        .ok_or_else(|| bad("segment overflows image"))?;
    if end as usize > image.len() {
        return Err(bad("segment not fully contained in image"));
    }
    let vend = vaddr.checked_add(msize).ok_or_else(|| bad("segment overflows address space"))?;
    if vaddr < KERNEL_RESERVED.end && vend > KERNEL_RESERVED.start {
        return Err(bad("segment overlaps the kernel's reserved virtual range"));
    }
    if fsize > msize {
        return Err(bad("file size exceeds memory size"));
    }
    if alignment != PAGE_SIZE {
        return Err(bad("segment alignment is not the page size"));
    }
    if offset % alignment != vaddr % alignment {
        return Err(bad("file and virtual offsets are not congruent modulo alignment"));
    }
    if !perm.any() {
        return Err(bad("segment has no permission bits set"));
    }
    Ok(())
}

fn parse_actions(image: &[u8]) -> Result<Vec<RawActionDescriptor>, LoaderError> {
    let shoff = read_u32(image, 32)? as usize;
    let shentsize = read_u16(image, 46)? as usize;
    let shnum = read_u16(image, 48)? as usize;
    let shstrndx = read_u16(image, 50)? as usize;

    let string_table_offset = if shstrndx < shnum {
        let base = shoff + shstrndx * shentsize;
        let hdr = image
            .get(base..base + 40)
            .ok_or_else(|| bad("section header out of range"))?;
        u32::from_le_bytes(hdr[16..20].try_into().unwrap()) as usize
    } else {
        0
    };

    let mut actions = Vec::new();
    for i in 0..shnum {
        let base = shoff + i * shentsize;
        let hdr = image
            .get(base..base + 40)
            .ok_or_else(|| bad("section header out of range"))?;
        let sh_name = u32::from_le_bytes(hdr[0..4].try_into().unwrap()) as usize;
        let sh_type = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
        let sh_offset = u32::from_le_bytes(hdr[16..20].try_into().unwrap()) as usize;
        let sh_size = u32::from_le_bytes(hdr[20..24].try_into().unwrap()) as usize;

        if sh_type != SHT_NOTE {
            continue;
        }
        if !section_named(image, string_table_offset, sh_name, b"lily") {
            continue;
        }
        let body = image
            .get(sh_offset..sh_offset + sh_size)
            .ok_or_else(|| bad("note section out of range"))?;
        actions.extend(parse_note_section(body)?);
    }
    Ok(actions)
}

fn section_named(image: &[u8], strtab: usize, name_off: usize, want: &[u8]) -> bool {
    let start = strtab + name_off;
    match image.get(start..) {
        Some(rest) => {
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            &rest[..end] == want
        }
        None => false,
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn parse_note_section(mut body: &[u8]) -> Result<Vec<RawActionDescriptor>, LoaderError> {
    let mut out = Vec::new();
    while !body.is_empty() {
        if body.len() < 12 {
            return Err(bad("truncated note header"));
        }
        let namesz = u32::from_le_bytes(body[0..4].try_into().unwrap()) as usize;
        let descsz = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
        let note_type = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let mut cursor = 12;

        let name = body
            .get(cursor..cursor + namesz)
            .ok_or_else(|| bad("truncated note name"))?;
        cursor += align4(namesz);

        let desc = body
            .get(cursor..cursor + descsz)
            .ok_or_else(|| bad("truncated note descriptor"))?;
        cursor += align4(descsz);

        if name != LILY_NOTE_NAME || note_type != ACTION_DESCRIPTOR_NOTE_TYPE {
            body = &body[cursor..];
            continue;
        }
        out.push(parse_action_record(desc)?);
        body = &body[cursor..];
    }
    Ok(out)
}

fn parse_action_record(desc: &[u8]) -> Result<RawActionDescriptor, LoaderError> {
    if desc.len() < 16 {
        return Err(bad("truncated action descriptor"));
    }
    let name_size = u32::from_le_bytes(desc[0..4].try_into().unwrap()) as usize;
    let desc_size = u32::from_le_bytes(desc[4..8].try_into().unwrap()) as usize;
    let compare_method = desc[8];
    let action_type = desc[9];
    let parameter_mode = desc[10];
    // desc[11] is padding, keeping `entry` 4-byte aligned.
    let entry = u32::from_le_bytes(
        desc.get(12..16)
            .ok_or_else(|| bad("truncated action descriptor entry"))?
            .try_into()
            .unwrap(),
    );

    let mut cursor = 16;
    let name_bytes = desc
        .get(cursor..cursor + name_size)
        .ok_or_else(|| bad("truncated action name"))?;
    cursor += name_size;
    let desc_bytes = desc
        .get(cursor..cursor + desc_size)
        .ok_or_else(|| bad("truncated action description"))?;

    let name = nul_terminated_string(name_bytes)?;
    let description = nul_terminated_string(desc_bytes)?;

    Ok(RawActionDescriptor {
        name,
        description,
        compare: decode_compare(compare_method)?,
        kind: decode_kind(action_type)?,
        entry,
        param_mode: decode_param_mode(parameter_mode)?,
    })
}

fn nul_terminated_string(bytes: &[u8]) -> Result<String, LoaderError> {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| bad("string field is not NUL-terminated"))?;
    String::from_utf8(bytes[..end].to_vec()).map_err(|_| bad("string field is not valid UTF-8"))
}

fn decode_kind(v: u8) -> Result<ActionKind, LoaderError> {
    match v {
        0 => Ok(ActionKind::Input),
        1 => Ok(ActionKind::Output),
        2 => Ok(ActionKind::Internal),
        3 => Ok(ActionKind::SystemInput),
        _ => Err(bad("action type enum out of range")),
    }
}

fn decode_param_mode(v: u8) -> Result<ParamMode, LoaderError> {
    match v {
        0 => Ok(ParamMode::None),
        1 => Ok(ParamMode::Explicit),
        2 => Ok(ParamMode::Auto),
        _ => Err(bad("parameter mode enum out of range")),
    }
}

fn decode_compare(v: u8) -> Result<Compare, LoaderError> {
    match v {
        0 => Ok(Compare::None),
        1 => Ok(Compare::Equal),
        _ => Err(bad("compare method enum out of range")),
    }
}
