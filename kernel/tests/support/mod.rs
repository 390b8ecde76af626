/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! Shared image-building helpers for the end-to-end tests in this
//! directory, playing the same role `loader.rs`'s own `build_image` plays
//! for its unit tests but generalized to more than one action descriptor
//! per image, since binding scenarios need at least an output and an
//! input action in the same automaton.

use goblin::elf::header::{self, ELFMAG};
use goblin::elf::section_header::SHT_NOTE;
use heap::PoolFrameAllocator;
use kernel::context::KernelContext;
use machine::{SimCpu, SimPorts};

pub const PAGE_SIZE: u32 = 4096;
const LILY_NOTE_NAME: &[u8] = b"lily\0";
const ACTION_DESCRIPTOR_NOTE_TYPE: u32 = 1;

pub type TestKernel = KernelContext<PoolFrameAllocator, SimCpu, SimPorts>;

pub fn ctx() -> TestKernel {
    KernelContext::new(
        kernel::BootConfig::default(),
        PoolFrameAllocator::new(256),
        SimCpu::default(),
        SimPorts::default(),
    )
}

/// One action descriptor to pack into a test image: `(name, kind, entry,
/// param_mode)`, using the same byte codes `loader.rs` decodes — 0/1/2/3
/// for input/output/internal/system_input, 0/1/2 for none/explicit/auto.
pub struct ActionSpec {
    pub name: &'static str,
    pub kind: u8,
    pub entry: u32,
    pub param_mode: u8,
}

pub fn action(name: &'static str, kind: u8, entry: u32, param_mode: u8) -> ActionSpec {
    ActionSpec { name, kind, entry, param_mode }
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn action_record(spec: &ActionSpec) -> Vec<u8> {
    let mut name_bytes = spec.name.as_bytes().to_vec();
    name_bytes.push(0);
    let desc_bytes = vec![0u8];

    let mut record = Vec::new();
    push_u32(&mut record, name_bytes.len() as u32);
    push_u32(&mut record, desc_bytes.len() as u32);
    record.push(0); // compare_method = None
    record.push(spec.kind);
    record.push(spec.param_mode);
    record.push(0); // padding
    push_u32(&mut record, spec.entry);
    record.extend_from_slice(&name_bytes);
    record.extend_from_slice(&desc_bytes);
    while record.len() % 4 != 0 {
        record.push(0);
    }
    record
}

fn note_entry(record: &[u8]) -> Vec<u8> {
    let mut note = Vec::new();
    push_u32(&mut note, LILY_NOTE_NAME.len() as u32);
    push_u32(&mut note, record.len() as u32);
    push_u32(&mut note, ACTION_DESCRIPTOR_NOTE_TYPE);
    note.extend_from_slice(LILY_NOTE_NAME);
    while note.len() % 4 != 0 {
        note.push(0);
    }
    note.extend_from_slice(record);
    while note.len() % 4 != 0 {
        note.push(0);
    }
    note
}

/// Builds a well-formed ELF32 image with one RWX `PT_LOAD` segment and a
/// `"lily"` note section carrying one descriptor per entry in `actions`.
pub fn build_image(actions: &[ActionSpec]) -> Vec<u8> {
    let page = PAGE_SIZE;

    let mut note = Vec::new();
    for spec in actions {
        note.extend_from_slice(&note_entry(&action_record(spec)));
    }

    let ehdr_size = 52u32;
    let phdr_size = 32u32;
    let shdr_size = 40u32;

    let phoff = ehdr_size;
    let load_file_offset = page;
    let load_vaddr = page;
    let load_fsize = 16u32;
    let load_msize = page;

    let note_section_offset = load_file_offset + load_fsize;
    let note_aligned_offset = (note_section_offset + 3) & !3;

    let strtab = b"\0.lily\0".to_vec();
    let strtab_offset = note_aligned_offset + note.len() as u32;
    let shoff = strtab_offset + strtab.len() as u32;

    let mut image = vec![0u8; (shoff + 3 * shdr_size) as usize];
    image[0..4].copy_from_slice(ELFMAG);
    image[header::EI_CLASS] = header::ELFCLASS32;
    image[header::EI_DATA] = header::ELFDATA2LSB;
    image[header::EI_VERSION] = 1;
    image[16..18].copy_from_slice(&(header::ET_EXEC as u16).to_le_bytes());
    image[18..20].copy_from_slice(&1u16.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&load_vaddr.to_le_bytes());
    image[28..32].copy_from_slice(&phoff.to_le_bytes());
    image[32..36].copy_from_slice(&shoff.to_le_bytes());
    image[40..42].copy_from_slice(&(ehdr_size as u16).to_le_bytes());
    image[42..44].copy_from_slice(&(phdr_size as u16).to_le_bytes());
    image[44..46].copy_from_slice(&1u16.to_le_bytes());
    image[46..48].copy_from_slice(&(shdr_size as u16).to_le_bytes());
    image[48..50].copy_from_slice(&3u16.to_le_bytes());
    image[50..52].copy_from_slice(&2u16.to_le_bytes());

    let ph = phoff as usize;
    image[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes());
    image[ph + 4..ph + 8].copy_from_slice(&load_file_offset.to_le_bytes());
    image[ph + 8..ph + 12].copy_from_slice(&load_vaddr.to_le_bytes());
    image[ph + 12..ph + 16].copy_from_slice(&load_vaddr.to_le_bytes());
    image[ph + 16..ph + 20].copy_from_slice(&load_fsize.to_le_bytes());
    image[ph + 20..ph + 24].copy_from_slice(&load_msize.to_le_bytes());
    image[ph + 24..ph + 28].copy_from_slice(&5u32.to_le_bytes());
    image[ph + 28..ph + 32].copy_from_slice(&page.to_le_bytes());

    image[note_aligned_offset as usize..note_aligned_offset as usize + note.len()]
        .copy_from_slice(&note);
    image[strtab_offset as usize..strtab_offset as usize + strtab.len()]
        .copy_from_slice(&strtab);

    let sh1 = shoff as usize + shdr_size as usize;
    image[sh1..sh1 + 4].copy_from_slice(&1u32.to_le_bytes());
    image[sh1 + 4..sh1 + 8].copy_from_slice(&(SHT_NOTE).to_le_bytes());
    image[sh1 + 16..sh1 + 20].copy_from_slice(&note_aligned_offset.to_le_bytes());
    image[sh1 + 20..sh1 + 24].copy_from_slice(&(note.len() as u32).to_le_bytes());

    let sh2 = sh1 + shdr_size as usize;
    image[sh2..sh2 + 4].copy_from_slice(&0u32.to_le_bytes());
    image[sh2 + 16..sh2 + 20].copy_from_slice(&strtab_offset.to_le_bytes());
    image[sh2 + 20..sh2 + 24].copy_from_slice(&(strtab.len() as u32).to_le_bytes());

    image
}
