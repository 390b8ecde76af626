/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! A dump tool for Lily executable images, in the spirit of the teacher's
//! `tools/ttt` (which reads a kernel ELF and prints its translation-table
//! mapping plan): here the ELF being read is a userspace automaton image,
//! and what gets printed is its load segments and `spec.md` §4.3 action
//! descriptor catalog instead of page-table entries.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use kernel::loader::{self, LoadSegment, ParsedImage, RawActionDescriptor};
use prettytable::{row, Table};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "image-inspect", about = "Inspect a Lily automaton image")]
struct Args {
    /// Path of the image file to inspect.
    image: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let bytes = fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))?;

    let parsed = loader::parse(&bytes).with_context(|| {
        format!(
            "{} is not a well-formed Lily image",
            args.image.display()
        )
    })?;

    println!(
        "{:>12} {} ({} bytes)",
        "Inspecting".green().bold(),
        args.image.display(),
        bytes.len()
    );
    print_segments(&parsed);
    print_actions(&parsed);

    Ok(())
}

fn print_segments(image: &ParsedImage) {
    println!("\n{}", "load segments".bold());
    let mut table = Table::new();
    table.add_row(row![b => "vaddr", "fsize", "msize", "perm", "align", "offset"]);
    for seg in &image.segments {
        table.add_row(row![
            format!("{:#010x}", seg.vaddr),
            seg.fsize,
            seg.msize,
            perm_string(seg),
            seg.alignment,
            format!("{:#x}", seg.offset),
        ]);
    }
    table.printstd();
}

fn perm_string(seg: &LoadSegment) -> String {
    let mut s = String::with_capacity(3);
    s.push(if seg.perm.read { 'r' } else { '-' });
    s.push(if seg.perm.write { 'w' } else { '-' });
    s.push(if seg.perm.execute { 'x' } else { '-' });
    s
}

fn print_actions(image: &ParsedImage) {
    println!("\n{}", "action descriptors".bold());
    if image.actions.is_empty() {
        println!("  (none)");
        return;
    }
    let mut table = Table::new();
    table.add_row(row![b => "name", "kind", "param", "compare", "entry", "description"]);
    for action in &image.actions {
        table.add_row(row![
            action.name,
            action_kind_string(action),
            param_mode_string(action),
            compare_string(action),
            format!("{:#010x}", action.entry),
            action.description,
        ]);
    }
    table.printstd();
}

fn action_kind_string(action: &RawActionDescriptor) -> &'static str {
    use kernel::action::ActionKind::*;
    match action.kind {
        Input => "input",
        Output => "output",
        Internal => "internal",
        SystemInput => "system_input",
    }
}

fn param_mode_string(action: &RawActionDescriptor) -> &'static str {
    use kernel::action::ParamMode::*;
    match action.param_mode {
        None => "none",
        Explicit => "explicit",
        Auto => "auto",
    }
}

fn compare_string(action: &RawActionDescriptor) -> &'static str {
    use kernel::action::Compare::*;
    match action.compare {
        None => "none",
        Equal => "equal",
    }
}
