// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hermes-shm-viewer - Inspect hermes shared memory segments
//!
//! Lists ring and notify segments under /dev/shm and decodes their
//! control blocks. `--clean` unlinks stale segments of one namespace.

use clap::Parser;
use colored::*;
use hermes::transport::shm::{
    cleanup_stale_segments, list_segments, ring_segment_size, NotifyBlock, ShmControl, ShmSegment,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

/// Inspect hermes shared memory segments
#[derive(Parser, Debug)]
#[command(name = "hermes-shm-viewer")]
#[command(version = "0.1.0")]
#[command(about = "Inspect hermes shared memory segments")]
struct Args {
    /// Only segments of this namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Show detailed control block fields
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Output format: pretty, json
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Unlink stale segments of --namespace before listing
    #[arg(long, requires = "namespace")]
    clean: bool,

    /// Specific segment name to inspect (without /dev/shm prefix)
    #[arg()]
    segment: Option<String>,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[derive(Debug)]
struct SegmentInfo {
    name: String,
    file_size: u64,
    kind: SegmentKind,
    error: Option<String>,
}

#[derive(Debug)]
enum SegmentKind {
    Ring(Option<RingControl>),
    Notify(Option<NotifyInfo>),
    Unknown,
}

#[derive(Debug)]
struct RingControl {
    magic: u32,
    version: u32,
    capacity: u32,
    slot_payload: u32,
    reserved: u64,
    complete: bool,
    valid: Result<(), String>,
}

#[derive(Debug)]
struct NotifyInfo {
    magic: u32,
    word: u32,
    committed: u64,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new("/dev/shm").exists() {
        return Err("Shared memory directory /dev/shm not found".into());
    }

    if args.clean {
        if let Some(ns) = &args.namespace {
            let removed = cleanup_stale_segments(ns);
            eprintln!("{} {} stale segment(s) in '{}'", "Removed".yellow(), removed, ns);
        }
    }

    let names = match (&args.segment, &args.namespace) {
        (Some(name), _) => vec![name.trim_start_matches('/').to_string()],
        (None, Some(ns)) => list_segments(ns),
        (None, None) => scan_all()?,
    };
    let segments: Vec<SegmentInfo> = names.iter().map(|n| inspect_segment(n)).collect();

    match args.format {
        OutputFormat::Pretty => print_pretty(&segments, args.verbose),
        OutputFormat::Json => print_json(&segments),
    }
    Ok(())
}

fn scan_all() -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut names = Vec::new();
    for entry in fs::read_dir("/dev/shm")? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with("hermes_") {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Ring names carry `_c_`, notify names `_n_`, after the namespace.
fn classify(name: &str) -> Option<bool> {
    let rest = name.strip_prefix("hermes_")?;
    let (_, tail) = rest.split_once('_')?;
    if tail.starts_with("c_") {
        Some(true)
    } else if tail.starts_with("n_") {
        Some(false)
    } else {
        None
    }
}

fn inspect_segment(name: &str) -> SegmentInfo {
    let file_size = fs::metadata(format!("/dev/shm/{}", name)).map(|m| m.len()).unwrap_or(0);
    let path = format!("/{}", name);

    let opened = ShmSegment::open(&path);
    let (kind, error) = match (classify(name), opened) {
        (None, _) => (SegmentKind::Unknown, None),
        (Some(true), Err(e)) => (SegmentKind::Ring(None), Some(e.to_string())),
        (Some(false), Err(e)) => (SegmentKind::Notify(None), Some(e.to_string())),
        (Some(true), Ok(segment)) => match read_ring(&segment) {
            Some(ctrl) => (SegmentKind::Ring(Some(ctrl)), None),
            None => (SegmentKind::Ring(None), Some("truncated control block".into())),
        },
        (Some(false), Ok(segment)) => match read_notify(&segment) {
            Some(info) => (SegmentKind::Notify(Some(info)), None),
            None => (SegmentKind::Notify(None), Some("truncated notify block".into())),
        },
    };

    SegmentInfo {
        name: name.to_string(),
        file_size,
        kind,
        error,
    }
}

fn read_ring(segment: &ShmSegment) -> Option<RingControl> {
    if segment.size() < ShmControl::SIZE {
        return None;
    }
    // SAFETY: the mapping covers a full control block, mmap is page aligned
    let control = unsafe { &*(segment.as_ptr() as *const ShmControl) };
    let needed = ring_segment_size(control.capacity as usize, control.slot_payload as usize);
    Some(RingControl {
        magic: control.magic.load(Ordering::Acquire),
        version: control.version,
        capacity: control.capacity,
        slot_payload: control.slot_payload,
        reserved: control.reserved(),
        complete: segment.size() >= needed,
        valid: control.validate(),
    })
}

fn read_notify(segment: &ShmSegment) -> Option<NotifyInfo> {
    if segment.size() < NotifyBlock::SIZE {
        return None;
    }
    // SAFETY: the mapping covers a full notify block
    let block = unsafe { &*(segment.as_ptr() as *const NotifyBlock) };
    Some(NotifyInfo {
        magic: block.magic.load(Ordering::Acquire),
        word: block.word.load(Ordering::Acquire),
        committed: block.committed.load(Ordering::Acquire),
    })
}

fn print_pretty(segments: &[SegmentInfo], verbose: bool) {
    if segments.is_empty() {
        println!("{}", "No hermes shared memory segments found".yellow());
        return;
    }

    println!();
    println!("{}", "=== hermes Shared Memory Segments ===".bold());
    println!();

    let mut total_size: u64 = 0;
    let mut rings = 0;
    let mut notifies = 0;

    for seg in segments {
        total_size += seg.file_size;
        let badge = match seg.kind {
            SegmentKind::Ring(_) => {
                rings += 1;
                "RING".green()
            }
            SegmentKind::Notify(_) => {
                notifies += 1;
                "NOTIFY".blue()
            }
            SegmentKind::Unknown => "UNKNOWN".yellow(),
        };
        println!("  {} {} ({})", badge, seg.name.cyan(), format_size(seg.file_size));

        match &seg.kind {
            SegmentKind::Ring(Some(ctrl)) => {
                let valid = match (&ctrl.valid, ctrl.complete) {
                    (Ok(()), true) => "VALID".green(),
                    (Ok(()), false) => "TRUNCATED".red(),
                    (Err(_), _) => "STALE".red(),
                };
                if verbose {
                    println!("      Magic: 0x{:08X} [{}]  Version: {}", ctrl.magic, valid, ctrl.version);
                    println!(
                        "      Capacity: {} slots  Slot payload: {} bytes",
                        ctrl.capacity, ctrl.slot_payload
                    );
                    println!("      Reserved: {} (positions claimed)", ctrl.reserved.to_string().yellow());
                    if let Err(why) = &ctrl.valid {
                        println!("      {}: {}", "Invalid".red(), why);
                    }
                } else {
                    println!(
                        "      [{}] cap={} slots, reserved={}, slot={}B",
                        valid, ctrl.capacity, ctrl.reserved, ctrl.slot_payload
                    );
                }
            }
            SegmentKind::Notify(Some(info)) => {
                let valid = if info.magic == NotifyBlock::MAGIC {
                    "VALID".green()
                } else {
                    "INVALID".red()
                };
                println!("      [{}] word={}, committed={}", valid, info.word, info.committed);
            }
            _ => {}
        }

        if let Some(err) = &seg.error {
            println!("      {}: {}", "Error".red(), err);
        }
        println!();
    }

    println!("{}", "--- Summary ---".dimmed());
    println!("  Segments: {} ({} rings, {} notify)", segments.len(), rings, notifies);
    println!("  Total size: {}", format_size(total_size));
    println!();
}

fn print_json(segments: &[SegmentInfo]) {
    print!("{{\"segments\":[");
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            print!(",");
        }
        let kind = match seg.kind {
            SegmentKind::Ring(_) => "ring",
            SegmentKind::Notify(_) => "notify",
            SegmentKind::Unknown => "unknown",
        };
        print!("{{\"name\":\"{}\",\"type\":\"{}\",\"size\":{}", seg.name, kind, seg.file_size);

        match &seg.kind {
            SegmentKind::Ring(Some(ctrl)) => print!(
                ",\"control\":{{\"magic\":{},\"version\":{},\"capacity\":{},\"slot_payload\":{},\"reserved\":{},\"valid\":{}}}",
                ctrl.magic,
                ctrl.version,
                ctrl.capacity,
                ctrl.slot_payload,
                ctrl.reserved,
                ctrl.valid.is_ok() && ctrl.complete
            ),
            SegmentKind::Notify(Some(info)) => print!(
                ",\"notify\":{{\"magic\":{},\"word\":{},\"committed\":{}}}",
                info.magic, info.word, info.committed
            ),
            _ => {}
        }

        if let Some(err) = &seg.error {
            print!(",\"error\":\"{}\"", err.replace('"', "\\\""));
        }
        print!("}}");
    }
    println!("]}}");
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
