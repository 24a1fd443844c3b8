//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use tether_store::StoreLayout;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Commit reference of the synchronized snapshot.
    pub commit_ref: String,
    /// Generation of the committed blob.
    pub generation: u64,
    /// Store format version.
    pub format_version: u16,
    /// Size of the committed blob in bytes.
    pub blob_size: u64,
    /// Size of the synchronized snapshot in bytes.
    pub snapshot_size: usize,
    /// The unacknowledged local change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingInfo>,
    /// Blob generations on disk other than the committed one.
    pub stray_blobs: Vec<u64>,
    /// Whether an uncommitted HEAD.tmp was left behind.
    pub staged_head: bool,
}

/// Summary of a pending mutation.
#[derive(Debug, Serialize)]
pub struct PendingInfo {
    /// Mutation id.
    pub id: String,
    /// Size of the proposed snapshot in bytes.
    pub snapshot_size: usize,
}

/// Reads the store at `path` without taking its lock.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let layout = StoreLayout::new(path);
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let (head, state) = layout
        .read_state()?
        .ok_or_else(|| format!("No store found at {:?}", path))?;

    let stray_blobs = layout
        .blob_generations()?
        .into_iter()
        .filter(|generation| *generation != head.generation)
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        commit_ref: state.commit_ref.to_string(),
        generation: head.generation,
        format_version: head.format_version,
        blob_size: head.blob_len,
        snapshot_size: state.snapshot.len(),
        pending: state.pending.as_ref().map(|m| PendingInfo {
            id: m.id.to_string(),
            snapshot_size: m.snapshot.len(),
        }),
        stray_blobs,
        staged_head: layout.head_temp_path().exists(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Tether Store Inspection");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Head:");
    println!("  Commit ref:     {}", result.commit_ref);
    println!("  Generation:     {}", result.generation);
    println!("  Format version: {}", result.format_version);
    println!("  Blob size:      {}", format_size(result.blob_size));
    println!();
    println!("Snapshot:");
    println!("  Synchronized:   {}", format_size(result.snapshot_size as u64));
    match &result.pending {
        Some(pending) => {
            println!("  Pending change: {}", pending.id);
            println!("  Pending size:   {}", format_size(pending.snapshot_size as u64));
        }
        None => println!("  Pending change: none"),
    }

    if !result.stray_blobs.is_empty() || result.staged_head {
        println!();
        println!("Leftovers from an interrupted save:");
        for generation in &result.stray_blobs {
            println!("  blob generation {}", generation);
        }
        if result.staged_head {
            println!("  HEAD.tmp");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
