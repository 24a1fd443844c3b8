//! Verify command implementation.

use std::path::Path;
use tether_store::StoreLayout;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Checks that passed.
    pub passed: Vec<String>,
    /// Problems that make the store unreadable.
    pub errors: Vec<String>,
    /// Leftovers that do not affect the committed state.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    /// Returns true if the committed state is intact.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks the store at `path` without taking its lock.
pub fn verify(path: &Path) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let layout = StoreLayout::new(path);
    let mut result = VerifyResult::default();

    let head = match layout.read_head() {
        Ok(Some(head)) => {
            result.passed.push(format!(
                "HEAD readable (generation {}, ref {})",
                head.generation, head.commit_ref
            ));
            Some(head)
        }
        Ok(None) => {
            result.warnings.push("store is empty".to_string());
            for generation in layout.blob_generations()? {
                result.warnings.push(format!(
                    "uncommitted blob for generation {} left by an interrupted first save",
                    generation
                ));
            }
            None
        }
        Err(e) => {
            result.errors.push(format!("HEAD unreadable: {}", e));
            None
        }
    };

    if let Some(head) = &head {
        let blob_path = layout.blob_path(head.generation);
        match std::fs::read(&blob_path) {
            Ok(blob) => match head.verify_blob(&blob) {
                Ok(()) => result.passed.push("blob checksum matches HEAD".to_string()),
                Err(e) => result.errors.push(e.to_string()),
            },
            Err(e) => result
                .errors
                .push(format!("blob {} unreadable: {}", blob_path.display(), e)),
        }

        if result.is_ok() {
            match layout.read_state() {
                Ok(Some((_, state))) => result.passed.push(format!(
                    "state decodes ({} bytes, pending: {})",
                    state.snapshot.len(),
                    if state.has_pending() { "yes" } else { "no" }
                )),
                Ok(None) => result.errors.push("state vanished during verification".to_string()),
                Err(e) => result.errors.push(e.to_string()),
            }
        }

        for generation in layout.blob_generations()? {
            if generation != head.generation {
                result
                    .warnings
                    .push(format!("stray blob for generation {}", generation));
            }
        }
    }

    if layout.head_temp_path().exists() {
        result
            .warnings
            .push("uncommitted HEAD.tmp left by an interrupted save".to_string());
    }

    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let result = verify(path)?;
    for check in &result.passed {
        println!("  ok       {}", check);
    }
    for warning in &result.warnings {
        println!("  warning  {}", warning);
    }
    for error in &result.errors {
        println!("  error    {}", error);
    }

    println!();
    if result.is_ok() {
        println!("Store verification passed");
        Ok(())
    } else {
        println!("Store verification failed");
        Err("Verification failed".into())
    }
}
