//! Dump command implementation.

use std::io::Write;
use std::path::Path;
use tether_store::StoreLayout;

/// Returns the effective snapshot bytes: the pending change if there is
/// one, otherwise the synchronized snapshot.
pub fn effective_bytes(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let (_, state) = StoreLayout::new(path)
        .read_state()?
        .ok_or_else(|| format!("No store found at {:?}", path))?;
    Ok(state.effective_snapshot().as_bytes().to_vec())
}

/// Runs the dump command.
pub fn run(path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = effective_bytes(path)?;
    match output {
        Some(output) => {
            std::fs::write(output, &bytes)?;
            eprintln!("Wrote {} bytes to {:?}", bytes.len(), output);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_testkit::{sample_state, state_with_pending, TestStore};

    #[test]
    fn dump_prefers_pending_change() {
        let fixture = TestStore::with_state(&state_with_pending("base", "edited"));
        assert_eq!(effective_bytes(fixture.path()).unwrap(), b"edited");

        let fixture = TestStore::with_state(&sample_state("base"));
        assert_eq!(effective_bytes(fixture.path()).unwrap(), b"base");
    }

    #[test]
    fn dump_writes_output_file() {
        let fixture = TestStore::with_state(&sample_state("payload"));
        let out = fixture.path().join("out.bin");
        run(fixture.path(), Some(&out)).unwrap();
        assert_eq!(std::fs::read(out).unwrap(), b"payload");
    }
}
