//! Report files.

use std::{fs, io::Write, path::Path};

/// Write `bytes` to a sibling temp file, sync it, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

pub fn write_json_atomic(path: &Path, doc: &serde_json::Value) -> eyre::Result<()> {
    let mut text = serde_json::to_string_pretty(doc)?;
    text.push('\n');
    write_atomic(path, text.as_bytes())?;
    Ok(())
}
