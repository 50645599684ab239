use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::Result;
use fs4::fs_std::FileExt;
use serde::{de::DeserializeOwned, Serialize};

/// Overwrites `path` with pretty printed json while holding an exclusive lock, so a reader that
/// takes a shared lock never sees a half written file.
pub fn write_json_locked(path: &Path, value: &impl Serialize) -> Result<()> {
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    // Semi-safe acquire-release for a file
    file.lock_exclusive()?;
    let result = write_with_file(&file, value);
    FileExt::unlock(&file)?;
    result
}

fn write_with_file(file: &File, value: &impl Serialize) -> Result<()> {
    // Truncating only after the lock is taken keeps readers from observing an empty file.
    file.set_len(0)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Reads json written by [write_json_locked].
pub fn read_json_locked<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    FileExt::lock_shared(&file)?;
    let mut content = Vec::new();
    let result = BufReader::new(&file).read_to_end(&mut content);
    FileExt::unlock(&file)?;
    result?;
    Ok(serde_json::from_slice(&content)?)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    use super::{read_json_locked, write_json_locked};

    #[test]
    fn test_write_then_read() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("value.json");
        write_json_locked(&path, &json!({"record": {"1": {"name": "demo"}}}))?;

        let value: Value = read_json_locked(&path)?;
        assert_eq!(value["record"]["1"]["name"], json!("demo"));
        Ok(())
    }

    #[test]
    fn test_overwrite_shorter_content() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("value.json");
        write_json_locked(&path, &json!({"long": "a".repeat(512)}))?;
        write_json_locked(&path, &json!({"short": 1}))?;

        let value: Value = read_json_locked(&path)?;
        assert_eq!(value, json!({"short": 1}));
        Ok(())
    }
}
