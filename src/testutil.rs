//! Shared helpers for unit tests

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable shell script standing in for the external audio tool
pub fn fake_tool(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-sox");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A tool that answers bitrate and duration queries and mixes by echoing
/// its piped input straight back out
pub fn passthrough_tool(dir: &Path, bitrate: &str, duration: &str) -> PathBuf {
    fake_tool(
        dir,
        &format!(
            "case \"$2\" in\n  -B) echo {} ;;\n  -D) echo {} ;;\n  *) cat ;;\nesac",
            bitrate, duration
        ),
    )
}

/// Write a source file of `len` bytes where byte `i` is `i % 251`
pub fn source_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pattern(len)).unwrap();
    path
}

/// The byte pattern written by [`source_file`]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
