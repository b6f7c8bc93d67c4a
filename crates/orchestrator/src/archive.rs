//! Tar archive inspection.
//!
//! Artifacts travel as uncompressed tar streams. Checksums are computed per
//! regular file, keyed by the entry's relative path in `./path` form, so
//! they can be compared against both the recorded metadata and the remote
//! `sha256sum` output.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bbr_core::hashing::{checksum_key, sha256_hex_reader, Checksums};
use tokio::task::spawn_blocking;

/// What an archive contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub checksums: Checksums,
    /// Sum of the regular file sizes, before any tar overhead.
    pub size_bytes: u64,
}

impl ArchiveSummary {
    pub fn file_count(&self) -> usize {
        self.checksums.len()
    }
}

/// Summarize an archive on the local filesystem.
pub async fn summarize_file(path: &Path) -> std::io::Result<ArchiveSummary> {
    let path = path.to_owned();
    spawn_blocking(move || summarize(BufReader::new(File::open(&path)?))).await?
}

/// Walk every entry of a tar stream.
///
/// Directories, links and other special entries are skipped.
pub fn summarize<R: Read>(reader: R) -> std::io::Result<ArchiveSummary> {
    let mut archive = tar::Archive::new(reader);
    let mut summary = ArchiveSummary::default();

    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = entry.path()?.to_string_lossy().into_owned();
        summary.size_bytes += entry.size();
        let digest = sha256_hex_reader(entry)?;
        summary.checksums.insert(checksum_key(&relative), digest);
    }

    Ok(summary)
}

/// Render a byte count for operator feedback.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bbr_core::hashing::sha256_hex;

    use super::*;

    fn tar_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder
            .append_data(&mut dir, "./nested/", std::io::empty())
            .unwrap();
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn checksums_every_regular_file() {
        let data = tar_of(&[("./dump.rdb", b"redis data"), ("nested/aof", b"appendonly")]);
        let summary = summarize(Cursor::new(data)).unwrap();

        assert_eq!(summary.file_count(), 2);
        assert_eq!(summary.size_bytes, 20);
        assert_eq!(summary.checksums["./dump.rdb"], sha256_hex(b"redis data"));
        assert_eq!(summary.checksums["./nested/aof"], sha256_hex(b"appendonly"));
    }

    #[tokio::test]
    async fn summarizes_archives_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.tar");
        std::fs::write(&path, tar_of(&[("file", b"x")])).unwrap();

        let summary = summarize_file(&path).await.unwrap();
        assert_eq!(summary.checksums["./file"], sha256_hex(b"x"));
    }

    #[test]
    fn empty_archive_has_no_files() {
        let data = tar::Builder::new(Vec::new()).into_inner().unwrap();
        let summary = summarize(Cursor::new(data)).unwrap();
        assert_eq!(summary, ArchiveSummary::default());
    }

    #[test]
    fn human_size_picks_a_unit() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0K");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0M");
    }
}
