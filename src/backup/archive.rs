// backupjobs/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tar::Builder;
use walkdir::WalkDir;

/// Creates a GZipped TAR archive of `source_dir` in an anonymous temporary file.
///
/// Paths inside the archive are relative to `source_dir`. The returned file is rewound to
/// the start and is removed by the OS once closed.
pub fn pack_directory(source_dir: &Path) -> Result<File> {
    if !source_dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        ));
    }

    let archive_file = tempfile::tempfile().context("Failed to create temporary archive file")?;
    let mut archive_file = write_tar_gz(source_dir, archive_file)?;
    archive_file
        .seek(SeekFrom::Start(0))
        .context("Failed to rewind temporary archive file")?;
    Ok(archive_file)
}

fn write_tar_gz<W: Write>(source_dir: &Path, writer: W) -> Result<W> {
    let enc = GzEncoder::new(writer, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;

        if name.as_os_str().is_empty() {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_dir() {
            tar_builder.append_dir(name, path).with_context(|| {
                format!("Failed to append directory {} to archive", path.display())
            })?;
        } else if file_type.is_file() {
            tar_builder.append_path_with_name(path, name).with_context(|| {
                format!("Failed to append file {} as {} to archive", path.display(), name.display())
            })?;
        }
    }

    let encoder = tar_builder
        .into_inner()
        .context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish Gzip encoding")
}
