//! ZIP packaging of separated stems.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::{Error, Result};

/// A file to include and the name it gets inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub source: PathBuf,
    pub name: String,
}

/// Write `entries` into a ZIP at `dest` and return its size in bytes.
///
/// The archive is assembled next to `dest` and renamed into place, so readers
/// never observe a half-written file. Blocking; run it on a blocking thread.
pub fn build_archive(entries: &[ArchiveEntry], dest: &Path) -> Result<u64> {
    if entries.is_empty() {
        return Err(Error::validation("nothing to archive"));
    }

    let partial = dest.with_extension("zip.part");
    let file = File::create(&partial).map_err(|e| Error::io_path("creating", &partial, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        let source =
            File::open(&entry.source).map_err(|e| Error::io_path("opening", &entry.source, e))?;
        std::io::copy(&mut BufReader::new(source), &mut zip)
            .map_err(|e| Error::io_path("archiving", &entry.source, e))?;
    }

    let writer = zip.finish()?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::io_path("flushing", &partial, e.into_error()))?;
    file.sync_all()
        .map_err(|e| Error::io_path("syncing", &partial, e))?;
    drop(file);

    std::fs::rename(&partial, dest).map_err(|e| Error::io_path("renaming", &partial, e))?;
    let size = std::fs::metadata(dest)
        .map_err(|e| Error::io_path("reading metadata of", dest, e))?
        .len();
    Ok(size)
}
