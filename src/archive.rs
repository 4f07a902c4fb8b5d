//! One deflate `.zip` per subject.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{dataset::SubjectDir, errors::VerifyError, Result};

/// Zips `{root}/{subject}` into `{dest}/{subject}.zip`. Entry names start
/// with `{subject}/`, so extracting into a dataset root puts the subject back
/// where it was.
pub fn archive_subject(subject: &SubjectDir, dest: &Path) -> Result<PathBuf> {
    let source = subject.path();
    if !source.is_dir() {
        return Err(VerifyError::EmptySource(source).into());
    }
    fs::create_dir_all(dest)?;
    let out_path = dest.join(format!("{}.zip", subject.subject()));
    info!(from = %source.display(), to = %out_path.display(), "archiving");

    let mut zip = ZipWriter::new(BufWriter::new(File::create(&out_path)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    // `dest` may sit inside the subject folder
    let own_file = fs::canonicalize(&out_path)?;
    let mut files = 0usize;
    for entry in WalkDir::new(&source).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && fs::canonicalize(entry.path())? == own_file {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(subject.root()) else {
            continue;
        };
        let name = entry_name(relative);
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            debug!(entry = %name, "adding");
            zip.start_file(name, options)?;
            io::copy(&mut BufReader::new(File::open(entry.path())?), &mut zip)?;
            files += 1;
        }
    }
    zip.finish()?;
    info!(files, archive = %out_path.display(), "archive written");
    Ok(out_path)
}

/// Forward slashes whatever the platform.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
