use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, write::GzEncoder};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::artifact::DumpArtifact;
use crate::error::{DumperError, Result};

/// Pack a dump directory into `<dir>.tar.gz` and remove the directory.
///
/// Entries are stored relative to the directory's parent, so extracting the
/// tarball recreates the `<label>-<timestamp>/` tree that mongorestore expects.
pub fn pack_directory(artifact: &DumpArtifact) -> Result<DumpArtifact> {
    let source = &artifact.path;
    let tarball = tarball_path(source);
    let package_error = |reason: String| DumperError::Package {
        path: source.clone(),
        reason,
    };

    if !source.is_dir() {
        return Err(package_error("not a directory".to_string()));
    }

    create_tar_gz(source, &tarball).map_err(|err| {
        let _ = fs::remove_file(&tarball);
        package_error(err.to_string())
    })?;

    fs::remove_dir_all(source).map_err(|err| package_error(err.to_string()))?;
    tracing::debug!("Packed {} into {}", source.display(), tarball.display());

    Ok(DumpArtifact {
        path: tarball,
        format: artifact.format,
        created_at: artifact.created_at,
    })
}

pub(crate) fn tarball_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".tar.gz");
    PathBuf::from(name)
}

fn create_tar_gz(source: &Path, tarball: &Path) -> io::Result<()> {
    let root = source
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("dump"));

    let file = BufWriter::new(File::create(tarball)?);
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        let relative = match path.strip_prefix(source) {
            Ok(rel) => root.join(rel),
            Err(_) => continue,
        };
        let metadata = entry.metadata().map_err(io::Error::other)?;

        if metadata.is_file() {
            append_file(&mut builder, path, &relative, &metadata)?;
        } else if metadata.is_dir() {
            append_dir(&mut builder, &relative, &metadata)?;
        } else if metadata.file_type().is_symlink() {
            append_symlink(&mut builder, path, &relative, &metadata)?;
        } else {
            tracing::warn!("Skip unknown file type: {}", path.display());
        }
    }

    let mut file = builder.into_inner()?.finish()?;
    file.flush()
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &Path,
    metadata: &Metadata,
) -> io::Result<()> {
    let mut file = BufReader::new(File::open(path)?);
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_size(metadata.len());
    builder.append_data(&mut header, name, &mut file)
}

fn append_dir<W: Write>(
    builder: &mut Builder<W>,
    name: &Path,
    metadata: &Metadata,
) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    builder.append_data(&mut header, name, io::empty())
}

fn append_symlink<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &Path,
    metadata: &Metadata,
) -> io::Result<()> {
    let target = fs::read_link(path)?;
    let mut header = Header::new_gnu();
    header.set_metadata(metadata);
    header.set_entry_type(EntryType::Symlink);
    header.set_size(0);
    builder.append_link(&mut header, name, target)
}
