use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::metainfo::info::FileEntry;
use crate::metainfo::torrent::Torrent;

/// Creates a directory (and its parents) unless it already exists.
pub fn create_dir_if_absent(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Path of the staging file a torrent downloads into:
/// `<download_dir>/<folder>/<folder>.temp`.
pub fn temp_file_path(download_dir: &str, folder: &str) -> PathBuf {
    Path::new(download_dir)
        .join(folder)
        .join(format!("{}.temp", folder))
}

/// Creates the torrent folder and opens a fresh temp file in it. A temp file
/// left over from an earlier run is truncated.
pub fn open_temp_file(download_dir: &str, folder: &str) -> io::Result<File> {
    create_dir_if_absent(&Path::new(download_dir).join(folder))?;

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_file_path(download_dir, folder))
}

/// Writes `bytes` into `file` starting at `offset`.
pub fn write_at_offset(file: &mut File, bytes: &[u8], offset: u64) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

/// Turns the completed temp file into the torrent's declared output: a
/// sequential split into the listed files for a multi-file torrent, a plain
/// rename otherwise.
pub fn assemble_output(torrent: &Torrent, download_dir: &str) -> io::Result<()> {
    let folder = torrent.folder_name();
    let folder_dir = Path::new(download_dir).join(&folder);
    let temp_path = temp_file_path(download_dir, &folder);

    match &torrent.info.files {
        Some(files) => {
            split_into_files(&temp_path, &folder_dir, files)?;
            fs::remove_file(&temp_path)
        }
        None => fs::rename(&temp_path, folder_dir.join(torrent.name())),
    }
}

fn split_into_files(temp_path: &Path, folder_dir: &Path, files: &[FileEntry]) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(temp_path)?);

    for entry in files {
        let (file_name, parents) = match entry.path.split_last() {
            Some(parts) => parts,
            None => continue, // empty paths are rejected at metainfo load
        };

        let mut dir = folder_dir.to_path_buf();
        for segment in parents {
            dir = dir.join(segment);
            create_dir_if_absent(&dir)?;
        }

        let mut writer = File::create(dir.join(file_name))?;
        let copied = io::copy(&mut (&mut reader).take(entry.length as u64), &mut writer)?;
        if copied != entry.length as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "temp file ended {} bytes short of {}",
                    entry.length as u64 - copied,
                    file_name
                ),
            ));
        }
    }
    Ok(())
}
