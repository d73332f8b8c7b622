use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::Path;

use crate::library::Library;

/// Write a gzip-compressed bincode snapshot of the library
pub fn save_library(library: &Library, path: impl AsRef<Path>) -> std::io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, library)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?.flush()?;

    Ok(())
}

pub fn load_library(path: impl AsRef<Path>) -> std::io::Result<Library> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = BufReader::new(decoder);

    let library: Library = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(library)
}

/// Serialize a snapshot into memory, same format as the cache file
pub fn library_to_bytes(library: &Library) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serialize_into(&mut encoder, library)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    encoder.finish()
}

pub fn library_from_bytes(buffer: &[u8]) -> std::io::Result<Library> {
    let decoder = GzDecoder::new(Cursor::new(buffer));
    let mut reader = BufReader::new(decoder);

    deserialize_from(&mut reader).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
