#![allow(dead_code)]

use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

/// A fixture member: directories end with `/` and carry no data.
pub type Member<'a> = (&'a str, &'a [u8]);

fn write_zip<W: Write + io::Seek>(writer: W, members: &[Member<'_>]) -> W {
    let mut zip = zip::ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in members {
        if name.ends_with('/') {
            zip.add_directory(*name, options).expect("add directory");
        } else {
            zip.start_file(*name, options).expect("start file");
            zip.write_all(data).expect("write member");
        }
    }
    zip.finish().expect("finish zip")
}

pub fn zip_fixture(dir: &Path, name: &str, members: &[Member<'_>]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create zip fixture");
    write_zip(file, members);
    path
}

pub fn zip_bytes(members: &[Member<'_>]) -> Vec<u8> {
    write_zip(Cursor::new(Vec::new()), members).into_inner()
}

fn write_tar<W: Write>(writer: W, members: &[Member<'_>]) -> W {
    let mut builder = tar::Builder::new(writer);
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
        }
        header.set_mtime(1_700_000_000);
        builder
            .append_data(&mut header, name, *data)
            .expect("append tar member");
    }
    builder.into_inner().expect("finish tar")
}

pub fn tar_fixture(dir: &Path, name: &str, members: &[Member<'_>]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create tar fixture");
    write_tar(file, members);
    path
}

pub fn tar_gz_fixture(dir: &Path, name: &str, members: &[Member<'_>]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).expect("create tar.gz fixture");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    write_tar(encoder, members).finish().expect("finish gzip");
    path
}

pub fn temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("arkiv-test-")
        .tempdir()
        .expect("Failed to create temp dir")
}

pub fn sorted_paths(entries: &[arkiv::Entry]) -> Vec<String> {
    let mut paths: Vec<_> = entries.iter().map(|e| e.relative_path().to_string()).collect();
    paths.sort();
    paths
}
