use std::io::{self, Read, Seek, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar(TarCompress),
}

impl ArchiveFormat {
    pub fn is_zip(self) -> bool {
        matches!(self, Self::Zip)
    }

    pub fn is_tar(self) -> bool {
        matches!(self, Self::Tar(_))
    }
}

/// Compression wrapped around a tar stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TarCompress {
    None,
    Gzip,
    Xz,
    Zstd,
}

impl TarCompress {
    /// Wrap `reader` in the matching decompressor.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        match self {
            Self::None => Ok(Box::new(reader)),
            Self::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
            #[cfg(feature = "xz")]
            Self::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(Box::new(zstd::stream::read::Decoder::new(reader)?)),
            #[allow(unreachable_patterns)]
            other => Err(unsupported(other)),
        }
    }

    /// Wrap `writer` in the matching compressor. `level` is clamped per codec.
    pub fn encoder<W: Write>(self, writer: W, level: Option<u32>) -> io::Result<Encoder<W>> {
        match self {
            Self::None => Ok(Encoder::Plain(writer)),
            Self::Gzip => {
                let level = level.map_or(flate2::Compression::default(), |l| {
                    flate2::Compression::new(l.min(9))
                });
                Ok(Encoder::Gzip(flate2::write::GzEncoder::new(writer, level)))
            }
            #[cfg(feature = "xz")]
            Self::Xz => Ok(Encoder::Xz(xz2::write::XzEncoder::new(
                writer,
                level.unwrap_or(6).min(9),
            ))),
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let level = level.map_or(zstd::DEFAULT_COMPRESSION_LEVEL, |l| l.min(22) as i32);
                Ok(Encoder::Zstd(zstd::stream::write::Encoder::new(writer, level)?))
            }
            #[allow(unreachable_patterns)]
            other => Err(unsupported(other)),
        }
    }
}

#[allow(dead_code)]
fn unsupported(codec: TarCompress) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{codec:?} tar streams need the matching crate feature"),
    )
}

/// Compressor wrapper for rewriting tar streams.
pub enum Encoder<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    #[cfg(feature = "xz")]
    Xz(xz2::write::XzEncoder<W>),
    #[cfg(feature = "zstd")]
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Write the codec trailer and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(e) => e.finish(),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.finish(),
            #[cfg(feature = "zstd")]
            Self::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(e) => e.write(buf),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.write(buf),
            #[cfg(feature = "zstd")]
            Self::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(e) => e.flush(),
            #[cfg(feature = "xz")]
            Self::Xz(e) => e.flush(),
            #[cfg(feature = "zstd")]
            Self::Zstd(e) => e.flush(),
        }
    }
}

/// Leading signatures. Plain tar has none at offset zero and is recognised
/// by the magic field of its first header instead.
const SIGNATURES: &[(&[u8], ArchiveFormat)] = &[
    (b"PK\x03\x04", ArchiveFormat::Zip),
    (b"PK\x05\x06", ArchiveFormat::Zip),
    (b"\x1f\x8b", ArchiveFormat::Tar(TarCompress::Gzip)),
    (b"\x28\xb5\x2f\xfd", ArchiveFormat::Tar(TarCompress::Zstd)),
    (b"\xfd7zXZ\x00", ArchiveFormat::Tar(TarCompress::Xz)),
];

const USTAR_MAGIC: std::ops::Range<usize> = 257..265;

/// Format of a container whose first block is `block`.
pub fn detect_format(block: &[u8]) -> Option<ArchiveFormat> {
    if let Some((_, format)) = SIGNATURES.iter().find(|(magic, _)| block.starts_with(magic)) {
        return Some(*format);
    }
    let magic = block.get(USTAR_MAGIC)?;
    (magic.starts_with(b"ustar\0") || magic == b"ustar  \0")
        .then_some(ArchiveFormat::Tar(TarCompress::None))
}

/// Sniff the format from the first block of `reader`, then rewind it.
pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<ArchiveFormat>> {
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    reader.rewind()?;
    Ok(detect_format(&header[..filled]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn signatures_pick_the_container() {
        let mut posix = vec![0u8; 512];
        posix[257..265].copy_from_slice(b"ustar\x0000");
        let mut gnu = vec![0u8; 512];
        gnu[257..265].copy_from_slice(b"ustar  \0");

        let cases: [(&[u8], Option<ArchiveFormat>); 6] = [
            (b"PK\x05\x06\0\0", Some(ArchiveFormat::Zip)),
            (b"\x1f\x8b\x08", Some(ArchiveFormat::Tar(TarCompress::Gzip))),
            (&posix, Some(ArchiveFormat::Tar(TarCompress::None))),
            (&gnu, Some(ArchiveFormat::Tar(TarCompress::None))),
            (&posix[..260], None),
            (b"\xde\xad\xbe\xef", None),
        ];
        for (block, expected) in cases {
            assert_eq!(detect_format(block), expected, "{block:02x?}");
        }
    }

    #[test]
    fn detect_from_short_reader_rewinds() {
        let mut cursor = Cursor::new(vec![0x1F, 0x8B, 0x08]);
        let format = detect_from_reader(&mut cursor).unwrap();
        assert_eq!(format, Some(ArchiveFormat::Tar(TarCompress::Gzip)));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn gzip_round_trip_through_codec() {
        let mut encoder = TarCompress::Gzip.encoder(Vec::new(), Some(6)).unwrap();
        encoder.write_all(b"payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = TarCompress::Gzip.decoder(Cursor::new(compressed)).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");
    }

    #[test]
    #[cfg(not(feature = "xz"))]
    fn compression_xz_unsupported() {
        let result = TarCompress::Xz.decoder(Cursor::new(Vec::new()));
        assert!(result.is_err());
    }
}
