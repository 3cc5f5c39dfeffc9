//! Tar archiver with optional gzip or zstd compression.

use std::io::Write;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use tokio_util::sync::CancellationToken;

use crate::errors::Interrupted;

use super::Archiver;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zstd,
    None,
}

enum Compressor {
    Gzip(GzEncoder<Vec<u8>>),
    Zstd(zstd::stream::write::Encoder<'static, Vec<u8>>),
    Plain(Vec<u8>),
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Gzip(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
            Self::Plain(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Gzip(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
            Self::Plain(w) => w.flush(),
        }
    }
}

impl Compressor {
    fn finish(self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip(w) => w.finish(),
            Self::Zstd(w) => w.finish(),
            Self::Plain(w) => Ok(w),
        }
    }
}

/// Bundles entries into an in-memory tar stream, optionally wrapped in gzip
/// or zstd. Entries are written with mode 0644 and exact byte lengths, so
/// each entry is read fully before its header is emitted.
pub struct TarArchiver {
    builder: Option<tar::Builder<Compressor>>,
    compression: Compression,
}

impl std::fmt::Debug for TarArchiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarArchiver")
            .field("compression", &self.compression)
            .finish()
    }
}

impl TarArchiver {
    /// Supported compression names: `gzip`, `zstd`, `none`. An empty string
    /// defaults to gzip.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported compression name.
    pub fn new(compression: &str) -> Result<Self> {
        let compression = match compression {
            "" | "gzip" => Compression::Gzip,
            "zstd" => Compression::Zstd,
            "none" => Compression::None,
            other => bail!("unsupported compression type: {other}"),
        };

        let compressor = match compression {
            Compression::Gzip => {
                Compressor::Gzip(GzEncoder::new(Vec::new(), flate2::Compression::default()))
            }
            Compression::Zstd => Compressor::Zstd(
                zstd::stream::write::Encoder::new(Vec::new(), 0)
                    .context("failed to create zstd writer")?,
            ),
            Compression::None => Compressor::Plain(Vec::new()),
        };

        Ok(Self {
            builder: Some(tar::Builder::new(compressor)),
            compression,
        })
    }
}

impl Archiver for TarArchiver {
    fn add_file(&mut self, cancel: &CancellationToken, filename: &str, data: &[u8]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        let Some(builder) = self.builder.as_mut() else {
            bail!("archiver is closed");
        };

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, filename, data)
            .with_context(|| format!("failed to write tar entry {filename}"))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let Some(builder) = self.builder.take() else {
            bail!("archiver already closed");
        };

        let compressor = builder
            .into_inner()
            .context("failed to finalize tar stream")?;
        compressor.finish().context("failed to finalize compressor")
    }

    fn extension(&self) -> &'static str {
        match self.compression {
            Compression::Gzip => ".tar.gz",
            Compression::Zstd => ".tar.zst",
            Compression::None => ".tar",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;

    // Decompresses and unpacks the archive into filename -> content.
    fn read_tar_entries(bytes: &[u8], compression: &str) -> BTreeMap<String, Vec<u8>> {
        let decompressed: Vec<u8> = match compression {
            "gzip" => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .unwrap();
                out
            }
            "zstd" => zstd::decode_all(bytes).unwrap(),
            "none" => bytes.to_vec(),
            other => panic!("unknown compression: {other}"),
        };

        let mut archive = tar::Archive::new(decompressed.as_slice());
        let mut found = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            assert_eq!(entry.header().mode().unwrap(), 0o644);
            found.insert(path, content);
        }
        found
    }

    #[test]
    fn test_extensions() {
        assert_eq!(TarArchiver::new("gzip").unwrap().extension(), ".tar.gz");
        assert_eq!(TarArchiver::new("zstd").unwrap().extension(), ".tar.zst");
        assert_eq!(TarArchiver::new("none").unwrap().extension(), ".tar");
        assert_eq!(TarArchiver::new("").unwrap().extension(), ".tar.gz");
    }

    #[test]
    fn test_unsupported_compression() {
        let err = TarArchiver::new("bzip2").unwrap_err();
        assert!(err.to_string().contains("unsupported compression type"));
    }

    #[test]
    fn test_roundtrip_per_compression() {
        let cancel = CancellationToken::new();
        for compression in ["gzip", "zstd", "none"] {
            let mut archiver = TarArchiver::new(compression).unwrap();
            archiver.add_file(&cancel, "s1.json", b"{\"value\":\"a\"}\n").unwrap();
            archiver
                .add_file(&cancel, "nested/s2.json", b"{\"value\":\"b\"}\n")
                .unwrap();
            let bytes = archiver.finish().unwrap();

            let entries = read_tar_entries(&bytes, compression);
            assert_eq!(entries.len(), 2, "compression {compression}");
            assert_eq!(entries["s1.json"], b"{\"value\":\"a\"}\n");
            assert_eq!(entries["nested/s2.json"], b"{\"value\":\"b\"}\n");
        }
    }

    #[test]
    fn test_add_file_after_finish_errors() {
        let mut archiver = TarArchiver::new("gzip").unwrap();
        archiver.finish().unwrap();
        let err = archiver
            .add_file(&CancellationToken::new(), "late.json", b"{}")
            .unwrap_err();
        assert!(err.to_string().contains("archiver is closed"));
    }

    #[test]
    fn test_finish_twice_errors() {
        let mut archiver = TarArchiver::new("none").unwrap();
        archiver.finish().unwrap();
        let err = archiver.finish().unwrap_err();
        assert!(err.to_string().contains("archiver already closed"));
    }

    #[test]
    fn test_cancelled_add_file_errors() {
        let mut archiver = TarArchiver::new("none").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = archiver.add_file(&cancel, "x", b"y").unwrap_err();
        assert_eq!(
            err.downcast_ref::<Interrupted>(),
            Some(&Interrupted::Cancelled)
        );
    }
}
