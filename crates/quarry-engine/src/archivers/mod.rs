//! Streaming archivers that bundle named entries into a single byte stream.

pub mod tar;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use self::tar::TarArchiver;

/// Appends named entries and finalizes to a single byte stream. After
/// `finish`, no further `add_file` is permitted.
pub trait Archiver: Send {
    fn add_file(&mut self, cancel: &CancellationToken, filename: &str, data: &[u8]) -> Result<()>;

    /// Finalizes the archive and returns the complete archive bytes.
    fn finish(&mut self) -> Result<Vec<u8>>;

    /// File extension for this archive type, including the leading dot.
    fn extension(&self) -> &'static str;
}
