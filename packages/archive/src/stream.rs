//! Forward-only zip entry stream over an async byte source.
//!
//! A blocking worker bridged onto the async reader first copies the archive
//! into an anonymous temporary file, then opens it through the central
//! directory. Entry sizes therefore come from the directory, which also
//! covers entries written with trailing data descriptors. The worker hands
//! one [`ArchiveEntry`] at a time to the consumer and then waits until that
//! entry is either read or dropped before decompressing anything further.

use std::io::{Read, Seek as _};

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::SyncIoBridge;

use crate::ArchiveError;

/// Entries waiting in the channel ahead of the consumer.
const ENTRY_CHANNEL_BUFFER: usize = 1;

/// Cap on the up-front allocation taken from an entry's declared size, so a
/// lying header cannot force a huge allocation before any bytes arrive.
const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

type ContentReply = oneshot::Sender<Result<Vec<u8>, ArchiveError>>;

/// One file or directory marker inside the archive.
///
/// Holding an entry pauses the archive reader. Read it with
/// [`ArchiveEntry::read`] or drop it before asking the stream for the next
/// one.
#[derive(Debug)]
pub struct ArchiveEntry {
    path: String,
    is_directory: bool,
    size: u64,
    request: oneshot::Sender<ContentReply>,
}

impl ArchiveEntry {
    /// Path of the entry inside the archive.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the entry is a directory marker.
    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Uncompressed size recorded in the central directory.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Decompresses and returns the entry's full contents.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if decompression fails, or
    /// [`ArchiveError::ReaderClosed`] if the background reader has stopped.
    pub async fn read(self) -> Result<Vec<u8>, ArchiveError> {
        let Self { path, request, .. } = self;
        let (reply_tx, reply_rx) = oneshot::channel();

        if request.send(reply_tx).is_err() {
            return Err(ArchiveError::ReaderClosed { path });
        }

        reply_rx
            .await
            .map_err(|_| ArchiveError::ReaderClosed { path })?
    }
}

/// Lazy, finite, non-restartable sequence of [`ArchiveEntry`] values.
///
/// Dropping the stream stops the background reader at its next entry
/// boundary.
#[derive(Debug)]
pub struct ArchiveEntryStream {
    rx: mpsc::Receiver<Result<ArchiveEntry, ArchiveError>>,
}

impl ArchiveEntryStream {
    /// Starts reading a zip archive from `reader`.
    ///
    /// Must be called from within a Tokio runtime; decompression runs on
    /// the runtime's blocking pool.
    #[must_use]
    pub fn open<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(ENTRY_CHANNEL_BUFFER);
        let bridge = SyncIoBridge::new(reader);

        tokio::task::spawn_blocking(move || produce_entries(bridge, &tx));

        Self { rx }
    }

    /// Waits for the next entry.
    ///
    /// Returns `None` after the last entry or after an error has been
    /// yielded. Cancel-safe.
    pub async fn next_entry(&mut self) -> Option<Result<ArchiveEntry, ArchiveError>> {
        self.rx.recv().await
    }
}

/// Copies `reader` into an unnamed temporary file and rewinds it.
fn spool<R: Read>(mut reader: R) -> std::io::Result<std::fs::File> {
    let mut file = tempfile::tempfile()?;
    let bytes = std::io::copy(&mut reader, &mut file)?;
    file.rewind()?;
    log::debug!("Spooled {bytes} archive bytes");
    Ok(file)
}

/// Walks the archive in central directory order, handing each entry to the
/// consumer and serving at most one content request per entry.
fn produce_entries<R: Read>(reader: R, tx: &mpsc::Sender<Result<ArchiveEntry, ArchiveError>>) {
    let spooled = match spool(reader) {
        Ok(spooled) => spooled,
        Err(e) => {
            log::warn!("Archive spool failed: {e}");
            let _ = tx.blocking_send(Err(ArchiveError::Spool(e)));
            return;
        }
    };

    let mut archive = match zip::ZipArchive::new(spooled) {
        Ok(archive) => archive,
        Err(e) => {
            log::warn!("Archive open failed: {e}");
            let _ = tx.blocking_send(Err(e.into()));
            return;
        }
    };

    let count = archive.len();
    for index in 0..count {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Archive read failed at entry {index} of {count}: {e}");
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };

        let path = file.name().to_string();
        let (request_tx, request_rx) = oneshot::channel::<ContentReply>();
        let entry = ArchiveEntry {
            path: path.clone(),
            is_directory: file.is_dir(),
            size: file.size(),
            request: request_tx,
        };

        if tx.blocking_send(Ok(entry)).is_err() {
            log::debug!("Archive consumer went away at {path}");
            return;
        }

        // Blocks until the consumer reads or drops the entry.
        let Ok(reply) = request_rx.blocking_recv() else {
            continue;
        };

        let capacity = usize::try_from(file.size())
            .unwrap_or(MAX_PREALLOCATION)
            .min(MAX_PREALLOCATION);
        let mut buf = Vec::with_capacity(capacity);

        match file.read_to_end(&mut buf) {
            Ok(_) => {
                let _ = reply.send(Ok(buf));
            }
            Err(source) => {
                log::warn!("Failed to decompress {path}: {source}");
                let _ = reply.send(Err(ArchiveError::Io { path, source }));
                return;
            }
        }
    }

    log::debug!("Archive exhausted after {count} entries");
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write as _};

    use zip::write::SimpleFileOptions;

    use super::*;

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => writer.add_directory(*name, options).unwrap(),
            }
        }

        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn yields_entries_in_archive_order() {
        let bytes = build_zip(&[
            ("osw/", None),
            ("osw/a.nodes.geojson", Some(b"nodes".as_slice())),
            ("osw/b.edges.geojson", Some(b"edges".as_slice())),
        ]);

        let mut stream = ArchiveEntryStream::open(Cursor::new(bytes));

        let dir = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(dir.path(), "osw/");
        assert!(dir.is_directory());
        drop(dir);

        let nodes = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(nodes.path(), "osw/a.nodes.geojson");
        assert!(!nodes.is_directory());
        assert_eq!(nodes.size(), 5);
        assert_eq!(nodes.read().await.unwrap(), b"nodes");

        let edges = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(edges.read().await.unwrap(), b"edges");

        assert!(stream.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn unread_entries_are_skipped() {
        let big = vec![b'x'; 256 * 1024];
        let bytes = build_zip(&[
            ("skip.bin", Some(big.as_slice())),
            ("keep.geojson", Some(b"{}".as_slice())),
        ]);

        let mut stream = ArchiveEntryStream::open(Cursor::new(bytes));

        let skipped = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(skipped.path(), "skip.bin");
        drop(skipped);

        let kept = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(kept.path(), "keep.geojson");
        assert_eq!(kept.read().await.unwrap(), b"{}");
        assert!(stream.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn reads_entries_with_trailing_data_descriptors() {
        let mut writer = zip::ZipWriter::new_stream(Vec::new());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.add_directory("osw/", options).unwrap();
        writer.start_file("osw/a.nodes.geojson", options).unwrap();
        writer.write_all(b"streamed nodes").unwrap();
        writer.start_file("osw/b.edges.geojson", options).unwrap();
        writer.write_all(b"streamed edges").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let mut stream = ArchiveEntryStream::open(Cursor::new(bytes));

        assert!(stream.next_entry().await.unwrap().unwrap().is_directory());
        let nodes = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(nodes.path(), "osw/a.nodes.geojson");
        assert_eq!(nodes.size(), 14);
        assert_eq!(nodes.read().await.unwrap(), b"streamed nodes");
        let edges = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(edges.read().await.unwrap(), b"streamed edges");
        assert!(stream.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn empty_archive_yields_no_entries() {
        let mut stream = ArchiveEntryStream::open(Cursor::new(build_zip(&[])));

        assert!(stream.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_archive_yields_one_error_then_ends() {
        let mut stream = ArchiveEntryStream::open(Cursor::new(b"definitely not a zip".to_vec()));

        assert!(matches!(
            stream.next_entry().await,
            Some(Err(ArchiveError::Zip(_)))
        ));
        assert!(stream.next_entry().await.is_none());
    }

    #[tokio::test]
    async fn truncated_archive_surfaces_an_error() {
        let mut bytes = build_zip(&[
            ("a.nodes.geojson", Some(b"first".as_slice())),
            ("b.edges.geojson", Some(b"second".as_slice())),
        ]);
        // Drops the central directory.
        bytes.truncate(40);

        let mut stream = ArchiveEntryStream::open(Cursor::new(bytes));
        let mut saw_error = false;

        while let Some(item) = stream.next_entry().await {
            match item {
                Ok(entry) => {
                    if entry.read().await.is_err() {
                        saw_error = true;
                    }
                }
                Err(_) => saw_error = true,
            }
        }

        assert!(saw_error);
    }

    #[tokio::test]
    async fn dropping_the_stream_early_does_not_hang() {
        let bytes = build_zip(&[
            ("a.nodes.geojson", Some(b"1".as_slice())),
            ("b.edges.geojson", Some(b"2".as_slice())),
            ("c.zones.geojson", Some(b"3".as_slice())),
        ]);

        let mut stream = ArchiveEntryStream::open(Cursor::new(bytes));
        let first = stream.next_entry().await.unwrap().unwrap();
        drop(stream);

        assert_eq!(first.read().await.unwrap(), b"1");
    }
}
