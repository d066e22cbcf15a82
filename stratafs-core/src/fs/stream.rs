//! Lazy chunked payload transfer.
//!
//! A read stream fetches the payload on first poll (bumping `atime` with
//! the first chunk) and then yields fixed-size chunks, suspending between
//! them. A write stream buffers chunks and commits the whole payload on
//! `finish`, making it equivalent to one `write_file` over the full file.

use async_stream::try_stream;
use futures::Stream;

use stratafs_model::{FsError, FsResult};

use crate::fs::{StrataFs, WriteOptions};

/// Default stream chunk: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ReadStreamOptions {
    pub offset: u64,
    pub length: Option<u64>,
    pub chunk_size: usize,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            length: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

pub(super) fn read_stream(
    fs: StrataFs,
    raw: String,
    opts: ReadStreamOptions,
) -> impl Stream<Item = FsResult<Vec<u8>>> + Send + 'static {
    try_stream! {
        let chunk_size = opts.chunk_size.max(1);
        let (_, inode) = fs.walk_required(&raw, true).await?;
        if inode.is_dir() {
            Err(FsError::is_directory(&inode.path))?;
        }

        let payload = fs.catalog().read_payload(&inode).await?;
        // atime moves with the first delivered chunk.
        fs.catalog().touch_atime(inode.id).await?;

        let start = (opts.offset as usize).min(payload.len());
        let end = match opts.length {
            Some(len) => start.saturating_add(len as usize).min(payload.len()),
            None => payload.len(),
        };

        let mut cursor = start;
        while cursor < end {
            let next = (cursor + chunk_size).min(end);
            yield payload[cursor..next].to_vec();
            cursor = next;
        }
    }
}

/// Buffering writer created by [`StrataFs::write_stream`].
#[derive(Debug)]
pub struct WriteStream {
    fs: StrataFs,
    path: String,
    buffer: Vec<u8>,
    finished: bool,
}

pub(super) fn write_stream(fs: StrataFs, raw: &str) -> WriteStream {
    WriteStream {
        fs,
        path: raw.to_string(),
        buffer: Vec::new(),
        finished: false,
    }
}

impl WriteStream {
    pub fn write(&mut self, chunk: &[u8]) -> FsResult<()> {
        if self.finished {
            return Err(FsError::invalid_argument("write stream already finished"));
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Commit the buffered payload as one write.
    pub async fn finish(mut self) -> FsResult<()> {
        self.finished = true;
        let data = std::mem::take(&mut self.buffer);
        self.fs
            .write_file(&self.path, &data, WriteOptions::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StrataFs;
    use futures::{StreamExt, pin_mut};

    async fn fs() -> StrataFs {
        StrataFs::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn read_stream_chunks_cover_the_payload() {
        let fs = fs().await;
        fs.write_file("/data", &[9u8; 10], crate::fs::WriteOptions::default())
            .await
            .unwrap();

        let stream = fs.read_stream(
            "/data",
            ReadStreamOptions {
                chunk_size: 4,
                ..ReadStreamOptions::default()
            },
        );
        pin_mut!(stream);

        let mut collected = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            collected.extend(chunk.unwrap());
            chunks += 1;
        }
        assert_eq!(chunks, 3);
        assert_eq!(collected, vec![9u8; 10]);
    }

    #[tokio::test]
    async fn read_stream_honors_offset_and_length() {
        let fs = fs().await;
        fs.write_file("/data", b"0123456789", crate::fs::WriteOptions::default())
            .await
            .unwrap();

        let stream = fs.read_stream(
            "/data",
            ReadStreamOptions {
                offset: 2,
                length: Some(5),
                chunk_size: 64,
            },
        );
        pin_mut!(stream);
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk, b"23456");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn read_stream_surfaces_missing_paths() {
        let fs = fs().await;
        let stream = fs.read_stream("/absent", ReadStreamOptions::default());
        pin_mut!(stream);
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), stratafs_model::FsErrorKind::NotFound);
    }

    #[tokio::test]
    async fn write_stream_commits_on_finish() {
        let fs = fs().await;
        let mut writer = fs.write_stream("/out");
        writer.write(b"part one, ").unwrap();
        writer.write(b"part two").unwrap();
        assert_eq!(writer.buffered(), 18);
        writer.finish().await.unwrap();

        assert_eq!(fs.read_to_string("/out").await.unwrap(), "part one, part two");
    }
}
