use super::byte_source::ByteSource;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Stateful `Read + Seek` view over a shared [`ByteSource`].
///
/// Cloning a cursor is cheap (the source is shared), which lets the ZIP
/// reader hand out one independent cursor per lazy entry read.
#[derive(Clone)]
pub struct ByteSourceCursor {
    inner: Arc<dyn ByteSource>,
    position: u64,
}

impl ByteSourceCursor {
    pub fn new(inner: Arc<dyn ByteSource>) -> Self {
        Self { inner, position: 0 }
    }
}

impl Read for ByteSourceCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let total_len = self.inner.len();
        if self.position >= total_len || buf.is_empty() {
            return Ok(0);
        }

        let want = (total_len - self.position).min(buf.len() as u64) as usize;
        let read = self.inner.read_at_into(self.position, &mut buf[..want])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for ByteSourceCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let total_len = self.inner.len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => total_len + p,
            SeekFrom::Current(p) => self.position as i64 + p,
        };

        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Seek before 0"));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    #[test]
    fn test_cursor_reads_and_seeks() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"0123456789".to_vec()));
        let mut cursor = ByteSourceCursor::new(source);

        cursor.seek(SeekFrom::End(-3)).unwrap();
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"789");
    }

    #[test]
    fn test_cloned_cursor_is_independent() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"abcdef".to_vec()));
        let mut first = ByteSourceCursor::new(source);
        first.seek(SeekFrom::Start(4)).unwrap();

        let mut second = first.clone();
        second.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 2];
        first.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ef");
        second.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ab");
    }

    #[test]
    fn test_seek_before_start_fails() {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(b"abc".to_vec()));
        let mut cursor = ByteSourceCursor::new(source);
        assert!(cursor.seek(SeekFrom::Current(-1)).is_err());
    }
}
