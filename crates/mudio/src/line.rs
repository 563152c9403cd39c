use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

/// Default cap on a single inbound line. Anything longer is a protocol error,
/// not a buffering problem we should absorb.
pub const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024;

#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4 * 1024),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one line, stripping the trailing `\n` and an optional `\r`.
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` for a line (may be empty),
    /// - `Ok(None)` on clean EOF with no buffered partial line.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let raw = self.buf.split_to(i + 1).freeze();
                return Ok(Some(strip_eol(raw)));
            }

            if self.buf.len() > self.max_line_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
        }
    }
}

fn strip_eol(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    if end > 0 && b[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && b[end - 1] == b'\r' {
        end -= 1;
    }
    b.truncate(end);
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_lf_and_crlf_lines() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"{\"op\":\"ping\"}\r\nsecond\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let l1 = lr.read_line().await.unwrap().unwrap();
        let l2 = lr.read_line().await.unwrap().unwrap();
        assert_eq!(&l1[..], b"{\"op\":\"ping\"}");
        assert_eq!(&l2[..], b"second");
    }

    #[tokio::test]
    async fn clean_eof_is_none_partial_is_error() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"whole\npartial").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        assert_eq!(&lr.read_line().await.unwrap().unwrap()[..], b"whole");
        assert!(lr.read_line().await.is_err());
    }

    #[tokio::test]
    async fn oversize_line_is_rejected() {
        let (a, b) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(&[b'x'; 128]).await.unwrap();
            b.write_all(b"\n").await.unwrap();
        });

        let mut lr = LineReader::new(a).max_line_len(32);
        assert!(lr.read_line().await.is_err());
    }

    #[tokio::test]
    async fn empty_line_is_a_line() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"\r\nafter\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        assert_eq!(&lr.read_line().await.unwrap().unwrap()[..], b"");
        assert_eq!(&lr.read_line().await.unwrap().unwrap()[..], b"after");
    }
}
