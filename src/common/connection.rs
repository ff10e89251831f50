//! # Line-Delimited JSON Framing
//!
//! Both directions of the TCP connection carry one JSON object per line:
//! ```text
//! {"type":"login","username":"operator1","password":"pass1"}\n
//! {"status":"success","user_type":"operator"}\n
//! ```
//! The reader buffers partial reads and yields one complete line at a time,
//! so several messages in one segment or one message split across segments
//! both decode correctly. A final unterminated line before EOF is still
//! delivered.

use std::io;

use log::warn;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::error::HubResult;
use super::messages::encode_line;

/// Upper bound for a single line, newline included.
pub const MAX_LINE_SIZE: u64 = 1024 * 1024;

/// Reading half of a line-framed connection.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: String,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: String::new(),
        }
    }

    /// Next non-blank line without its terminator.
    ///
    /// # Returns
    /// - `Ok(Some(line))`: a complete line
    /// - `Ok(None)`: the peer closed the connection
    /// - `Err`: I/O failure, invalid UTF-8 or a line over [`MAX_LINE_SIZE`]
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            let read = (&mut self.reader)
                .take(MAX_LINE_SIZE)
                .read_line(&mut self.buf)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if !self.buf.ends_with('\n') && read as u64 >= MAX_LINE_SIZE {
                warn!("❌ Line exceeds {} bytes, dropping connection", MAX_LINE_SIZE);
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }

            let line = self.buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }
}

/// Writing half of a line-framed connection.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message` and write it as one line.
    pub async fn send<T: Serialize>(&mut self, message: &T) -> HubResult<()> {
        let line = encode_line(message)?;
        self.write_line(&line).await?;
        Ok(())
    }

    /// Write an already encoded, `\n`-terminated line and flush.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn splits_multiple_messages_in_one_write() {
        let (mut tx, rx) = duplex(256);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"{\"type\":\"heartbeat\"}\n{\"type\":\"get_operators\"}\n")
            .await
            .unwrap();
        drop(tx);

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "{\"type\":\"heartbeat\"}");
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "{\"type\":\"get_operators\"}");
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reassembles_partial_writes() {
        let (mut tx, rx) = duplex(256);
        let mut reader = LineReader::new(rx);

        let writer = tokio::spawn(async move {
            tx.write_all(b"{\"type\":\"hea").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            tx.write_all(b"rtbeat\"}\r\n\n").await.unwrap();
        });

        assert_eq!(reader.next_line().await.unwrap().unwrap(), "{\"type\":\"heartbeat\"}");
        writer.await.unwrap();
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unterminated_tail_is_delivered() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);
        tx.write_all(b"{\"status\":\"alive\"}").await.unwrap();
        drop(tx);
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "{\"status\":\"alive\"}");
    }

    #[tokio::test]
    async fn writer_appends_newline() {
        let (tx, rx) = duplex(64);
        let mut writer = LineWriter::new(tx);
        let mut reader = LineReader::new(rx);
        writer.send(&serde_json::json!({"status": "alive"})).await.unwrap();
        assert_eq!(reader.next_line().await.unwrap().unwrap(), "{\"status\":\"alive\"}");
    }
}
