//! Chunked response output.
//!
//! `ChunkedSink` is what the stream session writes to. `HttpChunkedSink` implements it over
//! any `Write` (a `TcpStream` in the server) using HTTP/1.1 chunked transfer encoding. The
//! status line and headers are buffered until the first chunk is sent, so the session can
//! still set headers after admission without touching the wire.

use std::io::Write;

/// Destination for successive byte chunks of one HTTP response.
pub trait ChunkedSink {
    fn set_content_type(&mut self, content_type: &str);

    fn set_header(&mut self, name: &str, value: &str);

    /// Send one chunk. An error means the peer is gone or the write timed out.
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError>;
}

/// Write failure on the response transport.
#[derive(Debug)]
pub struct TransportError {
    pub kind: std::io::ErrorKind,
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport failure ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub struct HttpChunkedSink<W: Write> {
    writer: W,
    status: &'static str,
    content_type: String,
    headers: Vec<(String, String)>,
    head_sent: bool,
    bytes_sent: u64,
}

impl<W: Write> HttpChunkedSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            status: "200 OK",
            content_type: "text/html".to_string(),
            headers: Vec::new(),
            head_sent: false,
            bytes_sent: 0,
        }
    }

    /// Body bytes sent so far, excluding chunk framing.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Terminate the chunked body. Only meaningful after a clean stop.
    pub fn finish(&mut self) -> Result<(), TransportError> {
        self.write_head()?;
        self.writer.write_all(b"0\r\n\r\n")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_head(&mut self) -> Result<(), TransportError> {
        if self.head_sent {
            return Ok(());
        }
        let mut head = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n",
            self.status, self.content_type
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        self.writer.write_all(head.as_bytes())?;
        self.head_sent = true;
        Ok(())
    }
}

impl<W: Write> ChunkedSink for HttpChunkedSink<W> {
    fn set_content_type(&mut self, content_type: &str) {
        self.content_type = content_type.to_string();
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        self.write_head()?;
        if chunk.is_empty() {
            // A zero-length chunk would terminate the body.
            return Ok(());
        }
        let size_line = format!("{:X}\r\n", chunk.len());
        self.writer.write_all(size_line.as_bytes())?;
        self.writer.write_all(chunk)?;
        self.writer.write_all(b"\r\n")?;
        self.bytes_sent += chunk.len() as u64;
        Ok(())
    }
}
