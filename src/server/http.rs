use anyhow::{anyhow, Result};
use std::io::{Read, Write};

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
}

/// Read a request head. The body, if any, is ignored; every route is a GET.
pub(crate) fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (raw_path, None),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
    })
}

pub(crate) fn write_text_response<W: Write>(stream: &mut W, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "text/plain", body.as_bytes())
}

pub(crate) fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    write_with_status_line(stream, status_line, content_type, body)
}

/// Rejection for `/stream` while another session holds the camera.
pub(crate) fn write_busy<W: Write>(stream: &mut W) -> Result<()> {
    write_with_status_line(stream, "HTTP/1.1 503 Busy", "text/plain", b"busy")
}

fn write_with_status_line<W: Write>(
    stream: &mut W,
    status_line: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn splits_path_and_query() -> Result<()> {
        let mut raw = Cursor::new(b"GET /flash?onoff=on HTTP/1.1\r\nHost: cam\r\n\r\n".to_vec());
        let request = read_request(&mut raw)?;
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/flash");
        assert_eq!(request.query.as_deref(), Some("onoff=on"));
        Ok(())
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        assert!(read_request(&mut Cursor::new(Vec::new())).is_err());
        let huge = vec![b'a'; MAX_REQUEST_BYTES + 2048];
        assert!(read_request(&mut Cursor::new(huge)).is_err());
    }

    #[test]
    fn busy_response_uses_its_own_reason() -> Result<()> {
        let mut out = Vec::new();
        write_busy(&mut out)?;
        let text = String::from_utf8(out)?;
        assert!(text.starts_with("HTTP/1.1 503 Busy\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.ends_with("\r\n\r\nbusy"));
        Ok(())
    }
}
