use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camstream::config::HttpSettings;
use camstream::{
    is_jpeg, open_source, CameraServer, CaptureProfile, ControlEvent, Flash, FrameSize,
    ServerConfig, ServerHandle, SharedCamera, StreamPolicy, SysfsGpioPin,
};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    handle: Option<ServerHandle>,
}

impl TestServer {
    fn new(source_url: &str) -> Result<Self> {
        Self::with_options(source_url, 4, Flash::disabled())
    }

    fn with_options(source_url: &str, max_open_sockets: usize, flash: Flash) -> Result<Self> {
        let profile = CaptureProfile::new(FrameSize::Qqvga, 20)?;
        let camera = SharedCamera::new(open_source(source_url, profile)?);
        let cfg = ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            http: HttpSettings {
                max_open_sockets,
                send_timeout: Duration::from_secs(2),
                recv_timeout: Duration::from_secs(2),
            },
            stream: StreamPolicy::default(),
            restart_delay: Duration::from_millis(10),
        };
        let handle = CameraServer::new(cfg, camera, Arc::new(flash)).spawn()?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    fn handle(&self) -> &ServerHandle {
        self.handle
            .as_ref()
            .expect("test server handle should be initialized")
    }

    fn addr(&self) -> SocketAddr {
        self.handle().addr
    }

    fn stop(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.stop(),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("failed to stop camera server");
        }
    }
}

fn connect(addr: SocketAddr, method: &str, path: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    let request = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, path);
    stream.write_all(request.as_bytes())?;
    Ok(stream)
}

/// Full response of a non-streaming request, split into head and body.
fn request(addr: SocketAddr, method: &str, path: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = connect(addr, method, path)?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    split_response(&response)
}

fn split_response(response: &[u8]) -> Result<(String, Vec<u8>)> {
    let end = find(response, b"\r\n\r\n").ok_or_else(|| anyhow!("incomplete response"))?;
    let head = String::from_utf8_lossy(&response[..end]).to_string();
    Ok((head, response[end + 4..].to_vec()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

/// Read from `stream` until `needle` has appeared `times` times.
fn read_until(stream: &mut TcpStream, needle: &[u8], times: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while count(&data, needle) < times {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed after {} bytes", data.len()));
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(data)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + IO_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn index_serves_control_page() -> Result<()> {
    let server = TestServer::new("stub://index")?;
    let (head, body) = request(server.addr(), "GET", "/")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: text/html"));
    let body = String::from_utf8(body)?;
    assert!(body.contains(r#"src="/stream""#));
    assert!(body.contains("/flash?onoff=toggle"));
    Ok(())
}

#[test]
fn snapshot_returns_one_jpeg() -> Result<()> {
    let server = TestServer::new("stub://snapshot")?;
    let (head, body) = request(server.addr(), "GET", "/jpg")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: image/jpeg"));
    assert!(head.contains(&format!("Content-Length: {}", body.len())));
    assert!(is_jpeg(&body));
    Ok(())
}

#[test]
fn camera_stats_count_served_and_failed_captures() -> Result<()> {
    let server = TestServer::new("stub://stats?fail_first=1")?;
    let (head, _) = request(server.addr(), "GET", "/jpg")?;
    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error"));
    let (head, _) = request(server.addr(), "GET", "/jpg")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));

    let stats = server.handle().camera_stats();
    assert_eq!(stats.source, "stub://stats?fail_first=1");
    assert_eq!(stats.frames_captured, 1);
    assert_eq!(stats.acquire_failures, 1);
    assert_eq!(stats.reconfigurations, 0);
    Ok(())
}

#[test]
fn snapshot_capture_failure_is_500() -> Result<()> {
    let server = TestServer::new("stub://broken?fail_every=1")?;
    let (head, _body) = request(server.addr(), "GET", "/jpg")?;
    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error"));
    Ok(())
}

#[test]
fn stream_admits_one_client_at_a_time() -> Result<()> {
    let server = TestServer::new("stub://stream")?;

    let mut first = connect(server.addr(), "GET", "/stream")?;
    let data = read_until(&mut first, b"\r\n--frame\r\n", 2)?;
    let (head, body) = split_response(&data)?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(head.contains("Transfer-Encoding: chunked"));
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert!(find(&body, b"Content-Type: image/jpeg\r\nContent-Length: ").is_some());
    assert!(server.handle().camera_busy());

    let (busy_head, busy_body) = request(server.addr(), "GET", "/stream")?;
    assert!(busy_head.starts_with("HTTP/1.1 503 Busy"));
    assert_eq!(busy_body, b"busy");

    // A snapshot must not drive the camera under an admitted stream.
    let (snap_head, snap_body) = request(server.addr(), "GET", "/jpg")?;
    assert!(snap_head.starts_with("HTTP/1.1 503 Busy"));
    assert_eq!(snap_body, b"busy");

    drop(first);
    assert!(
        wait_until(|| !server.handle().camera_busy()),
        "stream session did not notice the disconnect"
    );

    let (snap_head, snap_body) = request(server.addr(), "GET", "/jpg")?;
    assert!(snap_head.starts_with("HTTP/1.1 200 OK"));
    assert!(is_jpeg(&snap_body));
    assert!(!server.handle().camera_busy());

    let mut second = connect(server.addr(), "GET", "/stream")?;
    let data = read_until(&mut second, b"\r\n--frame\r\n", 1)?;
    assert!(data.starts_with(b"HTTP/1.1 200 OK"));
    Ok(())
}

#[test]
fn stop_ends_an_active_stream_cleanly() -> Result<()> {
    let server = TestServer::new("stub://shutdown")?;
    let mut client = connect(server.addr(), "GET", "/stream")?;
    read_until(&mut client, b"\r\n--frame\r\n", 1)?;

    server.stop()?;

    let mut rest = Vec::new();
    client.read_to_end(&mut rest)?;
    assert!(rest.ends_with(b"0\r\n\r\n"), "chunked body was not terminated");
    Ok(())
}

#[test]
fn flash_follows_onoff_parameter() -> Result<()> {
    let server = TestServer::new("stub://flash")?;
    let cases = [
        ("/flash?onoff=on", "flash:on"),
        ("/flash?onoff=off", "flash:off"),
        ("/flash?onoff=toggle", "flash:on"),
        ("/flash?onoff=strobe", "flash:off"),
        ("/flash", "flash:on"),
    ];
    for (path, expected) in cases {
        let (head, body) = request(server.addr(), "GET", path)?;
        assert!(head.starts_with("HTTP/1.1 200 OK"), "{}", path);
        assert!(head.contains("Content-Type: text/plain"));
        assert_eq!(String::from_utf8(body)?, expected, "{}", path);
    }
    Ok(())
}

#[test]
fn flash_pin_failure_is_500() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pin = SysfsGpioPin::with_value_path(dir.path().join("missing").join("value"));
    let server = TestServer::with_options("stub://flash", 4, Flash::new(Box::new(pin)))?;
    let (head, _body) = request(server.addr(), "GET", "/flash?onoff=on")?;
    assert!(head.starts_with("HTTP/1.1 500 Internal Server Error"));
    Ok(())
}

#[test]
fn restart_acknowledges_then_signals() -> Result<()> {
    let server = TestServer::new("stub://restart")?;
    let (head, body) = request(server.addr(), "GET", "/restart")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"restarting...");
    assert_eq!(
        server.handle().recv_control_timeout(IO_TIMEOUT),
        Some(ControlEvent::Restart)
    );
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let server = TestServer::new("stub://routes")?;
    let (head, _) = request(server.addr(), "GET", "/capture")?;
    assert!(head.starts_with("HTTP/1.1 404 Not Found"));
    let (head, _) = request(server.addr(), "POST", "/flash")?;
    assert!(head.starts_with("HTTP/1.1 405 Method Not Allowed"));
    Ok(())
}

#[test]
fn connections_beyond_the_socket_limit_get_503() -> Result<()> {
    let server = TestServer::with_options("stub://limit", 1, Flash::disabled())?;
    let mut streaming = connect(server.addr(), "GET", "/stream")?;
    read_until(&mut streaming, b"\r\n--frame\r\n", 1)?;

    let (head, body) = request(server.addr(), "GET", "/")?;
    assert!(head.starts_with("HTTP/1.1 503 Service Unavailable"));
    assert_eq!(body, b"too many connections");

    drop(streaming);
    assert!(wait_until(|| server.handle().open_connections() == 0));
    let (head, _) = request(server.addr(), "GET", "/")?;
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    Ok(())
}
