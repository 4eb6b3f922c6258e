//! `multipart/x-mixed-replace` framing.
//!
//! Each part is sent as three chunks: the part header, the JPEG bytes, and the boundary
//! that closes the part.

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const PART_BOUNDARY: &[u8] = b"\r\n--frame\r\n";

/// Header chunk for a part carrying `len` bytes of JPEG.
pub fn part_header(len: usize) -> String {
    format!("Content-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", len)
}
