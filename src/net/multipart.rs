use rand::Rng;
use rand::distr::Alphanumeric;

/// Prefix for generated boundary tokens.
const BOUNDARY_PREFIX: &str = "----BarkwatchBoundary";

/// Form field names the collector expects.
const FIELD_DEVICE: &str = "i";
const FIELD_TIMESTAMP: &str = "d";
const FIELD_FILE: &str = "awfile";

/// A fresh boundary token with a random 16-character suffix.
#[must_use]
pub fn random_boundary() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{BOUNDARY_PREFIX}{suffix}")
}

/// The multipart/form-data framing around one audio payload.
///
/// The body on the wire is `head ++ payload ++ tail`; the envelope is built
/// before anything is sent so `Content-Length` can be declared up front.
///
/// ```text
/// --B\r\nContent-Disposition: form-data; name="i"\r\n\r\n<device>\r\n
/// --B\r\nContent-Disposition: form-data; name="d"\r\n\r\n<timestamp>\r\n
/// --B\r\nContent-Disposition: form-data; name="awfile"; filename="<device><timestamp>.<ext>"\r\n
/// Content-Type: <mime>\r\n\r\n
/// <payload>
/// \r\n--B--\r\n
/// ```
#[derive(Debug, Clone)]
pub struct UploadEnvelope {
    pub boundary_token: String,
    pub device_id: String,
    pub timestamp: String,
    pub filename: String,
    head: Vec<u8>,
    tail: Vec<u8>,
    payload_len: usize,
}

impl UploadEnvelope {
    #[must_use]
    pub fn new(
        boundary: &str,
        device_id: &str,
        timestamp: &str,
        extension: &str,
        mime_type: &str,
        payload_len: usize,
    ) -> Self {
        let filename = format!("{device_id}{timestamp}.{extension}");

        let mut head = String::new();
        head.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{FIELD_DEVICE}\"\r\n\r\n{device_id}\r\n"
        ));
        head.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{FIELD_TIMESTAMP}\"\r\n\r\n{timestamp}\r\n"
        ));
        head.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{FIELD_FILE}\"; filename=\"{filename}\"\r\n"
        ));
        head.push_str(&format!("Content-Type: {mime_type}\r\n\r\n"));

        let tail = format!("\r\n--{boundary}--\r\n");

        Self {
            boundary_token: boundary.to_string(),
            device_id: device_id.to_string(),
            timestamp: timestamp.to_string(),
            filename,
            head: head.into_bytes(),
            tail: tail.into_bytes(),
            payload_len,
        }
    }

    #[must_use]
    pub fn head_bytes(&self) -> &[u8] {
        &self.head
    }

    #[must_use]
    pub fn tail_bytes(&self) -> &[u8] {
        &self.tail
    }

    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Exact number of body bytes that will follow the request headers.
    #[must_use]
    pub const fn total_content_length(&self) -> usize {
        self.head.len() + self.payload_len + self.tail.len()
    }

    /// Request line and headers, through the blank line.
    #[must_use]
    pub fn request_head(&self, host: &str, port: u16, path: &str) -> String {
        let host_header = if port == 80 {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        format!(
            "POST {path} HTTP/1.1\r\n\
             Host: {host_header}\r\n\
             Connection: close\r\n\
             Content-Type: multipart/form-data; boundary={}\r\n\
             Content-Length: {}\r\n\
             \r\n",
            self.boundary_token,
            self.total_content_length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

    #[test]
    fn body_layout_is_exact() {
        let env =
            UploadEnvelope::new(BOUNDARY, "TEST_MACHINE", "20250101000000", "mp3", "audio/mpeg", 3);
        let head =
            String::from_utf8(env.head_bytes().to_vec()).unwrap_or_else(|e| panic!("{e}"));
        let expected = "------WebKitFormBoundary7MA4YWxkTrZu0gW\r\n\
            Content-Disposition: form-data; name=\"i\"\r\n\r\nTEST_MACHINE\r\n\
            ------WebKitFormBoundary7MA4YWxkTrZu0gW\r\n\
            Content-Disposition: form-data; name=\"d\"\r\n\r\n20250101000000\r\n\
            ------WebKitFormBoundary7MA4YWxkTrZu0gW\r\n\
            Content-Disposition: form-data; name=\"awfile\"; \
            filename=\"TEST_MACHINE20250101000000.mp3\"\r\n\
            Content-Type: audio/mpeg\r\n\r\n";
        assert_eq!(head, expected);
        assert_eq!(
            env.tail_bytes(),
            b"\r\n------WebKitFormBoundary7MA4YWxkTrZu0gW--\r\n"
        );
        assert_eq!(env.filename, "TEST_MACHINE20250101000000.mp3");
    }

    #[test]
    fn content_length_sums_all_parts() {
        let cases = [
            ("b", "", "", 0usize),
            (BOUNDARY, "KENNEL_7", "20251231235959", 320_044),
            ("x-y-z", "dévice", "20250101000000", 17),
            ("----", "a\"b", "??", 1),
        ];
        for (boundary, device, stamp, payload_len) in cases {
            let env = UploadEnvelope::new(boundary, device, stamp, "wav", "audio/wav", payload_len);
            assert_eq!(
                env.total_content_length(),
                env.head_bytes().len() + payload_len + env.tail_bytes().len()
            );
        }
    }

    #[test]
    fn request_head_declares_length() {
        let env =
            UploadEnvelope::new(BOUNDARY, "TEST_MACHINE", "20250101000000", "wav", "audio/wav", 44);
        let head = env.request_head("192.168.219.106", 8080, "/FarmData/fileUpload.do");
        assert!(head.starts_with("POST /FarmData/fileUpload.do HTTP/1.1\r\n"));
        assert!(head.contains("Host: 192.168.219.106:8080\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains(&format!("boundary={BOUNDARY}\r\n")));
        assert!(head.contains(&format!("Content-Length: {}\r\n", env.total_content_length())));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn default_port_omitted_from_host() {
        let env = UploadEnvelope::new("b", "d", "t", "wav", "audio/wav", 0);
        assert!(env.request_head("example.org", 80, "/").contains("Host: example.org\r\n"));
    }

    #[test]
    fn random_boundaries_differ() {
        let a = random_boundary();
        let b = random_boundary();
        assert!(a.starts_with(BOUNDARY_PREFIX));
        assert_eq!(a.len(), BOUNDARY_PREFIX.len() + 16);
        assert_ne!(a, b);
    }
}
