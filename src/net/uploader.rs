use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::UploadConfig;
use crate::encode::EncodedPayload;
use crate::error::{BarkwatchError, Result};

use super::multipart::{UploadEnvelope, random_boundary};

/// Upper bound on response lines logged before the rest is discarded
/// silently.
const MAX_LOGGED_LINES: usize = 64;

/// Longest response line kept; the rest of the line is read and dropped.
const MAX_LINE_BYTES: usize = 1024;

/// Response bytes drained before the connection is closed regardless.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// How the collector answered after the payload went out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// First response line, e.g. `HTTP/1.1 200 OK`.
    Answered(String),
    /// The collector closed the connection without a response.
    Closed,
    /// Nothing arrived within the response timeout.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub bytes_sent: usize,
    pub response: ResponseOutcome,
}

impl UploadReport {
    /// HTTP status code from the response line, if there was one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match &self.response {
            ResponseOutcome::Answered(line) => line.split_whitespace().nth(1)?.parse().ok(),
            _ => None,
        }
    }
}

/// Posts one payload per connection to the collector as multipart/form-data
/// over plain TCP.
#[derive(Debug, Clone)]
pub struct Uploader {
    host: String,
    port: u16,
    path: String,
    boundary: Option<String>,
    connect_timeout: Duration,
    io_timeout: Duration,
    response_timeout: Duration,
}

impl Uploader {
    #[must_use]
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            path: config.path.clone(),
            boundary: config.boundary.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            io_timeout: Duration::from_millis(config.io_timeout_ms),
            response_timeout: Duration::from_millis(config.response_timeout_ms),
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                BarkwatchError::ConnectFailed(format!(
                    "failed to resolve {}:{}: {e}",
                    self.host, self.port
                ))
            })?
            .collect();

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(BarkwatchError::ConnectFailed(match last_err {
            Some(e) => format!("{}:{}: {e}", self.host, self.port),
            None => format!("{}:{} resolved to no addresses", self.host, self.port),
        }))
    }

    /// Send the payload. Connect and write failures are errors; a slow or
    /// missing response is reported in the `UploadReport` instead, since the
    /// collector already has the data by then.
    pub fn upload(
        &self,
        payload: &EncodedPayload<'_>,
        device_id: &str,
        timestamp: &str,
    ) -> Result<UploadReport> {
        let boundary = self.boundary.clone().unwrap_or_else(random_boundary);
        let envelope = UploadEnvelope::new(
            &boundary,
            device_id,
            timestamp,
            payload.file_extension,
            payload.mime_type,
            payload.len(),
        );

        let stream = self.connect()?;
        tracing::info!(
            "connected to {}:{}, sending {} ({} bytes body)",
            self.host,
            self.port,
            envelope.filename,
            envelope.total_content_length()
        );

        stream
            .set_write_timeout(Some(self.io_timeout))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|e| BarkwatchError::UploadFailed(format!("configuring socket: {e}")))?;

        let bytes_sent = self.send(&stream, &envelope, payload)?;
        tracing::debug!("payload sent ({bytes_sent} body bytes)");

        let response = self.drain_response(&stream, Instant::now() + self.response_timeout);
        let _ = stream.shutdown(std::net::Shutdown::Both);

        Ok(UploadReport {
            bytes_sent,
            response,
        })
    }

    fn send(
        &self,
        stream: &TcpStream,
        envelope: &UploadEnvelope,
        payload: &EncodedPayload<'_>,
    ) -> Result<usize> {
        let total = envelope.total_content_length();
        let mut writer = BufWriter::new(stream);
        let mut sent = 0usize;

        let request_head = envelope.request_head(&self.host, self.port, &self.path);
        write_part(&mut writer, request_head.as_bytes(), "request headers", sent, total)?;

        write_part(&mut writer, envelope.head_bytes(), "form head", sent, total)?;
        sent += envelope.head_bytes().len();

        for chunk in payload.chunks() {
            write_part(&mut writer, chunk, "payload", sent, total)?;
            sent += chunk.len();
        }

        write_part(&mut writer, envelope.tail_bytes(), "form tail", sent, total)?;
        sent += envelope.tail_bytes().len();

        writer
            .flush()
            .map_err(|e| BarkwatchError::UploadFailed(format!("flushing request: {e}")))?;

        Ok(sent)
    }

    /// Wait for the first response line, then read and discard the rest.
    /// Everything after the payload shares one deadline.
    fn drain_response(&self, stream: &TcpStream, deadline: Instant) -> ResponseOutcome {
        let mut reader = BufReader::new(stream);

        let status_line = match read_line(&mut reader, deadline) {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::warn!("collector closed the connection without responding");
                return ResponseOutcome::Closed;
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    "no response within {:?}; payload was delivered, treating upload as done",
                    self.response_timeout
                );
                return ResponseOutcome::TimedOut;
            }
            Err(e) => {
                tracing::warn!("failed to read collector response: {e}");
                return ResponseOutcome::Closed;
            }
        };

        tracing::info!("collector responded: {status_line}");

        let mut logged = 0usize;
        let mut drained = status_line.len();
        while drained < MAX_RESPONSE_BYTES {
            match read_line(&mut reader, deadline) {
                Ok(Some(line)) => {
                    drained += line.len() + 1;
                    if logged < MAX_LOGGED_LINES {
                        tracing::debug!("response: {line}");
                        logged += 1;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("stopped draining response: {e}");
                    break;
                }
            }
        }

        ResponseOutcome::Answered(status_line)
    }
}

fn write_part(
    writer: &mut impl Write,
    bytes: &[u8],
    what: &str,
    sent: usize,
    total: usize,
) -> Result<()> {
    writer.write_all(bytes).map_err(|e| {
        BarkwatchError::UploadFailed(format!(
            "writing {what} after {sent} of {total} body bytes: {e}"
        ))
    })
}

/// One CRLF/LF-terminated line of at most `MAX_LINE_BYTES`. `Ok(None)` on
/// clean EOF, `Err(ResponseTimeout)` once `deadline` passes.
fn read_line(reader: &mut BufReader<&TcpStream>, deadline: Instant) -> Result<Option<String>> {
    let mut raw = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BarkwatchError::ResponseTimeout);
        }
        reader.get_ref().set_read_timeout(Some(remaining))?;

        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(BarkwatchError::ResponseTimeout);
            }
            Err(e) => return Err(BarkwatchError::Io(e)),
        };
        if available.is_empty() {
            return Ok((!raw.is_empty()).then(|| to_line(&raw)));
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let used = newline.map_or(available.len(), |i| i + 1);
        let keep = used.min(MAX_LINE_BYTES - raw.len());
        raw.extend_from_slice(&available[..keep]);
        reader.consume(used);

        if newline.is_some() {
            return Ok(Some(to_line(&raw)));
        }
    }
}

fn to_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::buffer::OutputBuffer;

    const BOUNDARY: &str = "----fixed";

    fn uploader_for(port: u16, response_timeout_ms: u64) -> Uploader {
        Uploader::new(&UploadConfig {
            host: "127.0.0.1".to_string(),
            port,
            path: "/upload".to_string(),
            boundary: Some(BOUNDARY.to_string()),
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            response_timeout_ms,
        })
    }

    fn payload_from(out: &OutputBuffer) -> EncodedPayload<'_> {
        EncodedPayload {
            header: out.header(),
            body: out.body(),
            mime_type: "audio/wav",
            file_extension: "wav",
        }
    }

    /// Read one full request (headers + declared body) from the socket.
    fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        while !raw.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).unwrap_or_else(|e| panic!("{e}"));
            raw.push(byte[0]);
        }
        let head = String::from_utf8(raw).unwrap_or_else(|e| panic!("{e}"));
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap_or_else(|| panic!("no content length"))
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{e}"));
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).unwrap_or_else(|e| panic!("{e}"));
        (head, body)
    }

    #[test]
    fn sends_byte_exact_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        let port = listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap_or_else(|e| panic!("{e}"));
            let request = read_request(&mut stream);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .unwrap_or_else(|e| panic!("{e}"));
            request
        });

        let mut out = OutputBuffer::with_capacity(16);
        out.set_header(b"HEAD").unwrap_or_else(|e| panic!("{e}"));
        out.append(&[0, 1, 2, 0xFF]).unwrap_or_else(|e| panic!("{e}"));

        let report = uploader_for(port, 2000)
            .upload(&payload_from(&out), "DEV", "20250101000000")
            .unwrap_or_else(|e| panic!("{e}"));
        let (head, body) = server.join().unwrap_or_else(|_| panic!("server panicked"));

        let envelope =
            UploadEnvelope::new(BOUNDARY, "DEV", "20250101000000", "wav", "audio/wav", 8);
        let mut expected = envelope.head_bytes().to_vec();
        expected.extend_from_slice(b"HEAD");
        expected.extend_from_slice(&[0, 1, 2, 0xFF]);
        expected.extend_from_slice(envelope.tail_bytes());

        assert!(head.starts_with("POST /upload HTTP/1.1\r\n"));
        assert_eq!(body, expected);
        assert_eq!(report.bytes_sent, envelope.total_content_length());
        assert_eq!(report.status_code(), Some(200));
    }

    #[test]
    fn silent_collector_is_a_timeout_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        let port = listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap_or_else(|e| panic!("{e}"));
            let _ = read_request(&mut stream);
            // Hold the connection open without answering.
            thread::sleep(Duration::from_millis(400));
        });

        let out = OutputBuffer::with_capacity(0);
        let report = uploader_for(port, 100)
            .upload(&payload_from(&out), "DEV", "20250101000000")
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(report.response, ResponseOutcome::TimedOut);
        let _ = server.join();
    }

    #[test]
    fn trickling_response_is_cut_off_at_the_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        let port = listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap_or_else(|e| panic!("{e}"));
            let _ = read_request(&mut stream);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\n")
                .unwrap_or_else(|e| panic!("{e}"));
            // One byte at a time, never a newline, until the client hangs up.
            let started = Instant::now();
            while started.elapsed() < Duration::from_secs(5) {
                if stream.write_all(b"x").is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
        });

        let out = OutputBuffer::with_capacity(0);
        let started = Instant::now();
        let report = uploader_for(port, 300)
            .upload(&payload_from(&out), "DEV", "20250101000000")
            .unwrap_or_else(|e| panic!("{e}"));
        let elapsed = started.elapsed();

        assert_eq!(report.status_code(), Some(200));
        assert!(elapsed < Duration::from_secs(2), "drain took {elapsed:?}");
        let _ = server.join();
    }

    #[test]
    fn zero_io_timeout_is_upload_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
        let port = listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port();

        let uploader = Uploader::new(&UploadConfig {
            host: "127.0.0.1".to_string(),
            port,
            path: "/upload".to_string(),
            boundary: Some(BOUNDARY.to_string()),
            connect_timeout_ms: 1000,
            io_timeout_ms: 0,
            response_timeout_ms: 100,
        });

        let out = OutputBuffer::with_capacity(0);
        let result = uploader.upload(&payload_from(&out), "DEV", "T");
        let socket_error =
            matches!(&result, Err(BarkwatchError::UploadFailed(m)) if m.contains("configuring"));
        assert!(socket_error, "{result:?}");
        drop(listener);
    }

    #[test]
    fn refused_connection_is_connect_failed() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap_or_else(|e| panic!("{e}"));
            listener.local_addr().unwrap_or_else(|e| panic!("{e}")).port()
        };

        let out = OutputBuffer::with_capacity(0);
        let result = uploader_for(port, 100).upload(&payload_from(&out), "DEV", "T");
        assert!(matches!(result, Err(BarkwatchError::ConnectFailed(_))));
    }

    #[test]
    fn status_code_parses_response_line() {
        let report = UploadReport {
            bytes_sent: 0,
            response: ResponseOutcome::Answered("HTTP/1.1 404 Not Found".to_string()),
        };
        assert_eq!(report.status_code(), Some(404));
        let closed = UploadReport {
            bytes_sent: 0,
            response: ResponseOutcome::Closed,
        };
        assert_eq!(closed.status_code(), None);
    }
}
