//! HTTP transport used by the API client.
//!
//! The `Transport` trait is the seam between request building and the wire:
//! `UreqTransport` talks to the real backend, tests plug in scripted fakes.
//! A transport reports every HTTP status as a response; only failures that
//! prevent getting a response at all are errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to a multipart form
#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// `multipart/form-data` body. The transport picks the boundary and sets the
/// matching content-type header itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, field: &str, filename: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        self.files.push(FilePart {
            field: field.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            bytes,
        });
        self
    }

    #[cfg(test)]
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode the form with the given boundary
    pub fn encode(&self, boundary: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for file in &self.files {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    file.field, file.filename
                )
                .as_bytes(),
            );
            out.extend_from_slice(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
            out.extend_from_slice(&file.bytes);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartForm),
}

impl Body {
    pub fn is_multipart(&self) -> bool {
        matches!(self, Body::Multipart(_))
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Case-insensitive header lookup
    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response (DNS, refused connection, timeout, I/O)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub trait Transport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
    default_timeout: Duration,
}

impl UreqTransport {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            default_timeout,
        }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut req = self
            .agent
            .request(request.method.as_str(), &request.url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        let resp = match &request.body {
            Body::Empty => req.call(),
            Body::Json(value) => req.send_string(&value.to_string()),
            Body::Multipart(form) => {
                let boundary = format!("----attend{}", uuid::Uuid::new_v4().simple());
                req.set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={}", boundary),
                )
                .send_bytes(&form.encode(&boundary))
            }
        };

        let resp = match resp {
            Ok(r) => r,
            Err(ureq::Error::Status(_, r)) => r,
            Err(ureq::Error::Transport(t)) => return Err(TransportError(t.to_string())),
        };

        let status = resp.status();
        let body = resp
            .into_string()
            .map_err(|e| TransportError(format!("failed to read response body: {}", e)))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one canned HTTP response and hand back the raw request
    fn serve_once(status_line: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(v) = line.to_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                head.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            head.push_str(&String::from_utf8_lossy(&body));
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            head
        });
        (format!("http://{}", addr), handle)
    }

    fn request(method: Method, url: String, body: Body) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: vec![("Authorization".to_string(), "Bearer t0k".to_string())],
            body,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_ureq_success_response() {
        let (base, handle) = serve_once("200 OK", r#"{"status":"success","users":[]}"#);
        let transport = UreqTransport::new(Duration::from_secs(5));
        let resp = transport
            .send(&request(Method::Get, format!("{}/users", base), Body::Empty))
            .unwrap();
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("success"));

        let raw = handle.join().unwrap();
        assert!(raw.starts_with("GET /users HTTP/1.1"));
        assert!(raw.contains("Bearer t0k"));
    }

    #[test]
    fn test_ureq_error_status_is_a_response() {
        let (base, handle) = serve_once(
            "401 UNAUTHORIZED",
            r#"{"status":"error","message":"Token has expired"}"#,
        );
        let transport = UreqTransport::new(Duration::from_secs(5));
        let resp = transport
            .send(&request(
                Method::Post,
                format!("{}/mark_attendance", base),
                Body::Json(serde_json::json!({"student_id": "S001"})),
            ))
            .unwrap();
        assert_eq!(resp.status, 401);
        assert!(resp.body.contains("Token has expired"));

        let raw = handle.join().unwrap();
        assert!(raw.contains(r#"{"student_id":"S001"}"#));
    }

    #[test]
    fn test_ureq_multipart_sets_boundary() {
        let (base, handle) = serve_once("200 OK", r#"{"status":"success"}"#);
        let transport = UreqTransport::new(Duration::from_secs(5));
        let form = MultipartForm::new()
            .file("file", "users.csv", "text/csv", b"user_id,name\nS001,John\n".to_vec())
            .text("default_role", "student");
        transport
            .send(&request(
                Method::Post,
                format!("{}/bulk-upload", base),
                Body::Multipart(form),
            ))
            .unwrap();

        let raw = handle.join().unwrap();
        assert!(raw
            .to_lowercase()
            .contains("content-type: multipart/form-data; boundary=----attend"));
        assert!(raw.contains("name=\"default_role\""));
        assert!(raw.contains("S001,John"));
    }

    #[test]
    fn test_ureq_connection_refused_is_transport_error() {
        // Grab a free port, then close it so nothing is listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = UreqTransport::new(Duration::from_secs(2));
        let result = transport.send(&request(
            Method::Get,
            format!("http://127.0.0.1:{}/users", port),
            Body::Empty,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_multipart_encoding() {
        let form = MultipartForm::new()
            .text("default_role", "lecturer")
            .file("file", "a.csv", "text/csv", b"x".to_vec());
        let encoded = String::from_utf8(form.encode("BOUND")).unwrap();
        assert_eq!(
            encoded,
            "--BOUND\r\nContent-Disposition: form-data; name=\"default_role\"\r\n\r\nlecturer\r\n\
             --BOUND\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.csv\"\r\n\
             Content-Type: text/csv\r\n\r\nx\r\n--BOUND--\r\n"
        );
        assert_eq!(form.text_value("default_role"), Some("lecturer"));
    }
}
