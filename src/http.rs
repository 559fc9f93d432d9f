//! Blocking HTTP client shared by the camera, classifier and actuator adapters.
//!
//! Each request runs against one deadline that covers connecting, the response
//! head and the whole body. Bodies are capped at `max_body` bytes.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_CHUNK_BYTES: usize = 16 * 1024;
const USER_AGENT: &str = concat!("crossing-guard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("io error: {0}")]
    Io(io::Error),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else {
            HttpError::Request(err)
        }
    }

    fn from_io(err: io::Error) -> Self {
        let timed_out = matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
            || err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                .is_some_and(reqwest::Error::is_timeout);
        if timed_out {
            HttpError::Timeout
        } else {
            HttpError::Io(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Non-2xx statuses come back as responses, not errors; callers decide what a
/// status means for them.
///
/// Must be built and used outside the tokio runtime (detection and command
/// worker threads, or `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    max_body: usize,
}

impl HttpClient {
    pub fn new(max_body: usize) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(HttpError::Build)?;
        Ok(Self { client, max_body })
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }

    pub fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError> {
        self.execute(self.client.get(url), timeout)
    }

    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        self.execute(request, timeout)
    }

    pub fn post_json<T>(&self, url: &str, payload: &T, timeout: Duration) -> Result<HttpResponse, HttpError>
    where
        T: Serialize + ?Sized,
    {
        self.execute(self.client.post(url).json(payload), timeout)
    }

    fn execute(&self, request: RequestBuilder, timeout: Duration) -> Result<HttpResponse, HttpError> {
        let deadline = Instant::now() + timeout;
        let response = request
            .timeout(timeout)
            .send()
            .map_err(HttpError::from_reqwest)?;
        let status = response.status().as_u16();
        let body = read_body(response, self.max_body, deadline)?;
        Ok(HttpResponse { status, body })
    }
}

fn read_body(mut response: Response, limit: usize, deadline: Instant) -> Result<Vec<u8>, HttpError> {
    if let Some(declared) = response.content_length()
        && declared > limit as u64
    {
        return Err(HttpError::BodyTooLarge { limit });
    }

    let mut body = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        if Instant::now() >= deadline {
            return Err(HttpError::Timeout);
        }
        let n = response.read(&mut chunk).map_err(HttpError::from_io)?;
        if n == 0 {
            break;
        }
        if body.len() + n > limit {
            return Err(HttpError::BodyTooLarge { limit });
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(body)
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Accept one connection, capture the request and answer with `response`
    /// after `delay`.
    pub fn serve_once(
        response: &'static str,
        delay: Duration,
    ) -> std::io::Result<(String, JoinHandle<String>)> {
        serve_with(move |stream| {
            std::thread::sleep(delay);
            let _ = stream.write_all(response.as_bytes());
        })
    }

    /// Write `response` one byte at a time.
    pub fn serve_trickle(
        response: &'static str,
        per_byte: Duration,
    ) -> std::io::Result<(String, JoinHandle<String>)> {
        serve_with(move |stream| {
            for byte in response.as_bytes() {
                if stream.write_all(&[*byte]).and_then(|_| stream.flush()).is_err() {
                    return;
                }
                std::thread::sleep(per_byte);
            }
        })
    }

    /// Answer immediately, then keep the connection open for `hold`.
    pub fn serve_and_hold(
        response: &'static str,
        hold: Duration,
    ) -> std::io::Result<(String, JoinHandle<String>)> {
        serve_with(move |stream| {
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
            std::thread::sleep(hold);
        })
    }

    fn serve_with<F>(reply: F) -> std::io::Result<(String, JoinHandle<String>)>
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
            let mut buf = [0u8; 4096];
            let mut request = Vec::new();
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            reply(&mut stream);
            String::from_utf8_lossy(&request).into_owned()
        });
        Ok((format!("http://{addr}"), handle))
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(split) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..split]).to_ascii_lowercase();
        let length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= split + 4 + length
    }
}
