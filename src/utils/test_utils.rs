#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(test)]
use tokio::net::{TcpListener, TcpStream};

#[cfg(test)]
use crate::core::message::{Message, TranscriptRole};

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[cfg(test)]
impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
enum BodyKind {
    Fixed(Vec<u8>),
    Chunked {
        parts: Vec<Vec<u8>>,
        delay: Duration,
        abort: bool,
    },
    Stall,
}

/// One canned response, served on its own connection.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: BodyKind,
}

#[cfg(test)]
impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "application/json".into())],
            body: BodyKind::Fixed(body.as_bytes().to_vec()),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "text/plain; charset=utf-8".into())],
            body: BodyKind::Fixed(body.as_bytes().to_vec()),
        }
    }

    /// Chunked body written part by part with a pause in between.
    pub fn chunked(content_type: &str, parts: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".into(), content_type.into())],
            body: BodyKind::Chunked {
                parts,
                delay: Duration::from_millis(15),
                abort: false,
            },
        }
    }

    pub fn text_chunks(parts: &[&str]) -> Self {
        Self::chunked(
            "text/plain; charset=utf-8",
            parts.iter().map(|p| p.as_bytes().to_vec()).collect(),
        )
    }

    /// Write the parts, then drop the connection without the final chunk.
    pub fn aborted_after(mut self) -> Self {
        if let BodyKind::Chunked { abort, .. } = &mut self.body {
            *abort = true;
        }
        self
    }

    /// Read the request and never answer.
    pub fn stall() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: BodyKind::Stall,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[cfg(test)]
pub struct MockServer {
    pub base_url: String,
    task: tokio::task::JoinHandle<Result<Vec<CapturedRequest>, String>>,
}

#[cfg(test)]
impl MockServer {
    /// Wait until every canned response was served and return the requests.
    pub async fn finish(self) -> Vec<CapturedRequest> {
        self.task
            .await
            .expect("mock server task should join")
            .expect("mock server should succeed")
    }

    /// Stop serving; for responses that never complete.
    pub fn abort(self) {
        self.task.abort();
    }
}

#[cfg(test)]
pub async fn spawn_mock_server(responses: Vec<MockResponse>) -> MockServer {
    disable_proxies();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");

    let task = tokio::spawn(async move {
        let mut captured = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            captured.push(read_http_request(&mut stream).await?);
            write_response(&mut stream, response).await?;
        }
        Ok(captured)
    });

    MockServer {
        base_url: format!("http://{addr}"),
        task,
    }
}

#[cfg(test)]
fn disable_proxies() {
    for var in [
        "HTTP_PROXY",
        "http_proxy",
        "HTTPS_PROXY",
        "https_proxy",
        "ALL_PROXY",
        "all_proxy",
    ] {
        std::env::remove_var(var);
    }
    std::env::set_var("NO_PROXY", "*");
    std::env::set_var("no_proxy", "*");
}

#[cfg(test)]
async fn write_response(stream: &mut TcpStream, response: MockResponse) -> Result<(), String> {
    let MockResponse {
        status,
        headers,
        body,
    } = response;

    let mut head = format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status));
    for (name, value) in &headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("connection: close\r\n");

    match body {
        BodyKind::Fixed(bytes) => {
            head.push_str(&format!("content-length: {}\r\n\r\n", bytes.len()));
            write_all(stream, head.as_bytes()).await?;
            write_all(stream, &bytes).await?;
        }
        BodyKind::Chunked {
            parts,
            delay,
            abort,
        } => {
            head.push_str("transfer-encoding: chunked\r\n\r\n");
            write_all(stream, head.as_bytes()).await?;
            for part in parts {
                let mut frame = format!("{:x}\r\n", part.len()).into_bytes();
                frame.extend_from_slice(&part);
                frame.extend_from_slice(b"\r\n");
                write_all(stream, &frame).await?;
                tokio::time::sleep(delay).await;
            }
            if abort {
                return Ok(());
            }
            write_all(stream, b"0\r\n\r\n").await?;
        }
        BodyKind::Stall => {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }
    Ok(())
}

#[cfg(test)]
async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), String> {
    stream.write_all(bytes).await.map_err(|err| err.to_string())?;
    stream.flush().await.map_err(|err| err.to_string())
}

#[cfg(test)]
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Status",
    }
}

#[cfg(test)]
async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let mut parts = line.splitn(2, ':');
        let Some(name) = parts.next() else {
            continue;
        };
        let value = parts.next().unwrap_or_default().trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length.saturating_sub(body.len())];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

#[cfg(test)]
pub fn create_test_message(role: TranscriptRole, content: &str) -> Message {
    Message::new(role, content)
}

#[cfg(test)]
pub fn create_test_messages() -> Vec<Message> {
    vec![
        create_test_message(TranscriptRole::User, "Sarapan nasi goreng 2 porsi"),
        create_test_message(
            TranscriptRole::Assistant,
            "Nasi goreng, 2 portions: about **700 kcal**.",
        ),
        create_test_message(TranscriptRole::User, "lunch mie goreng"),
        create_test_message(TranscriptRole::Assistant, "Mie goreng adds ~450 kcal."),
    ]
}
