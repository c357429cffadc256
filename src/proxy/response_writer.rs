use http::{HeaderMap, StatusCode};

/// The response side of a proxied request as the round tripper sees it:
/// enough surface to stamp headers and emit an error response without
/// owning the real connection.
pub trait ProxyResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn write_status(&mut self, status: StatusCode);
    fn write(&mut self, body: &[u8]);
    /// The status written so far, if any.
    fn status(&self) -> Option<StatusCode>;
}

/// A recording writer. Backs tests and any embedder that buffers the
/// response before flushing it to the wire.
#[derive(Debug, Default)]
pub struct InMemoryResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl InMemoryResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl ProxyResponseWriter for InMemoryResponseWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn write(&mut self, body: &[u8]) {
        self.body.extend_from_slice(body);
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }
}
