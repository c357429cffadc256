use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode, Uri as HttpUri};
use tracing::{error, info};

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::metrics::ProxyReporter;
use crate::route::Pool;

use super::headers::{self, CF_ROUTER_ERROR_HEADER, VCAP_TRACE_HEADER};
use super::{AccessLogHandle, ResponseWriterHandle, RoutePool, RouteServiceUrl};

/// Body of every 502 the round tripper produces. Literal-equal across all
/// error paths so callers and tests can match on it.
pub const BAD_GATEWAY_MESSAGE: &str =
    "502 Bad Gateway: Registered endpoint failed to handle the request.";

/// The transport underneath the round tripper: one attempt against one
/// upstream, no retry logic of its own. Errors are classified for retry
/// by their [`io::ErrorKind`].
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn round_trip(&self, req: &Request<Bytes>) -> io::Result<Response<Bytes>>;

    /// Forwards an in-flight cancellation. The default is a no-op for
    /// transports that cancel by dropping the request future.
    fn cancel_request(&self, _req: &Request<Bytes>) {}
}

/// Dial-style refusals, peer resets, and unreachable hosts are worth
/// trying against another endpoint; anything else is surfaced as-is.
fn retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// The proxying round tripper: selects an endpoint from the request's
/// route pool, forwards the request, retries retryable network failures
/// against other endpoints, and degrades to a canonical 502 when no
/// usable upstream response materializes.
pub struct ProxyRoundTripper {
    transport: Arc<dyn BackendTransport>,
    reporter: Arc<dyn ProxyReporter>,
    trace_key: String,
    router_ip: String,
    retry_limit: usize,
}

impl ProxyRoundTripper {
    pub fn new(
        transport: Arc<dyn BackendTransport>,
        config: &RouterConfig,
        reporter: Arc<dyn ProxyReporter>,
    ) -> Self {
        Self {
            transport,
            reporter,
            trace_key: config.trace_key.clone(),
            router_ip: config.router_ip.clone(),
            retry_limit: config.proxy.retry_limit,
        }
    }

    /// Forwards `req` upstream. On success returns the upstream response,
    /// annotated with trace headers when the request asked for them; on
    /// failure writes the canonical 502 to the context's response writer
    /// and returns the last error.
    pub async fn round_trip(
        &self,
        mut req: Request<Bytes>,
    ) -> Result<Response<Bytes>, RouterError> {
        let pool = req
            .extensions()
            .get::<RoutePool>()
            .cloned()
            .ok_or(RouterError::ContextMissing("RoutePool"))?
            .0;
        let writer = req
            .extensions()
            .get::<ResponseWriterHandle>()
            .cloned()
            .ok_or(RouterError::ContextMissing("ProxyResponseWriter"))?;
        let access_log = req
            .extensions()
            .get::<AccessLogHandle>()
            .cloned()
            .ok_or(RouterError::ContextMissing("AccessLogRecord"))?;
        let route_service = req.extensions().get::<RouteServiceUrl>().cloned();

        match route_service {
            Some(route_service) => {
                *req.uri_mut() = route_service.0;
                self.round_trip_route_service(req, &writer, &access_log)
                    .await
            }
            None => {
                self.round_trip_backend(req, &pool, &writer, &access_log)
                    .await
            }
        }
    }

    /// Forwards the cancellation to the underlying transport.
    pub fn cancel_request(&self, req: &Request<Bytes>) {
        self.transport.cancel_request(req);
    }

    async fn round_trip_backend(
        &self,
        mut req: Request<Bytes>,
        pool: &Arc<Pool>,
        writer: &ResponseWriterHandle,
        access_log: &AccessLogHandle,
    ) -> Result<Response<Bytes>, RouterError> {
        let mut iter = pool.endpoints();
        let mut last_err: Option<io::Error> = None;

        for _ in 0..self.retry_limit {
            let Some(endpoint) = iter.next() else {
                self.write_bad_gateway(writer, access_log);
                return Err(RouterError::NoEndpointsAvailable);
            };

            if let Err(err) = retarget_request(&mut req, endpoint.canonical_addr()) {
                self.write_bad_gateway(writer, access_log);
                return Err(err);
            }
            access_log.0.lock().route_endpoint = Some(Arc::clone(&endpoint));
            self.reporter.capture_routing_request(&endpoint);

            match self.transport.round_trip(&req).await {
                Ok(mut response) => {
                    if self.trace_requested(&req) {
                        headers::set_trace_headers(
                            response.headers_mut(),
                            &self.router_ip,
                            endpoint.canonical_addr(),
                        );
                    }
                    return Ok(response);
                }
                Err(err) if retryable(&err) => {
                    error!(
                        error = %err,
                        endpoint = endpoint.canonical_addr(),
                        "backend-endpoint-failed"
                    );
                    iter.endpoint_failed(&err.to_string());
                    last_err = Some(err);
                }
                Err(err) => {
                    self.write_bad_gateway(writer, access_log);
                    return Err(RouterError::Upstream(err));
                }
            }
        }

        self.write_bad_gateway(writer, access_log);
        let err = last_err.unwrap_or_else(|| io::Error::other("retry limit exhausted"));
        Err(RouterError::EndpointFailure(err))
    }

    async fn round_trip_route_service(
        &self,
        req: Request<Bytes>,
        writer: &ResponseWriterHandle,
        access_log: &AccessLogHandle,
    ) -> Result<Response<Bytes>, RouterError> {
        let mut last_err: Option<io::Error> = None;

        for _ in 0..self.retry_limit {
            match self.transport.round_trip(&req).await {
                Ok(response) => {
                    if !response.status().is_success() {
                        info!(status_code = response.status().as_u16(), "response");
                    }
                    return Ok(response);
                }
                Err(err) if retryable(&err) => {
                    error!(
                        error = %err,
                        route_service_url = %req.uri(),
                        "route-service-connection-failed"
                    );
                    last_err = Some(err);
                }
                Err(err) => {
                    self.write_bad_gateway(writer, access_log);
                    return Err(RouterError::Upstream(err));
                }
            }
        }

        self.write_bad_gateway(writer, access_log);
        let err = last_err.unwrap_or_else(|| io::Error::other("retry limit exhausted"));
        Err(RouterError::EndpointFailure(err))
    }

    fn trace_requested(&self, req: &Request<Bytes>) -> bool {
        !self.trace_key.is_empty()
            && req
                .headers()
                .get(VCAP_TRACE_HEADER)
                .and_then(|v| v.to_str().ok())
                == Some(self.trace_key.as_str())
    }

    fn write_bad_gateway(&self, writer: &ResponseWriterHandle, access_log: &AccessLogHandle) {
        {
            let mut writer = writer.0.lock();
            writer.headers_mut().insert(
                CF_ROUTER_ERROR_HEADER,
                HeaderValue::from_static("endpoint_failure"),
            );
            writer.write_status(StatusCode::BAD_GATEWAY);
            writer.write(BAD_GATEWAY_MESSAGE.as_bytes());
        }
        access_log.0.lock().status_code = StatusCode::BAD_GATEWAY.as_u16();
        self.reporter.capture_bad_gateway();
    }
}

/// Points the request at an endpoint's canonical address, keeping the
/// original path, query, and Host header.
fn retarget_request(req: &mut Request<Bytes>, backend_addr: &str) -> Result<(), RouterError> {
    let scheme = req.uri().scheme_str().unwrap_or("http");
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = HttpUri::builder()
        .scheme(scheme)
        .authority(backend_addr)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| RouterError::InvalidAddress(format!("{backend_addr}: {e}")))?;
    *req.uri_mut() = uri;
    Ok(())
}

/// Production transport over a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &RouterConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.proxy.request_timeout)
            .connect_timeout(config.proxy.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(config.proxy.pool_max_idle_per_host)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn round_trip(&self, req: &Request<Bytes>) -> io::Result<Response<Bytes>> {
        let mut builder = self
            .client
            .request(req.method().clone(), req.uri().to_string())
            .headers(req.headers().clone());
        if !req.body().is_empty() {
            builder = builder.body(req.body().clone());
        }

        let upstream = builder.send().await.map_err(into_io_error)?;
        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await.map_err(into_io_error)?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Maps a `reqwest` error onto the `io::ErrorKind` taxonomy the retry
/// classifier understands, preserving the original error as the source.
fn into_io_error(err: reqwest::Error) -> io::Error {
    if let Some(kind) = source_io_kind(&err) {
        return io::Error::new(kind, err);
    }
    if err.is_connect() {
        return io::Error::new(io::ErrorKind::ConnectionRefused, err);
    }
    if err.is_timeout() {
        return io::Error::new(io::ErrorKind::TimedOut, err);
    }
    io::Error::other(err)
}

fn source_io_kind(err: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = inner.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    use crate::clock::{Clock, SystemClock};
    use crate::metrics::fakes::FakeReporter;
    use crate::proxy::response_writer::InMemoryResponseWriter;
    use crate::route::{Endpoint, ModificationTag};

    use super::*;

    enum Step {
        Status(StatusCode),
        DialError,
        ResetError,
        OtherError(&'static str),
    }

    /// Plays back a script of transport outcomes; the last step repeats
    /// once the script runs out.
    struct FakeTransport {
        script: Vec<Step>,
        calls: Mutex<Vec<HttpUri>>,
        cancels: AtomicUsize,
    }

    impl FakeTransport {
        fn new(script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
                cancels: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn requested_uris(&self) -> Vec<HttpUri> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl BackendTransport for FakeTransport {
        async fn round_trip(&self, req: &Request<Bytes>) -> io::Result<Response<Bytes>> {
            let idx = {
                let mut calls = self.calls.lock();
                let idx = calls.len().min(self.script.len() - 1);
                calls.push(req.uri().clone());
                idx
            };
            match &self.script[idx] {
                Step::Status(code) => {
                    let mut response = Response::new(Bytes::new());
                    *response.status_mut() = *code;
                    Ok(response)
                }
                Step::DialError => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "dial tcp: connection refused",
                )),
                Step::ResetError => Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "read: connection reset by peer",
                )),
                Step::OtherError(msg) => Err(io::Error::other(*msg)),
            }
        }

        fn cancel_request(&self, _req: &Request<Bytes>) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        round_tripper: ProxyRoundTripper,
        transport: Arc<FakeTransport>,
        reporter: Arc<FakeReporter>,
        pool: Arc<Pool>,
        writer: Arc<Mutex<InMemoryResponseWriter>>,
        access_log: AccessLogHandle,
    }

    impl Harness {
        fn new(script: Vec<Step>) -> Self {
            let mut config = RouterConfig::default();
            config.trace_key = "my-trace-key".to_string();
            config.router_ip = "127.0.0.1".to_string();

            let transport = FakeTransport::new(script);
            let reporter = Arc::new(FakeReporter::default());
            let round_tripper = ProxyRoundTripper::new(
                Arc::clone(&transport) as Arc<dyn BackendTransport>,
                &config,
                Arc::clone(&reporter) as Arc<dyn ProxyReporter>,
            );
            let pool = Arc::new(Pool::new(
                Duration::from_secs(1),
                "",
                Arc::new(SystemClock) as Arc<dyn Clock>,
            ));
            Self {
                round_tripper,
                transport,
                reporter,
                pool,
                writer: Arc::new(Mutex::new(InMemoryResponseWriter::new())),
                access_log: AccessLogHandle::new(crate::access_log::AccessLogRecord::default()),
            }
        }

        fn with_endpoint(script: Vec<Step>) -> Self {
            let harness = Self::new(script);
            harness.pool.put(endpoint("1.1.1.1", 9090));
            harness
        }

        fn request(&self) -> Request<Bytes> {
            let mut req = Request::new(Bytes::new());
            *req.uri_mut() = "http://myapp.com/".parse().unwrap();
            req.extensions_mut().insert(RoutePool(Arc::clone(&self.pool)));
            req.extensions_mut()
                .insert(ResponseWriterHandle(self.writer.clone()));
            req.extensions_mut().insert(self.access_log.clone());
            req
        }

        fn written_status(&self) -> Option<StatusCode> {
            use crate::proxy::response_writer::ProxyResponseWriter;
            self.writer.lock().status()
        }

        fn assert_bad_gateway_written(&self) {
            let writer = self.writer.lock();
            use crate::proxy::response_writer::ProxyResponseWriter;
            assert_eq!(writer.status(), Some(StatusCode::BAD_GATEWAY));
            assert_eq!(
                writer.headers().get(CF_ROUTER_ERROR_HEADER).unwrap(),
                "endpoint_failure"
            );
            assert!(writer.body_str().contains(BAD_GATEWAY_MESSAGE));
            assert_eq!(self.access_log.0.lock().status_code, 502);
        }
    }

    fn endpoint(host: &str, port: u16) -> Endpoint {
        Endpoint::new(
            "app-1",
            host,
            port,
            "instance-1",
            "0",
            HashMap::new(),
            Duration::ZERO,
            ModificationTag::default(),
        )
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }

        fn occurrences(&self, needle: &str) -> usize {
            self.contents().matches(needle).count()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (buffer, guard)
    }

    #[tokio::test]
    async fn missing_route_pool_is_an_error() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let req = Request::new(Bytes::new());

        let err = h.round_tripper.round_trip(req).await.unwrap_err();
        assert!(err.to_string().contains("RoutePool"));
    }

    #[tokio::test]
    async fn missing_response_writer_is_an_error() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let mut req = Request::new(Bytes::new());
        req.extensions_mut().insert(RoutePool(Arc::clone(&h.pool)));

        let err = h.round_tripper.round_trip(req).await.unwrap_err();
        assert!(err.to_string().contains("ProxyResponseWriter"));
    }

    #[tokio::test]
    async fn missing_access_log_record_is_an_error() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let mut req = Request::new(Bytes::new());
        req.extensions_mut().insert(RoutePool(Arc::clone(&h.pool)));
        req.extensions_mut()
            .insert(ResponseWriterHandle(h.writer.clone()));

        let err = h.round_tripper.round_trip(req).await.unwrap_err();
        assert!(err.to_string().contains("AccessLogRecord"));
    }

    #[tokio::test]
    async fn success_returns_the_backend_response_unchanged() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::IM_A_TEAPOT)]);

        let response = h.round_tripper.round_trip(h.request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(h.transport.call_count(), 1);
        assert!(h.written_status().is_none());
        assert_eq!(h.reporter.bad_gateway_count(), 0);
        assert_eq!(h.reporter.routing_requests(), vec!["1.1.1.1:9090"]);
        let record = h.access_log.0.lock();
        assert_eq!(
            record.route_endpoint.as_ref().unwrap().canonical_addr(),
            "1.1.1.1:9090"
        );
    }

    #[tokio::test]
    async fn request_is_retargeted_at_the_endpoint() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);

        h.round_tripper.round_trip(h.request()).await.unwrap();

        let uris = h.transport.requested_uris();
        assert_eq!(uris[0].authority().unwrap().as_str(), "1.1.1.1:9090");
        assert_eq!(uris[0].path(), "/");
    }

    #[tokio::test]
    async fn trace_headers_set_when_the_trace_key_matches() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let mut req = h.request();
        req.headers_mut()
            .insert(VCAP_TRACE_HEADER, HeaderValue::from_static("my-trace-key"));

        let response = h.round_tripper.round_trip(req).await.unwrap();

        assert_eq!(
            response.headers().get(headers::VCAP_ROUTER_HEADER).unwrap(),
            "127.0.0.1"
        );
        assert_eq!(
            response.headers().get(headers::VCAP_BACKEND_HEADER).unwrap(),
            "1.1.1.1:9090"
        );
        assert_eq!(
            response
                .headers()
                .get(headers::CF_ROUTE_ENDPOINT_HEADER)
                .unwrap(),
            "1.1.1.1:9090"
        );
    }

    #[tokio::test]
    async fn trace_headers_skipped_when_the_trace_key_differs() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let mut req = h.request();
        req.headers_mut().insert(
            VCAP_TRACE_HEADER,
            HeaderValue::from_static("not-my-trace-key"),
        );

        let response = h.round_tripper.round_trip(req).await.unwrap();

        assert!(response.headers().get(headers::VCAP_ROUTER_HEADER).is_none());
        assert!(response
            .headers()
            .get(headers::VCAP_BACKEND_HEADER)
            .is_none());
    }

    #[tokio::test]
    async fn dial_errors_retry_up_to_the_limit_then_502() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::DialError]);

        let err = h.round_tripper.round_trip(h.request()).await.unwrap_err();

        assert!(matches!(err, RouterError::EndpointFailure(_)));
        assert_eq!(h.transport.call_count(), 3);
        h.assert_bad_gateway_written();
        assert_eq!(h.reporter.bad_gateway_count(), 1);
        assert_eq!(
            h.reporter.routing_requests(),
            vec!["1.1.1.1:9090", "1.1.1.1:9090", "1.1.1.1:9090"]
        );
        let record = h.access_log.0.lock();
        assert_eq!(
            record.route_endpoint.as_ref().unwrap().canonical_addr(),
            "1.1.1.1:9090"
        );
        drop(record);
        assert_eq!(logs.occurrences("backend-endpoint-failed"), 3);
        assert_eq!(logs.occurrences("route-service"), 0);
    }

    #[tokio::test]
    async fn connection_resets_retry_up_to_the_limit_then_502() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::ResetError]);

        let err = h.round_tripper.round_trip(h.request()).await.unwrap_err();

        assert!(matches!(err, RouterError::EndpointFailure(_)));
        assert_eq!(h.transport.call_count(), 3);
        h.assert_bad_gateway_written();
        assert_eq!(h.reporter.bad_gateway_count(), 1);
        assert_eq!(logs.occurrences("backend-endpoint-failed"), 3);
        assert!(logs.contents().contains("connection reset"));
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_after_one_attempt() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::OtherError("boom")]);

        let err = h.round_tripper.round_trip(h.request()).await.unwrap_err();

        match err {
            RouterError::Upstream(source) => assert_eq!(source.to_string(), "boom"),
            other => panic!("expected Upstream error, got {other:?}"),
        }
        assert_eq!(h.transport.call_count(), 1);
        h.assert_bad_gateway_written();
        assert_eq!(h.reporter.bad_gateway_count(), 1);
        assert_eq!(h.reporter.routing_requests().len(), 1);
        assert_eq!(logs.occurrences("backend-endpoint-failed"), 0);
        assert_eq!(logs.occurrences("route-service"), 0);
    }

    #[tokio::test]
    async fn empty_pool_yields_no_endpoints_available() {
        let h = Harness::new(vec![Step::Status(StatusCode::OK)]);

        let err = h.round_tripper.round_trip(h.request()).await.unwrap_err();

        assert!(matches!(err, RouterError::NoEndpointsAvailable));
        assert_eq!(h.transport.call_count(), 0);
        h.assert_bad_gateway_written();
        assert_eq!(h.reporter.bad_gateway_count(), 1);
        assert!(h.reporter.routing_requests().is_empty());
        assert!(h.access_log.0.lock().route_endpoint.is_none());
    }

    #[tokio::test]
    async fn one_failure_then_success_stops_retrying() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::DialError, Step::Status(StatusCode::OK)]);

        let response = h.round_tripper.round_trip(h.request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.transport.call_count(), 2);
        assert_eq!(h.reporter.bad_gateway_count(), 0);
        assert_eq!(h.reporter.routing_requests().len(), 2);
        assert_eq!(logs.occurrences("backend-endpoint-failed"), 1);
        let record = h.access_log.0.lock();
        assert!(record.route_endpoint.is_some());
    }

    #[tokio::test]
    async fn retries_prefer_distinct_endpoints() {
        let h = Harness::new(vec![Step::DialError]);
        h.pool.put(endpoint("1.1.1.1", 1));
        h.pool.put(endpoint("2.2.2.2", 2));

        let _ = h.round_tripper.round_trip(h.request()).await;

        let authorities: Vec<String> = h
            .transport
            .requested_uris()
            .iter()
            .map(|u| u.authority().unwrap().to_string())
            .collect();
        assert_eq!(authorities.len(), 3);
        assert_ne!(authorities[0], authorities[1]);
    }

    #[tokio::test]
    async fn route_service_requests_go_to_the_route_service() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let route_service_uri: HttpUri = "https://rs.example.com/forward".parse().unwrap();
        let mut req = h.request();
        req.extensions_mut()
            .insert(RouteServiceUrl(route_service_uri.clone()));

        let response = h.round_tripper.round_trip(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.transport.requested_uris(), vec![route_service_uri]);
        // The pool is never consulted for route-service requests.
        assert!(h.reporter.routing_requests().is_empty());
    }

    #[tokio::test]
    async fn route_service_non_2xx_is_logged_and_returned_unchanged() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::IM_A_TEAPOT)]);
        let mut req = h.request();
        req.extensions_mut()
            .insert(RouteServiceUrl("https://rs.example.com/".parse().unwrap()));

        let response = h.round_tripper.round_trip(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(logs.occurrences("response"), 1);
        assert_eq!(logs.occurrences("status_code=418"), 1);
    }

    #[tokio::test]
    async fn route_service_dial_errors_retry_then_502() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::DialError]);
        let mut req = h.request();
        req.extensions_mut()
            .insert(RouteServiceUrl("https://rs.example.com/".parse().unwrap()));

        let err = h.round_tripper.round_trip(req).await.unwrap_err();

        assert!(matches!(err, RouterError::EndpointFailure(_)));
        assert_eq!(h.transport.call_count(), 3);
        h.assert_bad_gateway_written();
        assert_eq!(h.reporter.bad_gateway_count(), 1);
        assert_eq!(logs.occurrences("route-service-connection-failed"), 3);
        assert_eq!(logs.occurrences("backend-endpoint-failed"), 0);
    }

    #[tokio::test]
    async fn route_service_non_retryable_errors_fail_fast() {
        let (logs, _guard) = capture_logs();
        let h = Harness::with_endpoint(vec![Step::OtherError("boom")]);
        let mut req = h.request();
        req.extensions_mut()
            .insert(RouteServiceUrl("https://rs.example.com/".parse().unwrap()));

        let err = h.round_tripper.round_trip(req).await.unwrap_err();

        assert!(matches!(err, RouterError::Upstream(_)));
        assert_eq!(h.transport.call_count(), 1);
        h.assert_bad_gateway_written();
        assert_eq!(logs.occurrences("route-service-connection-failed"), 0);
    }

    #[tokio::test]
    async fn cancel_is_forwarded_to_the_transport() {
        let h = Harness::with_endpoint(vec![Step::Status(StatusCode::OK)]);
        let req = h.request();

        h.round_tripper.cancel_request(&req);

        assert_eq!(h.transport.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_classification_covers_the_named_kinds() {
        assert!(retryable(&io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "dial"
        )));
        assert!(retryable(&io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset"
        )));
        assert!(retryable(&io::Error::new(
            io::ErrorKind::HostUnreachable,
            "unreachable"
        )));
        assert!(!retryable(&io::Error::other("boom")));
        assert!(!retryable(&io::Error::new(
            io::ErrorKind::Interrupted,
            "canceled"
        )));
    }
}
