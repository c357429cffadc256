//! The proxying side of the router: request-context plumbing, trace and
//! error headers, and the retrying round tripper.

pub mod headers;
pub mod response_writer;
pub mod round_tripper;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::access_log::AccessLogRecord;
use crate::route::Pool;

use response_writer::ProxyResponseWriter;

pub use round_tripper::{BackendTransport, HttpTransport, ProxyRoundTripper, BAD_GATEWAY_MESSAGE};

/// Request extension: the pool the route-lookup handler resolved for this
/// request. Required by the round tripper.
#[derive(Clone)]
pub struct RoutePool(pub Arc<Pool>);

/// Request extension: where the round tripper writes an error response
/// when no usable upstream response materializes. Required.
#[derive(Clone)]
pub struct ResponseWriterHandle(pub Arc<Mutex<dyn ProxyResponseWriter>>);

impl ResponseWriterHandle {
    pub fn new<W: ProxyResponseWriter + 'static>(writer: W) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }
}

/// Request extension: the access-log record stamped with the final status
/// and selected endpoint. Required.
#[derive(Clone)]
pub struct AccessLogHandle(pub Arc<Mutex<AccessLogRecord>>);

impl AccessLogHandle {
    pub fn new(record: AccessLogRecord) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }
}

/// Request extension: when present, the request is sent to this route
/// service instead of iterating the pool.
#[derive(Clone)]
pub struct RouteServiceUrl(pub http::Uri);
