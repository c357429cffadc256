use http::header::{HeaderMap, HeaderValue};

pub const VCAP_TRACE_HEADER: &str = "X-Vcap-Trace";
pub const VCAP_ROUTER_HEADER: &str = "X-Vcap-Router";
pub const VCAP_BACKEND_HEADER: &str = "X-Vcap-Backend";
pub const CF_ROUTE_ENDPOINT_HEADER: &str = "X-Cf-RouteEndpoint";
pub const CF_ROUTER_ERROR_HEADER: &str = "X-Cf-RouterError";

/// Stamps the router/backend trace headers on a response. Values that do
/// not form valid header text are skipped rather than failing the
/// response.
pub fn set_trace_headers(headers: &mut HeaderMap, router_ip: &str, backend_addr: &str) {
    if let Ok(value) = HeaderValue::from_str(router_ip) {
        headers.insert(VCAP_ROUTER_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(backend_addr) {
        headers.insert(VCAP_BACKEND_HEADER, value.clone());
        headers.insert(CF_ROUTE_ENDPOINT_HEADER, value);
    }
}
