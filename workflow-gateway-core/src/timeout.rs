//! Deadline header parsing.
//!
//! Callers bound a request with either `connect-timeout-ms` (milliseconds) or
//! `grpc-timeout` (value plus unit suffix). The smaller of the caller's and the
//! server's timeout always wins.

use std::time::Duration;

use http::HeaderMap;

/// Header name for the timeout in milliseconds.
pub const CONNECT_TIMEOUT_MS_HEADER: &str = "connect-timeout-ms";

/// Header name for the gRPC-style timeout.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parse a timeout milliseconds string.
///
/// Returns `None` for invalid values or 0, which means no timeout.
pub fn parse_timeout_ms(value: &str) -> Option<Duration> {
    let ms: u64 = value.parse().ok()?;
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Parse a `grpc-timeout` value such as `250m` or `3S`.
///
/// Units: `H` hours, `M` minutes, `S` seconds, `m` milliseconds,
/// `u` microseconds, `n` nanoseconds. At most 8 digits are accepted.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    if duration.is_zero() {
        None
    } else {
        Some(duration)
    }
}

/// Caller timeout from request headers. `connect-timeout-ms` takes precedence.
pub fn timeout_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    header(CONNECT_TIMEOUT_MS_HEADER)
        .and_then(parse_timeout_ms)
        .or_else(|| header(GRPC_TIMEOUT_HEADER).and_then(parse_grpc_timeout))
}

/// Compute the effective timeout from server and client timeouts.
///
/// Returns `None` if neither timeout is set (unlimited).
pub fn compute_effective_timeout(
    server_timeout: Option<Duration>,
    client_timeout: Option<Duration>,
) -> Option<Duration> {
    match (server_timeout, client_timeout) {
        (Some(server), Some(client)) => Some(server.min(client)),
        (Some(server), None) => Some(server),
        (None, Some(client)) => Some(client),
        (None, None) => None,
    }
}
