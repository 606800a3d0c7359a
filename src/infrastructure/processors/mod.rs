//! Card processor adapters. Each one translates its gateway's vocabulary into
//! [`GatewayStatus`](crate::domain::ports::GatewayStatus) and
//! [`GatewayError`](crate::error::GatewayError) at the boundary.

pub mod chase;
pub mod sandbox;
pub mod stripe;

use crate::error::GatewayError;
use reqwest::StatusCode;
use std::time::Duration;

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Transport failures never say whether the gateway acted, so none of them are rejections.
pub(crate) fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_connect() || err.is_request() {
        GatewayError::Unavailable(err.to_string())
    } else if err.is_decode() {
        GatewayError::InvalidResponse(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// HTTP status of a failed gateway call, with the gateway's own code and message.
pub(crate) fn status_error(status: StatusCode, code: String, message: String) -> GatewayError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Unavailable(format!("{}: {}", status, message))
    } else {
        GatewayError::Rejected { code, message }
    }
}
