//! Error classification for remote responses

/// Map an HTTP status to a coarse error class.
pub(crate) fn class_for_status(status: u16) -> &'static str {
    match status {
        400 => "invalid_request",
        401 => "authentication",
        403 => "permission_denied",
        404 => "not_found",
        409 => "conflict",
        413 => "request_too_large",
        429 => "rate_limited",
        503 => "overloaded",
        504 => "timeout",
        500..=599 => "server_error",
        _ => "http_error",
    }
}

/// Map a canonical RPC status string (as returned in Google-style error bodies).
pub(crate) fn remote_status_class(status: &str) -> Option<&'static str> {
    let class = match status {
        "ALREADY_EXISTS" => "already_exists",
        "ABORTED" => "conflict",
        "FAILED_PRECONDITION" => "failed_precondition",
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => "invalid_request",
        "NOT_FOUND" => "not_found",
        "PERMISSION_DENIED" => "permission_denied",
        "UNAUTHENTICATED" => "authentication",
        "RESOURCE_EXHAUSTED" => "rate_limited",
        "UNAVAILABLE" => "overloaded",
        "DEADLINE_EXCEEDED" => "timeout",
        "INTERNAL" | "UNKNOWN" | "DATA_LOSS" => "server_error",
        _ => return None,
    };
    Some(class)
}

/// Conflict classes. Whether a conflict means the requested state already
/// holds depends on the call, so only adapters decide that.
pub(crate) fn is_conflict_class(class: &str) -> bool {
    matches!(class, "already_exists" | "conflict")
}
