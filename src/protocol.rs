//! Wire names shared by the control channel and request redirection

/// Recording id issued on start, echoed on stop and on every redirected request
pub const RECORDING_ID: &str = "x-recording-id";

/// Mode of a redirected request
pub const RECORDING_MODE: &str = "x-recording-mode";

/// Original request URL truncated before its final path segment
pub const UPSTREAM_BASE_URI: &str = "x-recording-upstream-base-uri";

/// Save directive sent on stop
pub const RECORDING_SAVE: &str = "x-recording-save";

/// JSON key naming the recording file in the start body
pub const RECORDING_FILE: &str = "x-recording-file";

/// Content type forced onto every redirected request
pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";
