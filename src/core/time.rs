//! Timestamp, event-id and verb envelope helpers.

use crate::core::error::LodestarError;
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_secs())
}

pub fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parses the `1771220592Z` form back into seconds.
pub fn parse_epoch_z(ts: &str) -> Option<u64> {
    ts.trim_end_matches('Z').parse().ok()
}

/// Short relative age such as `just now`, `5m ago`, `2h ago`, `3d ago`.
pub fn relative_age(ts: &str, now: u64) -> String {
    let Some(then) = parse_epoch_z(ts) else {
        return "?".to_string();
    };
    let delta = now.saturating_sub(then);
    match delta {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", delta / 60),
        3600..86400 => format!("{}h ago", delta / 3600),
        _ => format!("{}d ago", delta / 86400),
    }
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Standard verb response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_epoch_z(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}

/// Failure envelope: closed error kind, human detail, kind-specific payload.
pub fn error_envelope(cmd: &str, err: &LodestarError) -> JsonValue {
    command_envelope(
        cmd,
        "error",
        serde_json::json!({
            "kind": err.kind(),
            "detail": err.to_string(),
            "payload": err.details(),
        }),
    )
}
