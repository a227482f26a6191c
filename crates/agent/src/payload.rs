//! Initialization-payload and environment parsing.
//!
//! The host injects the agent with a small text payload like
//! `host_pid=1234;session_id=89abcdef`. Keys `pid`/`sid` are accepted as
//! aliases; separators `;`, `,`, newlines and tabs are interchangeable;
//! values may be decimal or hex (with or without `0x`). When the payload
//! leaves either value unset, the `ADA_SHM_HOST_PID` (decimal) and
//! `ADA_SHM_SESSION_ID` (hex or decimal) environment variables fill in.

/// Parses a decimal or `0x`-prefixed value.
fn parse_u32_auto(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    value.parse().ok()
}

/// Parses a session id: `0x` hex, bare hex when any `[a-f]` digit appears,
/// decimal otherwise.
fn parse_session_id(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    let looks_hex = value.bytes().any(|b| b.is_ascii_alphabetic());
    if looks_hex {
        u32::from_str_radix(value, 16).ok()
    } else {
        value.parse().ok()
    }
}

/// Values recovered from an initialization payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitPayload {
    pub host_pid: Option<u32>,
    pub session_id: Option<u32>,
}

/// Parses the injected payload text. Unknown keys are ignored; malformed
/// values leave the field unset.
pub fn parse_init_payload(data: &str) -> InitPayload {
    let mut out = InitPayload::default();

    for token in data.split([';', ',', '\n', '\r', '\t', ' ']) {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match key {
            "host_pid" | "pid" => out.host_pid = parse_u32_auto(value).or(out.host_pid),
            "session_id" | "sid" => out.session_id = parse_session_id(value).or(out.session_id),
            _ => {}
        }
    }
    out
}

/// Session parameters after applying environment fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub host_pid: u32,
    pub session_id: u32,
}

/// Resolves `(host_pid, session_id)` from the payload, falling back to the
/// `ADA_SHM_*` environment. Returns `None` when either value stays
/// unresolved - the agent must then degrade to a no-op.
pub fn resolve_session_params(payload: Option<&str>) -> Option<SessionParams> {
    let parsed = payload.map(parse_init_payload).unwrap_or_default();

    let host_pid = parsed.host_pid.or_else(|| {
        std::env::var("ADA_SHM_HOST_PID")
            .ok()
            .and_then(|v| v.parse().ok())
    });
    let session_id = parsed.session_id.or_else(|| {
        std::env::var("ADA_SHM_SESSION_ID")
            .ok()
            .and_then(|v| parse_session_id(&v))
    });

    match (host_pid, session_id) {
        (Some(host_pid), Some(session_id)) => Some(SessionParams {
            host_pid,
            session_id,
        }),
        _ => {
            log::debug!(
                "session params unresolved (pid={host_pid:?}, sid={session_id:?}); agent degrades"
            );
            None
        }
    }
}

/// Workspace root for locating test fixtures (`ADA_WORKSPACE_ROOT`).
pub fn workspace_root() -> Option<std::path::PathBuf> {
    std::env::var_os("ADA_WORKSPACE_ROOT").map(std::path::PathBuf::from)
}

/// Build profile fixtures were produced under (`ADA_BUILD_PROFILE`),
/// defaulting to `debug`.
pub fn build_profile() -> String {
    std::env::var("ADA_BUILD_PROFILE").unwrap_or_else(|_| "debug".to_string())
}
