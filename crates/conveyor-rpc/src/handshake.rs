//! First-contact validation between host and plugin process.
//!
//! Two checks, both of which fail closed:
//!
//! 1. The host exports a magic cookie into the child environment. A real
//!    plugin refuses to serve without it — this stops a plugin binary from
//!    being run by hand against a terminal.
//! 2. The child's first stdout line must be a greeting carrying the
//!    protocol version and the cookie value. The host validates it under a
//!    deadline — this stops an arbitrary executable in the plugin
//!    directory from being treated as a plugin.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use conveyor_core::HandshakeError;

/// Version of the wire protocol. Any mismatch aborts the child.
pub const PROTOCOL_VERSION: u32 = 2;

/// Environment variable the host sets on every plugin child.
pub const MAGIC_COOKIE_KEY: &str = "CONVEYOR_PLUGIN_COOKIE";

/// Expected value of [`MAGIC_COOKIE_KEY`]. The value is not a secret; it
/// only proves both sides were built against the same contract.
pub const MAGIC_COOKIE_VALUE: &str = "9d2f6c41e07b8a53ccf0421d9e6baf70";

#[derive(Debug, Serialize, Deserialize)]
struct GreetingFrame {
    conveyor: Greeting,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Greeting {
    protocol_version: u32,
    cookie: String,
}

/// Child side: verifies the magic cookie is present in the environment.
pub fn verify_cookie_env() -> Result<(), HandshakeError> {
    match std::env::var(MAGIC_COOKIE_KEY) {
        Ok(value) if value == MAGIC_COOKIE_VALUE => Ok(()),
        Ok(_) => Err(HandshakeError::CookieMismatch),
        Err(_) => Err(HandshakeError::MissingCookie {
            key: MAGIC_COOKIE_KEY,
        }),
    }
}

/// Child side: the single greeting line written before serving, newline
/// included.
pub fn greeting_line() -> String {
    let frame = GreetingFrame {
        conveyor: Greeting {
            protocol_version: PROTOCOL_VERSION,
            cookie: MAGIC_COOKIE_VALUE.to_string(),
        },
    };
    // Serialisation of a two-field struct of plain types cannot fail.
    let mut line = serde_json::to_string(&frame).unwrap_or_default();
    line.push('\n');
    line
}

/// Host side: reads and validates the greeting under `deadline`.
///
/// Anything other than a well-formed greeting with the exact protocol
/// version and cookie is a [`HandshakeError`]; the caller kills the child.
pub async fn read_greeting<R>(reader: &mut R, deadline: Duration) -> Result<(), HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = tokio::time::timeout(deadline, reader.read_line(&mut line))
        .await
        .map_err(|_| HandshakeError::Timeout(deadline))?;

    match read {
        Ok(0) => return Err(HandshakeError::ChannelClosed),
        Ok(_) => {}
        Err(err) => return Err(HandshakeError::Malformed(err.to_string())),
    }

    let frame: GreetingFrame = serde_json::from_str(line.trim_end())
        .map_err(|_| HandshakeError::Malformed(preview(&line)))?;

    if frame.conveyor.protocol_version != PROTOCOL_VERSION {
        return Err(HandshakeError::ProtocolMismatch {
            expected: PROTOCOL_VERSION,
            got: frame.conveyor.protocol_version,
        });
    }
    if frame.conveyor.cookie != MAGIC_COOKIE_VALUE {
        return Err(HandshakeError::CookieMismatch);
    }
    Ok(())
}

/// Truncated copy of a rejected first line, safe to put in an error.
fn preview(line: &str) -> String {
    const MAX: usize = 120;
    let trimmed = line.trim_end();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let cut = trimmed
            .char_indices()
            .take_while(|(i, _)| *i < MAX)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &trimmed[..cut])
    }
}
