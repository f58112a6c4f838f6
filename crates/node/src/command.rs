use serde::Deserialize;

// ---------------------------------------------------------------------------
// Remote command
// ---------------------------------------------------------------------------

/// Risk command published by the hub on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    High,
    Normal,
    Clear,
}

impl RemoteCommand {
    /// Value the command assigns to the remote risk flag.
    pub fn remote_flag(self) -> bool {
        matches!(self, Self::High)
    }
}

#[derive(Debug, Deserialize)]
struct CommandMsg {
    system_risk: String,
}

/// Markers scanned for when the payload is not clean JSON.  Checked in order.
const MARKERS: [(&str, RemoteCommand); 3] = [
    ("\"system_risk\":\"high\"", RemoteCommand::High),
    ("\"system_risk\":\"normal\"", RemoteCommand::Normal),
    ("\"system_risk\":\"clear\"", RemoteCommand::Clear),
];

fn from_word(word: &str) -> Option<RemoteCommand> {
    match word.trim().to_ascii_lowercase().as_str() {
        "high" => Some(RemoteCommand::High),
        "normal" => Some(RemoteCommand::Normal),
        "clear" => Some(RemoteCommand::Clear),
        _ => None,
    }
}

/// Parse a command payload, case-insensitively.
///
/// Accepts `{"system_risk": "<high|normal|clear>"}` (any whitespace, extra
/// fields allowed), payloads containing that pair in otherwise broken JSON,
/// and a bare `high` / `normal` / `clear`.  Anything else is an error and
/// must leave the remote flag untouched.
pub fn parse_command(payload: &[u8]) -> Result<RemoteCommand, String> {
    if let Ok(msg) = serde_json::from_slice::<CommandMsg>(payload) {
        return from_word(&msg.system_risk)
            .ok_or_else(|| format!("unknown system_risk '{}'", msg.system_risk));
    }

    let text = String::from_utf8_lossy(payload);
    if let Some(cmd) = from_word(&text) {
        return Ok(cmd);
    }

    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    MARKERS
        .iter()
        .find(|(marker, _)| compact.contains(marker))
        .map(|&(_, cmd)| cmd)
        .ok_or_else(|| format!("unrecognised command '{}'", text.trim()))
}

// ===========================================================================
// Tests
// ===========================================================================
