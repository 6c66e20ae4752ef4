// Android KeyEvent names used by TV remotes, mapped to their numeric codes.
// `input keyevent` accepts both forms; the wire transport always sends numbers.
use super::error::{RemoteError, RemoteResult};

const KEYCODES: &[(&str, u32)] = &[
    ("KEYCODE_HOME", 3),
    ("KEYCODE_BACK", 4),
    ("KEYCODE_DPAD_UP", 19),
    ("KEYCODE_DPAD_DOWN", 20),
    ("KEYCODE_DPAD_LEFT", 21),
    ("KEYCODE_DPAD_RIGHT", 22),
    ("KEYCODE_DPAD_CENTER", 23),
    ("KEYCODE_VOLUME_UP", 24),
    ("KEYCODE_VOLUME_DOWN", 25),
    ("KEYCODE_POWER", 26),
    ("KEYCODE_TAB", 61),
    ("KEYCODE_SPACE", 62),
    ("KEYCODE_ENTER", 66),
    ("KEYCODE_DEL", 67),
    ("KEYCODE_MENU", 82),
    ("KEYCODE_NOTIFICATION", 83),
    ("KEYCODE_SEARCH", 84),
    ("KEYCODE_MEDIA_PLAY_PAUSE", 85),
    ("KEYCODE_MEDIA_STOP", 86),
    ("KEYCODE_MEDIA_NEXT", 87),
    ("KEYCODE_MEDIA_PREVIOUS", 88),
    ("KEYCODE_MEDIA_REWIND", 89),
    ("KEYCODE_MEDIA_FAST_FORWARD", 90),
    ("KEYCODE_MUTE", 91),
    ("KEYCODE_ESCAPE", 111),
    ("KEYCODE_FORWARD_DEL", 112),
    ("KEYCODE_MEDIA_PLAY", 126),
    ("KEYCODE_MEDIA_PAUSE", 127),
    ("KEYCODE_VOLUME_MUTE", 164),
    ("KEYCODE_INFO", 165),
    ("KEYCODE_CHANNEL_UP", 166),
    ("KEYCODE_CHANNEL_DOWN", 167),
    ("KEYCODE_TV", 170),
    ("KEYCODE_GUIDE", 172),
    ("KEYCODE_SETTINGS", 176),
    ("KEYCODE_TV_INPUT", 178),
    ("KEYCODE_APP_SWITCH", 187),
    ("KEYCODE_ASSIST", 219),
    ("KEYCODE_SLEEP", 223),
    ("KEYCODE_WAKEUP", 224),
];

pub fn keycode_number(name: &str) -> Option<u32> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("KEYCODE_") {
        upper
    } else {
        format!("KEYCODE_{upper}")
    };
    KEYCODES
        .iter()
        .find(|(key, _)| *key == full)
        .map(|&(_, code)| code)
}

/// Argument for `input keyevent`: the numeric code when the name is known,
/// otherwise the input unchanged (already numeric, or a name this table lacks).
/// Anything but letters, digits and `_` is rejected; it ends up in a shell line.
pub fn resolve_keycode(code: &str) -> RemoteResult<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RemoteError::InvalidArgument {
            what: "key code",
            value: code.to_string(),
        });
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Ok(trimmed.to_string());
    }
    Ok(keycode_number(trimmed)
        .map(|n| n.to_string())
        .unwrap_or_else(|| trimmed.to_string()))
}
