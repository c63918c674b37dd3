//! Key names and characters to [`rdev::Key`] codes (US layout)

use rdev::Key;

use crate::errors::ActionError;

/// Resolve a key name as used in scripts (`"enter"`, `"ctrl"`, `"f5"`, `"a"`).
/// Matching is case-insensitive.
pub fn key_from_name(name: &str) -> Result<Key, ActionError> {
    let normalized = name.trim().to_ascii_lowercase();
    let key = match normalized.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "space" | "spacebar" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "insert" | "ins" => Key::Insert,
        "esc" | "escape" => Key::Escape,
        "shift" | "shiftleft" => Key::ShiftLeft,
        "shiftright" => Key::ShiftRight,
        "ctrl" | "control" | "ctrlleft" => Key::ControlLeft,
        "ctrlright" => Key::ControlRight,
        "alt" | "altleft" | "option" => Key::Alt,
        "altright" | "altgr" => Key::AltGr,
        "win" | "winleft" | "command" | "cmd" | "super" | "meta" => Key::MetaLeft,
        "winright" => Key::MetaRight,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "capslock" => Key::CapsLock,
        "numlock" => Key::NumLock,
        "scrolllock" => Key::ScrollLock,
        "printscreen" | "prtsc" | "prntscrn" => Key::PrintScreen,
        "pause" => Key::Pause,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => match char_to_keystroke(c) {
                    Some((key, _)) => key,
                    None => return Err(ActionError::UnknownKey(name.to_string())),
                },
                _ => return Err(ActionError::UnknownKey(name.to_string())),
            }
        }
    };
    Ok(key)
}

/// Map a character to the key that produces it and whether shift must be held.
/// Returns `None` for characters with no key on a US layout.
pub fn char_to_keystroke(c: char) -> Option<(Key, bool)> {
    if c.is_ascii_alphabetic() {
        let key = letter_key(c.to_ascii_lowercase())?;
        return Some((key, c.is_ascii_uppercase()));
    }
    let stroke = match c {
        '1' => (Key::Num1, false),
        '2' => (Key::Num2, false),
        '3' => (Key::Num3, false),
        '4' => (Key::Num4, false),
        '5' => (Key::Num5, false),
        '6' => (Key::Num6, false),
        '7' => (Key::Num7, false),
        '8' => (Key::Num8, false),
        '9' => (Key::Num9, false),
        '0' => (Key::Num0, false),
        '!' => (Key::Num1, true),
        '@' => (Key::Num2, true),
        '#' => (Key::Num3, true),
        '$' => (Key::Num4, true),
        '%' => (Key::Num5, true),
        '^' => (Key::Num6, true),
        '&' => (Key::Num7, true),
        '*' => (Key::Num8, true),
        '(' => (Key::Num9, true),
        ')' => (Key::Num0, true),
        ' ' => (Key::Space, false),
        '\n' => (Key::Return, false),
        '\t' => (Key::Tab, false),
        '-' => (Key::Minus, false),
        '_' => (Key::Minus, true),
        '=' => (Key::Equal, false),
        '+' => (Key::Equal, true),
        '[' => (Key::LeftBracket, false),
        '{' => (Key::LeftBracket, true),
        ']' => (Key::RightBracket, false),
        '}' => (Key::RightBracket, true),
        ';' => (Key::SemiColon, false),
        ':' => (Key::SemiColon, true),
        '\'' => (Key::Quote, false),
        '"' => (Key::Quote, true),
        '\\' => (Key::BackSlash, false),
        '|' => (Key::BackSlash, true),
        ',' => (Key::Comma, false),
        '<' => (Key::Comma, true),
        '.' => (Key::Dot, false),
        '>' => (Key::Dot, true),
        '/' => (Key::Slash, false),
        '?' => (Key::Slash, true),
        '`' => (Key::BackQuote, false),
        '~' => (Key::BackQuote, true),
        _ => return None,
    };
    Some(stroke)
}

fn letter_key(c: char) -> Option<Key> {
    let key = match c {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        _ => return None,
    };
    Some(key)
}
