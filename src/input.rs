// ============================================================================
// input.rs — Linestream
// Held navigation keys plus the mapping from key presses to viewer commands.
// ============================================================================

use winit::keyboard::{Key, NamedKey};

/// Navigation keys currently held down.
#[derive(Default)]
pub struct KeysHeld {
    pub w: bool,
    pub s: bool,
    pub a: bool,
    pub d: bool,
    pub q: bool,
    pub e: bool,
}

impl KeysHeld {
    /// Record press/release of a navigation key. Returns false for other keys.
    pub fn track(&mut self, key: &Key, pressed: bool) -> bool {
        let Key::Character(c) = key else {
            return false;
        };
        let slot = match c.to_ascii_lowercase().as_str() {
            "w" => &mut self.w,
            "s" => &mut self.s,
            "a" => &mut self.a,
            "d" => &mut self.d,
            "q" => &mut self.q,
            "e" => &mut self.e,
            _ => return false,
        };
        *slot = pressed;
        true
    }
}

/// One-shot actions bound to key presses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Quit,
    TogglePlay,
    Reset,
    Reseed,
    ToggleDebug,
    ToggleHud,
    Screenshot,
}

pub fn command_for(key: &Key, shift: bool) -> Option<Command> {
    match key {
        Key::Named(NamedKey::Escape) => Some(Command::Quit),
        Key::Named(NamedKey::Space) => Some(Command::TogglePlay),
        Key::Named(NamedKey::F3) => Some(Command::ToggleDebug),
        Key::Named(NamedKey::F12) => Some(Command::Screenshot),
        Key::Character(c) => match c.to_ascii_lowercase().as_str() {
            "r" if shift => Some(Command::Reseed),
            "r" => Some(Command::Reset),
            "h" => Some(Command::ToggleHud),
            _ => None,
        },
        _ => None,
    }
}
