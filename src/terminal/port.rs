//! Narrow interfaces to the terminal window, its process and the clipboard.
//!
//! The driver only ever talks to these traits; the X11 implementation lives in
//! `desktop_bridge` and tests use the fakes in `testing`.

use anyhow::Result;

/// A key the driver can inject into the terminal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Escape,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    /// Function key F1 through F12.
    F(u8),
    Ctrl(char),
    Alt(char),
}

impl Key {
    /// Short human-readable form used in logs and key recordings.
    pub fn describe(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Enter => "<Enter>".into(),
            Key::Tab => "<Tab>".into(),
            Key::Escape => "<Esc>".into(),
            Key::Backspace => "<BS>".into(),
            Key::Up => "<Up>".into(),
            Key::Down => "<Down>".into(),
            Key::Left => "<Left>".into(),
            Key::Right => "<Right>".into(),
            Key::Home => "<Home>".into(),
            Key::End => "<End>".into(),
            Key::F(n) => format!("<F{n}>"),
            Key::Ctrl(c) => format!("<C-{c}>"),
            Key::Alt(c) => format!("<A-{c}>"),
        }
    }
}

/// Expand a string into one [`Key::Char`] per character.
pub fn text_keys(text: &str) -> Vec<Key> {
    text.chars().map(Key::Char).collect()
}

pub fn describe_keys(keys: &[Key]) -> String {
    keys.iter().map(Key::describe).collect()
}

pub trait TerminalPort: Send + Sync {
    fn send_keys(&self, keys: &[Key]) -> Result<()>;
    fn is_window_visible(&self) -> bool;
    fn bring_to_front(&self) -> Result<()>;

    /// Block or release local keyboard input while a script runs.
    fn set_input_blocked(&self, _blocked: bool) {}
}

pub trait TerminalProcess: Send + Sync {
    fn is_alive(&self) -> bool;
    fn launch(&self) -> Result<()>;
    fn terminate(&self) -> Result<()>;
}

pub trait ClipboardPort: Send + Sync {
    fn read_text(&self) -> Result<Option<String>>;
    fn write_text(&self, text: &str) -> Result<()>;
}
