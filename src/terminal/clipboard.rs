use std::{sync::Arc, time::Duration};

use log::{debug, warn};
use tokio::time::sleep;

use super::port::{ClipboardPort, Key, TerminalPort};

/// Select-screen then copy, in the emulator's Edit menu.
pub const COPY_SCREEN_KEYS: [Key; 3] = [Key::Alt('e'), Key::Char('s'), Key::Alt('c')];

/// Pulls the terminal's text through the OS clipboard, putting back whatever
/// the user had copied before.
#[derive(Clone)]
pub struct ClipboardTransfer {
    clipboard: Arc<dyn ClipboardPort>,
    poll: Duration,
    attempts: u32,
}

impl ClipboardTransfer {
    pub fn new(clipboard: Arc<dyn ClipboardPort>) -> Self {
        Self {
            clipboard,
            poll: Duration::from_millis(100),
            attempts: 10,
        }
    }

    pub fn with_polling(mut self, poll: Duration, attempts: u32) -> Self {
        self.poll = poll;
        self.attempts = attempts.max(1);
        self
    }

    /// Best effort: any failure yields `None`. The prior contents are put back
    /// afterwards; when they could not be read the clipboard is left alone.
    pub async fn copy_from(&self, port: &dyn TerminalPort) -> Option<String> {
        let saved = match self.clipboard.read_text() {
            Ok(saved) => Some(saved.unwrap_or_default()),
            Err(err) => {
                debug!("could not read clipboard before copy: {err:#}");
                None
            }
        };

        let copied = self.copy_inner(port).await;

        match saved {
            Some(previous) => {
                if let Err(err) = self.clipboard.write_text(&previous) {
                    warn!("failed to restore clipboard contents: {err:#}");
                }
            }
            None => debug!("prior clipboard unknown; not restoring"),
        }

        copied
    }

    async fn copy_inner(&self, port: &dyn TerminalPort) -> Option<String> {
        if let Err(err) = self.clipboard.write_text("") {
            debug!("could not clear clipboard: {err:#}");
        }
        if let Err(err) = port.send_keys(&COPY_SCREEN_KEYS) {
            warn!("copy-screen keystrokes failed: {err:#}");
            return None;
        }

        for _ in 0..self.attempts {
            sleep(self.poll).await;
            match self.clipboard.read_text() {
                Ok(Some(text)) if !text.trim().is_empty() => return Some(text),
                Ok(_) => {}
                Err(err) => {
                    debug!("clipboard read failed while waiting for copy: {err:#}");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClipboard, FakeTerminal};

    #[tokio::test]
    async fn restores_previous_contents() {
        let terminal = FakeTerminal::new("MAIN MENU");
        let clipboard = Arc::new(FakeClipboard::with_text("user data"));
        clipboard.respond_to_copy(&terminal);

        let transfer = ClipboardTransfer::new(clipboard.clone()).with_polling(Duration::from_millis(1), 3);
        let copied = transfer.copy_from(&terminal).await;

        assert_eq!(copied.as_deref(), Some("MAIN MENU"));
        assert_eq!(clipboard.current().as_deref(), Some("user data"));
    }

    #[tokio::test]
    async fn broken_clipboard_never_errors() {
        let terminal = FakeTerminal::new("MAIN MENU");
        let clipboard = Arc::new(FakeClipboard::broken());

        let transfer = ClipboardTransfer::new(clipboard).with_polling(Duration::from_millis(1), 2);
        assert_eq!(transfer.copy_from(&terminal).await, None);
    }

    #[tokio::test]
    async fn unreadable_clipboard_is_not_wiped() {
        let terminal = FakeTerminal::new("MAIN MENU");
        let clipboard = Arc::new(FakeClipboard::with_text("user data"));
        clipboard.respond_to_copy(&terminal);
        clipboard.fail_next_reads(1);

        let transfer = ClipboardTransfer::new(clipboard.clone()).with_polling(Duration::from_millis(1), 3);
        assert_eq!(transfer.copy_from(&terminal).await.as_deref(), Some("MAIN MENU"));
        assert_eq!(clipboard.current().as_deref(), Some("MAIN MENU"));
    }

    #[tokio::test]
    async fn empty_clipboard_is_emptied_again() {
        let terminal = FakeTerminal::new("MAIN MENU");
        let clipboard = Arc::new(FakeClipboard::default());
        clipboard.respond_to_copy(&terminal);

        let transfer = ClipboardTransfer::new(clipboard.clone()).with_polling(Duration::from_millis(1), 3);
        assert_eq!(transfer.copy_from(&terminal).await.as_deref(), Some("MAIN MENU"));
        assert_eq!(clipboard.current().as_deref(), Some(""));
    }
}
