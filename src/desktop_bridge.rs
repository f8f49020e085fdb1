//! X11 desktop backend built on command-line tools: `xdotool` for windows and
//! keystrokes, ImageMagick `import` for screenshots, `xclip` for the clipboard
//! and `xset` for the display power settings.

use anyhow::{anyhow, bail, Context, Result};
use image::DynamicImage;
use std::{
    io::Write,
    process::{Command, Output, Stdio},
    sync::Mutex,
};

use crate::{
    screen::{ClientRect, OverlayControl, WindowCapturer, WindowHandle},
    terminal::{ClipboardPort, Key, TerminalPort},
};

/// Milliseconds xdotool waits between synthetic key events.
const XDOTOOL_KEY_DELAY_MS: &str = "25";

pub struct X11Desktop {
    window_title: String,
    overlay_titles: Vec<String>,
    cached_window: Mutex<Option<WindowHandle>>,
}

impl X11Desktop {
    pub fn new(window_title: impl Into<String>) -> Self {
        Self {
            window_title: window_title.into(),
            overlay_titles: Vec::new(),
            cached_window: Mutex::new(None),
        }
    }

    /// Our own windows (e.g. the countdown) that must not cover the capture.
    pub fn with_overlays(mut self, titles: Vec<String>) -> Self {
        self.overlay_titles = titles;
        self
    }

    fn window(&self) -> Result<WindowHandle> {
        let mut cached = match self.cached_window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(window) = cached.as_ref() {
            if run("xdotool", &["getwindowname", &window.0]).is_ok() {
                return Ok(window.clone());
            }
        }
        let window = search_window(&self.window_title, false)?
            .ok_or_else(|| anyhow!("no window titled '{}'", self.window_title))?;
        *cached = Some(window.clone());
        Ok(window)
    }
}

impl TerminalPort for X11Desktop {
    fn send_keys(&self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let window = self.window()?;
        let names: Vec<String> = keys.iter().map(keysym).collect();
        let mut args = vec!["key", "--window", window.0.as_str(), "--delay", XDOTOOL_KEY_DELAY_MS];
        args.extend(names.iter().map(String::as_str));
        run("xdotool", &args).map(|_| ())
    }

    fn is_window_visible(&self) -> bool {
        matches!(search_window(&self.window_title, true), Ok(Some(_)))
    }

    fn bring_to_front(&self) -> Result<()> {
        let window = self.window()?;
        run("xdotool", &["windowmap", &window.0])?;
        run("xdotool", &["windowactivate", "--sync", &window.0])?;
        Ok(())
    }
}

impl WindowCapturer for X11Desktop {
    fn locate(&self) -> Result<WindowHandle> {
        self.window()
    }

    fn client_rect(&self, window: &WindowHandle) -> Result<ClientRect> {
        let output = run("xdotool", &["getwindowgeometry", "--shell", &window.0])?;
        parse_geometry(&output)
    }

    fn focus(&self, window: &WindowHandle) -> Result<()> {
        run("xdotool", &["windowactivate", "--sync", &window.0]).map(|_| ())
    }

    fn grab(&self, window: &WindowHandle, _rect: &ClientRect) -> Result<DynamicImage> {
        // `import -window` grabs the client area only, without frame or shadow.
        let output = Command::new("import")
            .args(["-silent", "-window", &window.0, "png:-"])
            .output()
            .context("failed to run ImageMagick import")?;
        if !output.status.success() {
            bail!(
                "import exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        image::load_from_memory(&output.stdout).context("screenshot is not a PNG")
    }
}

impl OverlayControl for X11Desktop {
    fn lower(&self) {
        for title in &self.overlay_titles {
            if let Ok(Some(window)) = search_window(title, true) {
                if let Err(err) = run("xdotool", &["windowunmap", &window.0]) {
                    log::warn!("could not hide overlay '{title}': {err:#}");
                }
            }
        }
    }

    fn raise(&self) {
        for title in &self.overlay_titles {
            if let Ok(Some(window)) = search_window(title, false) {
                if let Err(err) = run("xdotool", &["windowmap", &window.0]) {
                    log::warn!("could not restore overlay '{title}': {err:#}");
                }
            }
        }
    }
}

/// The X11 CLIPBOARD selection via `xclip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct X11Clipboard;

impl ClipboardPort for X11Clipboard {
    fn read_text(&self) -> Result<Option<String>> {
        let output = Command::new("xclip")
            .args(["-selection", "clipboard", "-o"])
            .output()
            .context("failed to run xclip")?;
        if !output.status.success() {
            // xclip fails when nothing has been copied yet.
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut child = Command::new("xclip")
            .args(["-selection", "clipboard", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .context("failed to run xclip")?;
        child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("xclip stdin unavailable"))?
            .write_all(text.as_bytes())
            .context("failed to write to xclip")?;
        let status = child.wait().context("xclip did not exit")?;
        if !status.success() {
            bail!("xclip exited with {status}");
        }
        Ok(())
    }
}

/// Screen-saver timeout reported by `xset q`, if one is set.
pub fn display_timeout_secs() -> Option<u64> {
    let output = run("xset", &["q"]).ok()?;
    parse_xset_timeout(&output)
}

fn search_window(title: &str, only_visible: bool) -> Result<Option<WindowHandle>> {
    let mut args = vec!["search"];
    if only_visible {
        args.push("--onlyvisible");
    }
    args.extend(["--name", title]);

    let output = Command::new("xdotool")
        .args(&args)
        .output()
        .context("failed to run xdotool")?;
    // xdotool exits non-zero when nothing matches.
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|id| WindowHandle(id.to_string())))
}

fn run(program: &str, args: &[&str]) -> Result<String> {
    let output: Output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// xdotool keysym for one key.
fn keysym(key: &Key) -> String {
    match key {
        Key::Char(c) => char_keysym(*c),
        Key::Enter => "Return".into(),
        Key::Tab => "Tab".into(),
        Key::Escape => "Escape".into(),
        Key::Backspace => "BackSpace".into(),
        Key::Up => "Up".into(),
        Key::Down => "Down".into(),
        Key::Left => "Left".into(),
        Key::Right => "Right".into(),
        Key::Home => "Home".into(),
        Key::End => "End".into(),
        Key::F(n) => format!("F{n}"),
        Key::Ctrl(c) => format!("ctrl+{}", char_keysym(*c)),
        Key::Alt(c) => format!("alt+{}", char_keysym(*c)),
    }
}

fn char_keysym(c: char) -> String {
    let name = match c {
        ' ' => "space",
        '-' => "minus",
        '/' => "slash",
        '.' => "period",
        ',' => "comma",
        ':' => "colon",
        '*' => "asterisk",
        '%' => "percent",
        '_' => "underscore",
        c if c.is_ascii_alphanumeric() => return c.to_string(),
        c => return format!("U{:04X}", c as u32),
    };
    name.to_string()
}

fn parse_geometry(output: &str) -> Result<ClientRect> {
    let field = |name: &str| -> Result<i64> {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix(name)?.strip_prefix('='))
            .ok_or_else(|| anyhow!("geometry is missing {name}"))?
            .trim()
            .parse()
            .with_context(|| format!("geometry {name} is not a number"))
    };
    Ok(ClientRect {
        x: field("X")? as i32,
        y: field("Y")? as i32,
        width: u32::try_from(field("WIDTH")?).context("negative width")?,
        height: u32::try_from(field("HEIGHT")?).context("negative height")?,
    })
}

fn parse_xset_timeout(output: &str) -> Option<u64> {
    let after = output.split("timeout:").nth(1)?;
    let secs: u64 = after.split_whitespace().next()?.parse().ok()?;
    (secs > 0).then_some(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keysyms_cover_terminal_input() {
        let keys = [
            Key::Char('C'),
            Key::Char('3'),
            Key::Char('-'),
            Key::Tab,
            Key::Enter,
            Key::F(3),
            Key::Alt('e'),
        ];
        let names: Vec<String> = keys.iter().map(keysym).collect();
        assert_eq!(names, ["C", "3", "minus", "Tab", "Return", "F3", "alt+e"]);
        assert_eq!(char_keysym('ñ'), "U00F1");
    }

    #[test]
    fn parses_shell_geometry() {
        let output = "WINDOW=6291467\nX=120\nY=64\nWIDTH=804\nHEIGHT=580\nSCREEN=0\n";
        assert_eq!(
            parse_geometry(output).unwrap(),
            ClientRect {
                x: 120,
                y: 64,
                width: 804,
                height: 580
            }
        );
        assert!(parse_geometry("WINDOW=1\nX=0\n").is_err());
    }

    #[test]
    fn reads_screen_saver_timeout() {
        let xset = "Screen Saver:\n  prefer blanking:  yes    allow exposures:  yes\n  timeout:  600    cycle:  600\n";
        assert_eq!(parse_xset_timeout(xset), Some(600));
        assert_eq!(parse_xset_timeout("  timeout:  0    cycle:  600"), None);
        assert_eq!(parse_xset_timeout("DPMS is Disabled"), None);
    }
}
