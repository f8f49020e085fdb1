use std::{sync::Arc, thread, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{AutomationError, AutomationResult};

use super::{
    ocr::{OcrEngine, OcrError},
    preprocess::{prepare_for_ocr, CropMargin},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Menu words of the terminal emulator's own window chrome. Their presence is
/// how a capture proves it actually looked at the terminal.
pub const CHROME_KEYWORDS: [&str; 6] = ["File", "Edit", "Setup", "Control", "Window", "Help"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle(pub String);

/// Client area of the terminal window, in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    pub text: String,
    pub captured_at: DateTime<Utc>,
    /// False when the chrome check never passed and retries ran out.
    pub validated: bool,
}

/// Anything that can produce the terminal's current text.
pub trait ScreenSource: Send + Sync {
    fn capture(&self) -> AutomationResult<ScreenSnapshot>;
}

pub trait WindowCapturer: Send + Sync {
    fn locate(&self) -> Result<WindowHandle>;
    fn client_rect(&self, window: &WindowHandle) -> Result<ClientRect>;
    fn focus(&self, window: &WindowHandle) -> Result<()>;
    fn grab(&self, window: &WindowHandle, rect: &ClientRect) -> Result<DynamicImage>;
}

/// Windows of our own that may sit on top of the terminal.
pub trait OverlayControl: Send + Sync {
    fn lower(&self);
    fn raise(&self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub crop_margin: CropMargin,
    pub upscale: u32,
    pub min_chrome_matches: usize,
    pub max_retries: u32,
    pub retry_spacing_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            crop_margin: CropMargin::default(),
            upscale: 2,
            min_chrome_matches: 3,
            max_retries: 3,
            retry_spacing_ms: 1_000,
        }
    }
}

pub struct ScreenReader {
    capturer: Arc<dyn WindowCapturer>,
    ocr: Arc<dyn OcrEngine>,
    overlays: Option<Arc<dyn OverlayControl>>,
    config: ScreenConfig,
}

impl ScreenReader {
    pub fn new(capturer: Arc<dyn WindowCapturer>, ocr: Arc<dyn OcrEngine>, config: ScreenConfig) -> Self {
        Self {
            capturer,
            ocr,
            overlays: None,
            config,
        }
    }

    pub fn with_overlays(mut self, overlays: Arc<dyn OverlayControl>) -> Self {
        self.overlays = Some(overlays);
        self
    }

    fn capture_once(&self) -> AutomationResult<String> {
        let _overlay = self.overlays.as_deref().map(OverlayGuard::lower);

        let window = self
            .capturer
            .locate()
            .map_err(|err| AutomationError::TerminalUnavailable(format!("{err:#}")))?;
        let rect = self.capturer.client_rect(&window)?;
        self.capturer.focus(&window)?;
        let bitmap = self.capturer.grab(&window, &rect)?;
        let prepared = prepare_for_ocr(&bitmap, self.config.crop_margin, self.config.upscale)?;

        match self.ocr.recognize(&prepared) {
            Ok(text) => Ok(text),
            Err(OcrError::Missing(reason)) => {
                log_error!("OCR engine unavailable after provisioning: {reason}");
                Err(AutomationError::OcrUnavailable(reason))
            }
            Err(OcrError::Failed(err)) => Err(AutomationError::Internal(err)),
        }
    }
}

impl ScreenSource for ScreenReader {
    fn capture(&self) -> AutomationResult<ScreenSnapshot> {
        let mut last_text = String::new();

        for attempt in 0..=self.config.max_retries {
            let text = self.capture_once()?;
            let matches = chrome_matches(&text);

            if matches >= self.config.min_chrome_matches {
                if attempt > 0 {
                    log_info!("capture validated on retry {attempt} ({matches} chrome keywords)");
                }
                return Ok(ScreenSnapshot {
                    text,
                    captured_at: Utc::now(),
                    validated: true,
                });
            }

            log_warn!(
                "capture attempt {} matched {matches}/{} chrome keywords",
                attempt + 1,
                CHROME_KEYWORDS.len()
            );
            last_text = text;

            if attempt < self.config.max_retries {
                thread::sleep(Duration::from_millis(self.config.retry_spacing_ms));
            }
        }

        Ok(ScreenSnapshot {
            text: last_text,
            captured_at: Utc::now(),
            validated: false,
        })
    }
}

/// Number of distinct chrome keywords present as whole words.
pub fn chrome_matches(text: &str) -> usize {
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();

    CHROME_KEYWORDS
        .iter()
        .filter(|keyword| words.iter().any(|word| word == *keyword))
        .count()
}

struct OverlayGuard<'a>(&'a dyn OverlayControl);

impl<'a> OverlayGuard<'a> {
    fn lower(control: &'a dyn OverlayControl) -> Self {
        control.lower();
        Self(control)
    }
}

impl Drop for OverlayGuard<'_> {
    fn drop(&mut self) {
        self.0.raise();
    }
}
