use std::{
    io::{Cursor, ErrorKind, Write},
    path::PathBuf,
    process::{Command, Stdio},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{anyhow, Context, Result};
use image::{GrayImage, ImageFormat};
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine binary or its language data is missing.
    #[error("OCR engine missing: {0}")]
    Missing(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &GrayImage) -> Result<String, OcrError>;
}

/// Tesseract driven through its command-line interface.
///
/// Page segmentation mode 6 treats the capture as one uniform block of text,
/// which is what a character terminal renders.
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
    provision: Option<Vec<String>>,
    provision_attempted: AtomicBool,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            provision: None,
            provision_attempted: AtomicBool::new(false),
        }
    }

    /// Command that unpacks the bundled OCR archive. Runs at most once per process.
    pub fn with_provisioning(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.provision = Some(command);
        }
        self
    }

    fn run(&self, png: &[u8]) -> Result<String, OcrError> {
        let mut child = match Command::new(&self.binary)
            .args(["stdin", "stdout", "--psm", "6", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(OcrError::Missing(format!(
                    "{} not found",
                    self.binary.display()
                )));
            }
            Err(err) => return Err(OcrError::Failed(anyhow!(err).context("failed to spawn tesseract"))),
        };

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow!("tesseract stdin unavailable"))?;
            stdin
                .write_all(png)
                .context("failed to stream capture to tesseract")?;
        }

        let output = child
            .wait_with_output()
            .context("tesseract did not exit cleanly")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Failed loading language") || stderr.contains("Error opening data file") {
                return Err(OcrError::Missing(stderr.trim().to_string()));
            }
            return Err(OcrError::Failed(anyhow!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn provision_once(&self) -> Result<bool> {
        let Some(command) = &self.provision else {
            return Ok(false);
        };
        if self.provision_attempted.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("empty provisioning command"))?;
        info!("Provisioning OCR engine with {program}");
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to run OCR provisioning command {program}"))?;

        if !status.success() {
            warn!("OCR provisioning exited with {status}");
        }
        Ok(status.success())
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &GrayImage) -> Result<String, OcrError> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .context("failed to encode capture as PNG")?;
        let png = png.into_inner();

        match self.run(&png) {
            Err(OcrError::Missing(reason)) => {
                warn!("OCR engine unavailable ({reason}); attempting provisioning");
                if self.provision_once()? {
                    self.run(&png)
                } else {
                    Err(OcrError::Missing(reason))
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_reported_as_missing() {
        let engine = TesseractOcr::new("/nonexistent/termreg-tesseract", "eng");
        let err = engine.recognize(&GrayImage::new(4, 4)).unwrap_err();
        assert!(matches!(err, OcrError::Missing(_)));
    }

    #[test]
    fn provisioning_runs_only_once() {
        let engine = TesseractOcr::new("/nonexistent/termreg-tesseract", "eng")
            .with_provisioning(vec!["true".into()]);

        assert!(engine.provision_once().unwrap());
        assert!(!engine.provision_once().unwrap());
        assert!(matches!(
            engine.recognize(&GrayImage::new(4, 4)),
            Err(OcrError::Missing(_))
        ));
    }
}
