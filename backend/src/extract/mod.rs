//! Handwriting/text extraction seam.
//!
//! The pipeline only needs "page image in, text out". Deployments plug in an
//! external OCR program; tests plug in their own implementation.

use crate::config::ExtractorConfig;
use crate::error::ExtractionError;
use image::GrayImage;
use log::debug;
use std::process::Command;

pub trait TextExtractor: Send + Sync {
    fn extract(&self, page: &GrayImage) -> Result<String, ExtractionError>;
}

/// Runs an external program on a temporary PNG of the page and reads the text
/// from its standard output.
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl TextExtractor for CommandExtractor {
    fn extract(&self, page: &GrayImage) -> Result<String, ExtractionError> {
        let tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        page.save_with_format(tmp.path(), image::ImageFormat::Png)
            .map_err(|e| ExtractionError::MissingImage(e.to_string()))?;

        let input = tmp.path().to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{input}", &input))
            .collect();
        debug!("Running extractor {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| ExtractionError::Command(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Every page fails; uploads still get a full decode report.
pub struct DisabledExtractor;

impl TextExtractor for DisabledExtractor {
    fn extract(&self, _page: &GrayImage) -> Result<String, ExtractionError> {
        Err(ExtractionError::NotConfigured)
    }
}

pub fn from_config(config: &ExtractorConfig) -> Box<dyn TextExtractor> {
    match config.program.as_deref().map(str::trim) {
        Some(program) if !program.is_empty() => {
            Box::new(CommandExtractor::new(program, config.args.clone()))
        }
        _ => Box::new(DisabledExtractor),
    }
}
