//! OCR engines: the tesseract executable, the linked library behind the
//! `ocr` feature, and test doubles.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::types::OcrEngine;
use super::ValidationError;
use crate::config::OcrConfig;

/// How often a running tesseract process is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// OCR through the Tesseract command-line tool.
///
/// The executable path and language come from `OcrConfig`, resolved once at
/// start-up. Each call spawns `<exe> stdin stdout -l <lang>` with the page PNG
/// piped on stdin; a process still running at the timeout is killed.
pub struct TesseractCli {
    executable: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            language: config.language.clone(),
            timeout: config.timeout,
        }
    }

    fn spawn(&self) -> Result<Child, ValidationError> {
        Command::new(&self.executable)
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ValidationError::OcrInit(format!(
                    "failed to start {}: {e}",
                    self.executable.display()
                ))
            })
    }

    /// Wait for exit, killing the process once `timeout` has elapsed.
    fn wait_with_deadline(&self, child: &mut Child) -> Result<std::process::ExitStatus, ValidationError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(
                    executable = %self.executable.display(),
                    timeout_secs = self.timeout.as_secs(),
                    "OCR timed out, killing process"
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(ValidationError::OcrTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl OcrEngine for TesseractCli {
    fn ocr_image(&self, png_bytes: &[u8]) -> Result<String, ValidationError> {
        let started = Instant::now();
        let mut child = self.spawn()?;

        // Pipes are drained on their own threads so a full buffer on one side
        // cannot stall the process while we poll.
        let stdin = child.stdin.take();
        let input = png_bytes.to_vec();
        let writer = thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // Broken pipe here means the process already exited; its status says why.
                let _ = stdin.write_all(&input);
            }
        });
        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let status = self.wait_with_deadline(&mut child)?;

        let _ = writer.join();
        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let detail = String::from_utf8_lossy(&stderr);
            return Err(ValidationError::OcrProcessing(format!(
                "tesseract exited with {status}: {}",
                detail.lines().next().unwrap_or("").trim()
            )));
        }

        let text = String::from_utf8_lossy(&stdout).into_owned();
        debug!(
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tesseract OCR complete"
        );
        Ok(text)
    }
}

/// Bundled Tesseract OCR engine (linked libtesseract).
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: Option<PathBuf>,
    language: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    pub fn new(tessdata_dir: Option<&std::path::Path>, language: &str) -> Result<Self, ValidationError> {
        if let Some(dir) = tessdata_dir {
            let traineddata = dir.join(format!("{}.traineddata", language.split('+').next().unwrap_or("eng")));
            if !traineddata.exists() {
                return Err(ValidationError::OcrInit(format!(
                    "tessdata not found: {}",
                    traineddata.display()
                )));
            }
        }
        Ok(Self {
            tessdata_dir: tessdata_dir.map(|d| d.to_path_buf()),
            language: language.to_string(),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn ocr_image(&self, png_bytes: &[u8]) -> Result<String, ValidationError> {
        let tessdata = match &self.tessdata_dir {
            Some(dir) => Some(
                dir.to_str()
                    .ok_or_else(|| ValidationError::OcrInit("Invalid tessdata path".into()))?,
            ),
            None => None,
        };

        let tess = tesseract::Tesseract::new(tessdata, Some(&self.language))
            .map_err(|e| ValidationError::OcrInit(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(png_bytes)
            .map_err(|e| ValidationError::OcrProcessing(format!("{e:?}")))?;

        tess.get_text()
            .map_err(|e| ValidationError::OcrProcessing(format!("{e:?}")))
    }
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    pub text: String,
}

impl MockOcrEngine {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn ocr_image(&self, _png_bytes: &[u8]) -> Result<String, ValidationError> {
        Ok(self.text.clone())
    }
}

/// OCR engine that always fails, for exercising the recovery path.
pub struct FailingOcrEngine;

impl OcrEngine for FailingOcrEngine {
    fn ocr_image(&self, _png_bytes: &[u8]) -> Result<String, ValidationError> {
        Err(ValidationError::OcrProcessing("mock OCR failure".into()))
    }
}
