use crate::error::DocGenError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait DocumentConverter: Send + Sync {
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), DocGenError>;
}

impl<F> DocumentConverter for F
where
    F: Fn(&Path, &Path) -> Result<(), DocGenError> + Send + Sync,
{
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), DocGenError> {
        self(source, destination)
    }
}

#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
    timeout: Duration,
}

impl Default for CommandConverter {
    fn default() -> Self {
        Self::new("soffice")
    }
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_CONVERT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, source: &Path, out_dir: &Path) -> Result<(), DocGenError> {
        let mut child = Command::new(&self.program)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                DocGenError::ConversionFailure(format!(
                    "could not start {}: {err}",
                    self.program.display()
                ))
            })?;

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(DocGenError::ConversionFailure(format!(
                        "{} exited with {status}",
                        self.program.display()
                    )));
                }
                Ok(None) if started.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DocGenError::ConversionFailure(format!(
                        "{} timed out after {:?}",
                        self.program.display(),
                        self.timeout
                    )));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    return Err(DocGenError::ConversionFailure(format!(
                        "waiting for {}: {err}",
                        self.program.display()
                    )));
                }
            }
        }
    }
}

impl DocumentConverter for CommandConverter {
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), DocGenError> {
        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        let out_dir = parent.join(format!(".docgen-convert-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&out_dir)?;

        let result = self.run(source, &out_dir).and_then(|()| {
            let stem = source.file_stem().unwrap_or_default();
            let produced = out_dir.join(format!("{}.pdf", stem.to_string_lossy()));
            if !produced.is_file() {
                return Err(DocGenError::ConversionFailure(format!(
                    "converter produced no {}",
                    produced.display()
                )));
            }
            if fs::rename(&produced, destination).is_err() {
                fs::copy(&produced, destination)?;
            }
            Ok(())
        });
        let _ = fs::remove_dir_all(&out_dir);
        result
    }
}

pub struct SerializedConverter<C> {
    inner: C,
    lock: Mutex<()>,
}

impl<C: DocumentConverter> SerializedConverter<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }
}

impl<C: DocumentConverter> DocumentConverter for SerializedConverter<C> {
    fn convert(&self, source: &Path, destination: &Path) -> Result<(), DocGenError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.inner.convert(source, destination)
    }
}
