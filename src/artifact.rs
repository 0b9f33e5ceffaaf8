//! Output files that only persist once their content is complete

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{CompileError, CompileResult};

/// What an artifact is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArtifactKind {
    LlvmIr,
    OptimizedLlvmIr,
    Object,
    CoreElf,
    IpuInstructions,
    HostGlue,
    DeviceConfig,
    KernelMetadata,
    Xclbin,
}

/// A file the run produced and kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Destination file removed on drop unless `keep` was called
pub struct OutputFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    kept: bool,
}

impl OutputFile {
    pub fn create(path: impl Into<PathBuf>) -> CompileResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|source| CompileError::ArtifactOpen {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            kept: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and commit the file
    pub fn keep(mut self) -> CompileResult<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.kept = true;
        Ok(self.path.clone())
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.writer {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "output already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.writer {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        drop(self.writer.take());
        if let Err(err) = fs::remove_file(&self.path) {
            log::debug!("could not discard {}: {}", self.path.display(), err);
        }
    }
}

/// Open `path`, write what `render` produces and keep it
pub fn emit_artifact<F>(path: &Path, kind: ArtifactKind, render: F) -> CompileResult<Artifact>
where
    F: FnOnce() -> CompileResult<String>,
{
    let mut output = OutputFile::create(path)?;
    let text = render()?;
    output.write_all(text.as_bytes())?;
    let path = output.keep()?;
    log::debug!("wrote {}", path.display());
    Ok(Artifact::new(kind, path))
}

/// Like `emit_artifact` for two files that are committed together or not at all
pub fn emit_artifact_pair<F, G>(
    first: (&Path, ArtifactKind),
    render_first: F,
    second: (&Path, ArtifactKind),
    render_second: G,
) -> CompileResult<[Artifact; 2]>
where
    F: FnOnce() -> CompileResult<String>,
    G: FnOnce() -> CompileResult<String>,
{
    let mut first_output = OutputFile::create(first.0)?;
    first_output.write_all(render_first()?.as_bytes())?;
    let mut second_output = OutputFile::create(second.0)?;
    second_output.write_all(render_second()?.as_bytes())?;

    let first_path = first_output.keep()?;
    let second_path = second_output.keep()?;
    log::debug!("wrote {} and {}", first_path.display(), second_path.display());
    Ok([
        Artifact::new(first.1, first_path),
        Artifact::new(second.1, second_path),
    ])
}
