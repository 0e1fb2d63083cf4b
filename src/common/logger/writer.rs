use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing_subscriber::fmt::MakeWriter;

/// Log file that keeps only its newest `max_lines` lines.
///
/// Lines are appended through one shared handle. Once roughly a tenth of
/// `max_lines` (at least 50) new lines have accumulated, the file is rewritten
/// with just its tail.
#[derive(Clone)]
pub struct PruningFileWriter {
    inner: Arc<Mutex<PruningState>>,
}

struct PruningState {
    path: PathBuf,
    max_lines: usize,
    file: Option<File>,
    pending_lines: usize,
}

impl PruningState {
    fn handle(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            self.file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    fn prune_every(&self) -> usize {
        (self.max_lines / 10).max(50)
    }

    fn prune(&mut self) -> io::Result<()> {
        // Reopen after rewriting so appends land after the kept tail.
        self.file = None;
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let total = contents.lines().count();
        if total <= self.max_lines {
            return Ok(());
        }
        let mut kept = String::with_capacity(contents.len());
        for line in contents.lines().skip(total - self.max_lines) {
            kept.push_str(line);
            kept.push('\n');
        }
        fs::write(&self.path, kept)
    }
}

impl PruningFileWriter {
    pub fn new(path: impl AsRef<Path>, max_lines: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PruningState {
                path: path.as_ref().to_path_buf(),
                max_lines: max_lines as usize,
                file: None,
                pending_lines: 0,
            })),
        }
    }
}

impl Write for PruningFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.handle()?.write_all(buf)?;

        state.pending_lines += buf.iter().filter(|&&b| b == b'\n').count();
        if state.pending_lines >= state.prune_every() {
            state.pending_lines = 0;
            if let Err(e) = state.prune() {
                eprintln!("dubmix: could not prune {}: {e}", state.path.display());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match state.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for PruningFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
