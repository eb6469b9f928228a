use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::console::write_line;
use super::{program_name, FormattedRecord, Sink, SinkFilter};
use crate::clock;
use crate::error::SinkError;
use crate::registry::{ChannelId, TagSet};
use crate::severity::Severity;

/// Writes extra content at the start or end of each log file.
///
/// Called with the file, the file's sequence number and the current time in
/// nanoseconds.
pub type Furniture = Box<dyn Fn(&mut dyn Write, u32, u64) -> io::Result<()> + Send + Sync>;

/// Where and how a [`FileSink`] writes.
#[derive(Debug, Clone)]
pub struct FileSinkOptions {
    pub directory: PathBuf,
    /// Base file name. Defaults to the program name.
    pub name: String,
    pub extension: String,
    /// Start a new file once this many bytes have been written.
    pub max_file_size: u64,
    /// Also print every line on stdout.
    pub echo: bool,
}

impl Default for FileSinkOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            name: program_name().to_owned(),
            extension: "log".to_owned(),
            max_file_size: u64::MAX,
            echo: false,
        }
    }
}

/// A sequence of size-limited files named
/// `<directory>/<name>_<session start>_<sequence>.<extension>`.
///
/// The session start is the compact UTC time the sink was created, so every
/// file of one run sorts together.
pub(super) struct RotatingFile {
    directory: PathBuf,
    name: String,
    extension: String,
    session: String,
    max_bytes: u64,
    sequence: u32,
    written: u64,
    file: Option<BufWriter<File>>,
    paths: Vec<PathBuf>,
}

impl RotatingFile {
    pub(super) fn new(directory: &Path, name: &str, extension: &str, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_owned(),
            name: name.to_owned(),
            extension: extension.to_owned(),
            session: chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string(),
            max_bytes: max_bytes.max(1),
            sequence: 0,
            written: 0,
            file: None,
            paths: Vec::new(),
        })
    }

    fn path_for(&self, sequence: u32) -> PathBuf {
        self.directory.join(format!(
            "{}_{}_{:03}.{}",
            self.name, self.session, sequence, self.extension
        ))
    }

    pub(super) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub(super) fn is_full(&self) -> bool {
        self.file.is_some() && self.written >= self.max_bytes
    }

    /// Opens the next file in the sequence and returns its sequence number.
    pub(super) fn open_next(&mut self) -> io::Result<u32> {
        let sequence = self.sequence;
        let path = self.path_for(sequence);
        let file = File::create(&path)?;
        self.file = Some(BufWriter::new(file));
        self.paths.push(path);
        self.written = 0;
        self.sequence += 1;
        Ok(sequence)
    }

    pub(super) fn current_sequence(&self) -> u32 {
        self.sequence.saturating_sub(1)
    }

    pub(super) fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "log file is not open"))?;
        file.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub(super) fn writer(&mut self) -> Option<&mut BufWriter<File>> {
        self.file.as_mut()
    }

    pub(super) fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Flushes and closes the current file.
    pub(super) fn finish(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => {
                self.written = 0;
                file.flush()
            }
            None => Ok(()),
        }
    }

    pub(super) fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

struct FileState {
    rotating: RotatingFile,
    closed: bool,
}

/// Text log files with size based rotation.
///
/// # Examples
///
/// ```no_run
/// # use async_logger::sink::{FileSink, FileSinkOptions};
/// let sink = FileSink::new(FileSinkOptions {
///     directory: "/var/log/rover".into(),
///     name: "nav".into(),
///     max_file_size: 10 * 1024 * 1024,
///     ..Default::default()
/// })?;
/// // files appear as /var/log/rover/nav_20240501T120000_000.log, ..._001.log
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct FileSink {
    filter: SinkFilter,
    echo: bool,
    header: Option<Furniture>,
    footer: Option<Furniture>,
    state: Mutex<FileState>,
}

impl FileSink {
    /// Creates the directory if needed. The first file is opened on the
    /// first write.
    pub fn new(options: FileSinkOptions) -> io::Result<Self> {
        let rotating = RotatingFile::new(
            &options.directory,
            &options.name,
            &options.extension,
            options.max_file_size,
        )?;
        Ok(Self {
            filter: SinkFilter::default(),
            echo: options.echo,
            header: None,
            footer: None,
            state: Mutex::new(FileState {
                rotating,
                closed: false,
            }),
        })
    }

    pub fn with_filter(mut self, filter: SinkFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_header(mut self, header: Furniture) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_footer(mut self, footer: Furniture) -> Self {
        self.footer = Some(footer);
        self
    }

    /// Every file this sink has created so far, oldest first.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.state.lock().rotating.paths().to_vec()
    }

    fn close_current(&self, rotating: &mut RotatingFile) -> io::Result<()> {
        let sequence = rotating.current_sequence();
        if let (Some(footer), Some(file)) = (&self.footer, rotating.writer()) {
            footer(file, sequence, clock::now_nanos())?;
        }
        rotating.finish()
    }
}

impl Sink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn accepts(&self, severity: Severity, channel: ChannelId, tags: TagSet) -> bool {
        self.filter.accepts(severity, channel, tags)
    }

    fn write(&self, record: &FormattedRecord<'_>) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        let rotating = &mut state.rotating;
        if rotating.is_full() {
            self.close_current(rotating)?;
        }
        if !rotating.is_open() {
            let sequence = rotating.open_next()?;
            if let Some(header) = &self.header {
                let mut buf = Vec::new();
                header(&mut buf, sequence, clock::now_nanos())?;
                rotating.write_all(&buf)?;
            }
        }
        rotating.write_all(record.text.as_bytes())?;
        rotating.write_all(b"\n")?;
        if self.echo {
            write_line(&mut io::stdout().lock(), record.text)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.state.lock().rotating.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.closed = true;
        self.close_current(&mut state.rotating)?;
        Ok(())
    }
}
