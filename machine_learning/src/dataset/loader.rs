use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader},
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::debug;

/// A raw text record and its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: u64,
    pub line: String,
}

/// A source of raw records, consumed once per run.
pub trait DataPointLoader {
    /// Should yield every record of this source.
    ///
    /// # Returns
    /// An iterator over the records, an `Err` item aborts the load.
    fn records(&mut self) -> Box<dyn Iterator<Item = io::Result<Record>> + '_>;
}

/// Keeps only the records whose key falls on this host's lane, `key % step == offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    offset: usize,
    step: NonZeroUsize,
}

impl Stride {
    /// Creates a new `Stride`.
    ///
    /// # Panics
    /// If `offset` is not smaller than `step`.
    pub fn new(offset: usize, step: NonZeroUsize) -> Self {
        assert!(offset < step.get(), "stride offset out of range");
        Self { offset, step }
    }

    /// A stride that keeps every record.
    pub fn all() -> Self {
        Self::new(0, NonZeroUsize::MIN)
    }

    #[inline]
    pub fn keeps(&self, key: u64) -> bool {
        key % self.step.get() as u64 == self.offset as u64
    }
}

/// Reads line records from local files.
///
/// Keys are assigned sequentially across all the files, in order. Blank lines are
/// skipped and don't consume a key.
#[derive(Debug, Clone)]
pub struct FileLoader {
    files: Vec<PathBuf>,
    stride: Stride,
}

impl FileLoader {
    /// Creates a new `FileLoader`.
    ///
    /// # Arguments
    /// * `inputs` - Files or directories, a directory contributes every regular
    ///              file directly inside of it sorted by name.
    ///
    /// # Returns
    /// A new `FileLoader` or an io error if any of the inputs can't be inspected.
    pub fn new<P: AsRef<Path>>(inputs: &[P]) -> io::Result<Self> {
        let mut files = Vec::new();

        for input in inputs {
            let input = input.as_ref();

            if input.is_dir() {
                let mut entries = fs::read_dir(input)?
                    .map(|entry| entry.map(|entry| entry.path()))
                    .collect::<io::Result<Vec<_>>>()?;

                entries.retain(|path| path.is_file());
                entries.sort();
                files.extend(entries);
            } else {
                files.push(input.to_path_buf());
            }
        }

        debug!(files = files.len(); "resolved input files");

        Ok(Self {
            files,
            stride: Stride::all(),
        })
    }

    /// Restricts the loader to a single lane of the records.
    pub fn with_stride(mut self, stride: Stride) -> Self {
        self.stride = stride;
        self
    }

    /// The files to read, in reading order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

type Lines<'a> = Box<dyn Iterator<Item = io::Result<String>> + 'a>;

fn open_lines(path: &Path) -> Lines<'static> {
    let with_path = {
        let path = path.to_path_buf();
        move |e: io::Error| io::Error::new(e.kind(), format!("{}: {e}", path.display()))
    };

    match File::open(path) {
        Ok(file) => {
            let lines = BufReader::new(file).lines();
            Box::new(lines.map(move |line| line.map_err(&with_path)))
        }
        Err(e) => Box::new(iter::once(Err(with_path(e)))),
    }
}

impl DataPointLoader for FileLoader {
    fn records(&mut self) -> Box<dyn Iterator<Item = io::Result<Record>> + '_> {
        let stride = self.stride;

        let records = self
            .files
            .iter()
            .flat_map(|path| open_lines(path))
            .filter(|line| !matches!(line, Ok(line) if line.trim().is_empty()))
            .zip(0..)
            .map(|(line, key)| line.map(|line| Record { key, line }))
            .filter(move |record| match record {
                Ok(record) => stride.keeps(record.key),
                Err(_) => true,
            });

        Box::new(records)
    }
}

/// Serves records from memory, keyed by their position.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    lines: Vec<String>,
}

impl MemoryLoader {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl DataPointLoader for MemoryLoader {
    fn records(&mut self) -> Box<dyn Iterator<Item = io::Result<Record>> + '_> {
        let records = self.lines.iter().zip(0..).map(|(line, key)| {
            Ok(Record {
                key,
                line: line.clone(),
            })
        });

        Box::new(records)
    }
}
