use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use derive_more::derive::{From, Into};
use itertools::Itertools;
use thiserror::Error;
use typed_index_collections::TiVec;

/// Extension carried by every object source file.
pub const SOURCE_EXTENSION: &str = "spin";

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessIndex(usize);

#[derive(Debug, Error)]
pub struct LoadError {
    pub path: PathBuf,
    pub error: LoadErrorInner,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "In file {}, error: {}", self.path.display(), self.error)
    }
}

#[derive(Debug, Error)]
pub enum LoadErrorInner {
    #[error("error reading file")]
    IO(#[from] std::io::Error),
    #[error("file not found")]
    FileNotFound,
    #[error("file is empty")]
    Empty,
    #[error("unrecognized text encoding format")]
    Encoding,
}

/// Every file the build tried to open, in order.
///
/// Entries are never deduplicated while collecting; [`FileAccessLog::unique`]
/// folds repeats at report time.
#[derive(Debug, Default, Clone)]
pub struct FileAccessLog {
    pub files: TiVec<AccessIndex, PathBuf>,
}

impl FileAccessLog {
    pub fn record(&mut self, path: PathBuf) -> AccessIndex {
        self.files.push_and_get_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn unique(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter().unique()
    }
}

/// Object source text after encoding normalization.
///
/// Every char of `text` is at most U+00FF, one char per source byte of the
/// target's character set.
#[derive(Debug, Clone)]
pub struct Source {
    pub path: PathBuf,
    pub text: String,
}

/// Resolves names against the working directory and then each search path
/// in order; the first existing file wins.
#[derive(Debug, Default)]
pub struct Loader {
    pub search_paths: Vec<PathBuf>,
    pub accessed: FileAccessLog,
}

impl Loader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            accessed: FileAccessLog::default(),
        }
    }

    /// Searches the directory holding `file` ahead of the include paths.
    pub fn add_file_dir(&mut self, file: &Path) {
        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => return,
        };
        if !self.search_paths.contains(&dir) {
            self.search_paths.insert(0, dir);
        }
    }

    pub fn add_path(&mut self, dir: PathBuf) {
        self.search_paths.push(dir);
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        std::iter::once(PathBuf::from(name))
            .chain(self.search_paths.iter().map(|dir| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    /// Reads `name` verbatim, logging the attempt whether or not it succeeds.
    pub fn read(&mut self, name: &str) -> Result<(Vec<u8>, PathBuf), LoadError> {
        let resolved = self.resolve(name);
        let logged = canonical(resolved.as_deref().unwrap_or(Path::new(name)));
        self.accessed.record(logged.clone());

        let Some(path) = resolved else {
            return Err(LoadError {
                path: PathBuf::from(name),
                error: LoadErrorInner::FileNotFound,
            });
        };
        let bytes = std::fs::read(&path).map_err(|e| LoadError {
            path,
            error: e.into(),
        })?;
        Ok((bytes, logged))
    }

    pub fn load_source(&mut self, name: &str) -> Result<Source, LoadError> {
        let (bytes, path) = self.read(name)?;
        if bytes.is_empty() {
            return Err(LoadError {
                path,
                error: LoadErrorInner::Empty,
            });
        }
        match decode(&bytes) {
            Some(text) => Ok(Source { path, text }),
            None => Err(LoadError {
                path,
                error: LoadErrorInner::Encoding,
            }),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Normalizes UTF-8 (with or without BOM), UTF-16 (BOM, or little-endian
/// ASCII text without one) and single-byte sources to one char per byte.
pub fn decode(bytes: &[u8]) -> Option<String> {
    let chars = match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => std::str::from_utf8(rest).ok()?.chars().collect(),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes)?,
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes)?,
        _ if looks_like_utf16le(bytes) => utf16(bytes, u16::from_le_bytes)?,
        _ => match std::str::from_utf8(bytes) {
            Ok(text) => text.chars().collect(),
            Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
        },
    };
    chars
        .into_iter()
        .map(|c| (u32::from(c) <= 0xFF).then_some(c))
        .collect()
}

fn utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<Vec<char>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<_, _>>().ok()
}

fn looks_like_utf16le(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes.len() % 2 == 0 && bytes.iter().skip(1).step_by(2).all(|&b| b == 0)
}
