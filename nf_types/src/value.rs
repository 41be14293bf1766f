//! Parameter values and the paths file-typed values point at.

use crate::schema::ParamKind;
use serde::{Serialize, Serializer};
use std::env;
use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// Location of a file or directory handed to the pipeline.
///
/// Remote locations (`latch://`, `s3://`, ...) are passed to the runner
/// verbatim. Local paths are made absolute against the current directory so
/// the runner, which executes from the staged working directory, resolves
/// them to the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataPath {
    /// A URL with a scheme, e.g. `latch:///inputs/samplesheet.csv`.
    Remote(String),
    /// An absolute local filesystem path.
    Local(PathBuf),
}

impl DataPath {
    /// Build a local data path, making `path` absolute.
    pub fn local(path: impl AsRef<Path>) -> std::io::Result<Self> {
        absolute(path.as_ref()).map(DataPath::Local)
    }

    /// True if this path refers to remote storage.
    pub fn is_remote(&self) -> bool {
        matches!(self, DataPath::Remote(_))
    }
}

/// Make `path` absolute and drop `.` components without touching the
/// filesystem, so output locations that do not exist yet are accepted.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(path
        .components()
        .filter(|&c| c != Component::CurDir)
        .collect())
}

impl FromStr for DataPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        if s.is_empty() {
            return Err("empty path".to_string());
        }
        if s.contains("://") {
            Url::parse(s).map_err(|e| format!("{s}: {e}"))?;
            return Ok(DataPath::Remote(s.to_string()));
        }
        DataPath::local(s).map_err(|e| format!("{s}: {e}"))
    }
}

impl Display for DataPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DataPath::Remote(url) => f.write_str(url),
            DataPath::Local(path) => Display::fmt(&path.display(), f),
        }
    }
}

impl Serialize for DataPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A value bound to a declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// An input file.
    File(DataPath),
    /// A directory, usually the pipeline's output location.
    Dir(DataPath),
    /// Free text.
    Str(String),
    /// An integer.
    Int(i64),
    /// A switch.
    Bool(bool),
}

impl ParamValue {
    /// The kind of this value, for checking against a declaration.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::File(_) => ParamKind::File,
            ParamValue::Dir(_) => ParamKind::Dir,
            ParamValue::Str(_) => ParamKind::String,
            ParamValue::Int(_) => ParamKind::Int,
            ParamValue::Bool(_) => ParamKind::Bool,
        }
    }

    /// Parse a raw command-line string as a value of `kind`.
    pub fn parse(kind: ParamKind, raw: &str) -> Result<Self, String> {
        Ok(match kind {
            ParamKind::File => ParamValue::File(raw.parse()?),
            ParamKind::Dir => ParamValue::Dir(raw.parse()?),
            ParamKind::String => ParamValue::Str(raw.to_string()),
            ParamKind::Int => ParamValue::Int(
                raw.trim()
                    .parse()
                    .map_err(|e| format!("'{raw}' is not an integer: {e}"))?,
            ),
            ParamKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => ParamValue::Bool(true),
                "false" | "no" | "0" => ParamValue::Bool(false),
                _ => return Err(format!("'{raw}' is not one of true|false")),
            },
        })
    }
}

/// Renders the token that follows `--<name>` on the runner command line.
impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::File(p) | ParamValue::Dir(p) => Display::fmt(p, f),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::Int(n) => Display::fmt(n, f),
            ParamValue::Bool(b) => Display::fmt(b, f),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}
