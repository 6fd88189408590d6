//! The job data model.
//!
//! A [`Job`] is one external tool invocation planned by the compiler driver.
//! Jobs are plain data: they know which files they read and write, but not how
//! those files map onto the real filesystem. That mapping is the business of
//! the [`ArgsResolver`](crate::ArgsResolver).

use std::collections::BTreeMap;
use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::core::Hash32;

/// A path reference that still needs to be resolved before it can be placed
/// on a real command line.
///
/// Equality and hashing are by logical identity: two `Temporary("a.o")` values
/// are the same path regardless of where the temporary directory ends up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualPath {
    /// A run-scoped file placed inside the resolver's temporary directory.
    Temporary(Utf8PathBuf),
    /// A path relative to the working directory of the run.
    Relative(Utf8PathBuf),
    /// An absolute path.
    Absolute(Utf8PathBuf),
}

impl VirtualPath {
    pub fn temporary(name: impl Into<Utf8PathBuf>) -> Self {
        Self::Temporary(name.into())
    }

    /// Creates a literal path, picking `Absolute` or `Relative` by its shape.
    pub fn literal(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        if path.is_absolute() {
            Self::Absolute(path)
        } else {
            Self::Relative(path)
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The unresolved text of the path.
    pub fn name(&self) -> &Utf8Path {
        match self {
            Self::Temporary(path) | Self::Relative(path) | Self::Absolute(path) => path,
        }
    }
}

impl Display for VirtualPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name().as_str())
    }
}

/// The kind of content a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    Source,
    Object,
    Executable,
    DynamicLibrary,
    StaticLibrary,
    Module,
    ModuleDoc,
    Dependencies,
    Response,
    Pch,
    Diagnostics,
    Other,
}

/// A path together with the type of file it points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypedPath {
    pub file: VirtualPath,
    #[serde(rename = "type")]
    pub kind: FileType,
}

impl TypedPath {
    pub fn new(file: VirtualPath, kind: FileType) -> Self {
        Self { file, kind }
    }
}

impl Display for TypedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.file.fmt(f)
    }
}

/// One element of a job's command-line template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// A literal string passed through untouched.
    Flag(String),
    /// A path resolved by the resolver.
    Path(VirtualPath),
    /// An option glued to a resolved path, e.g. `-o=` and `a.o` become `-o=/tmp/x/a.o`.
    JoinedOptionAndPath { option: String, path: VirtualPath },
}

impl Arg {
    pub fn flag(flag: impl Into<String>) -> Self {
        Self::Flag(flag.into())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Flag(value.to_string())
    }
}

impl From<VirtualPath> for Arg {
    fn from(value: VirtualPath) -> Self {
        Self::Path(value)
    }
}

/// What the job does, used for descriptions and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Compile,
    Link,
    MergeModule,
    EmitModule,
    GeneratePch,
    AutolinkExtract,
    GenerateDsym,
    VerifyDebugInfo,
    Interpret,
    #[default]
    Other,
}

impl JobKind {
    fn verb(self) -> &'static str {
        match self {
            JobKind::Compile => "Compiling",
            JobKind::Link => "Linking",
            JobKind::MergeModule => "Merging module",
            JobKind::EmitModule => "Emitting module for",
            JobKind::GeneratePch => "Compiling bridging header",
            JobKind::AutolinkExtract => "Extracting autolink information for",
            JobKind::GenerateDsym => "Generating dSYM for",
            JobKind::VerifyDebugInfo => "Verifying debug info for",
            JobKind::Interpret => "Interpreting",
            JobKind::Other => "Running",
        }
    }
}

/// A single external tool invocation.
///
/// Jobs are immutable once constructed. Their identity is a content hash of
/// every field, see [`Job::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub kind: JobKind,
    pub tool: Utf8PathBuf,
    #[serde(default)]
    pub command_line: Vec<Arg>,
    #[serde(default)]
    pub inputs: Vec<TypedPath>,
    #[serde(default)]
    pub outputs: Vec<TypedPath>,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
    #[serde(default)]
    pub supports_response_files: bool,
}

impl Job {
    pub fn new(kind: JobKind, tool: impl Into<Utf8PathBuf>) -> Self {
        Self {
            kind,
            tool: tool.into(),
            command_line: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            extra_env: BTreeMap::new(),
            supports_response_files: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.command_line.push(arg.into());
        self
    }

    pub fn args<A: Into<Arg>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.command_line.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, file: VirtualPath, kind: FileType) -> Self {
        self.inputs.push(TypedPath::new(file, kind));
        self
    }

    pub fn output(mut self, file: VirtualPath, kind: FileType) -> Self {
        self.outputs.push(TypedPath::new(file, kind));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn with_response_files(mut self, supported: bool) -> Self {
        self.supports_response_files = supported;
        self
    }

    /// Stable identity of this job, a BLAKE3 hash over all of its fields.
    pub fn identity(&self) -> Hash32 {
        Hash32::of(self)
    }

    /// Short human readable summary, e.g. `Compiling a.c, b.c`.
    pub fn description(&self) -> String {
        let names = match self.kind {
            JobKind::Link | JobKind::GenerateDsym | JobKind::MergeModule => &self.outputs,
            _ if self.inputs.is_empty() => &self.outputs,
            _ => &self.inputs,
        };

        if names.is_empty() {
            return format!("{} {}", self.kind.verb(), self.tool);
        }

        let names = names
            .iter()
            .map(|path| path.file.name().file_name().unwrap_or(path.file.name().as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        format!("{} {}", self.kind.verb(), names)
    }
}
