//! Filesystem access and the pre-run modification snapshot.

use std::collections::{HashMap, HashSet};
use std::io;
use std::time::SystemTime;

use camino::Utf8Path;

use crate::job::{Job, TypedPath, VirtualPath};
use crate::resolver::ArgsResolver;

/// The filesystem queries the executor needs.
pub trait FileSystem: Send + Sync {
    fn modification_time(&self, path: &Utf8Path) -> io::Result<SystemTime>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn modification_time(&self, path: &Utf8Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// Modification times of job inputs, recorded once before the run starts.
///
/// The snapshot is never updated during a run. A job whose input changed on
/// disk after it was taken fails instead of compiling a file that someone is
/// still editing.
#[derive(Debug, Default, Clone)]
pub struct ModificationSnapshot {
    times: HashMap<TypedPath, SystemTime>,
}

impl ModificationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current modification time of every input that is not
    /// produced by another job and currently exists on disk.
    ///
    /// Temporary inputs are always produced within the run, so they are
    /// skipped as well. Paths are resolved through `resolver`, the same way
    /// they are resolved when the inputs are checked again before a launch.
    pub fn capture(jobs: &[Job], fs: &dyn FileSystem, resolver: &ArgsResolver) -> Self {
        let produced: HashSet<&VirtualPath> = jobs
            .iter()
            .flat_map(|job| job.outputs.iter().map(|output| &output.file))
            .collect();
        let mut times = HashMap::new();

        for input in jobs.iter().flat_map(|job| job.inputs.iter()) {
            if input.file.is_temporary() || produced.contains(&input.file) {
                continue;
            }
            if times.contains_key(input) {
                continue;
            }
            match fs.modification_time(&resolver.resolve_path(&input.file)) {
                Ok(time) => {
                    times.insert(input.clone(), time);
                }
                Err(err) => tracing::debug!("not recording '{}': {err}", input.file),
            }
        }

        Self { times }
    }

    pub fn insert(&mut self, path: TypedPath, time: SystemTime) {
        self.times.insert(path, time);
    }

    pub fn get(&self, path: &TypedPath) -> Option<SystemTime> {
        self.times.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl FromIterator<(TypedPath, SystemTime)> for ModificationSnapshot {
    fn from_iter<I: IntoIterator<Item = (TypedPath, SystemTime)>>(iter: I) -> Self {
        Self {
            times: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FileType, JobKind};

    #[test]
    fn test_capture_skips_produced_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let source = root.join("a.c");
        std::fs::write(&source, "int main(void) { return 0; }").unwrap();

        let jobs = vec![
            Job::new(JobKind::Compile, "cc")
                .input(VirtualPath::literal(&source), FileType::Source)
                .input(VirtualPath::literal(root.join("missing.h")), FileType::Source)
                .output(VirtualPath::literal(root.join("a.o")), FileType::Object),
            Job::new(JobKind::Link, "ld")
                .input(VirtualPath::literal(root.join("a.o")), FileType::Object)
                .input(VirtualPath::temporary("b.o"), FileType::Object)
                .output(VirtualPath::literal(root.join("app")), FileType::Executable),
        ];

        let resolver = ArgsResolver::new(HashMap::new()).unwrap();
        let snapshot = ModificationSnapshot::capture(&jobs, &LocalFileSystem, &resolver);
        resolver.teardown().unwrap();

        assert_eq!(snapshot.len(), 1);
        let recorded = snapshot
            .get(&TypedPath::new(VirtualPath::literal(&source), FileType::Source))
            .unwrap();
        assert_eq!(recorded, std::fs::metadata(&source).unwrap().modified().unwrap());
    }

    #[test]
    fn test_capture_follows_path_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let real = root.join("real.c");
        std::fs::write(&real, "int x;").unwrap();

        let input = TypedPath::new(VirtualPath::literal("a.c"), FileType::Source);
        let jobs = vec![Job::new(JobKind::Compile, "cc").input(input.file.clone(), input.kind)];

        let mapping = HashMap::from([(input.file.clone(), real.clone())]);
        let resolver = ArgsResolver::new(mapping).unwrap();
        let snapshot = ModificationSnapshot::capture(&jobs, &LocalFileSystem, &resolver);
        resolver.teardown().unwrap();

        assert_eq!(
            snapshot.get(&input),
            Some(std::fs::metadata(&real).unwrap().modified().unwrap())
        );
    }
}
