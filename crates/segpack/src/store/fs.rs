//! Directory backed by one folder on the local filesystem.

use crate::config::PackConfig;
use crate::store::{
    BufferedInput, Directory, IndexInput, IndexOutput, Lock, RandomRead, millis_since_epoch,
    validate_name,
};
use crate::{Result, StoreError};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// A [`Directory`] over the files directly inside one folder.
///
/// Subdirectories are ignored and names containing path separators are
/// rejected, so every name maps to exactly one file in `root`.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
    config: PackConfig,
}

impl FsDirectory {
    /// Open an existing folder.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::NotFound(format!(
                "directory {} does not exist",
                root.display()
            )));
        }
        Ok(Self {
            root,
            config: PackConfig::default(),
        })
    }

    /// Open a folder, creating it (and its parents) if needed.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Self::open(root)
    }

    /// Use `config` for inputs opened from this directory.
    #[must_use]
    pub fn with_config(mut self, config: PackConfig) -> Self {
        self.config = config;
        self
    }

    /// The folder this directory maps onto.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::InvalidArgument(format!(
                "{name} is not a plain file name"
            )));
        }
        Ok(self.root.join(name))
    }
}

/// Turn a missing-file I/O error into [`StoreError::NotFound`].
fn missing(name: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(name.to_string())
        } else {
            StoreError::Io(e)
        }
    }
}

impl Directory for FsDirectory {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).is_ok_and(|path| path.is_file())
    }

    fn file_modified(&self, name: &str) -> Result<u64> {
        let path = self.path_of(name)?;
        let modified = fs::metadata(&path).map_err(missing(name))?.modified()?;
        Ok(millis_since_epoch(modified))
    }

    fn touch_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(missing(name))?;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(missing(name))
    }

    fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let source = self.path_of(from)?;
        let target = self.path_of(to)?;
        fs::rename(&source, &target).map_err(missing(from))?;
        debug!("Renamed {} to {} in {}", from, to, self.root.display());
        Ok(())
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        let path = self.path_of(name)?;
        Ok(fs::metadata(&path).map_err(missing(name))?.len())
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        let path = self.path_of(name)?;
        let file = File::open(&path).map_err(missing(name))?;
        let length = file.metadata()?.len();
        let source = FileSource::new(name, file, length);
        Ok(Box::new(BufferedInput::new(
            source,
            self.config.read_buffer_size,
        )))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let path = self.path_of(name)?;
        let file = File::create(&path)?;
        Ok(Box::new(FsOutput::new(name, file)))
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn Lock>> {
        Ok(Box::new(FsLock {
            path: self.path_of(name)?,
            held: false,
        }))
    }
}

/// Positional reads over one open file.
///
/// Clones share the file handle; each read seeks and reads under the
/// handle's mutex. Only the handle that opened the file closes it.
#[derive(Debug)]
pub struct FileSource {
    name: String,
    file: Arc<Mutex<Option<File>>>,
    length: u64,
    owner: bool,
}

impl FileSource {
    fn new(name: &str, file: File, length: u64) -> Self {
        Self {
            name: name.to_string(),
            file: Arc::new(Mutex::new(Some(file))),
            length,
            owner: true,
        }
    }
}

impl Clone for FileSource {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            file: Arc::clone(&self.file),
            length: self.length,
            owner: false,
        }
    }
}

impl RandomRead for FileSource {
    fn read_internal(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let requested = buf.len() as u64;
        if pos.saturating_add(requested) > self.length {
            return Err(StoreError::EndOfFile {
                position: pos,
                requested,
                length: self.length,
            });
        }

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| {
            StoreError::Io(io::Error::other(format!("{} is closed", self.name)))
        })?;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn close(&self) -> Result<()> {
        if self.owner {
            self.file.lock().take();
        }
        Ok(())
    }
}

/// Buffered file output that tracks its own position.
#[derive(Debug)]
pub struct FsOutput {
    name: String,
    writer: BufWriter<File>,
    position: u64,
    length: u64,
    closed: bool,
}

impl FsOutput {
    fn new(name: &str, file: File) -> Self {
        Self {
            name: name.to_string(),
            writer: BufWriter::new(file),
            position: 0,
            length: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other(format!("{} is closed", self.name)));
        }
        Ok(())
    }
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let written = self.writer.write(buf)?;
        self.position += written as u64;
        self.length = self.length.max(self.position);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.writer.flush()
    }
}

impl Seek for FsOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        self.position = self.writer.seek(pos)?;
        Ok(self.position)
    }
}

impl IndexOutput for FsOutput {
    fn file_pointer(&self) -> u64 {
        self.position
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Lock implemented as an exclusively-created marker file.
#[derive(Debug)]
struct FsLock {
    path: PathBuf,
    held: bool,
}

impl Lock for FsLock {
    fn obtain(&mut self) -> Result<bool> {
        if self.held {
            return Ok(true);
        }
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                self.held = true;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.held {
            fs::remove_file(&self.path)?;
            self.held = false;
        }
        Ok(())
    }

    fn is_locked(&self) -> Result<bool> {
        Ok(self.path.exists())
    }
}

impl Drop for FsLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_then_input() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        let mut out = dir.create_output("_1.fdt").expect("create");
        out.write_vuint(300).expect("vuint");
        out.write_long(1 << 40).expect("long");
        out.write_string("field").expect("string");
        assert_eq!(out.file_pointer(), 2 + 8 + 6);
        out.close().expect("close");

        assert!(dir.file_exists("_1.fdt"));
        assert_eq!(dir.file_length("_1.fdt").expect("length"), 16);

        let mut input = dir.open_input("_1.fdt").expect("open");
        assert_eq!(input.length(), 16);
        assert_eq!(input.read_vuint().expect("vuint"), 300);
        assert_eq!(input.read_long().expect("long"), 1 << 40);
        assert_eq!(input.read_string().expect("string"), "field");
        input.close().expect("close input");
    }

    #[test]
    fn test_output_seek_back_and_patch() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        let mut out = dir.create_output("patched").expect("create");
        out.write_long(0).expect("placeholder");
        out.write_bytes(b"payload").expect("payload");
        out.seek_to(0).expect("seek");
        out.write_long(8).expect("patch");
        assert_eq!(out.length(), 15);
        out.close().expect("close");

        let bytes = fs::read(temp_dir.path().join("patched")).expect("read file");
        assert_eq!(&bytes[..8], &8i64.to_be_bytes());
        assert_eq!(&bytes[8..], b"payload");
    }

    #[test]
    fn test_missing_files_report_not_found() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        assert!(!dir.file_exists("nope"));
        assert!(dir.open_input("nope").expect_err("missing").is_not_found());
        assert!(dir.file_length("nope").expect_err("missing").is_not_found());
        assert!(dir.delete_file("nope").expect_err("missing").is_not_found());
        assert!(dir.touch_file("nope").expect_err("missing").is_not_found());
    }

    #[test]
    fn test_path_names_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        for name in ["../escape", "a/b", "..", ""] {
            assert!(
                matches!(dir.create_output(name), Err(StoreError::InvalidArgument(_))),
                "{name:?} should be rejected"
            );
        }
        assert!(!dir.file_exists("../escape"));
    }

    #[test]
    fn test_open_requires_existing_folder() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("a").join("b");

        assert!(FsDirectory::open(&nested).is_err());
        let dir = FsDirectory::create(&nested).expect("create nested");
        assert_eq!(dir.root(), nested.as_path());
    }

    #[test]
    fn test_list_rename_delete() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");
        fs::create_dir(temp_dir.path().join("subdir")).expect("mkdir");

        for name in ["a", "b"] {
            let mut out = dir.create_output(name).expect("create");
            out.write_bytes(name.as_bytes()).expect("write");
            out.close().expect("close");
        }

        let mut names = dir.list().expect("list");
        names.sort();
        assert_eq!(names, ["a", "b"]);

        dir.rename_file("a", "b").expect("rename over existing");
        assert!(!dir.file_exists("a"));
        let mut input = dir.open_input("b").expect("open");
        assert_eq!(input.read_byte().expect("byte"), b'a');

        dir.delete_file("b").expect("delete");
        assert!(dir.list().expect("list").is_empty());
    }

    #[test]
    fn test_touch_updates_modified() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        let mut out = dir.create_output("t").expect("create");
        out.close().expect("close");

        let path = temp_dir.path().join("t");
        let old = SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&path)
            .expect("open")
            .set_modified(old)
            .expect("backdate");

        let before = dir.file_modified("t").expect("modified");
        dir.touch_file("t").expect("touch");
        let after = dir.file_modified("t").expect("modified");
        assert!(after > before);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path()).expect("open dir");

        let mut first = dir.make_lock("write.lock").expect("lock");
        let mut second = dir.make_lock("write.lock").expect("lock");

        assert!(first.obtain().expect("obtain"));
        assert!(!second.obtain().expect("obtain"));
        assert!(second.is_locked().expect("is_locked"));

        first.release().expect("release");
        assert!(!first.is_locked().expect("is_locked"));
        assert!(second.obtain().expect("obtain after release"));
        drop(second);
        assert!(!temp_dir.path().join("write.lock").exists());
    }

    #[test]
    fn test_closing_a_clone_keeps_file_open() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let dir = FsDirectory::open(temp_dir.path())
            .expect("open dir")
            .with_config(PackConfig::default().with_read_buffer_size(2));

        let mut out = dir.create_output("c").expect("create");
        out.write_bytes(b"abcdef").expect("write");
        out.close().expect("close");

        let input = dir.open_input("c").expect("open");
        let mut clone = input.clone_input();
        let mut clone_of_clone = clone.clone_input();
        clone_of_clone.close().expect("clone close is a no-op");

        let mut buf = [0u8; 6];
        clone.read_bytes(&mut buf).expect("clone read");
        assert_eq!(&buf, b"abcdef");
    }
}
