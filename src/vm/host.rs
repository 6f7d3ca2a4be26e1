//! The VM's view of the outside world: a console and a file system.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Write};
use std::rc::Rc;

/// Line-oriented prompt input and print output.
pub struct Console {
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl Console {
    pub fn new(input: impl BufRead + 'static, output: impl Write + 'static) -> Self {
        Console { input: Box::new(input), output: Box::new(output) }
    }

    pub fn stdio() -> Self {
        Console::new(io::stdin().lock(), io::stdout())
    }

    /// No input, output discarded. Printed lines are still collected in `Execution`.
    pub fn empty() -> Self {
        Console::new(io::empty(), io::sink())
    }

    /// One line without its terminator, or `None` at end of input.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        read_line(&mut *self.input)
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.output, "{}", line)?;
        self.output.flush()
    }
}

pub(crate) fn read_line(input: &mut dyn BufRead) -> io::Result<Option<String>> {
    let mut buf = String::new();
    if input.read_line(&mut buf)? == 0 {
        return Ok(None);
    }
    if buf.ends_with('\n') {
        buf.pop();
        if buf.ends_with('\r') {
            buf.pop();
        }
    }
    Ok(Some(buf))
}

pub trait FileSystem {
    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn BufRead>>;
    fn open_write(&mut self, path: &str) -> io::Result<Box<dyn Write>>;
}

/// Real files, paths relative to the working directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn BufRead>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn open_write(&mut self, path: &str) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

/// Files held in memory. Clones share the same files, so a host can keep
/// one handle and inspect what a program wrote.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileSystem {
    files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files.borrow_mut().insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl FileSystem for MemoryFileSystem {
    fn open_read(&mut self, path: &str) -> io::Result<Box<dyn BufRead>> {
        match self.files.borrow().get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))),
        }
    }

    fn open_write(&mut self, path: &str) -> io::Result<Box<dyn Write>> {
        self.files.borrow_mut().insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryWriter { files: Rc::clone(&self.files), path: path.to_string() }))
    }
}

struct MemoryWriter {
    files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    path: String,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files.borrow_mut().entry(self.path.clone()).or_default().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_files_are_shared_between_clones() {
        let fs = MemoryFileSystem::new();
        let mut writer_side = fs.clone();
        let mut w = writer_side.open_write("out.txt").unwrap();
        writeln!(w, "hit").unwrap();
        assert_eq!(fs.contents("out.txt").as_deref(), Some("hit\n"));
    }

    #[test]
    fn missing_memory_file_is_not_found() {
        let mut fs = MemoryFileSystem::new();
        let err = fs.open_read("nope").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn read_line_strips_terminators() {
        let mut input = Cursor::new(b"a\r\nb\n".to_vec());
        assert_eq!(read_line(&mut input).unwrap().as_deref(), Some("a"));
        assert_eq!(read_line(&mut input).unwrap().as_deref(), Some("b"));
        assert_eq!(read_line(&mut input).unwrap(), None);
    }
}
