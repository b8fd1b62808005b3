//! `fs.readFile` / `fs.writeFile` as staged operations
//!
//! Each operation is split into deferred stages (open, then read or write
//! and close). Stages run on the loop thread in later passes, so the
//! calling script returns immediately and a queued stage can still be
//! cancelled with [`Runtime::cancel_task`].

use super::async_io::{AsyncFile, TaskId};
use super::{AsyncTask, CallbackRef, Runtime, Value};
use log::{debug, trace};
use std::path::PathBuf;

impl Runtime {
    /// Read the whole file at `path`; calls back with `(err, contents)`
    pub fn read_file(&self, path: impl Into<PathBuf>, callback: CallbackRef) -> TaskId {
        let path = path.into();
        let task = AsyncTask::new(self.pin(callback));
        let id = task.id();
        trace!("readFile {} queued as task {}", path.display(), id.0);
        self.defer(id, move |rt| open_for_read(rt, path, task));
        id
    }

    /// Create or truncate `path` and write `contents`; calls back with `(err)`
    pub fn write_file(
        &self,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
        callback: CallbackRef,
    ) -> TaskId {
        let path = path.into();
        let mut task = AsyncTask::new(self.pin(callback));
        let buffer = task.hold(contents.into());
        let id = task.id();
        trace!("writeFile {} queued as task {}", path.display(), id.0);
        self.defer(id, move |rt| open_for_write(rt, path, task, buffer));
        id
    }
}

fn open_for_read(rt: &Runtime, path: PathBuf, task: AsyncTask) {
    match AsyncFile::open_read(&path) {
        Ok(file) => {
            let id = task.id();
            rt.defer(id, move |_| read_and_close(path, file, task));
        }
        Err(e) => {
            debug!("readFile {}: {}", path.display(), e);
            task.complete_with(Err(e.to_string()));
        }
    }
}

fn read_and_close(path: PathBuf, mut file: AsyncFile, task: AsyncTask) {
    let result = file.read_to_end().and_then(|contents| {
        file.close()?;
        Ok(contents)
    });
    match result {
        Ok(contents) => {
            let text = String::from_utf8(contents)
                .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
            task.complete_with(Ok(Value::String(text)));
        }
        Err(e) => {
            debug!("readFile {}: {}", path.display(), e);
            task.complete_with(Err(e.to_string()));
        }
    }
}

fn open_for_write(rt: &Runtime, path: PathBuf, task: AsyncTask, buffer: usize) {
    match AsyncFile::create(&path) {
        Ok(file) => {
            let id = task.id();
            rt.defer(id, move |_| write_and_close(path, file, task, buffer));
        }
        Err(e) => {
            debug!("writeFile {}: {}", path.display(), e);
            task.complete_unit(Err(e.to_string()));
        }
    }
}

fn write_and_close(path: PathBuf, mut file: AsyncFile, task: AsyncTask, buffer: usize) {
    let contents = task.buffer(buffer).unwrap_or_default();
    let result = file.write_all(contents).and_then(|()| file.close());
    if let Err(e) = &result {
        debug!("writeFile {}: {}", path.display(), e);
    }
    task.complete_unit(result.map_err(|e| e.to_string()));
}
