//! Scoped temporary file/directory acquisition, tracked so the engine can
//! release anything left outstanding on `dispose()`.

use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};

#[derive(Default, Clone)]
pub struct TempFileOptions {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub dir: Option<std::path::PathBuf>,
}

/// A tracked temp-file handle. The underlying file is removed when the
/// last clone of this handle is dropped, or eagerly via `close`.
#[derive(Clone)]
pub struct TempFileHandle {
    inner: Arc<NamedTempFile>,
}

impl TempFileHandle {
    pub fn path(&self) -> &std::path::Path {
        self.inner.path()
    }
}

#[derive(Clone)]
pub struct TempDirHandle {
    inner: Arc<TempDir>,
}

impl TempDirHandle {
    pub fn path(&self) -> &std::path::Path {
        self.inner.path()
    }
}

/// Registry of outstanding temp resources for a single `Engine`, so
/// `Engine::dispose` can release anything a caller forgot to.
#[derive(Clone, Default)]
pub struct TempRegistry {
    files: Arc<std::sync::Mutex<Vec<TempFileHandle>>>,
    dirs: Arc<std::sync::Mutex<Vec<TempDirHandle>>>,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp_file(&self, opts: TempFileOptions) -> std::io::Result<TempFileHandle> {
        let mut builder = tempfile::Builder::new();
        if let Some(prefix) = &opts.prefix {
            builder.prefix(prefix);
        }
        if let Some(suffix) = &opts.suffix {
            builder.suffix(suffix);
        }
        let file = match &opts.dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let handle = TempFileHandle {
            inner: Arc::new(file),
        };
        self.files.lock().expect("temp registry poisoned").push(handle.clone());
        Ok(handle)
    }

    pub fn temp_dir(&self, opts: TempFileOptions) -> std::io::Result<TempDirHandle> {
        let mut builder = tempfile::Builder::new();
        if let Some(prefix) = &opts.prefix {
            builder.prefix(prefix);
        }
        let dir = match &opts.dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let handle = TempDirHandle {
            inner: Arc::new(dir),
        };
        self.dirs.lock().expect("temp registry poisoned").push(handle.clone());
        Ok(handle)
    }

    /// Runs `f` with a scoped temp file, releasing it (modulo other
    /// outstanding clones) once `f` returns, on any exit path.
    pub async fn with_temp_file<F, Fut, T>(&self, opts: TempFileOptions, f: F) -> std::io::Result<T>
    where
        F: FnOnce(TempFileHandle) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let handle = self.temp_file(opts)?;
        let result = f(handle.clone()).await;
        self.drop_file(&handle);
        Ok(result)
    }

    pub async fn with_temp_dir<F, Fut, T>(&self, opts: TempFileOptions, f: F) -> std::io::Result<T>
    where
        F: FnOnce(TempDirHandle) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let handle = self.temp_dir(opts)?;
        let result = f(handle.clone()).await;
        self.drop_dir(&handle);
        Ok(result)
    }

    fn drop_file(&self, handle: &TempFileHandle) {
        self.files
            .lock()
            .expect("temp registry poisoned")
            .retain(|h| !Arc::ptr_eq(&h.inner, &handle.inner));
    }

    fn drop_dir(&self, handle: &TempDirHandle) {
        self.dirs
            .lock()
            .expect("temp registry poisoned")
            .retain(|h| !Arc::ptr_eq(&h.inner, &handle.inner));
    }

    /// Releases every tracked resource. Idempotent.
    pub fn dispose_all(&self) {
        self.files.lock().expect("temp registry poisoned").clear();
        self.dirs.lock().expect("temp registry poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn temp_file_removed_after_scope() {
        let registry = TempRegistry::new();
        let mut observed_path = None;
        registry
            .with_temp_file(TempFileOptions::default(), |handle| {
                observed_path = Some(handle.path().to_path_buf());
                async move { handle.path().exists() }
            })
            .await
            .unwrap();
        let path = observed_path.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn dispose_all_clears_registry() {
        let registry = TempRegistry::new();
        registry.temp_file(TempFileOptions::default()).unwrap();
        registry.temp_dir(TempFileOptions::default()).unwrap();
        registry.dispose_all();
    }
}
