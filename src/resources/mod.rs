use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

/**
 * This module contains all logic for loading scene files and their
 * companion buffers from disk, the network or files dropped by the user.
 */
pub mod animation;
pub mod gltf;

/// File extensions the viewer treats as scene files.
pub const MODEL_EXTENSIONS: [&str; 2] = ["gltf", "glb"];

/// Asynchronous file access used by the load pipeline.
#[allow(async_fn_in_trait)]
pub trait FileSource {
    async fn load_bytes(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    async fn load_text(&self, path: &str) -> anyhow::Result<String> {
        let bytes = self.load_bytes(path).await?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Replaces the last path segment of `filename` with `sibling`.
///
/// `sibling_path("models/fox/fox.gltf", "fox.bin") == "models/fox/fox.bin"`
pub fn sibling_path(filename: &str, sibling: &str) -> String {
    match filename.rfind('/') {
        Some(idx) => format!("{}/{}", &filename[..idx], sibling),
        None => sibling.to_string(),
    }
}

pub fn is_model_filename(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_lowercase())
        .is_some_and(|extension| MODEL_EXTENSIONS.contains(&extension.as_str()))
}

#[cfg(target_arch = "wasm32")]
fn format_url(file_name: &str) -> anyhow::Result<reqwest::Url> {
    let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow::anyhow!("page has no origin"))?;
    let base = reqwest::Url::parse(&format!("{}/", origin))?;
    Ok(base.join(file_name)?)
}

/// Loads files relative to `root` on native targets and relative to the
/// page origin on the web.
#[derive(Clone, Debug)]
pub struct AssetLoader {
    root: PathBuf,
}

impl AssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new("./")
    }
}

impl FileSource for AssetLoader {
    async fn load_bytes(&self, file_name: &str) -> anyhow::Result<Vec<u8>> {
        #[cfg(target_arch = "wasm32")]
        let data = {
            let _ = &self.root;
            let url = format_url(file_name)?;
            reqwest::get(url).await?.bytes().await?.to_vec()
        };
        #[cfg(not(target_arch = "wasm32"))]
        let data = {
            let path = self.root.join(file_name);
            tokio::fs::read(&path)
                .await
                .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?
        };

        Ok(data)
    }
}

/// A file handed over by the host, e.g. via drag and drop.
#[derive(Clone, Debug)]
pub struct DroppedFile {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Shared cache of dropped files, consulted before any real file access.
#[derive(Clone, Debug, Default)]
pub struct FileCache {
    files: Arc<Mutex<HashMap<String, Arc<[u8]>>>>,
}

impl FileCache {
    pub fn insert(&self, name: impl Into<String>, contents: impl Into<Arc<[u8]>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), contents.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<[u8]>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /**
     * Stores every dropped file and returns the name of the first one that
     * looks like a scene file.
     */
    pub fn insert_dropped(&self, files: Vec<DroppedFile>) -> Option<String> {
        let model = files
            .iter()
            .find(|file| is_model_filename(&file.name))
            .map(|file| file.name.clone());
        for file in files {
            self.insert(file.name, file.contents);
        }
        model
    }
}

/// A [`FileSource`] answering from a [`FileCache`] first.
#[derive(Clone, Debug)]
pub struct CachedSource<L> {
    pub cache: FileCache,
    pub inner: L,
}

impl<L> CachedSource<L> {
    pub fn new(inner: L) -> Self {
        Self {
            cache: FileCache::default(),
            inner,
        }
    }
}

impl<L: FileSource> FileSource for CachedSource<L> {
    async fn load_bytes(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        match self.cache.get(path) {
            Some(contents) => Ok(contents.to_vec()),
            None => self.inner.load_bytes(path).await,
        }
    }
}
