//! Asset registry
//!
//! [`Assets`] merges its sources into one case-insensitive virtual
//! filesystem and serves typed, cached assets out of it:
//! - Later sources override earlier ones file by file
//! - `.patch`, `.patch.N`, `.patch.lua` and `.patchlist` files compose
//!   patches onto their targets
//! - Load scripts declared in source metadata may add, patch or erase files
//! - A SHA-256 digest over paths and sizes identifies the asset set
//!
//! Blocking getters load on the calling thread. The `try_*` getters queue
//! work for the background worker pool and return `None` until ready.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};
use sha2::{Digest, Sha256};
use star_core::{DataWriter, Json, JsonObject};

use crate::assets::{AssetData, AssetId, AssetType, Font};
use crate::audio::{Audio, AudioDecoder};
use crate::error::{AssetError, AssetResult};
use crate::frames::FramesSpecification;
use crate::image::Image;
use crate::loader::{self, CacheState};
use crate::path::{extension, AssetPath};
use crate::scripts;
use crate::settings::{AssetsSettings, IgnoreList};
use crate::source::{AssetSource, DirectorySource, PackedSource};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Where a registry source comes from
#[derive(Clone)]
pub enum SourceLocation {
    /// A directory or packed file, reopened on every reload
    Path(PathBuf),
    /// A source object kept as is across reloads
    Source(Arc<dyn AssetSource>),
}

impl SourceLocation {
    fn open(&self) -> AssetResult<Arc<dyn AssetSource>> {
        match self {
            SourceLocation::Path(path) if path.is_dir() => Ok(Arc::new(DirectorySource::new(path)?)),
            SourceLocation::Path(path) => Ok(Arc::new(PackedSource::new(path)?)),
            SourceLocation::Source(source) => Ok(source.clone()),
        }
    }
}

impl From<PathBuf> for SourceLocation {
    fn from(path: PathBuf) -> Self {
        SourceLocation::Path(path)
    }
}

impl From<&Path> for SourceLocation {
    fn from(path: &Path) -> Self {
        SourceLocation::Path(path.to_path_buf())
    }
}

impl From<Arc<dyn AssetSource>> for SourceLocation {
    fn from(source: Arc<dyn AssetSource>) -> Self {
        SourceLocation::Source(source)
    }
}

pub(crate) struct SourceEntry {
    pub name: String,
    pub source: Arc<dyn AssetSource>,
}

/// Where a virtual file lives and what is patched onto it
#[derive(Debug, Clone)]
pub(crate) struct FileDescriptor {
    /// Path with the case the providing source uses
    pub source_name: String,
    pub source: usize,
    /// Patch paths with the index of the source holding each, in order
    pub patches: Vec<(String, usize)>,
}

/// A descriptor with its sources looked up
pub(crate) struct ResolvedFile {
    pub path: String,
    pub source: Arc<dyn AssetSource>,
    pub patches: Vec<ResolvedPatch>,
}

pub(crate) struct ResolvedPatch {
    pub path: String,
    pub source_index: usize,
    pub source: Arc<dyn AssetSource>,
}

impl ResolvedFile {
    pub fn read(&self) -> AssetResult<Vec<u8>> {
        self.source.read(&self.path)
    }
}

/// The merged virtual filesystem
#[derive(Default)]
pub(crate) struct FileTables {
    pub sources: Vec<SourceEntry>,
    /// Keyed by lowercased path
    pub files: HashMap<String, FileDescriptor>,
    /// Lowercased extension to lowercased paths
    pub by_extension: HashMap<String, BTreeSet<String>>,
    pub digest: Vec<u8>,
}

/// Target of a patch file, or `None` when `path` is not one
pub(crate) fn patch_target(path: &str) -> Option<&str> {
    let lower = path.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let strip = if lower.ends_with(".patch") {
        6
    } else if lower.ends_with(".patch.lua") {
        10
    } else if lower.len() > 8
        && bytes[bytes.len() - 1].is_ascii_digit()
        && bytes[bytes.len() - 2] == b'.'
        && lower[..lower.len() - 2].ends_with(".patch")
    {
        8
    } else {
        return None;
    };
    Some(&path[..path.len() - strip])
}

impl FileTables {
    pub fn push_source(&mut self, source: Arc<dyn AssetSource>) -> usize {
        self.sources.push(SourceEntry {
            name: source.name().to_string(),
            source,
        });
        self.sources.len() - 1
    }

    /// Register every file of the source at `index`
    pub fn add_source_files(&mut self, index: usize, path_ignore: &IgnoreList) {
        let source = self.sources[index].source.clone();
        let mut patches = Vec::new();
        let mut patch_lists = Vec::new();

        for path in source.asset_paths() {
            if path_ignore.matches(&path) {
                log::debug!("Ignoring asset file {}", path);
                continue;
            }
            if let Some(target) = patch_target(&path) {
                patches.push((target.to_string(), path.clone()));
            } else if extension(&path).as_deref() == Some("patchlist") {
                patch_lists.push(path);
            } else {
                self.set_file(&path, index);
            }
        }

        // `.patch` before `.patch.0` .. `.patch.9`
        patches.sort_by(|a, b| a.1.cmp(&b.1));
        for (target, patch) in patches {
            self.add_patch(&target, patch, index);
        }
        for list in patch_lists {
            if let Err(e) = self.add_patch_list(&source, &list, index) {
                log::warn!("Could not read patch list '{}': {}", list, e);
            }
        }
    }

    /// Point `path` at `source`, keeping any patches already collected
    pub fn set_file(&mut self, path: &str, source: usize) {
        let key = path.to_ascii_lowercase();
        let descriptor = self.files.entry(key.clone()).or_insert_with(|| FileDescriptor {
            source_name: path.to_string(),
            source,
            patches: Vec::new(),
        });
        descriptor.source_name = path.to_string();
        descriptor.source = source;
        self.by_extension
            .entry(extension(path).unwrap_or_default())
            .or_default()
            .insert(key);
    }

    pub fn add_patch(&mut self, target: &str, patch: String, source: usize) -> bool {
        match self.files.get_mut(&target.to_ascii_lowercase()) {
            Some(descriptor) => {
                descriptor.patches.push((patch, source));
                true
            }
            None => {
                log::warn!("Asset patch '{}' has no target '{}'", patch, target);
                false
            }
        }
    }

    /// `[{"paths": [...], "patches": [...]}]`; patch paths are relative to
    /// the list file
    fn add_patch_list(&mut self, source: &Arc<dyn AssetSource>, list_path: &str, index: usize) -> AssetResult<()> {
        let config: Json = serde_json::from_slice(&source.read(list_path)?)?;
        let malformed = |reason: &str| AssetError::Malformed {
            path: list_path.to_string(),
            reason: reason.to_string(),
        };
        for entry in config.as_array().ok_or_else(|| malformed("expected an array"))? {
            let targets = entry
                .get("paths")
                .and_then(Json::as_array)
                .ok_or_else(|| malformed("entry is missing 'paths'"))?;
            let patches = entry
                .get("patches")
                .and_then(Json::as_array)
                .ok_or_else(|| malformed("entry is missing 'patches'"))?;
            for patch in patches.iter().filter_map(Json::as_str) {
                let patch_path = AssetPath::relative_to(list_path, patch);
                for target in targets.iter().filter_map(Json::as_str) {
                    self.add_patch(target, patch_path.clone(), index);
                }
            }
        }
        Ok(())
    }

    pub fn erase(&mut self, path: &str) -> bool {
        let key = path.to_ascii_lowercase();
        if self.files.remove(&key).is_none() {
            return false;
        }
        if let Some(set) = self.by_extension.get_mut(&extension(path).unwrap_or_default()) {
            set.remove(&key);
        }
        true
    }

    pub fn descriptor(&self, path: &str) -> Option<&FileDescriptor> {
        self.files.get(&path.to_ascii_lowercase())
    }

    pub fn resolve(&self, path: &str) -> AssetResult<ResolvedFile> {
        let descriptor = self
            .descriptor(path)
            .ok_or_else(|| AssetError::NotFound(path.to_string()))?;
        Ok(ResolvedFile {
            path: descriptor.source_name.clone(),
            source: self.sources[descriptor.source].source.clone(),
            patches: descriptor
                .patches
                .iter()
                .map(|(patch, index)| ResolvedPatch {
                    path: patch.clone(),
                    source_index: *index,
                    source: self.sources[*index].source.clone(),
                })
                .collect(),
        })
    }

    pub fn source_name_of(&self, path: &str) -> Option<&str> {
        self.descriptor(path).map(|d| self.sources[d.source].name.as_str())
    }

    pub fn source_by_name(&self, name: &str) -> Option<&Arc<dyn AssetSource>> {
        self.sources.iter().find(|s| s.name == name).map(|s| &s.source)
    }

    /// Source names of every file matching `filter`, sorted
    pub fn scan(&self, filter: impl Fn(&str) -> bool) -> Vec<String> {
        let mut out: Vec<String> = self
            .files
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(_, d)| d.source_name.clone())
            .collect();
        out.sort();
        out
    }

    pub fn scan_extension(&self, ext: &str) -> Vec<String> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension
            .get(&ext)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| self.files.get(k))
                    .map(|d| d.source_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// SHA-256 over every sorted lowercased path not ignored, each followed
    /// by the VLQ sizes of its base file and its patches
    pub fn compute_digest(&self, ignore: &IgnoreList) -> Vec<u8> {
        let mut keys: Vec<&String> = self.files.keys().collect();
        keys.sort();

        let mut hasher = Sha256::new();
        for key in keys {
            let descriptor = &self.files[key];
            if ignore.matches(&descriptor.source_name) {
                continue;
            }
            let mut writer = DataWriter::new();
            writer.write_raw(key.as_bytes());
            writer.write_vlq_u(self.file_size(&descriptor.source_name, descriptor.source));
            for (patch, index) in &descriptor.patches {
                writer.write_vlq_u(self.file_size(patch, *index));
            }
            hasher.update(writer.as_bytes());
        }
        hasher.finalize().to_vec()
    }

    fn file_size(&self, path: &str, source: usize) -> u64 {
        self.sources[source].source.size(path).unwrap_or_else(|e| {
            log::warn!("Could not size '{}' for the asset digest: {}", path, e);
            0
        })
    }
}

/// Shared registry state, owned by [`Assets`] and its workers
pub(crate) struct AssetsInner {
    /// Distinguishes registries in thread-local script state
    pub id: u64,
    pub weak: Weak<AssetsInner>,
    pub settings: AssetsSettings,
    locations: Vec<SourceLocation>,
    path_ignore: IgnoreList,
    digest_ignore: IgnoreList,
    pub files: RwLock<FileTables>,
    pub cache: Mutex<CacheState>,
    /// Signalled when work is queued
    pub queue_cond: Condvar,
    /// Signalled when an asset finishes loading, successfully or not
    pub done_cond: Condvar,
    pub stop: AtomicBool,
    /// Bumped whenever file contents may have changed
    pub generation: AtomicU64,
    pub audio_decoder: RwLock<Option<Arc<dyn AudioDecoder>>>,
}

/// Validate the base of `path` and build its cache key
pub(crate) fn asset_id(kind: AssetType, path: &str) -> AssetResult<AssetId> {
    let path = AssetPath::split(path);
    AssetPath::validate(&path.base_path)?;
    Ok(AssetId::new(kind, path))
}

fn wrong_kind(path: &str, kind: AssetType) -> AssetError {
    AssetError::Malformed {
        path: path.to_string(),
        reason: format!("cached asset is not {}", kind.name()),
    }
}

impl AssetsInner {
    /// Build the file tables from scratch, run load scripts, compute the
    /// digest and preload
    fn load_files(&self) -> AssetResult<()> {
        let mut tables = FileTables::default();
        for location in &self.locations {
            let source = location.open()?;
            log::info!("Loading assets from: '{}'", source.name());
            let index = tables.push_source(source);
            tables.add_source_files(index, &self.path_ignore);
        }
        let originals: Vec<(String, JsonObject)> = tables
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.source.metadata()))
            .collect();

        *self.files.write() = tables;
        self.clear_cache();

        for stage in ["onLoad", "postLoad"] {
            for (name, metadata) in &originals {
                scripts::run_load_scripts(self, name, metadata, stage);
            }
        }
        // Load scripts may have read files they then replaced
        self.clear_cache();

        let digest = self.files.read().compute_digest(&self.digest_ignore);
        log::info!("Asset digest: {}", hex(&digest));
        self.files.write().digest = digest;

        self.preload();
        Ok(())
    }

    fn preload(&self) {
        if !self.exists("/preload.config") {
            return;
        }
        let config = match self.json("/preload.config") {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Could not read preload list: {}", e);
                return;
            }
        };
        for entry in config.as_array().into_iter().flatten() {
            let kind = entry.get("type").and_then(Json::as_str).and_then(AssetType::from_name);
            let path = entry.get("path").and_then(Json::as_str);
            let (Some(kind), Some(path)) = (kind, path) else {
                log::warn!("Bad preload entry {}", entry);
                continue;
            };
            let result = asset_id(kind, path).and_then(|id| self.get_asset(&id).map(|_| id));
            match result {
                Ok(id) => {
                    if let Some(entry) = self.cache.lock().assets.get_mut(&id) {
                        entry.force_persist = true;
                    }
                }
                Err(e) => log::warn!("Could not preload {} '{}': {}", kind.name(), path, e),
            }
        }
    }

    /// Bumps the generation before unlocking, so a load that unlocked
    /// before the clear sees it on relocking
    pub fn clear_cache(&self) {
        let mut state = self.cache.lock();
        state.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn exists(&self, path: &str) -> bool {
        let base = AssetPath::split(path).base_path;
        self.files.read().descriptor(&base).is_some()
    }

    pub fn resolve(&self, path: &str) -> AssetResult<ResolvedFile> {
        self.files.read().resolve(path)
    }

    /// Unpatched bytes of a file
    pub fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        AssetPath::validate(path)?;
        self.resolve(path)?.read()
    }

    fn typed<T>(&self, kind: AssetType, path: &str, extract: fn(AssetData) -> Option<T>) -> AssetResult<T> {
        let data = self.get_asset(&asset_id(kind, path)?)?;
        extract(data).ok_or_else(|| wrong_kind(path, kind))
    }

    fn try_typed<T>(&self, kind: AssetType, path: &str, extract: fn(AssetData) -> Option<T>) -> AssetResult<Option<T>> {
        match self.try_asset(&asset_id(kind, path)?)? {
            Some(data) => extract(data).map(Some).ok_or_else(|| wrong_kind(path, kind)),
            None => Ok(None),
        }
    }

    pub fn json(&self, path: &str) -> AssetResult<Arc<Json>> {
        self.typed(AssetType::Json, path, AssetData::into_json)
    }

    pub fn image(&self, path: &str) -> AssetResult<Arc<Image>> {
        self.typed(AssetType::Image, path, AssetData::into_image)
    }

    pub fn bytes(&self, path: &str) -> AssetResult<Arc<Vec<u8>>> {
        self.typed(AssetType::Bytes, path, AssetData::into_bytes)
    }

    pub fn frames(&self, image_path: &str) -> AssetResult<Option<Arc<FramesSpecification>>> {
        let path = AssetPath::split(image_path);
        AssetPath::validate(&path.base_path)?;
        let mut state = self.cache.lock();
        self.best_frames(&mut state, &path.base_path)
    }

    pub fn scan(&self, prefix: &str, suffix: &str) -> Vec<String> {
        let prefix = prefix.to_ascii_lowercase();
        let suffix = suffix.to_ascii_lowercase();
        self.files
            .read()
            .scan(|key| key.starts_with(&prefix) && key.ends_with(&suffix))
    }

    pub fn scan_extension(&self, ext: &str) -> Vec<String> {
        self.files.read().scan_extension(ext)
    }

    pub fn source_names(&self) -> Vec<String> {
        self.files.read().sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn source_metadata(&self, name: &str) -> Option<JsonObject> {
        self.files.read().source_by_name(name).map(|s| s.metadata())
    }

    pub fn asset_source(&self, path: &str) -> Option<String> {
        let base = AssetPath::split(path).base_path;
        self.files.read().source_name_of(&base).map(str::to_string)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// The asset registry
pub struct Assets {
    inner: Arc<AssetsInner>,
    workers: Vec<JoinHandle<()>>,
}

impl Assets {
    /// Open `sources` in order and start the worker pool
    pub fn new<I, L>(settings: AssetsSettings, sources: I) -> AssetResult<Self>
    where
        I: IntoIterator<Item = L>,
        L: Into<SourceLocation>,
    {
        let path_ignore = IgnoreList::new(&settings.path_ignore)?;
        let digest_ignore = IgnoreList::new(&settings.digest_ignore)?;
        let locations: Vec<SourceLocation> = sources.into_iter().map(Into::into).collect();
        let inner = Arc::new_cyclic(|weak| AssetsInner {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            weak: weak.clone(),
            settings,
            locations,
            path_ignore,
            digest_ignore,
            files: RwLock::new(FileTables::default()),
            cache: Mutex::new(CacheState::default()),
            queue_cond: Condvar::new(),
            done_cond: Condvar::new(),
            stop: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            audio_decoder: RwLock::new(None),
        });

        inner.load_files()?;

        let mut workers = Vec::with_capacity(inner.settings.worker_pool_size);
        for index in 0..inner.settings.worker_pool_size {
            let worker_inner = inner.clone();
            let handle = thread::Builder::new()
                .name(format!("asset-worker-{}", index))
                .spawn(move || loader::worker_main(worker_inner, index))?;
            workers.push(handle);
        }

        Ok(Self { inner, workers })
    }

    pub fn settings(&self) -> &AssetsSettings {
        &self.inner.settings
    }

    /// Digest of the asset set; equal digests mean equal path and size sets
    pub fn digest(&self) -> Vec<u8> {
        self.inner.files.read().digest.clone()
    }

    pub fn digest_hex(&self) -> String {
        hex(&self.digest())
    }

    /// Whether the base of `path` names a file
    pub fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    /// Name of the source providing `path`
    pub fn asset_source(&self, path: &str) -> Option<String> {
        self.inner.asset_source(path)
    }

    /// Names of every source in load order, memory sources included
    pub fn asset_sources(&self) -> Vec<String> {
        self.inner.source_names()
    }

    pub fn source_metadata(&self, source_name: &str) -> Option<JsonObject> {
        self.inner.source_metadata(source_name)
    }

    /// Directories among the configured sources, for change watching
    pub fn directory_sources(&self) -> Vec<PathBuf> {
        self.inner
            .locations
            .iter()
            .filter_map(|l| match l {
                SourceLocation::Path(p) if p.is_dir() => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    /// Paths ending with `suffix`, case-insensitively, sorted
    pub fn scan(&self, suffix: &str) -> Vec<String> {
        self.inner.scan("", suffix)
    }

    /// Paths starting with `prefix` and ending with `suffix`
    pub fn scan_prefix(&self, prefix: &str, suffix: &str) -> Vec<String> {
        self.inner.scan(prefix, suffix)
    }

    pub fn scan_extension(&self, ext: &str) -> Vec<String> {
        self.inner.scan_extension(ext)
    }

    /// Raw bytes of a file with no patches applied
    pub fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        self.inner.read(path)
    }

    pub fn json(&self, path: &str) -> AssetResult<Arc<Json>> {
        self.inner.json(path)
    }

    pub fn try_json(&self, path: &str) -> AssetResult<Option<Arc<Json>>> {
        self.inner.try_typed(AssetType::Json, path, AssetData::into_json)
    }

    /// A JSON value that is either inline or a path to load relative to
    /// `dir`
    pub fn fetch_json(&self, value: &Json, dir: &str) -> AssetResult<Json> {
        match value {
            Json::String(path) => Ok((*self.json(&AssetPath::relative_to(dir, path))?).clone()),
            other => Ok(other.clone()),
        }
    }

    pub fn image(&self, path: &str) -> AssetResult<Arc<Image>> {
        self.inner.image(path)
    }

    pub fn try_image(&self, path: &str) -> AssetResult<Option<Arc<Image>>> {
        self.inner.try_typed(AssetType::Image, path, AssetData::into_image)
    }

    pub fn image_size(&self, path: &str) -> AssetResult<(u32, u32)> {
        Ok(self.image(path)?.size())
    }

    /// The frames specification that applies to an image, if any
    pub fn frames(&self, image_path: &str) -> AssetResult<Option<Arc<FramesSpecification>>> {
        self.inner.frames(image_path)
    }

    pub fn audio(&self, path: &str) -> AssetResult<Arc<Audio>> {
        self.inner.typed(AssetType::Audio, path, AssetData::into_audio)
    }

    pub fn try_audio(&self, path: &str) -> AssetResult<Option<Arc<Audio>>> {
        self.inner.try_typed(AssetType::Audio, path, AssetData::into_audio)
    }

    pub fn font(&self, path: &str) -> AssetResult<Arc<Font>> {
        self.inner.typed(AssetType::Font, path, AssetData::into_font)
    }

    pub fn bytes(&self, path: &str) -> AssetResult<Arc<Vec<u8>>> {
        self.inner.bytes(path)
    }

    /// Queue assets for background loading
    pub fn queue(&self, kind: AssetType, paths: &[&str]) -> AssetResult<()> {
        for path in paths {
            self.inner.try_asset(&asset_id(kind, path)?).ok();
        }
        Ok(())
    }

    /// Whether an asset, loaded or failed, is in the cache
    pub fn is_cached(&self, kind: AssetType, path: &str) -> bool {
        match asset_id(kind, path) {
            Ok(id) => self.inner.cache.lock().assets.contains_key(&id),
            Err(_) => false,
        }
    }

    /// Register the mixer's decoder for compressed audio
    pub fn set_audio_decoder(&self, decoder: Arc<dyn AudioDecoder>) {
        *self.inner.audio_decoder.write() = Some(decoder);
    }

    /// Drop every cached asset, failures included
    pub fn clear_cache(&self) {
        self.inner.clear_cache();
    }

    /// Evict assets unused for longer than the time to live
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Reopen every source, rebuild the file tables and clear the cache
    pub fn hot_reload(&self) -> AssetResult<()> {
        log::info!("Reloading assets");
        self.inner.load_files()
    }
}

impl Drop for Assets {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Release);
        self.inner.queue_cond.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Asset worker panicked");
            }
        }
        scripts::forget_thread_state(self.inner.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_targets() {
        assert_eq!(patch_target("/a.json.patch"), Some("/a.json"));
        assert_eq!(patch_target("/a.json.PATCH.3"), Some("/a.json"));
        assert_eq!(patch_target("/a.json.patch.lua"), Some("/a.json"));
        assert_eq!(patch_target("/a.json"), None);
        assert_eq!(patch_target("/a.json.patch.x"), None);
        assert_eq!(patch_target("/a.lua"), None);
    }
}
