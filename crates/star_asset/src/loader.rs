//! Asset loading and the cache
//!
//! Every load runs with the cache lock held except around file reads, image
//! work and scripts. An id being loaded is marked `Working` in the queue;
//! anyone else needing it waits on `done_cond` or, inside a dependent load,
//! backs off and is requeued. A load that spans a cache clear is requeued
//! rather than cached, since what it read may predate the clear.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;
use star_core::json::{json_merge_nulling, json_query};
use star_core::Json;

use crate::assets::{AssetData, AssetId, AssetType, Font};
use crate::audio::Audio;
use crate::error::{AssetError, AssetResult};
use crate::frames::{frames_candidates, FramesSpecification};
use crate::image::Image;
use crate::json_patch::{apply_patch, PatchError};
use crate::path::AssetPath;
use crate::registry::{AssetsInner, ResolvedFile, ResolvedPatch};
use crate::scripts;

/// How long a blocked getter sleeps before re-checking
const WAIT_INTERVAL: Duration = Duration::from_millis(20);
/// How long an idle worker sleeps before re-checking the stop flag
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Queue priority; higher runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum QueuePriority {
    Working,
    PostProcess,
    Load,
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    priority: QueuePriority,
    seq: u64,
}

pub(crate) struct CacheEntry {
    /// `None` records a failed load
    pub data: Option<AssetData>,
    pub time: Instant,
    pub force_persist: bool,
}

impl CacheEntry {
    fn new(data: Option<AssetData>) -> Self {
        Self {
            data,
            time: Instant::now(),
            force_persist: false,
        }
    }
}

#[derive(Default)]
pub(crate) struct CacheState {
    pub assets: HashMap<AssetId, CacheEntry>,
    queue: HashMap<AssetId, Queued>,
    next_seq: u64,
    /// Best frames file per lowercased image path
    frames: HashMap<String, Option<Arc<FramesSpecification>>>,
}

impl CacheState {
    /// Drop everything except loads in progress
    pub fn clear(&mut self) {
        self.assets.clear();
        self.frames.clear();
        self.queue.retain(|_, q| q.priority == QueuePriority::Working);
    }

    /// Queue `id` at the back for `priority`
    fn enqueue(&mut self, id: AssetId, priority: QueuePriority) {
        self.next_seq += 1;
        self.queue.insert(
            id,
            Queued {
                priority,
                seq: self.next_seq,
            },
        );
    }

    fn is_working(&self, id: &AssetId) -> bool {
        self.queue.get(id).is_some_and(|q| q.priority == QueuePriority::Working)
    }

    /// Highest priority, oldest first
    fn next_work(&self) -> Option<(AssetId, QueuePriority)> {
        self.queue
            .iter()
            .filter(|(_, q)| q.priority != QueuePriority::Working)
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(id, q)| (id.clone(), q.priority))
    }
}

type Guard<'a> = MutexGuard<'a, CacheState>;

fn unexpected(id: &AssetId, data: &AssetData) -> AssetError {
    AssetError::Malformed {
        path: id.path.join(),
        reason: format!("expected {} but found {}", id.kind.name(), data.kind().name()),
    }
}

impl AssetsInner {
    /// Block until `id` is loaded or has failed
    pub(crate) fn get_asset(&self, id: &AssetId) -> AssetResult<AssetData> {
        let mut state = self.cache.lock();
        loop {
            if state.is_working(id) {
                self.done_cond.wait_for(&mut state, WAIT_INTERVAL);
                continue;
            }
            match self.load_asset(&mut state, id)? {
                Some(data) => return Ok(data),
                None => {
                    self.done_cond.wait_for(&mut state, WAIT_INTERVAL);
                }
            }
        }
    }

    /// The asset if cached, otherwise queue it and return `None`
    pub(crate) fn try_asset(&self, id: &AssetId) -> AssetResult<Option<AssetData>> {
        let mut state = self.cache.lock();
        if let Some(entry) = state.assets.get_mut(id) {
            entry.time = Instant::now();
            return match &entry.data {
                Some(data) => Ok(Some(data.clone())),
                None => Err(AssetError::FailedPreviously(id.path.join())),
            };
        }
        if !state.queue.contains_key(id) {
            state.enqueue(id.clone(), QueuePriority::Load);
            self.queue_cond.notify_one();
        }
        Ok(None)
    }

    /// Load `id` on this thread. `Ok(None)` means the id or something it
    /// depends on is being loaded elsewhere; the id has been requeued.
    pub(crate) fn load_asset(&self, state: &mut Guard, id: &AssetId) -> AssetResult<Option<AssetData>> {
        if let Some(entry) = state.assets.get_mut(id) {
            entry.time = Instant::now();
            return match &entry.data {
                Some(data) => Ok(Some(data.clone())),
                None => Err(AssetError::FailedPreviously(id.path.join())),
            };
        }
        if state.is_working(id) {
            return Ok(None);
        }
        let generation = self.generation.load(Ordering::Acquire);
        state.enqueue(id.clone(), QueuePriority::Working);

        let result = match id.kind {
            AssetType::Json => self.load_json(state, &id.path).map(|o| o.map(AssetData::Json)),
            AssetType::Image => self.load_image(state, &id.path).map(|o| o.map(AssetData::Image)),
            AssetType::Audio => self.load_audio(state, &id.path).map(|o| o.map(AssetData::Audio)),
            AssetType::Font => self
                .read_base(state, &id.path)
                .map(|b| Some(AssetData::Font(Arc::new(Font::new(b))))),
            AssetType::Bytes => self
                .read_base(state, &id.path)
                .map(|b| Some(AssetData::Bytes(Arc::new(b)))),
        };

        if self.generation.load(Ordering::Acquire) != generation {
            log::debug!("Cache cleared while loading {}, requeueing", id);
            state.enqueue(id.clone(), QueuePriority::Load);
            self.queue_cond.notify_one();
            self.done_cond.notify_all();
            return Ok(None);
        }

        match result {
            Ok(Some(data)) => {
                state.assets.insert(id.clone(), CacheEntry::new(Some(data.clone())));
                if data.needs_post_processing() {
                    state.enqueue(id.clone(), QueuePriority::PostProcess);
                    self.queue_cond.notify_one();
                } else {
                    state.queue.remove(id);
                }
                self.done_cond.notify_all();
                Ok(Some(data))
            }
            Ok(None) => {
                log::trace!("Dependency of {} is busy, requeueing", id);
                state.enqueue(id.clone(), QueuePriority::Load);
                self.queue_cond.notify_one();
                Ok(None)
            }
            Err(e) => {
                log::error!("Error loading {}: {}", id, e);
                state.assets.insert(id.clone(), CacheEntry::new(None));
                state.queue.remove(id);
                self.done_cond.notify_all();
                Err(e)
            }
        }
    }

    fn read_base(&self, state: &mut Guard, path: &AssetPath) -> AssetResult<Vec<u8>> {
        let resolved = self.resolve(&path.base_path)?;
        MutexGuard::unlocked(state, || resolved.read())
    }

    fn load_json(&self, state: &mut Guard, path: &AssetPath) -> AssetResult<Option<Arc<Json>>> {
        if let Some(sub) = &path.sub_path {
            let parent_id = AssetId::new(AssetType::Json, path.base_only());
            let parent = match self.load_asset(state, &parent_id)? {
                Some(AssetData::Json(json)) => json,
                Some(other) => return Err(unexpected(&parent_id, &other)),
                None => return Ok(None),
            };
            return json_query(&parent, sub)
                .map(|found| Some(Arc::new(found.clone())))
                .ok_or_else(|| AssetError::NotFound(path.join()));
        }
        let resolved = self.resolve(&path.base_path)?;
        let json = MutexGuard::unlocked(state, || self.read_json_patched(&resolved))?;
        Ok(Some(Arc::new(json)))
    }

    /// Parse a file and apply its patches in order. Runs unlocked.
    pub(crate) fn read_json_patched(&self, file: &ResolvedFile) -> AssetResult<Json> {
        let mut json: Json = serde_json::from_slice(&file.read()?).map_err(|e| AssetError::Malformed {
            path: file.path.clone(),
            reason: e.to_string(),
        })?;
        for patch in &file.patches {
            json = self.apply_json_patch(json, &file.path, patch)?;
        }
        Ok(json)
    }

    fn apply_json_patch(&self, json: Json, target: &str, patch: &ResolvedPatch) -> AssetResult<Json> {
        let failed = |reason: String| AssetError::PatchFailed {
            path: target.to_string(),
            patch: patch.path.clone(),
            reason,
        };

        if patch.path.to_ascii_lowercase().ends_with(".lua") {
            return match scripts::run_json_patch(self, patch, target, &json) {
                Ok(Some(patched)) => Ok(patched),
                Ok(None) => Ok(json),
                Err(e) => {
                    log::error!("Lua patch '{}' on '{}' failed: {}", patch.path, target, e);
                    Ok(json)
                }
            };
        }

        let patch_json: Json = serde_json::from_slice(&patch.source.read(&patch.path)?)
            .map_err(|e| failed(e.to_string()))?;
        match &patch_json {
            Json::Array(ops) if ops.first().is_some_and(Json::is_array) => {
                // Independent patch sets; a failed test skips only its own set
                let mut out = json;
                for set in ops {
                    let set = set.as_array().ok_or_else(|| failed("mixed patch set list".to_string()))?;
                    out = apply_patch_set(out, set, target, patch).map_err(failed)?;
                }
                Ok(out)
            }
            Json::Array(ops) => apply_patch_set(json, ops, target, patch).map_err(failed),
            Json::Object(_) => Ok(json_merge_nulling(&json, &patch_json)),
            _ => Err(failed("patch must be an array or an object".to_string())),
        }
    }

    fn load_image(&self, state: &mut Guard, path: &AssetPath) -> AssetResult<Option<Arc<Image>>> {
        if !path.directives.is_empty() {
            return self.load_processed_image(state, path);
        }
        if let Some(sub) = &path.sub_path {
            return self.load_sub_image(state, path, sub);
        }

        let resolved = match self.resolve(&path.base_path) {
            Ok(resolved) => resolved,
            Err(AssetError::NotFound(_)) => match &self.settings.missing_image {
                Some(missing) if !missing.eq_ignore_ascii_case(&path.base_path) => {
                    log::warn!("Image '{}' not found, using '{}'", path.base_path, missing);
                    let missing_id = AssetId::new(AssetType::Image, AssetPath::split(missing));
                    return match self.load_asset(state, &missing_id)? {
                        Some(AssetData::Image(image)) => Ok(Some(image)),
                        Some(other) => Err(unexpected(&missing_id, &other)),
                        None => Ok(None),
                    };
                }
                _ => return Err(AssetError::NotFound(path.base_path.clone())),
            },
            Err(e) => return Err(e),
        };

        let image = MutexGuard::unlocked(state, || self.read_image_patched(&resolved))?;
        Ok(Some(image))
    }

    /// Decode an image, or reuse a stored one, and run its Lua patches
    fn read_image_patched(&self, file: &ResolvedFile) -> AssetResult<Arc<Image>> {
        let mut image = match file.source.image(&file.path) {
            Some(stored) => stored,
            None => Arc::new(Image::decode_png(&file.read()?)?),
        };
        for patch in &file.patches {
            if !patch.path.to_ascii_lowercase().ends_with(".lua") {
                log::warn!("Ignoring non-Lua image patch '{}' on '{}'", patch.path, file.path);
                continue;
            }
            match scripts::run_image_patch(self, patch, &file.path, &image) {
                Ok(Some(patched)) => image = Arc::new(patched),
                Ok(None) => {}
                Err(e) => log::error!("Lua patch '{}' on '{}' failed: {}", patch.path, file.path, e),
            }
        }
        Ok(image)
    }

    fn load_processed_image(&self, state: &mut Guard, path: &AssetPath) -> AssetResult<Option<Arc<Image>>> {
        let base_id = AssetId::new(AssetType::Image, path.without_directives());
        let base = match self.load_asset(state, &base_id)? {
            Some(AssetData::Image(image)) => image,
            Some(other) => return Err(unexpected(&base_id, &other)),
            None => return Ok(None),
        };

        let mut references = HashMap::new();
        for name in path.directives.references() {
            if references.contains_key(&name) {
                continue;
            }
            let ref_path = AssetPath::relative_to(&path.base_path, &name);
            AssetPath::validate(&AssetPath::split(&ref_path).base_path)?;
            let ref_id = AssetId::new(AssetType::Image, AssetPath::split(&ref_path));
            match self.load_asset(state, &ref_id)? {
                Some(AssetData::Image(image)) => {
                    references.insert(name, image);
                }
                Some(other) => return Err(unexpected(&ref_id, &other)),
                None => return Ok(None),
            }
        }

        let directives = path.directives.clone();
        let image = MutexGuard::unlocked(state, || {
            directives.apply(&base, &|name: &str| references.get(name).map(|i| (**i).clone()))
        })?;
        Ok(Some(Arc::new(image)))
    }

    fn load_sub_image(&self, state: &mut Guard, path: &AssetPath, sub: &str) -> AssetResult<Option<Arc<Image>>> {
        let parent_id = AssetId::new(AssetType::Image, path.base_only());
        let parent = match self.load_asset(state, &parent_id)? {
            Some(AssetData::Image(image)) => image,
            Some(other) => return Err(unexpected(&parent_id, &other)),
            None => return Ok(None),
        };
        let frames = self
            .best_frames(state, &path.base_path)?
            .ok_or_else(|| AssetError::NotFound(format!("frames for '{}'", path.base_path)))?;

        // Aliases load through their target so both share one image
        if let Some(target) = frames.aliases.get(sub) {
            let target_id = AssetId::new(AssetType::Image, path.base_only().with_sub_path(target.clone()));
            return match self.load_asset(state, &target_id)? {
                Some(AssetData::Image(image)) => Ok(Some(image)),
                Some(other) => Err(unexpected(&target_id, &other)),
                None => Ok(None),
            };
        }

        let rect = *frames
            .frames
            .get(sub)
            .ok_or_else(|| AssetError::NotFound(format!("frame '{}' in '{}'", sub, frames.frames_path)))?;
        let image = MutexGuard::unlocked(state, || parent.frame(rect))?;
        Ok(Some(Arc::new(image)))
    }

    /// The nearest frames file for an image, cached per image path
    pub(crate) fn best_frames(&self, state: &mut Guard, image_path: &str) -> AssetResult<Option<Arc<FramesSpecification>>> {
        let key = image_path.to_ascii_lowercase();
        if let Some(cached) = state.frames.get(&key) {
            return Ok(cached.clone());
        }
        let generation = self.generation.load(Ordering::Acquire);
        let candidate = frames_candidates(image_path).into_iter().find(|c| self.exists(c));
        let spec = match candidate {
            Some(frames_path) => {
                let resolved = self.resolve(&frames_path)?;
                let json = MutexGuard::unlocked(state, || self.read_json_patched(&resolved))?;
                Some(Arc::new(FramesSpecification::parse(&frames_path, &json)?))
            }
            None => None,
        };
        if self.generation.load(Ordering::Acquire) == generation {
            state.frames.insert(key, spec.clone());
        }
        Ok(spec)
    }

    fn load_audio(&self, state: &mut Guard, path: &AssetPath) -> AssetResult<Option<Arc<Audio>>> {
        let resolved = match self.resolve(&path.base_path) {
            Ok(resolved) => resolved,
            Err(AssetError::NotFound(_)) => match &self.settings.missing_audio {
                Some(missing) if !missing.eq_ignore_ascii_case(&path.base_path) => {
                    log::warn!("Audio '{}' not found, using '{}'", path.base_path, missing);
                    let missing_id = AssetId::new(AssetType::Audio, AssetPath::split(missing));
                    return match self.load_asset(state, &missing_id)? {
                        Some(AssetData::Audio(audio)) => Ok(Some(audio)),
                        Some(other) => Err(unexpected(&missing_id, &other)),
                        None => Ok(None),
                    };
                }
                _ => return Err(AssetError::NotFound(path.base_path.clone())),
            },
            Err(e) => return Err(e),
        };
        let audio = MutexGuard::unlocked(state, || Audio::from_bytes(&resolved.path, resolved.read()?))?;
        Ok(Some(Arc::new(audio)))
    }

    /// Decode short compressed audio in place
    fn post_process(&self, state: &mut Guard, id: &AssetId) {
        let audio = match state.assets.get(id).and_then(|e| e.data.clone()) {
            Some(AssetData::Audio(audio)) => audio,
            _ => {
                state.queue.remove(id);
                return;
            }
        };
        let generation = self.generation.load(Ordering::Acquire);
        state.enqueue(id.clone(), QueuePriority::Working);

        let decoder = self.audio_decoder.read().clone();
        let limit = self.settings.audio_decompress_limit;
        let decoded = MutexGuard::unlocked(state, || match decoder {
            Some(decoder) if audio.total_time(Some(&*decoder)).is_some_and(|t| t < limit) => {
                audio.decompressed(&*decoder).map(Some)
            }
            _ => Ok(None),
        });

        match decoded {
            Ok(Some(_)) if self.generation.load(Ordering::Acquire) != generation => {
                log::debug!("Cache cleared while decoding {}, dropping the result", id);
            }
            Ok(Some(decoded)) => {
                if let Some(entry) = state.assets.get_mut(id) {
                    entry.data = Some(AssetData::Audio(Arc::new(decoded)));
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Could not decompress {}: {}", id, e),
        }
        state.queue.remove(id);
        self.done_cond.notify_all();
    }

    /// Evict entries idle past the time to live. Queued, preloaded and
    /// externally held assets stay, as do failures.
    pub(crate) fn cleanup(&self) {
        let ttl = Duration::from_secs_f64(self.settings.asset_time_to_live.max(0.0));
        let now = Instant::now();
        let mut state = self.cache.lock();
        let CacheState { assets, queue, .. } = &mut *state;
        let before = assets.len();
        assets.retain(|id, entry| {
            if queue.contains_key(id) || entry.force_persist {
                return true;
            }
            match &entry.data {
                None => true,
                Some(data) if data.should_persist() => true,
                Some(_) => now.duration_since(entry.time) < ttl,
            }
        });
        let evicted = before - assets.len();
        if evicted > 0 {
            log::debug!("Evicted {} cached assets", evicted);
        }
    }
}

fn apply_patch_set(json: Json, ops: &[Json], target: &str, patch: &ResolvedPatch) -> Result<Json, String> {
    match apply_patch(&json, ops) {
        Ok(patched) => Ok(patched),
        Err(PatchError::TestFailed(at)) => {
            log::debug!("Patch '{}' on '{}' skipped, test failed at {}", patch.path, target, at);
            Ok(json)
        }
        Err(PatchError::Invalid(reason)) => Err(reason),
    }
}

/// Worker loop: take the highest priority queued id and load or
/// post-process it, until the registry stops
pub(crate) fn worker_main(inner: Arc<AssetsInner>, index: usize) {
    log::debug!("Asset worker {} started", index);
    while !inner.stop.load(Ordering::Acquire) {
        scripts::collect_thread_garbage(inner.id);

        let mut state = inner.cache.lock();
        match state.next_work() {
            None => {
                inner.queue_cond.wait_for(&mut state, IDLE_WAIT);
            }
            Some((id, QueuePriority::Load)) => match inner.load_asset(&mut state, &id) {
                Ok(Some(_)) | Err(_) => {}
                Ok(None) => {
                    inner.done_cond.wait_for(&mut state, WAIT_INTERVAL);
                }
            },
            Some((id, _)) => inner.post_process(&mut state, &id),
        }
        drop(state);
        thread::yield_now();
    }
    scripts::forget_thread_state(inner.id);
    log::debug!("Asset worker {} stopped", index);
}
