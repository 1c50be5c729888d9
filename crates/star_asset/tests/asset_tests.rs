//! Registry tests against real directory and packed sources

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use star_asset::*;
use crossbeam_channel::{Receiver, Sender};
use star_core::{Color, JsonObject};

fn write(dir: &Path, path: &str, contents: impl AsRef<[u8]>) {
    let full = dir.join(path.trim_start_matches('/'));
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn png(width: u32, height: u32, color: Color) -> Vec<u8> {
    Image::filled(width, height, color).encode_png().unwrap()
}

fn settings() -> AssetsSettings {
    AssetsSettings {
        worker_pool_size: 0,
        ..Default::default()
    }
}

fn open(dirs: &[&Path]) -> Assets {
    Assets::new(settings(), dirs.iter().copied()).expect("registry should open")
}

#[test]
fn test_later_sources_override() {
    let base = tempfile::tempdir().unwrap();
    let mod_dir = tempfile::tempdir().unwrap();
    write(base.path(), "/items/sword.json", r#"{"damage": 1}"#);
    write(base.path(), "/items/shield.json", r#"{"armor": 2}"#);
    write(mod_dir.path(), "/items/Sword.json", r#"{"damage": 5}"#);

    let assets = open(&[base.path(), mod_dir.path()]);
    assert_eq!(*assets.json("/items/sword.json").unwrap(), json!({"damage": 5}));
    assert_eq!(*assets.json("/ITEMS/SHIELD.JSON").unwrap(), json!({"armor": 2}));
    assert_eq!(
        assets.asset_source("/items/sword.json").as_deref(),
        mod_dir.path().to_str()
    );
    assert!(assets.exists("/items/shield.json:armor"));
    assert!(!assets.exists("/items/axe.json"));
}

#[test]
fn test_invalid_paths_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let assets = open(&[dir.path()]);
    for bad in ["relative.json", "/a//b.json", "/a/../b.json", "/dir/", "/a\\b.json"] {
        assert!(
            matches!(assets.json(bad), Err(AssetError::InvalidPath { .. })),
            "{} should be rejected",
            bad
        );
    }
}

#[test]
fn test_patches_and_sub_paths() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 1, "b": 1, "c": {"keep": true, "drop": 1}}"#);
    write(dir.path(), "/x.json.patch", r#"[{"op": "replace", "path": "/a", "value": 10}]"#);
    write(dir.path(), "/x.json.patch.1", r#"{"b": 2, "c": {"drop": null}}"#);

    let assets = open(&[dir.path()]);
    assert_eq!(*assets.json("/x.json:a").unwrap(), json!(10));
    assert_eq!(*assets.json("/x.json:b").unwrap(), json!(2));
    assert_eq!(*assets.json("/x.json:c").unwrap(), json!({"keep": true}));
    assert!(matches!(assets.json("/x.json:missing"), Err(AssetError::NotFound(_))));
}

#[test]
fn test_patch_from_later_source() {
    let base = tempfile::tempdir().unwrap();
    let mod_dir = tempfile::tempdir().unwrap();
    write(base.path(), "/x.json", r#"{"a":1,"b":2}"#);
    write(mod_dir.path(), "/x.json.patch", r#"[{"op":"replace","path":"/a","value":10}]"#);

    let assets = open(&[base.path(), mod_dir.path()]);
    assert_eq!(*assets.json("/x.json:a").unwrap(), json!(10));
    assert_eq!(*assets.json("/x.json:b").unwrap(), json!(2));

    let unpatched = open(&[base.path()]);
    assert_ne!(assets.digest(), unpatched.digest());
}

#[test]
fn test_failed_test_skips_only_its_patch_set() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 1}"#);
    write(
        dir.path(),
        "/x.json.patch",
        r#"[
            [{"op": "test", "path": "/missing"}, {"op": "add", "path": "/skipped", "value": true}],
            [{"op": "add", "path": "/applied", "value": true}]
        ]"#,
    );

    let assets = open(&[dir.path()]);
    assert_eq!(*assets.json("/x.json").unwrap(), json!({"a": 1, "applied": true}));
}

#[test]
fn test_patch_list_targets_many_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/one.json", r#"{"n": 1}"#);
    write(dir.path(), "/two.json", r#"{"n": 2}"#);
    write(dir.path(), "/patches/tag.json", r#"{"tagged": true}"#);
    write(
        dir.path(),
        "/patches/all.patchlist",
        r#"[{"paths": ["/one.json", "/two.json"], "patches": ["tag.json"]}]"#,
    );

    let assets = open(&[dir.path()]);
    assert_eq!(*assets.json("/one.json").unwrap(), json!({"n": 1, "tagged": true}));
    assert_eq!(*assets.json("/two.json").unwrap(), json!({"n": 2, "tagged": true}));
}

#[test]
fn test_digest_tracks_paths_and_sizes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 1}"#);
    write(dir.path(), "/x.json.patch", r#"{"b": 2}"#);
    write(dir.path(), "/notes.txt", "ignored");

    let mut ignoring = settings();
    ignoring.digest_ignore = vec![r"\.txt$".to_string()];

    let first = Assets::new(ignoring.clone(), [dir.path()]).unwrap().digest();
    let second = Assets::new(ignoring.clone(), [dir.path()]).unwrap().digest();
    assert_eq!(first, second);
    assert_eq!(first.len(), 32);

    // Same sizes, different bytes
    write(dir.path(), "/x.json", r#"{"a": 2}"#);
    write(dir.path(), "/notes.txt", "IGNORED");
    assert_eq!(Assets::new(ignoring.clone(), [dir.path()]).unwrap().digest(), first);

    // Ignored files never count
    write(dir.path(), "/notes.txt", "a much longer note");
    assert_eq!(Assets::new(ignoring.clone(), [dir.path()]).unwrap().digest(), first);

    // Patch size counts toward its target
    write(dir.path(), "/x.json.patch", r#"{"b": 20}"#);
    let patched = Assets::new(ignoring.clone(), [dir.path()]).unwrap().digest();
    assert_ne!(patched, first);

    write(dir.path(), "/y.json", "{}");
    assert_ne!(Assets::new(ignoring, [dir.path()]).unwrap().digest(), patched);
}

#[test]
fn test_directives_share_base_image() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/a.png", png(4, 4, Color::rgb(200, 200, 200)));
    write(dir.path(), "/r.png", png(2, 2, Color::rgb(128, 128, 128)));

    let assets = open(&[dir.path()]);
    let processed = assets.image("/a.png?crop=0;0;2;2?blendmult=/r.png").unwrap();
    assert_eq!(processed.size(), (2, 2));
    let expected = ((200.0f32 * 128.0) / 255.0).round() as u8;
    assert_eq!(processed.get(0, 0), Color::rgb(expected, expected, expected));

    assert!(assets.is_cached(AssetType::Image, "/a.png"));
    assert!(assets.is_cached(AssetType::Image, "/r.png"));
    let base = assets.image("/a.png").unwrap();
    assert_eq!(base.size(), (4, 4));
}

#[test]
fn test_crop_then_blend_multiply() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/r.png", png(8, 8, Color::RED));
    write(dir.path(), "/b.png", png(4, 4, Color::BLUE));

    let assets = open(&[dir.path()]);
    let out = assets.image("/r.png?crop=0;0;4;4?blend=Multiply=/b.png;0;0").unwrap();
    assert_eq!(out.size(), (4, 4));
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(out.get(x, y), Color::rgba(0, 0, 0, 255));
        }
    }

    let cropped = assets.image("/r.png?crop=0;0;4;4").unwrap();
    assert_eq!(cropped.size(), (4, 4));
    let base = assets.image("/r.png").unwrap();
    // The directive loads went through the plain base entry
    assert!(Arc::strong_count(&base) >= 2);
}

#[test]
fn test_frames_and_aliases() {
    let dir = tempfile::tempdir().unwrap();
    let mut sheet = Image::filled(4, 2, Color::RED);
    sheet.map_pixels(|x, _, c| if x >= 2 { Color::BLUE } else { c });
    write(dir.path(), "/sprites/sheet.png", sheet.encode_png().unwrap());
    write(
        dir.path(),
        "/sprites/default.frames",
        r#"{"frameList": {"left": [0, 0, 2, 2], "right": [2, 0, 4, 2]}, "aliases": {"idle": "right"}}"#,
    );

    let assets = open(&[dir.path()]);
    let right = assets.image("/sprites/sheet.png:right").unwrap();
    assert_eq!(right.size(), (2, 2));
    assert_eq!(right.get(0, 0), Color::BLUE);
    assert_eq!(assets.image("/sprites/sheet.png:left").unwrap().get(1, 1), Color::RED);

    let idle = assets.image("/sprites/sheet.png:idle").unwrap();
    assert!(Arc::ptr_eq(&idle, &right));

    let frames = assets.frames("/sprites/sheet.png").unwrap().expect("frames file applies");
    assert_eq!(frames.frames_path, "/sprites/default.frames");
    assert!(assets.image("/sprites/sheet.png:nope").is_err());
}

#[test]
fn test_missing_image_substitutes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/missing.png", png(1, 1, Color::RED));

    let mut with_missing = settings();
    with_missing.missing_image = Some("/missing.png".to_string());
    let assets = Assets::new(with_missing, [dir.path()]).unwrap();
    let substitute = assets.image("/not/there.png").unwrap();
    assert!(Arc::ptr_eq(&substitute, &assets.image("/missing.png").unwrap()));

    let strict = open(&[dir.path()]);
    assert!(matches!(strict.image("/not/there.png"), Err(AssetError::NotFound(_))));
}

#[test]
fn test_failures_stay_until_cache_cleared() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/bad.json", "{ not json");

    let assets = open(&[dir.path()]);
    assert!(matches!(assets.json("/bad.json"), Err(AssetError::Malformed { .. })));

    write(dir.path(), "/bad.json", r#"{"fixed": 1}"#);
    assert!(matches!(assets.json("/bad.json"), Err(AssetError::FailedPreviously(_))));

    assets.clear_cache();
    assert_eq!(*assets.json("/bad.json").unwrap(), json!({"fixed": 1}));
}

#[test]
fn test_hot_reload_sees_new_files() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/a.json", "1");
    let assets = open(&[dir.path()]);
    let before = assets.digest();
    assert!(!assets.exists("/b.json"));

    write(dir.path(), "/b.json", "2");
    assets.hot_reload().unwrap();
    assert_eq!(*assets.json("/b.json").unwrap(), json!(2));
    assert_ne!(assets.digest(), before);
}

#[test]
fn test_load_script_adds_and_erases() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/_metadata", r#"{"name": "base", "scripts": {"onLoad": ["/scripts/gen.lua"]}}"#);
    write(dir.path(), "/x.json", r#"{"a": 1}"#);
    write(dir.path(), "/old.json", "{}");
    write(
        dir.path(),
        "/scripts/gen.lua",
        r#"
        local x = assets.json("/x.json")
        assets.add("/generated.json", { value = x.a + 1 })
        assets.add("/raw.txt", "hello")
        assets.add("/generated.json.fix", '{"extra": true}')
        assets.patch("/generated.json", "/generated.json.fix")
        assets.erase("/old.json")
        "#,
    );

    let assets = open(&[dir.path()]);
    assert_eq!(*assets.json("/generated.json").unwrap(), json!({"value": 2, "extra": true}));
    assert_eq!(&**assets.bytes("/raw.txt").unwrap(), b"hello");
    assert!(!assets.exists("/old.json"));

    let sources = assets.asset_sources();
    assert_eq!(sources.len(), 2);
    assert!(sources[1].ends_with("::onLoad"));
    assert_eq!(
        assets.source_metadata(&sources[0]).unwrap().get("name"),
        Some(&json!("base"))
    );
}

#[test]
fn test_lua_patches() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 2}"#);
    write(
        dir.path(),
        "/x.json.patch.lua",
        r#"
        function patch(config, path)
          config.a = config.a * 3
          config.path = path
          return config
        end
        "#,
    );
    write(dir.path(), "/a.png", png(2, 2, Color::RED));
    write(
        dir.path(),
        "/a.png.patch.lua",
        r#"
        function patch(image)
          image:set(0, 0, {0, 255, 0})
        end
        "#,
    );
    write(dir.path(), "/broken.json", r#"{"ok": true}"#);
    write(dir.path(), "/broken.json.patch.lua", "function patch() error('boom') end");

    let assets = open(&[dir.path()]);
    assert_eq!(*assets.json("/x.json").unwrap(), json!({"a": 6, "path": "/x.json"}));
    let image = assets.image("/a.png").unwrap();
    assert_eq!(image.get(0, 0), Color::rgb(0, 255, 0));
    assert_eq!(image.get(1, 1), Color::RED);
    // A throwing Lua patch is skipped
    assert_eq!(*assets.json("/broken.json").unwrap(), json!({"ok": true}));
}

#[test]
fn test_workers_load_in_background() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 1}"#);

    let mut threaded = settings();
    threaded.worker_pool_size = 2;
    let assets = Assets::new(threaded, [dir.path()]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let loaded = loop {
        if let Some(json) = assets.try_json("/x.json:a").unwrap() {
            break json;
        }
        assert!(Instant::now() < deadline, "worker never loaded the asset");
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(*loaded, json!(1));
}

/// Holds its next read until told to go, after reporting that it started
struct GatedSource {
    inner: MemorySource,
    armed: AtomicBool,
    started: Sender<()>,
    go: Receiver<()>,
}

impl AssetSource for GatedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn metadata(&self) -> JsonObject {
        self.inner.metadata()
    }

    fn asset_paths(&self) -> Vec<String> {
        self.inner.asset_paths()
    }

    fn open(&self, path: &str) -> AssetResult<Box<dyn ByteStream>> {
        self.inner.open(path)
    }

    fn read(&self, path: &str) -> AssetResult<Vec<u8>> {
        let bytes = self.inner.read(path)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.started.send(()).ok();
            self.go.recv().ok();
        }
        Ok(bytes)
    }
}

#[test]
fn test_clear_during_load_discards_stale_read() {
    let (started_tx, started_rx) = crossbeam_channel::unbounded();
    let (go_tx, go_rx) = crossbeam_channel::unbounded();
    let gated = Arc::new(GatedSource {
        inner: MemorySource::new("gated"),
        armed: AtomicBool::new(false),
        started: started_tx,
        go: go_rx,
    });
    gated.inner.add_bytes("/x.json", br#"{"v": 1}"#.to_vec());
    let source: Arc<dyn AssetSource> = gated.clone();

    let mut threaded = settings();
    threaded.worker_pool_size = 1;
    let assets = Assets::new(threaded, [SourceLocation::Source(source)]).unwrap();

    gated.armed.store(true, Ordering::SeqCst);
    assert!(assets.try_json("/x.json").unwrap().is_none());
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker never started the load");

    gated.inner.add_bytes("/x.json", br#"{"v": 2}"#.to_vec());
    assets.clear_cache();
    go_tx.send(()).unwrap();

    assert_eq!(*assets.json("/x.json").unwrap(), json!({"v": 2}));
}

#[test]
fn test_cleanup_keeps_referenced_and_preloaded() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/a.json", "1");
    write(dir.path(), "/b.json", "2");
    write(dir.path(), "/c.json", "3");
    write(dir.path(), "/preload.config", r#"[{"type": "json", "path": "/c.json"}]"#);

    let mut short = settings();
    short.asset_time_to_live = 0.0;
    let assets = Assets::new(short, [dir.path()]).unwrap();

    let held = assets.json("/a.json").unwrap();
    drop(assets.json("/b.json").unwrap());
    assets.cleanup();

    assert!(assets.is_cached(AssetType::Json, "/a.json"));
    assert!(!assets.is_cached(AssetType::Json, "/b.json"));
    assert!(assets.is_cached(AssetType::Json, "/c.json"));
    assert_eq!(*held, json!(1));
}

#[test]
fn test_packed_source_serves_assets() {
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write(dir.path(), "/x.json", r#"{"a": 1}"#);
    write(dir.path(), "/skip.bak", "junk");
    let pak = out.path().join("assets.pak");

    assert_eq!(pack_directory(dir.path(), &pak, &[r"\.bak$".to_string()]).unwrap(), 1);
    let assets = Assets::new(settings(), [pak.as_path()]).unwrap();
    assert_eq!(*assets.json("/x.json:a").unwrap(), json!(1));
    assert!(!assets.exists("/skip.bak"));
}

#[test]
fn test_scans() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "/items/a.item", "{}");
    write(dir.path(), "/items/b.ITEM", "{}");
    write(dir.path(), "/other/c.item", "{}");
    write(dir.path(), "/other/d.json", "{}");

    let assets = open(&[dir.path()]);
    assert_eq!(assets.scan_extension("item").len(), 3);
    assert_eq!(assets.scan(".item"), vec!["/items/a.item", "/items/b.ITEM", "/other/c.item"]);
    assert_eq!(assets.scan_prefix("/items/", ".item").len(), 2);
}

#[test]
fn test_memory_source_images() {
    let memory = Arc::new(MemorySource::new("memory"));
    memory.add_image("/made.png", Image::filled(3, 1, Color::BLUE));
    memory.add_bytes("/made.json", br#"{"x": 1}"#.to_vec());
    let source: Arc<dyn AssetSource> = memory;

    let assets = Assets::new(settings(), [SourceLocation::Source(source)]).unwrap();
    assert_eq!(assets.image("/made.png").unwrap().size(), (3, 1));
    assert_eq!(*assets.json("/made.json:x").unwrap(), json!(1));
}
