//! Lua load scripts and Lua patches
//!
//! Load scripts run once per source and stage (`onLoad`, then `postLoad`)
//! with the full `assets` table, including `add`, `patch` and `erase`. Their
//! output lands in a memory source named `<source>::<stage>`.
//!
//! Patch scripts define `patch(value, path)` and see only the read-only
//! part of `assets`. Interpreters are not `Send`, so each thread keeps its
//! own patch contexts per registry, rebuilt when the registry's generation
//! changes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use star_core::{Color, Json, JsonObject};
use star_script::mlua::{self, AnyUserData, Lua, Scope, UserData, UserDataMethods, UserDataRef, Value};
use star_script::{json_to_lua, lua_to_json, LuaCallbacks, LuaContext, LuaRoot, ScriptError, ScriptResult};

use crate::directives::DirectivesGroup;
use crate::error::{AssetError, AssetResult};
use crate::image::Image;
use crate::path::AssetPath;
use crate::registry::{AssetsInner, ResolvedPatch};
use crate::source::MemorySource;

/// An image handed to Lua
pub struct LuaImage(pub Image);

fn color_from_lua(value: Value) -> mlua::Result<Color> {
    match value {
        Value::String(s) => {
            let text = s.to_str()?;
            Color::from_hex(&text).ok_or_else(|| mlua::Error::RuntimeError(format!("bad color '{}'", &*text)))
        }
        Value::Table(t) => {
            let channel = |i: usize, default: u8| -> mlua::Result<u8> { Ok(t.get::<Option<u8>>(i)?.unwrap_or(default)) };
            Ok(Color::rgba(channel(1, 0)?, channel(2, 0)?, channel(3, 0)?, channel(4, 255)?))
        }
        other => Err(mlua::Error::RuntimeError(format!("expected a color, got {}", other.type_name()))),
    }
}

fn check_bounds(image: &Image, x: u32, y: u32) -> mlua::Result<()> {
    if x >= image.width() || y >= image.height() {
        return Err(mlua::Error::RuntimeError(format!(
            "pixel ({}, {}) outside {}x{} image",
            x,
            y,
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

impl UserData for LuaImage {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("size", |_, this, ()| Ok((this.0.width(), this.0.height())));

        methods.add_method("get", |_, this, (x, y): (u32, u32)| {
            check_bounds(&this.0, x, y)?;
            Ok(this.0.get(x, y).to_array().to_vec())
        });

        methods.add_method_mut("set", |_, this, (x, y, color): (u32, u32, Value)| {
            check_bounds(&this.0, x, y)?;
            this.0.set(x, y, color_from_lua(color)?);
            Ok(())
        });

        methods.add_method("subImage", |_, this, (x, y, w, h): (u32, u32, u32, u32)| {
            Ok(LuaImage(this.0.sub_image(x, y, w, h)))
        });

        methods.add_method("process", |_, this, directives: String| {
            DirectivesGroup::parse(&directives)
                .apply(&this.0, &|_| None)
                .map(LuaImage)
                .map_err(mlua::Error::external)
        });

        methods.add_method_mut("copyInto", |_, this, (x, y, other): (i64, i64, UserDataRef<LuaImage>)| {
            this.0.copy_into(x, y, &other.0);
            Ok(())
        });
    }
}

/// Where a load script's `add` and `patch` write
struct LoadScriptOutput {
    memory: Arc<MemorySource>,
    index: usize,
}

fn external(e: AssetError) -> mlua::Error {
    mlua::Error::external(e)
}

/// Interpreter whose `require` reads script files from the registry
fn script_root(inner: &AssetsInner) -> ScriptResult<LuaRoot> {
    let weak = inner.weak.clone();
    LuaRoot::new(move |path| {
        let load_error = |reason: String| ScriptError::Load {
            path: path.to_string(),
            reason,
        };
        let inner = weak
            .upgrade()
            .ok_or_else(|| load_error("asset registry is gone".to_string()))?;
        let bytes = inner.read(path).map_err(|e| load_error(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| load_error(e.to_string()))
    })
}

/// Build the `assets` callback table. `output` enables the mutating calls.
fn register_asset_callbacks<'scope, 'env: 'scope>(
    scope: &'scope Scope<'scope, 'env>,
    callbacks: &mut LuaCallbacks,
    inner: &'env AssetsInner,
    output: Option<&'env LoadScriptOutput>,
) -> mlua::Result<()> {
    let table = callbacks.table("assets")?;

    table.set(
        "byExtension",
        scope.create_function(move |_, ext: String| Ok(inner.scan_extension(&ext)))?,
    )?;
    table.set(
        "json",
        scope.create_function(move |lua, path: String| {
            let json = inner.json(&path).map_err(external)?;
            json_to_lua(lua, &json)
        })?,
    )?;
    table.set("exists", scope.create_function(move |_, path: String| Ok(inner.exists(&path)))?)?;
    table.set(
        "bytes",
        scope.create_function(move |lua, path: String| {
            let bytes = inner.bytes(&path).map_err(external)?;
            lua.create_string(&**bytes)
        })?,
    )?;
    table.set(
        "image",
        scope.create_function(move |lua, path: String| {
            let image = inner.image(&path).map_err(external)?;
            lua.create_userdata(LuaImage((*image).clone()))
        })?,
    )?;
    table.set(
        "frames",
        scope.create_function(move |lua, path: String| match inner.frames(&path).map_err(external)? {
            Some(frames) => json_to_lua(lua, &frames.to_json()),
            None => Ok(Value::Nil),
        })?,
    )?;
    table.set(
        "scan",
        scope.create_function(move |_, (a, b): (String, Option<String>)| {
            Ok(match b {
                Some(suffix) => inner.scan(&a, &suffix),
                None => inner.scan("", &a),
            })
        })?,
    )?;
    table.set("sourcePaths", scope.create_function(move |_, ()| Ok(inner.source_names()))?)?;
    table.set(
        "sourceMetadata",
        scope.create_function(move |lua, name: String| match inner.source_metadata(&name) {
            Some(metadata) => json_to_lua(lua, &Json::Object(metadata)),
            None => Ok(Value::Nil),
        })?,
    )?;
    table.set(
        "origin",
        scope.create_function(move |_, path: String| Ok(inner.asset_source(&path)))?,
    )?;

    let Some(output) = output else {
        return Ok(());
    };

    table.set(
        "add",
        scope.create_function(move |lua, (path, data): (String, Value)| {
            AssetPath::validate(&path).map_err(external)?;
            match data {
                Value::String(s) => output.memory.add_bytes(path.clone(), s.as_bytes().to_vec()),
                Value::UserData(ud) => {
                    let image = ud.borrow::<LuaImage>()?;
                    output.memory.add_image(path.clone(), image.0.clone());
                }
                other => {
                    let json = lua_to_json(lua, other)?;
                    let text = serde_json::to_vec(&json).map_err(mlua::Error::external)?;
                    output.memory.add_bytes(path.clone(), text);
                }
            }
            inner.files.write().set_file(&path, output.index);
            Ok(())
        })?,
    )?;
    table.set(
        "patch",
        scope.create_function(move |_, (path, patch_path): (String, String)| {
            if !output.memory.contains(&patch_path) {
                return Err(mlua::Error::RuntimeError(format!(
                    "patch '{}' must be added before it is applied",
                    patch_path
                )));
            }
            Ok(inner.files.write().add_patch(&path, patch_path, output.index))
        })?,
    )?;
    table.set(
        "erase",
        scope.create_function(move |_, path: String| Ok(inner.files.write().erase(&path)))?,
    )?;
    Ok(())
}

fn script_list(metadata: &JsonObject, stage: &str) -> Vec<String> {
    metadata
        .get("scripts")
        .and_then(|s| s.get(stage))
        .and_then(Json::as_array)
        .map(|a| a.iter().filter_map(Json::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Run the `stage` scripts a source's metadata declares. Failures are
/// logged and do not stop loading.
pub(crate) fn run_load_scripts(inner: &AssetsInner, source_name: &str, metadata: &JsonObject, stage: &str) {
    let scripts = script_list(metadata, stage);
    if scripts.is_empty() {
        return;
    }

    let memory = Arc::new(MemorySource::new(format!("{}::{}", source_name, stage)));
    let index = inner.files.write().push_source(memory.clone());
    let output = LoadScriptOutput { memory, index };

    let result = script_root(inner).and_then(|root| {
        let context = root.create_context()?;
        context.scoped(
            |scope, callbacks| register_asset_callbacks(scope, callbacks, inner, Some(&output)),
            |ctx| {
                for script in &scripts {
                    log::debug!("Running {} script {} for '{}'", stage, script, source_name);
                    ctx.load_script(script)?;
                }
                Ok(())
            },
        )
    });
    match result {
        Ok(()) => log::info!(
            "Ran {} {} script(s) for '{}', {} file(s) added",
            scripts.len(),
            stage,
            source_name,
            output.memory.len()
        ),
        Err(e) => log::error!("{} script for '{}' failed: {}", stage, source_name, e),
    }
}

struct PatchScripts {
    generation: u64,
    root: LuaRoot,
    /// Keyed by source index and patch path
    contexts: HashMap<(usize, String), LuaContext>,
}

thread_local! {
    static PATCH_SCRIPTS: RefCell<HashMap<u64, PatchScripts>> = RefCell::new(HashMap::new());
}

/// The context a patch script was loaded into on this thread. Contexts are
/// cloned out so a patch may load further patched assets.
fn patch_context(inner: &AssetsInner, patch: &ResolvedPatch) -> AssetResult<LuaContext> {
    let generation = inner.generation.load(Ordering::Acquire);
    let key = (patch.source_index, patch.path.clone());

    let context = PATCH_SCRIPTS.with(|cell| -> AssetResult<Result<LuaContext, LuaContext>> {
        let mut all = cell.borrow_mut();
        let stale = all.get(&inner.id).map_or(true, |s| s.generation != generation);
        if stale {
            all.insert(
                inner.id,
                PatchScripts {
                    generation,
                    root: script_root(inner)?,
                    contexts: HashMap::new(),
                },
            );
        }
        let Some(scripts) = all.get(&inner.id) else {
            return Err(AssetError::Script("patch state missing".to_string()));
        };
        match scripts.contexts.get(&key) {
            Some(context) => Ok(Ok(context.clone())),
            None => Ok(Err(scripts.root.create_context()?)),
        }
    })?;

    // Load new contexts outside the borrow
    match context {
        Ok(context) => Ok(context),
        Err(context) => {
            let source = String::from_utf8(patch.source.read(&patch.path)?).map_err(|e| AssetError::Malformed {
                path: patch.path.clone(),
                reason: e.to_string(),
            })?;
            context.load_source(&patch.path, &source)?;
            PATCH_SCRIPTS.with(|cell| {
                if let Some(scripts) = cell.borrow_mut().get_mut(&inner.id) {
                    scripts.contexts.insert(key, context.clone());
                }
            });
            Ok(context)
        }
    }
}

fn patch_function(context: &LuaContext, patch: &ResolvedPatch) -> AssetResult<mlua::Function> {
    context
        .function("patch")?
        .ok_or_else(|| AssetError::Script(format!("'{}' defines no patch function", patch.path)))
}

/// Run a Lua JSON patch. `None` when the script returned nothing.
pub(crate) fn run_json_patch(
    inner: &AssetsInner,
    patch: &ResolvedPatch,
    target: &str,
    json: &Json,
) -> AssetResult<Option<Json>> {
    let context = patch_context(inner, patch)?;
    let function = patch_function(&context, patch)?;
    let lua: Lua = context.lua().clone();
    let arg = json_to_lua(&lua, json)?;
    let result: Value = context.call_with(function, (arg, target), |scope, callbacks| {
        register_asset_callbacks(scope, callbacks, inner, None)
    })?;
    match result {
        Value::Nil => Ok(None),
        value => Ok(Some(lua_to_json(&lua, value)?)),
    }
}

/// Run a Lua image patch. The script may return a new image or edit the one
/// it was given in place.
pub(crate) fn run_image_patch(
    inner: &AssetsInner,
    patch: &ResolvedPatch,
    target: &str,
    image: &Image,
) -> AssetResult<Option<Image>> {
    let context = patch_context(inner, patch)?;
    let function = patch_function(&context, patch)?;
    let given: AnyUserData = context.lua().create_userdata(LuaImage(image.clone()))?;
    let result: Value = context.call_with(function, (given.clone(), target), |scope, callbacks| {
        register_asset_callbacks(scope, callbacks, inner, None)
    })?;
    let patched = match result {
        Value::UserData(ud) => ud.borrow::<LuaImage>()?.0.clone(),
        Value::Nil => given.borrow::<LuaImage>()?.0.clone(),
        other => {
            return Err(AssetError::Script(format!(
                "image patch '{}' returned {}",
                patch.path,
                other.type_name()
            )))
        }
    };
    Ok((patched != *image).then_some(patched))
}

/// Collect garbage in this thread's patch interpreter for a registry
pub(crate) fn collect_thread_garbage(registry: u64) {
    PATCH_SCRIPTS.with(|cell| {
        if let Ok(all) = cell.try_borrow() {
            if let Some(scripts) = all.get(&registry) {
                if let Err(e) = scripts.root.collect_garbage() {
                    log::warn!("Patch script garbage collection failed: {}", e);
                }
            }
        }
    });
}

/// Drop this thread's patch interpreter for a registry
pub(crate) fn forget_thread_state(registry: u64) {
    let _ = PATCH_SCRIPTS.try_with(|cell| {
        if let Ok(mut all) = cell.try_borrow_mut() {
            all.remove(&registry);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_image_methods() {
        let lua = Lua::new();
        lua.globals()
            .set("img", LuaImage(Image::filled(4, 2, Color::RED)))
            .unwrap();
        let (w, h): (u32, u32) = lua.load("return img:size()").eval().unwrap();
        assert_eq!((w, h), (4, 2));

        lua.load("img:set(1, 1, {0, 0, 255})").exec().unwrap();
        let blue: Vec<u8> = lua.load("return img:get(1, 1)").eval().unwrap();
        assert_eq!(blue, vec![0, 0, 255, 255]);

        let sub: (u32, u32) = lua.load("return img:subImage(0, 0, 2, 2):size()").eval().unwrap();
        assert_eq!(sub, (2, 2));

        let flipped: Vec<u8> = lua.load("return img:process('?flipx'):get(2, 1)").eval().unwrap();
        assert_eq!(flipped, vec![0, 0, 255, 255]);

        assert!(lua.load("return img:get(9, 9)").exec().is_err());
    }

    #[test]
    fn test_script_list_reads_stage() {
        let metadata: JsonObject = serde_json::from_str(r#"{"scripts": {"onLoad": ["/a.lua", "/b.lua"]}}"#).unwrap();
        assert_eq!(script_list(&metadata, "onLoad"), vec!["/a.lua", "/b.lua"]);
        assert!(script_list(&metadata, "postLoad").is_empty());
    }
}
