//! Shared interpreter and script source cache

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use mlua::Lua;

use crate::callbacks::install_utility_callbacks;
use crate::context::LuaContext;
use crate::error::{ScriptError, ScriptResult};

/// Resolves a script path to its source text
pub type ScriptLoader = Rc<dyn Fn(&str) -> ScriptResult<String>>;

/// One interpreter per owning thread, shared by every context created from
/// it. Sources are cached by path until [`LuaRoot::clear_cache`].
pub struct LuaRoot {
    lua: Lua,
    loader: ScriptLoader,
    sources: Rc<RefCell<HashMap<String, Rc<str>>>>,
}

impl LuaRoot {
    /// Create an interpreter that loads scripts through `loader`
    pub fn new(loader: impl Fn(&str) -> ScriptResult<String> + 'static) -> ScriptResult<Self> {
        let lua = Lua::new();
        install_utility_callbacks(&lua)?;
        Ok(Self {
            lua,
            loader: Rc::new(loader),
            sources: Rc::new(RefCell::new(HashMap::new())),
        })
    }

    /// Interpreter with no script sources, for evaluation only
    pub fn without_sources() -> ScriptResult<Self> {
        Self::new(|path| {
            Err(ScriptError::Load {
                path: path.to_string(),
                reason: "no script sources configured".to_string(),
            })
        })
    }

    #[inline]
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Source text of a script, cached
    pub fn source(&self, path: &str) -> ScriptResult<Rc<str>> {
        source_from(&self.loader, &self.sources, path)
    }

    /// Drop cached sources so the next load re-reads them
    pub fn clear_cache(&self) {
        self.sources.borrow_mut().clear();
    }

    /// Run a full garbage collection cycle
    pub fn collect_garbage(&self) -> ScriptResult<()> {
        Ok(self.lua.gc_collect()?)
    }

    /// Memory used by the interpreter in bytes
    pub fn memory_usage(&self) -> usize {
        self.lua.used_memory()
    }

    /// Create a fresh isolated environment
    pub fn create_context(&self) -> ScriptResult<LuaContext> {
        LuaContext::new(self.lua.clone(), SourceCache {
            loader: self.loader.clone(),
            sources: self.sources.clone(),
        })
    }
}

/// Handle to the root's source cache held by contexts for `require`
#[derive(Clone)]
pub(crate) struct SourceCache {
    loader: ScriptLoader,
    sources: Rc<RefCell<HashMap<String, Rc<str>>>>,
}

impl SourceCache {
    pub(crate) fn source(&self, path: &str) -> ScriptResult<Rc<str>> {
        source_from(&self.loader, &self.sources, path)
    }
}

fn source_from(
    loader: &ScriptLoader,
    sources: &RefCell<HashMap<String, Rc<str>>>,
    path: &str,
) -> ScriptResult<Rc<str>> {
    if let Some(cached) = sources.borrow().get(path) {
        return Ok(cached.clone());
    }
    let text: Rc<str> = loader(path)?.into();
    sources.borrow_mut().insert(path.to_string(), text.clone());
    Ok(text)
}
