//! Process-wide runtime residency.
//!
//! Each logical slot holds at most one live runtime. `acquire` builds and
//! loads the slot's runtime on first use and hands back the same handle
//! afterwards, so concurrent callers share a single resident model.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};

use super::{build_runtime, GgufLoader, ModelLoader, ModelRuntime};

/// The two runtime slots a process can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The general chat backend, remote or local per configuration
    Chat,
    /// The trainable adapter backend
    Adapter,
}

pub struct RuntimeRegistry {
    chat_config: RuntimeConfig,
    adapter_config: Option<RuntimeConfig>,
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<Slot, Arc<dyn ModelRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new(chat_config: RuntimeConfig, adapter_config: Option<RuntimeConfig>) -> Self {
        Self::with_loader(chat_config, adapter_config, Arc::new(GgufLoader))
    }

    pub fn with_loader(
        chat_config: RuntimeConfig,
        adapter_config: Option<RuntimeConfig>,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        Self {
            chat_config,
            adapter_config,
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Whether this process can host training jobs at all.
    pub fn supports_training(&self) -> bool {
        self.adapter_config.is_some()
    }

    /// The resident runtime for `slot`, loading it first if necessary.
    ///
    /// Holding the slot table lock across the load means a second caller
    /// for the same slot waits instead of double-loading.
    pub fn acquire(&self, slot: Slot) -> Result<Arc<dyn ModelRuntime>> {
        let mut slots = self.slots.lock();
        if let Some(runtime) = slots.get(&slot) {
            return Ok(Arc::clone(runtime));
        }

        let config = match slot {
            Slot::Chat => &self.chat_config,
            Slot::Adapter => self
                .adapter_config
                .as_ref()
                .ok_or(RuntimeError::TrainingUnsupported)?,
        };

        info!(?slot, kind = %config.kind(), "loading runtime");
        let runtime = build_runtime(config.kind(), config, Arc::clone(&self.loader))?;
        runtime.load()?;
        slots.insert(slot, Arc::clone(&runtime));
        Ok(runtime)
    }

    /// The resident runtime for `slot`, without loading.
    pub fn get(&self, slot: Slot) -> Option<Arc<dyn ModelRuntime>> {
        self.slots.lock().get(&slot).cloned()
    }

    /// Install a pre-built runtime into a slot, replacing (and unloading)
    /// any resident one.
    pub fn install(&self, slot: Slot, runtime: Arc<dyn ModelRuntime>) {
        let previous = self.slots.lock().insert(slot, runtime);
        if let Some(previous) = previous {
            previous.unload();
        }
    }

    /// Evict and unload the resident runtime for `slot`, if any.
    pub fn reset(&self, slot: Slot) {
        let evicted = self.slots.lock().remove(&slot);
        if let Some(runtime) = evicted {
            info!(?slot, "unloading runtime");
            runtime.unload();
        }
    }

    /// Evict everything, heaviest first: the adapter slot carries training
    /// state and goes down before the chat slot.
    pub fn reset_all(&self) {
        self.reset(Slot::Adapter);
        self.reset(Slot::Chat);
    }
}
