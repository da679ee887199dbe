//! CompiledGraph struct and accessors

use crate::builder::CompileOptions;
use crate::graph::Graph;
use crate::interrupt::InterruptConfig;
use crate::settings::EngineSettings;
use crate::state::StateSchema;
use crate::store::Store;
use std::sync::Arc;
use stepgraph_checkpoint::CheckpointSaver;

/// Compiled graph ready for execution. Cloning is cheap.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<Graph>,
    pub(crate) schema: Arc<StateSchema>,
    pub(crate) checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) interrupts: InterruptConfig,
    pub(crate) settings: EngineSettings,
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph, schema: StateSchema, options: CompileOptions) -> Self {
        Self {
            graph: Arc::new(graph),
            schema: Arc::new(schema),
            checkpointer: options.checkpointer,
            store: options.store,
            interrupts: options.interrupts,
            settings: options.settings,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn CheckpointSaver>> {
        self.checkpointer.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    pub fn interrupt_config(&self) -> &InterruptConfig {
        &self.interrupts
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Same graph running without persistence and with `store`. Used to run
    /// a graph as a node of another graph.
    pub(crate) fn detached(&self, store: Option<Arc<dyn Store>>) -> Self {
        Self {
            checkpointer: None,
            store: self.store.clone().or(store),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.graph.order)
            .field("has_checkpointer", &self.checkpointer.is_some())
            .field("has_store", &self.store.is_some())
            .field("interrupts", &self.interrupts)
            .finish()
    }
}
