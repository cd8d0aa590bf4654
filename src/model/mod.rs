//! In-memory debugger state.
//!
//! [`DebuggerModel`] holds no connection and performs no I/O. Every mutator
//! updates its fields and emits one [`ModelChange`] on the change channel.
//! Frames and scopes only move together, through [`DebuggerModel::set_call_state`]
//! and [`DebuggerModel::clear_call_state`].

mod breakpoints;
mod callstack;
mod sources;
mod variables;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::protocol::{Breakpoint, Module, StackFrame, Variable};

pub use breakpoints::BreakpointsModel;
pub use callstack::CallstackModel;
pub use sources::{KernelSourcesModel, SourceView, SourcesModel};
pub use variables::{ScopeEntry, VariableKey, VariableNode, VariablesModel};

const CHANGE_CAPACITY: usize = 128;

/// Thread assumed current when the kernel has not reported any stopped thread.
pub const DEFAULT_THREAD_ID: i64 = 1;

/// Which part of the model changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelChange {
    Breakpoints,
    CallState,
    CurrentFrame,
    Scopes,
    StoppedThreads,
    CurrentSource,
    KernelSources,
    Title,
    Flags,
    Cleared,
}

#[derive(Debug)]
pub struct DebuggerModel {
    breakpoints: BreakpointsModel,
    callstack: CallstackModel,
    variables: VariablesModel,
    sources: SourcesModel,
    kernel_sources: KernelSourcesModel,
    stopped_threads: BTreeSet<i64>,
    title: String,
    has_rich_variable_rendering: bool,
    support_copy_to_globals: bool,
    changes: broadcast::Sender<ModelChange>,
}

impl Default for DebuggerModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DebuggerModel {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            breakpoints: BreakpointsModel::default(),
            callstack: CallstackModel::default(),
            variables: VariablesModel::default(),
            sources: SourcesModel::default(),
            kernel_sources: KernelSourcesModel::default(),
            stopped_threads: BTreeSet::new(),
            title: "-".to_string(),
            has_rich_variable_rendering: false,
            support_copy_to_globals: false,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: ModelChange) {
        let _ = self.changes.send(change);
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    pub fn breakpoints(&self) -> &BTreeMap<String, Vec<Breakpoint>> {
        self.breakpoints.breakpoints()
    }

    pub fn breakpoints_for(&self, source_id: &str) -> &[Breakpoint] {
        self.breakpoints.get(source_id)
    }

    pub fn callstack(&self) -> &CallstackModel {
        &self.callstack
    }

    pub fn frames(&self) -> &[StackFrame] {
        self.callstack.frames()
    }

    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.callstack.current_frame()
    }

    pub fn scopes(&self) -> &[ScopeEntry] {
        self.variables.scopes()
    }

    pub fn stopped_threads(&self) -> &BTreeSet<i64> {
        &self.stopped_threads
    }

    /// Lowest stopped thread, or the default thread when none is stopped.
    pub fn current_thread(&self) -> i64 {
        self.stopped_threads
            .iter()
            .next()
            .copied()
            .unwrap_or(DEFAULT_THREAD_ID)
    }

    pub fn sources(&self) -> &SourcesModel {
        &self.sources
    }

    pub fn kernel_sources(&self) -> &KernelSourcesModel {
        &self.kernel_sources
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn has_rich_variable_rendering(&self) -> bool {
        self.has_rich_variable_rendering
    }

    pub fn support_copy_to_globals(&self) -> bool {
        self.support_copy_to_globals
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    /// Replace the whole breakpoint mapping.
    pub fn restore_breakpoints(&mut self, breakpoints: BTreeMap<String, Vec<Breakpoint>>) {
        self.breakpoints.restore(breakpoints);
        self.emit(ModelChange::Breakpoints);
    }

    /// Replace one source's breakpoints.
    pub fn set_breakpoints(&mut self, source_id: &str, breakpoints: Vec<Breakpoint>) {
        self.breakpoints.set(source_id, breakpoints);
        self.emit(ModelChange::Breakpoints);
    }

    pub fn set_call_state(&mut self, frames: Vec<StackFrame>, scopes: Vec<ScopeEntry>) {
        self.callstack.set_frames(frames);
        self.variables.set_scopes(scopes);
        self.emit(ModelChange::CallState);
    }

    pub fn clear_call_state(&mut self) {
        self.callstack.clear();
        self.variables.clear();
        self.emit(ModelChange::CallState);
    }

    /// Make `frame_id` the current frame. Returns false for an unknown frame.
    pub fn select_frame(&mut self, frame_id: i64) -> bool {
        let selected = self.callstack.select(frame_id);
        if selected {
            self.emit(ModelChange::CurrentFrame);
        }
        selected
    }

    /// Replace the scopes without touching the frames (frame selection,
    /// defined-variable listing).
    pub fn set_scopes(&mut self, scopes: Vec<ScopeEntry>) {
        self.variables.set_scopes(scopes);
        self.emit(ModelChange::Scopes);
    }

    pub fn expand_variable(&mut self, key: VariableKey, children: Vec<Variable>) -> bool {
        let expanded = self.variables.expand(key, children);
        if expanded {
            self.emit(ModelChange::Scopes);
        }
        expanded
    }

    pub fn add_stopped_thread(&mut self, thread_id: i64) {
        self.stopped_threads.insert(thread_id);
        self.emit(ModelChange::StoppedThreads);
    }

    pub fn remove_stopped_thread(&mut self, thread_id: i64) {
        self.stopped_threads.remove(&thread_id);
        self.emit(ModelChange::StoppedThreads);
    }

    pub fn set_stopped_threads(&mut self, threads: impl IntoIterator<Item = i64>) {
        self.stopped_threads = threads.into_iter().collect();
        self.emit(ModelChange::StoppedThreads);
    }

    pub fn set_current_source(&mut self, source: Option<SourceView>) {
        self.sources.set_current_source(source);
        self.emit(ModelChange::CurrentSource);
    }

    pub fn set_kernel_sources(&mut self, modules: Vec<Module>) {
        self.kernel_sources.set_kernel_sources(modules);
        self.emit(ModelChange::KernelSources);
    }

    pub fn set_kernel_sources_filter(&mut self, filter: &str) {
        self.kernel_sources.set_filter(filter);
        self.emit(ModelChange::KernelSources);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.emit(ModelChange::Title);
    }

    pub fn set_flags(&mut self, rich_rendering: bool, copy_to_globals: bool) {
        self.has_rich_variable_rendering = rich_rendering;
        self.support_copy_to_globals = copy_to_globals;
        self.emit(ModelChange::Flags);
    }

    /// Reset session state. Title and capability flags survive.
    pub fn clear(&mut self) {
        self.stopped_threads.clear();
        self.breakpoints.clear();
        self.callstack.clear();
        self.variables.clear();
        self.sources.set_current_source(None);
        self.kernel_sources.set_kernel_sources(Vec::new());
        self.emit(ModelChange::Cleared);
    }
}
