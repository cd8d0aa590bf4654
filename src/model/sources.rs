use serde::Serialize;

use crate::protocol::{Module, Source};

/// Source text currently shown for a stack frame or module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceView {
    pub source: Source,
    pub content: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourcesModel {
    current_source: Option<SourceView>,
}

impl SourcesModel {
    pub fn current_source(&self) -> Option<&SourceView> {
        self.current_source.as_ref()
    }

    pub(super) fn set_current_source(&mut self, source: Option<SourceView>) {
        self.current_source = source;
    }
}

/// Modules loaded in the kernel.
#[derive(Debug, Clone, Default)]
pub struct KernelSourcesModel {
    kernel_sources: Vec<Module>,
    filter: String,
}

impl KernelSourcesModel {
    pub fn kernel_sources(&self) -> &[Module] {
        &self.kernel_sources
    }

    /// Modules whose name contains the current filter, case-insensitively.
    pub fn filtered(&self) -> Vec<&Module> {
        let filter = self.filter.to_lowercase();
        self.kernel_sources
            .iter()
            .filter(|module| filter.is_empty() || module.name.to_lowercase().contains(&filter))
            .collect()
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub(super) fn set_kernel_sources(&mut self, modules: Vec<Module>) {
        self.kernel_sources = modules;
    }

    pub(super) fn set_filter(&mut self, filter: &str) {
        self.filter = filter.to_string();
    }
}
