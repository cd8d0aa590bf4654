//! Editor lookup.
//!
//! The service asks a [`DebuggerSources`] implementation which live editors
//! currently show a given content id. Only breakpoints with a live editor are
//! surfaced to the model, and editor text is what gets persisted.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::identity::SharedIdentityRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    /// Engine (kernel name) the content id was computed for.
    pub engine: String,
    /// Document path of the connection.
    pub path: String,
    pub content_id: String,
    /// Whether matching editors should be brought to front.
    pub focus: bool,
}

/// A live editor showing some source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorHandle {
    pub id: String,
    pub source: String,
}

pub trait DebuggerSources: Send + Sync {
    fn find(&self, query: &SourceQuery) -> Vec<EditorHandle>;
}

/// Editors held in memory, matched by recomputing each editor's content id.
///
/// Used by the CLI, where `break` and `load` register cell text as open
/// editors.
pub struct OpenEditors {
    identity: SharedIdentityRegistry,
    editors: RwLock<Vec<EditorHandle>>,
}

impl OpenEditors {
    pub fn new(identity: SharedIdentityRegistry) -> Arc<Self> {
        Arc::new(Self {
            identity,
            editors: RwLock::new(Vec::new()),
        })
    }

    /// Register an editor, replacing one with the same id.
    pub fn open(&self, id: impl Into<String>, source: impl Into<String>) {
        let handle = EditorHandle {
            id: id.into(),
            source: source.into(),
        };
        let mut editors = self.editors.write();
        editors.retain(|editor| editor.id != handle.id);
        editors.push(handle);
    }

    pub fn close(&self, id: &str) {
        self.editors.write().retain(|editor| editor.id != id);
    }

    pub fn len(&self) -> usize {
        self.editors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.editors.read().is_empty()
    }
}

impl DebuggerSources for OpenEditors {
    fn find(&self, query: &SourceQuery) -> Vec<EditorHandle> {
        let identity = self.identity.read();
        self.editors
            .read()
            .iter()
            .filter(|editor| {
                identity
                    .compute_id(&editor.source, &query.engine)
                    .map(|id| id == query.content_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::CodeIdentityRegistry;

    #[test]
    fn test_open_editors_match_by_content_id() {
        let mut registry = CodeIdentityRegistry::new();
        registry.register_hash_params("py", "Murmur2", 1).unwrap();
        registry.register_file_params("py", "jupyter_", ".py");
        let identity = registry.shared();

        let editors = OpenEditors::new(identity.clone());
        editors.open("cell-1", "x=1");
        editors.open("cell-2", "print(1)");
        editors.open("cell-1", "x=1");
        assert_eq!(editors.len(), 2);

        let query = SourceQuery {
            engine: "py".to_string(),
            path: "nb.ipynb".to_string(),
            content_id: "jupyter_3908581943.py".to_string(),
            focus: false,
        };
        let found = editors.find(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "cell-1");

        editors.close("cell-1");
        assert!(editors.find(&query).is_empty());

        // Unknown engine never matches
        let other = SourceQuery {
            engine: "julia".to_string(),
            ..query
        };
        assert!(editors.find(&other).is_empty());
    }
}
