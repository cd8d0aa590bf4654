//! Saving and restoring debugger state.
//!
//! A [`DebuggerState`] is the cell texts plus the breakpoints keyed by
//! source id. Restoring dumps every cell on the attached kernel and re-homes
//! each breakpoint key onto that kernel's current prefix and suffix, so a
//! state saved against one kernel instance can be replayed on another.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::breakpoints::BreakpointMap;
use super::{engine_of, DebuggerService};
use crate::error::{DebuggerError, Result};
use crate::protocol::ConfigurationDoneArguments;
use crate::sources::SourceQuery;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerState {
    pub cells: Vec<String>,
    pub breakpoints: BreakpointMap,
}

/// On-disk envelope for a [`DebuggerState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerStateFile {
    pub saved_at: DateTime<Utc>,
    pub engine: String,
    pub state: DebuggerState,
}

impl DebuggerStateFile {
    pub fn new(engine: impl Into<String>, state: DebuggerState) -> Self {
        Self {
            saved_at: Utc::now(),
            engine: engine.into(),
            state,
        }
    }

    /// Write as pretty JSON through a temp file and rename.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json).await?;
        tokio::fs::rename(&temp_path, path).await?;

        tracing::debug!("[service] Saved debugger state to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

impl DebuggerService {
    /// Snapshot of the cells carrying breakpoints and the breakpoints
    /// themselves.
    ///
    /// Cell text comes from the editors showing each source, falling back to
    /// the last dumped text.
    pub fn get_debugger_state(&self) -> DebuggerState {
        let breakpoints = self.model.read().breakpoints().clone();
        let info = self.session().and_then(|session| session.connection_info());
        let engine = info
            .as_ref()
            .map(|info| info.kernel_name.clone())
            .unwrap_or_default();
        let path = info.map(|info| info.path).unwrap_or_default();

        let mut cells: Vec<String> = Vec::new();
        for source_id in breakpoints.keys() {
            let mut found: Vec<String> = match &self.sources {
                Some(sources) => sources
                    .find(&SourceQuery {
                        engine: engine.clone(),
                        path: path.clone(),
                        content_id: source_id.clone(),
                        focus: false,
                    })
                    .into_iter()
                    .map(|editor| editor.source)
                    .collect(),
                None => Vec::new(),
            };
            if found.is_empty() {
                found.extend(self.code_for_source(source_id, &engine));
            }

            for code in found {
                if !cells.contains(&code) {
                    cells.push(code);
                }
            }
        }

        DebuggerState { cells, breakpoints }
    }

    /// Replay a saved state on the attached kernel. Returns whether the
    /// kernel accepted the final `configurationDone`.
    pub async fn restore_debugger_state(&self, state: &DebuggerState) -> Result<bool> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;

        if !session.is_started() {
            self.start().await?;
        }
        if self.identity.read().file_params(&engine).is_none() {
            self.restore_state(false).await?;
        }

        for cell in &state.cells {
            self.dump_cell(cell).await?;
        }

        let mut rehomed = BreakpointMap::new();
        for (source_id, list) in &state.breakpoints {
            let rewritten = self.identity.read().rewrite_id(source_id, &engine)?;
            let target = match rewritten {
                Some(id) => id,
                None => {
                    tracing::warn!(
                        "[service] No hash segment in {}, keeping the key as is",
                        source_id
                    );
                    source_id.clone()
                }
            };
            rehomed.insert(target, list.clone());
        }

        let verified = self.push_breakpoints(&rehomed).await?;
        self.model.write().restore_breakpoints(verified);

        let configured = self.call(&ConfigurationDoneArguments {}).await?.is_some();
        self.restore_state(false).await?;
        Ok(configured)
    }

    /// Save the current state for the attached engine to `path`.
    pub async fn save_debugger_state(&self, path: &Path) -> Result<DebuggerStateFile> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;
        let file = DebuggerStateFile::new(engine, self.get_debugger_state());
        file.save(path).await?;
        Ok(file)
    }

    /// Load a state file and replay it on the attached kernel.
    pub async fn load_debugger_state(&self, path: &Path) -> Result<bool> {
        let file = DebuggerStateFile::load(path).await?;
        let engine = self
            .session()
            .and_then(|session| session.connection_info())
            .map(|info| info.kernel_name)
            .ok_or(DebuggerError::NoActiveConnection)?;
        if file.engine != engine {
            tracing::info!(
                "[service] Restoring state saved for {} on {}",
                file.engine,
                engine
            );
        }
        self.restore_debugger_state(&file.state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Breakpoint;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut breakpoints = BreakpointMap::new();
        breakpoints.insert(
            "/tmp/ipykernel_1/1626409200.py".to_string(),
            vec![Breakpoint::pending(1)],
        );
        let file = DebuggerStateFile::new(
            "python3",
            DebuggerState {
                cells: vec!["print(1)".to_string()],
                breakpoints,
            },
        );

        file.save(&path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = DebuggerStateFile::load(&path).await.unwrap();
        assert_eq!(loaded, file);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = DebuggerStateFile::load(&dir.path().join("absent.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, DebuggerError::Io(_)));
    }

    #[tokio::test]
    async fn test_state_file_field_names() {
        let file = DebuggerStateFile::new("python3", DebuggerState::default());
        let value = serde_json::to_value(&file).unwrap();
        assert!(value.get("savedAt").is_some());
        assert_eq!(value["engine"], serde_json::json!("python3"));
        assert_eq!(value["state"]["cells"], serde_json::json!([]));
    }
}
