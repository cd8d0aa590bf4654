//! Breakpoint reconciliation.
//!
//! A cell has no stable path on the kernel: each dump may put it somewhere
//! new. The model keys breakpoints by content id, and every dump is recorded
//! as `path -> code` so a kernel path can be traced back to the content that
//! produced it. After a kernel restart the recorded code is dumped again and
//! the breakpoints pushed to the fresh path.

use std::collections::{BTreeMap, HashSet};

use super::{absorb, engine_of, DebuggerService};
use crate::error::Result;
use crate::protocol::{
    Breakpoint, ConfigurationDoneArguments, DebugCommand, DebugInfoArguments,
    DebugInfoBreakpoints, DumpCellArguments, SetBreakpointsArguments, Source, SourceBreakpoint,
};
use crate::session::DebugSession;
use crate::sources::SourceQuery;

pub(crate) type BreakpointMap = BTreeMap<String, Vec<Breakpoint>>;

impl DebuggerService {
    /// Sync identity parameters, flags, breakpoints and stopped threads with
    /// the kernel. The debugger is started when it is not running and either
    /// `auto_start` is set or the kernel reports stopped threads.
    pub async fn restore_state(&self, auto_start: bool) -> Result<()> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;

        let Some(state) = absorb(DebugInfoArguments::COMMAND, session.restore_state().await)?
        else {
            return Ok(());
        };

        {
            let mut identity = self.identity.write();
            identity.register_hash_params(&engine, &state.hash_method, state.hash_seed)?;
            identity.register_file_params(&engine, &state.tmp_file_prefix, &state.tmp_file_suffix);
        }

        // Stopped threads can only be inspected through a running debugger
        if (auto_start || !state.stopped_threads.is_empty()) && !session.is_started() {
            session.start().await?;
        }

        let remote = self.map_breakpoints(&state.breakpoints, &engine);
        let visible = self.filter_breakpoints(remote, &session, &engine);
        let title = if session.is_started() {
            session
                .connection_info()
                .map(|info| info.name)
                .unwrap_or_else(|| "-".to_string())
        } else {
            "-".to_string()
        };

        {
            let mut model = self.model.write();
            model.set_flags(state.rich_rendering, state.copy_to_globals);
            model.set_title(title);
            model.restore_breakpoints(visible);
            model.set_stopped_threads(state.stopped_threads.iter().copied());
        }

        if !state.stopped_threads.is_empty() {
            self.refresh_frames().await?;
        } else if session.is_started() {
            self.model.write().clear_call_state();
        }

        if session.is_pausing_on_exceptions(&state.tmp_file_prefix) {
            self.send_exception_breakpoints(&session, true).await?;
        }
        Ok(())
    }

    /// Set the breakpoints of one cell. A no-op until the debugger is started.
    ///
    /// Without `path` the cell is dumped first. The kernel's breakpoint list
    /// is re-read into the model before this cell's entries are replaced by
    /// the verified reply.
    pub async fn update_breakpoints(
        &self,
        code: &str,
        breakpoints: &[Breakpoint],
        path: Option<&str>,
    ) -> Result<()> {
        let session = self.active_session()?;
        if !session.is_started() {
            tracing::debug!("[service] Debugger not started, breakpoints left unchanged");
            return Ok(());
        }
        let engine = engine_of(&session)?;

        let path = match path {
            Some(path) => {
                self.record_dump(path, code);
                path.to_string()
            }
            None => match self.dump_cell(code).await? {
                Some(path) => path,
                None => return Ok(()),
            },
        };

        if let Some(state) = absorb(DebugInfoArguments::COMMAND, session.restore_state().await)? {
            let remote = self.map_breakpoints(&state.breakpoints, &engine);
            let visible = self.filter_breakpoints(remote, &session, &engine);
            self.model.write().restore_breakpoints(visible);
        }

        let lines = unique_lines(breakpoints);
        let Some(verified) = self.set_breakpoints_at(&path, &lines).await? else {
            return Ok(());
        };
        let source_id = self.source_id(&path, &engine);
        self.model.write().set_breakpoints(&source_id, verified);

        self.call(&ConfigurationDoneArguments {}).await?;
        Ok(())
    }

    /// Remove every breakpoint from the kernel and the model.
    pub async fn clear_breakpoints(&self) -> Result<()> {
        let session = self.active_session()?;
        if !session.is_started() {
            return Ok(());
        }
        let engine = engine_of(&session)?;

        let source_ids: Vec<String> = self.model.read().breakpoints().keys().cloned().collect();
        for source_id in source_ids {
            let path = self.physical_path(&source_id, &engine);
            self.set_breakpoints_at(&path, &[]).await?;
        }
        self.model.write().restore_breakpoints(BreakpointMap::new());
        Ok(())
    }

    /// Stop and start the debugger, then re-dump every cell that carried
    /// breakpoints and push its lines to the new path.
    pub async fn restart(&self) -> Result<()> {
        let session = self.active_session()?;
        let engine = engine_of(&session)?;
        let snapshot = self.model.read().breakpoints().clone();

        self.stop().await?;
        self.start().await?;

        let mut restored = BreakpointMap::new();
        for (source_id, list) in snapshot {
            let lines = unique_lines(&list);
            let Some(code) = self.code_for_source(&source_id, &engine) else {
                // Learned from the kernel, never dumped here: the key is a kernel path
                tracing::debug!("[service] Re-pushing {} without a fresh dump", source_id);
                if let Some(verified) = self.set_breakpoints_at(&source_id, &lines).await? {
                    restored.insert(source_id, verified);
                }
                continue;
            };
            let Some(path) = self.dump_cell(&code).await? else {
                continue;
            };
            if let Some(verified) = self.set_breakpoints_at(&path, &lines).await? {
                restored.insert(self.source_id(&path, &engine), verified);
            }
        }

        let visible = self.filter_breakpoints(restored, &session, &engine);
        self.model.write().restore_breakpoints(visible);
        self.call(&ConfigurationDoneArguments {}).await?;
        tracing::info!("[service] Debugger restarted");
        Ok(())
    }

    /// Push `breakpoints` to the kernel, treating each key as a kernel path.
    pub(crate) async fn push_breakpoints(&self, breakpoints: &BreakpointMap) -> Result<BreakpointMap> {
        let mut verified_map = BreakpointMap::new();
        for (path, list) in breakpoints {
            if let Some(verified) = self.set_breakpoints_at(path, &unique_lines(list)).await? {
                verified_map.insert(path.clone(), verified);
            }
        }
        Ok(verified_map)
    }

    pub(crate) async fn dump_cell(&self, code: &str) -> Result<Option<String>> {
        let body = self
            .call(&DumpCellArguments {
                code: code.to_string(),
            })
            .await?;
        Ok(body.map(|body| {
            self.record_dump(&body.source_path, code);
            body.source_path
        }))
    }

    fn record_dump(&self, path: &str, code: &str) {
        self.dumped
            .lock()
            .insert(path.to_string(), code.to_string());
    }

    async fn set_breakpoints_at(&self, path: &str, lines: &[i64]) -> Result<Option<Vec<Breakpoint>>> {
        let arguments = SetBreakpointsArguments::for_path(
            path,
            lines.iter().copied().map(SourceBreakpoint::at_line).collect(),
        );
        let reply = self.call(&arguments).await?;
        Ok(reply.map(|body| dedup_by_line(body.breakpoints)))
    }

    /// Content id of whatever was dumped at `path`, or the path itself when
    /// the dump is unknown.
    pub(crate) fn source_id(&self, path: &str, engine: &str) -> String {
        let code = self.dumped.lock().get(path).cloned();
        code.and_then(|code| self.identity.read().compute_id(&code, engine).ok())
            .unwrap_or_else(|| path.to_string())
    }

    /// Code recorded for a source id, looked up by path first and by content
    /// id second.
    pub(crate) fn code_for_source(&self, source_id: &str, engine: &str) -> Option<String> {
        let dumped = self.dumped.lock();
        if let Some(code) = dumped.get(source_id) {
            return Some(code.clone());
        }
        let identity = self.identity.read();
        dumped
            .values()
            .find(|code| {
                identity
                    .compute_id(code, engine)
                    .map(|id| id == source_id)
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn physical_path(&self, source_id: &str, engine: &str) -> String {
        let dumped = self.dumped.lock();
        if dumped.contains_key(source_id) {
            return source_id.to_string();
        }
        let identity = self.identity.read();
        dumped
            .iter()
            .find(|(_, code)| {
                identity
                    .compute_id(code, engine)
                    .map(|id| id == source_id)
                    .unwrap_or(false)
            })
            .map(|(path, _)| path.clone())
            .unwrap_or_else(|| source_id.to_string())
    }

    /// Re-key the kernel's path-keyed breakpoint list by content id.
    fn map_breakpoints(&self, remote: &[DebugInfoBreakpoints], engine: &str) -> BreakpointMap {
        remote
            .iter()
            .map(|entry| {
                let list = entry
                    .breakpoints
                    .iter()
                    .map(|bp| Breakpoint {
                        line: Some(bp.line),
                        verified: true,
                        source: Some(Source::from_path(&entry.source)),
                        ..Default::default()
                    })
                    .collect();
                (self.source_id(&entry.source, engine), list)
            })
            .collect()
    }

    /// Keep only sources shown by a live editor. Without an editor lookup
    /// everything is kept.
    fn filter_breakpoints(
        &self,
        breakpoints: BreakpointMap,
        session: &DebugSession,
        engine: &str,
    ) -> BreakpointMap {
        let Some(sources) = &self.sources else {
            return breakpoints;
        };
        let path = session
            .connection_info()
            .map(|info| info.path)
            .unwrap_or_default();

        let total = breakpoints.len();
        let visible: BreakpointMap = breakpoints
            .into_iter()
            .filter(|(content_id, _)| {
                !sources
                    .find(&SourceQuery {
                        engine: engine.to_string(),
                        path: path.clone(),
                        content_id: content_id.clone(),
                        focus: false,
                    })
                    .is_empty()
            })
            .collect();

        if visible.len() < total {
            tracing::debug!(
                "[service] {} breakpoint source(s) have no open editor and stay hidden",
                total - visible.len()
            );
        }
        visible
    }
}

/// Requested lines in order, duplicates and line-less entries removed.
pub(crate) fn unique_lines(breakpoints: &[Breakpoint]) -> Vec<i64> {
    let mut seen = HashSet::new();
    breakpoints
        .iter()
        .filter_map(|bp| bp.line)
        .filter(|line| seen.insert(*line))
        .collect()
}

fn dedup_by_line(breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
    let mut seen = HashSet::new();
    breakpoints
        .into_iter()
        .filter(|bp| bp.line.map(|line| seen.insert(line)).unwrap_or(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_lines_keeps_first_occurrence() {
        let breakpoints = vec![
            Breakpoint::pending(3),
            Breakpoint::pending(1),
            Breakpoint::pending(3),
            Breakpoint::default(),
        ];
        assert_eq!(unique_lines(&breakpoints), vec![3, 1]);
    }

    #[test]
    fn test_dedup_by_line() {
        let verified = vec![
            Breakpoint {
                id: Some(1),
                verified: true,
                line: Some(2),
                ..Default::default()
            },
            Breakpoint {
                id: Some(2),
                verified: true,
                line: Some(2),
                ..Default::default()
            },
        ];
        let deduped = dedup_by_line(verified);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].id, Some(1));
    }
}
