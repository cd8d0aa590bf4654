//! Frames, scopes, variables and other read-mostly requests.

use futures::future::join_all;

use super::DebuggerService;
use crate::error::Result;
use crate::model::{ScopeEntry, SourceView, VariableKey};
use crate::protocol::{
    CopyToGlobalsArguments, EvaluateArguments, EvaluateResponseBody, InspectVariablesArguments,
    ModulesArguments, RichInspectVariablesArguments, RichVariableBody, ScopesArguments, Source,
    SourceArguments, StackTraceArguments, Variable, VariablesArguments,
};

impl DebuggerService {
    /// Fetch the current thread's frames, the top frame's scopes and their
    /// variables, and store frames and scopes in one step.
    pub(crate) async fn refresh_frames(&self) -> Result<()> {
        let thread_id = self.model.read().current_thread();
        let Some(trace) = self.call(&StackTraceArguments { thread_id }).await? else {
            return Ok(());
        };

        let frames = trace.stack_frames;
        let Some(top) = frames.first().map(|frame| frame.id) else {
            self.model.write().clear_call_state();
            return Ok(());
        };

        let scopes = self.fetch_scopes(top).await?;
        self.model.write().set_call_state(frames, scopes);
        Ok(())
    }

    async fn fetch_scopes(&self, frame_id: i64) -> Result<Vec<ScopeEntry>> {
        let Some(body) = self.call(&ScopesArguments { frame_id }).await? else {
            return Ok(Vec::new());
        };

        let variables = join_all(
            body.scopes
                .iter()
                .map(|scope| self.inspect_variable(scope.variables_reference)),
        )
        .await;

        body.scopes
            .into_iter()
            .zip(variables)
            .map(|(scope, variables)| {
                Ok(ScopeEntry::new(
                    scope.name,
                    scope.variables_reference,
                    variables?,
                ))
            })
            .collect()
    }

    /// Children of a variables reference. Empty on a failed reply.
    pub async fn inspect_variable(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        let body = self
            .call(&VariablesArguments {
                variables_reference,
            })
            .await?;
        Ok(body.map(|body| body.variables).unwrap_or_default())
    }

    /// Fetch the children of the variable at `key` and splice them into the
    /// model, replacing earlier children.
    pub async fn expand_variable(&self, key: VariableKey) -> Result<bool> {
        let children = self.inspect_variable(key.variables_reference).await?;
        Ok(self.model.write().expand_variable(key, children))
    }

    /// Make `frame_id` current and load its scopes.
    pub async fn select_frame(&self, frame_id: i64) -> Result<bool> {
        if !self.model.write().select_frame(frame_id) {
            tracing::debug!("[service] Frame {} is not on the current stack", frame_id);
            return Ok(false);
        }
        let scopes = self.fetch_scopes(frame_id).await?;
        self.model.write().set_scopes(scopes);
        Ok(true)
    }

    /// Evaluate in the current frame. `None` when the kernel rejects it.
    pub async fn evaluate(&self, expression: &str) -> Result<Option<EvaluateResponseBody>> {
        let frame_id = self.model.read().current_frame().map(|frame| frame.id);
        let reply = self
            .call(&EvaluateArguments {
                context: "repl".to_string(),
                expression: expression.to_string(),
                frame_id,
            })
            .await?;

        if reply.is_some() {
            // Evaluation may have changed program state
            self.model.write().clear_call_state();
            self.refresh_frames().await?;
        }
        Ok(reply)
    }

    /// List variables defined at the kernel's top level as a single
    /// "Globals" scope.
    pub async fn display_defined_variables(&self) -> Result<()> {
        let Some(body) = self.call(&InspectVariablesArguments {}).await? else {
            return Ok(());
        };
        self.model
            .write()
            .set_scopes(vec![ScopeEntry::new("Globals", 0, body.variables)]);
        Ok(())
    }

    pub async fn display_modules(&self) -> Result<()> {
        let Some(body) = self.call(&ModulesArguments {}).await? else {
            return Ok(());
        };
        self.model.write().set_kernel_sources(body.modules);
        Ok(())
    }

    /// Fetch a source's text and make it the current source.
    pub async fn get_source(&self, source: Source) -> Result<Option<SourceView>> {
        let source_reference = source.source_reference.unwrap_or(0);
        let Some(body) = self
            .call(&SourceArguments {
                source: source.clone(),
                source_reference,
            })
            .await?
        else {
            return Ok(None);
        };

        let view = SourceView {
            source,
            content: body.content,
            mime_type: body.mime_type,
        };
        self.model.write().set_current_source(Some(view.clone()));
        Ok(Some(view))
    }

    pub async fn inspect_rich_variable(
        &self,
        variable_name: &str,
        frame_id: Option<i64>,
    ) -> Result<Option<RichVariableBody>> {
        self.call(&RichInspectVariablesArguments {
            variable_name: variable_name.to_string(),
            frame_id,
        })
        .await
    }

    /// Copy a frame-local variable into the kernel's globals and refresh the
    /// defined variables.
    pub async fn copy_to_globals(&self, source: &str, destination: &str, frame_id: i64) -> Result<bool> {
        let copied = self
            .call(&CopyToGlobalsArguments {
                src_variable_name: source.to_string(),
                dst_variable_name: destination.to_string(),
                src_frame_id: frame_id,
            })
            .await?
            .is_some();
        if copied {
            self.display_defined_variables().await?;
        }
        Ok(copied)
    }
}
