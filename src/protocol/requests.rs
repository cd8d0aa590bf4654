//! Typed request arguments and reply bodies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::*;
use super::DebugCommand;

// ============================================================================
// Session lifecycle
// ============================================================================

/// Client capabilities declared by `initialize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_name: String,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub path_format: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    pub supports_variable_type: bool,
    pub supports_variable_paging: bool,
    pub supports_run_in_terminal_request: bool,
    pub locale: String,
}

impl InitializeArguments {
    pub fn for_adapter(adapter_id: impl Into<String>) -> Self {
        Self {
            client_id: "kdbg".to_string(),
            client_name: "kdbg".to_string(),
            adapter_id: adapter_id.into(),
            path_format: "path".to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            supports_variable_type: true,
            supports_variable_paging: true,
            supports_run_in_terminal_request: true,
            locale: "en".to_string(),
        }
    }
}

impl DebugCommand for InitializeArguments {
    const COMMAND: &'static str = "initialize";
    type Body = Capabilities;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttachArguments {}

impl DebugCommand for AttachArguments {
    const COMMAND: &'static str = "attach";
    type Body = Value;
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    pub restart: bool,
    pub terminate_debuggee: bool,
}

impl DebugCommand for DisconnectArguments {
    const COMMAND: &'static str = "disconnect";
    type Body = Value;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigurationDoneArguments {}

impl DebugCommand for ConfigurationDoneArguments {
    const COMMAND: &'static str = "configurationDone";
    type Body = Value;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DebugInfoArguments {}

impl DebugCommand for DebugInfoArguments {
    const COMMAND: &'static str = "debugInfo";
    type Body = DebugInfoResponseBody;
}

/// Breakpoints the kernel holds for one source path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfoBreakpoints {
    pub source: String,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpoint>,
}

/// Authoritative kernel-side debugger state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugInfoResponseBody {
    pub is_started: bool,
    pub hash_method: String,
    pub hash_seed: u32,
    pub tmp_file_prefix: String,
    pub tmp_file_suffix: String,
    pub breakpoints: Vec<DebugInfoBreakpoints>,
    pub stopped_threads: Vec<i64>,
    pub rich_rendering: bool,
    pub exception_paths: Vec<String>,
    pub copy_to_globals: bool,
}

// ============================================================================
// Sources and breakpoints
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DumpCellArguments {
    pub code: String,
}

impl DebugCommand for DumpCellArguments {
    const COMMAND: &'static str = "dumpCell";
    type Body = DumpCellResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpCellResponseBody {
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub breakpoints: Vec<SourceBreakpoint>,
    pub source: Source,
    pub source_modified: bool,
}

impl SetBreakpointsArguments {
    pub fn for_path(path: impl Into<String>, breakpoints: Vec<SourceBreakpoint>) -> Self {
        Self {
            breakpoints,
            source: Source::from_path(path),
            source_modified: false,
        }
    }
}

impl DebugCommand for SetBreakpointsArguments {
    const COMMAND: &'static str = "setBreakpoints";
    type Body = SetBreakpointsResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetBreakpointsResponseBody {
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    pub filters: Vec<String>,
    pub exception_options: Vec<ExceptionOptions>,
}

impl DebugCommand for SetExceptionBreakpointsArguments {
    const COMMAND: &'static str = "setExceptionBreakpoints";
    type Body = Value;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    pub source: Source,
    pub source_reference: i64,
}

impl DebugCommand for SourceArguments {
    const COMMAND: &'static str = "source";
    type Body = SourceResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponseBody {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModulesArguments {}

impl DebugCommand for ModulesArguments {
    const COMMAND: &'static str = "modules";
    type Body = ModulesResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesResponseBody {
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_modules: Option<i64>,
}

// ============================================================================
// Execution control
// ============================================================================

macro_rules! thread_command {
    ($name:ident, $command:literal) => {
        #[derive(Debug, Clone, Serialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub thread_id: i64,
        }

        impl DebugCommand for $name {
            const COMMAND: &'static str = $command;
            type Body = Value;
        }
    };
}

thread_command!(ContinueArguments, "continue");
thread_command!(NextArguments, "next");
thread_command!(StepInArguments, "stepIn");
thread_command!(StepOutArguments, "stepOut");

// ============================================================================
// Inspection
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
}

impl DebugCommand for StackTraceArguments {
    const COMMAND: &'static str = "stackTrace";
    type Body = StackTraceResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    #[serde(default)]
    pub stack_frames: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

impl DebugCommand for ScopesArguments {
    const COMMAND: &'static str = "scopes";
    type Body = ScopesResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopesResponseBody {
    #[serde(default)]
    pub scopes: Vec<Scope>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
}

impl DebugCommand for VariablesArguments {
    const COMMAND: &'static str = "variables";
    type Body = VariablesResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablesResponseBody {
    #[serde(default)]
    pub variables: Vec<Variable>,
}

/// Lists the variables defined at the top level of the kernel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectVariablesArguments {}

impl DebugCommand for InspectVariablesArguments {
    const COMMAND: &'static str = "inspectVariables";
    type Body = VariablesResponseBody;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RichInspectVariablesArguments {
    pub variable_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
}

impl DebugCommand for RichInspectVariablesArguments {
    const COMMAND: &'static str = "richInspectVariables";
    type Body = RichVariableBody;
}

/// Mime bundle rendering of a variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichVariableBody {
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyToGlobalsArguments {
    pub src_variable_name: String,
    pub dst_variable_name: String,
    pub src_frame_id: i64,
}

impl DebugCommand for CopyToGlobalsArguments {
    const COMMAND: &'static str = "copyToGlobals";
    type Body = Value;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub context: String,
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
}

impl DebugCommand for EvaluateArguments {
    const COMMAND: &'static str = "evaluate";
    type Body = EvaluateResponseBody;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    #[serde(default)]
    pub result: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}
