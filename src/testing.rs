//! Scripted in-process kernel for tests.
//!
//! Answers the debug protocol subset the crate speaks over a
//! [`channel_connection`]. Dumped cells land on
//! `/tmp/ipykernel_<generation>/<murmur2>.py`; `disconnect` bumps the
//! generation and drops every breakpoint, like a kernel restart would.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use crate::identity::murmur2;
use crate::protocol::{
    EventMessage, IopubMessage, RequestMessage, ResponseMessage, SourceBreakpoint,
};
use crate::transport::{channel_connection, ConnectionInfo, KernelConnection, KernelEndpoint};

pub(crate) const FAKE_SEED: u32 = 3339675911;
pub(crate) const FAKE_SUFFIX: &str = ".py";

struct FakeState {
    generation: u32,
    started: bool,
    breakpoints: BTreeMap<String, Vec<SourceBreakpoint>>,
    stopped_threads: BTreeSet<i64>,
    log: Vec<RequestMessage>,
    fail: HashSet<String>,
    hold_debug_info: Option<Arc<Notify>>,
    next_breakpoint_id: i64,
}

impl FakeState {
    fn prefix(&self) -> String {
        format!("/tmp/ipykernel_{}/", self.generation)
    }
}

pub(crate) struct FakeKernel {
    state: Arc<Mutex<FakeState>>,
    control: mpsc::UnboundedSender<IopubMessage>,
}

impl FakeKernel {
    /// Spawn a fake kernel; returns the client connection and a handle.
    pub(crate) fn spawn(kernel_name: &str) -> (Arc<dyn KernelConnection>, FakeKernel) {
        let (connection, endpoint) = channel_connection(ConnectionInfo::new(
            "Fake Kernel",
            kernel_name,
            "notebook.ipynb",
        ));
        let state = Arc::new(Mutex::new(FakeState {
            generation: 1,
            started: false,
            breakpoints: BTreeMap::new(),
            stopped_threads: BTreeSet::new(),
            log: Vec::new(),
            fail: HashSet::new(),
            hold_debug_info: None,
            next_breakpoint_id: 1,
        }));
        let (control, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(serve(endpoint, Arc::clone(&state), control_rx));

        (Arc::new(connection), FakeKernel { state, control })
    }

    pub(crate) fn prefix(&self) -> String {
        self.state.lock().prefix()
    }

    pub(crate) fn path_for(&self, code: &str) -> String {
        format!("{}{}{}", self.prefix(), murmur2(code.as_bytes(), FAKE_SEED), FAKE_SUFFIX)
    }

    pub(crate) fn requests(&self) -> Vec<RequestMessage> {
        self.state.lock().log.clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    pub(crate) fn last_request(&self, command: &str) -> Option<RequestMessage> {
        self.state
            .lock()
            .log
            .iter()
            .rev()
            .find(|request| request.command == command)
            .cloned()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|request| request.command == command)
            .count()
    }

    /// Answer every future `command` with a failure.
    pub(crate) fn fail(&self, command: &str) {
        self.state.lock().fail.insert(command.to_string());
    }

    pub(crate) fn recover(&self, command: &str) {
        self.state.lock().fail.remove(command);
    }

    /// Hold the next `debugInfo` reply until the returned notify fires.
    pub(crate) fn hold_debug_info(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state.lock().hold_debug_info = Some(Arc::clone(&notify));
        notify
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.state.lock().started = started;
    }

    /// Breakpoint lines the kernel currently holds, by path.
    pub(crate) fn breakpoints(&self) -> BTreeMap<String, Vec<i64>> {
        self.state
            .lock()
            .breakpoints
            .iter()
            .map(|(path, list)| (path.clone(), list.iter().map(|bp| bp.line).collect()))
            .collect()
    }

    pub(crate) fn publish(&self, event: EventMessage) {
        let _ = self.control.send(IopubMessage::debug_event(&event));
    }

    /// Stop `thread_id` and announce it.
    pub(crate) fn hit_breakpoint(&self, thread_id: i64) {
        self.state.lock().stopped_threads.insert(thread_id);
        self.publish(EventMessage::new(
            "stopped",
            json!({ "reason": "breakpoint", "threadId": thread_id, "allThreadsStopped": true }),
        ));
    }

    pub(crate) fn resume(&self, thread_id: i64) {
        self.state.lock().stopped_threads.remove(&thread_id);
        self.publish(EventMessage::new(
            "continued",
            json!({ "threadId": thread_id, "allThreadsContinued": true }),
        ));
    }
}

/// Poll `condition` until it holds, panicking after two seconds.
pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

async fn serve(
    mut endpoint: KernelEndpoint,
    state: Arc<Mutex<FakeState>>,
    mut control: mpsc::UnboundedReceiver<IopubMessage>,
) {
    loop {
        tokio::select! {
            request = endpoint.next_request() => {
                let Some(request) = request else { break };

                let hold = {
                    let mut state = state.lock();
                    state.log.push(request.clone());
                    if request.command == "debugInfo" {
                        state.hold_debug_info.take()
                    } else {
                        None
                    }
                };
                if let Some(hold) = hold {
                    hold.notified().await;
                }

                let response = handle(&state, &request);
                endpoint.reply(response);
            }
            Some(message) = control.recv() => endpoint.publish(message),
        }
    }
}

fn handle(state: &Mutex<FakeState>, request: &RequestMessage) -> ResponseMessage {
    let mut state = state.lock();
    if state.fail.contains(&request.command) {
        return ResponseMessage::failure(request, format!("{} failed", request.command));
    }

    let args = &request.arguments;
    let body = match request.command.as_str() {
        "initialize" => json!({
            "supportsConfigurationDoneRequest": true,
            "supportsModulesRequest": true,
            "supportsSetVariable": true,
            "exceptionBreakpointFilters": [
                { "filter": "raised", "label": "Raised Exceptions", "default": false }
            ]
        }),
        "attach" => {
            state.started = true;
            Value::Null
        }
        "disconnect" => {
            state.started = false;
            state.breakpoints.clear();
            state.stopped_threads.clear();
            state.generation += 1;
            Value::Null
        }
        "debugInfo" => {
            let breakpoints: Vec<Value> = state
                .breakpoints
                .iter()
                .map(|(path, list)| json!({ "source": path, "breakpoints": list }))
                .collect();
            json!({
                "isStarted": state.started,
                "hashMethod": "Murmur2",
                "hashSeed": FAKE_SEED,
                "tmpFilePrefix": state.prefix(),
                "tmpFileSuffix": FAKE_SUFFIX,
                "breakpoints": breakpoints,
                "stoppedThreads": state.stopped_threads.iter().collect::<Vec<_>>(),
                "richRendering": true,
                "exceptionPaths": ["Python Exceptions"],
                "copyToGlobals": true
            })
        }
        "dumpCell" => {
            let code = args["code"].as_str().unwrap_or_default();
            let path = format!(
                "{}{}{}",
                state.prefix(),
                murmur2(code.as_bytes(), FAKE_SEED),
                FAKE_SUFFIX
            );
            json!({ "sourcePath": path })
        }
        "setBreakpoints" => {
            let path = args["source"]["path"].as_str().unwrap_or_default().to_string();
            let requested: Vec<SourceBreakpoint> =
                serde_json::from_value(args["breakpoints"].clone()).unwrap_or_default();
            let mut verified = Vec::new();
            for bp in &requested {
                let id = state.next_breakpoint_id;
                state.next_breakpoint_id += 1;
                verified.push(json!({
                    "id": id,
                    "verified": true,
                    "line": bp.line,
                    "source": { "path": path }
                }));
            }
            if requested.is_empty() {
                state.breakpoints.remove(&path);
            } else {
                state.breakpoints.insert(path, requested);
            }
            json!({ "breakpoints": verified })
        }
        "continue" => {
            if let Some(thread) = args["threadId"].as_i64() {
                state.stopped_threads.remove(&thread);
            }
            json!({ "allThreadsContinued": true })
        }
        "next" | "stepIn" | "stepOut" | "configurationDone" | "setExceptionBreakpoints"
        | "copyToGlobals" => Value::Null,
        "stackTrace" => json!({
            "stackFrames": [
                { "id": 1, "name": "<module>", "line": 2, "column": 1,
                  "source": { "path": format!("{}1.py", state.prefix()) } },
                { "id": 2, "name": "helper", "line": 7, "column": 1 }
            ],
            "totalFrames": 2
        }),
        "scopes" => {
            let frame = args["frameId"].as_i64().unwrap_or(1);
            json!({
                "scopes": [
                    { "name": "Locals", "variablesReference": frame * 100 + 10, "expensive": false },
                    { "name": "Globals", "variablesReference": frame * 100 + 11, "expensive": false }
                ]
            })
        }
        "variables" => {
            let reference = args["variablesReference"].as_i64().unwrap_or(0);
            match reference % 100 {
                10 => json!({ "variables": [
                    { "name": "x", "value": "1", "type": "int", "variablesReference": 0 },
                    { "name": "d", "value": "{'k': 'v'}", "type": "dict", "variablesReference": 20 }
                ]}),
                11 => json!({ "variables": [
                    { "name": "x", "value": "1", "type": "int", "variablesReference": 0 }
                ]}),
                20 => json!({ "variables": [
                    { "name": "k", "value": "'v'", "type": "str", "variablesReference": 0 }
                ]}),
                _ => json!({ "variables": [] }),
            }
        }
        "inspectVariables" => json!({
            "variables": [
                { "name": "x", "value": "1", "type": "int", "variablesReference": 0 },
                { "name": "df", "value": "DataFrame", "type": "DataFrame", "variablesReference": 30 }
            ]
        }),
        "richInspectVariables" => json!({
            "data": { "text/plain": format!("'{}'", args["variableName"].as_str().unwrap_or_default()) },
            "metadata": {}
        }),
        "evaluate" => json!({
            "result": format!("eval({})", args["expression"].as_str().unwrap_or_default()),
            "type": "str",
            "variablesReference": 0
        }),
        "modules" => json!({
            "modules": [
                { "id": 1, "name": "os", "path": "/usr/lib/python3/os.py" },
                { "id": 2, "name": "numpy", "path": "/usr/lib/python3/numpy/__init__.py" }
            ],
            "totalModules": 2
        }),
        "source" => json!({ "content": "print(1)\n", "mimeType": "text/x-python" }),
        other => {
            return ResponseMessage::failure(request, format!("unsupported command {other}"));
        }
    };

    ResponseMessage::success(request, body)
}
