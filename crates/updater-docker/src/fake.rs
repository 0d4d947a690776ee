use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::driver::{ContainerDriver, ContainerSummary, ExecOutput};
use crate::error::DriverError;

#[derive(Default)]
struct Inner {
    running: Vec<ContainerSummary>,
    inspect_docs: HashMap<String, Value>,
    image_labels: HashMap<String, String>,
    exec_responses: VecDeque<ExecOutput>,
    failing: HashSet<&'static str>,
    calls: Vec<String>,
    run_args: Vec<Vec<String>>,
}

/// Scripted [`ContainerDriver`] for tests: canned listings, inspect
/// documents, exec responses, and per-operation failure injection. Records
/// every call so tests can assert on ordering and arguments.
#[derive(Default)]
pub struct FakeDriver {
    inner: Mutex<Inner>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_running(self, running: Vec<ContainerSummary>) -> Self {
        self.inner.lock().unwrap().running = running;
        self
    }

    /// Register the inspect document served for `reference`. Containers
    /// created later through `run` can be pre-registered the same way.
    pub fn with_inspect(self, reference: &str, doc: Value) -> Self {
        self.inner
            .lock()
            .unwrap()
            .inspect_docs
            .insert(reference.to_string(), doc);
        self
    }

    /// Queue the next exec response; responses are consumed in FIFO order.
    pub fn with_exec_response(self, output: ExecOutput) -> Self {
        self.inner.lock().unwrap().exec_responses.push_back(output);
        self
    }

    pub fn with_image_label(self, image: &str, label: &str, value: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .image_labels
            .insert(format!("{}\u{0}{}", image, label), value.to_string());
        self
    }

    /// Make one operation fail: "ping", "list", "pull", "stop", "remove",
    /// "restart", "run", "exec", "prune".
    pub fn failing(self, op: &'static str) -> Self {
        self.inner.lock().unwrap().failing.insert(op);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn run_invocations(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().run_args.clone()
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn fails(&self, op: &str) -> bool {
        self.inner.lock().unwrap().failing.contains(op)
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ping(&self) -> Result<(), DriverError> {
        self.record("ping".to_string());
        if self.fails("ping") {
            return Err(DriverError::Unavailable("fake daemon down".to_string()));
        }
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<ContainerSummary>, DriverError> {
        self.record("list".to_string());
        if self.fails("list") {
            return Err(DriverError::Internal("fake list failure".to_string()));
        }
        Ok(self.inner.lock().unwrap().running.clone())
    }

    async fn inspect_raw(&self, reference: &str) -> Result<Value, DriverError> {
        self.record(format!("inspect {}", reference));
        self.inner
            .lock()
            .unwrap()
            .inspect_docs
            .get(reference)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(reference.to_string()))
    }

    async fn image_label(
        &self,
        image: &str,
        label: &str,
    ) -> Result<Option<String>, DriverError> {
        self.record(format!("image_label {}", image));
        Ok(self
            .inner
            .lock()
            .unwrap()
            .image_labels
            .get(&format!("{}\u{0}{}", image, label))
            .cloned())
    }

    async fn pull(&self, image: &str) -> Result<(), DriverError> {
        self.record(format!("pull {}", image));
        if self.fails("pull") {
            return Err(DriverError::CommandFailed {
                command: "pull".to_string(),
                code: 1,
                stderr: "fake pull failure".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self, reference: &str) -> Result<(), DriverError> {
        self.record(format!("stop {}", reference));
        if self.fails("stop") {
            return Err(DriverError::CommandFailed {
                command: "stop".to_string(),
                code: 1,
                stderr: "fake stop failure".to_string(),
            });
        }
        Ok(())
    }

    async fn remove(&self, reference: &str) -> Result<(), DriverError> {
        self.record(format!("remove {}", reference));
        if self.fails("remove") {
            return Err(DriverError::CommandFailed {
                command: "rm".to_string(),
                code: 1,
                stderr: "fake remove failure".to_string(),
            });
        }
        Ok(())
    }

    async fn restart(&self, reference: &str) -> Result<(), DriverError> {
        self.record(format!("restart {}", reference));
        if self.fails("restart") {
            return Err(DriverError::CommandFailed {
                command: "restart".to_string(),
                code: 1,
                stderr: "fake restart failure".to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<(), DriverError> {
        self.record("run".to_string());
        self.inner.lock().unwrap().run_args.push(args.to_vec());
        if self.fails("run") {
            return Err(DriverError::CommandFailed {
                command: "run".to_string(),
                code: 125,
                stderr: "fake run failure".to_string(),
            });
        }
        Ok(())
    }

    async fn exec(
        &self,
        reference: &str,
        cmd: &[String],
        _env: &[(String, String)],
        _stdin: Option<&[u8]>,
        _timeout: Option<std::time::Duration>,
    ) -> Result<ExecOutput, DriverError> {
        self.record(format!("exec {} {}", reference, cmd.join(" ")));
        if self.fails("exec") {
            return Err(DriverError::Internal("fake exec failure".to_string()));
        }
        Ok(self
            .inner
            .lock()
            .unwrap()
            .exec_responses
            .pop_front()
            .unwrap_or_default())
    }

    async fn image_prune(&self, repo: &str, except_tag: &str) -> Result<(), DriverError> {
        self.record(format!("prune {} except {}", repo, except_tag));
        if self.fails("prune") {
            return Err(DriverError::Internal("fake prune failure".to_string()));
        }
        Ok(())
    }
}
