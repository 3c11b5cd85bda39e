use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::planner::Plan;
use crate::store::SourceFactory;

pub type TaskExecFn = fn(&ConfigDoc, &mut ExecCtx) -> Result<()>;

/// Progress of one `run`, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    StepStarted {
        id: String,
        label: String,
        /// 1-based position in the plan.
        index: usize,
        total: usize,
    },
    StepLog {
        id: String,
        line: String,
    },
    StepFinished {
        id: String,
        elapsed: Duration,
        error: Option<String>,
    },
    RunFinished {
        completed: usize,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Human-readable progress on stdout.
#[derive(Default)]
pub struct StdoutSink;

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::StepStarted {
                id,
                label,
                index,
                total,
            } => println!("[{index}/{total}] {label} ({id})"),
            ExecEvent::StepLog { line, .. } => println!("      {line}"),
            ExecEvent::StepFinished {
                elapsed,
                error: None,
                ..
            } => println!("      ok ({elapsed:.1?})"),
            ExecEvent::StepFinished {
                elapsed,
                error: Some(e),
                ..
            } => println!("      FAILED after {elapsed:.1?}: {e}"),
            ExecEvent::RunFinished {
                completed,
                error: None,
            } => println!("done: {completed} step(s)"),
            ExecEvent::RunFinished {
                completed,
                error: Some(e),
            } => println!("stopped after {completed} step(s): {e}"),
        }
    }
}

/// Forwards events to a receiver; used to observe runs from tests and callers.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

pub type SharedSourceFactory = Arc<dyn SourceFactory + Send + Sync>;

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_task_id: Option<String>,
    // Overrides the package source configured in `[image.store]`.
    source_factory: Option<SharedSourceFactory>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_task_id: None,
            source_factory: None,
        }
    }

    pub fn with_source_factory(mut self, factory: SharedSourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub fn source_factory(&self) -> Option<SharedSourceFactory> {
        self.source_factory.clone()
    }

    pub fn set_task(&mut self, id: impl Into<String>) {
        self.current_task_id = Some(id.into());
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_task_id
            .clone()
            .unwrap_or_else(|| "<none>".into());
        tracing::debug!(task = %id, "{msg}");
        self.sink.emit(ExecEvent::StepLog {
            id,
            line: msg.to_string(),
        });
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    exec: BTreeMap<&'static str, TaskExecFn>,
}

impl TaskRegistry {
    pub fn add(&mut self, id: &'static str, f: TaskExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate task executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()>;
}

/// Runs tasks one at a time in plan order and stops at the first failure.
pub fn execute_plan(
    doc: &ConfigDoc,
    plan: &Plan,
    reg: &TaskRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    let steps = plan
        .ordered()?
        .into_iter()
        .map(|task| {
            reg.get(&task.id).map(|exec| (task, exec)).ok_or_else(|| {
                Error::msg(format!("no executor registered for task '{}'", task.id))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total = steps.len();
    for (i, (task, exec)) in steps.into_iter().enumerate() {
        ctx.sink.emit(ExecEvent::StepStarted {
            id: task.id.clone(),
            label: task.label.clone(),
            index: i + 1,
            total,
        });
        ctx.set_task(task.id.clone());
        tracing::info!(task = %task.id, phase = %task.phase, "running task");

        let start = Instant::now();
        let res = exec(doc, ctx);
        ctx.sink.emit(ExecEvent::StepFinished {
            id: task.id.clone(),
            elapsed: start.elapsed(),
            error: res.as_ref().err().map(ToString::to_string),
        });
        if let Err(e) = res {
            let e = e.context(format!("task '{}' failed", task.id));
            ctx.sink.emit(ExecEvent::RunFinished {
                completed: i,
                error: Some(e.to_string()),
            });
            return Err(e);
        }
    }
    ctx.sink.emit(ExecEvent::RunFinished {
        completed: total,
        error: None,
    });
    Ok(())
}

pub fn builtin_registry() -> Result<TaskRegistry> {
    let mut reg = TaskRegistry::default();
    reg.add("core.init", core_init)?;
    crate::modules::image::ImageModule::register_tasks(&mut reg)?;
    Ok(reg)
}

fn core_init(doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
    ctx.set_task("core.init");
    ctx.log(&format!("build = {}", doc.path.display()));
    for table in doc.top_level_tables() {
        ctx.log(&format!("config table [{table}]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Phase, Task};

    fn doc() -> ConfigDoc {
        ConfigDoc {
            path: "<mem>".into(),
            value: toml::Value::Table(Default::default()),
        }
    }

    fn ok_task(_doc: &ConfigDoc, ctx: &mut ExecCtx) -> Result<()> {
        ctx.log("hello");
        Ok(())
    }

    fn failing_task(_doc: &ConfigDoc, _ctx: &mut ExecCtx) -> Result<()> {
        Err(Error::new(crate::ErrorKind::NotFound, "boom"))
    }

    fn add(plan: &mut Plan, id: &str, after: &[&str]) {
        plan.add(Task {
            id: id.into(),
            label: id.into(),
            module: "test".into(),
            phase: Phase::Fetch,
            after: after.iter().map(|s| s.to_string()).collect(),
        })
        .expect("add task");
    }

    #[test]
    fn stops_at_first_failure_and_keeps_error_kind() {
        let mut plan = Plan::default();
        add(&mut plan, "a", &[]);
        add(&mut plan, "b", &["a"]);
        add(&mut plan, "c", &["b"]);
        let mut reg = TaskRegistry::default();
        reg.add("a", ok_task).expect("reg a");
        reg.add("b", failing_task).expect("reg b");
        reg.add("c", ok_task).expect("reg c");

        let (tx, rx) = mpsc::channel();
        let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx)));
        let err = execute_plan(&doc(), &plan, &reg, &mut ctx).expect_err("b fails");
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(err.to_string().starts_with("task 'b' failed"));

        drop(ctx);
        let events: Vec<ExecEvent> = rx.iter().collect();
        assert!(events.contains(&ExecEvent::StepLog {
            id: "a".into(),
            line: "hello".into()
        }));
        assert!(!events.iter().any(|e| matches!(e, ExecEvent::StepStarted { id, .. } if id == "c")));
        assert!(matches!(
            events.last(),
            Some(ExecEvent::RunFinished { completed: 1, error: Some(_) })
        ));
    }

    #[test]
    fn missing_executor_fails_before_running_anything() {
        let mut plan = Plan::default();
        add(&mut plan, "a", &[]);
        add(&mut plan, "b", &["a"]);
        let mut reg = TaskRegistry::default();
        reg.add("a", ok_task).expect("reg a");

        let (tx, rx) = mpsc::channel();
        let mut ctx = ExecCtx::new(false, Arc::new(ChannelSink::new(tx)));
        let err = execute_plan(&doc(), &plan, &reg, &mut ctx).expect_err("no executor");
        assert!(err.to_string().contains("no executor registered for task 'b'"));
        drop(ctx);
        assert_eq!(rx.iter().count(), 0);
    }
}
