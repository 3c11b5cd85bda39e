//! Ordering of the steps a build definition asks for.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Coarse stage of an image build. A step may only wait on steps of the
/// same or an earlier phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Init,
    Fetch,
    Bootstrap,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Fetch => "fetch",
            Phase::Bootstrap => "bootstrap",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub label: String,
    pub module: String,
    pub phase: Phase,
    /// Ids of steps that must finish first.
    pub after: Vec<String>,
}

/// Steps in the order modules added them.
#[derive(Debug, Default)]
pub struct Plan {
    tasks: Vec<Task>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

fn plan_err(msg: String) -> Error {
    Error::new(ErrorKind::Config, msg)
}

impl Plan {
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.get(&task.id).is_some() {
            return Err(plan_err(format!("step '{}' is planned twice", task.id)));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    /// Execution order: earlier phases first, insertion order within a phase,
    /// moved later only as far as `after` requires.
    pub fn ordered(&self) -> Result<Vec<&Task>> {
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            let mut edges = Vec::with_capacity(task.after.len());
            for dep in &task.after {
                let Some(i) = self.index_of(dep) else {
                    return Err(plan_err(format!(
                        "step '{}' waits on unknown step '{dep}'",
                        task.id
                    )));
                };
                let before = &self.tasks[i];
                if before.phase > task.phase {
                    return Err(plan_err(format!(
                        "step '{}' ({}) cannot wait on '{}' from the later {} phase",
                        task.id, task.phase, before.id, before.phase
                    )));
                }
                edges.push(i);
            }
            deps.push(edges);
        }

        let mut roots: Vec<usize> = (0..self.tasks.len()).collect();
        roots.sort_by_key(|&i| self.tasks[i].phase);

        let mut marks = vec![Mark::Unvisited; self.tasks.len()];
        let mut out = Vec::with_capacity(self.tasks.len());
        let mut path = Vec::new();
        for root in roots {
            self.visit(root, &deps, &mut marks, &mut path, &mut out)?;
        }
        Ok(out.into_iter().map(|i| &self.tasks[i]).collect())
    }

    fn visit(
        &self,
        i: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        out: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let start = path.iter().position(|&p| p == i).unwrap_or(0);
                let cycle: Vec<&str> = path[start..]
                    .iter()
                    .chain(std::iter::once(&i))
                    .map(|&p| self.tasks[p].id.as_str())
                    .collect();
                return Err(plan_err(format!("step cycle: {}", cycle.join(" -> "))));
            }
            Mark::Unvisited => {}
        }
        marks[i] = Mark::Visiting;
        path.push(i);
        for &d in &deps[i] {
            self.visit(d, deps, marks, path, out)?;
        }
        path.pop();
        marks[i] = Mark::Done;
        out.push(i);
        Ok(())
    }
}
