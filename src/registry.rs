//! Insertion-ordered collection of registered tasks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::matcher;
use crate::task::{Task, TaskBuilder};

/// All tasks known to a scheduler, in registration order. Built once at
/// process start; the tick loop only reads it. Tasks are held behind `Arc`
/// so each due firing can be handed to its own spawned run.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: Vec<Arc<Task>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> &mut Self {
        self.tasks.push(Arc::new(task));
        self
    }

    /// Convenience for registering straight off a builder.
    pub fn register(&mut self, builder: TaskBuilder) -> &mut Self {
        self.add(builder.build())
    }

    /// Tasks due at `at`, each evaluated in its own timezone override with
    /// `default_tz` as the fallback. Pure and deterministic: the same
    /// timestamp always yields the same tasks, in registration order.
    pub fn due_at(&self, at: DateTime<Utc>, default_tz: Tz) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|t| matcher::is_due(&t.expression, t.timezone.unwrap_or(default_tz), at))
            .map(Arc::clone)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
