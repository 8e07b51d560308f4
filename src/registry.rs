//! Task registry: the ordered collection of task records owned by one downloader

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{BatchStats, MediaReference, TaskId, TaskRecord, TaskStatus};

/// Insertion-ordered mapping from task id to task record
///
/// Each [`BatchDownloader`](crate::BatchDownloader) owns exactly one registry;
/// there is no process-wide queue, so independent batches can run side by side.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskRecord>,
    index: HashMap<TaskId, usize>,
    // Never reset, so ids stay unique across clear()
    next_sequence: u64,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one `pending` record per reference and return the new ids in order
    ///
    /// References are not deduplicated: submitting the same reference twice
    /// creates two independent tasks.
    pub fn add_tasks<I>(&mut self, references: I) -> Vec<TaskId>
    where
        I: IntoIterator<Item = MediaReference>,
    {
        let created_at = chrono::Utc::now().timestamp_millis();

        references
            .into_iter()
            .map(|reference| {
                let task_id = TaskId::new(
                    reference.kind,
                    &reference.id,
                    created_at,
                    self.next_sequence,
                );
                self.next_sequence += 1;

                self.index.insert(task_id.clone(), self.tasks.len());
                self.tasks
                    .push(TaskRecord::new(task_id.clone(), Arc::new(reference)));
                task_id
            })
            .collect()
    }

    /// Look up a record
    pub fn get(&self, task_id: &TaskId) -> Option<&TaskRecord> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    pub(crate) fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskRecord> {
        match self.index.get(task_id) {
            Some(&i) => self.tasks.get_mut(i),
            None => None,
        }
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskRecord> {
        self.tasks.iter_mut()
    }

    /// Cloned copy of every record, in insertion order
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.tasks.clone()
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.index.clear();
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the registry holds no records
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// First `pending` task in insertion order for which `skip` returns false
    pub(crate) fn next_pending<F>(&self, skip: F) -> Option<TaskId>
    where
        F: Fn(&TaskId) -> bool,
    {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::Pending && !skip(&t.task_id))
            .map(|t| t.task_id.clone())
    }

    /// True when no record can make further progress without intervention
    pub(crate) fn all_terminal(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
    }

    /// Counts per status and the mean progress of all records
    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats {
            total: self.tasks.len(),
            ..BatchStats::default()
        };

        let mut progress_sum = 0.0_f64;
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Downloading => stats.downloading += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Paused => stats.paused += 1,
            }
            progress_sum += f64::from(task.progress);
        }

        if !self.tasks.is_empty() {
            stats.overall_progress = (progress_sum / self.tasks.len() as f64) as f32;
        }
        stats
    }
}
