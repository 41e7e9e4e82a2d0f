//! Small per-session projections the active session keeps warm: which
//! skills are attached, which subagents are in flight. Rebuilt from the
//! event log on resume.

use std::collections::{BTreeMap, BTreeSet};

use sb_domain::event::{Event, EventBody};

/// Skills currently attached to the session.
#[derive(Debug, Default)]
pub struct SkillTracker {
    active: BTreeSet<String>,
}

impl SkillTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str) -> bool {
        self.active.insert(name.to_owned())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.active.remove(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.active.iter().cloned().collect()
    }

    pub fn replay(&mut self, event: &Event) {
        match &event.body {
            EventBody::SkillAdded { name } => {
                self.active.insert(name.clone());
            }
            EventBody::SkillRemoved { name } => {
                self.active.remove(name);
            }
            _ => {}
        }
    }
}

/// Subagents the session has launched.
#[derive(Debug, Default)]
pub struct SubagentTracker {
    running: BTreeMap<String, String>,
    completed: u64,
}

impl SubagentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&mut self, subagent_id: &str, task: &str) {
        self.running.insert(subagent_id.to_owned(), task.to_owned());
    }

    pub fn completed(&mut self, subagent_id: &str) {
        if self.running.remove(subagent_id).is_some() {
            self.completed += 1;
        }
    }

    pub fn running(&self) -> Vec<(String, String)> {
        self.running
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    pub fn replay(&mut self, event: &Event) {
        match &event.body {
            EventBody::SubagentStarted { subagent_id, task } => {
                self.started(subagent_id, task);
            }
            EventBody::SubagentCompleted { subagent_id, .. } => {
                self.completed(subagent_id);
            }
            _ => {}
        }
    }
}
