//! Project tree: project → stages → {tasks, gate → checklist}.
//!
//! Every container is addressed by id. Unknown fields are preserved in
//! `extra` so a fetched project serializes back without loss.

use crate::requests::RequestStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Transient annotation attached to a node with a pending deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOverlay {
    pub deletion_requested: bool,
    pub deletion_request_status: RequestStatus,
    pub deletion_request_id: String,
}

impl DeletionOverlay {
    pub fn pending(request_id: impl Into<String>) -> Self {
        Self {
            deletion_requested: true,
            deletion_request_status: RequestStatus::Pending,
            deletion_request_id: request_id.into(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deletion_requested && self.deletion_request_status == RequestStatus::Pending
    }
}

/// Nodes that can carry a [`DeletionOverlay`].
pub trait Annotated {
    fn overlay(&self) -> Option<&DeletionOverlay>;
    fn set_overlay(&mut self, overlay: Option<DeletionOverlay>);

    fn is_flagged(&self) -> bool {
        self.overlay().is_some_and(DeletionOverlay::is_pending)
    }
}

macro_rules! impl_annotated {
    ($($ty:ty),*) => {$(
        impl Annotated for $ty {
            fn overlay(&self) -> Option<&DeletionOverlay> {
                self.deletion.as_ref()
            }

            fn set_overlay(&mut self, overlay: Option<DeletionOverlay>) {
                self.deletion = overlay;
            }
        }
    )*};
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    #[serde(default, alias = "title")]
    pub project_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(flatten)]
    pub deletion: Option<DeletionOverlay>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub stage_id: String,
    #[serde(default, alias = "order")]
    pub stage_order: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,
    #[serde(flatten)]
    pub deletion: Option<DeletionOverlay>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub deletion: Option<DeletionOverlay>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl_annotated!(Project, Stage, Task);

impl Project {
    pub fn new(project_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_title: title.into(),
            description: None,
            subject_domain: None,
            status: None,
            stages: Vec::new(),
            deletion: None,
            extra: Map::new(),
        }
    }

    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.stage_id == stage_id)
    }

    pub fn stage_mut(&mut self, stage_id: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.stage_id == stage_id)
    }

    /// Current position of a stage. Only valid until the next removal.
    pub fn stage_position(&self, stage_id: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.stage_id == stage_id)
    }

    pub fn task(&self, stage_id: &str, task_id: &str) -> Option<&Task> {
        self.stage(stage_id)?.task(task_id)
    }

    /// Locate a task anywhere in the project. Returns the owning stage id.
    pub fn find_task(&self, task_id: &str) -> Option<(&str, &Task)> {
        self.stages
            .iter()
            .find_map(|s| s.task(task_id).map(|t| (s.stage_id.as_str(), t)))
    }

    pub fn find_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.stages
            .iter_mut()
            .find_map(|s| s.tasks.iter_mut().find(|t| t.task_id == task_id))
    }

    pub fn remove_stage(&mut self, stage_id: &str) -> Option<Stage> {
        let pos = self.stage_position(stage_id)?;
        Some(self.stages.remove(pos))
    }

    /// Remove a task by id from whichever stage holds it.
    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        self.stages.iter_mut().find_map(|s| s.remove_task(task_id))
    }

    /// True when the project or any stage or task carries a pending flag.
    pub fn has_pending_deletions(&self) -> bool {
        self.is_flagged()
            || self
                .stages
                .iter()
                .any(|s| s.is_flagged() || s.tasks.iter().any(Annotated::is_flagged))
    }

    /// Strip every overlay annotation in the project.
    pub fn clear_overlays(&mut self) {
        self.deletion = None;
        for stage in &mut self.stages {
            stage.deletion = None;
            for task in &mut stage.tasks {
                task.deletion = None;
            }
        }
    }

    /// Request ids currently attached anywhere in the project.
    pub fn flagged_request_ids(&self) -> Vec<&str> {
        std::iter::once(self.overlay())
            .chain(self.stages.iter().flat_map(|s| {
                std::iter::once(s.overlay()).chain(s.tasks.iter().map(|t| t.overlay()))
            }))
            .flatten()
            .map(|o| o.deletion_request_id.as_str())
            .collect()
    }
}

impl Stage {
    pub fn new(stage_id: impl Into<String>, stage_order: u32) -> Self {
        Self {
            stage_id: stage_id.into(),
            stage_order,
            title: String::new(),
            tasks: Vec::new(),
            gate: None,
            deletion: None,
            extra: Map::new(),
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        let pos = self.tasks.iter().position(|t| t.task_id == task_id)?;
        Some(self.tasks.remove(pos))
    }
}

impl Task {
    pub fn new(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            deletion: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::sample_project;
    use serde_json::json;

    #[test]
    fn test_identity_lookups() {
        let project = sample_project();
        assert_eq!(project.stage("s2").unwrap().stage_order, 2);
        assert_eq!(project.stage_position("s3"), Some(2));
        assert_eq!(project.task("s1", "t2").unwrap().title, "Task 2");
        let (stage_id, task) = project.find_task("t3").unwrap();
        assert_eq!(stage_id, "s2");
        assert_eq!(task.task_id, "t3");
        assert!(project.find_task("missing").is_none());
    }

    #[test]
    fn test_remove_by_id_leaves_siblings() {
        let mut project = sample_project();
        let removed = project.remove_task("t1").unwrap();
        assert_eq!(removed.task_id, "t1");
        let s1 = project.stage("s1").unwrap();
        assert_eq!(s1.tasks.len(), 1);
        assert_eq!(s1.tasks[0].task_id, "t2");
        assert!(project.remove_task("t1").is_none());

        project.remove_stage("s2").unwrap();
        let ids: Vec<_> = project.stages.iter().map(|s| s.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3"]);
    }

    #[test]
    fn test_pending_deletions_aggregate() {
        let mut project = sample_project();
        assert!(!project.has_pending_deletions());
        project.find_task_mut("t3").unwrap().deletion = Some(DeletionOverlay::pending("r1"));
        assert!(project.has_pending_deletions());
        assert_eq!(project.flagged_request_ids(), vec!["r1"]);
        project.clear_overlays();
        assert!(!project.has_pending_deletions());
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = json!({
            "project_id": "p-9",
            "title": "Volcanoes",
            "stages": [{
                "stage_id": "s1",
                "order": 1,
                "status": "approved",
                "tasks": [{"task_id": "t1", "title": "Read", "minutes": 20}],
                "gate": {"title": "Check", "checklist": [{"item_id": "c1", "text": "Done?"}], "feedback": "ok"}
            }],
            "deletion_requested": true,
            "deletion_request_status": "pending",
            "deletion_request_id": "r-7"
        });
        let project: Project = serde_json::from_value(raw).unwrap();
        assert_eq!(project.project_title, "Volcanoes");
        assert_eq!(project.overlay().unwrap().deletion_request_id, "r-7");
        let stage = &project.stages[0];
        assert_eq!(stage.stage_order, 1);
        assert_eq!(stage.extra["status"], "approved");
        assert_eq!(stage.tasks[0].extra["minutes"], 20);
        assert_eq!(stage.gate.as_ref().unwrap().extra["feedback"], "ok");

        let back = serde_json::to_value(&project).unwrap();
        assert_eq!(back["deletion_request_id"], "r-7");
        assert_eq!(back["stages"][0]["tasks"][0]["minutes"], 20);
        assert!(back["stages"][0]["tasks"][0].get("deletion_requested").is_none());
    }
}
