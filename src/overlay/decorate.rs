//! Pure overlay projection of a request store onto project trees.

use crate::requests::{EntityType, RequestStore};
use crate::tree::{Annotated, DeletionOverlay, Project};

/// Return a copy of `project` annotated from the pending requests in `store`.
///
/// Existing annotations on the input are discarded first, so the output
/// depends only on the tree's entities and the store contents: applying it
/// to its own output gives the same result.
pub fn decorate(project: &Project, store: &RequestStore) -> Project {
    let mut out = project.clone();
    out.clear_overlays();

    let project_id = out.project_id.clone();
    let lookup = |entity_type: EntityType, entity_id: &str| {
        store
            .pending_for(&project_id, entity_type, entity_id)
            .map(|r| DeletionOverlay::pending(r.request_id.clone()))
    };

    let overlay = lookup(EntityType::Project, &project_id);
    out.set_overlay(overlay);
    for stage in &mut out.stages {
        let overlay = lookup(EntityType::Stage, &stage.stage_id);
        stage.set_overlay(overlay);
        for task in &mut stage.tasks {
            let overlay = lookup(EntityType::Task, &task.task_id);
            task.set_overlay(overlay);
        }
    }
    out
}

/// Decorate every project of a list view.
pub fn decorate_all(projects: &[Project], store: &RequestStore) -> Vec<Project> {
    projects.iter().map(|p| decorate(p, store)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{DeletionRequest, RequestStatus};
    use crate::test_helpers::sample_project;

    fn store() -> RequestStore {
        RequestStore::from_requests([
            DeletionRequest::pending("r-task", EntityType::Task, "p1")
                .with_stage("s1")
                .with_task("t1"),
            DeletionRequest::pending("r-stage", EntityType::Stage, "p1").with_stage("s2"),
            DeletionRequest::pending("r-done", EntityType::Task, "p1")
                .with_task("t2")
                .with_status(RequestStatus::Approved),
            DeletionRequest::pending("r-other", EntityType::Task, "p-other").with_task("t3"),
        ])
    }

    #[test]
    fn test_attaches_only_pending_matches() {
        let decorated = decorate(&sample_project(), &store());
        let t1 = decorated.task("s1", "t1").unwrap();
        assert_eq!(t1.overlay().unwrap().deletion_request_id, "r-task");
        assert!(decorated.task("s1", "t2").unwrap().overlay().is_none());
        assert_eq!(
            decorated.stage("s2").unwrap().overlay().unwrap().deletion_request_id,
            "r-stage"
        );
        // Scoped to another project.
        assert!(decorated.task("s2", "t3").unwrap().overlay().is_none());
        assert!(decorated.overlay().is_none());
    }

    #[test]
    fn test_idempotent_and_byte_identical() {
        let project = sample_project();
        let s = store();
        let once = decorate(&project, &s);
        let twice = decorate(&once, &s);
        assert_eq!(once, twice);
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn test_order_independent() {
        let mut reversed: Vec<_> = store().iter().cloned().collect();
        reversed.reverse();
        let a = decorate(&sample_project(), &store());
        let b = decorate(&sample_project(), &RequestStore::from_requests(reversed));
        assert_eq!(a, b);
    }

    #[test]
    fn test_does_not_mutate_input_or_identity() {
        let project = sample_project();
        let decorated = decorate(&project, &store());
        assert!(!project.has_pending_deletions());
        assert_eq!(decorated.project_id, project.project_id);
        let ids = |p: &Project| -> Vec<String> {
            p.stages
                .iter()
                .flat_map(|s| s.tasks.iter().map(|t| t.task_id.clone()))
                .collect()
        };
        assert_eq!(ids(&decorated), ids(&project));
    }

    #[test]
    fn test_stale_annotation_is_stripped() {
        let mut project = sample_project();
        project.find_task_mut("t2").unwrap().deletion = Some(DeletionOverlay::pending("gone"));
        let decorated = decorate(&project, &RequestStore::new());
        assert!(!decorated.has_pending_deletions());
    }
}
