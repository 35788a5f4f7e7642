//! Test helper factories
//!
//! Convenience constructors for projects, requests, job settings and
//! channel frames with sensible defaults.
#![allow(dead_code)]

use crate::job::{JobConfig, JobRequest};
use crate::requests::{DeletionRequest, EntityType};
use crate::tree::{Gate, Project, Stage, Task};
use serde_json::json;

// ============================================================================
// Job
// ============================================================================

/// Default timings against a mock endpoint.
pub fn fast_job_config() -> JobConfig {
    JobConfig {
        endpoint_url: "ws://mock.invalid/jobs".into(),
        ..Default::default()
    }
}

pub fn sample_request() -> JobRequest {
    JobRequest::new("Biology", "Design a plant growth experiment", "grade-7")
}

/// A well-formed result frame carrying a minimal project.
pub fn success_frame(project_id: &str) -> String {
    json!({
        "statusCode": 200,
        "body": {
            "action_response": {
                "response": {
                    "project": {"project_id": project_id, "project_title": "Generated"}
                }
            }
        }
    })
    .to_string()
}

// ============================================================================
// Tree
// ============================================================================

/// p1 "Plant Growth Lab" (Science):
/// s1 [t1, t2], s2 [t3], s3 [t4] with a gate.
pub fn sample_project() -> Project {
    let mut project = Project::new("p1", "Plant Growth Lab");
    project.subject_domain = Some("Science".into());
    project.status = Some("pending".into());

    let mut s1 = Stage::new("s1", 1);
    s1.title = "Plan".into();
    s1.tasks = vec![Task::new("t1", "Task 1"), Task::new("t2", "Task 2")];

    let mut s2 = Stage::new("s2", 2);
    s2.title = "Grow".into();
    s2.tasks = vec![Task::new("t3", "Task 3")];

    let mut s3 = Stage::new("s3", 3);
    s3.title = "Report".into();
    s3.tasks = vec![Task::new("t4", "Task 4")];
    s3.gate = Some(Gate {
        gate_id: Some("g3".into()),
        title: "Final check".into(),
        ..Default::default()
    });

    project.stages = vec![s1, s2, s3];
    project
}

/// Pending requests against [`sample_project`]: task t1, stage s2.
pub fn sample_requests() -> Vec<DeletionRequest> {
    vec![
        DeletionRequest::pending("r-t1", EntityType::Task, "p1")
            .with_stage("s1")
            .with_task("t1"),
        DeletionRequest::pending("r-s2", EntityType::Stage, "p1").with_stage("s2"),
    ]
}
