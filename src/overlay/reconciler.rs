//! OverlayReconciler: keeps the review queue consistent with the backend's
//! deletion requests.
//!
//! The reconciler holds undecorated project trees and a [`RequestStore`];
//! annotated views are derived with [`decorate`] on demand. Approve and
//! reject are two-phase: the mutation is prepared on a working copy,
//! confirmed with the backend, then committed or dropped.
//!
//! Background resyncs are spawned tasks. Their results come back through a
//! channel tagged with a generation number; only the newest generation is
//! applied, and every request id resolved in this session is filtered out
//! of whatever the backend returns.
//!
//! Every fetch lists all known subject domains, because installing a
//! listing replaces the whole store. With no domain known, nothing is
//! fetched and the store is kept.

use super::decorate::{decorate, decorate_all};
use crate::error::{CoordinatorError, Result};
use crate::events::{EventEmitter, EventKind, NullEmitter};
use crate::requests::{DeletionRequest, EntityType, RequestStore, ReviewBackend};
use crate::tree::{Project, StageCursor};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A committed approve or reject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub request_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub project_id: String,
    /// True when the entity was removed from the tree.
    pub removed: bool,
}

struct ResyncResult {
    generation: u64,
    result: Result<Vec<DeletionRequest>>,
}

/// Where an approved entity lives, resolved by id before any mutation.
enum Target {
    Project { index: usize },
    Stage { index: usize, stage_id: String },
    Task { index: usize, task_id: String },
}

impl Target {
    fn project_index(&self) -> usize {
        match self {
            Target::Project { index } | Target::Stage { index, .. } | Target::Task { index, .. } => {
                *index
            }
        }
    }
}

pub struct OverlayReconciler {
    backend: Arc<dyn ReviewBackend>,
    emitter: Arc<dyn EventEmitter>,

    projects: Vec<Project>,
    store: RequestStore,
    /// Every request id resolved in this session; never re-admitted.
    resolved: HashSet<String>,
    extra_domains: BTreeSet<String>,

    focus: Option<String>,
    cursor: StageCursor,

    generation: u64,
    resync_tx: mpsc::UnboundedSender<ResyncResult>,
    resync_rx: mpsc::UnboundedReceiver<ResyncResult>,
    resync_task: Option<JoinHandle<()>>,
}

impl OverlayReconciler {
    pub fn new(backend: Arc<dyn ReviewBackend>) -> Self {
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            emitter: Arc::new(NullEmitter),
            projects: Vec::new(),
            store: RequestStore::new(),
            resolved: HashSet::new(),
            extra_domains: BTreeSet::new(),
            focus: None,
            cursor: StageCursor::new(),
            generation: 0,
            resync_tx,
            resync_rx,
            resync_task: None,
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Subject domains to list even when no held project names them.
    pub fn with_subject_domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        self.extra_domains.extend(domains);
        self
    }

    // ========================================================================
    // Population and views
    // ========================================================================

    /// Replace the review queue. Annotations on the input are dropped.
    pub fn load_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects
            .into_iter()
            .map(|mut p| {
                p.clear_overlays();
                p
            })
            .collect();
        let focus_gone = self
            .focus
            .as_deref()
            .is_some_and(|id| self.project(id).is_none());
        if focus_gone {
            self.focus = None;
        }
        self.clamp_cursor();
    }

    /// Replace the local store with `requests`, minus resolved ids.
    pub fn load_requests(&mut self, requests: Vec<DeletionRequest>) {
        self.install(requests);
    }

    /// Fetch requests for every known subject domain and install them.
    /// Supersedes any resync still in flight.
    pub async fn refresh(&mut self) -> Result<()> {
        self.supersede_resync();
        let Some(domains) = self.listing_domains() else {
            return Ok(());
        };
        let requests = fetch_all(self.backend.as_ref(), &domains).await?;
        self.install(requests);
        Ok(())
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub fn resolved_ids(&self) -> &HashSet<String> {
        &self.resolved
    }

    /// Decorated list view.
    pub fn queue(&self) -> Vec<Project> {
        decorate_all(&self.projects, &self.store)
    }

    /// Projects with at least one pending deletion request.
    pub fn project_change_queue(&self) -> Vec<Project> {
        self.queue()
            .into_iter()
            .filter(Project::has_pending_deletions)
            .collect()
    }

    /// Decorated view of one project.
    pub fn view(&self, project_id: &str) -> Option<Project> {
        self.project(project_id).map(|p| decorate(p, &self.store))
    }

    /// Deep copy for an edit view. Edits stay local until [`commit`].
    ///
    /// [`commit`]: Self::commit
    pub fn checkout(&self, project_id: &str) -> Result<Project> {
        self.view(project_id)
            .ok_or_else(|| not_found(EntityType::Project, project_id))
    }

    /// Replace the held copy of a project with an edited one.
    pub fn commit(&mut self, mut project: Project) -> Result<()> {
        project.clear_overlays();
        let index = self
            .project_index(&project.project_id)
            .ok_or_else(|| not_found(EntityType::Project, &project.project_id))?;
        debug!(project_id = %project.project_id, "Project committed");
        self.projects[index] = project;
        if self.focus.as_deref() == Some(self.projects[index].project_id.as_str()) {
            self.clamp_cursor();
        }
        Ok(())
    }

    /// Pending requests that target a project or its descendants.
    pub fn pending_requests(&self, project_id: &str) -> Vec<DeletionRequest> {
        self.store.pending_in_project(project_id).cloned().collect()
    }

    // ========================================================================
    // Detail focus
    // ========================================================================

    /// Open a project in the detail view; the stage cursor starts at 0.
    pub fn focus(&mut self, project_id: &str) -> Result<Project> {
        let view = self.checkout(project_id)?;
        self.focus = Some(project_id.to_string());
        self.cursor = StageCursor::new();
        Ok(view)
    }

    pub fn focused(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    pub fn cursor(&self) -> StageCursor {
        self.cursor
    }

    pub fn set_stage_index(&mut self, index: usize) {
        let len = self.focused_stage_count();
        self.cursor.set(index, len);
    }

    // ========================================================================
    // Approve / reject
    // ========================================================================

    /// Approve a pending deletion and remove its entity.
    pub async fn approve(&mut self, request_id: &str, entity_type: EntityType) -> Result<Resolution> {
        let request = self.pending_request(request_id)?;
        if request.entity_type != entity_type {
            return Err(CoordinatorError::Validation(format!(
                "request {} targets a {}, not a {}",
                request_id, request.entity_type, entity_type
            )));
        }
        request.validate()?;
        let entity_id = request
            .entity_id()
            .map(str::to_string)
            .ok_or_else(|| CoordinatorError::Validation("request has no entity id".into()))?;
        let target = self.locate(&request, &entity_id)?;

        // Phase 1: prepare the removal on a working copy.
        let index = target.project_index();
        let project_id = self.projects[index].project_id.clone();
        let working = match &target {
            Target::Project { .. } => None,
            Target::Stage { stage_id, .. } => {
                let mut copy = self.projects[index].clone();
                copy.remove_stage(stage_id);
                Some(copy)
            }
            Target::Task { task_id, .. } => {
                let mut copy = self.projects[index].clone();
                copy.remove_task(task_id);
                Some(copy)
            }
        };
        self.emitter.emit_kind(EventKind::OverlayOptimistic {
            request_id: request_id.to_string(),
            entity_type,
            entity_id: entity_id.clone(),
        });

        // Phase 2: confirm.
        let confirmed = self
            .backend
            .approve_deletion_request(request_id, entity_type)
            .await
            .and_then(|ack| ack.into_result());

        if let Err(err) = confirmed {
            return Err(self.roll_back(&request, err).await);
        }

        match working {
            Some(project) => self.projects[index] = project,
            None => {
                self.projects.remove(index);
                if self.focus.as_deref() == Some(project_id.as_str()) {
                    self.focus = None;
                }
            }
        }
        if entity_type == EntityType::Stage && self.focus.as_deref() == Some(project_id.as_str()) {
            self.clamp_cursor();
        }
        self.retire(request_id);

        info!(request_id, %entity_type, entity_id = %entity_id, "Deletion approved");
        self.emitter.emit_kind(EventKind::OverlayCommitted {
            request_id: request_id.to_string(),
            entity_type,
            entity_id: entity_id.clone(),
            removed: true,
        });

        self.spawn_resync();
        Ok(Resolution {
            request_id: request_id.to_string(),
            entity_type,
            entity_id,
            project_id,
            removed: true,
        })
    }

    /// Reject a pending deletion; the entity stays and its flag is cleared.
    ///
    /// No resync follows a rejection.
    pub async fn reject(&mut self, request_id: &str) -> Result<Resolution> {
        let request = self.pending_request(request_id)?;
        let entity_id = request.entity_id().unwrap_or_default().to_string();
        let project_id = request.project_id.clone().unwrap_or_default();
        self.emitter.emit_kind(EventKind::OverlayOptimistic {
            request_id: request_id.to_string(),
            entity_type: request.entity_type,
            entity_id: entity_id.clone(),
        });

        let confirmed = self
            .backend
            .reject_deletion_request(request_id)
            .await
            .and_then(|ack| ack.into_result());

        if let Err(err) = confirmed {
            return Err(self.roll_back(&request, err).await);
        }

        self.retire(request_id);
        info!(request_id, entity_type = %request.entity_type, entity_id = %entity_id, "Deletion rejected");
        self.emitter.emit_kind(EventKind::OverlayCommitted {
            request_id: request_id.to_string(),
            entity_type: request.entity_type,
            entity_id: entity_id.clone(),
            removed: false,
        });
        Ok(Resolution {
            request_id: request_id.to_string(),
            entity_type: request.entity_type,
            entity_id,
            project_id,
            removed: false,
        })
    }

    // ========================================================================
    // Background resync
    // ========================================================================

    /// Start a background fetch. Older in-flight fetches become stale.
    pub fn spawn_resync(&mut self) {
        self.supersede_resync();
        let Some(domains) = self.listing_domains() else {
            return;
        };
        let generation = self.generation;
        let backend = self.backend.clone();
        let tx = self.resync_tx.clone();
        debug!(generation, domains = domains.len(), "Background resync started");
        self.resync_task = Some(tokio::spawn(async move {
            let result = fetch_all(backend.as_ref(), &domains).await;
            let _ = tx.send(ResyncResult { generation, result });
        }));
    }

    /// Invalidate any in-flight resync.
    fn supersede_resync(&mut self) {
        self.generation += 1;
        if let Some(task) = self.resync_task.take() {
            task.abort();
        }
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_task.is_some()
    }

    /// Apply a finished resync if one has arrived. Returns true if the store
    /// changed.
    pub fn apply_pending_resync(&mut self) -> bool {
        let mut applied = false;
        while let Ok(msg) = self.resync_rx.try_recv() {
            applied |= self.apply_resync(msg);
        }
        applied
    }

    /// Wait for the in-flight resync (if any) and apply it.
    pub async fn settle_resync(&mut self) -> bool {
        if self.resync_task.is_none() {
            return self.apply_pending_resync();
        }
        while let Some(msg) = self.resync_rx.recv().await {
            let current = msg.generation == self.generation;
            let applied = self.apply_resync(msg);
            if current {
                return applied;
            }
        }
        false
    }

    fn apply_resync(&mut self, msg: ResyncResult) -> bool {
        if msg.generation != self.generation {
            debug!(
                generation = msg.generation,
                current = self.generation,
                "Stale resync dropped"
            );
            return false;
        }
        self.resync_task = None;
        match msg.result {
            Ok(requests) => {
                self.install(requests);
                true
            }
            Err(err) => {
                warn!(error = %err, "Background resync failed");
                false
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }

    fn project_index(&self, project_id: &str) -> Option<usize> {
        self.projects.iter().position(|p| p.project_id == project_id)
    }

    /// The request, provided it is still pending. A request resolved
    /// elsewhere is retired locally and reported as a conflict.
    fn pending_request(&mut self, request_id: &str) -> Result<DeletionRequest> {
        let request = self
            .store
            .get(request_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::RequestNotFound(request_id.to_string()))?;
        if request.is_pending() {
            return Ok(request);
        }
        let status = request.status.to_string();
        warn!(request_id, %status, "Request already resolved");
        self.store.retire(request_id);
        self.resolved.insert(request_id.to_string());
        self.emitter.emit_kind(EventKind::OverlayConflict {
            request_id: request_id.to_string(),
            status: status.clone(),
        });
        self.spawn_resync();
        Err(CoordinatorError::ReconciliationConflict {
            request_id: request_id.to_string(),
            status,
        })
    }

    fn locate(&self, request: &DeletionRequest, entity_id: &str) -> Result<Target> {
        let scoped = |p: &Project| {
            request
                .project_id
                .as_deref()
                .map_or(true, |id| id == p.project_id)
        };
        let found = match request.entity_type {
            EntityType::Project => self
                .project_index(entity_id)
                .map(|index| Target::Project { index }),
            EntityType::Stage => self
                .projects
                .iter()
                .position(|p| scoped(p) && p.stage(entity_id).is_some())
                .map(|index| Target::Stage {
                    index,
                    stage_id: entity_id.to_string(),
                }),
            EntityType::Task => self
                .projects
                .iter()
                .position(|p| scoped(p) && p.find_task(entity_id).is_some())
                .map(|index| Target::Task {
                    index,
                    task_id: entity_id.to_string(),
                }),
        };
        found.ok_or_else(|| not_found(request.entity_type, entity_id))
    }

    /// Drop the working copy, then check whether the failure was a race
    /// with another reviewer.
    async fn roll_back(&mut self, request: &DeletionRequest, err: CoordinatorError) -> CoordinatorError {
        let request_id = request.request_id.as_str();
        warn!(request_id, error = %err, "Confirmation failed, rolling back");
        self.emitter.emit_kind(EventKind::OverlayRolledBack {
            request_id: request_id.to_string(),
            reason: err.to_string(),
        });

        self.supersede_resync();
        let Some(domains) = self.listing_domains() else {
            return err;
        };
        let fresh = match fetch_all(self.backend.as_ref(), &domains).await {
            Ok(fresh) => fresh,
            Err(fetch_err) => {
                warn!(request_id, error = %fetch_err, "Re-fetch after rollback failed");
                return err;
            }
        };
        let still_pending = fresh
            .iter()
            .any(|r| r.request_id == request_id && r.is_pending());
        let status = fresh
            .iter()
            .find(|r| r.request_id == request_id)
            .map(|r| r.status.to_string())
            .unwrap_or_else(|| "missing".into());
        self.install(fresh);

        if still_pending {
            return err;
        }
        self.store.retire(request_id);
        self.resolved.insert(request_id.to_string());
        self.emitter.emit_kind(EventKind::OverlayConflict {
            request_id: request_id.to_string(),
            status: status.clone(),
        });
        CoordinatorError::ReconciliationConflict {
            request_id: request_id.to_string(),
            status,
        }
    }

    fn retire(&mut self, request_id: &str) {
        self.store.retire(request_id);
        self.resolved.insert(request_id.to_string());
    }

    fn install(&mut self, requests: Vec<DeletionRequest>) {
        let mut store = RequestStore::from_requests(requests);
        let excluded = store.exclude(&self.resolved);
        self.store = store;
        debug!(pending = self.store.pending_count(), excluded, "Request store refreshed");
        self.emitter.emit_kind(EventKind::StoreRefreshed {
            pending: self.store.pending_count(),
            excluded,
        });
    }

    fn domains(&self) -> Vec<String> {
        let mut domains = self.extra_domains.clone();
        domains.extend(self.projects.iter().filter_map(|p| p.subject_domain.clone()));
        domains.into_iter().collect()
    }

    /// Domains to list, or `None` when no fetch should happen.
    fn listing_domains(&self) -> Option<Vec<String>> {
        let domains = self.domains();
        if domains.is_empty() {
            debug!("No subject domain known, keeping request store");
            return None;
        }
        Some(domains)
    }

    fn focused_stage_count(&self) -> usize {
        self.focus
            .as_deref()
            .and_then(|id| self.project(id))
            .map_or(0, |p| p.stages.len())
    }

    fn clamp_cursor(&mut self) {
        let len = self.focused_stage_count();
        if let Some((from, to)) = self.cursor.clamp(len) {
            let project_id = self.focus.clone().unwrap_or_default();
            debug!(project_id = %project_id, from, to, "Stage cursor clamped");
            self.emitter.emit_kind(EventKind::CursorClamped {
                project_id,
                from,
                to,
            });
        }
    }
}

impl Drop for OverlayReconciler {
    fn drop(&mut self) {
        if let Some(task) = self.resync_task.take() {
            task.abort();
        }
    }
}

async fn fetch_all(backend: &dyn ReviewBackend, domains: &[String]) -> Result<Vec<DeletionRequest>> {
    let mut all = Vec::new();
    for domain in domains {
        all.extend(backend.list_deletion_requests(domain).await?);
    }
    Ok(all)
}

fn not_found(entity_type: EntityType, entity_id: &str) -> CoordinatorError {
    CoordinatorError::EntityNotFound {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
    }
}
