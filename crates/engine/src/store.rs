//! The job store: an ordered, id-keyed list of generation jobs.
//!
//! Jobs are kept most-recent-first in an [`IndexMap`], which doubles as
//! the stable-key index (id -> position) and the ordered sequence. Two side
//! indexes are maintained:
//!
//! - `aliases` maps the provisional id of a confirmed optimistic record to
//!   its canonical id, so ids handed out by `submit()` stay valid.
//! - `by_execution` maps backend execution ids to job ids for push-channel
//!   correlation.

use std::collections::HashMap;

use genqueue_core::error::CoreError;
use genqueue_core::inputs::InputSnapshot;
use genqueue_core::job::GenerationJob;
use genqueue_core::output::{AssetUrls, OutputReference};
use genqueue_core::record::GenerationRecord;
use genqueue_core::status::JobStatus;
use genqueue_core::types::{ExecutionId, JobId, WorkflowId};
use indexmap::IndexMap;

/// Upper bound on confirmation patches kept for jobs not yet known locally.
const MAX_PARKED_PATCHES: usize = 64;

/// A state change reported for a job, already correlated to the store's
/// vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// The backend accepted the job; correlated by job id.
    Submitted {
        id: JobId,
        execution_id: Option<ExecutionId>,
        status: Option<JobStatus>,
    },
    Started {
        execution_id: ExecutionId,
    },
    /// Without an execution id the preview goes to the job that is
    /// currently Processing (the backend runs one job at a time).
    Preview {
        execution_id: Option<ExecutionId>,
        url: String,
    },
    Executed {
        execution_id: ExecutionId,
        outputs: Vec<OutputReference>,
    },
    Failed {
        execution_id: ExecutionId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    /// Fields changed without a lifecycle milestone (execution id, preview).
    Updated,
    Started,
    Completed,
    Failed(String),
}

/// Outcome of applying an event that changed a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job_id: JobId,
    pub execution_id: Option<ExecutionId>,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone)]
struct ParkedPatch {
    execution_id: Option<ExecutionId>,
    status: Option<JobStatus>,
}

pub struct JobStore {
    /// Most recent first.
    jobs: IndexMap<JobId, GenerationJob>,
    aliases: HashMap<JobId, JobId>,
    by_execution: HashMap<ExecutionId, JobId>,
    /// `job_submitted` patches for jobs not in the store yet, oldest first.
    parked: IndexMap<JobId, ParkedPatch>,
    urls: AssetUrls,
}

impl JobStore {
    pub fn new(urls: AssetUrls) -> Self {
        Self {
            jobs: IndexMap::new(),
            aliases: HashMap::new(),
            by_execution: HashMap::new(),
            parked: IndexMap::new(),
            urls,
        }
    }

    pub fn urls(&self) -> &AssetUrls {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Map a job id (canonical or provisional) to the key it is stored under.
    pub fn resolve_id(&self, id: &str) -> Option<&JobId> {
        if let Some((key, _)) = self.jobs.get_key_value(id) {
            return Some(key);
        }
        self.aliases
            .get(id)
            .filter(|canonical| self.jobs.contains_key(canonical.as_str()))
    }

    pub fn get(&self, id: &str) -> Option<&GenerationJob> {
        let key = self.resolve_id(id)?;
        self.jobs.get(key.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve_id(id).is_some()
    }

    /// Position in the most-recent-first order.
    pub fn position(&self, id: &str) -> Option<usize> {
        let key = self.resolve_id(id)?;
        self.jobs.get_index_of(key.as_str())
    }

    pub fn job_at(&self, index: usize) -> Option<&GenerationJob> {
        self.jobs.get_index(index).map(|(_, job)| job)
    }

    /// Jobs, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &GenerationJob> {
        self.jobs.values()
    }

    pub fn list(&self) -> Vec<GenerationJob> {
        self.jobs.values().cloned().collect()
    }

    /// Id of the job currently executing, if any.
    pub fn processing_job_id(&self) -> Option<&JobId> {
        self.jobs
            .iter()
            .find(|(_, job)| job.status() == JobStatus::Processing)
            .map(|(id, _)| id)
    }

    /// Insert a new Pending record at the head and return its provisional id.
    pub fn create_optimistic(&mut self, workflow_id: WorkflowId, inputs: InputSnapshot) -> JobId {
        let job = GenerationJob::optimistic(workflow_id, inputs);
        let id = job.id().to_string();
        self.jobs.shift_insert(0, id.clone(), job);
        id
    }

    /// Replace a record in place with its canonical backend version.
    ///
    /// The job keeps its list position and is re-keyed to the canonical id;
    /// the old id remains resolvable as an alias. If the canonical id is
    /// already present (e.g. a history fetch raced the creation response),
    /// that copy is folded in and removed.
    pub fn apply_server_record(&mut self, id: &str, record: GenerationRecord) -> Result<JobId, CoreError> {
        let key = self
            .resolve_id(id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound(id.to_string()))?;
        let workflow_id = self.jobs[key.as_str()].workflow_id();

        let canonical = record.with_default_workflow(workflow_id).into_job(&self.urls)?;
        let canonical_id = canonical.id().to_string();

        let duplicate = if canonical_id != key {
            self.jobs.shift_remove(canonical_id.as_str())
        } else {
            None
        };

        let (index, _, mut job) = self
            .jobs
            .shift_remove_full(key.as_str())
            .ok_or_else(|| CoreError::JobNotFound(key.clone()))?;

        if let Some(duplicate) = duplicate {
            job.absorb(duplicate);
        }
        job.absorb(canonical);
        self.jobs.shift_insert(index, canonical_id.clone(), job);

        if canonical_id != key {
            for target in self.aliases.values_mut() {
                if *target == key {
                    *target = canonical_id.clone();
                }
            }
            self.aliases.insert(key, canonical_id.clone());
        }

        self.reindex_executions();
        self.apply_parked(&canonical_id);

        Ok(canonical_id)
    }

    /// Apply a correlated execution event.
    ///
    /// Returns `None` when nothing changed: unknown correlation ids, events
    /// for terminal jobs, and backward transitions are all no-ops.
    pub fn apply_event(&mut self, event: ExecutionEvent) -> Option<Transition> {
        match event {
            ExecutionEvent::Submitted {
                id,
                execution_id,
                status,
            } => match self.resolve_id(&id).cloned() {
                Some(key) => self.patch_submitted(&key, execution_id.as_deref(), status),
                None => {
                    self.park(id, execution_id, status);
                    None
                }
            },

            ExecutionEvent::Started { execution_id } => {
                let key = self.job_for_execution(&execution_id)?;
                let job = self.jobs.get_mut(key.as_str())?;
                if !job.start() {
                    tracing::debug!(job_id = %key, status = %job.status(), "Ignoring execution_start");
                    return None;
                }
                Some(Transition {
                    job_id: key,
                    execution_id: Some(execution_id),
                    kind: TransitionKind::Started,
                })
            }

            ExecutionEvent::Preview { execution_id, url } => {
                let key = match &execution_id {
                    Some(execution_id) => self.job_for_execution(execution_id)?,
                    None => self.processing_job_id()?.clone(),
                };
                let job = self.jobs.get_mut(key.as_str())?;
                if !job.set_preview(url) {
                    return None;
                }
                Some(Transition {
                    execution_id: job.execution_id().map(str::to_string),
                    job_id: key,
                    kind: TransitionKind::Updated,
                })
            }

            ExecutionEvent::Executed {
                execution_id,
                outputs,
            } => {
                let key = self.job_for_execution(&execution_id)?;
                let job = self.jobs.get_mut(key.as_str())?;
                if job.status().is_terminal() {
                    tracing::debug!(job_id = %key, "Ignoring executed for terminal job");
                    return None;
                }
                job.append_outputs(outputs, &self.urls);
                job.complete();
                Some(Transition {
                    job_id: key,
                    execution_id: Some(execution_id),
                    kind: TransitionKind::Completed,
                })
            }

            ExecutionEvent::Failed {
                execution_id,
                message,
            } => {
                let key = self.job_for_execution(&execution_id)?;
                let job = self.jobs.get_mut(key.as_str())?;
                if !job.fail(message.clone()) {
                    tracing::debug!(job_id = %key, "Ignoring execution_error for terminal job");
                    return None;
                }
                Some(Transition {
                    job_id: key,
                    execution_id: Some(execution_id),
                    kind: TransitionKind::Failed(message),
                })
            }
        }
    }

    /// Mark a job Failed locally (submission errors).
    pub fn fail_job(&mut self, id: &str, message: &str) -> Option<Transition> {
        let key = self.resolve_id(id)?.clone();
        let job = self.jobs.get_mut(key.as_str())?;
        if !job.fail(message) {
            return None;
        }
        Some(Transition {
            execution_id: job.execution_id().map(str::to_string),
            job_id: key,
            kind: TransitionKind::Failed(message.to_string()),
        })
    }

    /// Replace the whole list, keeping the given order. Later duplicates of
    /// an id are dropped.
    pub fn replace_all(&mut self, jobs: Vec<GenerationJob>) {
        let mut ordered = IndexMap::with_capacity(jobs.len());
        for job in jobs {
            let id = job.id().to_string();
            ordered.entry(id).or_insert(job);
        }
        self.jobs = ordered;
        self.aliases
            .retain(|_, canonical| self.jobs.contains_key(canonical.as_str()));
        self.reindex_executions();

        let arrived: Vec<JobId> = self
            .parked
            .keys()
            .filter(|id| self.jobs.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in arrived {
            self.apply_parked(&id);
        }
    }

    /// Append a job at the tail unless its id is already present.
    pub fn append(&mut self, job: GenerationJob) -> bool {
        if self.contains(job.id()) {
            return false;
        }
        if let Some(execution_id) = job.execution_id() {
            self.by_execution
                .insert(execution_id.to_string(), job.id().to_string());
        }
        let id = job.id().to_string();
        self.jobs.insert(id.clone(), job);
        self.apply_parked(&id);
        true
    }

    // ---- private helpers ----

    fn job_for_execution(&self, execution_id: &str) -> Option<JobId> {
        let found = self.by_execution.get(execution_id).cloned();
        if found.is_none() {
            tracing::debug!(execution_id, "No job correlated with execution id");
        }
        found
    }

    fn patch_submitted(
        &mut self,
        key: &str,
        execution_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> Option<Transition> {
        let job = self.jobs.get_mut(key)?;
        let mut changed = false;

        if let Some(execution_id) = execution_id {
            if job.assign_execution_id(execution_id) {
                self.by_execution
                    .insert(execution_id.to_string(), key.to_string());
                changed = true;
            }
        }
        if let Some(status) = status {
            changed |= job.advance(status);
        }

        changed.then(|| Transition {
            job_id: key.to_string(),
            execution_id: job.execution_id().map(str::to_string),
            kind: TransitionKind::Updated,
        })
    }

    /// Hold a patch until its job arrives. When full, the oldest patch goes.
    fn park(&mut self, id: JobId, execution_id: Option<ExecutionId>, status: Option<JobStatus>) {
        if !self.parked.contains_key(&id) && self.parked.len() >= MAX_PARKED_PATCHES {
            if let Some((evicted, _)) = self.parked.shift_remove_index(0) {
                tracing::warn!(job_id = %evicted, "Evicting oldest parked confirmation");
            }
        }
        tracing::debug!(job_id = %id, "Parking confirmation for job not yet known");
        self.parked.insert(id, ParkedPatch { execution_id, status });
    }

    fn apply_parked(&mut self, key: &str) {
        if let Some(patch) = self.parked.shift_remove(key) {
            tracing::debug!(job_id = %key, "Applying early confirmation patch");
            self.patch_submitted(key, patch.execution_id.as_deref(), patch.status);
        }
    }

    #[cfg(test)]
    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }

    fn reindex_executions(&mut self) {
        self.by_execution = self
            .jobs
            .iter()
            .filter_map(|(id, job)| job.execution_id().map(|e| (e.to_string(), id.clone())))
            .collect();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    pub(crate) fn urls() -> AssetUrls {
        AssetUrls::new("http://h")
    }

    pub(crate) fn record(id: &str, status: &str, execution_id: Option<&str>) -> GenerationRecord {
        serde_json::from_value(json!({
            "id": id,
            "status": status,
            "workflowId": 5,
            "executionId": execution_id,
        }))
        .unwrap()
    }

    pub(crate) fn job(id: &str, status: &str, execution_id: Option<&str>) -> GenerationJob {
        record(id, status, execution_id).into_job(&urls()).unwrap()
    }

    fn seed_inputs() -> InputSnapshot {
        let mut inputs = InputSnapshot::new();
        inputs.set("3", "seed", json!(42));
        inputs
    }

    fn ids(store: &JobStore) -> Vec<String> {
        store.iter().map(|j| j.id().to_string()).collect()
    }

    #[test]
    fn optimistic_record_is_inserted_at_head() {
        let mut store = JobStore::new(urls());
        store.append(job("old", "completed", None));

        let id = store.create_optimistic(5, seed_inputs());

        assert_eq!(store.position(&id), Some(0));
        let head = store.job_at(0).unwrap();
        assert_eq!(head.status(), JobStatus::Pending);
        assert!(head.is_optimistic());
    }

    #[test]
    fn server_record_replaces_in_place() {
        let mut store = JobStore::new(urls());
        store.append(job("a", "completed", None));
        store.append(job("b", "completed", None));
        let local = store.create_optimistic(5, seed_inputs());
        // Another submission lands above it before confirmation.
        let newer = store.create_optimistic(5, seed_inputs());

        let canonical = store
            .apply_server_record(&local, record("g1", "queued", None))
            .unwrap();

        assert_eq!(canonical, "g1");
        assert_eq!(ids(&store), vec![newer.clone(), "g1".into(), "a".into(), "b".into()]);
        let confirmed = store.get("g1").unwrap();
        assert_eq!(confirmed.status(), JobStatus::Queued);
        assert!(!confirmed.is_optimistic());
        // The provisional id still resolves to the same job.
        assert_eq!(store.get(&local).unwrap().id(), "g1");
    }

    #[test]
    fn server_record_for_unknown_job_is_not_found() {
        let mut store = JobStore::new(urls());
        assert_matches!(
            store.apply_server_record("nope", record("g1", "queued", None)),
            Err(CoreError::JobNotFound(_))
        );
    }

    #[test]
    fn confirmation_folds_history_duplicate() {
        let mut store = JobStore::new(urls());
        let local = store.create_optimistic(5, seed_inputs());
        // History fetched the canonical record first, already processing.
        store.append(job("g1", "processing", Some("p1")));

        store
            .apply_server_record(&local, record("g1", "queued", None))
            .unwrap();

        assert_eq!(store.len(), 1);
        let job = store.get("g1").unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(job.execution_id(), Some("p1"));
    }

    #[test]
    fn execution_start_moves_queued_to_processing() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "queued", Some("p1")));
        store.apply_event(ExecutionEvent::Preview {
            execution_id: Some("p1".into()),
            url: "data:stale".into(),
        });

        let transition = store
            .apply_event(ExecutionEvent::Started {
                execution_id: "p1".into(),
            })
            .unwrap();

        assert_eq!(transition.kind, TransitionKind::Started);
        let job = store.get("g1").unwrap();
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.preview_url().is_none());
    }

    #[test]
    fn submitted_patch_correlates_by_id() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "pending", None));

        let transition = store.apply_event(ExecutionEvent::Submitted {
            id: "g1".into(),
            execution_id: Some("p1".into()),
            status: Some(JobStatus::Queued),
        });

        assert_matches!(transition, Some(Transition { kind: TransitionKind::Updated, .. }));
        assert_eq!(store.get("g1").unwrap().execution_id(), Some("p1"));
        // Engine events now correlate.
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "p1".into()
            })
            .is_some());
    }

    #[test]
    fn early_submitted_patch_is_applied_on_confirmation() {
        let mut store = JobStore::new(urls());
        let local = store.create_optimistic(5, seed_inputs());

        assert!(store
            .apply_event(ExecutionEvent::Submitted {
                id: "g1".into(),
                execution_id: Some("p1".into()),
                status: Some(JobStatus::Queued),
            })
            .is_none());

        store
            .apply_server_record(&local, record("g1", "queued", None))
            .unwrap();

        assert_eq!(store.get("g1").unwrap().execution_id(), Some("p1"));
    }

    #[test]
    fn parked_patch_is_applied_when_job_arrives_from_history() {
        let mut store = JobStore::new(urls());
        store.apply_event(ExecutionEvent::Submitted {
            id: "h1".into(),
            execution_id: Some("e1".into()),
            status: None,
        });
        store.apply_event(ExecutionEvent::Submitted {
            id: "h2".into(),
            execution_id: Some("e2".into()),
            status: None,
        });
        assert_eq!(store.parked_len(), 2);

        store.append(job("h1", "queued", None));
        assert_eq!(store.get("h1").unwrap().execution_id(), Some("e1"));
        assert_eq!(store.parked_len(), 1);

        let h1 = store.get("h1").unwrap().clone();
        store.replace_all(vec![job("h2", "queued", None), h1]);

        assert_eq!(store.parked_len(), 0);
        assert_eq!(store.get("h2").unwrap().execution_id(), Some("e2"));
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "e2".into()
            })
            .is_some());
    }

    #[test]
    fn full_parking_evicts_oldest_and_keeps_new_confirmation() {
        let mut store = JobStore::new(urls());
        for i in 0..MAX_PARKED_PATCHES {
            store.apply_event(ExecutionEvent::Submitted {
                id: format!("gone{i}"),
                execution_id: Some(format!("x{i}")),
                status: None,
            });
        }
        assert_eq!(store.parked_len(), MAX_PARKED_PATCHES);

        let local = store.create_optimistic(5, seed_inputs());
        store.apply_event(ExecutionEvent::Submitted {
            id: "g1".into(),
            execution_id: Some("p1".into()),
            status: Some(JobStatus::Queued),
        });
        assert_eq!(store.parked_len(), MAX_PARKED_PATCHES);

        store
            .apply_server_record(&local, record("g1", "queued", None))
            .unwrap();
        assert_eq!(store.get("g1").unwrap().execution_id(), Some("p1"));
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "p1".into()
            })
            .is_some());

        // The oldest patch was the one evicted.
        store.append(job("gone0", "queued", None));
        assert!(store.get("gone0").unwrap().execution_id().is_none());
        store.append(job("gone1", "queued", None));
        assert_eq!(store.get("gone1").unwrap().execution_id(), Some("x1"));
    }

    #[test]
    fn execution_start_skips_forward_from_pending() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "pending", Some("p1")));

        let transition = store.apply_event(ExecutionEvent::Started {
            execution_id: "p1".into(),
        });

        assert_matches!(transition, Some(Transition { kind: TransitionKind::Started, .. }));
        assert_eq!(store.get("g1").unwrap().status(), JobStatus::Processing);
    }

    #[test]
    fn executed_appends_outputs_and_completes() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "processing", Some("p1")));

        let transition = store.apply_event(ExecutionEvent::Executed {
            execution_id: "p1".into(),
            outputs: vec![
                OutputReference::InternalAsset { id: 7 },
                OutputReference::image("x.png"),
            ],
        });

        assert_matches!(transition, Some(Transition { kind: TransitionKind::Completed, .. }));
        let job = store.get("g1").unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.images(), ["http://h/assets/7/file".to_string()]);
    }

    #[test]
    fn events_for_terminal_jobs_are_ignored() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "completed", Some("p1")));

        assert!(store
            .apply_event(ExecutionEvent::Failed {
                execution_id: "p1".into(),
                message: "late".into()
            })
            .is_none());
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "p1".into()
            })
            .is_none());
        assert!(store
            .apply_event(ExecutionEvent::Executed {
                execution_id: "p1".into(),
                outputs: vec![OutputReference::image("late.png")],
            })
            .is_none());

        let job = store.get("g1").unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.outputs().is_empty());
    }

    #[test]
    fn status_never_moves_backward() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "processing", Some("p1")));

        let patched = store.apply_event(ExecutionEvent::Submitted {
            id: "g1".into(),
            execution_id: None,
            status: Some(JobStatus::Queued),
        });

        assert!(patched.is_none());
        assert_eq!(store.get("g1").unwrap().status(), JobStatus::Processing);
    }

    #[test]
    fn preview_without_id_goes_to_processing_job() {
        let mut store = JobStore::new(urls());
        store.append(job("g2", "queued", Some("p2")));
        store.append(job("g1", "processing", Some("p1")));

        store.apply_event(ExecutionEvent::Preview {
            execution_id: None,
            url: "data:frame".into(),
        });

        assert_eq!(store.get("g1").unwrap().preview_url(), Some("data:frame"));
        assert!(store.get("g2").unwrap().preview_url().is_none());
    }

    #[test]
    fn preview_without_processing_job_is_dropped() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "queued", Some("p1")));
        assert!(store
            .apply_event(ExecutionEvent::Preview {
                execution_id: None,
                url: "data:frame".into()
            })
            .is_none());
    }

    #[test]
    fn unknown_execution_id_is_ignored() {
        let mut store = JobStore::new(urls());
        store.append(job("g1", "queued", Some("p1")));
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "other".into()
            })
            .is_none());
        assert_eq!(store.get("g1").unwrap().status(), JobStatus::Queued);
    }

    #[test]
    fn fail_job_records_message() {
        let mut store = JobStore::new(urls());
        let id = store.create_optimistic(5, seed_inputs());
        let transition = store.fail_job(&id, "connection refused").unwrap();
        assert_eq!(transition.kind, TransitionKind::Failed("connection refused".into()));
        assert_eq!(store.get(&id).unwrap().error_message(), Some("connection refused"));
    }

    #[test]
    fn replace_all_dedupes_and_reindexes() {
        let mut store = JobStore::new(urls());
        store.replace_all(vec![
            job("g2", "queued", Some("p2")),
            job("g1", "completed", None),
            job("g2", "completed", None),
        ]);

        assert_eq!(ids(&store), vec!["g2".to_string(), "g1".to_string()]);
        assert!(store
            .apply_event(ExecutionEvent::Started {
                execution_id: "p2".into()
            })
            .is_some());
    }
}
