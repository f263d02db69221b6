//! In-memory job and contact store
//!
//! A single lock guards all state, so every trait call is atomic.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{ContactStore, DeleteOutcome, JobStore};
use crate::services::matching::MatchPlan;
use crate::types::{
    AnalysisResult, ConfirmedImport, Contact, ContactResolution, ContactValues, ImportJob,
    JobStatus, RowErrorDetail, RowOutcome, StatusChange, VoteHistoryEntry,
};

struct StoredJob {
    job: ImportJob,
    file: Vec<u8>,
    errors: Vec<RowErrorDetail>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, StoredJob>,
    contacts: HashMap<Uuid, Contact>,
    /// Keyed by (contact, election label)
    votes: HashMap<(Uuid, String), VoteHistoryEntry>,
    /// Row writes allowed before failing; used to simulate outages
    row_write_budget: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn job_mut<'a>(state: &'a mut State, tenant_id: Uuid, job_id: Uuid) -> Option<&'a mut StoredJob> {
        state
            .jobs
            .get_mut(&job_id)
            .filter(|stored| stored.job.tenant_id == tenant_id)
    }
}

#[cfg(test)]
impl MemoryStore {
    pub fn seed_contact(&self, tenant_id: Uuid, values: &ContactValues) -> Uuid {
        let contact = Contact::from_values(tenant_id, values);
        let id = contact.id;
        self.state.lock().contacts.insert(id, contact);
        id
    }

    pub fn contact(&self, id: Uuid) -> Option<Contact> {
        self.state.lock().contacts.get(&id).cloned()
    }

    pub fn contacts(&self, tenant_id: Uuid) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .state
            .lock()
            .contacts
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.created_at);
        contacts
    }

    pub fn vote_history(&self, contact_id: Uuid) -> Vec<VoteHistoryEntry> {
        let mut entries: Vec<VoteHistoryEntry> = self
            .state
            .lock()
            .votes
            .iter()
            .filter(|((id, _), _)| *id == contact_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| a.election_label.cmp(&b.election_label));
        entries
    }

    /// Fail every row write after the next `n`
    pub fn fail_row_writes_after(&self, n: usize) {
        self.state.lock().row_write_budget = Some(n);
    }

    pub fn set_updated_at(&self, job_id: Uuid, at: chrono::DateTime<Utc>) {
        if let Some(stored) = self.state.lock().jobs.get_mut(&job_id) {
            stored.job.updated_at = at;
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ImportJob, file: &[u8]) -> Result<()> {
        self.state.lock().jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                file: file.to_vec(),
                errors: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<ImportJob>> {
        let mut state = self.state.lock();
        Ok(Self::job_mut(&mut state, tenant_id, job_id).map(|stored| stored.job.clone()))
    }

    async fn load_file(&self, tenant_id: Uuid, job_id: Uuid) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        Ok(Self::job_mut(&mut state, tenant_id, job_id).map(|stored| stored.file.clone()))
    }

    async fn list_jobs(&self, tenant_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<ImportJob>, i64)> {
        let state = self.state.lock();
        let mut jobs: Vec<&ImportJob> = state
            .jobs
            .values()
            .map(|stored| &stored.job)
            .filter(|job| job.tenant_id == tenant_id)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = jobs.len() as i64;
        let items = jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn transition(&self, tenant_id: Uuid, job_id: Uuid, change: &StatusChange) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(stored) = Self::job_mut(&mut state, tenant_id, job_id) else {
            return Ok(false);
        };
        if stored.job.status != change.from {
            return Ok(false);
        }

        let job = &mut stored.job;
        job.status = change.to;
        if change.to == JobStatus::Processing {
            job.started_at = Some(change.at);
        }
        if change.to.is_terminal() {
            job.completed_at = Some(change.at);
        }
        if let Some(message) = &change.error_message {
            job.error_message = Some(message.clone());
        }
        job.updated_at = change.at;
        Ok(true)
    }

    async fn complete_analysis(&self, tenant_id: Uuid, job_id: Uuid, analysis: &AnalysisResult) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(stored) = Self::job_mut(&mut state, tenant_id, job_id) else {
            return Ok(false);
        };
        if stored.job.status != JobStatus::Analyzing {
            return Ok(false);
        }

        let job = &mut stored.job;
        job.analysis = Some(analysis.clone());
        job.total_rows = Some(analysis.total_rows);
        job.matching_strategy = Some(analysis.suggested_matching_strategy);
        job.status = JobStatus::Mapping;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_confirmation(&self, tenant_id: Uuid, job_id: Uuid, confirmed: &ConfirmedImport) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(stored) = Self::job_mut(&mut state, tenant_id, job_id) else {
            return Ok(false);
        };
        if stored.job.status != JobStatus::Mapping {
            return Ok(false);
        }

        let job = &mut stored.job;
        job.matching_strategy = Some(confirmed.matching_strategy);
        job.create_unmatched = confirmed.create_unmatched;
        job.confirmed = Some(confirmed.clone());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_total_rows(&self, tenant_id: Uuid, job_id: Uuid, total_rows: i64) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = Self::job_mut(&mut state, tenant_id, job_id) {
            stored.job.total_rows = Some(total_rows);
            stored.job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_row_outcome(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        outcome: RowOutcome,
        error: Option<&RowErrorDetail>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let budget = state.row_write_budget;
        match budget {
            Some(0) => anyhow::bail!("contact store unavailable"),
            Some(n) => state.row_write_budget = Some(n - 1),
            None => {}
        }

        let stored = Self::job_mut(&mut state, tenant_id, job_id)
            .ok_or_else(|| anyhow::anyhow!("Import job {} not found", job_id))?;
        stored.job.counts.apply(outcome);
        if let Some(detail) = error {
            stored.errors.push(detail.clone());
        }
        stored.job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_errors(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RowErrorDetail>, i64)> {
        let mut state = self.state.lock();
        let Some(stored) = Self::job_mut(&mut state, tenant_id, job_id) else {
            return Ok((Vec::new(), 0));
        };
        let total = stored.errors.len() as i64;
        let items = stored
            .errors
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn delete_job(&self, tenant_id: Uuid, job_id: Uuid) -> Result<DeleteOutcome> {
        let mut state = self.state.lock();
        let status = match Self::job_mut(&mut state, tenant_id, job_id) {
            None => return Ok(DeleteOutcome::NotFound),
            Some(stored) => stored.job.status,
        };
        if !status.is_deletable() {
            return Ok(DeleteOutcome::Busy(status));
        }
        state.jobs.remove(&job_id);
        Ok(DeleteOutcome::Deleted)
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn resolve_and_apply(
        &self,
        tenant_id: Uuid,
        plan: &MatchPlan,
        values: &ContactValues,
        votes: &[VoteHistoryEntry],
        create_unmatched: bool,
    ) -> Result<ContactResolution> {
        let mut state = self.state.lock();

        let matched = plan.keys.iter().find_map(|key| {
            state
                .contacts
                .values()
                .filter(|c| c.tenant_id == tenant_id && c.identifier(key.kind) == Some(key.value.as_str()))
                .min_by_key(|c| (c.created_at, c.id))
                .map(|c| (c.id, key.kind))
        });

        let resolution = match matched {
            Some((contact_id, matched_by)) => {
                if let Some(contact) = state.contacts.get_mut(&contact_id) {
                    contact.apply(values);
                }
                ContactResolution::Updated { contact_id, matched_by }
            }
            None if create_unmatched => {
                let contact = Contact::from_values(tenant_id, values);
                let contact_id = contact.id;
                state.contacts.insert(contact_id, contact);
                ContactResolution::Created { contact_id }
            }
            None => ContactResolution::Unmatched,
        };

        if let Some(contact_id) = resolution.contact_id() {
            for entry in votes {
                state
                    .votes
                    .insert((contact_id, entry.election_label.clone()), entry.clone());
            }
        }

        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactField, IdentifierKind, MatchKey};
    use std::sync::Arc;

    fn values(pairs: &[(ContactField, &str)]) -> ContactValues {
        let mut v = ContactValues::default();
        for (field, value) in pairs {
            v.set(*field, value.to_string());
        }
        v
    }

    fn plan(keys: &[(IdentifierKind, &str)]) -> MatchPlan {
        MatchPlan {
            keys: keys.iter().map(|(k, v)| MatchKey::new(*k, *v)).collect(),
        }
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_second_key() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let existing = store.seed_contact(tenant, &values(&[(ContactField::Email, "a@x.org")]));

        let resolution = store
            .resolve_and_apply(
                tenant,
                &plan(&[(IdentifierKind::VoterId, "V9"), (IdentifierKind::Email, "a@x.org")]),
                &values(&[(ContactField::VoterId, "V9"), (ContactField::Email, "a@x.org")]),
                &[],
                true,
            )
            .await
            .unwrap();

        assert_eq!(
            resolution,
            ContactResolution::Updated {
                contact_id: existing,
                matched_by: IdentifierKind::Email
            }
        );
        assert_eq!(store.contact(existing).unwrap().voter_id.as_deref(), Some("V9"));
    }

    #[tokio::test]
    async fn test_contacts_are_tenant_scoped() {
        let store = MemoryStore::new();
        let other_tenant = Uuid::new_v4();
        store.seed_contact(other_tenant, &values(&[(ContactField::VoterId, "V1")]));

        let resolution = store
            .resolve_and_apply(
                Uuid::new_v4(),
                &plan(&[(IdentifierKind::VoterId, "V1")]),
                &values(&[(ContactField::VoterId, "V1")]),
                &[],
                false,
            )
            .await
            .unwrap();
        assert_eq!(resolution, ContactResolution::Unmatched);
    }

    #[tokio::test]
    async fn test_concurrent_rows_create_one_contact_per_identity() {
        let store = Arc::new(MemoryStore::new());
        let tenant = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .resolve_and_apply(
                        tenant,
                        &plan(&[(IdentifierKind::VoterId, "V1")]),
                        &values(&[(ContactField::VoterId, "V1")]),
                        &[],
                        true,
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ContactResolution::Created { .. }) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.contacts(tenant).len(), 1);
    }

    #[tokio::test]
    async fn test_record_row_outcome_keeps_counts_consistent() {
        let store = MemoryStore::new();
        let job = ImportJob::new(Uuid::new_v4(), Uuid::new_v4(), "v.csv".into(), 1, String::new());
        store.insert_job(&job, b"x").await.unwrap();

        for outcome in [RowOutcome::Created, RowOutcome::Skipped, RowOutcome::Updated] {
            store
                .record_row_outcome(job.tenant_id, job.id, outcome, None)
                .await
                .unwrap();
        }
        let detail = RowErrorDetail {
            row: 4,
            error: "bad".into(),
            data: None,
        };
        store
            .record_row_outcome(job.tenant_id, job.id, RowOutcome::Errored, Some(&detail))
            .await
            .unwrap();

        let stored = store.get_job(job.tenant_id, job.id).await.unwrap().unwrap();
        assert_eq!(stored.counts.rows_processed, 4);
        assert!(stored.counts.is_consistent());
        let (errors, total) = store.list_errors(job.tenant_id, job.id, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(errors, vec![detail]);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let job = ImportJob::new(Uuid::new_v4(), Uuid::new_v4(), "v.csv".into(), 1, String::new());
        store.insert_job(&job, b"x").await.unwrap();

        let stale = StatusChange::new(JobStatus::Queued, JobStatus::Processing);
        assert!(!store.transition(job.tenant_id, job.id, &stale).await.unwrap());

        let change = StatusChange::new(JobStatus::Pending, JobStatus::Analyzing);
        assert!(store.transition(job.tenant_id, job.id, &change).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_row_writes_after_budget() {
        let store = MemoryStore::new();
        let job = ImportJob::new(Uuid::new_v4(), Uuid::new_v4(), "v.csv".into(), 1, String::new());
        store.insert_job(&job, b"x").await.unwrap();
        store.fail_row_writes_after(1);

        assert!(store
            .record_row_outcome(job.tenant_id, job.id, RowOutcome::Created, None)
            .await
            .is_ok());
        assert!(store
            .record_row_outcome(job.tenant_id, job.id, RowOutcome::Created, None)
            .await
            .is_err());
    }
}
