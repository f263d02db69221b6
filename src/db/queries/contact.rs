//! Contact resolution queries used by the import row loop

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::ContactStore;
use crate::services::matching::MatchPlan;
use crate::types::{
    Contact, ContactResolution, ContactValues, IdentifierKind, MatchKey, VoteHistoryEntry,
};

const CONTACT_COLUMNS: &str = r#"
    id, tenant_id, voter_id, email, first_name, last_name,
    date_of_birth, attributes, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct ContactRow {
    id: Uuid,
    tenant_id: Uuid,
    voter_id: Option<String>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    date_of_birth: Option<NaiveDate>,
    attributes: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: row.id,
            tenant_id: row.tenant_id,
            voter_id: row.voter_id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            attributes: row.attributes.0,
            date_of_birth: row.date_of_birth,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Advisory lock key for one identity within a tenant
fn lock_key(tenant_id: Uuid, key: &MatchKey) -> String {
    format!("contact:{}:{}:{}", tenant_id, key.kind.as_str(), key.value)
}

/// PostgreSQL-backed contact store.
///
/// Each row runs in its own transaction holding advisory locks on every
/// identity it may match or create, taken in sorted order so concurrent
/// jobs cannot deadlock.
#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn find_contact(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    key: &MatchKey,
) -> Result<Option<Contact>> {
    let predicate = match key.kind {
        IdentifierKind::VoterId => "voter_id = $2",
        IdentifierKind::Email => "lower(email) = lower($2)",
    };

    let row = sqlx::query_as::<_, ContactRow>(&format!(
        r#"
        SELECT {}
        FROM contacts
        WHERE tenant_id = $1 AND {}
        ORDER BY created_at, id
        LIMIT 1
        FOR UPDATE
        "#,
        CONTACT_COLUMNS, predicate
    ))
    .bind(tenant_id)
    .bind(&key.value)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(Contact::from))
}

async fn update_contact(tx: &mut Transaction<'_, Postgres>, contact: &Contact) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contacts
        SET
            voter_id = $3,
            email = $4,
            first_name = $5,
            last_name = $6,
            date_of_birth = $7,
            attributes = $8,
            updated_at = $9
        WHERE id = $1 AND tenant_id = $2
        "#,
    )
    .bind(contact.id)
    .bind(contact.tenant_id)
    .bind(&contact.voter_id)
    .bind(&contact.email)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(contact.date_of_birth)
    .bind(Json(&contact.attributes))
    .bind(contact.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_contact(tx: &mut Transaction<'_, Postgres>, contact: &Contact) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contacts (
            id, tenant_id, voter_id, email, first_name, last_name,
            date_of_birth, attributes, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(contact.id)
    .bind(contact.tenant_id)
    .bind(&contact.voter_id)
    .bind(&contact.email)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(contact.date_of_birth)
    .bind(Json(&contact.attributes))
    .bind(contact.created_at)
    .bind(contact.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_vote_history(
    tx: &mut Transaction<'_, Postgres>,
    contact_id: Uuid,
    entry: &VoteHistoryEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contact_vote_history (
            contact_id, election_label, election_year, election_type, participation
        )
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (contact_id, election_label) DO UPDATE SET
            election_year = EXCLUDED.election_year,
            election_type = EXCLUDED.election_type,
            participation = EXCLUDED.participation,
            recorded_at = NOW()
        "#,
    )
    .bind(contact_id)
    .bind(&entry.election_label)
    .bind(entry.election_year)
    .bind(entry.election_type.as_str())
    .bind(entry.participation.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn resolve_and_apply(
        &self,
        tenant_id: Uuid,
        plan: &MatchPlan,
        values: &ContactValues,
        votes: &[VoteHistoryEntry],
        create_unmatched: bool,
    ) -> Result<ContactResolution> {
        let mut tx = self.pool.begin().await?;

        for key in plan.lock_order() {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(lock_key(tenant_id, &key))
                .execute(&mut *tx)
                .await?;
        }

        let mut matched = None;
        for key in &plan.keys {
            if let Some(contact) = find_contact(&mut tx, tenant_id, key).await? {
                matched = Some((contact, key.kind));
                break;
            }
        }

        let resolution = match matched {
            Some((mut contact, matched_by)) => {
                contact.apply(values);
                update_contact(&mut tx, &contact).await?;
                ContactResolution::Updated {
                    contact_id: contact.id,
                    matched_by,
                }
            }
            None if create_unmatched => {
                let contact = Contact::from_values(tenant_id, values);
                insert_contact(&mut tx, &contact).await?;
                ContactResolution::Created { contact_id: contact.id }
            }
            None => ContactResolution::Unmatched,
        };

        if let Some(contact_id) = resolution.contact_id() {
            for entry in votes {
                upsert_vote_history(&mut tx, contact_id, entry).await?;
            }
        }

        tx.commit().await?;
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_scoped_by_tenant_and_kind() {
        let tenant = Uuid::nil();
        let voter = lock_key(tenant, &MatchKey::new(IdentifierKind::VoterId, "V1"));
        let email = lock_key(tenant, &MatchKey::new(IdentifierKind::Email, "V1"));
        assert_ne!(voter, email);
        assert!(voter.starts_with("contact:00000000-0000-0000-0000-000000000000:voter_id"));
    }
}
