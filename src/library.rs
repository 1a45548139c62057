//! The user's document list, kept in step with the server.
//!
//! The list is never patched locally. Every mutation (upload, QR upload,
//! delete) is followed by a full refetch, so what is shown is always what the
//! server last said.

use crate::cache::PolicyCache;
use crate::client::DocumentApi;
use crate::error::ProofError;
use crate::models::{DocumentSubtypeConfig, SubtypeKey, UploadedDocumentRecord};
use crate::status::{resolve_with_policy, DocumentStatus, PolicyState};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct DocumentLibrary {
    api: Arc<dyn DocumentApi>,
    policies: PolicyCache,
    documents: RwLock<Vec<UploadedDocumentRecord>>,
}

impl DocumentLibrary {
    pub fn new(api: Arc<dyn DocumentApi>, policies: PolicyCache) -> Self {
        Self {
            api,
            policies,
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Change the request language; policies are refetched in it.
    pub fn set_locale(&self, locale: &str) -> bool {
        self.policies.switch_locale(&self.api, locale)
    }

    /// Last list fetched from the server.
    pub async fn documents(&self) -> Vec<UploadedDocumentRecord> {
        self.documents.read().await.clone()
    }

    /// Replace the local list with the server's.
    pub async fn refresh(&self) -> Result<Vec<UploadedDocumentRecord>, ProofError> {
        let fresh = self.api.list_documents().await?;
        debug!("Document list refreshed ({} records)", fresh.len());
        *self.documents.write().await = fresh.clone();
        Ok(fresh)
    }

    /// Refetch after an upload of any kind.
    pub async fn record_upload(&self) -> Result<Vec<UploadedDocumentRecord>, ProofError> {
        self.refresh().await
    }

    /// Delete `doc_id` on the server, then refetch.
    pub async fn delete(&self, doc_id: &str) -> Result<Vec<UploadedDocumentRecord>, ProofError> {
        self.api.delete_document(doc_id).await?;
        info!("Deleted document {}", doc_id);
        self.refresh().await
    }

    /// Policy for `key` as the status resolver needs it.
    ///
    /// A subtype with no configured policy issues no credentials.
    pub async fn policy_state(&self, key: &SubtypeKey) -> PolicyState {
        match self.policies.policy(&self.api, key).await {
            Ok(Some(policy)) => PolicyState::Ready(policy),
            Ok(None) => PolicyState::Ready(DocumentSubtypeConfig::without_issuance(key)),
            Err(e) => {
                warn!("Policy for {} unavailable: {}", key, e);
                PolicyState::Unavailable
            }
        }
    }

    pub async fn status(&self, key: &SubtypeKey, now: DateTime<Utc>) -> DocumentStatus {
        let policy = self.policy_state(key).await;
        let docs = self.documents.read().await;
        resolve_with_policy(&docs, key, &policy, now)
    }

    /// Statuses for several subtypes. Policies are fetched concurrently.
    pub async fn statuses(
        &self,
        keys: &[SubtypeKey],
        now: DateTime<Utc>,
    ) -> Vec<(SubtypeKey, DocumentStatus)> {
        let policies = join_all(keys.iter().map(|k| self.policy_state(k))).await;
        let docs = self.documents.read().await;
        keys.iter()
            .zip(policies)
            .map(|(key, policy)| {
                (
                    key.clone(),
                    resolve_with_policy(&docs, key, &policy, now),
                )
            })
            .collect()
    }
}
