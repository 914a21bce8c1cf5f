//! Adapter version lifecycle: backup, apply, verify, rollback
//!
//! Each provider's adapter binding is versioned. A fix proposal is staged
//! to disk, the live binding is swapped to a fresh adapter, and the new
//! binding must pass verification (health probe plus a canary chat)
//! inside a bounded window or the previous binding is swapped straight
//! back. The swap itself is a single registry insert: a request that
//! started under version V keeps V until it completes.
//!
//! Persisted layout under the state directory:
//!   adapters/{provider}/v{N}.txt      version source blobs
//!   adapters/{provider}/manifest.json version history + current pointer
//!   pending/{provider}.json           pending fix awaiting approval
//!   heal_audit.jsonl                  append-only cycle audit log

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use citadel_config::Config;
use citadel_llm::provider::{Provider, ProviderRegistry};
use citadel_llm::types::{ChatRequest, Message, Role};

use crate::error::HealError;
use crate::heal::{Citation, FixProposal};
use crate::metrics::MetricsSink;

/// How a version came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionOrigin {
    /// First registration at startup
    Initial,
    /// Heal cycle, applied without approval
    HealedAuto,
    /// Heal cycle, applied after human approval
    HealedApproved,
    /// Operator rollback to an earlier version
    ManualRollback,
}

/// Verification outcome recorded on a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Verified and committed (or installed without needing verification)
    Committed,
    /// Applied, failed verification, rolled back
    FailedVerification,
}

/// One adapter version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterVersion {
    pub provider: String,
    pub version: u64,
    /// SHA-256 of the source blob
    pub source_hash: String,
    /// Blob file name within the provider's directory
    pub blob_file: String,
    pub created_at_ms: u64,
    pub origin: VersionOrigin,
    pub status: VersionStatus,
    /// One-line change description
    pub summary: String,
    /// Heal confidence, when the version came from a heal cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Operator who approved, when origin is healed-approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

/// Resolution state of a pending fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A proposed fix awaiting human approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFix {
    pub provider: String,
    /// Proposed adapter source
    pub source: String,
    pub summary: String,
    pub diagnosis: String,
    pub citations: Vec<Citation>,
    pub confidence: f64,
    pub created_at_ms: u64,
    pub status: FixStatus,
}

/// Result of driving the apply path
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FixOutcome {
    /// New version is live
    Committed { version: u64 },
    /// Queued for human approval
    Queued,
    /// Applied, failed verification, previous version restored
    RolledBack { attempted_version: u64 },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    current: u64,
    versions: Vec<AdapterVersion>,
}

/// Reload manager tuning, derived from the healing config
#[derive(Debug, Clone)]
pub struct ReloadSettings {
    pub auto_apply: bool,
    pub auto_apply_threshold: f64,
    pub verify_timeout: Duration,
    pub max_versions: usize,
    pub pending_expiry: Duration,
    pub state_dir: PathBuf,
}

impl ReloadSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_apply: config.healing.auto_apply,
            auto_apply_threshold: config.healing.auto_apply_threshold,
            verify_timeout: Duration::from_secs(config.healing.verify_timeout_secs),
            max_versions: config.healing.max_versions,
            pending_expiry: Duration::from_secs(config.healing.pending_expiry_secs),
            state_dir: config.server.state_dir.clone(),
        }
    }
}

/// Rebuilds an adapter instance for a provider; the single construction
/// point reloads go through
pub type AdapterFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn Provider>, citadel_llm::AdapterError> + Send + Sync>;

/// Owns the adapter version lifecycle for every provider
pub struct ReloadManager {
    settings: ReloadSettings,
    registry: Arc<ProviderRegistry>,
    factory: AdapterFactory,
    /// All lifecycle transitions are serialized per provider
    locks: DashMap<String, Arc<Mutex<()>>>,
    manifests: DashMap<String, Manifest>,
    pending: DashMap<String, PendingFix>,
    /// Model each provider's canary chat runs against
    canary_models: DashMap<String, String>,
    audit: Mutex<()>,
    metrics: Arc<MetricsSink>,
}

impl ReloadManager {
    pub fn new(
        settings: ReloadSettings,
        registry: Arc<ProviderRegistry>,
        factory: AdapterFactory,
        metrics: Arc<MetricsSink>,
    ) -> Self {
        Self {
            settings,
            registry,
            factory,
            locks: DashMap::new(),
            manifests: DashMap::new(),
            pending: DashMap::new(),
            canary_models: DashMap::new(),
            audit: Mutex::new(()),
            metrics,
        }
    }

    fn lock_for(&self, provider: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(provider.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn provider_dir(&self, provider: &str) -> PathBuf {
        self.settings.state_dir.join("adapters").join(provider)
    }

    fn pending_path(&self, provider: &str) -> PathBuf {
        self.settings.state_dir.join("pending").join(format!("{provider}.json"))
    }

    /// Register a provider at startup: load its manifest from disk or
    /// create version 1 from the given source text. Returns the current
    /// live version to bind.
    pub async fn register_initial(&self, provider: &str, source: &str, canary_model: &str) -> Result<u64, HealError> {
        let guard = self.lock_for(provider);
        let _guard = guard.lock().await;
        self.canary_models.insert(provider.to_owned(), canary_model.to_owned());

        let manifest_path = self.provider_dir(provider).join("manifest.json");
        if let Ok(raw) = tokio::fs::read_to_string(&manifest_path).await {
            match serde_json::from_str::<Manifest>(&raw) {
                Ok(manifest) => {
                    let current = manifest.current;
                    self.manifests.insert(provider.to_owned(), manifest);
                    self.load_pending(provider).await;
                    return Ok(current);
                }
                Err(e) => {
                    tracing::warn!(provider, error = %e, "unreadable version manifest, starting fresh");
                }
            }
        }

        let version = AdapterVersion {
            provider: provider.to_owned(),
            version: 1,
            source_hash: hash_of(source),
            blob_file: "v1.txt".to_owned(),
            created_at_ms: now_ms(),
            origin: VersionOrigin::Initial,
            status: VersionStatus::Committed,
            summary: "initial registration".to_owned(),
            confidence: None,
            approver: None,
        };

        self.write_blob(provider, &version.blob_file, source).await?;
        let manifest = Manifest {
            current: 1,
            versions: vec![version],
        };
        self.persist_manifest(provider, &manifest).await?;
        self.manifests.insert(provider.to_owned(), manifest);
        Ok(1)
    }

    async fn load_pending(&self, provider: &str) {
        if let Ok(raw) = tokio::fs::read_to_string(self.pending_path(provider)).await
            && let Ok(fix) = serde_json::from_str::<PendingFix>(&raw)
            && fix.status == FixStatus::Pending
        {
            self.pending.insert(provider.to_owned(), fix);
        }
    }

    /// Source text of the current live version
    pub async fn current_source(&self, provider: &str) -> Option<String> {
        let blob_file = {
            let manifest = self.manifests.get(provider)?;
            let current = manifest.current;
            manifest
                .versions
                .iter()
                .find(|v| v.version == current)
                .map(|v| v.blob_file.clone())?
        };
        tokio::fs::read_to_string(self.provider_dir(provider).join(blob_file))
            .await
            .ok()
    }

    /// Drive the apply path for a heal proposal
    ///
    /// Queues for approval unless auto-apply is on and confidence clears
    /// the threshold.
    pub async fn apply_fix(&self, provider: &str, proposal: FixProposal) -> Result<FixOutcome, HealError> {
        let auto = self.settings.auto_apply && proposal.confidence >= self.settings.auto_apply_threshold;
        if !auto {
            let fix = PendingFix {
                provider: provider.to_owned(),
                source: proposal.source,
                summary: proposal.summary,
                diagnosis: proposal.diagnosis,
                citations: proposal.citations,
                confidence: proposal.confidence,
                created_at_ms: now_ms(),
                status: FixStatus::Pending,
            };
            self.persist_pending(provider, &fix).await?;
            self.pending.insert(provider.to_owned(), fix);
            tracing::info!(
                provider,
                confidence = proposal.confidence,
                threshold = self.settings.auto_apply_threshold,
                "fix queued for human approval"
            );
            self.audit(provider, "fix_queued", serde_json::json!({ "confidence": proposal.confidence }))
                .await;
            return Ok(FixOutcome::Queued);
        }

        let guard = self.lock_for(provider);
        let _guard = guard.lock().await;
        self.apply_locked(provider, proposal, VersionOrigin::HealedAuto, None).await
    }

    /// Approve the pending fix for a provider and run the apply path
    pub async fn approve(&self, provider: &str, approver: Option<String>) -> Result<FixOutcome, HealError> {
        let guard = self.lock_for(provider);
        let _guard = guard.lock().await;

        let Some((_, mut fix)) = self.pending.remove(provider) else {
            return Err(HealError::Store {
                provider: provider.to_owned(),
                message: "no pending fix".to_owned(),
            });
        };

        if self.expired(&fix) {
            fix.status = FixStatus::Expired;
            self.persist_pending(provider, &fix).await.ok();
            return Err(HealError::Store {
                provider: provider.to_owned(),
                message: "pending fix has expired".to_owned(),
            });
        }

        fix.status = FixStatus::Approved;
        self.persist_pending(provider, &fix).await?;

        let proposal = FixProposal {
            source: fix.source,
            summary: fix.summary,
            diagnosis: fix.diagnosis,
            citations: fix.citations,
            confidence: fix.confidence,
            rationale: String::new(),
        };
        self.apply_locked(provider, proposal, VersionOrigin::HealedApproved, approver).await
    }

    /// Reject the pending fix and delete staging artifacts
    pub async fn reject(&self, provider: &str, reason: &str) -> Result<(), HealError> {
        let Some((_, mut fix)) = self.pending.remove(provider) else {
            return Err(HealError::Store {
                provider: provider.to_owned(),
                message: "no pending fix".to_owned(),
            });
        };
        fix.status = FixStatus::Rejected;
        self.persist_pending(provider, &fix).await?;
        tokio::fs::remove_file(self.staging_path(provider)).await.ok();
        tracing::info!(provider, reason, "pending fix rejected");
        self.audit(provider, "fix_rejected", serde_json::json!({ "reason": reason })).await;
        Ok(())
    }

    /// Pending fixes that have not expired, sweeping expired ones
    pub async fn pending_fixes(&self) -> Vec<PendingFix> {
        let mut expired = Vec::new();
        let mut active = Vec::new();
        for entry in &self.pending {
            if self.expired(entry.value()) {
                expired.push(entry.key().clone());
            } else {
                active.push(entry.value().clone());
            }
        }
        for provider in expired {
            if let Some((_, mut fix)) = self.pending.remove(&provider) {
                fix.status = FixStatus::Expired;
                self.persist_pending(&provider, &fix).await.ok();
                tracing::info!(provider = %provider, "pending fix expired");
            }
        }
        active
    }

    fn expired(&self, fix: &PendingFix) -> bool {
        let age_ms = now_ms().saturating_sub(fix.created_at_ms);
        Duration::from_millis(age_ms) > self.settings.pending_expiry
    }

    /// Version history for a provider, oldest first
    pub fn history(&self, provider: &str) -> Vec<AdapterVersion> {
        self.manifests
            .get(provider)
            .map(|manifest| manifest.versions.clone())
            .unwrap_or_default()
    }

    /// Current live version number
    pub fn current_version(&self, provider: &str) -> u64 {
        self.manifests.get(provider).map_or(0, |manifest| manifest.current)
    }

    /// Roll back to an arbitrary version still in history
    ///
    /// Records a fresh version entry (origin manual-rollback) whose
    /// source is the target's blob, and swaps the live binding.
    pub async fn rollback_to(&self, provider: &str, target: u64) -> Result<u64, HealError> {
        let guard = self.lock_for(provider);
        let _guard = guard.lock().await;

        let blob_file = self
            .manifests
            .get(provider)
            .and_then(|manifest| {
                manifest
                    .versions
                    .iter()
                    .find(|v| v.version == target)
                    .map(|v| v.blob_file.clone())
            })
            .ok_or_else(|| HealError::Store {
                provider: provider.to_owned(),
                message: format!("version {target} not in history"),
            })?;

        let source = tokio::fs::read_to_string(self.provider_dir(provider).join(&blob_file))
            .await
            .map_err(|e| HealError::Store {
                provider: provider.to_owned(),
                message: format!("version {target} blob unreadable: {e}"),
            })?;

        let adapter = (self.factory)(provider).map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("adapter rebuild failed: {e}"),
        })?;

        let new_version = self.next_version(provider);
        let entry = AdapterVersion {
            provider: provider.to_owned(),
            version: new_version,
            source_hash: hash_of(&source),
            blob_file: format!("v{new_version}.txt"),
            created_at_ms: now_ms(),
            origin: VersionOrigin::ManualRollback,
            status: VersionStatus::Committed,
            summary: format!("rollback to v{target}"),
            confidence: None,
            approver: None,
        };
        self.write_blob(provider, &entry.blob_file, &source).await?;

        self.registry.bind(provider, new_version, adapter);
        self.commit_version(provider, entry).await?;

        tracing::info!(provider, target, new_version, "rolled back");
        self.audit(provider, "manual_rollback", serde_json::json!({ "target": target, "as_version": new_version }))
            .await;
        Ok(new_version)
    }

    /// Apply a proposal: stage, swap, verify, commit or roll back.
    /// Caller holds the provider lock.
    async fn apply_locked(
        &self,
        provider: &str,
        proposal: FixProposal,
        origin: VersionOrigin,
        approver: Option<String>,
    ) -> Result<FixOutcome, HealError> {
        // Stage the new source
        let staging = self.staging_path(provider);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        write_atomic(&staging, &proposal.source).await.map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("staging write failed: {e}"),
        })?;

        let previous = self.registry.get(provider).ok_or_else(|| HealError::Store {
            provider: provider.to_owned(),
            message: "provider has no live binding".to_owned(),
        })?;

        let adapter = (self.factory)(provider).map_err(|e| HealError::VerificationFailed {
            provider: provider.to_owned(),
            message: format!("adapter rebuild failed: {e}"),
        })?;

        let new_version = self.next_version(provider);

        // Swap, then verify the new binding
        self.registry.bind(provider, new_version, adapter);
        let verify_result = self.verify(provider).await;

        let mut entry = AdapterVersion {
            provider: provider.to_owned(),
            version: new_version,
            source_hash: hash_of(&proposal.source),
            blob_file: format!("v{new_version}.txt"),
            created_at_ms: now_ms(),
            origin,
            status: VersionStatus::Committed,
            summary: proposal.summary.clone(),
            confidence: Some(proposal.confidence),
            approver,
        };
        self.write_blob(provider, &entry.blob_file, &proposal.source).await?;

        match verify_result {
            Ok(()) => {
                self.commit_version(provider, entry).await?;
                tokio::fs::remove_file(&staging).await.ok();
                self.metrics.record_heal_commit(provider);
                tracing::info!(provider, version = new_version, "fix verified and committed");
                self.audit(
                    provider,
                    "heal_commit",
                    serde_json::json!({ "version": new_version, "confidence": proposal.confidence }),
                )
                .await;
                Ok(FixOutcome::Committed { version: new_version })
            }
            Err(message) => {
                // Swap straight back to the previous binding
                self.registry
                    .bind(provider, previous.version, Arc::clone(&previous.adapter));
                entry.status = VersionStatus::FailedVerification;
                self.record_failed_version(provider, entry).await?;
                tokio::fs::remove_file(&staging).await.ok();
                self.metrics.record_heal_rollback(provider);
                tracing::warn!(provider, version = new_version, message = %message, "verification failed, rolled back");
                self.audit(
                    provider,
                    "heal_rollback",
                    serde_json::json!({ "attempted_version": new_version, "reason": message }),
                )
                .await;
                Ok(FixOutcome::RolledBack {
                    attempted_version: new_version,
                })
            }
        }
    }

    /// Health probe plus canary chat against the live binding, both
    /// bounded by the verification timeout
    async fn verify(&self, provider: &str) -> Result<(), String> {
        let binding = self
            .registry
            .get(provider)
            .ok_or_else(|| "no live binding".to_owned())?;

        let canary = ChatRequest {
            messages: vec![Message::text(Role::User, "ping")],
            model: self
                .canary_models
                .get(provider)
                .map(|entry| entry.value().clone())
                .unwrap_or_default(),
            temperature: None,
            max_tokens: Some(8),
            top_p: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            metadata: Default::default(),
        };

        let checks = async {
            binding.adapter.health_check().await.map_err(|e| e.to_string())?;
            binding.adapter.chat(&canary).await.map_err(|e| e.to_string())?;
            Ok::<(), String>(())
        };

        tokio::time::timeout(self.settings.verify_timeout, checks)
            .await
            .map_err(|_| "verification timed out".to_owned())?
    }

    fn next_version(&self, provider: &str) -> u64 {
        self.manifests
            .get(provider)
            .and_then(|manifest| manifest.versions.iter().map(|v| v.version).max())
            .unwrap_or(0)
            + 1
    }

    /// Append a committed version, advance the live pointer, bound history
    async fn commit_version(&self, provider: &str, entry: AdapterVersion) -> Result<(), HealError> {
        let (manifest_copy, evicted) = {
            let mut manifest = self.manifests.entry(provider.to_owned()).or_default();
            manifest.current = entry.version;
            manifest.versions.push(entry);
            let evicted = evict_excess(&mut manifest, self.settings.max_versions);
            (clone_manifest(&manifest), evicted)
        };
        self.remove_blobs(provider, &evicted).await;
        self.persist_manifest(provider, &manifest_copy).await
    }

    /// Append a failed version without moving the live pointer
    async fn record_failed_version(&self, provider: &str, entry: AdapterVersion) -> Result<(), HealError> {
        let (manifest_copy, evicted) = {
            let mut manifest = self.manifests.entry(provider.to_owned()).or_default();
            manifest.versions.push(entry);
            let evicted = evict_excess(&mut manifest, self.settings.max_versions);
            (clone_manifest(&manifest), evicted)
        };
        self.remove_blobs(provider, &evicted).await;
        self.persist_manifest(provider, &manifest_copy).await
    }

    async fn remove_blobs(&self, provider: &str, evicted: &[AdapterVersion]) {
        for version in evicted {
            tokio::fs::remove_file(self.provider_dir(provider).join(&version.blob_file))
                .await
                .ok();
        }
    }

    fn staging_path(&self, provider: &str) -> PathBuf {
        self.settings.state_dir.join("staging").join(format!("{provider}.txt"))
    }

    async fn write_blob(&self, provider: &str, file: &str, content: &str) -> Result<(), HealError> {
        let dir = self.provider_dir(provider);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("cannot create version dir: {e}"),
        })?;
        write_atomic(&dir.join(file), content).await.map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("blob write failed: {e}"),
        })
    }

    async fn persist_manifest(&self, provider: &str, manifest: &Manifest) -> Result<(), HealError> {
        let dir = self.provider_dir(provider);
        tokio::fs::create_dir_all(&dir).await.ok();
        let raw = serde_json::to_string_pretty(manifest).unwrap_or_default();
        write_atomic(&dir.join("manifest.json"), &raw).await.map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("manifest write failed: {e}"),
        })
    }

    async fn persist_pending(&self, provider: &str, fix: &PendingFix) -> Result<(), HealError> {
        let path = self.pending_path(provider);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let raw = serde_json::to_string_pretty(fix).unwrap_or_default();
        write_atomic(&path, &raw).await.map_err(|e| HealError::Store {
            provider: provider.to_owned(),
            message: format!("pending fix write failed: {e}"),
        })
    }

    /// Append one record to the heal audit log
    pub async fn audit(&self, provider: &str, event: &str, details: serde_json::Value) {
        let record = serde_json::json!({
            "at_ms": now_ms(),
            "provider": provider,
            "event": event,
            "details": details,
        });
        let path = self.settings.state_dir.join("heal_audit.jsonl");
        let _guard = self.audit.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(format!("{record}\n").as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            tracing::error!(provider, error = %e, "heal audit append failed");
        }
    }

    /// Summary for the healing-status and dashboard endpoints
    pub fn status(&self) -> serde_json::Value {
        let mut current = serde_json::Map::new();
        let mut counts = serde_json::Map::new();
        for entry in &self.manifests {
            current.insert(entry.key().clone(), serde_json::json!(entry.current));
            counts.insert(entry.key().clone(), serde_json::json!(entry.versions.len()));
        }
        serde_json::json!({
            "auto_apply": self.settings.auto_apply,
            "auto_apply_threshold": self.settings.auto_apply_threshold,
            "current_versions": current,
            "version_counts": counts,
            "pending_fixes": self.pending.iter().map(|e| e.key().clone()).collect::<Vec<_>>(),
        })
    }

    pub fn has_pending(&self, provider: &str) -> bool {
        self.pending.contains_key(provider)
    }
}

/// Evict oldest versions past the bound; the live version is never
/// evicted
fn evict_excess(manifest: &mut Manifest, max_versions: usize) -> Vec<AdapterVersion> {
    let mut evicted = Vec::new();
    while manifest.versions.len() > max_versions {
        let Some(position) = manifest.versions.iter().position(|v| v.version != manifest.current) else {
            break;
        };
        evicted.push(manifest.versions.remove(position));
    }
    evicted
}

fn clone_manifest(manifest: &Manifest) -> Manifest {
    Manifest {
        current: manifest.current,
        versions: manifest.versions.clone(),
    }
}

async fn write_atomic(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

fn hash_of(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    use citadel_llm::error::{AdapterError, ErrorKind};
    use citadel_llm::types::{
        ChatResponse, Content, EmbeddingRequest, EmbeddingResponse, FinishReason, ModelCapabilities,
    };

    /// Adapter whose health/chat outcome is switchable
    struct ToggleAdapter {
        name: String,
        healthy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Provider for ToggleAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn list_models(&self) -> Vec<ModelCapabilities> {
            Vec::new()
        }

        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, AdapterError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(ChatResponse {
                    id: "test".to_owned(),
                    model: "m".to_owned(),
                    provider: self.name.clone(),
                    content: Content::Text("pong".to_owned()),
                    tool_calls: None,
                    thinking: None,
                    finish_reason: FinishReason::Stop,
                    usage: None,
                    lineage: Default::default(),
                })
            } else {
                Err(AdapterError::new(ErrorKind::SchemaMismatch, &self.name, "broken"))
            }
        }

        async fn chat_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<citadel_llm::provider::EventStream, AdapterError> {
            Err(AdapterError::new(ErrorKind::Validation, &self.name, "unsupported"))
        }

        async fn embed(&self, _request: &EmbeddingRequest) -> Result<EmbeddingResponse, AdapterError> {
            Err(AdapterError::new(ErrorKind::Validation, &self.name, "unsupported"))
        }

        async fn health_check(&self) -> Result<(), AdapterError> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(AdapterError::new(ErrorKind::SchemaMismatch, &self.name, "unhealthy"))
            }
        }

        fn convert_messages(&self, _messages: &[Message]) -> Result<serde_json::Value, AdapterError> {
            Ok(serde_json::Value::Null)
        }

        fn convert_tools(
            &self,
            _tools: &[citadel_llm::types::Tool],
        ) -> Result<serde_json::Value, AdapterError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn proposal(confidence: f64) -> FixProposal {
        FixProposal {
            source: "patched mapping".to_owned(),
            summary: "adjust finish reason map".to_owned(),
            diagnosis: "finish_reason renamed".to_owned(),
            citations: Vec::new(),
            confidence,
            rationale: "docs say so".to_owned(),
        }
    }

    fn manager(
        dir: &std::path::Path,
        auto_apply: bool,
        healthy: Arc<AtomicBool>,
    ) -> (ReloadManager, Arc<ProviderRegistry>) {
        let registry = Arc::new(ProviderRegistry::new());
        let healthy_for_factory = Arc::clone(&healthy);
        let factory: AdapterFactory = Arc::new(move |name: &str| {
            Ok(Arc::new(ToggleAdapter {
                name: name.to_owned(),
                healthy: Arc::clone(&healthy_for_factory),
            }) as Arc<dyn Provider>)
        });
        registry.bind(
            "p",
            1,
            Arc::new(ToggleAdapter {
                name: "p".to_owned(),
                healthy,
            }),
        );
        let settings = ReloadSettings {
            auto_apply,
            auto_apply_threshold: 0.8,
            verify_timeout: Duration::from_secs(5),
            max_versions: 3,
            pending_expiry: Duration::from_secs(3600),
            state_dir: dir.to_path_buf(),
        };
        let manager = ReloadManager::new(settings, Arc::clone(&registry), factory, Arc::new(MetricsSink::new()));
        (manager, registry)
    }

    #[tokio::test]
    async fn low_confidence_queues_for_approval() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, registry) = manager(dir.path(), true, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();

        let outcome = manager.apply_fix("p", proposal(0.5)).await.unwrap();
        assert!(matches!(outcome, FixOutcome::Queued));
        assert!(manager.has_pending("p"));
        // Live binding untouched
        assert_eq!(registry.live_version("p"), 1);
    }

    #[tokio::test]
    async fn auto_apply_commits_and_bumps_version() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, registry) = manager(dir.path(), true, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();

        let outcome = manager.apply_fix("p", proposal(0.9)).await.unwrap();
        assert!(matches!(outcome, FixOutcome::Committed { version: 2 }));
        assert_eq!(manager.current_version("p"), 2);
        assert_eq!(registry.live_version("p"), 2);
        assert_eq!(manager.current_source("p").await.unwrap(), "patched mapping");
    }

    #[tokio::test]
    async fn failed_verification_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, registry) = manager(dir.path(), true, Arc::clone(&healthy));
        manager.register_initial("p", "v1 source", "m").await.unwrap();

        // The rebuilt adapter will fail its canary
        healthy.store(false, Ordering::Relaxed);

        let outcome = manager.apply_fix("p", proposal(0.95)).await.unwrap();
        assert!(matches!(outcome, FixOutcome::RolledBack { attempted_version: 2 }));
        assert_eq!(manager.current_version("p"), 1);
        assert_eq!(registry.live_version("p"), 1);

        let history = manager.history("p");
        let attempted = history.iter().find(|v| v.version == 2).unwrap();
        assert_eq!(attempted.status, VersionStatus::FailedVerification);
    }

    #[tokio::test]
    async fn approve_applies_pending_fix() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, registry) = manager(dir.path(), false, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();

        assert!(matches!(
            manager.apply_fix("p", proposal(0.9)).await.unwrap(),
            FixOutcome::Queued
        ));

        let outcome = manager.approve("p", Some("operator".to_owned())).await.unwrap();
        assert!(matches!(outcome, FixOutcome::Committed { version: 2 }));
        assert!(!manager.has_pending("p"));
        assert_eq!(registry.live_version("p"), 2);

        let history = manager.history("p");
        let applied = history.iter().find(|v| v.version == 2).unwrap();
        assert_eq!(applied.origin, VersionOrigin::HealedApproved);
        assert_eq!(applied.approver.as_deref(), Some("operator"));
    }

    #[tokio::test]
    async fn reject_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, _registry) = manager(dir.path(), false, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();
        manager.apply_fix("p", proposal(0.9)).await.unwrap();

        manager.reject("p", "not convincing").await.unwrap();
        assert!(!manager.has_pending("p"));
        assert!(manager.approve("p", None).await.is_err());
    }

    #[tokio::test]
    async fn rollback_records_new_entry() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, registry) = manager(dir.path(), true, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();
        manager.apply_fix("p", proposal(0.9)).await.unwrap();
        assert_eq!(manager.current_version("p"), 2);

        let new_version = manager.rollback_to("p", 1).await.unwrap();
        assert_eq!(new_version, 3);
        assert_eq!(manager.current_version("p"), 3);
        assert_eq!(registry.live_version("p"), 3);
        // Rolled-back source is v1's content
        assert_eq!(manager.current_source("p").await.unwrap(), "v1 source");

        let history = manager.history("p");
        let entry = history.iter().find(|v| v.version == 3).unwrap();
        assert_eq!(entry.origin, VersionOrigin::ManualRollback);
    }

    #[tokio::test]
    async fn history_is_bounded_and_live_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        let (manager, _registry) = manager(dir.path(), true, healthy);
        manager.register_initial("p", "v1 source", "m").await.unwrap();

        for _ in 0..6 {
            manager.apply_fix("p", proposal(0.9)).await.unwrap();
        }

        let history = manager.history("p");
        assert!(history.len() <= 3);
        let current = manager.current_version("p");
        assert!(history.iter().any(|v| v.version == current));
    }

    #[tokio::test]
    async fn manifest_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = Arc::new(AtomicBool::new(true));
        {
            let (manager, _registry) = manager(dir.path(), true, Arc::clone(&healthy));
            manager.register_initial("p", "v1 source", "m").await.unwrap();
            manager.apply_fix("p", proposal(0.9)).await.unwrap();
        }

        let (manager, _registry) = manager(dir.path(), true, healthy);
        let current = manager.register_initial("p", "ignored", "m").await.unwrap();
        assert_eq!(current, 2);
        assert_eq!(manager.history("p").len(), 2);
    }
}
