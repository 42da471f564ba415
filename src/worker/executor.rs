//! Job Executor (§4.12) — the 13-step `execute()` contract: tier resolution,
//! format-license check, per-tenant concurrency counter, engine discovery,
//! param sanitization, document transaction, scoped temp dir, subprocess
//! spawn in its own process group, monitor, wall-clock timeout, exit-code
//! handling, output hashing, circuit breaker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::canonical::script;
use crate::config::CoreConfig;
use crate::document::{DocumentError, DocumentManager, LockType};
use crate::error::ErrorKind;

use super::circuit::CircuitBreaker;
use super::monitor::{self, MonitorStats};
use super::tier::{ResourceTier, TierName};

#[derive(Debug, Clone, Error, Serialize)]
pub enum ExecutorError {
    #[error("license restriction: format `{requested_format}` not allowed on tier `{tier}`")]
    LicenseRestriction { requested_format: String, tier: String },
    #[error("resource exhausted for tenant `{tenant_id}`")]
    ResourceExhausted { tenant_id: String },
    #[error("engine binary not found: {0}")]
    EngineNotFound(String),
    #[error("engine version `{found}` below required `{required}`")]
    InvalidVersion { found: String, required: String },
    #[error("wall-clock timeout exceeded ({0}s)")]
    TimeoutExceeded(u64),
    #[error("subprocess failed: {stderr}")]
    SubprocessFailed { stderr: String },
    #[error("circuit breaker open")]
    CircuitBreakerOpen,
    #[error("document error: {0}")]
    Document(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("temporary failure: {0}")]
    TemporaryFailure(String),
}

impl From<DocumentError> for ExecutorError {
    fn from(e: DocumentError) -> Self {
        // The Document Manager maps its errors into executor codes; lock
        // contention specifically becomes `resource_exhausted` (§7).
        match e.code() {
            "document_locked" | "lock_owner_mismatch" => ExecutorError::ResourceExhausted {
                tenant_id: "unknown".to_string(),
            },
            _ => ExecutorError::Document(e.to_string()),
        }
    }
}

impl ExecutorError {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::LicenseRestriction { .. } => "license_restriction",
            ExecutorError::ResourceExhausted { .. } => "resource_exhausted",
            ExecutorError::EngineNotFound(_) => "engine_not_found",
            ExecutorError::InvalidVersion { .. } => "invalid_version",
            ExecutorError::TimeoutExceeded(_) => "timeout_exceeded",
            ExecutorError::SubprocessFailed { .. } => "subprocess_failed",
            ExecutorError::CircuitBreakerOpen => "circuit_breaker_open",
            ExecutorError::Document(_) => "document_error",
            ExecutorError::ValidationFailed(_) => "validation_failed",
            ExecutorError::TemporaryFailure(_) => "temporary_failure",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::LicenseRestriction { .. } | ExecutorError::ValidationFailed(_) => ErrorKind::UserInput,
            ExecutorError::ResourceExhausted { .. } | ExecutorError::TimeoutExceeded(_) => ErrorKind::Resource,
            ExecutorError::EngineNotFound(_) | ExecutorError::InvalidVersion { .. } => ErrorKind::Fatal,
            ExecutorError::CircuitBreakerOpen => ErrorKind::Fatal,
            ExecutorError::SubprocessFailed { .. } | ExecutorError::Document(_) | ExecutorError::TemporaryFailure(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Non-retriable codes per the retry helper contract in §4.12.
    pub fn retriable(&self) -> bool {
        !matches!(
            self,
            ExecutorError::LicenseRestriction { .. } | ExecutorError::ValidationFailed(_)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub path: String,
    pub format: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub job_id: String,
    pub outputs: Vec<OutputFile>,
    pub peak_rss_bytes: u64,
    pub mean_cpu_pct: f32,
    pub duration_ms: u64,
}

const OUTPUT_EXTENSIONS: [&str; 8] = ["fcstd", "step", "stl", "iges", "obj", "dxf", "ifc", "dae"];

pub trait TenantTierResolver: Send + Sync {
    fn tier_for(&self, tenant_id: &str) -> TierName;
}

/// Static tenant→tier map; a real deployment's billing/license system is out
/// of scope (§1) beyond this tier→limits lookup.
pub struct StaticTierResolver(pub HashMap<String, TierName>);

impl TenantTierResolver for StaticTierResolver {
    fn tier_for(&self, tenant_id: &str) -> TierName {
        self.0.get(tenant_id).copied().unwrap_or(TierName::Basic)
    }
}

pub struct JobExecutor {
    config: CoreConfig,
    tier_resolver: Arc<dyn TenantTierResolver>,
    documents: Arc<DocumentManager>,
    engine_binary: &'static str,
    required_version: semver::Version,
    concurrency: dashmap::DashMap<String, Arc<AtomicU32>>,
    circuit: CircuitBreaker,
    document_lifecycle_enabled: bool,
}

impl JobExecutor {
    pub fn new(
        config: CoreConfig,
        tier_resolver: Arc<dyn TenantTierResolver>,
        documents: Arc<DocumentManager>,
        document_lifecycle_enabled: bool,
    ) -> Self {
        let threshold = config.circuit_breaker_threshold;
        let cooldown = config.circuit_breaker_cooldown;
        Self {
            config,
            tier_resolver,
            documents,
            engine_binary: "freecadcmd",
            required_version: semver::Version::new(0, 21, 0),
            concurrency: dashmap::DashMap::new(),
            circuit: CircuitBreaker::new(threshold, cooldown),
            document_lifecycle_enabled,
        }
    }

    /// §4.12 step 4: locates the engine binary, then verifies its reported
    /// version is at least `required_version`, per spec §4.12 step 4
    /// ("verify version ≥ required; else `engine_not_found` / `invalid_version`").
    async fn locate_engine(&self, configured_path: Option<&str>) -> Result<PathBuf, ExecutorError> {
        let path = self.discover_engine_path(configured_path)?;
        self.check_engine_version(&path).await?;
        Ok(path)
    }

    fn discover_engine_path(&self, configured_path: Option<&str>) -> Result<PathBuf, ExecutorError> {
        if let Some(p) = configured_path {
            let path = PathBuf::from(p);
            if path.exists() {
                return Ok(path);
            }
        }
        if let Ok(found) = which::which(self.engine_binary) {
            return Ok(found);
        }
        for candidate in ["/usr/bin/freecadcmd", "/usr/local/bin/freecadcmd", "/opt/freecad/bin/freecadcmd"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }
        Err(ExecutorError::EngineNotFound(self.engine_binary.to_string()))
    }

    async fn check_engine_version(&self, path: &std::path::Path) -> Result<(), ExecutorError> {
        let output = tokio::process::Command::new(path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ExecutorError::EngineNotFound(format!("{}: {e}", path.display())))?;
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let found = parse_engine_version(&text).ok_or_else(|| {
            ExecutorError::EngineNotFound(format!("could not determine engine version from `{}`", path.display()))
        })?;
        if found < self.required_version {
            return Err(ExecutorError::InvalidVersion {
                found: found.to_string(),
                required: self.required_version.to_string(),
            });
        }
        Ok(())
    }

    fn counter_for(&self, tenant_id: &str) -> Arc<AtomicU32> {
        self.concurrency.entry(tenant_id.to_string()).or_insert_with(|| Arc::new(AtomicU32::new(0))).clone()
    }

    #[instrument(skip(self, script_src, params), fields(job_id = %job_id, tenant_id = %tenant_id))]
    pub async fn execute(
        &self,
        tenant_id: &str,
        op_type: &str,
        script_src: &str,
        params: serde_json::Value,
        output_formats: &[String],
        job_id: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        // §4.12 step 13: circuit breaker wraps the entire body.
        if !self.circuit.allow_call() {
            return Err(ExecutorError::CircuitBreakerOpen);
        }
        let result = self.execute_inner(tenant_id, op_type, script_src, params, output_formats, job_id).await;
        match &result {
            Ok(_) => self.circuit.record_success(),
            Err(e) if e.kind() == ErrorKind::Fatal || e.kind() == ErrorKind::Transient => self.circuit.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn execute_inner(
        &self,
        tenant_id: &str,
        op_type: &str,
        script_src: &str,
        params: serde_json::Value,
        output_formats: &[String],
        job_id: &str,
    ) -> Result<ExecutionResult, ExecutorError> {
        let start = Instant::now();

        // 1. Resolve tier.
        let tier_name = self.tier_resolver.tier_for(tenant_id);
        let tier = ResourceTier::for_name(tier_name);

        // 2. Format license check.
        for fmt in output_formats {
            if !tier.allowed_export_formats.contains(fmt.as_str()) {
                return Err(ExecutorError::LicenseRestriction {
                    requested_format: fmt.clone(),
                    tier: format!("{:?}", tier_name).to_lowercase(),
                });
            }
        }

        // 3. Per-tenant concurrency counter.
        let counter = self.counter_for(tenant_id);
        let inflight = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if inflight > tier.max_concurrent_per_tenant {
            counter.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutorError::ResourceExhausted { tenant_id: tenant_id.to_string() });
        }
        let _guard = scopeguard(counter.clone());

        // 4. Locate engine binary and verify its version.
        let engine_path = self.locate_engine(None).await?;

        // 5. Sanitize params (apply the script canonicalizer's rules defensively).
        let (normalized_script, _metadata) = script::normalize_script(script_src)
            .map_err(|e| ExecutorError::ValidationFailed(e.to_string()))?;
        let sanitized_params = sanitize_params(params);

        // 6. Document lifecycle.
        let lock_info = if self.document_lifecycle_enabled {
            let doc = self.documents.open_document(job_id, None, true)?;
            let lock = self.documents.acquire_lock(&doc.id, tenant_id, LockType::Exclusive, None).await?;
            let txn_id = self.documents.start_transaction(&doc.id).await?;
            Some((doc.id, lock.lock_id, txn_id))
        } else {
            None
        };

        // 7. Scoped temp directory.
        let work_dir = std::env::temp_dir().join(format!("mgf-job-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ExecutorError::TemporaryFailure(e.to_string()))?;
        let cleanup = CleanupDir(work_dir.clone());

        let script_file = work_dir.join("script.py");
        let params_file = work_dir.join("params.json");
        tokio::fs::write(&script_file, &normalized_script)
            .await
            .map_err(|e| ExecutorError::TemporaryFailure(e.to_string()))?;
        tokio::fs::write(&params_file, sanitized_params.to_string())
            .await
            .map_err(|e| ExecutorError::TemporaryFailure(e.to_string()))?;

        // 8. Spawn the engine subprocess in its own process group.
        let mut cmd = tokio::process::Command::new(&engine_path);
        cmd.arg("-c")
            .arg(&script_file)
            .arg("--")
            .arg(&params_file)
            .arg(&work_dir)
            .current_dir(&work_dir)
            .env_clear()
            .envs(super::runtime::hermetic_env(&self.config))
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|e| ExecutorError::TemporaryFailure(e.to_string()))?;
        let pid = child.id().unwrap_or(0);

        // 9. Monitor sampler.
        let stats = Arc::new(MonitorStats::default());
        let stop = Arc::new(tokio::sync::Notify::new());
        let monitor_handle = tokio::spawn(monitor::run(
            pid,
            Duration::from_millis(500),
            tier.max_mem_mb * 1024 * 1024,
            stats.clone(),
            stop.clone(),
        ));

        // 10. Wait up to max_wall_s.
        let wait_result = tokio::time::timeout(Duration::from_secs(tier.max_wall_s), child.wait_with_output()).await;
        stop.notify_one();
        let _ = monitor_handle.await;

        let output = match wait_result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                drop(cleanup);
                self.release_document(&lock_info, op_type).await;
                return Err(ExecutorError::TemporaryFailure(e.to_string()));
            }
            Err(_) => {
                drop(cleanup);
                self.release_document(&lock_info, op_type).await;
                return Err(ExecutorError::TimeoutExceeded(tier.max_wall_s));
            }
        };

        // 11. Non-zero exit.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let truncated: String = stderr.chars().take(4096).collect();
            drop(cleanup);
            self.release_document(&lock_info, op_type).await;
            return Err(ExecutorError::SubprocessFailed { stderr: truncated });
        }

        // 12. Enumerate & hash outputs; commit document transaction.
        let outputs = enumerate_outputs(&work_dir).await.map_err(|e| ExecutorError::TemporaryFailure(e.to_string()))?;

        if let Some((doc_id, lock_id, txn_id)) = &lock_info {
            self.documents.add_undo_snapshot(doc_id, op_type, None)?;
            self.documents.commit_transaction(doc_id, txn_id).await?;
            self.documents.save_document(doc_id, tenant_id, &format!("{doc_id}.fcstd"), false, false).await?;
            self.documents.release_lock(doc_id, lock_id)?;
        }

        Ok(ExecutionResult {
            job_id: job_id.to_string(),
            outputs,
            peak_rss_bytes: stats.peak_rss_bytes(),
            mean_cpu_pct: stats.mean_cpu_pct(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn release_document(&self, lock_info: &Option<(String, String, String)>, op_type: &str) {
        if let Some((doc_id, lock_id, txn_id)) = lock_info {
            let _ = self.documents.abort_transaction(doc_id, txn_id).await;
            let _ = self.documents.release_lock(doc_id, lock_id);
            tracing::debug!(doc_id, op_type, "released document after executor failure");
        }
    }
}

/// Decrements the per-tenant counter when dropped, regardless of exit path.
struct ScopeGuard(Arc<AtomicU32>);
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
fn scopeguard(counter: Arc<AtomicU32>) -> ScopeGuard {
    ScopeGuard(counter)
}

struct CleanupDir(PathBuf);
impl Drop for CleanupDir {
    fn drop(&mut self) {
        let path = self.0.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_dir_all(path).await;
        });
    }
}

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.\d+\.\d+)").unwrap());

/// Extracts a semver triple from an engine's `--version` output, e.g.
/// `"FreeCAD 0.21.2, Libs: ..."` -> `0.21.2`.
fn parse_engine_version(text: &str) -> Option<semver::Version> {
    let caps = VERSION_RE.captures(text)?;
    semver::Version::parse(&caps[1]).ok()
}

fn sanitize_params(mut params: serde_json::Value) -> serde_json::Value {
    const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "eval"];
    if let serde_json::Value::Object(map) = &mut params {
        for key in DANGEROUS_KEYS {
            map.remove(key);
        }
    }
    params
}

async fn enumerate_outputs(work_dir: &std::path::Path) -> std::io::Result<Vec<OutputFile>> {
    let mut outputs = Vec::new();
    let mut entries = tokio::fs::read_dir(work_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if !OUTPUT_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        outputs.push(OutputFile {
            path: path.display().to_string(),
            format: ext,
            sha256: hex::encode(hasher.finalize()),
        });
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_params_drops_dangerous_keys() {
        let params = serde_json::json!({"__proto__": 1, "width": 10});
        let sanitized = sanitize_params(params);
        assert!(sanitized.get("__proto__").is_none());
        assert_eq!(sanitized["width"], 10);
    }

    #[test]
    fn parses_engine_version_from_freecad_banner() {
        let v = parse_engine_version("FreeCAD 0.21.2, Libs: 0.21.2R\nCopyright ...\n").unwrap();
        assert_eq!(v, semver::Version::new(0, 21, 2));
    }

    #[test]
    fn rejects_version_below_required() {
        let v = parse_engine_version("FreeCAD 0.20.0").unwrap();
        assert!(v < semver::Version::new(0, 21, 0));
    }

    #[test]
    fn non_retriable_codes_are_flagged() {
        let err = ExecutorError::LicenseRestriction {
            requested_format: "STEP".to_string(),
            tier: "basic".to_string(),
        };
        assert!(!err.retriable());
        let err = ExecutorError::TimeoutExceeded(60);
        assert!(err.retriable());
    }
}
