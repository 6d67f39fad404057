//! Durable, crash-safe session persistence: one JSON file per session,
//! written via temp-file-then-rename so a reader never observes a partial
//! write, guarded by a per-session async lock so concurrent iterations on
//! the same session serialize (C4).
//!
//! Extends the simpler direct-`fs::write` persistence pattern used
//! elsewhere in this workspace with atomicity and per-key locking, since
//! here a crash mid-write would otherwise corrupt an in-progress audit
//! trajectory.

use super::context::ContextLifecycle;
use super::error::EngineError;
use super::types::Session;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Filesystem-backed session store. One `Session` maps to one
/// `<state_dir>/<session_id>.json` file.
pub struct SessionStore {
    state_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(state_dir: PathBuf, max_sessions: usize) -> Self {
        Self {
            state_dir,
            locks: DashMap::new(),
            max_sessions,
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.state_dir.join(format!("{session_id}.json"))
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a brand-new session with a fresh UUID v4 id, persist it, and
    /// return it. Fails with `SessionCapExceeded` if the configured ceiling
    /// on concurrently-open (not-yet-complete) sessions would be exceeded.
    pub async fn create(&self, external_loop_id: Option<String>) -> Result<Session, EngineError> {
        let open_count = self.count_open_sessions().await?;
        if open_count >= self.max_sessions {
            return Err(EngineError::SessionCapExceeded {
                cap: self.max_sessions,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let session = Session::new(&session_id, external_loop_id);
        self.write(&session).await?;
        info!(session_id = %session_id, "created new session");
        Ok(session)
    }

    async fn count_open_sessions(&self) -> Result<usize, EngineError> {
        let mut count = 0usize;
        let mut entries = match tokio::fs::read_dir(&self.state_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(EngineError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(EngineError::Io)? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(text) = tokio::fs::read_to_string(entry.path()).await {
                if let Ok(session) = serde_json::from_str::<Session>(&text) {
                    if !session.is_complete {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Load a session by id. Returns `SessionNotFound` if no file exists,
    /// `SessionCorrupt` if the file exists but fails to parse or fails
    /// structural validation.
    pub async fn load(&self, session_id: &str) -> Result<Session, EngineError> {
        let path = self.path_for(session_id);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| EngineError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let session: Session =
            serde_json::from_str(&text).map_err(|e| EngineError::SessionCorrupt {
                session_id: session_id.to_string(),
                message: e.to_string(),
            })?;
        session.validate().map_err(|message| EngineError::SessionCorrupt {
            session_id: session_id.to_string(),
            message,
        })?;
        Ok(session)
    }

    /// Persist `session`, atomically: write to a sibling temp file, fsync
    /// it, then rename over the real path. A reader opening the real path
    /// at any point sees either the old content in full or the new content
    /// in full, never a partial write.
    pub async fn write(&self, session: &Session) -> Result<(), EngineError> {
        session
            .validate()
            .map_err(|message| EngineError::SessionCorrupt {
                session_id: session.session_id.clone(),
                message,
            })?;

        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(EngineError::Io)?;

        let json = serde_json::to_string_pretty(session).map_err(EngineError::Json)?;
        let final_path = self.path_for(&session.session_id);
        let tmp_path = self
            .state_dir
            .join(format!(".{}.tmp-{}", session.session_id, Uuid::new_v4()));

        write_atomic(&tmp_path, &final_path, json.as_bytes())
            .await
            .map_err(EngineError::Io)?;
        Ok(())
    }

    /// Run `f` with exclusive access to `session_id`'s on-disk state: loads
    /// the current session, hands it to `f`, and persists whatever `f`
    /// returns. Serializes concurrent iterations submitted against the same
    /// session id.
    pub async fn with_session<F, Fut>(
        &self,
        session_id: &str,
        f: F,
    ) -> Result<Session, EngineError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: std::future::Future<Output = Result<Session, EngineError>>,
    {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let session = self.load(session_id).await?;
        let updated = f(session).await?;
        self.write(&updated).await?;
        Ok(updated)
    }

    /// C9: begin a new external-context handle for `session_id` and persist
    /// it. Fails if a context is already active for this session.
    pub async fn start_external_context(&self, session_id: &str) -> Result<String, EngineError> {
        let updated = self
            .with_session(session_id, |mut s| async move {
                let mut lifecycle =
                    ContextLifecycle::from_existing(s.external_context_id.clone(), s.external_context_active);
                let handle = lifecycle.start()?;
                s.external_context_id = Some(handle);
                s.external_context_active = true;
                Ok(s)
            })
            .await?;
        Ok(updated
            .external_context_id
            .clone()
            .expect("start_external_context always sets external_context_id"))
    }

    /// C9: record a liveness keep-alive against `session_id`'s active
    /// external context. Fails if no context is currently active.
    pub async fn maintain_external_context(&self, session_id: &str) -> Result<(), EngineError> {
        let session = self.load(session_id).await?;
        let lifecycle = ContextLifecycle::from_existing(
            session.external_context_id.clone(),
            session.external_context_active,
        );
        lifecycle.maintain()
    }

    /// C9: terminate `session_id`'s external context exactly once and
    /// persist the cleared flag. Fails if no context is currently active.
    pub async fn terminate_external_context(&self, session_id: &str) -> Result<(), EngineError> {
        self.with_session(session_id, |mut s| async move {
            let mut lifecycle = ContextLifecycle::from_existing(
                s.external_context_id.clone(),
                s.external_context_active,
            );
            lifecycle.terminate()?;
            s.external_context_active = false;
            Ok(s)
        })
        .await?;
        Ok(())
    }

    /// Remove persisted state for sessions whose `updated_at` is older than
    /// `max_age`. Uses `try_lock` so an in-progress iteration on a session
    /// is never blocked or interrupted by the sweep; that session is simply
    /// skipped until the next sweep.
    pub async fn sweep_aged_sessions(&self, max_age: Duration) -> usize {
        let mut removed = 0usize;
        let Ok(mut entries) = tokio::fs::read_dir(&self.state_dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let lock = self.lock_for(session_id);
            let Ok(_guard) = lock.try_lock() else {
                continue;
            };
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<Session>(&text) else {
                continue;
            };
            let age = chrono::Utc::now().signed_duration_since(session.updated_at);
            if age.to_std().unwrap_or(Duration::ZERO) > max_age {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(session_id, error = %e, "failed removing aged session file");
                } else {
                    removed += 1;
                }
            }
        }
        removed
    }
}

async fn write_atomic(tmp_path: &Path, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(tmp_path, final_path).await?;
    Ok(())
}
