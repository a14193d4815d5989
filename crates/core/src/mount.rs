//! Stream registry: named publishable streams keyed by path, each
//! backed by a multi-track [`MediaSession`], reclaimed once no RTSP
//! session references it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::media_session::MediaSession;

pub const DEFAULT_MOUNT_PATH: &str = "/stream";

/// Registry of named streams, keyed by path. Supports a default
/// (fallback) path for servers publishing a single stream under any
/// requested URI.
#[derive(Clone)]
pub struct MountRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<MediaSession>>>>,
    default_path: Arc<RwLock<Option<String>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            default_path: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a [`MediaSession`] at `path`, replacing any existing one.
    pub fn add(&self, path: &str, session: MediaSession) -> Arc<MediaSession> {
        let session = Arc::new(session);
        self.sessions.write().insert(path.to_string(), session.clone());
        tracing::info!(path, "stream registered");
        session
    }

    pub fn set_default(&self, path: &str) {
        *self.default_path.write() = Some(path.to_string());
    }

    pub fn get(&self, path: &str) -> Option<Arc<MediaSession>> {
        self.sessions.read().get(path).cloned()
    }

    /// Resolve a [`MediaSession`] from an RTSP request URI, falling back
    /// to the default path when no exact match is found.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<MediaSession>> {
        let path = extract_mount_path(uri);
        self.get(path).or_else(|| {
            let default = self.default_path.read();
            default.as_ref().and_then(|p| self.get(p))
        })
    }

    /// Drop any stream whose `MediaSession` has no remaining RTSP-session
    /// references, dropping the registration once the last session using it ends.
    pub fn reap_unreferenced(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|path, session| {
            let keep = session.reference_count() > 0;
            if !keep {
                tracing::debug!(path, "stream reclaimed: no remaining sessions");
            }
            keep
        });
        before - sessions.len()
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the mount path from an RTSP URI.
///
/// `rtsp://host:8554/stream/track1` → `/stream`
/// `rtsp://host:8554/stream`        → `/stream`
/// `rtsp://host:8554/`              → `/`
/// `rtsp://host:8554`               → default path
/// `*`                               → default path
pub fn extract_mount_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => DEFAULT_MOUNT_PATH,
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        DEFAULT_MOUNT_PATH
    };

    if let Some(pos) = path.rfind("/track") {
        &path[..pos]
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::media_session::MediaSubsession;

    fn sample_session(name: &str) -> MediaSession {
        MediaSession::new(name, "Test").with_subsession(MediaSubsession::new("track1", 96, "H264/90000"))
    }

    #[test]
    fn extract_path_full_uri() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554/stream"), "/stream");
    }

    #[test]
    fn extract_path_with_track() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554/stream/track1"), "/stream");
    }

    #[test]
    fn extract_path_no_path() {
        assert_eq!(extract_mount_path("rtsp://localhost:8554"), DEFAULT_MOUNT_PATH);
    }

    #[test]
    fn extract_path_star() {
        assert_eq!(extract_mount_path("*"), DEFAULT_MOUNT_PATH);
    }

    #[test]
    fn registry_add_and_get() {
        let registry = MountRegistry::new();
        registry.add("/stream", sample_session("/stream"));
        assert!(registry.get("/stream").is_some());
        assert!(registry.get("/other").is_none());
    }

    #[test]
    fn registry_resolve_fallback_to_default() {
        let registry = MountRegistry::new();
        registry.add("/stream", sample_session("/stream"));
        registry.set_default("/stream");

        assert!(registry.resolve_from_uri("rtsp://localhost:8554/stream").is_some());
        let fallback = registry.resolve_from_uri("rtsp://localhost:8554/anything").unwrap();
        assert_eq!(fallback.stream_name, "/stream");
    }

    #[test]
    fn reap_unreferenced_drops_idle_streams() {
        let registry = MountRegistry::new();
        let session = registry.add("/stream", sample_session("/stream"));
        assert_eq!(registry.reap_unreferenced(), 1, "no references yet");
        assert!(registry.get("/stream").is_none());

        let session2 = registry.add("/stream2", sample_session("/stream2"));
        session2.add_reference();
        assert_eq!(registry.reap_unreferenced(), 0);
        assert!(registry.get("/stream2").is_some());
        drop(session);
    }
}
