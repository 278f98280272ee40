//! Persisted client identity (spec §4.4 "resume semantics"): the
//! `tunnel_id` the server assigned on a prior connection, written to disk
//! so a client restart can present it on the next `init` and resume rather
//! than allocate a fresh subdomain.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub tunnel_id: String,
    pub subdomain: String,
    pub public_url: String,
}

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Option<PersistedState> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Writes the state atomically (write to a sibling temp file, then
    /// rename) and, on unix, restricts it to owner read/write since the
    /// file effectively doubles as a reconnect credential.
    pub async fn save(&self, state: &PersistedState) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp_path, permissions).await?;
        }

        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("uniroute-tunnel-client-test-{:?}", std::thread::current().id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("state.json");
        let state_file = StateFile::new(&path);

        let state = PersistedState {
            tunnel_id: "abc".to_string(),
            subdomain: "fuzzybear1".to_string(),
            public_url: "https://fuzzybear1.example.com".to_string(),
        };
        state_file.save(&state).await.unwrap();

        let loaded = state_file.load().await.unwrap();
        assert_eq!(loaded.tunnel_id, "abc");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn load_missing_file_returns_none() {
        let state_file = StateFile::new("/nonexistent/path/state.json");
        assert!(state_file.load().await.is_none());
    }
}
