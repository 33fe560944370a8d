//! Per-repository actors and the registry that hands them out.
//!
//! One [`RepoActor`] exists per `owner/repo`. A read-write lock enforces the
//! concurrency contract: at most one mutating operation in flight, reads
//! running concurrently against a consistent snapshot.

use crate::error::ServerError;
use barge_git::Repository;
use barge_protocol::{
    advertise, apply_and_report, unpack_failure_report, upload_pack, ReceiveRequest, Service,
};
use barge_store::{ByteStore, FsStore};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// One repository with serialized writes.
pub struct RepoActor {
    full_name: String,
    repo: RwLock<Repository>,
}

impl RepoActor {
    /// Creates the actor and runs `init()` under the write lock; nothing
    /// else touches the repository until that completes.
    pub async fn bootstrap(
        full_name: String,
        store: Arc<dyn ByteStore>,
    ) -> Result<Arc<Self>, ServerError> {
        let actor = Arc::new(Self {
            full_name,
            repo: RwLock::new(Repository::new(store)),
        });
        {
            let repo = actor.repo.write().await;
            repo.init()?;
        }
        tracing::debug!(repo = %actor.full_name, "repository actor ready");
        Ok(actor)
    }

    /// `owner/repo`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Builds the `info/refs` advertisement. Shares the read lock.
    pub async fn advertise(&self, service: Service) -> Result<Vec<u8>, ServerError> {
        let repo = self.repo.read().await;
        Ok(advertise(&repo, service)?)
    }

    /// Serves an upload-pack request. Shares the read lock.
    pub async fn upload_pack(&self, body: &[u8]) -> Result<Vec<u8>, ServerError> {
        let repo = self.repo.read().await;
        Ok(upload_pack(&repo, body)?)
    }

    /// Serves a receive-pack request. Takes the write lock, so pushes to
    /// one repository apply strictly in arrival order.
    ///
    /// Packfile indexing is the expensive, client-controlled step; it runs
    /// on a blocking thread under `index_timeout`, separate from whatever
    /// overall budget the caller enforces. The write lock stays held
    /// throughout, so an expired deadline leaves every ref untouched.
    pub async fn receive_pack(
        &self,
        body: &[u8],
        index_timeout: Duration,
    ) -> Result<Vec<u8>, ServerError> {
        let repo = self.repo.write().await;
        let mut request = ReceiveRequest::parse(body)?;

        if request.has_pack() {
            let pack = request.take_pack();
            let indexer = (*repo).clone();
            let indexing = tokio::task::spawn_blocking(move || indexer.add_pack(&pack));
            let outcome = tokio::time::timeout(index_timeout, indexing)
                .await
                .map_err(|_| ServerError::Timeout)?
                .map_err(|e| ServerError::Internal(e.to_string()))?;
            if let Err(e) = outcome {
                return Ok(unpack_failure_report(&e)?);
            }
        }

        Ok(apply_and_report(&repo, &request)?)
    }

    /// Runs a read query against a consistent snapshot.
    pub async fn read<T>(&self, f: impl FnOnce(&Repository) -> T) -> T {
        let repo = self.repo.read().await;
        f(&repo)
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Hands out one actor per repository, creating them lazily.
pub struct RepoRegistry {
    data_dir: PathBuf,
    actors: Mutex<HashMap<String, Arc<RepoActor>>>,
}

impl RepoRegistry {
    /// Creates a registry rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            actors: Mutex::new(HashMap::new()),
        }
    }

    fn repo_dir(&self, owner: &str, name: &str) -> PathBuf {
        self.data_dir.join(owner).join(format!("{}.git", name))
    }

    fn check_names(owner: &str, name: &str) -> Result<(), ServerError> {
        if valid_name(owner) && valid_name(name) {
            Ok(())
        } else {
            Err(ServerError::BadRequest(format!(
                "invalid repository name: {}/{}",
                owner, name
            )))
        }
    }

    /// True if the repository has been initialized on disk.
    pub fn exists(&self, owner: &str, name: &str) -> bool {
        Self::check_names(owner, name).is_ok() && self.repo_dir(owner, name).join("HEAD").is_file()
    }

    async fn actor_for(&self, owner: &str, name: &str) -> Result<Arc<RepoActor>, ServerError> {
        let key = format!("{}/{}", owner, name);
        let mut actors = self.actors.lock().await;
        if let Some(actor) = actors.get(&key) {
            return Ok(actor.clone());
        }
        let store = FsStore::open(self.repo_dir(owner, name))?;
        let actor = RepoActor::bootstrap(key.clone(), Arc::new(store)).await?;
        actors.insert(key, actor.clone());
        Ok(actor)
    }

    /// Opens an existing repository; `NotFound` if it was never created.
    pub async fn open(&self, owner: &str, name: &str) -> Result<Arc<RepoActor>, ServerError> {
        Self::check_names(owner, name)?;
        if !self.exists(owner, name) {
            return Err(ServerError::RepoNotFound(format!("{}/{}", owner, name)));
        }
        self.actor_for(owner, name).await
    }

    /// Opens a repository, initializing the bare skeleton if missing.
    pub async fn open_or_init(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Arc<RepoActor>, ServerError> {
        Self::check_names(owner, name)?;
        self.actor_for(owner, name).await
    }

    /// The `create` control call: initializes a new repository, failing if
    /// it already exists.
    pub async fn create(&self, owner: &str, name: &str) -> Result<Arc<RepoActor>, ServerError> {
        Self::check_names(owner, name)?;
        if self.exists(owner, name) {
            return Err(ServerError::RepoExists(format!("{}/{}", owner, name)));
        }
        let actor = self.actor_for(owner, name).await?;
        tracing::info!(repo = %actor.full_name(), "repository created");
        Ok(actor)
    }

    /// All initialized repositories under the data directory.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let Ok(owners) = std::fs::read_dir(&self.data_dir) else {
            return out;
        };
        for owner_entry in owners.flatten() {
            if !owner_entry.path().is_dir() {
                continue;
            }
            let owner = owner_entry.file_name().to_string_lossy().to_string();
            let Ok(repos) = std::fs::read_dir(owner_entry.path()) else {
                continue;
            };
            for repo_entry in repos.flatten() {
                let file_name = repo_entry.file_name().to_string_lossy().to_string();
                let Some(name) = file_name.strip_suffix(".git") else {
                    continue;
                };
                if repo_entry.path().join("HEAD").is_file() {
                    out.push((owner.clone(), name.to_string()));
                }
            }
        }
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_git::pack::PackWriter;
    use barge_git::{GitObject, Oid, TreeEntry};
    use barge_protocol::build_receive_request;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_then_open() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());

        assert!(!registry.exists("alice", "demo"));
        registry.create("alice", "demo").await.unwrap();
        assert!(registry.exists("alice", "demo"));

        let actor = registry.open("alice", "demo").await.unwrap();
        assert_eq!(actor.full_name(), "alice/demo");
        assert!(actor.read(|r| r.is_initialized().unwrap()).await);
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        registry.create("alice", "demo").await.unwrap();
        assert!(matches!(
            registry.create("alice", "demo").await,
            Err(ServerError::RepoExists(_))
        ));
    }

    #[tokio::test]
    async fn open_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        assert!(matches!(
            registry.open("alice", "ghost").await,
            Err(ServerError::RepoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn same_actor_instance_per_repo() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        let a = registry.open_or_init("alice", "demo").await.unwrap();
        let b = registry.open_or_init("alice", "demo").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn rejects_path_traversal_names() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        assert!(registry.open_or_init("..", "demo").await.is_err());
        assert!(registry.open_or_init("alice", "a/b").await.is_err());
        assert!(registry.open_or_init("alice", ".hidden").await.is_err());
    }

    #[tokio::test]
    async fn receive_pack_indexes_within_deadline() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        let actor = registry.open_or_init("alice", "demo").await.unwrap();

        let blob = GitObject::blob(b"actor push\n".to_vec());
        let tree = GitObject::tree(vec![TreeEntry::file("f", blob.id)]);
        let commit = GitObject::commit(
            &tree.id,
            &[],
            "A <a@e.c> 1 +0000",
            "A <a@e.c> 1 +0000",
            "m\n",
        );
        let tip = commit.id;
        let mut writer = PackWriter::new();
        writer.add(commit);
        writer.add(tree);
        writer.add(blob);
        let body = build_receive_request(
            &[(Oid::ZERO, tip, "refs/heads/main")],
            "report-status",
            &writer.build().unwrap(),
        )
        .unwrap();

        let report = actor
            .receive_pack(&body, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&report).contains("ok refs/heads/main"));

        let main = actor
            .read(|r| r.read_ref_direct("refs/heads/main").unwrap())
            .await;
        assert_eq!(main, Some(tip));
    }

    #[tokio::test]
    async fn list_scans_data_dir() {
        let temp = TempDir::new().unwrap();
        let registry = RepoRegistry::new(temp.path());
        registry.create("alice", "one").await.unwrap();
        registry.create("bob", "two").await.unwrap();

        let repos = registry.list();
        assert_eq!(
            repos,
            vec![
                ("alice".to_string(), "one".to_string()),
                ("bob".to_string(), "two".to_string())
            ]
        );
    }
}
