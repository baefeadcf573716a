//! Git-backed store
//!
//! The store document lives in `cauldron.json` at the repository root and
//! stored files live beside it. Outside a transaction each write is committed
//! (and pushed) immediately; inside a transaction writes only touch the
//! working tree until commit, and a discard hard-resets to HEAD. A commit
//! whose push fails is rolled back, so the local branch never runs ahead of
//! the remote.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use git2::build::RepoBuilder;
use git2::{
    Commit, Cred, CredentialType, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature, Status, StatusOptions,
};
use tracing::{debug, info, warn};

use super::{StoreBackend, StoreLocation};
use crate::connection::SUPPORTED_SCHEMA_VERSION;
use crate::error::{Result, StoreError, TransactionError};
use crate::model::StoreDocument;

/// File holding the store document
pub const DOCUMENT_FILE: &str = "cauldron.json";

const REMOTE_NAME: &str = "origin";

/// Store kept in a git repository, optionally mirrored to a remote branch
pub struct GitStore {
    root: PathBuf,
    repo: Repository,
    remote: Option<String>,
    branch: String,
    in_transaction: bool,
}

impl GitStore {
    /// Open the store at `location`.
    ///
    /// Remote stores are cloned, or fetched and hard-reset to the remote branch.
    /// Local stores are opened or initialized with an empty document.
    pub fn open(location: &StoreLocation) -> Result<Self> {
        let repo = match &location.remote {
            Some(url) => checkout_remote(url, location)?,
            None => open_local(location)?,
        };

        let mut store = Self {
            root: location.path.clone(),
            repo,
            remote: location.remote.clone(),
            branch: location.branch.clone(),
            in_transaction: false,
        };

        if store.remote.is_none() && !store.document_path().exists() {
            info!(path = %store.root.display(), "initializing new Cauldron");
            let document = StoreDocument::new(SUPPORTED_SCHEMA_VERSION);
            store.write_document(&document, "Initialize Cauldron")?;
        }

        Ok(store)
    }

    /// Get the root path of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn document_path(&self) -> PathBuf {
        self.root.join(DOCUMENT_FILE)
    }

    fn file_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || key == DOCUMENT_FILE {
            return Err(StoreError::InvalidDocument(format!("invalid file key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    /// Stage everything and create a commit. Returns `None` if nothing changed.
    fn commit(&self, message: &str) -> Result<Option<Oid>> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let parent = self.head_commit();
        if parent.as_ref().map(|p| p.tree_id()) == Some(tree_id) {
            debug!("no changes to commit");
            return Ok(None);
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let parents: Vec<&Commit> = parent.iter().collect();
        let oid = self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        info!(commit = %oid, branch = %self.branch, "committed Cauldron changes");

        if self.remote.is_some() {
            if let Err(e) = self.push() {
                warn!(commit = %oid, error = %e, "push failed, rolling back local commit");
                self.roll_back_to(parent.as_ref())?;
                return Err(e);
            }
        }
        Ok(Some(oid))
    }

    /// Move the branch and working tree back to `parent`, dropping the commit on top of it
    fn roll_back_to(&self, parent: Option<&Commit<'_>>) -> Result<()> {
        match parent {
            Some(parent) => self.repo.reset(parent.as_object(), ResetType::Hard, None)?,
            None => {
                let branch_ref = format!("refs/heads/{}", self.branch);
                if let Ok(mut reference) = self.repo.find_reference(&branch_ref) {
                    reference.delete()?;
                }
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }
        remove_untracked(&self.repo, &self.root)
    }

    fn push(&self) -> Result<()> {
        let mut remote = self.repo.find_remote(REMOTE_NAME)?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", self.branch);
        let mut rejection = None;
        {
            let mut callbacks = remote_callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(status) = status {
                    rejection = Some(format!("push of {} rejected: {}", refname, status));
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            remote.push(&[refspec.as_str()], Some(&mut options))?;
        }
        if let Some(reason) = rejection {
            return Err(git2::Error::from_str(&reason).into());
        }
        debug!(branch = %self.branch, "pushed Cauldron branch");
        Ok(())
    }

    fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Ok(Signature::now("Cauldron", "cauldron@localhost")?),
        }
    }

    /// Get the HEAD commit if it exists
    fn head_commit(&self) -> Option<Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }
}

impl StoreBackend for GitStore {
    fn read_document(&self) -> Result<StoreDocument> {
        let content = match fs::read_to_string(self.document_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::InvalidDocument(format!(
                    "{} not found in {}",
                    DOCUMENT_FILE,
                    self.root.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    fn write_document(&mut self, document: &StoreDocument, message: &str) -> Result<()> {
        let mut content = serde_json::to_string_pretty(document)?;
        content.push('\n');
        fs::write(self.document_path(), content)?;
        if !self.in_transaction {
            self.commit(message)?;
        }
        Ok(())
    }

    fn read_file(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.file_path(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&mut self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.file_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        if !self.in_transaction {
            self.commit(&format!("Add {}", key))?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(TransactionError::AlreadyOpen.into());
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self, message: &str) -> Result<()> {
        if !self.in_transaction {
            return Err(TransactionError::NotOpen.into());
        }
        self.commit(message)?;
        self.in_transaction = false;
        Ok(())
    }

    fn discard_transaction(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        match self.head_commit() {
            Some(head) => self.repo.reset(head.as_object(), ResetType::Hard, None)?,
            None => {
                let mut index = self.repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }
        remove_untracked(&self.repo, &self.root)?;
        debug!("discarded Cauldron working tree changes");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

fn open_local(location: &StoreLocation) -> Result<Repository> {
    fs::create_dir_all(&location.path)?;
    let branch_ref = format!("refs/heads/{}", location.branch);
    match Repository::open(&location.path) {
        Ok(repo) => {
            if repo.find_reference(&branch_ref).is_ok() {
                repo.set_head(&branch_ref)?;
                repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
            }
            Ok(repo)
        }
        Err(_) => {
            let repo = Repository::init(&location.path)?;
            repo.set_head(&branch_ref)?;
            Ok(repo)
        }
    }
}

fn checkout_remote(url: &str, location: &StoreLocation) -> Result<Repository> {
    if !location.path.join(".git").exists() {
        if let Some(parent) = location.path.parent() {
            fs::create_dir_all(parent)?;
        }
        info!(url, branch = %location.branch, "cloning Cauldron");
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks());
        let repo = RepoBuilder::new()
            .branch(&location.branch)
            .fetch_options(fetch)
            .clone(url, &location.path)?;
        return Ok(repo);
    }

    let repo = Repository::open(&location.path)?;
    {
        let branch = &location.branch;
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let refspec = format!("+refs/heads/{0}:refs/remotes/{1}/{0}", branch, REMOTE_NAME);
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks());
        debug!(url, branch = %branch, "fetching Cauldron");
        remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;

        let oid = repo.refname_to_id(&format!("refs/remotes/{}/{}", REMOTE_NAME, branch))?;
        let target = repo.find_commit(oid)?;
        let branch_ref = format!("refs/heads/{}", branch);
        repo.reference(&branch_ref, oid, true, "cauldron: sync with remote")?;
        repo.set_head(&branch_ref)?;
        repo.reset(target.as_object(), ResetType::Hard, None)?;
    }
    remove_untracked(&repo, &location.path)?;
    Ok(repo)
}

fn remove_untracked(repo: &Repository, root: &Path) -> Result<()> {
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut options))?;
    for entry in statuses.iter() {
        if !entry.status().intersects(Status::WT_NEW | Status::INDEX_NEW) {
            continue;
        }
        if let Some(path) = entry.path() {
            let full = root.join(path);
            if full.is_file() {
                fs::remove_file(&full)?;
            }
        }
    }
    Ok(())
}

fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|url, username, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username)
        } else {
            Cred::default()
        }
    });
    callbacks
}
