//! Remote repository capabilities.
//!
//! The repository host is a black-box collaborator behind a trait; these
//! tools only decode typed arguments and delegate.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::context::RequestContext;
use crate::dispatch::registry::Tool;
use crate::error::DispatchError;

/// Client for a remote repository host (e.g. a code hosting API).
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Read a file's content at the default branch head.
    async fn read_file(&self, repo: &str, path: &str) -> Result<String, DispatchError>;

    /// Create or update a file, returning the resulting revision id.
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        commit_message: &str,
    ) -> Result<String, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    repo: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct UpdateFileArgs {
    repo: String,
    path: String,
    content: String,
    commit_message: String,
}

/// Reads a file from the repository host.
pub struct ReadRepoFileTool {
    host: Arc<dyn RepositoryHost>,
}

impl ReadRepoFileTool {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for ReadRepoFileTool {
    fn name(&self) -> &str {
        "read_repo_file"
    }

    fn description(&self) -> &str {
        "Read a file from the remote repository at the default branch head."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo": { "type": "string", "description": "owner/name of the repository" },
                "path": { "type": "string", "description": "File path within the repository" }
            },
            "required": ["repo", "path"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &RequestContext,
    ) -> Result<serde_json::Value, DispatchError> {
        let args: ReadFileArgs =
            serde_json::from_value(arguments).map_err(|e| DispatchError::InvalidArguments {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let content = self.host.read_file(&args.repo, &args.path).await?;
        Ok(serde_json::json!({ "path": args.path, "content": content }))
    }
}

/// Creates or updates a file on the repository host.
pub struct UpdateRepoFileTool {
    host: Arc<dyn RepositoryHost>,
}

impl UpdateRepoFileTool {
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for UpdateRepoFileTool {
    fn name(&self) -> &str {
        "update_repo_file"
    }

    fn description(&self) -> &str {
        "Create or update a file in the remote repository with a commit message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "repo": { "type": "string", "description": "owner/name of the repository" },
                "path": { "type": "string", "description": "File path within the repository" },
                "content": { "type": "string", "description": "Full new file content" },
                "commit_message": { "type": "string", "description": "Commit message" }
            },
            "required": ["repo", "path", "content", "commit_message"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, DispatchError> {
        let args: UpdateFileArgs =
            serde_json::from_value(arguments).map_err(|e| DispatchError::InvalidArguments {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            repo = %args.repo,
            path = %args.path,
            request = %ctx.request_id,
            "Updating repository file"
        );

        let revision = self
            .host
            .put_file(&args.repo, &args.path, &args.content, &args.commit_message)
            .await?;
        Ok(serde_json::json!({ "path": args.path, "revision": revision }))
    }
}
