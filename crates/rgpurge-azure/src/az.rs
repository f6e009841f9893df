//! az CLI wrapper
//!
//! Wraps the az CLI commands rgpurge needs: account checks, Resource Graph
//! queries, generic resource show/update/delete, raw REST deletes and
//! resource group operations.

use crate::error::{AzureError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const GRAPH_PAGE_SIZE: &str = "1000";

/// az CLI wrapper
#[derive(Debug, Clone)]
pub struct AzCli {
    subscription: Option<String>,
}

impl AzCli {
    pub fn new(subscription: Option<String>) -> Self {
        Self { subscription }
    }

    /// Check if az is installed and logged in
    pub async fn check_auth(&self) -> Result<AccountInfo> {
        let which = Command::new("which").arg("az").output().await?;

        if !which.status.success() {
            return Err(AzureError::AzNotFound);
        }

        let output = self
            .run_scoped(&["account", "show", "--output", "json"])
            .await
            .map_err(|e| AzureError::NotLoggedIn(e.to_string()))?;

        let account: AccountInfo = serde_json::from_str(&output)?;
        Ok(account)
    }

    /// Run an az command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("az");
        cmd.args(args);
        cmd.arg("--only-show-errors");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: az {}", args.join(" "));

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AzureError::from_stderr(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a command that accepts `--subscription`
    async fn run_scoped(&self, args: &[&str]) -> Result<String> {
        match &self.subscription {
            Some(sub) => {
                let mut scoped = args.to_vec();
                scoped.push("--subscription");
                scoped.push(sub.as_str());
                self.run_command(&scoped).await
            }
            None => self.run_command(args).await,
        }
    }

    /// Run a Resource Graph query, following skip tokens
    pub async fn graph_query(&self, kql: &str) -> Result<Vec<GraphRow>> {
        let mut rows = Vec::new();
        let mut skip_token: Option<String> = None;

        loop {
            let mut args = vec![
                "graph",
                "query",
                "--graph-query",
                kql,
                "--first",
                GRAPH_PAGE_SIZE,
                "--output",
                "json",
            ];
            if let Some(sub) = &self.subscription {
                args.push("--subscriptions");
                args.push(sub.as_str());
            }
            if let Some(token) = &skip_token {
                args.push("--skip-token");
                args.push(token.as_str());
            }

            let output = self.run_command(&args).await?;
            let page: GraphPage = serde_json::from_str(&output)?;
            rows.extend(page.data);

            match page.skip_token {
                Some(token) if !token.is_empty() => skip_token = Some(token),
                _ => break,
            }
        }

        Ok(rows)
    }

    /// Show a resource by id, `None` if it does not exist
    pub async fn resource_show(&self, id: &str) -> Result<Option<Value>> {
        match self
            .run_command(&["resource", "show", "--ids", id, "--output", "json"])
            .await
        {
            Ok(output) => Ok(Some(serde_json::from_str(&output)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a resource by id
    pub async fn resource_delete(&self, id: &str, api_version: Option<&str>) -> Result<()> {
        let mut args = vec!["resource", "delete", "--ids", id];
        if let Some(version) = api_version {
            args.push("--api-version");
            args.push(version);
        }
        self.run_command(&args).await?;
        Ok(())
    }

    /// Update a resource by id with generic `--set/--add/--remove` arguments
    pub async fn resource_update(&self, id: &str, update_args: &[String]) -> Result<()> {
        let mut args = vec!["resource", "update", "--ids", id, "--output", "none"];
        args.extend(update_args.iter().map(String::as_str));
        self.run_command(&args).await?;
        Ok(())
    }

    /// Issue a raw ARM DELETE through `az rest`
    pub async fn rest_delete(&self, id: &str, api_version: &str) -> Result<()> {
        let url = management_url(id, api_version);
        self.run_command(&["rest", "--method", "delete", "--url", url.as_str()])
            .await?;
        Ok(())
    }

    /// List management locks
    pub async fn lock_list(&self, resource_group: Option<&str>) -> Result<Vec<LockInfo>> {
        let mut args = vec!["lock", "list", "--output", "json"];
        if let Some(rg) = resource_group {
            args.push("--resource-group");
            args.push(rg);
        }
        let output = self.run_scoped(&args).await?;

        if output.trim().is_empty() || output.trim() == "[]" {
            return Ok(Vec::new());
        }

        let locks: Vec<LockInfo> = serde_json::from_str(&output)?;
        Ok(locks)
    }

    /// Show a resource group, `None` if it does not exist
    pub async fn group_show(&self, name: &str) -> Result<Option<GroupInfo>> {
        match self
            .run_scoped(&["group", "show", "--name", name, "--output", "json"])
            .await
        {
            Ok(output) => Ok(Some(serde_json::from_str(&output)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start deleting a resource group without waiting
    pub async fn group_delete_no_wait(&self, name: &str) -> Result<()> {
        self.run_scoped(&["group", "delete", "--name", name, "--yes", "--no-wait"])
            .await?;
        Ok(())
    }
}

fn management_url(id: &str, api_version: &str) -> String {
    format!("{}{}?api-version={}", MANAGEMENT_ENDPOINT, id, api_version)
}

/// Account information from `az account show`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    pub user: Option<AccountUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUser {
    pub name: String,
}

/// One page of `az graph query` output
#[derive(Debug, Clone, Deserialize)]
struct GraphPage {
    #[serde(default)]
    data: Vec<GraphRow>,
    #[serde(default)]
    skip_token: Option<String>,
}

/// A projected Resource Graph row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRow {
    pub id: String,
    #[serde(default)]
    pub properties: Value,
}

/// Lock information from `az lock list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    pub name: String,
    pub level: Option<String>,
}

/// Resource group information from `az group show`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub properties: Option<GroupProperties>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupProperties {
    #[serde(rename = "provisioningState")]
    pub provisioning_state: Option<String>,
}

impl GroupInfo {
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
    }
}
