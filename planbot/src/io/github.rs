//! GitHub REST implementation of [`RepoHost`].
//!
//! One client is built at process start and passed down to the poll loop and
//! the action executor. It holds no host state between calls.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::json;
use tracing::{debug, instrument};

use crate::core::types::{ChangedFile, Comment, Issue, PullRequest};
use crate::io::host::{FileWrite, HostError, HostResult, NewPullRequest, RepoHost};

const PAGE_SIZE: usize = 100;
const ERROR_BODY_LIMIT: usize = 800;

/// `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl FromStr for RepoRef {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let (owner, name) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("repository must be 'owner/name', got '{raw}'"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(anyhow!("repository must be 'owner/name', got '{raw}'"));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    id: u64,
    title: String,
    body: Option<String>,
    state: String,
    pull_request: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct GithubRef {
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Debug, Deserialize)]
struct GithubPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    state: String,
    head: GithubRef,
    base: GithubRef,
}

impl From<GithubPullRequest> for PullRequest {
    fn from(raw: GithubPullRequest) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            html_url: raw.html_url,
            head_ref: raw.head.git_ref,
            base_ref: raw.base.git_ref,
            open: raw.state == "open",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubComment {
    id: u64,
    body: Option<String>,
}

impl From<GithubComment> for Comment {
    fn from(raw: GithubComment) -> Self {
        Self {
            id: raw.id,
            body: raw.body.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubBranch {
    commit: GithubCommit,
}

#[derive(Debug, Deserialize)]
struct GithubCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GithubPullFile {
    filename: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GithubContent {
    content: String,
    encoding: String,
}

/// Blocking GitHub API client scoped to one repository.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_base: String,
    repo: RepoRef,
}

impl GithubClient {
    pub fn new(api_base: &str, token: &str, repo: RepoRef, request_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("planbot"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_header).context("invalid github authorization header")?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .context("build github http client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
        })
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.repo.owner, self.repo.name, path
        )
    }

    fn send_json<T: DeserializeOwned>(&self, operation: &str, request: RequestBuilder) -> HostResult<T> {
        let response = request.send().map_err(|source| HostError::Transport {
            operation: operation.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().map_err(|err| HostError::Decode {
                operation: operation.to_string(),
                message: err.to_string(),
            });
        }

        let body = response.text().unwrap_or_default();
        let message = truncate_for_error(&body, ERROR_BODY_LIMIT);
        debug!(operation, status = status.as_u16(), "github request rejected");
        Err(match status.as_u16() {
            404 => HostError::NotFound {
                operation: operation.to_string(),
            },
            409 => HostError::Conflict {
                operation: operation.to_string(),
                message,
            },
            code => HostError::Api {
                operation: operation.to_string(),
                status: code,
                message,
            },
        })
    }

    fn get_paginated<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> HostResult<Vec<T>> {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let request = self
                .http
                .get(self.url(path))
                .query(query)
                .query(&[("per_page", per_page.as_str()), ("page", page_value.as_str())]);
            let chunk: Vec<T> = self.send_json(operation, request)?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }
}

impl RepoHost for GithubClient {
    #[instrument(skip_all, fields(repo = %self.repo))]
    fn list_open_issues(&self) -> HostResult<Vec<Issue>> {
        let rows: Vec<GithubIssue> =
            self.get_paginated("list issues", "issues", &[("state", "open")])?;
        Ok(rows
            .into_iter()
            .filter(|row| row.pull_request.is_none())
            .map(|row| Issue {
                number: row.number,
                id: row.id,
                title: row.title,
                body: row.body.unwrap_or_default(),
                open: row.state == "open",
            })
            .collect())
    }

    #[instrument(skip_all, fields(repo = %self.repo))]
    fn list_open_pull_requests(&self) -> HostResult<Vec<PullRequest>> {
        let rows: Vec<GithubPullRequest> =
            self.get_paginated("list pull requests", "pulls", &[("state", "open")])?;
        Ok(rows.into_iter().map(PullRequest::from).collect())
    }

    #[instrument(skip(self))]
    fn list_issue_comments(&self, number: u64) -> HostResult<Vec<Comment>> {
        let rows: Vec<GithubComment> = self.get_paginated(
            "list issue comments",
            &format!("issues/{number}/comments"),
            &[],
        )?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    #[instrument(skip(self, body), fields(body_len = body.len()))]
    fn create_issue_comment(&self, number: u64, body: &str) -> HostResult<Comment> {
        let request = self
            .http
            .post(self.url(&format!("issues/{number}/comments")))
            .json(&json!({ "body": body }));
        let created: GithubComment = self.send_json("create issue comment", request)?;
        Ok(created.into())
    }

    #[instrument(skip(self))]
    fn branch_head(&self, branch: &str) -> HostResult<String> {
        let request = self.http.get(self.url(&format!("branches/{branch}")));
        let found: GithubBranch = self.send_json("get branch", request)?;
        Ok(found.commit.sha)
    }

    #[instrument(skip(self))]
    fn create_branch(&self, branch: &str, sha: &str) -> HostResult<()> {
        let request = self.http.post(self.url("git/refs")).json(&json!({
            "ref": format!("refs/heads/{branch}"),
            "sha": sha,
        }));
        let _: IgnoredAny = self.send_json("create branch", request)?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn list_pull_request_files(&self, number: u64) -> HostResult<Vec<ChangedFile>> {
        let rows: Vec<GithubPullFile> = self.get_paginated(
            "list pull request files",
            &format!("pulls/{number}/files"),
            &[],
        )?;
        Ok(rows
            .into_iter()
            .map(|row| ChangedFile {
                path: row.filename,
                sha: row.sha,
            })
            .collect())
    }

    #[instrument(skip(self))]
    fn file_content(&self, path: &str, git_ref: &str) -> HostResult<String> {
        let operation = "get file content";
        let request = self
            .http
            .get(self.url(&format!("contents/{path}")))
            .query(&[("ref", git_ref)]);
        let found: GithubContent = self.send_json(operation, request)?;
        if found.encoding != "base64" {
            return Err(HostError::Decode {
                operation: operation.to_string(),
                message: format!("unsupported content encoding '{}'", found.encoding),
            });
        }
        decode_content(&found.content).map_err(|message| HostError::Decode {
            operation: operation.to_string(),
            message,
        })
    }

    #[instrument(skip_all, fields(path = %write.path, branch = %write.branch, update = write.sha.is_some()))]
    fn write_file(&self, write: &FileWrite) -> HostResult<()> {
        let mut payload = json!({
            "message": write.message,
            "content": BASE64.encode(write.content.as_bytes()),
            "branch": write.branch,
        });
        if let Some(sha) = &write.sha {
            payload["sha"] = json!(sha);
        }
        let request = self
            .http
            .put(self.url(&format!("contents/{}", write.path)))
            .json(&payload);
        let _: IgnoredAny = self.send_json("write file", request)?;
        Ok(())
    }

    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pull_request(&self, request: &NewPullRequest) -> HostResult<PullRequest> {
        let payload = match request.issue {
            Some(issue) => json!({
                "issue": issue,
                "head": request.head,
                "base": request.base,
                "body": request.body,
            }),
            None => json!({
                "title": request.title,
                "head": request.head,
                "base": request.base,
                "body": request.body,
            }),
        };
        let http_request = self.http.post(self.url("pulls")).json(&payload);
        let created: GithubPullRequest = self.send_json("create pull request", http_request)?;
        Ok(created.into())
    }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_content(raw: &str) -> Result<String, String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|err| format!("invalid base64 content: {err}"))?;
    String::from_utf8(bytes).map_err(|err| format!("content is not utf-8: {err}"))
}

fn truncate_for_error(body: &str, limit: usize) -> String {
    if body.len() <= limit {
        return body.to_string();
    }
    let mut end = limit;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> GithubClient {
        GithubClient::new(
            &server.base_url(),
            "test-token",
            "acme/widgets".parse().expect("repo"),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[test]
    fn repo_ref_requires_owner_and_name() {
        let repo: RepoRef = "kvnn/AIAgentsStarterKit".parse().expect("parse");
        assert_eq!(repo.owner, "kvnn");
        assert_eq!(repo.to_string(), "kvnn/AIAgentsStarterKit");
        assert!("no-slash".parse::<RepoRef>().is_err());
        assert!("a/b/c".parse::<RepoRef>().is_err());
        assert!("/b".parse::<RepoRef>().is_err());
    }

    #[test]
    fn list_open_issues_skips_pull_requests_and_sends_token() {
        let server = MockServer::start();
        let issues = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/issues")
                .query_param("state", "open")
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(json!([
                {"number": 1, "id": 101, "title": "Add login", "body": "details", "state": "open"},
                {"number": 2, "id": 102, "title": "PR", "body": null, "state": "open",
                 "pull_request": {"url": "https://example.test/pulls/2"}},
                {"number": 3, "id": 103, "title": "No body", "body": null, "state": "open"}
            ]));
        });

        let found = client(&server).list_open_issues().expect("list");
        issues.assert();
        let numbers: Vec<u64> = found.iter().map(|issue| issue.number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(found[1].body, "");
        assert!(found[0].open);
    }

    #[test]
    fn list_pull_requests_maps_refs() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls");
            then.status(200).json_body(json!([{
                "number": 12,
                "title": "Add login",
                "body": "Automated PR for Issue #1",
                "html_url": "https://github.test/acme/widgets/pull/12",
                "state": "open",
                "head": {"ref": "feature/issue-1-101-1234"},
                "base": {"ref": "main"}
            }]));
        });

        let found = client(&server).list_open_pull_requests().expect("list");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].head_ref, "feature/issue-1-101-1234");
        assert_eq!(found[0].base_ref, "main");
    }

    #[test]
    fn missing_base_branch_is_a_precondition_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/branches/trunk");
            then.status(404).body("{\"message\":\"Branch not found\"}");
        });

        let err = client(&server).branch_head("trunk").unwrap_err();
        assert!(matches!(err, HostError::NotFound { .. }));
        assert!(err.is_precondition());
    }

    #[test]
    fn stale_blob_hash_is_reported_as_conflict() {
        let server = MockServer::start();
        let put = server.mock(|when, then| {
            when.method(PUT)
                .path("/repos/acme/widgets/contents/app.py")
                .body_includes("\"sha\":\"old-sha\"")
                .body_includes(&format!("\"content\":\"{}\"", BASE64.encode("print(1)\n")));
            then.status(409)
                .body("{\"message\":\"app.py does not match old-sha\"}");
        });

        let err = client(&server)
            .write_file(&FileWrite {
                path: "app.py".to_string(),
                branch: "feature/x".to_string(),
                message: "update".to_string(),
                content: "print(1)\n".to_string(),
                sha: Some("old-sha".to_string()),
            })
            .unwrap_err();
        put.assert();
        assert!(matches!(err, HostError::Conflict { .. }));
        assert!(err.is_precondition());
    }

    #[test]
    fn server_errors_are_not_preconditions() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/repos/acme/widgets/issues/4/comments");
            then.status(502).body("bad gateway");
        });

        let err = client(&server).create_issue_comment(4, "hi").unwrap_err();
        assert!(matches!(err, HostError::Api { status: 502, .. }));
        assert!(!err.is_precondition());
    }

    #[test]
    fn file_content_decodes_wrapped_base64() {
        let server = MockServer::start();
        let encoded = BASE64.encode("line one\nline two\n");
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/contents/plan_101.md")
                .query_param("ref", "feature/x");
            then.status(200)
                .json_body(json!({"content": wrapped, "encoding": "base64"}));
        });

        let text = client(&server)
            .file_content("plan_101.md", "feature/x")
            .expect("content");
        assert_eq!(text, "line one\nline two\n");
    }

    #[test]
    fn create_branch_posts_full_ref() {
        let server = MockServer::start();
        let refs = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/git/refs")
                .body_includes("\"ref\":\"refs/heads/feature/issue-1\"")
                .body_includes("\"sha\":\"abc123\"");
            then.status(201).json_body(json!({"ref": "refs/heads/feature/issue-1"}));
        });

        client(&server)
            .create_branch("feature/issue-1", "abc123")
            .expect("create");
        refs.assert();
    }

    #[test]
    fn create_pull_request_converts_linked_issue() {
        let server = MockServer::start();
        let pulls = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/acme/widgets/pulls")
                .body_includes("\"issue\":4")
                .body_includes("\"head\":\"feature/issue-4-104-1234\"")
                .body_includes("\"base\":\"main\"");
            then.status(201).json_body(json!({
                "number": 4,
                "title": "Add login",
                "body": "Automated PR for Issue #4",
                "html_url": "https://github.test/acme/widgets/pull/4",
                "state": "open",
                "head": {"ref": "feature/issue-4-104-1234"},
                "base": {"ref": "main"}
            }));
        });

        let created = client(&server)
            .create_pull_request(&NewPullRequest {
                title: "Add login".to_string(),
                head: "feature/issue-4-104-1234".to_string(),
                base: "main".to_string(),
                body: "Automated PR for Issue #4".to_string(),
                issue: Some(4),
            })
            .expect("create");
        pulls.assert();
        assert_eq!(created.number, 4);
        assert!(created.open);
    }

    #[test]
    fn truncate_for_error_respects_char_boundaries() {
        assert_eq!(truncate_for_error("short", 10), "short");
        assert_eq!(truncate_for_error("héllo", 2), "h...");
    }
}
