//! HTTP backend for the test-management server
//!
//! Talks to the server's REST API with a bearer token obtained at sign-in.

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::{
    CollectionHandle, CollectionPath, Credentials, ExecutionHandle, RemoteBackend, RemoteTest,
    RunDetails, RunMode, StatusReport,
};
use crate::models::TestParameter;

/// Remote backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Server returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Not connected to a server")]
    NotConnected,
}

#[derive(Serialize)]
struct SignIn<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

#[derive(Deserialize)]
struct Session {
    token: String,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    tests: Vec<&'a str>,
    run_mode: &'a RunMode,
    parameters: &'a [TestParameter],
}

struct Connection {
    server: String,
    api: String,
    token: String,
}

/// REST client for the test-management server
pub struct HttpBackend {
    client: Client,
    timeout_secs: u64,
    connection: Option<Connection>,
}

impl HttpBackend {
    pub fn new(insecure_tls: bool) -> Result<Self> {
        Self::with_timeout(30, insecure_tls)
    }

    /// Build the client; certificates are verified unless `insecure_tls` is set
    pub fn with_timeout(timeout_secs: u64, insecure_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_secs,
            connection: None,
        })
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!(BackendError::NotConnected))
    }

    fn api_url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.connection()?.api, path))
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder> {
        Ok(builder.bearer_auth(&self.connection()?.token))
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<Response> {
        debug!("Sending request to {}", url);
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!(BackendError::Timeout(self.timeout_secs))
            } else if e.is_connect() {
                anyhow::anyhow!(BackendError::ConnectionRefused(url.to_string()))
            } else {
                anyhow::anyhow!(BackendError::RequestFailed(e.to_string()))
            }
        })
    }

    /// Fails on any non-success status
    fn check(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(anyhow::anyhow!(BackendError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }))
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Option<T>> {
        let url = self.api_url(path)?;
        let response = self
            .send(self.authorized(self.client.get(&url))?, &url)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check(response, &url)?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode response from {url}"))?;
        Ok(Some(body))
    }
}

impl RemoteBackend for HttpBackend {
    async fn connect(&mut self, server: &str, credentials: &Credentials) -> Result<bool> {
        let server = server.trim_end_matches('/').to_string();
        let url = format!("{server}/api/authentication/sign-in");

        let body = if credentials.uses_api_key() {
            SignIn {
                user: None,
                password: None,
                client_id: credentials.client_id.as_deref(),
                secret: credentials.api_key.as_deref(),
            }
        } else {
            SignIn {
                user: Some(&credentials.user),
                password: Some(credentials.password.as_deref().unwrap_or_default()),
                client_id: None,
                secret: None,
            }
        };

        let response = self.send(self.client.post(&url).json(&body), &url).await?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(false);
        }
        let session: Session = Self::check(response, &url)?
            .json()
            .await
            .context("Failed to decode sign-in response")?;

        self.connection = Some(Connection {
            api: format!(
                "{server}/api/domains/{}/projects/{}",
                credentials.domain, credentials.project
            ),
            server,
            token: session.token,
        });
        Ok(true)
    }

    async fn resolve_collection(&self, path: &CollectionPath) -> Result<Option<CollectionHandle>> {
        let url = self.api_url("/collections")?;
        let request = self
            .authorized(self.client.get(&url))?
            .query(&[("folder", path.folder.as_str()), ("name", path.name.as_str())]);
        let response = self.send(request, &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let handle = Self::check(response, &url)?
            .json()
            .await
            .context("Failed to decode collection")?;
        Ok(Some(handle))
    }

    async fn list_tests(&self, collection: &CollectionHandle) -> Result<Vec<RemoteTest>> {
        let tests = self
            .get_json(&format!("/collections/{}/tests", collection.id))
            .await?;
        Ok(tests.unwrap_or_default())
    }

    async fn start(
        &self,
        collection: &CollectionHandle,
        tests: &[RemoteTest],
        mode: &RunMode,
        parameters: &[TestParameter],
    ) -> Result<ExecutionHandle> {
        let url = self.api_url(&format!("/collections/{}/executions", collection.id))?;
        let body = StartRequest {
            tests: tests.iter().map(|t| t.id.as_str()).collect(),
            run_mode: mode,
            parameters,
        };
        let response = self
            .send(self.authorized(self.client.post(&url))?.json(&body), &url)
            .await?;
        Self::check(response, &url)?
            .json()
            .await
            .context("Failed to decode execution")
    }

    async fn refresh_status(&self, execution: &ExecutionHandle) -> Result<StatusReport> {
        self.get_json(&format!("/executions/{}", execution.id))
            .await?
            .with_context(|| format!("Execution {} not found", execution.id))
    }

    async fn run_details(&self, test_id: &str) -> Result<RunDetails> {
        let details = self
            .get_json(&format!("/test-instances/{test_id}/last-run"))
            .await?;
        Ok(details.unwrap_or_default())
    }

    async fn stop(&self, execution: &ExecutionHandle) -> Result<()> {
        let url = self.api_url(&format!("/executions/{}/stop", execution.id))?;
        let response = self.send(self.authorized(self.client.post(&url))?, &url).await?;
        Self::check(response, &url)?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        let url = format!("{}/api/authentication/sign-out", connection.server);
        let request = self.client.post(&url).bearer_auth(&connection.token);
        let response = self.send(request, &url).await?;
        Self::check(response, &url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answers one connection per canned response and returns the request lines
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let head = read_request(&mut socket).await;
                requests.push(head.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::from_utf8_lossy(&buf).to_string();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < end + 4 + length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                return head;
            }
        }
    }

    fn credentials() -> Credentials {
        let mut credentials = Credentials::new("qa", "DEFAULT", "Shop");
        credentials.password = Some("secret".into());
        credentials
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let backend = HttpBackend::new(false).unwrap();
        let path = CollectionPath::parse("Root\\Set").unwrap();
        let err = backend.resolve_collection(&path).await.unwrap_err();
        assert!(err.to_string().contains("Not connected"));
    }

    #[tokio::test]
    async fn test_insecure_client_still_talks_to_server() {
        let (server, _requests) = serve(vec![(401, "{}")]).await;
        let mut backend = HttpBackend::with_timeout(5, true).unwrap();
        assert!(!backend.connect(&server, &credentials()).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_sign_in() {
        let (server, requests) = serve(vec![(401, "{}")]).await;
        let mut backend = HttpBackend::new(false).unwrap();
        assert!(!backend.connect(&server, &credentials()).await.unwrap());
        assert_eq!(
            requests.await.unwrap(),
            vec!["POST /api/authentication/sign-in HTTP/1.1"]
        );
    }

    #[tokio::test]
    async fn test_resolve_and_list() {
        let (server, requests) = serve(vec![
            (200, r#"{"token": "abc"}"#),
            (404, ""),
            (200, r#"{"id": "12", "name": "Nightly"}"#),
            (200, r#"[{"id": "1", "name": "[1]login", "last_status": "Passed"}]"#),
        ])
        .await;

        let mut backend = HttpBackend::new(false).unwrap();
        assert!(backend.connect(&server, &credentials()).await.unwrap());

        let path = CollectionPath::parse("Root\\Nightly").unwrap();
        assert!(backend.resolve_collection(&path).await.unwrap().is_none());

        let handle = backend.resolve_collection(&path).await.unwrap().unwrap();
        assert_eq!(handle.id, "12");

        let tests = backend.list_tests(&handle).await.unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].last_status, "Passed");

        let requests = requests.await.unwrap();
        assert_eq!(
            requests[1],
            "GET /api/domains/DEFAULT/projects/Shop/collections?folder=Root&name=Nightly HTTP/1.1"
        );
        assert_eq!(
            requests[3],
            "GET /api/domains/DEFAULT/projects/Shop/collections/12/tests HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let (server, _requests) = serve(vec![(200, r#"{"token": "abc"}"#), (500, "")]).await;
        let mut backend = HttpBackend::new(false).unwrap();
        backend.connect(&server, &credentials()).await.unwrap();

        let err = backend
            .stop(&ExecutionHandle { id: "9".into() })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Server returned 500"));
    }
}
