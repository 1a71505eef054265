use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use tokio::io::AsyncReadExt;
use tokio::time::{Duration, timeout};

use crate::error::{Error, Result};
use crate::k8s::ClusterClient;
use crate::model::{DirectoryListing, FileContent, FileEntry, FileKind};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

impl ClusterClient {
    /// Runs a command in the target container over a one-shot exec channel
    /// and resolves to its captured output. No stdin is attached; stdout and
    /// stderr accumulate independently until the channel reports completion.
    pub async fn exec_capture(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: Vec<String>,
    ) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client(), namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let capture = async {
            let mut attached = pods
                .exec(pod, command, &params)
                .await
                .map_err(|error| Error::Transport(error.to_string()))?;

            let mut stdout = attached
                .stdout()
                .ok_or_else(|| Error::Transport("exec channel is missing stdout".to_string()))?;
            let mut stderr = attached
                .stderr()
                .ok_or_else(|| Error::Transport("exec channel is missing stderr".to_string()))?;
            let status = attached.take_status();

            let (stdout_buf, stderr_buf, completion) = tokio::join!(
                async {
                    let mut buf = Vec::new();
                    let _ = stdout.read_to_end(&mut buf).await;
                    buf
                },
                async {
                    let mut buf = Vec::new();
                    let _ = stderr.read_to_end(&mut buf).await;
                    buf
                },
                async {
                    match status {
                        Some(status) => status.await,
                        None => None,
                    }
                },
            );

            let channel_error = attached.join().await.err().map(|error| error.to_string());
            settle(completion, channel_error, stdout_buf, stderr_buf)
        };

        match timeout(EXEC_TIMEOUT, capture).await {
            Ok(result) => result,
            // Dropping the timed-out future tears down the channel.
            Err(_) => Err(Error::Transport(format!(
                "exec did not complete within {}s",
                EXEC_TIMEOUT.as_secs()
            ))),
        }
    }

    pub async fn list_directory(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        path: &str,
    ) -> Result<DirectoryListing> {
        let command = vec!["ls".to_string(), "-lah".to_string(), path.to_string()];
        let raw = self.exec_capture(namespace, pod, container, command).await?;
        Ok(parse_listing(&raw, path))
    }

    pub async fn read_file(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        path: &str,
    ) -> Result<FileContent> {
        let command = vec!["cat".to_string(), path.to_string()];
        let content = self.exec_capture(namespace, pod, container, command).await?;
        Ok(FileContent {
            path: path.to_string(),
            size: content.len(),
            content,
        })
    }
}

/// Settles an exec channel exactly once. A delivered completion status wins
/// over a racing channel error; the channel error is only consulted when the
/// command never reached completion.
fn settle(
    completion: Option<Status>,
    channel_error: Option<String>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
) -> Result<String> {
    if completion.is_none() {
        let reason = channel_error
            .unwrap_or_else(|| "exec channel closed without a completion status".to_string());
        return Err(Error::Transport(reason));
    }

    if !stdout.is_empty() {
        return Ok(String::from_utf8_lossy(&stdout).into_owned());
    }
    if !stderr.is_empty() {
        let message = String::from_utf8_lossy(&stderr).trim_end().to_string();
        return Err(Error::RemoteCommand(message));
    }
    Ok(String::new())
}

/// Parses the output of `ls -lah` into structured entries. The column
/// heuristic (name at field 8 for 9+ fields, field 6 otherwise) does not
/// survive every locale's date format; it stays behind this function so
/// callers never see raw lines.
fn parse_listing(raw: &str, path: &str) -> DirectoryListing {
    let mut lines = raw
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .peekable();
    if lines.peek().is_some_and(|line| line.starts_with("total")) {
        lines.next();
    }

    let mut files = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }

        let permissions = fields[0];
        let kind = if permissions.starts_with('d') {
            FileKind::Directory
        } else {
            FileKind::File
        };

        let name_start = if fields.len() >= 9 { 8 } else { 6 };
        let name = fields[name_start..].join(" ");
        if name.is_empty() || name.starts_with('.') {
            continue;
        }

        let size = match kind {
            FileKind::File => leading_float(fields[4]),
            FileKind::Directory => None,
        };

        files.push(FileEntry {
            name,
            kind,
            permissions: permissions.to_string(),
            size,
        });
    }

    DirectoryListing {
        path: path.to_string(),
        files,
    }
}

/// Numeric prefix of a human-readable size token: `4.0K` → 4.0. The unit
/// suffix is dropped, a known precision limitation carried over from the
/// listing format itself.
fn leading_float(token: &str) -> Option<f64> {
    let end = token
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(token.len());
    token[..end].parse().ok()
}
