//! Jupyter REST backend.
//!
//! Notebooks are read and written whole through `/api/contents`. Writes keep
//! the document's metadata by re-reading it right before the PUT.

use std::collections::HashMap;
use std::time::Duration;

use notebook_model::{Cell, NotebookId};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::traits::{BackendError, NotebookBackend, SessionInfo};

/// Longest error body kept in a `BackendError::Status` message.
const MAX_ERROR_BODY: usize = 500;

/// Notebook backend talking to a Jupyter server over its REST API.
#[derive(Clone)]
pub struct JupyterRestBackend {
    client: Client,
    token: String,
}

/// An nbformat 4 document. Top-level fields other than cells and metadata
/// are carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NotebookDocument {
    #[serde(default)]
    cells: Vec<Cell>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    nbformat_minor: u32,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
struct ContentsModel {
    #[serde(default)]
    content: Option<NotebookDocument>,
}

#[derive(Debug, Deserialize)]
struct KernelSpecs {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    kernelspecs: HashMap<String, KernelSpecEntry>,
}

#[derive(Debug, Deserialize)]
struct KernelSpecEntry {
    spec: KernelSpecBody,
}

#[derive(Debug, Deserialize)]
struct KernelSpecBody {
    display_name: Option<String>,
    language: Option<String>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct SessionModel {
    id: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    notebook: Option<SessionNotebook>,
    kernel: KernelModel,
}

#[derive(Debug, Deserialize)]
struct SessionNotebook {
    path: String,
}

#[derive(Debug, Deserialize)]
struct KernelModel {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

impl From<SessionModel> for SessionInfo {
    fn from(model: SessionModel) -> Self {
        let path = model
            .path
            .or_else(|| model.notebook.map(|nb| nb.path))
            .unwrap_or_default();
        SessionInfo {
            id: model.id,
            path,
            kernel_id: model.kernel.id,
            kernel_name: model.kernel.name,
        }
    }
}

/// Default kernel resolved from `/api/kernelspecs`.
struct DefaultKernel {
    name: String,
    kernelspec: Value,
    language_info: Value,
}

impl JupyterRestBackend {
    /// Create a backend authenticating with `token`. Every request is bounded by `timeout`.
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    fn auth_header(&self) -> String {
        format!("token {}", self.token)
    }

    fn contents_url(server_url: &str, notebook: &NotebookId) -> String {
        let encoded: Vec<String> = notebook
            .as_str()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/api/contents/{}", base(server_url), encoded.join("/"))
    }

    async fn get(&self, url: &str) -> Result<Response, BackendError> {
        tracing::debug!("GET {}", url);
        self.client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| request_error(url, e))
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &Value,
    ) -> Result<Response, BackendError> {
        tracing::debug!("{} {}", method, url);
        let response = self
            .client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.auth_header())
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;
        ensure_success(url, response).await
    }

    async fn read_document(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<NotebookDocument, BackendError> {
        let url = Self::contents_url(server_url, notebook);
        let response = self.get(&format!("{}?content=1", url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                path: notebook.to_string(),
            });
        }
        let response = ensure_success(&url, response).await?;
        let model: ContentsModel = decode(&url, response).await?;
        model.content.ok_or_else(|| BackendError::Decode {
            url,
            message: "contents model has no notebook content".to_string(),
        })
    }

    async fn write_document(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        document: &NotebookDocument,
    ) -> Result<(), BackendError> {
        let url = Self::contents_url(server_url, notebook);
        let body = json!({ "type": "notebook", "format": "json", "content": document });
        self.send_json(reqwest::Method::PUT, &url, &body).await?;
        Ok(())
    }

    async fn default_kernel(&self, server_url: &str) -> Result<DefaultKernel, BackendError> {
        let url = format!("{}/api/kernelspecs", base(server_url));
        let response = ensure_success(&url, self.get(&url).await?).await?;
        let specs: KernelSpecs = decode(&url, response).await?;

        let name = specs.default.unwrap_or_else(|| "python3".to_string());
        let entry = specs
            .kernelspecs
            .get(&name)
            .ok_or_else(|| BackendError::Decode {
                url: url.clone(),
                message: format!("default kernel '{}' not found in available kernelspecs", name),
            })?;

        let language = entry
            .spec
            .language
            .clone()
            .unwrap_or_else(|| "python".to_string());
        let mut language_info = json!({ "name": language });
        if let Some(version) = entry.spec.metadata.pointer("/interpreter/version") {
            language_info["version"] = version.clone();
        }

        Ok(DefaultKernel {
            kernelspec: json!({
                "display_name": entry.spec.display_name.clone().unwrap_or_else(|| "Python 3".to_string()),
                "language": language,
                "name": name.clone(),
            }),
            language_info,
            name,
        })
    }
}

#[async_trait::async_trait]
impl NotebookBackend for JupyterRestBackend {
    async fn fetch_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<Vec<Cell>, BackendError> {
        let document = self.read_document(server_url, notebook).await?;
        tracing::debug!("Loaded {} with {} cells", notebook, document.cells.len());
        Ok(document.cells)
    }

    async fn persist_cells(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError> {
        let mut document = self.read_document(server_url, notebook).await?;
        document.cells = cells;
        self.write_document(server_url, notebook, &document).await?;
        tracing::debug!("Saved {} ({} cells)", notebook, document.cells.len());
        Ok(())
    }

    async fn notebook_exists(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<bool, BackendError> {
        let url = Self::contents_url(server_url, notebook);
        let response = self.get(&format!("{}?content=0", url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(&url, response).await?;
        Ok(true)
    }

    async fn create_notebook(
        &self,
        server_url: &str,
        notebook: &NotebookId,
        cells: Vec<Cell>,
    ) -> Result<(), BackendError> {
        let kernel = self.default_kernel(server_url).await?;
        let mut metadata = Map::new();
        metadata.insert("kernelspec".to_string(), kernel.kernelspec);
        metadata.insert("language_info".to_string(), kernel.language_info);

        let document = NotebookDocument {
            cells,
            metadata,
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
            extra: Map::new(),
        };
        self.write_document(server_url, notebook, &document).await?;
        tracing::info!("Created notebook {} (kernel {})", notebook, kernel.name);
        Ok(())
    }

    async fn list_sessions(&self, server_url: &str) -> Result<Vec<SessionInfo>, BackendError> {
        let url = format!("{}/api/sessions", base(server_url));
        let response = ensure_success(&url, self.get(&url).await?).await?;
        let sessions: Vec<SessionModel> = decode(&url, response).await?;
        Ok(sessions.into_iter().map(SessionInfo::from).collect())
    }

    async fn start_session(
        &self,
        server_url: &str,
        notebook: &NotebookId,
    ) -> Result<SessionInfo, BackendError> {
        let kernel = self.default_kernel(server_url).await?;
        let url = format!("{}/api/sessions", base(server_url));
        let body = json!({
            "path": notebook.as_str(),
            "name": notebook.file_name(),
            "type": "notebook",
            "kernel": { "name": kernel.name },
        });
        let response = self.send_json(reqwest::Method::POST, &url, &body).await?;
        let session: SessionModel = decode(&url, response).await?;
        let session = SessionInfo::from(session);
        tracing::info!("Started kernel {} for {}", session.kernel_id, notebook);
        Ok(session)
    }
}

fn base(server_url: &str) -> &str {
    server_url.trim_end_matches('/')
}

fn request_error(url: &str, e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout {
            url: url.to_string(),
        }
    } else {
        BackendError::Http {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

async fn ensure_success(url: &str, response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut message = response.text().await.unwrap_or_default();
    if message.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| message.is_char_boundary(*i))
            .unwrap_or(0);
        message.truncate(cut);
    }
    Err(BackendError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    url: &str,
    response: Response,
) -> Result<T, BackendError> {
    response.json::<T>().await.map_err(|e| {
        if e.is_timeout() {
            BackendError::Timeout {
                url: url.to_string(),
            }
        } else {
            BackendError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    })
}
