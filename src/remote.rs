use async_trait::async_trait;

use crate::models::{Subtask, Task, TaskList};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The request never produced a response (offline, DNS, timeout, ...).
    Transport(String),
    Status { status: u16, body: String },
    Decode(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transport(message) => write!(f, "transport error: {message}"),
            RemoteError::Status { status, body } => write!(f, "http {status}: {body}"),
            RemoteError::Decode(message) => write!(f, "decode error: {message}"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    /// The server rejected the change itself; retrying the same request cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => {
                (400..500).contains(status) && !matches!(status, 401 | 403 | 408 | 429)
            }
            RemoteError::Transport(_) | RemoteError::Decode(_) => false,
        }
    }

    /// Credentials were refused. The change itself may be fine once the user signs in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Status { status: 401 | 403, .. })
    }
}

/// CRUD surface of the hosted backend. Create and update calls return the canonical
/// server copy, which replaces the optimistic local write.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn fetch_tasks(&self) -> Result<Vec<Task>, RemoteError>;
    async fn fetch_lists(&self) -> Result<Vec<TaskList>, RemoteError>;
    async fn create_task(&self, task: &Task) -> Result<Task, RemoteError>;
    async fn update_task(&self, task: &Task) -> Result<Task, RemoteError>;
    async fn delete_task(&self, task_id: &str) -> Result<(), RemoteError>;
    async fn create_list(&self, list: &TaskList) -> Result<TaskList, RemoteError>;
    async fn update_list(&self, list: &TaskList) -> Result<TaskList, RemoteError>;
    async fn delete_list(&self, list_id: &str) -> Result<(), RemoteError>;
    async fn add_subtask(&self, subtask: &Subtask) -> Result<Subtask, RemoteError>;
    async fn delete_subtask(&self, task_id: &str, subtask_id: &str) -> Result<(), RemoteError>;
}

#[cfg(feature = "remote")]
pub use http::HttpBackend;

#[cfg(feature = "remote")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, RequestBuilder};
    use serde::de::DeserializeOwned;

    use super::{RemoteBackend, RemoteError};
    use crate::config::RemoteConfig;
    use crate::models::{Subtask, Task, TaskList};

    /// REST client: `{base}/tasks`, `{base}/lists`, `{base}/tasks/{id}/subtasks`.
    pub struct HttpBackend {
        client: Client,
        base_url: String,
        token: Option<String>,
    }

    impl HttpBackend {
        pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
            let client = Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|err| RemoteError::Transport(format!("failed to build http client: {err}")))?;
            Ok(Self {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                token: config.token.clone(),
            })
        }

        fn url(&self, path: &str) -> String {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }

        fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
            match &self.token {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            }
        }

        async fn send(&self, builder: RequestBuilder) -> Result<String, RemoteError> {
            let resp = self
                .authed(builder)
                .send()
                .await
                .map_err(|err| RemoteError::Transport(err.to_string()))?;
            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|err| RemoteError::Transport(format!("failed to read response: {err}")))?;
            if !status.is_success() {
                return Err(RemoteError::Status {
                    status: status.as_u16(),
                    body: text,
                });
            }
            Ok(text)
        }

        async fn send_json<T: DeserializeOwned>(
            &self,
            builder: RequestBuilder,
        ) -> Result<T, RemoteError> {
            let text = self.send(builder).await?;
            serde_json::from_str(&text).map_err(|err| RemoteError::Decode(err.to_string()))
        }
    }

    #[async_trait]
    impl RemoteBackend for HttpBackend {
        async fn fetch_tasks(&self) -> Result<Vec<Task>, RemoteError> {
            self.send_json(self.client.get(self.url("tasks"))).await
        }

        async fn fetch_lists(&self) -> Result<Vec<TaskList>, RemoteError> {
            self.send_json(self.client.get(self.url("lists"))).await
        }

        async fn create_task(&self, task: &Task) -> Result<Task, RemoteError> {
            self.send_json(self.client.post(self.url("tasks")).json(task))
                .await
        }

        async fn update_task(&self, task: &Task) -> Result<Task, RemoteError> {
            let url = self.url(&format!("tasks/{}", task.id));
            self.send_json(self.client.put(url).json(task)).await
        }

        async fn delete_task(&self, task_id: &str) -> Result<(), RemoteError> {
            let url = self.url(&format!("tasks/{task_id}"));
            self.send(self.client.delete(url)).await.map(|_| ())
        }

        async fn create_list(&self, list: &TaskList) -> Result<TaskList, RemoteError> {
            self.send_json(self.client.post(self.url("lists")).json(list))
                .await
        }

        async fn update_list(&self, list: &TaskList) -> Result<TaskList, RemoteError> {
            let url = self.url(&format!("lists/{}", list.id));
            self.send_json(self.client.put(url).json(list)).await
        }

        async fn delete_list(&self, list_id: &str) -> Result<(), RemoteError> {
            let url = self.url(&format!("lists/{list_id}"));
            self.send(self.client.delete(url)).await.map(|_| ())
        }

        async fn add_subtask(&self, subtask: &Subtask) -> Result<Subtask, RemoteError> {
            let url = self.url(&format!("tasks/{}/subtasks", subtask.task_id));
            self.send_json(self.client.post(url).json(subtask)).await
        }

        async fn delete_subtask(&self, task_id: &str, subtask_id: &str) -> Result<(), RemoteError> {
            let url = self.url(&format!("tasks/{task_id}/subtasks/{subtask_id}"));
            self.send(self.client.delete(url)).await.map(|_| ())
        }
    }
}
