//! HTTP clients for the collaborating services.

pub mod content_store;
pub mod directory;
pub mod membership;
pub mod notifier;

use {
    crate::domain::error::PipelineError,
    reqwest::{Client, RequestBuilder, Response, StatusCode},
    serde::de::DeserializeOwned,
    std::time::Duration,
};

/// Base URL plus bearer token for one upstream service.
#[derive(Clone)]
pub struct ServiceClient {
    name: &'static str,
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl ServiceClient {
    pub fn new(
        name: &'static str,
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::upstream(name, e.to_string()))?;
        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(self.url(path)))
    }

    /// GET with the caller's own token instead of the service token.
    pub fn get_as(&self, path: &str, bearer: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(bearer)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(self.url(path)))
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.patch(self.url(path)))
    }

    /// Sends and rejects any non-2xx answer.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, PipelineError> {
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::upstream(self.name, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::upstream(
                self.name,
                format!("{status}: {}", truncate(&body, 300)),
            ));
        }
        Ok(response)
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PipelineError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PipelineError::upstream(self.name, format!("decode: {e}")))
    }

    /// Like [`send_json`](Self::send_json) but maps 404 to `None`.
    pub async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, PipelineError> {
        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::upstream(self.name, e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| PipelineError::upstream(self.name, format!("decode: {e}"))),
            status => Err(PipelineError::upstream(self.name, status.to_string())),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
