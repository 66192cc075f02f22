use std::future::Future;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use huddle_types::api::{ErrorBody, SendMessageRequest, UploadResponse};
use huddle_types::models::{Message, MessageTarget};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Page size for conversation snapshots.
pub const SNAPSHOT_LIMIT: u32 = 50;

/// The REST calls the client driver makes.
pub trait ChatApi: Send + Sync + 'static {
    fn fetch_conversation(&self, target: MessageTarget)
    -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn send_message(&self, request: SendMessageRequest) -> impl Future<Output = Result<Message>> + Send;

    fn mark_read(&self, message_id: Uuid) -> impl Future<Output = Result<()>> + Send;

    fn upload_file(&self, bytes: Vec<u8>) -> impl Future<Output = Result<UploadResponse>> + Send;
}

/// [`ChatApi`] over HTTP with a bearer token.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }
}

/// Turn a non-success response into [`ClientError::Api`], keeping the
/// server's message when it sent one.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    Ok(check(response).await?.json::<T>().await?)
}

impl ChatApi for HttpChatApi {
    async fn fetch_conversation(&self, target: MessageTarget) -> Result<Vec<Message>> {
        let path = format!("/conversations/{}/{}/messages", target.kind(), target.id());
        let response = self
            .authed(self.client.get(self.url(&path)))
            .query(&[("limit", SNAPSHOT_LIMIT)])
            .send()
            .await?;
        json(response).await
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Message> {
        let response = self
            .authed(self.client.post(self.url("/messages")))
            .json(&request)
            .send()
            .await?;
        json(response).await
    }

    async fn mark_read(&self, message_id: Uuid) -> Result<()> {
        let path = format!("/messages/{message_id}/read");
        let response = self.authed(self.client.post(self.url(&path))).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn upload_file(&self, bytes: Vec<u8>) -> Result<UploadResponse> {
        let response = self
            .authed(self.client.post(self.url("/files")))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        json(response).await
    }
}
