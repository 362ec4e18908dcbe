use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// In-memory transport for testing or local pipelines.
///
/// Records every request in a shared queue and answers with scripted
/// responses in FIFO order. With no response scripted, `send_request` fails,
/// which is how tests exercise the transport-failure path.
#[derive(Clone, Default)]
pub struct InMemory {
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    responses: Arc<Mutex<VecDeque<HttpResponse>>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next response, oldest-first.
    pub async fn push_response(&self, response: HttpResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Return all requests that have been "sent" and clear the record.
    pub async fn sent_requests(&self) -> Vec<HttpRequest> {
        let mut requests = self.requests.lock().await;
        std::mem::take(&mut *requests)
    }
}

#[async_trait]
impl Transport for InMemory {
    #[tracing::instrument(skip_all, fields(url = %request.url))]
    async fn send_request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TransportError::new("no scripted response left"))
    }
}
