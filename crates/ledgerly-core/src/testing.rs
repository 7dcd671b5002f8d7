//! Scripted transport for exercising session logic without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{ApiError, ApiReply, ApiRequest, Method, Transport};

#[derive(Default)]
struct Script {
    replies: HashMap<(Method, String), VecDeque<ApiReply>>,
    requests: Vec<ApiRequest>,
}

/// Replies are queued per (method, path). The last queued reply for a
/// route is repeated once the queue is down to one; unscripted routes
/// answer 404.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, method: Method, path: &str, status: u16, body: Value) {
        let mut script = self.script.lock().unwrap();
        script
            .replies
            .entry((method, path.to_string()))
            .or_default()
            .push_back(ApiReply::new(status, body));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.script.lock().unwrap().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method.as_str(), r.path))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiReply, ApiError> {
        let mut script = self.script.lock().unwrap();
        let key = (request.method, request.path.clone());
        script.requests.push(request);
        let reply = match script.replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(reply.unwrap_or_else(|| ApiReply::new(404, json!({ "detail": "Not found." }))))
    }
}
