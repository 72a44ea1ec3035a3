// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scripted transport double for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Request, Response, Transport, TransportError};

/// Replays queued responses per request target.
///
/// The last queued response for a target is repeated once the queue would
/// otherwise run dry, so a poll loop can be scripted with a few entries.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<Response, TransportError>>>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, target: &str, status: u16, body: impl Into<Vec<u8>>) -> &Self {
        self.push(target, Ok(Response::new(status, body)))
    }

    pub(crate) fn fail(&self, target: &str, err: TransportError) -> &Self {
        self.push(target, Err(err))
    }

    fn push(&self, target: &str, outcome: Result<Response, TransportError>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self, target: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.target == target)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let target = request.target.clone();
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(&target) else {
            return Err(TransportError::Connect(format!("no route scripted for {target}")));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Other("empty script".to_string())))
        }
    }
}
