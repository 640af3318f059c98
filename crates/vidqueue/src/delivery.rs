//! Client-facing view of jobs and their progress.
//!
//! A [`DeliveryConnection`] is created per client connection (WebSocket,
//! SSE, ...). It owns its own tracker subscription, so closing one
//! connection never affects another. Transports feed it raw JSON text and
//! forward the [`ServerMessage`]s it produces.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::Job;
use crate::progress::{ProgressSubscription, ProgressUpdate, TrackerEvent};
use crate::queue::JobQueue;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} belongs to another account")]
    Forbidden(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Messages accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Without a job id, subscribes to every job of the connection's owner.
    Subscribe {
        #[serde(default, rename = "jobId")]
        job_id: Option<String>,
    },
    /// Without a job id, drops every subscription of the connection.
    Unsubscribe {
        #[serde(default, rename = "jobId")]
        job_id: Option<String>,
    },
}

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    Unsubscribed {
        #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
    },
    Progress(ProgressUpdate),
    Cleared {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            log::error!("Failed to serialize server message: {}", e);
            r#"{"type":"error","message":"internal error"}"#.to_string()
        })
    }
}

/// A job together with its latest progress snapshot, for polling clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressUpdate>,
}

fn owned_job(queue: &JobQueue, owner_id: &str, job_id: &str) -> Result<Job, DeliveryError> {
    let job = queue
        .get(job_id)
        .ok_or_else(|| DeliveryError::NotFound(job_id.to_string()))?;
    if job.owner_id != owner_id {
        return Err(DeliveryError::Forbidden(job_id.to_string()));
    }
    Ok(job)
}

/// Looks up one job on behalf of `owner_id`.
pub fn job_view(queue: &JobQueue, owner_id: &str, job_id: &str) -> Result<JobView, DeliveryError> {
    let job = owned_job(queue, owner_id, job_id)?;
    let progress = queue.tracker().get(job_id);
    Ok(JobView { job, progress })
}

/// Every job of `owner_id` in submission order.
pub fn list_views(queue: &JobQueue, owner_id: &str) -> Vec<JobView> {
    queue
        .list_by_owner(owner_id)
        .into_iter()
        .map(|job| {
            let progress = queue.tracker().get(&job.id);
            JobView { job, progress }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    /// Every job of the owner except the ones unsubscribed one by one.
    AllOwned { except: HashSet<String> },
    Jobs(HashSet<String>),
}

/// Subscription state of one client connection.
pub struct DeliveryConnection {
    owner_id: String,
    queue: JobQueue,
    subscription: Option<ProgressSubscription>,
    scope: Scope,
    /// Ownership already resolved for a job id. Survives removal of the job
    /// from the queue, so its `cleared` event still reaches the owner.
    ownership: HashMap<String, bool>,
}

impl DeliveryConnection {
    pub fn new(queue: JobQueue, owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            queue,
            subscription: None,
            scope: Scope::Jobs(HashSet::new()),
            ownership: HashMap::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Parses and handles one raw client message. Failures become `error`
    /// messages instead of closing the connection.
    pub fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let result = serde_json::from_str::<ClientMessage>(text)
            .map_err(|e| DeliveryError::InvalidMessage(e.to_string()))
            .and_then(|message| self.handle(message));
        match result {
            Ok(replies) => replies,
            Err(e) => {
                log::debug!("Rejected message from {}: {}", self.owner_id, e);
                vec![ServerMessage::Error {
                    message: e.to_string(),
                }]
            }
        }
    }

    pub fn handle(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>, DeliveryError> {
        match message {
            ClientMessage::Subscribe { job_id: None } => {
                self.ensure_subscribed();
                for job in self.queue.list_by_owner(&self.owner_id) {
                    self.ownership.insert(job.id, true);
                }
                self.scope = Scope::AllOwned {
                    except: HashSet::new(),
                };
                Ok(vec![ServerMessage::Subscribed { job_id: None }])
            }
            ClientMessage::Subscribe {
                job_id: Some(job_id),
            } => {
                owned_job(&self.queue, &self.owner_id, &job_id)?;
                self.ensure_subscribed();
                self.ownership.insert(job_id.clone(), true);
                match &mut self.scope {
                    Scope::Jobs(jobs) => {
                        jobs.insert(job_id.clone());
                    }
                    Scope::AllOwned { except } => {
                        except.remove(&job_id);
                    }
                }

                let mut replies = vec![ServerMessage::Subscribed {
                    job_id: Some(job_id.clone()),
                }];
                if let Some(snapshot) = self.queue.tracker().get(&job_id) {
                    replies.push(ServerMessage::Progress(snapshot));
                }
                Ok(replies)
            }
            ClientMessage::Unsubscribe { job_id: None } => {
                self.close();
                Ok(vec![ServerMessage::Unsubscribed { job_id: None }])
            }
            ClientMessage::Unsubscribe {
                job_id: Some(job_id),
            } => {
                match &mut self.scope {
                    Scope::Jobs(jobs) => {
                        jobs.remove(&job_id);
                        if jobs.is_empty() {
                            self.close();
                        }
                    }
                    Scope::AllOwned { except } => {
                        except.insert(job_id.clone());
                    }
                }
                Ok(vec![ServerMessage::Unsubscribed {
                    job_id: Some(job_id),
                }])
            }
        }
    }

    fn ensure_subscribed(&mut self) {
        if self.subscription.is_none() {
            self.subscription = Some(self.queue.tracker().subscribe());
        }
    }

    /// Drops this connection's tracker subscription.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.queue.tracker().unsubscribe(subscription);
        }
        self.scope = Scope::Jobs(HashSet::new());
        self.ownership.clear();
    }

    fn wants(&mut self, job_id: &str) -> bool {
        match &self.scope {
            Scope::Jobs(jobs) => return jobs.contains(job_id),
            Scope::AllOwned { except } if except.contains(job_id) => return false,
            Scope::AllOwned { .. } => {}
        }
        self.owns(job_id)
    }

    fn owns(&mut self, job_id: &str) -> bool {
        if let Some(&owned) = self.ownership.get(job_id) {
            return owned;
        }
        // Unknown ids are not cached: the job is gone and was never seen here.
        let Some(job) = self.queue.get(job_id) else {
            return false;
        };
        let owned = job.owner_id == self.owner_id;
        self.ownership.insert(job.id, owned);
        owned
    }

    fn to_message(&mut self, event: TrackerEvent) -> ServerMessage {
        match event {
            TrackerEvent::Progress(update) => ServerMessage::Progress(update),
            TrackerEvent::Cleared { job_id } => {
                self.ownership.remove(&job_id);
                ServerMessage::Cleared { job_id }
            }
        }
    }

    /// Waits for the next event in this connection's scope.
    ///
    /// Returns `None` when the connection is not subscribed.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let event = self.subscription.as_mut()?.recv().await?;
            if self.wants(event.job_id()) {
                return Some(self.to_message(event));
            }
        }
    }

    /// Returns the next already buffered event in scope, without waiting.
    pub fn try_next_message(&mut self) -> Option<ServerMessage> {
        loop {
            let event = self.subscription.as_mut()?.try_recv()?;
            if self.wants(event.job_id()) {
                return Some(self.to_message(event));
            }
        }
    }
}
