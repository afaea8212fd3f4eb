//! NATS subscriptions for incoming serving requests

use crate::config::NatsConfig;
use crate::service::ServingService;
use anyhow::Result;
use async_nats::{Client, Message};
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use tracing::info;

/// Request kinds, one NATS subject each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Predict,
    Reload,
    Drift,
    Info,
    Versions,
}

impl Endpoint {
    /// Run the matching service handler and return the reply payload
    pub async fn handle(self, service: &ServingService, payload: &[u8]) -> Vec<u8> {
        match self {
            Endpoint::Predict => service.handle_predict(payload).await,
            Endpoint::Reload => service.handle_reload(payload).await,
            Endpoint::Drift => service.handle_drift().await,
            Endpoint::Info => service.handle_info(),
            Endpoint::Versions => service.handle_versions().await,
        }
    }
}

/// Subject for every endpoint
pub fn routes(nats: &NatsConfig) -> Vec<(Endpoint, String)> {
    vec![
        (Endpoint::Predict, nats.predict_subject.clone()),
        (Endpoint::Reload, nats.reload_subject.clone()),
        (Endpoint::Drift, nats.drift_subject.clone()),
        (Endpoint::Info, nats.info_subject.clone()),
        (Endpoint::Versions, nats.versions_subject.clone()),
    ]
}

/// Consumer receiving requests for every endpoint from NATS
pub struct RequestConsumer {
    client: Client,
    routes: Vec<(Endpoint, String)>,
}

impl RequestConsumer {
    pub fn new(client: Client, nats: &NatsConfig) -> Self {
        Self {
            client,
            routes: routes(nats),
        }
    }

    /// Subscribe to every endpoint subject and merge the messages
    pub async fn subscribe(&self) -> Result<SelectAll<BoxStream<'static, (Endpoint, Message)>>> {
        let mut streams = Vec::with_capacity(self.routes.len());
        for (endpoint, subject) in &self.routes {
            let endpoint = *endpoint;
            let subscriber = self.client.subscribe(subject.clone()).await?;
            info!(subject = %subject, endpoint = ?endpoint, "Subscribed");
            streams.push(subscriber.map(move |message| (endpoint, message)).boxed());
        }
        Ok(stream::select_all(streams))
    }

    pub fn routes(&self) -> &[(Endpoint, String)] {
        &self.routes
    }
}
