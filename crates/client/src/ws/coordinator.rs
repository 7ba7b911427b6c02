//! Keeps a socket and its subscriptions alive for a changing set of topics.
//!
//! Everything the coordinator reacts to (handle commands, socket events,
//! handshake and snapshot completion, the reconnect timer) is handled by one
//! task in one `select!` loop, so its state needs no locks.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use homewire_shared::{EntityUpdate, Snapshot, StartPayload, SubscriptionId, GRAPHQL_WS_PROTOCOL};
use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use url::Url;

use super::connection::{ConnectionManager, PendingConnect};
use super::reconnect::Backoff;
use super::transport::{ConnectRequest, ConnectionId, EventSender, Transport, TransportEvent};
use crate::auth::{self, CredentialSource};
use crate::config::{AuthPlacement, ClientConfig};
use crate::error::{ConfigError, ConnectionError, CoordinatorStopped};

/// Produces the full state for a set of topics, e.g. over HTTP.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_snapshot(&self, topics: &[String]) -> anyhow::Result<Snapshot>;
}

pub type SnapshotListener = Box<dyn Fn(&Snapshot) + Send>;
pub type LiveStatusListener = Box<dyn Fn(bool) + Send>;

enum Command {
    SetDesiredTopics(Vec<String>),
    OnSnapshotChanged(SnapshotListener),
    OnLiveStatusChanged(LiveStatusListener),
    Teardown,
}

/// Produced while a connection is being driven and handled right after.
enum Inbound {
    TopicData {
        connection: ConnectionId,
        topic: String,
        payload: Value,
    },
    Completed {
        connection: ConnectionId,
        id: SubscriptionId,
        topic: String,
    },
    Disconnected(ConnectionId),
}

/// Controls a running coordinator. Dropping it tears the coordinator down.
#[derive(Debug)]
pub struct CoordinatorHandle {
    commands: UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn set_desired_topics<I, S>(&self, topics: I) -> Result<(), CoordinatorStopped>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics = topics.into_iter().map(Into::into).collect();
        self.send(Command::SetDesiredTopics(topics))
    }

    /// Called with the full snapshot after every fetch and every applied update.
    pub fn on_snapshot_changed(
        &self,
        listener: impl Fn(&Snapshot) + Send + 'static,
    ) -> Result<(), CoordinatorStopped> {
        self.send(Command::OnSnapshotChanged(Box::new(listener)))
    }

    /// Called with `true` once subscriptions are live and `false` when they
    /// are lost or shut down.
    pub fn on_live_status_changed(
        &self,
        listener: impl Fn(bool) + Send + 'static,
    ) -> Result<(), CoordinatorStopped> {
        self.send(Command::OnLiveStatusChanged(Box::new(listener)))
    }

    /// Stop subscriptions, close the socket and cancel any pending reconnect.
    /// Safe to call at any time, including repeatedly.
    pub fn teardown(&self) {
        let _ = self.send(Command::Teardown);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the coordinator task to exit.
    pub async fn join(self) -> Result<(), JoinError> {
        let Self { commands, task } = self;
        drop(commands);
        task.await
    }

    fn send(&self, command: Command) -> Result<(), CoordinatorStopped> {
        self.commands.send(command).map_err(|_| CoordinatorStopped)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::SetDesiredTopics(topics) => f.debug_tuple("SetDesiredTopics").field(topics).finish(),
            Command::OnSnapshotChanged(_) => f.write_str("OnSnapshotChanged"),
            Command::OnLiveStatusChanged(_) => f.write_str("OnLiveStatusChanged"),
            Command::Teardown => f.write_str("Teardown"),
        }
    }
}

pub struct SubscriptionCoordinator {
    config: ClientConfig,
    endpoint: Url,
    transport: Arc<dyn Transport>,
    source: Arc<dyn SnapshotSource>,
    credentials: Arc<dyn CredentialSource>,

    commands: UnboundedReceiver<Command>,
    socket_tx: UnboundedSender<(ConnectionId, TransportEvent)>,
    socket_rx: UnboundedReceiver<(ConnectionId, TransportEvent)>,
    inbound_tx: UnboundedSender<Inbound>,
    inbound_rx: UnboundedReceiver<Inbound>,

    desired: BTreeSet<String>,
    snapshot: Snapshot,
    live: bool,
    backoff: Backoff,
    next_connection: u64,
    connection: Option<ConnectionManager>,
    /// Topic to its subscription on the current connection
    live_topics: HashMap<String, SubscriptionId>,
    pending_connect: Option<PendingConnect>,
    pending_fetch: Option<BoxFuture<'static, anyhow::Result<Snapshot>>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    snapshot_listeners: Vec<SnapshotListener>,
    live_listeners: Vec<LiveStatusListener>,
    torn_down: bool,
}

impl SubscriptionCoordinator {
    /// Start a coordinator task on the current tokio runtime.
    ///
    /// Nothing connects until the first non-empty topic set arrives.
    pub fn spawn(
        config: ClientConfig,
        transport: impl Transport,
        source: impl SnapshotSource,
        credentials: impl CredentialSource,
    ) -> Result<CoordinatorHandle, ConfigError> {
        let endpoint = config.endpoint_url()?;
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            backoff: Backoff::new(config.backoff),
            config,
            endpoint,
            transport: Arc::new(transport),
            source: Arc::new(source),
            credentials: Arc::new(credentials),
            commands,
            socket_tx,
            socket_rx,
            inbound_tx,
            inbound_rx,
            desired: BTreeSet::new(),
            snapshot: Snapshot::new(),
            live: false,
            next_connection: 0,
            connection: None,
            live_topics: HashMap::new(),
            pending_connect: None,
            pending_fetch: None,
            reconnect_timer: None,
            snapshot_listeners: Vec::new(),
            live_listeners: Vec::new(),
            torn_down: false,
        };

        let task = tokio::spawn(coordinator.run());
        Ok(CoordinatorHandle {
            commands: command_tx,
            task,
        })
    }

    async fn run(mut self) {
        tracing::debug!(endpoint = %self.endpoint, "subscription coordinator started");

        while !self.torn_down {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.teardown(),
                },
                Some((connection, event)) = self.socket_rx.recv() => {
                    self.handle_socket_event(connection, event);
                }
                result = poll_slot(&mut self.pending_connect) => {
                    self.pending_connect = None;
                    self.on_connect_result(result);
                }
                result = poll_slot(&mut self.pending_fetch) => {
                    self.pending_fetch = None;
                    self.on_snapshot_fetched(result);
                }
                () = poll_slot(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.on_reconnect_due();
                }
            }
        }

        tracing::debug!("subscription coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetDesiredTopics(topics) => self.set_desired_topics(topics),
            Command::OnSnapshotChanged(listener) => self.snapshot_listeners.push(listener),
            Command::OnLiveStatusChanged(listener) => self.live_listeners.push(listener),
            Command::Teardown => self.teardown(),
        }
    }

    fn set_desired_topics(&mut self, topics: Vec<String>) {
        let desired: BTreeSet<String> = topics.into_iter().collect();
        if desired == self.desired {
            return;
        }
        let added = desired.difference(&self.desired).next().is_some();
        self.desired = desired;
        tracing::info!(topics = ?self.desired, "desired topics changed");

        if self.desired.is_empty() {
            self.deactivate();
            return;
        }

        if self.connection.is_none() {
            // A pending timer will pick up the new topics when it fires
            if self.reconnect_timer.is_none() {
                self.start_attempt();
            }
            return;
        }

        if self.connection_ready() {
            self.stop_undesired();
            if added {
                self.start_fetch();
            }
        }
    }

    fn handle_socket_event(&mut self, connection: ConnectionId, event: TransportEvent) {
        let became_ready = match self.connection.as_mut() {
            Some(current) if current.id() == connection => {
                let was_ready = current.state().is_ready();
                current.handle_event(event);
                !was_ready && current.state().is_ready()
            }
            _ => {
                tracing::trace!(%connection, ?event, "event from superseded socket dropped");
                false
            }
        };
        // Handled before any later event on the same socket can be seen
        if became_ready {
            self.on_handshake();
        }
        self.drain_inbound();
    }

    fn drain_inbound(&mut self) {
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            match inbound {
                Inbound::TopicData {
                    connection,
                    topic,
                    payload,
                } => self.apply_update(connection, &topic, payload),
                Inbound::Completed {
                    connection,
                    id,
                    topic,
                } => self.on_completed(connection, id, topic),
                Inbound::Disconnected(connection) => self.on_disconnect(connection),
            }
        }
    }

    fn start_attempt(&mut self) {
        self.reconnect_timer = None;
        self.next_connection += 1;
        let id = ConnectionId::new(self.next_connection);

        let inbound = self.inbound_tx.clone();
        let mut manager = ConnectionManager::new(id, move || {
            let _ = inbound.send(Inbound::Disconnected(id));
        });
        let inbound = self.inbound_tx.clone();
        manager.set_on_complete(move |subscription, topic| {
            let _ = inbound.send(Inbound::Completed {
                connection: id,
                id: subscription.clone(),
                topic: topic.to_string(),
            });
        });

        let request = self.connect_request();
        let events = EventSender::new(id, self.socket_tx.clone());
        match manager.connect(self.transport.as_ref(), request, events) {
            Ok(pending) => {
                self.pending_connect = Some(pending);
                self.connection = Some(manager);
            }
            Err(error) => {
                tracing::error!(connection = %id, %error, "could not start connection attempt");
                let delay = self.backoff.advance();
                self.schedule_reconnect(delay);
            }
        }
    }

    fn connect_request(&self) -> ConnectRequest {
        let credentials = match self.config.auth_placement {
            AuthPlacement::ConnectionParams => self.credentials.current(),
            AuthPlacement::SubscriptionExtensions => None,
        };
        ConnectRequest {
            url: auth::authorized_url(&self.endpoint, credentials.as_ref()),
            protocol: GRAPHQL_WS_PROTOCOL,
        }
    }

    fn on_handshake(&mut self) {
        // The handshake outcome is already known
        self.pending_connect = None;
        self.backoff.reset();
        tracing::info!("connected; fetching snapshot");
        self.start_fetch();
    }

    fn on_connect_result(&mut self, result: Result<(), ConnectionError>) {
        match result {
            Ok(()) => tracing::trace!("handshake already handled"),
            Err(error) => {
                tracing::warn!(%error, "connection attempt failed");
                self.drop_connection();
                let delay = self.backoff.advance();
                self.schedule_reconnect(delay);
            }
        }
    }

    fn start_fetch(&mut self) {
        let source = Arc::clone(&self.source);
        let topics: Vec<String> = self.desired.iter().cloned().collect();
        self.pending_fetch = Some(Box::pin(async move { source.fetch_snapshot(&topics).await }));
    }

    fn on_snapshot_fetched(&mut self, result: anyhow::Result<Snapshot>) {
        if !self.connection_ready() {
            tracing::debug!("snapshot arrived for a connection that is gone");
            return;
        }

        match result {
            Ok(snapshot) => {
                tracing::info!(entities = snapshot.len(), "snapshot replaced");
                self.snapshot = snapshot;
                self.notify_snapshot();
                self.sync_subscriptions();
                self.set_live(true);
            }
            Err(error) => {
                tracing::warn!(error = ?error, "snapshot fetch failed");
                self.drop_connection();
                self.set_live(false);
                let delay = self.backoff.advance();
                self.schedule_reconnect(delay);
            }
        }
    }

    /// Subscribe every desired topic that has no subscription on the current
    /// connection, and stop the ones no longer desired.
    fn sync_subscriptions(&mut self) {
        self.stop_undesired();
        let missing: Vec<String> = self
            .desired
            .iter()
            .filter(|topic| !self.live_topics.contains_key(*topic))
            .cloned()
            .collect();
        for topic in missing {
            self.subscribe(topic);
        }
    }

    fn subscribe(&mut self, topic: String) {
        let payload = self.start_payload(&topic);
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        let inbound = self.inbound_tx.clone();
        let connection_id = connection.id();
        let callback_topic = topic.clone();
        let callback = move |payload| {
            let _ = inbound.send(Inbound::TopicData {
                connection: connection_id,
                topic: callback_topic.clone(),
                payload,
            });
        };

        match connection.send(&topic, payload, callback) {
            Ok(id) => {
                tracing::info!(connection = %connection_id, %topic, subscription = %id, "subscribed");
                self.live_topics.insert(topic, id);
            }
            Err(error) => tracing::warn!(%topic, %error, "subscribe failed"),
        }
    }

    fn start_payload(&self, topic: &str) -> StartPayload {
        let variables = self.config.topic_variable.as_ref().map(|name| {
            let mut variables = Map::new();
            variables.insert(name.clone(), Value::String(topic.to_string()));
            Value::Object(variables)
        });
        let extensions = match self.config.auth_placement {
            AuthPlacement::SubscriptionExtensions => {
                self.credentials.current().map(|credentials| credentials.to_extensions())
            }
            AuthPlacement::ConnectionParams => None,
        };
        StartPayload {
            query: self.config.subscription_query.clone(),
            variables,
            extensions,
        }
    }

    fn stop_undesired(&mut self) {
        let stale: Vec<String> = self
            .live_topics
            .keys()
            .filter(|topic| !self.desired.contains(*topic))
            .cloned()
            .collect();
        for topic in stale {
            if let Some(id) = self.live_topics.remove(&topic) {
                tracing::info!(%topic, subscription = %id, "unsubscribing");
                if let Some(connection) = self.connection.as_mut() {
                    connection.stop(&id);
                }
            }
        }
    }

    fn apply_update(&mut self, connection: ConnectionId, topic: &str, payload: Value) {
        if self.connection.as_ref().map(ConnectionManager::id) != Some(connection) {
            tracing::debug!(%connection, topic, "update from superseded socket dropped");
            return;
        }

        let update = match EntityUpdate::from_payload(&payload) {
            Ok(Some(update)) => update,
            Ok(None) => {
                tracing::trace!(topic, "unrelated server event ignored");
                return;
            }
            Err(error) => {
                tracing::warn!(topic, %error, "malformed update dropped");
                return;
            }
        };

        if !self.snapshot.merge(&update) {
            tracing::debug!(topic, entity = %update.entity, "update for untracked entity dropped");
            return;
        }
        tracing::debug!(topic, entity = %update.entity, "update applied");
        self.notify_snapshot();
    }

    /// The server ended a subscription; start it again if it is still wanted.
    fn on_completed(&mut self, connection: ConnectionId, id: SubscriptionId, topic: String) {
        if self.connection.as_ref().map(ConnectionManager::id) != Some(connection) {
            return;
        }
        if self.live_topics.get(&topic) != Some(&id) {
            return;
        }
        self.live_topics.remove(&topic);
        if self.desired.contains(&topic) && self.connection_ready() {
            tracing::info!(%topic, subscription = %id, "resubscribing completed topic");
            self.subscribe(topic);
        }
    }

    fn on_disconnect(&mut self, connection: ConnectionId) {
        if self.connection.as_ref().map(ConnectionManager::id) != Some(connection) {
            return;
        }
        tracing::warn!(%connection, "live updates interrupted");

        // The registry went with the socket
        self.connection = None;
        self.live_topics.clear();
        self.pending_connect = None;
        self.pending_fetch = None;
        self.set_live(false);

        let delay = self.backoff.current();
        self.schedule_reconnect(delay);
    }

    /// Arm the reconnect timer, replacing any pending one.
    fn schedule_reconnect(&mut self, delay: Duration) {
        if self.torn_down || self.desired.is_empty() {
            return;
        }
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn on_reconnect_due(&mut self) {
        if self.torn_down || self.desired.is_empty() || self.connection.is_some() {
            return;
        }
        self.start_attempt();
    }

    /// Stop subscriptions and close the current connection, if any.
    fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            for (_, id) in self.live_topics.drain() {
                connection.stop(&id);
            }
            connection.close();
        }
        self.live_topics.clear();
        self.pending_connect = None;
        self.pending_fetch = None;
    }

    fn deactivate(&mut self) {
        self.drop_connection();
        self.reconnect_timer = None;
        self.backoff.reset();
        self.set_live(false);
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        tracing::info!("tearing down subscription coordinator");
        self.deactivate();
        self.torn_down = true;
    }

    fn connection_ready(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.state().is_ready())
    }

    fn set_live(&mut self, live: bool) {
        if self.live == live {
            return;
        }
        self.live = live;
        tracing::info!(live, "live status changed");
        for listener in &self.live_listeners {
            listener(live);
        }
    }

    fn notify_snapshot(&self) {
        for listener in &self.snapshot_listeners {
            listener(&self.snapshot);
        }
    }
}

/// Await the future in `slot`, or never resolve if the slot is empty.
async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
