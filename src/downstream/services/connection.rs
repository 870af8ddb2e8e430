//! Lifecycle dispatcher for one downstream tool provider.

use crate::downstream::{
    domain::{
        Action, CallToolResult, ConnectionSnapshot, ConnectionState, ConnectionStateError, Guard,
        ToolDescriptor, Transition, Trigger,
    },
    ports::{ConnectionObserver, DownstreamClient, TransportError},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{Instrument, Span, debug, info, warn};

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors returned by [`DownstreamConnection`].
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The operation is not valid in the current state.
    #[error(transparent)]
    State(#[from] ConnectionStateError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct ConnectionInner {
    state: ConnectionState,
    session_live: bool,
    changed_at: DateTime<Utc>,
}

/// One downstream tool provider driven through the lifecycle table.
///
/// Transitions are serialised by an internal lock that is held across the
/// guard, before and entry phases, so the transport is opened and released
/// by whichever task fired the transition. Observers run after the lock is
/// released.
pub struct DownstreamConnection {
    name: String,
    client: Arc<dyn DownstreamClient>,
    observer: Option<Arc<dyn ConnectionObserver>>,
    clock: Arc<dyn Clock + Send + Sync>,
    inner: Mutex<ConnectionInner>,
    span: Span,
}

impl DownstreamConnection {
    /// Creates a connection in the `Initialized` state.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DownstreamClient>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let changed_at = clock.utc();
        Self {
            name: name.into(),
            client,
            observer: None,
            clock,
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Initialized,
                session_live: false,
                changed_at,
            }),
            span: Span::none(),
        }
    }

    /// Registers the transition observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the span that log events are recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Returns the current state with the time it was entered.
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.lock().await;
        ConnectionSnapshot::new(inner.state, inner.changed_at)
    }

    /// Opens the transport and moves to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the connection is `Initialized`, or the
    /// transport error when opening fails; the state then stays
    /// `Initialized`.
    pub async fn connect(&self) -> ConnectionResult<ConnectionState> {
        self.fire(Trigger::Connect).await
    }

    /// Closes the session and moves to `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the connection is `Connected` with a
    /// live session.
    pub async fn disconnect(&self) -> ConnectionResult<ConnectionState> {
        self.fire(Trigger::Disconnect).await
    }

    /// Records a failure and moves to `Error`, releasing the transport.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed transition table; the signature matches
    /// the other triggers.
    pub async fn error(&self) -> ConnectionResult<ConnectionState> {
        self.fire(Trigger::Error).await
    }

    /// Releases the transport and moves back to `Initialized`.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed transition table; the signature matches
    /// the other triggers.
    pub async fn reinitialize(&self) -> ConnectionResult<ConnectionState> {
        self.fire(Trigger::Reinitialize).await
    }

    /// Lists every tool, following pagination cursors.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionStateError::NotConnected`] unless `Connected`, or
    /// the transport error of any page request.
    pub async fn list_tools(&self) -> ConnectionResult<Vec<ToolDescriptor>> {
        self.ensure_connected().await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.client.list_tools(cursor.clone()).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(TransportError::protocol(format!(
                        "server repeated pagination cursor '{next}'"
                    ))
                    .into());
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(parent: &self.span, server = %self.name, count = tools.len(), "listed tools");
        Ok(tools)
    }

    /// Invokes `tool_name` on the downstream server.
    ///
    /// The state is checked up front; the call itself runs without holding
    /// the transition lock so calls proceed concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionStateError::NotConnected`] unless `Connected`, or
    /// the transport error of the call.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> ConnectionResult<CallToolResult> {
        self.ensure_connected().await?;
        Ok(self.client.call_tool(tool_name, arguments).await?)
    }

    async fn ensure_connected(&self) -> Result<(), ConnectionStateError> {
        let state = self.state().await;
        if state.can_use_tools() {
            return Ok(());
        }
        Err(ConnectionStateError::NotConnected {
            server: self.name.clone(),
            state,
        })
    }

    async fn fire(&self, trigger: Trigger) -> ConnectionResult<ConnectionState> {
        let span = self.span.clone();
        async move {
            let mut inner = self.inner.lock().await;
            let from = inner.state;
            let transition = Transition::find(trigger, from)
                .ok_or(ConnectionStateError::InvalidTransition { trigger, state: from })?;

            if !Self::guard_allows(transition.guard(), &inner) {
                return Err(ConnectionStateError::GuardRejected { trigger, state: from }.into());
            }

            self.run(transition.before(), &mut inner).await?;

            let to = transition.target();
            inner.state = to;
            inner.changed_at = self.clock.utc();
            self.run(to.entry_action(), &mut inner).await?;
            drop(inner);

            info!(server = %self.name, %trigger, %from, %to, "connection transition");
            if transition.after() == Action::NotifyObserver {
                self.notify(from, to).await;
            }
            Ok(to)
        }
        .instrument(span)
        .await
    }

    const fn guard_allows(guard: Guard, inner: &ConnectionInner) -> bool {
        match guard {
            Guard::Always => true,
            Guard::SessionLive => inner.session_live,
        }
    }

    async fn run(&self, action: Action, inner: &mut ConnectionInner) -> ConnectionResult<()> {
        match action {
            Action::None | Action::NotifyObserver => {}
            Action::OpenSession => {
                self.client.connect().await?;
                inner.session_live = true;
            }
            Action::ReleaseSession => {
                if inner.session_live {
                    inner.session_live = false;
                    if let Err(err) = self.client.disconnect().await {
                        warn!(server = %self.name, error = %err, "releasing transport failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn notify(&self, from: ConnectionState, to: ConnectionState) {
        let Some(observer) = &self.observer else {
            return;
        };
        if let Err(err) = observer.on_transition(&self.name, from, to).await {
            warn!(server = %self.name, error = %err, "connection observer failed");
        }
    }
}

impl std::fmt::Debug for DownstreamConnection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DownstreamConnection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::{
        adapters::InMemoryDownstreamClient,
        ports::{MockConnectionObserver, ObserverError},
    };
    use mockable::DefaultClock;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn client() -> Arc<InMemoryDownstreamClient> {
        Arc::new(InMemoryDownstreamClient::new(vec![
            ToolDescriptor::new("echo"),
            ToolDescriptor::new("read"),
            ToolDescriptor::new("write"),
        ]))
    }

    fn connection(client: &Arc<InMemoryDownstreamClient>) -> DownstreamConnection {
        DownstreamConnection::new("files", client.clone(), Arc::new(DefaultClock))
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn connect_opens_session(client: Arc<InMemoryDownstreamClient>) {
        let conn = connection(&client);

        let state = conn.connect().await.expect("connect should succeed");

        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(client.connect_count(), 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn failed_connect_stays_initialized(client: Arc<InMemoryDownstreamClient>) {
        client.set_fail_connect(true);
        let conn = connection(&client);

        let result = conn.connect().await;

        assert!(matches!(result, Err(ConnectionError::Transport(_))));
        assert_eq!(conn.state().await, ConnectionState::Initialized);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn tool_operations_require_connected_state(client: Arc<InMemoryDownstreamClient>) {
        let conn = connection(&client);

        let listed = conn.list_tools().await;
        let called = conn.call_tool("echo", Map::new()).await;

        assert!(matches!(
            listed,
            Err(ConnectionError::State(ConnectionStateError::NotConnected { .. }))
        ));
        assert!(matches!(
            called,
            Err(ConnectionError::State(ConnectionStateError::NotConnected { .. }))
        ));
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn list_tools_follows_pagination(client: Arc<InMemoryDownstreamClient>) {
        client.set_page_size(1);
        let conn = connection(&client);
        conn.connect().await.expect("connect should succeed");

        let tools = conn.list_tools().await.expect("listing should succeed");

        let names: Vec<_> = tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, ["echo", "read", "write"]);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_releases_transport(client: Arc<InMemoryDownstreamClient>) {
        let conn = connection(&client);
        conn.connect().await.expect("connect should succeed");

        conn.disconnect().await.expect("disconnect should succeed");

        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert_eq!(client.disconnect_count(), 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn disconnect_from_initialized_is_invalid(client: Arc<InMemoryDownstreamClient>) {
        let conn = connection(&client);

        let result = conn.disconnect().await;

        assert!(matches!(
            result,
            Err(ConnectionError::State(ConnectionStateError::InvalidTransition {
                trigger: Trigger::Disconnect,
                state: ConnectionState::Initialized,
            }))
        ));
        assert_eq!(client.disconnect_count(), 0);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn error_then_reinitialize_makes_connection_reusable(
        client: Arc<InMemoryDownstreamClient>,
    ) {
        let conn = connection(&client);
        conn.connect().await.expect("connect should succeed");

        conn.error().await.expect("error transition should succeed");
        assert_eq!(client.disconnect_count(), 1);
        conn.reinitialize().await.expect("reinitialize should succeed");
        conn.connect().await.expect("reconnect should succeed");

        assert_eq!(conn.state().await, ConnectionState::Connected);
        assert_eq!(client.connect_count(), 2);
        assert_eq!(client.disconnect_count(), 1);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn observer_receives_from_and_to(client: Arc<InMemoryDownstreamClient>) {
        let mut observer = MockConnectionObserver::new();
        observer
            .expect_on_transition()
            .withf(|server, from, to| {
                server == "files"
                    && *from == ConnectionState::Initialized
                    && *to == ConnectionState::Connected
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let conn = connection(&client).with_observer(Arc::new(observer));

        conn.connect().await.expect("connect should succeed");
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread")]
    async fn observer_failure_does_not_corrupt_state(client: Arc<InMemoryDownstreamClient>) {
        let mut observer = MockConnectionObserver::new();
        observer
            .expect_on_transition()
            .returning(|_, _, _| Err(ObserverError::new(std::fmt::Error)));
        let conn = connection(&client).with_observer(Arc::new(observer));

        conn.connect().await.expect("connect should succeed");
        let result = conn
            .call_tool("echo", json!({"text": "hi"}).as_object().cloned().unwrap_or_default())
            .await
            .expect("call should succeed");

        assert_eq!(conn.state().await, ConnectionState::Connected);
        assert!(result.text_content().contains("hi"));
    }
}
