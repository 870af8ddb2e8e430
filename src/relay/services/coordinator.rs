//! Office membership and request forwarding between participants.

use super::{CoordinatorError, CoordinatorResult};
use crate::protocol::{
    AgentCallData, EnterOfficeNotification, Frame, GetConfigRequest, GetToolsRequest,
    JoinOfficeRequest, LeaveOfficeNotification, LeaveOfficeRequest, ToolCallRequest,
    UpdateConfigNotification, UpdateConfigRequest, events,
};
use crate::relay::domain::{
    OfficeId, ParticipantId, ParticipantRecord, Role, RoleBinding, RoomDirectory,
};
use crate::relay::ports::ParticipantLink;
use mockable::Clock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Span, debug, info, warn};

/// Default deadline for forwarded `get_tools` and `get_config` requests.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

type Recipients = Vec<(ParticipantId, Arc<dyn ParticipantLink>)>;

/// Outcome of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The participant entered the office and members were notified.
    Entered {
        /// Office a Computer left implicitly to enter this one.
        left: Option<OfficeId>,
    },
    /// The participant was already a member; nothing changed.
    AlreadyMember,
}

enum Admission {
    AlreadyMember,
    Enter,
}

enum JoinStep {
    Entered(Recipients),
    Switch(OfficeId),
}

struct PendingAck {
    target: ParticipantId,
    reply: oneshot::Sender<Value>,
}

#[derive(Default)]
struct RelayState {
    directory: RoomDirectory,
    links: HashMap<ParticipantId, Arc<dyn ParticipantLink>>,
}

impl RelayState {
    fn record(&self, id: &ParticipantId) -> CoordinatorResult<&ParticipantRecord> {
        self.directory
            .get(id)
            .ok_or_else(|| CoordinatorError::UnknownParticipant(id.clone()))
    }

    fn recipients(&self, office: &OfficeId, originator: &ParticipantId) -> Recipients {
        self.directory
            .members(office)
            .into_iter()
            .filter(|member| member != originator)
            .filter_map(|member| {
                let link = self.links.get(&member).map(Arc::clone)?;
                Some((member, link))
            })
            .collect()
    }

    fn link(&self, id: &ParticipantId) -> CoordinatorResult<Arc<dyn ParticipantLink>> {
        self.links
            .get(id)
            .map(Arc::clone)
            .ok_or_else(|| CoordinatorError::UnknownParticipant(id.clone()))
    }
}

/// Relay-side coordinator of participants, offices and forwarded requests.
///
/// Membership state sits behind one lock that is never held while frames are
/// delivered, so the leave notification of a departing participant is
/// observed while its membership is still recorded.
pub struct SessionCoordinator<C>
where
    C: Clock + Send + Sync,
{
    clock: Arc<C>,
    state: Mutex<RelayState>,
    pending: Mutex<HashMap<u64, PendingAck>>,
    next_ack: AtomicU64,
    rpc_timeout: Duration,
    span: Span,
}

impl<C> SessionCoordinator<C>
where
    C: Clock + Send + Sync,
{
    /// Creates a coordinator with no participants.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            clock,
            state: Mutex::new(RelayState::default()),
            pending: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            span: Span::none(),
        }
    }

    /// Sets the deadline for forwarded `get_tools` and `get_config` requests.
    #[must_use]
    pub const fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Sets the span that log events are recorded in.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingAck>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection and returns its participant id.
    #[must_use]
    pub fn connect(&self, link: Arc<dyn ParticipantLink>) -> ParticipantId {
        let id = ParticipantId::generate();
        let record = ParticipantRecord::new(id.clone(), self.clock.as_ref());
        let mut state = self.state();
        state.directory.insert(record);
        state.links.insert(id.clone(), link);
        debug!(parent: &self.span, participant = %id, "participant connected");
        id
    }

    /// Binds the caller's role and enters the requested office.
    ///
    /// A Computer already in another office leaves it first. The role
    /// binding is restored when the join is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::RoleMismatch`] when the connection is bound
    /// to another role, [`CoordinatorError::AgentAlreadyInOffice`] when an
    /// Agent is elsewhere and [`CoordinatorError::OfficeOccupied`] when the
    /// office already has an Agent.
    pub fn join(
        &self,
        id: &ParticipantId,
        request: &JoinOfficeRequest,
    ) -> CoordinatorResult<JoinOutcome> {
        let office = OfficeId::new(request.office_id.as_str())?;
        let step = {
            let mut state = self.state();
            let record = state
                .directory
                .get_mut(id)
                .ok_or_else(|| CoordinatorError::UnknownParticipant(id.clone()))?;
            if let Some(bound) = record.role()
                && bound != request.role
            {
                warn!(parent: &self.span, participant = %id, %bound, requested = %request.role, "join rejected");
                return Err(CoordinatorError::RoleMismatch {
                    bound,
                    requested: request.role,
                });
            }
            let backup = record.binding().cloned();
            record.bind(RoleBinding::new(request.role, &request.name, id));
            let current = record.office().cloned();

            match admit(&state.directory, id, request.role, current.as_ref(), &office) {
                Ok(Admission::AlreadyMember) => {
                    debug!(parent: &self.span, participant = %id, %office, "already a member");
                    return Ok(JoinOutcome::AlreadyMember);
                }
                Ok(Admission::Enter) => {}
                Err(err) => {
                    if let Some(rejected) = state.directory.get_mut(id) {
                        rejected.restore_binding(backup);
                    }
                    warn!(parent: &self.span, participant = %id, %office, error = %err, "join rejected");
                    return Err(err);
                }
            }

            match current {
                Some(previous) => JoinStep::Switch(previous),
                None => {
                    state.directory.enter(id, &office);
                    JoinStep::Entered(state.recipients(&office, id))
                }
            }
        };

        let (left, recipients) = match step {
            JoinStep::Entered(audience) => (None, audience),
            JoinStep::Switch(previous) => {
                self.depart(id, &previous)?;
                let mut state = self.state();
                state.directory.enter(id, &office);
                (Some(previous), state.recipients(&office, id))
            }
        };

        let notification = match request.role {
            Role::Computer => EnterOfficeNotification {
                office_id: office.to_string(),
                computer: Some(id.to_string()),
                agent: None,
            },
            Role::Agent => EnterOfficeNotification {
                office_id: office.to_string(),
                computer: None,
                agent: Some(id.to_string()),
            },
        };
        info!(parent: &self.span, participant = %id, role = %request.role, %office, "joined office");
        self.broadcast(&recipients, events::ENTER_OFFICE_NOTIFICATION, &notification)?;
        Ok(JoinOutcome::Entered { left })
    }

    /// Leaves the named office after notifying the remaining members.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotMember`] when the caller is not in the
    /// office.
    pub fn leave(&self, id: &ParticipantId, request: &LeaveOfficeRequest) -> CoordinatorResult<()> {
        let office = OfficeId::new(request.office_id.as_str())?;
        self.depart(id, &office)
    }

    fn depart(&self, id: &ParticipantId, office: &OfficeId) -> CoordinatorResult<()> {
        let (role, recipients) = {
            let state = self.state();
            let record = state.record(id)?;
            if record.office() != Some(office) {
                return Err(CoordinatorError::NotMember {
                    office: office.clone(),
                });
            }
            (record.role(), state.recipients(office, id))
        };

        let notification = if role == Some(Role::Computer) {
            LeaveOfficeNotification {
                office_id: office.to_string(),
                computer: Some(id.to_string()),
                agent: None,
            }
        } else {
            LeaveOfficeNotification {
                office_id: office.to_string(),
                computer: None,
                agent: Some(id.to_string()),
            }
        };
        self.broadcast(&recipients, events::LEAVE_OFFICE_NOTIFICATION, &notification)?;

        self.state().directory.exit(id);
        info!(parent: &self.span, participant = %id, %office, "left office");
        Ok(())
    }

    /// Removes a connection, leaving its office first.
    ///
    /// Requests forwarded to the participant that are still awaiting an
    /// acknowledgement fail immediately.
    #[must_use]
    pub fn disconnect(&self, id: &ParticipantId) -> Option<ParticipantRecord> {
        let office = self
            .state()
            .directory
            .get(id)
            .and_then(ParticipantRecord::office)
            .cloned();
        if let Some(current) = office
            && let Err(err) = self.depart(id, &current)
        {
            warn!(parent: &self.span, participant = %id, error = %err, "leave on disconnect failed");
        }

        let removed = {
            let mut state = self.state();
            state.links.remove(id);
            state.directory.remove(id)
        };
        let abandoned = {
            let mut pending = self.pending();
            let before = pending.len();
            pending.retain(|_, entry| entry.target != *id);
            before.saturating_sub(pending.len())
        };
        debug!(parent: &self.span, participant = %id, abandoned, "participant disconnected");
        removed
    }

    /// Forwards a tool call from an Agent to the addressed Computer and
    /// returns the Computer's reply untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Timeout`] when the Computer does not reply
    /// within `timeout_ms` (the relay default when zero), plus the routing
    /// errors of the caller checks.
    pub async fn forward_tool_call(
        &self,
        caller: &ParticipantId,
        request: &ToolCallRequest,
    ) -> CoordinatorResult<Value> {
        let (target, link) = self.route(caller, &request.robot_id, &request.computer, false)?;
        let timeout = match request.timeout_ms {
            0 => self.rpc_timeout,
            millis => Duration::from_millis(millis),
        };
        let (ack, receiver) = self.dispatch(&target, &link, events::TOOL_CALL, request)?;
        self.await_reply(target, ack, receiver, events::TOOL_CALL, timeout)
            .await
    }

    /// Forwards a tool listing request to a Computer in the caller's office.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::NotSameOffice`] when caller and target are
    /// in different offices, plus the errors of [`Self::forward_tool_call`].
    pub async fn forward_get_tools(
        &self,
        caller: &ParticipantId,
        request: &GetToolsRequest,
    ) -> CoordinatorResult<Value> {
        let (target, link) = self.route(caller, &request.robot_id, &request.computer, true)?;
        let (ack, receiver) = self.dispatch(&target, &link, events::GET_TOOLS, request)?;
        self.await_reply(target, ack, receiver, events::GET_TOOLS, self.rpc_timeout)
            .await
    }

    /// Forwards a configuration request to a Computer in the caller's office.
    ///
    /// # Errors
    ///
    /// Same as [`Self::forward_get_tools`].
    pub async fn forward_get_config(
        &self,
        caller: &ParticipantId,
        request: &GetConfigRequest,
    ) -> CoordinatorResult<Value> {
        let (target, link) = self.route(caller, &request.robot_id, &request.computer, true)?;
        let (ack, receiver) = self.dispatch(&target, &link, events::GET_CONFIG, request)?;
        self.await_reply(target, ack, receiver, events::GET_CONFIG, self.rpc_timeout)
            .await
    }

    /// Completes a forwarded request with the reply sent by `from`.
    ///
    /// Returns `false` when no request with this id awaits `from`.
    #[must_use]
    pub fn resolve_ack(&self, from: &ParticipantId, ack: u64, data: Value) -> bool {
        let entry = {
            let mut pending = self.pending();
            if pending.get(&ack).is_some_and(|entry| entry.target == *from) {
                pending.remove(&ack)
            } else {
                None
            }
        };
        entry.is_some_and(|waiting| waiting.reply.send(data).is_ok())
    }

    /// Tells the rest of a Computer's office that its configuration changed.
    ///
    /// Returns the number of participants notified.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::RoleRequired`] for non-Computers and
    /// [`CoordinatorError::NotInOffice`] before a join.
    pub fn announce_config_update(
        &self,
        caller: &ParticipantId,
        request: &UpdateConfigRequest,
    ) -> CoordinatorResult<usize> {
        if request.computer != caller.as_str() {
            return Err(CoordinatorError::CallerMismatch {
                claimed: request.computer.clone(),
            });
        }
        let recipients = self.office_audience(caller, Role::Computer)?;
        let notification = UpdateConfigNotification {
            computer: caller.to_string(),
        };
        self.broadcast(&recipients, events::UPDATE_CONFIG_NOTIFICATION, &notification)
    }

    /// Relays an Agent's advisory cancellation to the rest of its office.
    ///
    /// In-flight forwarded calls are not affected.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::RoleRequired`] for non-Agents and
    /// [`CoordinatorError::CallerMismatch`] when `robot_id` names someone
    /// else.
    pub fn broadcast_cancel(
        &self,
        caller: &ParticipantId,
        request: &AgentCallData,
    ) -> CoordinatorResult<usize> {
        if request.robot_id != caller.as_str() {
            return Err(CoordinatorError::CallerMismatch {
                claimed: request.robot_id.clone(),
            });
        }
        let recipients = self.office_audience(caller, Role::Agent)?;
        self.broadcast(&recipients, events::CANCEL_TOOL_CALL_NOTIFICATION, request)
    }

    /// Returns the members of an office.
    #[must_use]
    pub fn room_members(&self, office: &OfficeId) -> Vec<ParticipantId> {
        self.state().directory.members(office)
    }

    /// Counts the members of an office bound to `role`.
    #[must_use]
    pub fn count_role(&self, office: &OfficeId, role: Role) -> usize {
        self.state().directory.count_role(office, role)
    }

    /// Returns a snapshot of a participant record.
    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<ParticipantRecord> {
        self.state().directory.get(id).cloned()
    }

    /// Returns the number of forwarded requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    fn office_audience(&self, caller: &ParticipantId, required: Role) -> CoordinatorResult<Recipients> {
        let state = self.state();
        let record = state.record(caller)?;
        if !record.has_role(required) {
            return Err(CoordinatorError::RoleRequired {
                required,
                actual: record.role(),
            });
        }
        let office = record.office().ok_or(CoordinatorError::NotInOffice)?;
        Ok(state.recipients(office, caller))
    }

    fn route(
        &self,
        caller: &ParticipantId,
        claimed: &str,
        computer: &str,
        same_office: bool,
    ) -> CoordinatorResult<(ParticipantId, Arc<dyn ParticipantLink>)> {
        let target = ParticipantId::new(computer)?;
        let state = self.state();
        let agent = state.record(caller)?;
        if !agent.has_role(Role::Agent) {
            return Err(CoordinatorError::RoleRequired {
                required: Role::Agent,
                actual: agent.role(),
            });
        }
        if claimed != caller.as_str() {
            return Err(CoordinatorError::CallerMismatch {
                claimed: claimed.to_owned(),
            });
        }
        let host = state.record(&target)?;
        if !host.has_role(Role::Computer) {
            return Err(CoordinatorError::TargetNotComputer(target));
        }
        if same_office && (agent.office().is_none() || agent.office() != host.office()) {
            return Err(CoordinatorError::NotSameOffice { target });
        }
        let link = state.link(&target)?;
        Ok((target, link))
    }

    fn dispatch(
        &self,
        target: &ParticipantId,
        link: &Arc<dyn ParticipantLink>,
        event: &str,
        payload: &impl Serialize,
    ) -> CoordinatorResult<(u64, oneshot::Receiver<Value>)> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::call(event, payload, ack)?;
        let (sender, receiver) = oneshot::channel();
        self.pending().insert(
            ack,
            PendingAck {
                target: target.clone(),
                reply: sender,
            },
        );
        if link.deliver(frame).is_err() {
            self.pending().remove(&ack);
            return Err(CoordinatorError::TargetGone {
                target: target.clone(),
            });
        }
        debug!(parent: &self.span, %target, event, ack, "forwarded request");
        Ok((ack, receiver))
    }

    async fn await_reply(
        &self,
        target: ParticipantId,
        ack: u64,
        receiver: oneshot::Receiver<Value>,
        event: &str,
        timeout: Duration,
    ) -> CoordinatorResult<Value> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CoordinatorError::TargetGone { target }),
            Err(_) => {
                self.pending().remove(&ack);
                warn!(parent: &self.span, %target, event, ?timeout, "forwarded request timed out");
                Err(CoordinatorError::Timeout {
                    event: event.to_owned(),
                    target,
                    timeout,
                })
            }
        }
    }

    fn broadcast(
        &self,
        recipients: &Recipients,
        event: &str,
        payload: &impl Serialize,
    ) -> CoordinatorResult<usize> {
        let frame = Frame::emit(event, payload)?;
        let mut delivered = 0_usize;
        for (member, link) in recipients {
            match link.deliver(frame.clone()) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(err) => {
                    debug!(parent: &self.span, participant = %member, event, error = %err, "skipping closed link");
                }
            }
        }
        Ok(delivered)
    }
}

fn admit(
    directory: &RoomDirectory,
    id: &ParticipantId,
    role: Role,
    current: Option<&OfficeId>,
    office: &OfficeId,
) -> CoordinatorResult<Admission> {
    if current == Some(office) {
        return Ok(Admission::AlreadyMember);
    }
    match (role, current) {
        (Role::Agent, Some(elsewhere)) => Err(CoordinatorError::AgentAlreadyInOffice {
            current: elsewhere.clone(),
        }),
        (Role::Agent, None) if directory.agent_in(office).is_some_and(|agent| agent != id) => {
            Err(CoordinatorError::OfficeOccupied {
                office: office.clone(),
            })
        }
        _ => Ok(Admission::Enter),
    }
}
