//! SessionManager: live flow sessions keyed by id, for drivers.
//!
//! Each session is one `FlowEngine` behind its own mutex, so events for a
//! session are handled strictly one at a time while different sessions run
//! independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FlowConfig;
use crate::directory::Directory;
use crate::error::FlowError;
use crate::parser::EntityParser;

use super::command::FlowCommand;
use super::engine::{FlowEngine, FlowEvent, FlowUpdate};
use super::message::Message;
use super::model::EntityKind;
use super::state::{FlowSnapshot, FlowStep};
use super::workflows::{Classroom, Student, Teacher};

/// A flow engine for any supported entity kind.
pub enum AnyFlow {
    Teacher(FlowEngine<Teacher>),
    Student(FlowEngine<Student>),
    Classroom(FlowEngine<Classroom>),
}

macro_rules! each_flow {
    ($flow:expr, $engine:ident => $body:expr) => {
        match $flow {
            AnyFlow::Teacher($engine) => $body,
            AnyFlow::Student($engine) => $body,
            AnyFlow::Classroom($engine) => $body,
        }
    };
}

impl AnyFlow {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Teacher(_) => EntityKind::Teacher,
            Self::Student(_) => EntityKind::Student,
            Self::Classroom(_) => EntityKind::Classroom,
        }
    }

    pub fn id(&self) -> Uuid {
        each_flow!(self, engine => engine.id())
    }

    pub async fn start(&mut self) -> FlowUpdate {
        each_flow!(self, engine => engine.start().await)
    }

    pub async fn handle_user_text(&mut self, text: &str) -> FlowUpdate {
        each_flow!(self, engine => engine.handle_user_text(text).await)
    }

    pub async fn handle_button(&mut self, command: FlowCommand) -> FlowUpdate {
        each_flow!(self, engine => engine.handle_button(command).await)
    }

    pub fn is_offered(&self, command: &FlowCommand) -> bool {
        each_flow!(self, engine => engine.is_offered(command))
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        each_flow!(self, engine => engine.snapshot())
    }

    pub fn messages(&self) -> Vec<Message> {
        each_flow!(self, engine => engine.messages().to_vec())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        each_flow!(self, engine => engine.subscribe())
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub teacher_parser: Arc<dyn EntityParser<Teacher>>,
    pub student_parser: Arc<dyn EntityParser<Student>>,
    pub classroom_parser: Arc<dyn EntityParser<Classroom>>,
    pub directory: Arc<dyn Directory>,
    pub config: FlowConfig,
}

impl SessionDeps {
    /// Use one parser for every kind.
    pub fn new<P>(parser: Arc<P>, directory: Arc<dyn Directory>, config: FlowConfig) -> Self
    where
        P: EntityParser<Teacher> + EntityParser<Student> + EntityParser<Classroom> + 'static,
    {
        Self {
            teacher_parser: parser.clone(),
            student_parser: parser.clone(),
            classroom_parser: parser,
            directory,
            config,
        }
    }

    fn build(&self, kind: EntityKind) -> AnyFlow {
        let directory = self.directory.clone();
        let config = self.config.clone();
        match kind {
            EntityKind::Teacher => AnyFlow::Teacher(FlowEngine::new(
                self.teacher_parser.clone(),
                directory,
                config,
            )),
            EntityKind::Student => AnyFlow::Student(FlowEngine::new(
                self.student_parser.clone(),
                directory,
                config,
            )),
            EntityKind::Classroom => AnyFlow::Classroom(FlowEngine::new(
                self.classroom_parser.clone(),
                directory,
                config,
            )),
        }
    }
}

/// A freshly opened session and its first messages.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedFlow {
    pub id: Uuid,
    pub kind: EntityKind,
    #[serde(flatten)]
    pub update: FlowUpdate,
}

/// Full transcript plus state, for reconnecting clients.
#[derive(Debug, Clone, Serialize)]
pub struct FlowView {
    pub id: Uuid,
    pub kind: EntityKind,
    pub messages: Vec<Message>,
    pub state: FlowSnapshot,
}

/// One live session and when a driver last touched it.
struct Session {
    flow: AnyFlow,
    last_touched: DateTime<Utc>,
}

impl Session {
    fn new(flow: AnyFlow) -> Self {
        Self {
            flow,
            last_touched: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_touched = Utc::now();
    }

    fn is_expired(&self, now: DateTime<Utc>, idle: Duration, halted: Duration) -> bool {
        let age = now - self.last_touched;
        let step = self.flow.snapshot().step;
        age >= idle || (step.is_terminal() && age >= halted)
    }
}

type SharedSession = Arc<Mutex<Session>>;

/// Registry of live sessions.
pub struct SessionManager {
    deps: SessionDeps,
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a new session for `kind`, optionally suggesting a context.
    pub async fn open(&self, kind: EntityKind, preferred_context: Option<String>) -> OpenedFlow {
        let mut flow = self.deps.build(kind);
        if let Some(context_id) = preferred_context {
            flow = match flow {
                AnyFlow::Teacher(e) => AnyFlow::Teacher(e.with_preferred_context(context_id)),
                AnyFlow::Student(e) => AnyFlow::Student(e.with_preferred_context(context_id)),
                AnyFlow::Classroom(e) => AnyFlow::Classroom(e.with_preferred_context(context_id)),
            };
        }
        let id = flow.id();
        let update = flow.start().await;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(Session::new(flow))));
        info!(session = %id, %kind, "Session opened");
        OpenedFlow { id, kind, update }
    }

    async fn get(&self, id: Uuid) -> Result<SharedSession, FlowError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(FlowError::SessionNotFound { id })
    }

    /// Deliver free text. Refused while the session isn't taking input.
    pub async fn input(&self, id: Uuid, text: &str) -> Result<FlowUpdate, FlowError> {
        let session = self.get(id).await?;
        let update = {
            let mut session = session.lock().await;
            session.touch();
            if !session.flow.snapshot().input_enabled {
                return Err(FlowError::InputDisabled);
            }
            session.flow.handle_user_text(text).await
        };
        self.discard_if_closed(id, &update).await;
        Ok(update)
    }

    /// Deliver a button press. Refused unless the button is currently live.
    pub async fn command(&self, id: Uuid, command: FlowCommand) -> Result<FlowUpdate, FlowError> {
        let session = self.get(id).await?;
        let update = {
            let mut session = session.lock().await;
            session.touch();
            if !session.flow.is_offered(&command) {
                debug!(session = %id, %command, "Rejecting stale command");
                return Err(FlowError::StaleCommand(command.to_string()));
            }
            session.flow.handle_button(command).await
        };
        self.discard_if_closed(id, &update).await;
        Ok(update)
    }

    pub async fn view(&self, id: Uuid) -> Result<FlowView, FlowError> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.touch();
        Ok(FlowView {
            id,
            kind: session.flow.kind(),
            messages: session.flow.messages(),
            state: session.flow.snapshot(),
        })
    }

    pub async fn subscribe(&self, id: Uuid) -> Result<broadcast::Receiver<FlowEvent>, FlowError> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.touch();
        Ok(session.flow.subscribe())
    }

    /// Abandon a session. Anything already created stays created.
    pub async fn close(&self, id: Uuid) -> Result<(), FlowError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| info!(session = %id, "Session closed"))
            .ok_or(FlowError::SessionNotFound { id })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop idle sessions, and halted ones past their retention.
    /// Returns the number of sessions removed.
    pub async fn expire_idle(&self) -> usize {
        self.expire_idle_at(Utc::now()).await
    }

    /// `expire_idle` as of `now`.
    pub async fn expire_idle_at(&self, now: DateTime<Utc>) -> usize {
        let idle = Duration::minutes(i64::from(self.deps.config.session_idle_minutes));
        let halted = Duration::minutes(i64::from(self.deps.config.halted_retention_minutes));

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        // A session that is mid-event is in use, so it stays.
        sessions.retain(|id, session| match session.try_lock() {
            Ok(session) if session.is_expired(now, idle, halted) => {
                debug!(session = %id, step = %session.flow.snapshot().step, "Session expired");
                false
            }
            _ => true,
        });
        let expired = before - sessions.len();

        if expired > 0 {
            info!(count = expired, "Expired sessions");
        }
        expired
    }

    async fn discard_if_closed(&self, id: Uuid, update: &FlowUpdate) {
        if update.state.step == FlowStep::Closed {
            self.sessions.write().await.remove(&id);
            info!(session = %id, "Session finished");
        }
    }
}

/// Run `expire_idle` every `interval` in the background.
pub fn spawn_expiry_sweep(
    sessions: Arc<SessionManager>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sessions.expire_idle().await;
        }
    })
}
