use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::models::{ChangeEvent, Credentials, NewTask, OldTask, Principal, Task, TaskId, TaskPatch};
use crate::remote::{AuthService, Notification, RecordStore, Scope, Subscription};
use crate::services::reconciler::{PendingTask, ProvisionalToken, TaskList};

const COMMAND_CAPACITY: usize = 64;

/// How the list learns about its own inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Keep a change subscription open and rely on notifications.
    Realtime,
    /// No subscription; re-fetch the whole list after every insert.
    Refetch,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Only the signed-in principal's rows are loaded and subscribed.
    pub owner_scoped: bool,
    pub sync_mode: SyncMode,
    pub resubscribe_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            owner_scoped: true,
            sync_mode: SyncMode::Realtime,
            resubscribe_delay: Duration::from_secs(5),
        }
    }
}

/// Snapshot published after every step of the session loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskView {
    pub tasks: Vec<Task>,
    pub pending: Vec<PendingTask>,
    pub total: usize,
    pub loaded: bool,
    pub filter_text: String,
    pub hide_completed: bool,
    pub editing: Option<TaskId>,
    pub principal: Option<Principal>,
    pub last_error: Option<String>,
}

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

enum Command {
    LoadAll(Reply<usize>),
    Insert(NewTask, Reply<Option<Task>>),
    Update(TaskId, TaskPatch, Reply<Option<Task>>),
    Remove(TaskId, Reply<()>),
    ToggleCompleted(TaskId, Reply<Option<Task>>),
    SetFilterText(String, Reply<()>),
    SetHideCompleted(bool, Reply<()>),
    BeginEdit(TaskId, Reply<()>),
    CancelEdit(Option<TaskId>, Reply<()>),
    SignIn(Credentials, Reply<Principal>),
    SignUp(Credentials, Reply<Principal>),
    SignOut(Reply<()>),
    Close(oneshot::Sender<()>),
}

impl Command {
    /// The task a mutation targets. Mutations of one task run one at a time.
    fn record_id(&self) -> Option<TaskId> {
        match self {
            Command::Update(id, ..) | Command::Remove(id, _) | Command::ToggleCompleted(id, _) => {
                Some(*id)
            }
            _ => None,
        }
    }
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<TaskView>,
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, AppError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AppError::SessionClosed)?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }

    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    pub fn view(&self) -> TaskView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<TaskView> {
        self.view.clone()
    }

    pub async fn load_all(&self) -> Result<usize, AppError> {
        self.request(Command::LoadAll).await
    }

    /// `Ok(None)` when the input was blank and nothing was sent.
    pub async fn insert(&self, task: NewTask) -> Result<Option<Task>, AppError> {
        self.request(|reply| Command::Insert(task, reply)).await
    }

    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Option<Task>, AppError> {
        self.request(|reply| Command::Update(id, patch, reply)).await
    }

    pub async fn remove(&self, id: TaskId) -> Result<(), AppError> {
        self.request(|reply| Command::Remove(id, reply)).await
    }

    pub async fn toggle_completed(&self, id: TaskId) -> Result<Option<Task>, AppError> {
        self.request(|reply| Command::ToggleCompleted(id, reply)).await
    }

    pub async fn set_filter_text(&self, text: impl Into<String>) -> Result<(), AppError> {
        let text = text.into();
        self.request(|reply| Command::SetFilterText(text, reply)).await
    }

    pub async fn set_hide_completed(&self, hide: bool) -> Result<(), AppError> {
        self.request(|reply| Command::SetHideCompleted(hide, reply)).await
    }

    pub async fn begin_edit(&self, id: TaskId) -> Result<(), AppError> {
        self.request(|reply| Command::BeginEdit(id, reply)).await
    }

    pub async fn cancel_edit(&self) -> Result<(), AppError> {
        self.request(|reply| Command::CancelEdit(None, reply)).await
    }

    /// Ends editing only if `id` is the row being edited.
    pub async fn cancel_edit_of(&self, id: TaskId) -> Result<(), AppError> {
        self.request(|reply| Command::CancelEdit(Some(id), reply)).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let creds = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.request(|reply| Command::SignIn(creds, reply)).await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AppError> {
        let creds = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.request(|reply| Command::SignUp(creds, reply)).await
    }

    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.request(Command::SignOut).await
    }
}


/// A running session: one task owns the list and processes every command,
/// store response and change notification in order. Store and auth calls
/// run on their own tasks and report back as responses, so a slow call
/// only holds up the caller that made it.
pub struct Session {
    handle: SessionHandle,
    worker: JoinHandle<()>,
}

impl Session {
    pub fn open(
        store: Arc<dyn RecordStore>,
        auth: Arc<dyn AuthService>,
        config: SessionConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(TaskView::default());

        let worker = SessionWorker {
            store,
            auth,
            config,
            list: TaskList::new(),
            principal: None,
            subscription: None,
            resubscribe_at: None,
            last_error: None,
            view: view_tx,
            responses: responses_tx,
            calls: JoinSet::new(),
            generation: 0,
            issued_loads: 0,
            applied_load: 0,
            loads_outstanding: 0,
            journal: Vec::new(),
            auth_seq: 0,
            in_flight: HashMap::new(),
        };
        let worker = tokio::spawn(worker.run(commands_rx, responses_rx));

        Self {
            handle: SessionHandle {
                commands: commands_tx,
                view: view_rx,
            },
            worker,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Unsubscribes, empties the list and waits for the loop to finish.
    /// Calls still outstanding are abandoned and their callers see
    /// `SessionClosed`.
    pub async fn close(self) {
        let (tx, rx) = oneshot::channel();
        if self.handle.commands.send(Command::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = self.worker.await {
            error!("session worker ended abnormally: {}", e);
        }
    }
}

/// Who is waiting on a load to finish.
enum Waiter {
    Load(Reply<usize>),
    /// Refetch mode: the insert reply goes out once the list is reloaded.
    Insert(Task, Reply<Option<Task>>),
    SignIn(Principal, Reply<Principal>),
}

enum Outcome {
    Loaded {
        seq: u64,
        scope: Scope,
        subscription: Option<Result<Subscription, AppError>>,
        result: Result<Vec<Task>, AppError>,
        waiter: Option<Waiter>,
    },
    Inserted {
        token: ProvisionalToken,
        result: Result<Task, AppError>,
        reply: Reply<Option<Task>>,
    },
    Updated {
        id: TaskId,
        patch: TaskPatch,
        result: Result<(), AppError>,
        reply: Reply<Option<Task>>,
    },
    Removed {
        id: TaskId,
        result: Result<(), AppError>,
        reply: Reply<()>,
    },
    Authenticated {
        seq: u64,
        result: Result<Principal, AppError>,
        reply: Reply<Principal>,
    },
}

/// A finished store or auth call, stamped with the generation it was
/// started under.
struct Response {
    generation: u64,
    outcome: Outcome,
}

enum Step {
    Command(Option<Command>),
    Response(Response),
    Notification(Option<Notification>),
    Resubscribe,
}

struct SessionWorker {
    store: Arc<dyn RecordStore>,
    auth: Arc<dyn AuthService>,
    config: SessionConfig,
    list: TaskList,
    principal: Option<Principal>,
    subscription: Option<Subscription>,
    resubscribe_at: Option<Instant>,
    last_error: Option<String>,
    view: watch::Sender<TaskView>,
    responses: mpsc::UnboundedSender<Response>,
    /// Outstanding store and auth calls, aborted when the worker ends.
    calls: JoinSet<()>,
    /// Bumped on every teardown. Responses from an older generation
    /// belong to a discarded list and are not applied.
    generation: u64,
    issued_loads: u64,
    applied_load: u64,
    loads_outstanding: usize,
    /// Changes applied while a load was outstanding, tagged with the last
    /// load issued at the time. A load snapshot predates them, so they are
    /// replayed on top of it.
    journal: Vec<(u64, ChangeEvent)>,
    /// Bumped by every sign-in, sign-up and sign-out; only the latest
    /// auth call may switch the principal.
    auth_seq: u64,
    /// Mutations waiting behind an outstanding call on the same task.
    in_flight: HashMap<TaskId, VecDeque<Command>>,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut responses: mpsc::UnboundedReceiver<Response>,
    ) {
        info!(
            owner_scoped = self.config.owner_scoped,
            sync_mode = ?self.config.sync_mode,
            "session opened"
        );
        if !self.config.owner_scoped {
            self.activate(None);
        }
        self.publish();

        loop {
            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                Some(response) = responses.recv() => Step::Response(response),
                note = next_notification(&mut self.subscription) => Step::Notification(note),
                _ = resubscribe_timer(self.resubscribe_at) => Step::Resubscribe,
            };

            match step {
                Step::Command(None) => {
                    self.teardown();
                    break;
                }
                Step::Command(Some(Command::Close(done))) => {
                    self.teardown();
                    self.publish();
                    let _ = done.send(());
                    break;
                }
                Step::Command(Some(cmd)) => self.handle_command(cmd),
                Step::Response(response) => self.handle_response(response),
                Step::Notification(Some(note)) => self.handle_notification(note),
                Step::Notification(None) => self.channel_lost(),
                Step::Resubscribe => {
                    self.resubscribe_at = None;
                    if self.scope().is_ok() {
                        self.activate(None);
                    }
                }
            }
            self.publish();
        }
        info!("session closed");
    }

    fn handle_command(&mut self, cmd: Command) {
        if let Some(id) = cmd.record_id() {
            if let Some(queue) = self.in_flight.get_mut(&id) {
                debug!(%id, "waiting for the outstanding change to this task");
                queue.push_back(cmd);
                return;
            }
        }

        match cmd {
            Command::LoadAll(reply) => self.load(Some(Waiter::Load(reply)), false),
            Command::Insert(task, reply) => self.insert(task, reply),
            Command::Update(id, patch, reply) => self.update(id, patch, reply),
            Command::Remove(id, reply) => self.remove(id, reply),
            Command::ToggleCompleted(id, reply) => self.toggle_completed(id, reply),
            Command::SetFilterText(text, reply) => {
                self.list.set_filter_text(text);
                self.respond(reply, Ok(()));
            }
            Command::SetHideCompleted(hide, reply) => {
                self.list.set_hide_completed(hide);
                self.respond(reply, Ok(()));
            }
            Command::BeginEdit(id, reply) => {
                let result = if self.list.begin_edit(id) {
                    Ok(())
                } else {
                    Err(AppError::NotFound)
                };
                self.respond(reply, result);
            }
            Command::CancelEdit(target, reply) => {
                match target {
                    Some(id) => {
                        self.list.cancel_edit_of(id);
                    }
                    None => self.list.cancel_edit(),
                }
                self.respond(reply, Ok(()));
            }
            Command::SignIn(creds, reply) => self.sign_in(creds, false, reply),
            Command::SignUp(creds, reply) => self.sign_in(creds, true, reply),
            Command::SignOut(reply) => self.sign_out(reply),
            Command::Close(done) => {
                // Normally intercepted by the loop.
                let _ = done.send(());
            }
        }
    }

    /// Replies go out after the new view is published, so a caller that
    /// reads the view right after awaiting sees its own change.
    fn respond<T>(&self, reply: Reply<T>, result: Result<T, AppError>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn spawn<F>(&mut self, call: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let responses = self.responses.clone();
        let generation = self.generation;
        self.calls.spawn(async move {
            let outcome = call.await;
            let _ = responses.send(Response {
                generation,
                outcome,
            });
        });
    }

    fn handle_response(&mut self, response: Response) {
        while self.calls.try_join_next().is_some() {}
        let current = response.generation == self.generation;

        match response.outcome {
            Outcome::Loaded {
                seq,
                scope,
                subscription,
                result,
                waiter,
            } => {
                self.loads_outstanding = self.loads_outstanding.saturating_sub(1);
                if !current {
                    debug!("dropping a load started before the list was reset");
                    if let Some(waiter) = waiter {
                        self.finish_load(waiter, Err(AppError::Superseded));
                    }
                    return;
                }
                if let Some(subscription) = subscription {
                    self.install(subscription);
                }
                let result = self.apply_load(seq, &scope, result);
                if self.loads_outstanding == 0 {
                    self.journal.clear();
                }
                if let Some(waiter) = waiter {
                    self.finish_load(waiter, result);
                }
            }
            Outcome::Inserted {
                token,
                result,
                reply,
            } => {
                if !current {
                    debug!("ignoring an insert response for a discarded list");
                    let _ = reply.send(result.map(Some));
                    return;
                }
                match result {
                    Ok(created) => {
                        info!(id = %created.id, "task created");
                        self.list.settle_provisional(token, Some(created.clone()));
                        self.record(ChangeEvent::Insert {
                            new: created.clone(),
                        });
                        self.last_error = None;
                        if self.config.sync_mode == SyncMode::Refetch {
                            self.load(Some(Waiter::Insert(created, reply)), false);
                        } else {
                            self.respond(reply, Ok(Some(created)));
                        }
                    }
                    Err(e) => {
                        self.list.settle_provisional(token, None);
                        let result = self.fail("adding the task", e);
                        self.respond(reply, result);
                    }
                }
            }
            Outcome::Updated {
                id,
                patch,
                result,
                reply,
            } => {
                if !current {
                    debug!(%id, "ignoring an update response for a discarded list");
                    let _ = reply.send(result.map(|()| None));
                } else {
                    let result = match result {
                        Ok(()) => {
                            self.last_error = None;
                            let updated = self.list.apply_patch(id, &patch).cloned();
                            if let Some(new) = updated.clone() {
                                self.record(ChangeEvent::Update { new });
                            }
                            Ok(updated)
                        }
                        Err(e) => self.fail("updating the task", e),
                    };
                    self.respond(reply, result);
                }
                self.release(id);
            }
            Outcome::Removed { id, result, reply } => {
                if !current {
                    debug!(%id, "ignoring a delete response for a discarded list");
                    let _ = reply.send(result);
                } else {
                    let result = match result {
                        Ok(()) => {
                            self.list.remove(id);
                            self.record(ChangeEvent::Delete {
                                old: OldTask { id, user_id: None },
                            });
                            self.last_error = None;
                            info!(%id, "task deleted");
                            Ok(())
                        }
                        Err(e) => self.fail("deleting the task", e),
                    };
                    self.respond(reply, result);
                }
                self.release(id);
            }
            Outcome::Authenticated { seq, result, reply } => {
                if seq != self.auth_seq {
                    debug!("ignoring an auth response overtaken by a later sign-in or sign-out");
                    let _ = reply.send(Err(AppError::Superseded));
                    return;
                }
                match result {
                    Ok(principal) => {
                        info!(principal = %principal.id, "signed in");
                        self.switch_principal(Some(principal.clone()));
                        if self.config.owner_scoped {
                            self.activate(Some(Waiter::SignIn(principal, reply)));
                        } else {
                            self.respond(reply, Ok(principal));
                        }
                    }
                    Err(e) => {
                        warn!("Authentication failed: {}", e);
                        self.last_error = Some(e.to_string());
                        self.respond(reply, Err(e));
                    }
                }
            }
        }
    }

    /// Runs the mutations that queued up behind the one that just finished.
    /// The first that reaches the store claims the task again and the rest
    /// queue behind it.
    fn release(&mut self, id: TaskId) {
        if let Some(queued) = self.in_flight.remove(&id) {
            for cmd in queued {
                self.handle_command(cmd);
            }
        }
    }

    fn handle_notification(&mut self, note: Notification) {
        match note {
            Notification::Change(event) => {
                let Ok(scope) = self.scope() else {
                    return;
                };
                if !scope.admits_event(&event) {
                    debug!(kind = event.kind(), id = %event.id(), "dropping change outside scope");
                    return;
                }
                debug!(kind = event.kind(), id = %event.id(), "Change received");
                self.list.apply_event(&event);
                self.record(event);
            }
            Notification::Resync => {
                info!("change channel requested resync, reloading");
                self.load(None, false);
            }
        }
    }

    fn channel_lost(&mut self) {
        warn!(
            delay = ?self.config.resubscribe_delay,
            "change channel closed, resubscribing after delay"
        );
        self.subscription = None;
        self.resubscribe_at = Some(Instant::now() + self.config.resubscribe_delay);
    }

    fn install(&mut self, subscription: Result<Subscription, AppError>) {
        match subscription {
            Ok(sub) if self.subscription.is_none() => self.subscription = Some(sub),
            Ok(sub) => sub.unsubscribe(),
            Err(e) => {
                warn!("Error subscribing to task changes: {}", e);
                self.resubscribe_at = Some(Instant::now() + self.config.resubscribe_delay);
            }
        }
    }

    fn scope(&self) -> Result<Scope, AppError> {
        if !self.config.owner_scoped {
            return Ok(Scope::All);
        }
        self.principal
            .clone()
            .map(Scope::Owner)
            .ok_or(AppError::Unauthorized)
    }

    /// Subscribes (realtime mode) and then loads, so nothing that changes
    /// between the two is missed.
    fn activate(&mut self, waiter: Option<Waiter>) {
        let subscribe = self.config.sync_mode == SyncMode::Realtime && self.subscription.is_none();
        self.load(waiter, subscribe);
    }

    fn load(&mut self, waiter: Option<Waiter>, subscribe: bool) {
        let scope = match self.scope() {
            Ok(scope) => scope,
            Err(e) => {
                if let Some(waiter) = waiter {
                    self.finish_load(waiter, Err(e));
                }
                return;
            }
        };
        self.issued_loads += 1;
        self.loads_outstanding += 1;
        let seq = self.issued_loads;
        let store = self.store.clone();

        self.spawn(async move {
            let subscription = if subscribe {
                Some(store.subscribe(&scope).await)
            } else {
                None
            };
            let result = store.select_all(&scope).await;
            Outcome::Loaded {
                seq,
                scope,
                subscription,
                result,
                waiter,
            }
        });
    }

    /// Replaces the list from a load. On failure the previous rows stay;
    /// a load older than the last one applied is skipped.
    fn apply_load(
        &mut self,
        seq: u64,
        scope: &Scope,
        result: Result<Vec<Task>, AppError>,
    ) -> Result<usize, AppError> {
        match result {
            Ok(_) if seq < self.applied_load => {
                debug!(seq, "skipping a load overtaken by a newer one");
                Ok(self.list.len())
            }
            Ok(tasks) => {
                let tasks: Vec<Task> = tasks.into_iter().filter(|t| scope.admits(t)).collect();
                self.list.replace_all(tasks);
                for (_, event) in self.journal.iter().filter(|(tag, _)| *tag >= seq) {
                    self.list.apply_event(event);
                }
                self.journal.retain(|(tag, _)| *tag > seq);
                self.applied_load = seq;
                self.last_error = None;
                info!(count = self.list.len(), "tasks loaded");
                Ok(self.list.len())
            }
            Err(e) => self.fail("fetching the tasks", e),
        }
    }

    fn record(&mut self, event: ChangeEvent) {
        if self.loads_outstanding > 0 {
            self.journal.push((self.issued_loads, event));
        }
    }

    fn finish_load(&self, waiter: Waiter, result: Result<usize, AppError>) {
        match waiter {
            Waiter::Load(reply) => self.respond(reply, result),
            Waiter::Insert(created, reply) => self.respond(reply, Ok(Some(created))),
            Waiter::SignIn(principal, reply) => match result {
                Err(AppError::Superseded) => self.respond(reply, Err(AppError::Superseded)),
                _ => self.respond(reply, Ok(principal)),
            },
        }
    }

    fn teardown(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.generation += 1;
        self.journal.clear();
        self.resubscribe_at = None;
        self.list.clear();
    }

    fn fail<T>(&mut self, action: &str, e: AppError) -> Result<T, AppError> {
        error!("Error {}: {}", action, e);
        self.last_error = Some(e.to_string());
        Err(e)
    }

    fn insert(&mut self, input: NewTask, reply: Reply<Option<Task>>) {
        let Some(input) = input.normalized() else {
            debug!("declining insert with a blank title");
            self.respond(reply, Ok(None));
            return;
        };
        let scope = match self.scope() {
            Ok(scope) => scope,
            Err(e) => {
                self.respond(reply, Err(e));
                return;
            }
        };

        let token = self.list.begin_provisional(input.clone());
        let store = self.store.clone();
        self.spawn(async move {
            let result = store.insert(&scope, &input).await;
            Outcome::Inserted {
                token,
                result,
                reply,
            }
        });
    }

    fn update(&mut self, id: TaskId, patch: TaskPatch, reply: Reply<Option<Task>>) {
        let Some(patch) = patch.normalized() else {
            debug!(%id, "declining update that blanks the title");
            self.respond(reply, Ok(None));
            return;
        };
        if patch.is_empty() {
            let current = self.list.get(id).cloned();
            self.respond(reply, Ok(current));
            return;
        }
        let scope = match self.scope() {
            Ok(scope) => scope,
            Err(e) => {
                self.respond(reply, Err(e));
                return;
            }
        };

        self.in_flight.entry(id).or_default();
        let store = self.store.clone();
        self.spawn(async move {
            let result = store.update(&scope, id, &patch).await;
            Outcome::Updated {
                id,
                patch,
                result,
                reply,
            }
        });
    }

    /// Reads `completed` when the command is processed. A second toggle of
    /// the same task waits for the first to settle, so it sees the new value.
    fn toggle_completed(&mut self, id: TaskId, reply: Reply<Option<Task>>) {
        let Some(current) = self.list.get(id).map(|t| t.completed) else {
            self.respond(reply, Err(AppError::NotFound));
            return;
        };
        self.update(id, TaskPatch::completed(!current), reply);
    }

    fn remove(&mut self, id: TaskId, reply: Reply<()>) {
        let scope = match self.scope() {
            Ok(scope) => scope,
            Err(e) => {
                self.respond(reply, Err(e));
                return;
            }
        };

        self.in_flight.entry(id).or_default();
        let store = self.store.clone();
        self.spawn(async move {
            let result = store.delete(&scope, id).await;
            Outcome::Removed { id, result, reply }
        });
    }

    fn sign_in(&mut self, creds: Credentials, create: bool, reply: Reply<Principal>) {
        self.auth_seq += 1;
        let seq = self.auth_seq;
        let auth = self.auth.clone();

        self.spawn(async move {
            let result = if create {
                auth.sign_up(&creds.email, &creds.password).await
            } else {
                auth.sign_in(&creds.email, &creds.password).await
            };
            Outcome::Authenticated { seq, result, reply }
        });
    }

    /// Clears locally right away; the remote sign-out runs on its own and
    /// a failure there is only logged.
    fn sign_out(&mut self, reply: Reply<()>) {
        self.auth_seq += 1;
        if let Some(principal) = self.principal.clone() {
            info!(principal = %principal.id, "signed out");
            let auth = self.auth.clone();
            tokio::spawn(async move {
                if let Err(e) = auth.sign_out(&principal).await {
                    warn!("Sign out failed remotely, cleared locally anyway: {}", e);
                }
            });
        }
        self.switch_principal(None);
        self.respond(reply, Ok(()));
    }

    /// In owner-scoped mode a principal change empties the list and
    /// drops the subscription before the new principal's rows arrive.
    fn switch_principal(&mut self, principal: Option<Principal>) {
        if !self.config.owner_scoped {
            self.principal = principal;
            return;
        }

        self.teardown();
        self.last_error = None;
        self.principal = principal;
        self.publish();
    }

    fn publish(&self) {
        let view = TaskView {
            tasks: self.list.visible().into_iter().cloned().collect(),
            pending: self.list.pending(),
            total: self.list.len(),
            loaded: self.list.is_loaded(),
            filter_text: self.list.filter_text().to_string(),
            hide_completed: self.list.hide_completed(),
            editing: self.list.editing(),
            principal: self.principal.clone(),
            last_error: self.last_error.clone(),
        };
        self.view.send_replace(view);
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Notification> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn resubscribe_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
