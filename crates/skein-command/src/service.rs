#![forbid(unsafe_code)]

//! The command service: registration, listeners, and the dual execution
//! path.
//!
//! Dispatch pipeline, identical on both paths: look up the handler, push
//! an execution record, fire before-listeners, invoke the handler through
//! the container's [`Injector::invoke`], fire after-listeners on success,
//! pop the record. The asynchronous path awaits a pending handler output;
//! the synchronous path rejects one with
//! [`CommandError::PendingInSyncPath`].
//!
//! The execution stack exists for one purpose: a mutation executed
//! synchronously while an orchestrator command is running receives a
//! `trigger` param naming that orchestrator, so audit and collaboration
//! layers can attribute the mutation.
//!
//! # Invariants
//!
//! 1. Execution records are popped even when the handler fails (RAII
//!    frame guard).
//! 2. The re-entrancy depth counter is diagnostic only: it indents
//!    `tracing::debug!` dispatch lines and resets to zero when a handler
//!    fails, so later dispatches are not indented into a corrupted level.
//! 3. Listener dispatch iterates a snapshot of the listener list, so a
//!    listener that unregisters itself mid-dispatch still sees the current
//!    event but none after.
//! 4. After-listeners fire only when the handler succeeded.
//! 5. No `RefCell` borrow is held across an await point or a listener
//!    call, so handlers and listeners may dispatch re-entrantly.
//!
//! # Failure Modes
//!
//! | Failure | Path | Behavior |
//! |---------|------|----------|
//! | Unknown id | both | `Err(NotRegistered)`, logged |
//! | Handler error | both | depth reset, logged, returned |
//! | `CommandError::Custom` | async | swallowed, `Ok(false)` |
//! | `CommandError::Custom` | sync | logged, returned |
//! | Pending output | sync | depth reset, `Err(PendingInSyncPath)` |

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use skein_scope::{Disposable, Injector, ServiceId};

use crate::command::{
    Command, CommandInfo, CommandKind, CommandResult, ExecutionOptions, HandlerOutput,
    TRIGGER_PARAM,
};
use crate::error::CommandError;
use crate::registry::{CommandRegistry, MultiImplementation, RegistryEntry};

/// Identifier the command service is conventionally registered under.
pub const COMMAND_SERVICE: ServiceId<CommandService> = ServiceId::new("skein.command-service");

/// Identifier of the built-in no-op command.
pub const NIL_COMMAND_ID: &str = "skein.command.nil";

/// Callback observing one command execution.
pub type CommandListener = Rc<dyn Fn(&CommandInfo, &ExecutionOptions)>;

struct StackEntry {
    token: u64,
    info: CommandInfo,
}

/// Pops its execution record on drop, success or failure.
struct StackFrame<'a> {
    stack: &'a RefCell<Vec<StackEntry>>,
    token: u64,
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        let mut stack = self.stack.borrow_mut();
        if let Some(pos) = stack.iter().rposition(|entry| entry.token == self.token) {
            stack.remove(pos);
        }
    }
}

/// The service to register and execute commands.
pub struct CommandService {
    injector: Injector,
    registry: CommandRegistry,
    before_listeners: Rc<RefCell<Vec<CommandListener>>>,
    executed_listeners: Rc<RefCell<Vec<CommandListener>>>,
    depth: Cell<usize>,
    stack: RefCell<Vec<StackEntry>>,
    next_token: Cell<u64>,
    _nil_registration: Disposable,
}

impl CommandService {
    /// Create a service dispatching through `injector`.
    #[must_use]
    pub fn new(injector: Injector) -> Self {
        let registry = CommandRegistry::new();
        let nil = registry
            .register(Command::new(NIL_COMMAND_ID, CommandKind::Command, |_, _, _| {
                HandlerOutput::success()
            }))
            .expect("nil command registers into an empty registry");
        Self {
            injector,
            registry,
            before_listeners: Rc::new(RefCell::new(Vec::new())),
            executed_listeners: Rc::new(RefCell::new(Vec::new())),
            depth: Cell::new(0),
            stack: RefCell::new(Vec::new()),
            next_token: Cell::new(0),
            _nil_registration: nil,
        }
    }

    /// Clear both listener lists. Registered commands stay usable.
    pub fn dispose(&self) {
        self.before_listeners.borrow_mut().clear();
        self.executed_listeners.borrow_mut().clear();
    }

    /// Whether a command is registered under `id`.
    #[must_use]
    pub fn has_command(&self, id: &str) -> bool {
        self.registry.has_command(id)
    }

    /// Register a single command; see [`CommandRegistry::register`].
    pub fn register(&self, command: Command) -> Result<Disposable, CommandError> {
        self.registry.register(command)
    }

    /// Register a multi-command implementation; see
    /// [`CommandRegistry::register_multi`].
    pub fn register_multi(
        &self,
        item: MultiImplementation,
    ) -> Result<Disposable, CommandError> {
        self.registry.register_multi(item)
    }

    /// Register a callback fired before each command's handler runs.
    pub fn before_executed(&self, listener: CommandListener) -> Result<Disposable, CommandError> {
        Self::add_listener(&self.before_listeners, listener)
    }

    /// Register a callback fired after each command's handler succeeds.
    pub fn on_executed(&self, listener: CommandListener) -> Result<Disposable, CommandError> {
        Self::add_listener(&self.executed_listeners, listener)
    }

    /// Execute a command, awaiting a pending handler output.
    ///
    /// A [`CommandError::Custom`] from the handler is swallowed and
    /// reported as `Ok(false)`; every other error is logged and returned.
    pub async fn execute(
        &self,
        id: &str,
        params: Option<Value>,
        options: &ExecutionOptions,
    ) -> CommandResult {
        match self.execute_inner(id, params, options).await {
            Ok(value) => Ok(value),
            Err(CommandError::Custom(reason)) => {
                tracing::debug!(command = id, %reason, "custom execution error; reporting false");
                Ok(Value::Bool(false))
            }
            Err(err) => {
                tracing::error!(command = id, error = %err, "command execution failed");
                Err(err)
            }
        }
    }

    /// Execute a command synchronously.
    ///
    /// Fails with [`CommandError::PendingInSyncPath`] when the handler
    /// returns a pending output. Every error, `Custom` included, is logged
    /// and returned.
    pub fn execute_sync(
        &self,
        id: &str,
        params: Option<Value>,
        options: &ExecutionOptions,
    ) -> CommandResult {
        match self.execute_sync_inner(id, params, options) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::error!(command = id, error = %err, "command execution failed");
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        id: &str,
        params: Option<Value>,
        options: &ExecutionOptions,
    ) -> CommandResult {
        let entry = self.lookup(id)?;
        let info = CommandInfo {
            id: id.to_owned(),
            kind: Some(entry.kind()),
            params,
        };
        let _frame = self.push_stack(&info);

        Self::fire(&self.before_listeners, &info, options);
        let output = self.invoke_entry(&entry, &info, options)?;
        let result = match output {
            HandlerOutput::Ready(result) => result,
            HandlerOutput::Pending(future) => future.await,
        };
        let value = self.settle(result)?;
        Self::fire(&self.executed_listeners, &info, options);
        Ok(value)
    }

    fn execute_sync_inner(
        &self,
        id: &str,
        params: Option<Value>,
        options: &ExecutionOptions,
    ) -> CommandResult {
        let entry = self.lookup(id)?;

        // A mutation running inside an orchestrator is tagged with the
        // orchestrator's id, so collaboration and audit layers can tell
        // what triggered it.
        let params = match (entry.kind(), self.current_trigger()) {
            (CommandKind::Mutation, Some(trigger)) => {
                let mut map = match params {
                    Some(Value::Object(map)) => map,
                    // Non-object params are replaced; the trigger tag has
                    // nowhere else to live.
                    _ => serde_json::Map::new(),
                };
                map.insert(TRIGGER_PARAM.to_owned(), Value::String(trigger));
                Some(Value::Object(map))
            }
            _ => params,
        };

        let info = CommandInfo {
            id: id.to_owned(),
            kind: Some(entry.kind()),
            params,
        };
        let _frame = self.push_stack(&info);

        Self::fire(&self.before_listeners, &info, options);
        let output = self.invoke_entry(&entry, &info, options)?;
        let result = match output {
            HandlerOutput::Ready(result) => result,
            HandlerOutput::Pending(_) => {
                self.depth.set(0);
                Err(CommandError::PendingInSyncPath(id.to_owned()))
            }
        };
        let value = self.settle(result)?;
        Self::fire(&self.executed_listeners, &info, options);
        Ok(value)
    }

    fn lookup(&self, id: &str) -> Result<RegistryEntry, CommandError> {
        self.registry
            .get(id)
            .ok_or_else(|| CommandError::NotRegistered(id.to_owned()))
    }

    /// Invoke the handler through the container, bumping the diagnostic
    /// depth counter around it.
    fn invoke_entry(
        &self,
        entry: &RegistryEntry,
        info: &CommandInfo,
        options: &ExecutionOptions,
    ) -> Result<HandlerOutput, CommandError> {
        tracing::debug!(
            "{}executing command '{}'",
            "|-".repeat(self.depth.get()),
            info.id
        );
        self.depth.set(self.depth.get() + 1);
        match self
            .injector
            .invoke(|accessor| entry.invoke(accessor, info.params.as_ref(), options))
        {
            Ok(output) => Ok(output),
            Err(err) => {
                self.depth.set(0);
                Err(err.into())
            }
        }
    }

    /// Balance the depth counter: decrement on success, reset on failure.
    fn settle(&self, result: CommandResult) -> CommandResult {
        match result {
            Ok(value) => {
                self.depth.set(self.depth.get().saturating_sub(1));
                Ok(value)
            }
            Err(err) => {
                self.depth.set(0);
                Err(err)
            }
        }
    }

    fn push_stack(&self, info: &CommandInfo) -> StackFrame<'_> {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.stack.borrow_mut().push(StackEntry {
            token,
            info: info.clone(),
        });
        StackFrame {
            stack: &self.stack,
            token,
        }
    }

    /// The id of the innermost orchestrator on the execution stack.
    fn current_trigger(&self) -> Option<String> {
        self.stack
            .borrow()
            .iter()
            .rev()
            .find(|entry| entry.info.kind == Some(CommandKind::Command))
            .map(|entry| entry.info.id.clone())
    }

    fn add_listener(
        list: &Rc<RefCell<Vec<CommandListener>>>,
        listener: CommandListener,
    ) -> Result<Disposable, CommandError> {
        {
            let mut listeners = list.borrow_mut();
            if listeners.iter().any(|held| Rc::ptr_eq(held, &listener)) {
                return Err(CommandError::DuplicateListener);
            }
            listeners.push(Rc::clone(&listener));
        }
        let list = Rc::clone(list);
        Ok(Disposable::new(move || {
            let mut listeners = list.borrow_mut();
            if let Some(pos) = listeners.iter().position(|held| Rc::ptr_eq(held, &listener)) {
                listeners.remove(pos);
            }
        }))
    }

    /// Dispatch to a snapshot of the list, so listeners may mutate it.
    fn fire(
        list: &Rc<RefCell<Vec<CommandListener>>>,
        info: &CommandInfo,
        options: &ExecutionOptions,
    ) {
        let snapshot: Vec<CommandListener> = list.borrow().clone();
        for listener in snapshot {
            listener(info, options);
        }
    }
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService")
            .field("registry", &self.registry)
            .field("before_listeners", &self.before_listeners.borrow().len())
            .field("executed_listeners", &self.executed_listeners.borrow().len())
            .field("depth", &self.depth.get())
            .field("stack_depth", &self.stack.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;
    use serde_json::json;
    use skein_scope::Dependency;

    use super::*;

    fn service() -> Rc<CommandService> {
        let injector = Injector::new(vec![Dependency::factory(COMMAND_SERVICE, |accessor| {
            CommandService::new(accessor.injector().clone())
        })]);
        injector.get(&COMMAND_SERVICE).unwrap()
    }

    fn probe_listener(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> CommandListener {
        let log = Rc::clone(log);
        Rc::new(move |info, _| log.borrow_mut().push(format!("{tag}:{}", info.id)))
    }

    #[test]
    fn unregistered_id_fails_on_both_paths() {
        let service = service();
        let err = service
            .execute_sync("a.command.nope", None, &ExecutionOptions::new())
            .unwrap_err();
        assert_eq!(err, CommandError::NotRegistered("a.command.nope".into()));

        let err = block_on(service.execute("a.command.nope", None, &ExecutionOptions::new()))
            .unwrap_err();
        assert_eq!(err, CommandError::NotRegistered("a.command.nope".into()));
    }

    #[test]
    fn listeners_handler_order() {
        let service = service();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        let _cmd = service
            .register(Command::new("a.command.x", CommandKind::Command, move |_, _, _| {
                l.borrow_mut().push("handler".into());
                HandlerOutput::success()
            }))
            .unwrap();
        let _before = service
            .before_executed(probe_listener(&log, "before"))
            .unwrap();
        let _after = service.on_executed(probe_listener(&log, "after")).unwrap();

        let result = service
            .execute_sync("a.command.x", None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(result, Value::Bool(true));
        assert_eq!(
            *log.borrow(),
            vec!["before:a.command.x", "handler", "after:a.command.x"]
        );
    }

    #[test]
    fn after_listener_skipped_on_failure() {
        let service = service();
        let log = Rc::new(RefCell::new(Vec::new()));

        let _cmd = service
            .register(Command::new("a.command.x", CommandKind::Command, |_, _, _| {
                HandlerOutput::fail(CommandError::Failed("boom".into()))
            }))
            .unwrap();
        let _before = service
            .before_executed(probe_listener(&log, "before"))
            .unwrap();
        let _after = service.on_executed(probe_listener(&log, "after")).unwrap();

        let err = service
            .execute_sync("a.command.x", None, &ExecutionOptions::new())
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("boom".into()));
        assert_eq!(*log.borrow(), vec!["before:a.command.x"]);
    }

    #[test]
    fn duplicate_listener_fails() {
        let service = service();
        let listener: CommandListener = Rc::new(|_, _| {});
        let _keep = service.before_executed(Rc::clone(&listener)).unwrap();
        assert_eq!(
            service.before_executed(listener).unwrap_err(),
            CommandError::DuplicateListener
        );
    }

    #[test]
    fn disposed_listener_stops_firing() {
        let service = service();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _cmd = service
            .register(Command::new("a.command.x", CommandKind::Command, |_, _, _| {
                HandlerOutput::success()
            }))
            .unwrap();

        let registration = service.on_executed(probe_listener(&log, "after")).unwrap();
        service
            .execute_sync("a.command.x", None, &ExecutionOptions::new())
            .unwrap();
        registration.dispose();
        service
            .execute_sync("a.command.x", None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(*log.borrow(), vec!["after:a.command.x"]);
    }

    #[test]
    fn disposed_command_stops_resolving() {
        let service = service();
        let registration = service
            .register(Command::new("a.command.x", CommandKind::Command, |_, _, _| {
                HandlerOutput::success()
            }))
            .unwrap();
        registration.dispose();
        assert!(!service.has_command("a.command.x"));
        assert!(matches!(
            service
                .execute_sync("a.command.x", None, &ExecutionOptions::new())
                .unwrap_err(),
            CommandError::NotRegistered(_)
        ));
    }

    #[test]
    fn pending_output_rejected_on_sync_path() {
        let service = service();
        let _cmd = service
            .register(Command::new("a.command.slow", CommandKind::Command, |_, _, _| {
                HandlerOutput::pending(async { Ok(Value::Bool(true)) })
            }))
            .unwrap();
        assert_eq!(
            service
                .execute_sync("a.command.slow", None, &ExecutionOptions::new())
                .unwrap_err(),
            CommandError::PendingInSyncPath("a.command.slow".into())
        );
        // The same handler is fine on the async path.
        let value =
            block_on(service.execute("a.command.slow", None, &ExecutionOptions::new())).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn custom_error_swallowed_async_only() {
        let service = service();
        let _cmd = service
            .register(Command::new("a.command.x", CommandKind::Command, |_, _, _| {
                HandlerOutput::fail(CommandError::Custom("policy".into()))
            }))
            .unwrap();

        let value =
            block_on(service.execute("a.command.x", None, &ExecutionOptions::new())).unwrap();
        assert_eq!(value, Value::Bool(false), "async path reports false");

        let err = service
            .execute_sync("a.command.x", None, &ExecutionOptions::new())
            .unwrap_err();
        assert_eq!(err, CommandError::Custom("policy".into()), "sync path propagates");
    }

    #[test]
    fn mutation_inside_orchestrator_gets_trigger() {
        let service = service();
        let seen_trigger = Rc::new(RefCell::new(None));

        let seen = Rc::clone(&seen_trigger);
        let _mutation = service
            .register(Command::new(
                "doc.mutation.set-cell",
                CommandKind::Mutation,
                move |_, params, _| {
                    *seen.borrow_mut() = params
                        .and_then(|p| p.get(TRIGGER_PARAM))
                        .and_then(Value::as_str)
                        .map(str::to_owned);
                    HandlerOutput::success()
                },
            ))
            .unwrap();
        let _orchestrator = service
            .register(Command::new(
                "doc.command.fill",
                CommandKind::Command,
                |accessor, _, options| {
                    HandlerOutput::try_ready({
                        let options = options.clone();
                        move || {
                            let service = accessor.get(&COMMAND_SERVICE)?;
                            service.execute_sync(
                                "doc.mutation.set-cell",
                                Some(json!({"row": 1})),
                                &options,
                            )
                        }
                    })
                },
            ))
            .unwrap();

        service
            .execute_sync("doc.command.fill", None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(seen_trigger.borrow().as_deref(), Some("doc.command.fill"));
    }

    #[test]
    fn mutation_without_orchestrator_gets_no_trigger() {
        let service = service();
        let seen_params = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&seen_params);
        let _mutation = service
            .register(Command::new(
                "doc.mutation.set-cell",
                CommandKind::Mutation,
                move |_, params, _| {
                    *seen.borrow_mut() = params.cloned();
                    HandlerOutput::success()
                },
            ))
            .unwrap();
        service
            .execute_sync(
                "doc.mutation.set-cell",
                Some(json!({"row": 2})),
                &ExecutionOptions::new(),
            )
            .unwrap();
        assert_eq!(*seen_params.borrow(), Some(json!({"row": 2})));
    }

    #[test]
    fn stack_is_popped_on_failure() {
        let service = service();
        let _failing = service
            .register(Command::new(
                "doc.command.bad",
                CommandKind::Command,
                |_, _, _| HandlerOutput::fail(CommandError::Failed("nope".into())),
            ))
            .unwrap();
        let _ = service.execute_sync("doc.command.bad", None, &ExecutionOptions::new());
        assert!(service.stack.borrow().is_empty());
        assert_eq!(service.depth.get(), 0, "depth resets after failure");
    }

    #[test]
    fn depth_balances_across_nesting() {
        let service = service();
        let _inner = service
            .register(Command::new(
                "a.operation.inner",
                CommandKind::Operation,
                |_, _, _| HandlerOutput::success(),
            ))
            .unwrap();
        let _outer = service
            .register(Command::new(
                "a.command.outer",
                CommandKind::Command,
                |accessor, _, options| {
                    HandlerOutput::try_ready({
                        let options = options.clone();
                        move || {
                            accessor
                                .get(&COMMAND_SERVICE)?
                                .execute_sync("a.operation.inner", None, &options)
                        }
                    })
                },
            ))
            .unwrap();
        service
            .execute_sync("a.command.outer", None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(service.depth.get(), 0);
    }

    #[test]
    fn listener_sees_execution_options() {
        let service = service();
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        let _listener = service
            .before_executed(Rc::new(move |_, options| {
                *s.borrow_mut() = Some(options.clone());
            }))
            .unwrap();

        let options = ExecutionOptions::new()
            .only_local(true)
            .with_extra("revision", 7);
        service
            .execute_sync(NIL_COMMAND_ID, None, &options)
            .unwrap();
        let seen = seen.borrow().clone().unwrap();
        assert_eq!(seen.only_local, Some(true));
        assert_eq!(seen.extra("revision"), Some(&Value::from(7)));
    }

    #[test]
    fn nil_command_is_preregistered() {
        let service = service();
        assert!(service.has_command(NIL_COMMAND_ID));
        let value = service
            .execute_sync(NIL_COMMAND_ID, None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn dispose_clears_listeners() {
        let service = service();
        let log = Rc::new(RefCell::new(Vec::new()));
        let _before = service
            .before_executed(probe_listener(&log, "before"))
            .unwrap();
        service.dispose();
        service
            .execute_sync(NIL_COMMAND_ID, None, &ExecutionOptions::new())
            .unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn listener_unregistering_itself_mid_dispatch() {
        let service = service();
        let log = Rc::new(RefCell::new(Vec::new()));
        let registration: Rc<RefCell<Option<Disposable>>> = Rc::new(RefCell::new(None));

        let l = Rc::clone(&log);
        let r = Rc::clone(&registration);
        let listener: CommandListener = Rc::new(move |_, _| {
            l.borrow_mut().push("fired".to_owned());
            if let Some(disposable) = r.borrow_mut().take() {
                disposable.dispose();
            }
        });
        *registration.borrow_mut() = Some(service.before_executed(listener).unwrap());

        service
            .execute_sync(NIL_COMMAND_ID, None, &ExecutionOptions::new())
            .unwrap();
        service
            .execute_sync(NIL_COMMAND_ID, None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(*log.borrow(), vec!["fired"], "fires once, then never again");
    }
}
