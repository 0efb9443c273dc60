#![forbid(unsafe_code)]

//! User-auth module and its commands.
//!
//! The flow mirrors a typical login dialog: `auth.command.sign-in`
//! orchestrates the persisted `auth.mutation.set-user` and the transient
//! `auth.operation.set-dialog-visible`; `auth.command.sign-out` is a
//! multi-command whose audited implementation outranks the plain one
//! whenever an audit log is in scope.

use std::cell::{Cell, RefCell};

use serde_json::{Value, json};

use skein_command::{
    COMMAND_SERVICE, Command, CommandError, CommandKind, CommandService, HandlerOutput,
    MultiImplementation, TRIGGER_PARAM,
};
use skein_scope::{DisposableCollection, ServiceId};

pub const USER_AUTH: ServiceId<UserAuthModule> = ServiceId::new("auth.user-module");
pub const AUDIT_LOG: ServiceId<AuditLog> = ServiceId::new("auth.audit-log");

pub const SIGN_IN: &str = "auth.command.sign-in";
pub const SIGN_OUT: &str = "auth.command.sign-out";
pub const SET_USER: &str = "auth.mutation.set-user";
pub const SET_DIALOG_VISIBLE: &str = "auth.operation.set-dialog-visible";

/// Access level of the signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    Admin,
    User,
    #[default]
    Guest,
}

impl Role {
    fn parse(token: &str) -> Role {
        match token {
            "admin" => Role::Admin,
            "user" => Role::User,
            _ => Role::Guest,
        }
    }
}

/// The persisted user record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserStore {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Holds auth state and the transient dialog flag.
#[derive(Debug, Default)]
pub struct UserAuthModule {
    store: RefCell<UserStore>,
    dialog_visible: Cell<bool>,
    last_trigger: RefCell<Option<String>>,
}

impl UserAuthModule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current user record.
    #[must_use]
    pub fn snapshot(&self) -> UserStore {
        self.store.borrow().clone()
    }

    /// Whether the login dialog is showing.
    #[must_use]
    pub fn dialog_visible(&self) -> bool {
        self.dialog_visible.get()
    }

    /// Id of the orchestrator behind the last `set-user` mutation.
    #[must_use]
    pub fn last_trigger(&self) -> Option<String> {
        self.last_trigger.borrow().clone()
    }

    /// Reset to a signed-out guest.
    pub fn reset(&self) {
        *self.store.borrow_mut() = UserStore::default();
    }

    fn apply_user(&self, params: &Value) {
        let mut store = self.store.borrow_mut();
        store.name = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        store.email = params
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        store.role = params
            .get("role")
            .and_then(Value::as_str)
            .map(Role::parse)
            .unwrap_or_default();
        *self.last_trigger.borrow_mut() = params
            .get(TRIGGER_PARAM)
            .and_then(Value::as_str)
            .map(str::to_owned);
    }
}

/// Append-only record of auth events.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RefCell<Vec<String>>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

/// Register the auth commands; the returned collection unregisters them
/// all when dropped.
pub fn register_commands(
    service: &CommandService,
) -> Result<DisposableCollection, CommandError> {
    let mut registrations = DisposableCollection::new();

    registrations.add(service.register(Command::new(
        SET_USER,
        CommandKind::Mutation,
        |accessor, params, _| {
            let module = accessor.get(&USER_AUTH);
            let params = params.cloned();
            HandlerOutput::try_ready(move || {
                let Some(params) = params else {
                    return Err(CommandError::Failed("set-user requires params".into()));
                };
                module?.apply_user(&params);
                Ok(Value::Bool(true))
            })
        },
    ))?);

    registrations.add(service.register(Command::new(
        SET_DIALOG_VISIBLE,
        CommandKind::Operation,
        |accessor, params, _| {
            let module = accessor.get(&USER_AUTH);
            let visible = params
                .and_then(|p| p.get("visible"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            HandlerOutput::try_ready(move || {
                module?.dialog_visible.set(visible);
                Ok(Value::Bool(true))
            })
        },
    ))?);

    registrations.add(service.register(Command::new(
        SIGN_IN,
        CommandKind::Command,
        |accessor, params, options| {
            let service = accessor.get(&COMMAND_SERVICE);
            let params = params.cloned();
            let options = options.clone();
            HandlerOutput::pending(async move {
                let service = service?;
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if name.is_empty() {
                    return Err(CommandError::Custom("sign-in without a user name".into()));
                }
                service.execute_sync(SET_USER, params.clone(), &options)?;
                service.execute_sync(
                    SET_DIALOG_VISIBLE,
                    Some(json!({ "visible": false })),
                    &options,
                )?;
                Ok(Value::Bool(true))
            })
        },
    ))?);

    // Plain sign-out, and an audited variant that outranks it whenever an
    // audit log is resolvable in the current scope.
    registrations.add(service.register_multi(MultiImplementation::new(Command::new(
        SIGN_OUT,
        CommandKind::Command,
        |accessor, _, _| {
            let module = accessor.get(&USER_AUTH);
            HandlerOutput::try_ready(move || {
                module?.reset();
                Ok(Value::Bool(true))
            })
        },
    )))?);
    registrations.add(service.register_multi(
        MultiImplementation::new(Command::new(
            SIGN_OUT,
            CommandKind::Command,
            |accessor, _, _| {
                let module = accessor.get(&USER_AUTH);
                let audit = accessor.get(&AUDIT_LOG);
                HandlerOutput::try_ready(move || {
                    let module = module?;
                    let name = module.snapshot().name;
                    module.reset();
                    audit?.record(format!("signed out: {name}"));
                    Ok(Value::Bool(true))
                })
            },
        ))
        .priority(5)
        .when(|accessor| matches!(accessor.get_optional(&AUDIT_LOG), Ok(Some(_)))),
    )?);

    Ok(registrations)
}
