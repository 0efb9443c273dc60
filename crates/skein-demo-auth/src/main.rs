#![forbid(unsafe_code)]

//! Scripted demo: a user-auth flow driven through the command service.
//!
//! Publishes a scope holding the auth module, an audit log, and the
//! command service, then walks a sign-in / sign-out session the way a UI
//! would — every state change goes through a dispatched command. Run with
//! `RUST_LOG=debug` to watch the indented dispatch lines.

mod auth;

use std::rc::Rc;

use futures::executor::block_on;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use skein_command::{COMMAND_SERVICE, CommandService, ExecutionOptions};
use skein_scope::{Dependency, provide_dependencies, use_dependency};

use crate::auth::{AUDIT_LOG, AuditLog, SIGN_IN, SIGN_OUT, USER_AUTH, UserAuthModule};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _scope = provide_dependencies(vec![
        Dependency::factory(COMMAND_SERVICE, |accessor| {
            CommandService::new(accessor.injector().clone())
        }),
        Dependency::value(USER_AUTH, UserAuthModule::new()),
        Dependency::value(AUDIT_LOG, AuditLog::new()),
    ])?;

    let service = use_dependency(&COMMAND_SERVICE)?;
    let _registrations = auth::register_commands(&service)?;

    // Observe every dispatch, the way a collaboration layer would.
    let audit = use_dependency(&AUDIT_LOG)?;
    let observer = Rc::clone(&audit);
    let _listener = service.on_executed(Rc::new(move |info, _| {
        observer.record(format!("executed {}", info.id));
    }))?;

    let module = use_dependency(&USER_AUTH)?;

    let result = block_on(service.execute(
        SIGN_IN,
        Some(json!({"name": "amy", "email": "amy@example.test", "role": "admin"})),
        &ExecutionOptions::new(),
    ))?;
    tracing::info!(%result, user = %module.snapshot().name, "signed in");
    tracing::info!(
        trigger = module.last_trigger().as_deref().unwrap_or("<none>"),
        "set-user mutation was tagged"
    );

    // A sign-in without a name hits the policy escape hatch: the handler
    // raises a custom execution error and the async path reports false.
    let declined = block_on(service.execute(
        SIGN_IN,
        Some(json!({"email": "nobody@example.test"})),
        &ExecutionOptions::new(),
    ))?;
    tracing::info!(%declined, "anonymous sign-in declined");

    // Sign-out is a multi-command; with the audit log in scope the
    // audited implementation outranks the plain one.
    service.execute_sync(SIGN_OUT, None, &ExecutionOptions::new())?;
    tracing::info!(user = %module.snapshot().name, "signed out");

    for entry in audit.entries() {
        tracing::info!(%entry, "audit");
    }
    Ok(())
}
