//! Built-in callbacks for the chime binary.

use chime_dispatch::CallbackRegistry;
use chime_types::CallbackArgs;

fn message_arg(args: &CallbackArgs) -> String {
    args.get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("(no message)")
        .to_string()
}

/// Callbacks every chime daemon ships with.
pub fn builtin_registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();

    // log.message: emit the "message" argument through tracing.
    registry.register_fn("log.message", |args| {
        Box::pin(async move {
            let message = message_arg(&args);
            tracing::info!(target: "chime::job", "{message}");
            Ok(Some(message))
        })
    });

    // shell.echo: print the "message" argument to stdout.
    registry.register_fn("shell.echo", |args| {
        Box::pin(async move {
            println!("{}", message_arg(&args));
            Ok(None)
        })
    });

    registry
}
