//! Demonstration callables shipped with the binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use beanworker_core::contract::{
    Arguments, Callable, CallableRegistry, FnCallable, RegistryError, Signature, TUBE_FIELD,
};
use serde_json::{Value, json};
use tracing::info;

/// Fails its first `n` calls, then greets like `demo.greet`.
pub struct Flaky {
    remaining_failures: AtomicU32,
}

impl Flaky {
    pub fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Callable for Flaky {
    fn name(&self) -> &str {
        "demo.flaky"
    }

    fn signature(&self) -> Option<Signature> {
        Some(Signature::new().required("name"))
    }

    async fn call(&self, args: Arguments) -> anyhow::Result<Value> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            anyhow::bail!("intentional failure (left={left})");
        }
        println!("Hello, {}!", args.get_str("name").unwrap_or_default());
        Ok(json!(true))
    }
}

pub fn registry() -> Result<CallableRegistry, RegistryError> {
    let mut registry = CallableRegistry::new();

    registry.register(Arc::new(FnCallable::new(
        "demo.echo",
        Signature::new().arbitrary_fields(),
        |args: Arguments| async move {
            let fields = args.fields().cloned().unwrap_or_default();
            println!("{}", Value::Object(fields));
            anyhow::Ok(json!(true))
        },
    )))?;

    registry.register(Arc::new(FnCallable::new(
        "demo.greet",
        Signature::new()
            .required("name")
            .optional("greeting")
            .optional(TUBE_FIELD),
        |args: Arguments| async move {
            let greeting = args.get_str("greeting").unwrap_or("Hello");
            let name = args.get_str("name").unwrap_or_default();
            info!(tube = args.tube().unwrap_or("?"), "greeting {name}");
            println!("{greeting}, {name}!");
            anyhow::Ok(json!(true))
        },
    )))?;

    registry.register(Arc::new(FnCallable::new(
        "demo.body",
        Signature::new().required("body").optional(TUBE_FIELD),
        |args: Arguments| async move {
            let body = args.body().unwrap_or_default();
            println!(
                "{} bytes from {}: {}",
                body.len(),
                args.tube().unwrap_or("?"),
                String::from_utf8_lossy(body)
            );
            anyhow::Ok(json!(!body.is_empty()))
        },
    )))?;

    registry.register(Arc::new(Flaky::new(2)))?;

    Ok(registry)
}
