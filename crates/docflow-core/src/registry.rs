//! Activity registry -- maps a pipeline stage to its unit of work.
//!
//! `Activity` uses RPITIT (return-position `impl Trait` in traits) for its
//! async method, consistent with the Rust 2024 edition approach used across
//! this workspace. Since RPITIT traits cannot be trait objects, dynamic
//! dispatch goes through an object-safe `ActivityDyn` twin with boxed
//! futures, a blanket implementation, and the `BoxActivity` wrapper.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use docflow_types::error::{ActivityError, RegistryError};
use docflow_types::job::Stage;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Activity trait
// ---------------------------------------------------------------------------

/// One stage's unit of work: takes one input payload, produces one output
/// payload or fails with an [`ActivityError`].
///
/// Implementations must not have side effects beyond their own work; all
/// durability is the orchestrator's concern.
pub trait Activity: Send + Sync + 'static {
    fn run(
        &self,
        input: Value,
    ) -> impl Future<Output = Result<Value, ActivityError>> + Send;
}

/// Object-safe version of [`Activity`] with a boxed future.
///
/// Exists solely to enable `dyn` dispatch; a blanket implementation covers
/// every `Activity`.
trait ActivityDyn: Send + Sync {
    fn run_boxed<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>>;
}

impl<T: Activity> ActivityDyn for T {
    fn run_boxed<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>> {
        Box::pin(self.run(input))
    }
}

/// Type-erased activity for storage in the registry.
pub struct BoxActivity {
    inner: Box<dyn ActivityDyn>,
}

impl BoxActivity {
    /// Wrap a concrete activity in a type-erased box.
    pub fn new<T: Activity>(activity: T) -> Self {
        Self {
            inner: Box::new(activity),
        }
    }

    /// Run the wrapped activity.
    pub async fn run(&self, input: Value) -> Result<Value, ActivityError> {
        self.inner.run_boxed(input).await
    }
}

// ---------------------------------------------------------------------------
// ActivityRegistry
// ---------------------------------------------------------------------------

/// Pure lookup table from stage to activity. No ordering or concurrency
/// concerns of its own.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: HashMap<Stage, BoxActivity>,
}

impl ActivityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a stage with an activity, replacing any previous binding.
    pub fn register<T: Activity>(&mut self, stage: Stage, activity: T) {
        self.activities.insert(stage, BoxActivity::new(activity));
    }

    /// Whether an activity is registered for the stage.
    pub fn contains(&self, stage: Stage) -> bool {
        self.activities.contains_key(&stage)
    }

    /// Look up and invoke the stage's activity.
    ///
    /// Fails with [`RegistryError::UnknownActivity`] when no activity is
    /// registered, or with the activity's own error wrapped in
    /// [`RegistryError::Activity`].
    pub async fn invoke(&self, stage: Stage, input: Value) -> Result<Value, RegistryError> {
        let activity = self
            .activities
            .get(&stage)
            .ok_or(RegistryError::UnknownActivity { stage })?;
        activity.run(input).await.map_err(RegistryError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
