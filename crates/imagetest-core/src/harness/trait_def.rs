//! The `HarnessHandle` trait -- the live handle for one provisioned harness.
//!
//! Each container engine returns its own implementation from
//! [`crate::engine::ContainerEngine::create_container`]. The trait is
//! object-safe so handles can be stored as `Arc<dyn HarnessHandle>` in the
//! [`super::HarnessRegistry`].

use anyhow::Result;
use async_trait::async_trait;

/// Runtime handle for a harness container.
///
/// # Object Safety
///
/// Every method returns a concrete type, so `dyn HarnessHandle` is usable in
/// collections such as [`super::HarnessRegistry`].
#[async_trait]
pub trait HarnessHandle: Send + Sync {
    /// The harness identifier this handle is bound to.
    fn id(&self) -> &str;

    /// Bring the container up: authenticate, create, and start it.
    ///
    /// Calling `setup` again with an unchanged plan must leave a running
    /// container in place.
    async fn setup(&self) -> Result<()>;

    /// Stop and remove the container. Succeeds when it is already gone.
    async fn teardown(&self) -> Result<()>;
}

// Compile-time assertion: HarnessHandle must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn HarnessHandle) {}
};
