//! Live harness handles and the registry that owns them.
//!
//! # Architecture
//!
//! ```text
//! HarnessController
//!     |
//!     | create_container(id, plan)
//!     v
//! ContainerEngine ------------> Arc<dyn HarnessHandle>
//!                                    |
//! HarnessRegistry <--set(id)---------+
//!     |
//!     |   get(id) -> setup() / teardown()
//!     |   remove(id)
//! ```

pub mod registry;
pub mod trait_def;

pub use registry::HarnessRegistry;
pub use trait_def::HarnessHandle;
