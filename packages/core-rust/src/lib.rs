//! Remoter Core — service descriptors, identities, handles, and the platform binding contract.

pub mod component;
pub mod descriptor;
pub mod handle;
pub mod identity;
pub mod traits;

pub use component::ComponentName;
pub use descriptor::ServiceDescriptor;
pub use handle::ServiceHandle;
pub use identity::ServiceIdentity;
pub use traits::{BindCallback, BindOptions, BindPlatform, ServiceResolver};
