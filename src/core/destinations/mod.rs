pub mod registry;

pub use registry::{DestinationRegistry, DestinationRegistryListener, DestinationState, ListenerId};
