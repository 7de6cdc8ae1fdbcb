pub mod data;
pub mod event;
pub mod stream;
pub mod topology;

pub use data::{Sample, SampleKey, StatusEvent, now_epoch_ms};
pub use event::DomainEvent;
pub use stream::{EntryId, StreamItem, StreamKind, StreamPayload};
pub use topology::{
    AgentDefinition, ComponentDefinition, ConnectionDefinition, DataItemDefinition,
    DeviceDefinition, TopologyDefinition,
};
