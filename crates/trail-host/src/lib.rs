pub mod fabric;
pub mod sim;
pub mod tabs;

pub use fabric::{CoordinatorRequest, DeliveryError, MessageFabric};
pub use sim::{SimDocument, SimHost};
pub use tabs::{HostError, TabDocument, TabEvent, TabHost, TabSnapshot};
