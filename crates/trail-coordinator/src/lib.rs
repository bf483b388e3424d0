pub mod coordinator;
pub mod settings;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
pub use settings::SettingsSurface;
