// dlc-domain library entry point
pub mod error;
pub mod request;
pub mod stage;
pub mod switch;
pub mod window;
pub use error::DomainError;
pub use request::{OverrideRequest, SwitchAddresses};
pub use stage::Stage;
pub use switch::SwitchDirection;
pub use window::{OverrideWindow, WindowRelation};
