pub mod bluetooth;
pub mod controller;
pub mod protocol;
pub mod session;

pub use bluetooth::{discover_desk, BleTransport, DiscoveredDesk};
pub use controller::{DeskController, DeskTransport, MoveOutcome, MoveReport};
pub use session::{MotionProfile, MoveSession, StepOutcome};
