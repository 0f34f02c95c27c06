pub mod commands;
pub mod drivers;
pub mod topics;

pub use commands::{coerce_value, CommandError, ControllerCommand, SpaCommand};
pub use drivers::{Driver, DriverSlot, DriverTable, Uom};
pub use topics::*;
