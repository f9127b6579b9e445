pub mod devfs;
pub mod device;
pub mod frame;
pub mod sim;

pub use devfs::DevHost;
pub use device::{Bus, BusKind, Device, DeviceError, Host};
pub use frame::{Bounds, Frame};
pub use sim::{SimConfig, SimHost};
