//! Remote access to the build instance and the provisioning hook run against it

mod communicator;
mod hook;

pub use communicator::{Communicator, TcpCommunicator};
pub use hook::{NoopHook, ProvisionHook, ProvisionTarget, ShellHook};
