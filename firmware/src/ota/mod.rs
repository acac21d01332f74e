// Platform side of the firmware update: flash slot, TLS socket, clock and reset

pub mod flash;
pub mod platform;
pub mod transport;

pub use flash::EspFlashWriter;
pub use platform::{EfuseDeviceId, EspClock, EspRestart};
pub use transport::{install_global_ca, EspTlsTransport};
