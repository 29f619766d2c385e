pub mod server;

use crate::api::handlers::device::DeviceAuthConfig;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        config: DeviceAuthConfig,
    },
}
