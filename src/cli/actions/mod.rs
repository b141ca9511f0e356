pub mod server;

use crate::notify::SmtpConfig;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        smtp: Option<SmtpConfig>,
    },
}
