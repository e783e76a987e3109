pub mod password;
pub mod session;
pub mod verification;

pub use password::{change_password, forgot_password, reset_password, verify_reset_token};
pub use session::{login, logout, refresh, validate};
pub use verification::{send_verification, verify_email};
