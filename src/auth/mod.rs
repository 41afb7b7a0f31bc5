// Authentication module
// Manages the JWT token lifecycle for a compute session

pub mod token;
mod types;
mod session;

pub use session::{
    AuthSession, DEFAULT_REFRESH_MARGIN_SECS, LOGIN_PATH, REFRESH_PATH, VERIFY_PATH,
};
pub use token::DecodedPayload;
pub use types::{Credentials, TokenPair};
