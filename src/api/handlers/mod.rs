pub mod auth;

pub mod health;
pub use self::health::health;

pub mod test_route;
pub use self::test_route::test_route;

pub mod register;
pub use self::register::{register, register_page};

pub mod login;
pub use self::login::login;

pub mod logout;
pub use self::logout::logout;

pub mod me;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of every plain success or error reply.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
