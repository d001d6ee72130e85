//! Demo business logic served by `dropbridged`.

pub mod echo;
pub mod users;

use std::sync::Arc;

use crate::services::routing::RequestRouter;

/// Registers `GET /users`, `POST /users` and `POST /default`.
pub fn register_defaults(router: &mut RequestRouter) {
    router.register("GET", "/users", Arc::new(users::UsersGet));
    router.register("POST", "/users", Arc::new(users::UsersCreate));
    router.register("POST", "/default", Arc::new(echo::Echo));
}
