pub mod auth;
pub mod rest;
pub mod session;
pub mod stomp;
pub mod stomp_ws;

pub use auth::HttpAuthProvider;
pub use rest::RestBackend;
pub use session::SessionHandle;
pub use stomp_ws::StompWsTransport;
