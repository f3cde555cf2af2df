//! Browser sessions: model, ACR ordering, cookies and the session engine.

pub mod acr;
pub mod cookie;
pub mod model;
pub mod service;

pub use acr::{AcrLevelResolver, StaticAcrLevels};
pub use cookie::{
    SESSION_STATE_COOKIE, UMA_SESSION_STATE_COOKIE, extract_cookie, removal_cookie,
    session_cookie,
};
pub use model::{Session, SessionAttributes, SessionState, allowed_parameters};
pub use service::{SessionService, session_claims};
