//! Data models shared by the session, the result registry and the API client.
//!
//! - `User`: the identity record the auth endpoints return
//! - `EnhancementRecord`: one enhanced image the client is tracking
//! - `ImageUpload`: a source image about to be sent for enhancement

pub mod record;
pub mod user;

pub use record::{EnhanceResponse, EnhancementModel, EnhancementRecord, ImageUpload};
pub use user::User;
