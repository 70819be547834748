//! Service layer: one thin wrapper per capability.
//!
//! Each method resolves its capability handle, performs one remote
//! operation, times it, and maps provider failures into the API error
//! taxonomy. Handlers stay free of provider types.

pub mod auth_service;
pub mod blob_service;
pub mod document_service;
pub mod realtime_service;

pub use auth_service::AuthService;
pub use blob_service::BlobService;
pub use document_service::DocumentService;
pub use realtime_service::RealtimeService;
