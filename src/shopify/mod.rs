#![allow(unused_imports)]

pub mod articles;
pub mod client;
pub mod config;
pub mod files;
pub mod staged_upload;
pub mod upload;

pub use client::{ShopifyApiError, ShopifyClient};
pub use config::ShopifyConfig;
pub use files::{MediaError, MediaStatus, PollPolicy, RegisteredMedia};
pub use staged_upload::{StagedTarget, StagingError};
pub use upload::UploadError;
