pub mod error;
pub mod expiration;
pub mod locker;
pub mod storage;
pub mod upload_service;
pub mod validation;
