pub mod checksum;
pub mod metadata;
