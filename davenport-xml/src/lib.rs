// utils
pub mod error;
pub mod xml;

// document model
pub mod element;

// webdav vocabulary
pub mod decoder;
pub mod encoder;
pub mod types;
pub mod values;
