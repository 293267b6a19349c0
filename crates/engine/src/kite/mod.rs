pub mod rest;

pub use rest::KiteClient;
