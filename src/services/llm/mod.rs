pub mod client;

pub use client::LlmResponder;
