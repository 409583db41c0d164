//! HTTP message types and the blocking send layer

mod client;
mod request;
mod response;
mod runner;

pub use client::HttpClient;
pub use request::Request;
pub use response::Response;
pub use runner::HttpTaskRunner;
