//! Data Transfer Objects for REST request/response serialization.

pub mod call_dto;
pub mod client_dto;

pub use call_dto::*;
pub use client_dto::*;
