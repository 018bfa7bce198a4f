//! Core session plumbing: audio codec and the upstream session contract.

pub mod codec;
pub mod upstream;
