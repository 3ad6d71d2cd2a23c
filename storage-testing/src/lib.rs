//! Lab device trees and helpers for exercising the resolver end to end

pub mod errors;
pub mod lab;
pub mod spec;
