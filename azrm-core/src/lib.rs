//! azrm Core
//!
//! Provider framework for mapping declarative resources onto remote management APIs

pub mod differ;
pub mod effect;
pub mod interpreter;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
