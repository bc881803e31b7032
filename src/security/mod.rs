pub mod domains;

pub use domains::{AllowListPattern, DomainMatcher};
