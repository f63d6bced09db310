pub mod identity;

pub use identity::{IdentityResolver, IdentityState, RouteClass};
