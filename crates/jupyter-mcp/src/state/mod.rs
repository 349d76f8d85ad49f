//! Per-notebook tracked state.

mod guard;

pub use guard::{Interceptor, StateGuard};
