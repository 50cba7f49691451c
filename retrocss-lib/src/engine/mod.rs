//! The retrofitting engine: the page model, stylesheet access, the passes
//! that apply each transform and the observer that re-drives them.

pub mod access;
pub mod capabilities;
pub mod loader;
pub mod observer;
pub mod oklch_fallback;
pub mod page;
pub mod retrofit;
