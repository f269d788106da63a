pub mod event;
pub mod span;
