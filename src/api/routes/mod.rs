//! API Routes
//!
//! Route handlers organized by functionality.

pub mod console;
pub mod health;
pub mod plugins;
pub mod streams;
