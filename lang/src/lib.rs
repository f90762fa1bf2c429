//! Build driver for Spin objects.
//!
//! The driver walks the object graph rooted at one source file, runs a
//! two-phase [`frontend::FrontEnd`] over every object, merges finished
//! children and `file` data into their parent, and finally lays the root out
//! as a flashable image with [`image::compose`].

pub mod compiler;
pub mod context;
pub mod data;
pub mod diagnose;
pub mod frontend;
pub mod heap;
pub mod image;
pub mod source;
pub mod symbols;
pub mod unused;
