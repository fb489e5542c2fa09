//! Foundation types for objdb.
//!
//! This crate provides the identifier, type-tag, and record types shared by
//! every other objdb crate. It has no storage logic of its own.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- 64-bit object identifier with a reserved NULL value
//! - [`ObjectKind`] -- type tag of a managed object's state
//! - [`ObjectFlags`] -- membership flags carried by WAL tuples
//! - [`ObjectRecord`] -- the value stored for each object in the object store

pub mod error;
pub mod kind;
pub mod object;
pub mod record;

pub use error::TypeError;
pub use kind::{ObjectFlags, ObjectKind};
pub use object::ObjectId;
pub use record::ObjectRecord;
