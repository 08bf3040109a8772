//! User directory domain model and the storage abstraction backing it.
//!
//! The concrete persistence layer lives in a separate crate (`user-store-libsql`);
//! everything behavioral about users (validation, lockout, display helpers,
//! password hashing) is defined here so it can be exercised without a database.

#[macro_use]
extern crate tracing;

mod employee;
mod password;
mod store;
mod user;
mod validate;

pub use employee::{EmployeeProfile, Gender};
pub use password::PasswordHash;
pub use store::{DynUserStore, StoreError, UserStore};
pub use user::{Language, NewUser, ProfileUpdate, User, LOCKOUT_DURATION, LOCKOUT_THRESHOLD};
pub use validate::{normalize_email, validate_email, validate_phone_number};
