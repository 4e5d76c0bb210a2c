//! Signup, signin and code confirmation endpoints.

mod error;
pub mod signin;
pub mod signup;
pub mod types;
pub mod verify_otp;

pub(crate) use error::{Operation, error_response};
