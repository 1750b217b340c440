//! Built-in driver implementations, one per backing environment.

pub mod ec2;
pub mod none;
pub mod socket;
