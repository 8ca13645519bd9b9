// src/models/mod.rs

pub mod assignment;
pub mod exam;
pub mod session;
pub mod user;
