//! Shared utilities for the snippet migrator.
//!
//! This crate provides common functionality used across all other crates:
//! - Cryptographic utilities (digests, random secrets)
//! - Password hashing with Argon2id
//! - Common validation logic

pub mod crypto;
pub mod password;
pub mod validation;
