// src/client/tests/mod.rs
//! Tests for the managed client and its registry
