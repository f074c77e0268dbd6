//! Turnstile - In-Process Fixed-Window Rate Limiting
//!
//! This crate implements per-key request admission control held in process
//! memory. Each caller key gets a counter for a fixed window that opens with
//! its first request; requests beyond the limit are rejected until the
//! window ends. An HTTP layer translates rejections into
//! `429 Too Many Requests` for a host request pipeline.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
