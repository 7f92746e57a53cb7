//! Session String Bot Library
//!
//! A Telegram bot that generates portable account session strings.
//!
//! This crate provides the core functionality for:
//! - Guiding a user through API credential, phone, code and password entry
//! - Driving the account login over `MTProto`
//! - Storing generated sessions and expiring them on a schedule
//! - Recording usage statistics

pub mod account;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod scheduler;
pub mod storage;
pub mod telegram;
pub mod updater;
