//! Course portal: instructors publish announcements and materials, students
//! upload assignment submissions, and both download files under role-scoped
//! access rules.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logger;
pub mod models;
pub mod policy;
pub mod repository;
pub mod seed;
pub mod server;
pub mod session;
pub mod storage;
