//! Editorial workflow engine: decisions, review rounds and the notifications
//! that move a submission from submission through review, copyediting and
//! production.

pub mod config;
pub mod db;
pub mod decision;
pub mod error;
pub mod mail;
pub mod review;
pub mod routes;
pub mod state;
pub mod templates;
