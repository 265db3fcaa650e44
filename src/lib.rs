//! Batch migration of legacy gallery records into standard posts carrying an
//! embedded gallery block.
pub mod attachment;
pub mod config;
pub mod converter;
pub mod db;
pub mod delayed;
pub mod gallery_block;
pub mod legacy;
pub mod migration;
pub mod model;
pub mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod worker;
