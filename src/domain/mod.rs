//! Core domain types and services.

pub mod access;
pub mod config_validation;
pub mod error;
pub mod event;
pub mod indicator;
pub mod indicator_registry;
pub mod listing;
pub mod marketplace;
pub mod pagination;
pub mod rule;
pub mod rule_parser;
pub mod rule_validator;
pub mod strategy;
pub mod structure;
pub mod tag;
pub mod tag_catalog;
pub mod version_manager;
