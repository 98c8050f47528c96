//! Test Helper Utilities
//!
//! Shared utilities for testing dcmi-crawl

#![allow(dead_code)]

pub mod fake_reader;
pub mod fixtures;

pub use fake_reader::{FakeFile, FakeTagReader};
pub use fixtures::{
    dose, image, plan, scenario, segmentation, structure_set, write_dicm_file, Dataset,
};
