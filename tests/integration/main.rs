//! Integration tests for the crawler
//!
//! These tests drive full crawls against wiremock servers and in-memory
//! fetchers, backed by a real SQLite store in a temporary directory.

mod common;
mod crawl_tests;
mod failure_tests;
mod resume_tests;
