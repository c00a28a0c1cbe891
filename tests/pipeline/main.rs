#[path = "../support/mod.rs"]
mod support;

mod runner;
mod service;
mod sync;
