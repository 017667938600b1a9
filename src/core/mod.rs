// Core modules implementing fragments, container packing, events, and errors.
pub mod container;
pub mod error;
pub mod event;
pub mod fragment;
pub mod loader;
