//! FFI glue for the injector

pub mod exports;
