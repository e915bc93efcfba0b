#![allow(dead_code)]

pub mod context;
pub mod gpu;
pub mod net;
pub mod pipeline;
pub mod settings;
pub mod supervisor;
