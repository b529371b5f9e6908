#![allow(dead_code)]

mod descent;
mod pages;
mod setup;

pub use descent::*;
pub use pages::*;
pub use setup::*;
